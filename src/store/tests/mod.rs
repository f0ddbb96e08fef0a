use std::io::{Read, Write};

use tempfile::TempDir;

use crate::config::{CacheConfig, DbConfig, WalConfig};
use crate::error::StoreError;
use crate::io::{Reader, Writer};
use crate::record::{FieldDescriptor, Record};
use crate::query::FieldValue;
use crate::store::Database;

#[derive(Debug, Clone, PartialEq)]
struct Item {
    id: u32,
    name: String,
    stock: i64,
}

impl Record for Item {
    fn type_name() -> &'static str {
        "Item"
    }
    fn id(&self) -> u32 {
        self.id
    }
    fn set_id(&mut self, id: u32) {
        self.id = id;
    }
    fn write_to(&self, w: &mut Writer<&mut dyn Write>) -> crate::error::Result<()> {
        w.write_u32(self.id)?;
        w.write_str(&self.name)?;
        w.write_i64(self.stock)?;
        Ok(())
    }
    fn read_from(r: &mut Reader<&mut dyn Read>) -> crate::error::Result<Self> {
        Ok(Self {
            id: r.read_u32()?,
            name: r.read_str()?,
            stock: r.read_i64()?,
        })
    }
    fn fields() -> &'static [FieldDescriptor<Self>] {
        &[
            FieldDescriptor {
                name: "name",
                get: |i| FieldValue::Str(i.name.clone()),
            },
            FieldDescriptor {
                name: "stock",
                get: |i| FieldValue::I64(i.stock),
            },
        ]
    }
}

fn item(name: &str, stock: i64) -> Item {
    Item {
        id: 0,
        name: name.to_string(),
        stock,
    }
}

fn open(dir: &TempDir, wal: bool, cache: bool) -> Database {
    let mut config = DbConfig::new(dir.path().join("test.db"));
    config.wal = if wal { Some(WalConfig::default()) } else { None };
    config.cache = if cache { Some(CacheConfig::default()) } else { None };
    let db = Database::open(config).unwrap();
    db.register::<Item>().unwrap();
    db
}

#[test]
fn add_assigns_sequential_ids() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, true, false);
    let a = db.add(item("bolt", 10)).unwrap();
    let b = db.add(item("nut", 20)).unwrap();
    assert_eq!(a, 1);
    assert_eq!(b, 2);
}

#[test]
fn get_returns_what_was_added() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, true, false);
    let id = db.add(item("bolt", 10)).unwrap();
    let back = db.get::<Item>(id).unwrap();
    assert_eq!(back.name, "bolt");
    assert_eq!(back.stock, 10);
}

#[test]
fn get_missing_id_is_not_found() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, true, false);
    match db.get::<Item>(999) {
        Err(StoreError::NotFound) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn update_replaces_the_record() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, true, false);
    let id = db.add(item("bolt", 10)).unwrap();
    let mut updated = item("bolt", 10);
    updated.set_id(id);
    updated.stock = 99;
    db.update(updated).unwrap();
    assert_eq!(db.get::<Item>(id).unwrap().stock, 99);
}

#[test]
fn delete_then_get_is_not_found() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, true, false);
    let id = db.add(item("bolt", 10)).unwrap();
    db.delete::<Item>(id).unwrap();
    assert!(matches!(db.get::<Item>(id), Err(StoreError::NotFound)));
    assert!(!db.exists::<Item>(id).unwrap());
}

#[test]
fn count_reflects_pending_wal_state() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, true, false);
    db.add(item("bolt", 10)).unwrap();
    let id2 = db.add(item("nut", 20)).unwrap();
    assert_eq!(db.count::<Item>().unwrap(), 2);
    db.delete::<Item>(id2).unwrap();
    assert_eq!(db.count::<Item>().unwrap(), 1);
}

#[test]
fn foreach_sees_wal_update_over_main_file_value() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, true, false);
    let id = db.add(item("bolt", 10)).unwrap();
    db.checkpoint().unwrap();

    let mut updated = item("bolt", 10);
    updated.set_id(id);
    updated.stock = 42;
    db.update(updated).unwrap();

    let mut seen = Vec::new();
    db.foreach::<Item>(|i| {
        seen.push(i.stock);
        true
    })
    .unwrap();
    assert_eq!(seen, vec![42]);
}

#[test]
fn foreach_sees_record_added_and_updated_within_the_same_uncheckpointed_wal() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, true, false);
    let id = db.add(item("bolt", 10)).unwrap();

    let mut updated = item("bolt", 10);
    updated.set_id(id);
    updated.stock = 42;
    db.update(updated).unwrap();

    assert_eq!(db.count::<Item>().unwrap(), 1);

    let mut seen = Vec::new();
    db.foreach::<Item>(|i| {
        seen.push(i.stock);
        true
    })
    .unwrap();
    assert_eq!(seen, vec![42]);
}

#[test]
fn checkpoint_folds_wal_into_main_file() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, true, false);
    db.add(item("bolt", 10)).unwrap();
    db.add(item("nut", 20)).unwrap();
    db.checkpoint().unwrap();
    assert_eq!(db.count::<Item>().unwrap(), 2);
    db.close().unwrap();

    let db2 = open(&dir, true, false);
    assert_eq!(db2.count::<Item>().unwrap(), 2);
}

#[test]
fn reopen_after_close_preserves_next_id() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, true, false);
    db.add(item("bolt", 10)).unwrap();
    db.close().unwrap();

    let db2 = open(&dir, true, false);
    let id = db2.add(item("nut", 20)).unwrap();
    assert_eq!(id, 2);
}

#[test]
fn delete_where_removes_matching_and_bypasses_wal() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, true, false);
    db.add(item("bolt", 0)).unwrap();
    db.add(item("nut", 5)).unwrap();
    db.add(item("washer", 0)).unwrap();

    let removed = db.delete_where::<Item>(|i| i.stock > 0).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(db.count::<Item>().unwrap(), 1);
}

#[test]
fn update_where_mutates_matching_records() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, true, false);
    let id = db.add(item("bolt", 0)).unwrap();
    db.add(item("nut", 5)).unwrap();

    let modified = db
        .update_where::<Item>(|i| i.stock == 0, |i| i.stock = 100)
        .unwrap();
    assert_eq!(modified, 1);
    assert_eq!(db.get::<Item>(id).unwrap().stock, 100);
}

#[test]
fn works_without_wal() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, false, false);
    let id = db.add(item("bolt", 10)).unwrap();
    assert_eq!(db.get::<Item>(id).unwrap().name, "bolt");
    db.delete::<Item>(id).unwrap();
    assert!(!db.exists::<Item>(id).unwrap());
}

#[test]
fn cache_hit_returns_equivalent_value() {
    let dir = TempDir::new().unwrap();
    let db = open(&dir, true, true);
    let id = db.add(item("bolt", 10)).unwrap();
    let first = db.get::<Item>(id).unwrap();
    let second = db.get::<Item>(id).unwrap();
    assert_eq!(first, second);
}

#[test]
fn unregistered_type_is_rejected() {
    #[derive(Debug, Clone)]
    struct Other {
        id: u32,
    }
    impl Record for Other {
        fn type_name() -> &'static str {
            "Other"
        }
        fn id(&self) -> u32 {
            self.id
        }
        fn set_id(&mut self, id: u32) {
            self.id = id;
        }
        fn write_to(&self, w: &mut Writer<&mut dyn Write>) -> crate::error::Result<()> {
            w.write_u32(self.id)?;
            Ok(())
        }
        fn read_from(r: &mut Reader<&mut dyn Read>) -> crate::error::Result<Self> {
            Ok(Self { id: r.read_u32()? })
        }
    }

    let dir = TempDir::new().unwrap();
    let db = open(&dir, true, false);
    assert!(matches!(
        db.get::<Other>(1),
        Err(StoreError::NotRegistered(_))
    ));
}
