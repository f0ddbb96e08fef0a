use tempfile::TempDir;

use crate::wal::{Op, Wal};

fn temp_wal() -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.wal");
    (dir, path)
}

#[test]
fn fresh_wal_has_no_entries() {
    let (_dir, path) = temp_wal();
    let wal = Wal::open(&path, 0).unwrap();
    assert_eq!(wal.entry_count(), 0);
}

#[test]
fn append_and_read_back() {
    let (_dir, path) = temp_wal();
    let mut wal = Wal::open(&path, 42).unwrap();
    wal.append(Op::Add, 0, 1, b"hello").unwrap();
    wal.append(Op::Update, 0, 1, b"world").unwrap();
    wal.append(Op::Delete, 0, 2, b"").unwrap();
    assert_eq!(wal.entry_count(), 3);

    let entries = wal.read_all().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].op, Op::Add);
    assert_eq!(entries[0].payload, b"hello");
    assert_eq!(entries[1].op, Op::Update);
    assert_eq!(entries[1].payload, b"world");
    assert_eq!(entries[2].op, Op::Delete);
    assert!(entries[2].payload.is_empty());
}

#[test]
fn reopen_preserves_entries() {
    let (_dir, path) = temp_wal();
    {
        let mut wal = Wal::open(&path, 7).unwrap();
        wal.append(Op::Add, 0, 1, b"a").unwrap();
    }
    let mut wal = Wal::open(&path, 7).unwrap();
    assert_eq!(wal.entry_count(), 1);
    assert_eq!(wal.witnessed_main_crc(), 7);
    let entries = wal.read_all().unwrap();
    assert_eq!(entries[0].payload, b"a");
}

#[test]
fn reset_clears_entries_and_updates_witnessed_crc() {
    let (_dir, path) = temp_wal();
    let mut wal = Wal::open(&path, 0).unwrap();
    wal.append(Op::Add, 0, 1, b"a").unwrap();
    wal.reset(99).unwrap();
    assert_eq!(wal.entry_count(), 0);
    assert_eq!(wal.witnessed_main_crc(), 99);
    assert!(wal.read_all().unwrap().is_empty());
}

#[test]
fn torn_tail_is_truncated_on_read() {
    let (_dir, path) = temp_wal();
    {
        let mut wal = Wal::open(&path, 0).unwrap();
        wal.append(Op::Add, 0, 1, b"a").unwrap();
        wal.append(Op::Add, 0, 2, b"b").unwrap();
    }
    // Corrupt the last few bytes to simulate a torn write, without updating entry_count.
    {
        use std::fs::OpenOptions;
        use std::io::{Seek, SeekFrom, Write};
        let mut f = OpenOptions::new().write(true).open(&path).unwrap();
        let len = f.metadata().unwrap().len();
        f.seek(SeekFrom::Start(len - 2)).unwrap();
        f.write_all(&[0xff, 0xff]).unwrap();
    }
    let mut wal = Wal::open(&path, 0).unwrap();
    let entries = wal.read_all().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(wal.entry_count(), 1);
}

#[test]
fn invalid_header_is_recreated() {
    let (_dir, path) = temp_wal();
    std::fs::write(&path, b"not a wal file at all").unwrap();
    let wal = Wal::open(&path, 5).unwrap();
    assert_eq!(wal.entry_count(), 0);
    assert_eq!(wal.witnessed_main_crc(), 5);
}

#[test]
fn should_checkpoint_on_entry_count_threshold() {
    let (_dir, path) = temp_wal();
    let mut wal = Wal::open(&path, 0).unwrap();
    for i in 0..5 {
        wal.append(Op::Add, 0, i + 1, b"x").unwrap();
    }
    assert!(wal.should_checkpoint(5, u64::MAX).unwrap());
    assert!(!wal.should_checkpoint(6, u64::MAX).unwrap());
}
