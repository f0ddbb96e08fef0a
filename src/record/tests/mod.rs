use std::io::{Read, Write};

use super::{FieldDescriptor, Record, TypeEntry};
use crate::error::Result;
use crate::io::{Reader, Writer};
use crate::query::FieldValue;

#[derive(Debug, Clone, PartialEq)]
struct Widget {
    id: u32,
    name: String,
    price: f64,
    active: bool,
}

impl Record for Widget {
    fn type_name() -> &'static str {
        "Widget"
    }

    fn id(&self) -> u32 {
        self.id
    }

    fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    fn write_to(&self, w: &mut Writer<&mut dyn Write>) -> Result<()> {
        w.write_u32(self.id)?;
        w.write_str(&self.name)?;
        w.write_f64(self.price)?;
        w.write_bool(self.active)?;
        Ok(())
    }

    fn read_from(r: &mut Reader<&mut dyn Read>) -> Result<Self> {
        Ok(Self {
            id: r.read_u32()?,
            name: r.read_str()?,
            price: r.read_f64()?,
            active: r.read_bool()?,
        })
    }

    fn fields() -> &'static [FieldDescriptor<Self>] {
        &[
            FieldDescriptor {
                name: "name",
                get: |w| FieldValue::Str(w.name.clone()),
            },
            FieldDescriptor {
                name: "price",
                get: |w| FieldValue::F64(w.price),
            },
            FieldDescriptor {
                name: "active",
                get: |w| FieldValue::Bool(w.active),
            },
        ]
    }
}

fn sample() -> Widget {
    Widget {
        id: 1,
        name: "bolt".to_string(),
        price: 1.25,
        active: true,
    }
}

#[test]
fn write_then_read_roundtrips() {
    let w = sample();
    let mut buf = Vec::new();
    {
        let mut writer = Writer::new(&mut buf as &mut dyn Write);
        w.write_to(&mut writer).unwrap();
    }
    let mut slice = &buf[..];
    let mut reader = Reader::new(&mut slice as &mut dyn Read);
    let back = Widget::read_from(&mut reader).unwrap();
    assert_eq!(w, back);
}

#[test]
fn type_entry_roundtrips_through_erasure() {
    let entry = TypeEntry::for_type::<Widget>();
    let w = sample();

    let mut buf = Vec::new();
    {
        let mut writer = Writer::new(&mut buf as &mut dyn Write);
        entry.write_any(&w, &mut writer).unwrap();
    }
    let mut slice = &buf[..];
    let mut reader = Reader::new(&mut slice as &mut dyn Read);
    let boxed = entry.read_any(&mut reader).unwrap();
    let back = boxed.downcast_ref::<Widget>().unwrap();
    assert_eq!(&w, back);
    assert_eq!(entry.id_of(boxed.as_ref()), 1);
}

#[test]
fn type_entry_set_id_mutates_through_erasure() {
    let entry = TypeEntry::for_type::<Widget>();
    let mut w: Box<dyn std::any::Any + Send + Sync> = Box::new(sample());
    entry.set_id_of(w.as_mut(), 42);
    assert_eq!(w.downcast_ref::<Widget>().unwrap().id, 42);
}

#[test]
fn field_value_looks_up_by_name() {
    let entry = TypeEntry::for_type::<Widget>();
    let w = sample();
    assert_eq!(
        entry.field_value("price", &w).unwrap(),
        FieldValue::F64(1.25)
    );
    assert!(entry.field_value("nonexistent", &w).is_err());
}

#[test]
fn skip_advances_past_the_record() {
    let w = sample();
    let mut buf = Vec::new();
    {
        let mut writer = Writer::new(&mut buf as &mut dyn Write);
        w.write_to(&mut writer).unwrap();
    }
    buf.extend_from_slice(b"trailing");
    let mut slice = &buf[..];
    let mut reader = Reader::new(&mut slice as &mut dyn Read);
    Widget::skip(&mut reader).unwrap();
    let mut rest = Vec::new();
    reader.into_inner().read_to_end(&mut rest).unwrap();
    assert_eq!(rest, b"trailing");
}
