use crate::io::{Reader, Writer};

#[test]
fn roundtrip_primitives() {
    let mut buf = Vec::new();
    {
        let mut w = Writer::new(&mut buf);
        w.write_u8(7).unwrap();
        w.write_u16(1000).unwrap();
        w.write_u32(70000).unwrap();
        w.write_u64(u64::MAX).unwrap();
        w.write_i64(-42).unwrap();
        w.write_f64(3.5).unwrap();
        w.write_bool(true).unwrap();
        w.write_str("hello").unwrap();
        w.flush().unwrap();
    }

    let mut r = Reader::new(buf.as_slice());
    assert_eq!(r.read_u8().unwrap(), 7);
    assert_eq!(r.read_u16().unwrap(), 1000);
    assert_eq!(r.read_u32().unwrap(), 70000);
    assert_eq!(r.read_u64().unwrap(), u64::MAX);
    assert_eq!(r.read_i64().unwrap(), -42);
    assert_eq!(r.read_f64().unwrap(), 3.5);
    assert!(r.read_bool().unwrap());
    assert_eq!(r.read_str().unwrap(), "hello");
}

#[test]
fn empty_string_roundtrips() {
    let mut buf = Vec::new();
    Writer::new(&mut buf).write_str("").unwrap();
    let mut r = Reader::new(buf.as_slice());
    assert_eq!(r.read_str().unwrap(), "");
}

#[test]
fn string_over_cap_is_rejected() {
    let mut buf = Vec::new();
    Writer::new(&mut buf).write_str(&"x".repeat(10)).unwrap();
    let mut r = Reader::with_string_cap(buf.as_slice(), 4);
    assert!(r.read_str().is_err());
}

#[test]
fn writer_and_reader_crc_match() {
    let mut buf = Vec::new();
    let mut w = Writer::new(&mut buf);
    w.write_u32(1).unwrap();
    w.write_str("abc").unwrap();
    let write_crc = w.crc();

    let mut r = Reader::new(buf.as_slice());
    r.read_u32().unwrap();
    r.read_str().unwrap();
    assert_eq!(write_crc, r.crc());
}

#[test]
fn skip_advances_and_folds_into_crc() {
    let mut buf = Vec::new();
    let mut w = Writer::new(&mut buf);
    w.write_u32(0xdead_beef).unwrap();
    w.write_u32(0xcafe_babe).unwrap();
    let crc = w.crc();

    let mut r = Reader::new(buf.as_slice());
    r.skip(4).unwrap();
    let second = r.read_u32().unwrap();
    assert_eq!(second, 0xcafe_babe);
    assert_eq!(r.crc(), crc);
}
