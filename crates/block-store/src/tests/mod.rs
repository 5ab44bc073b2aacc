//! Backend-agnostic behavior every `Store` implementation must satisfy.

use crate::fs::Fs;
use crate::memory::Memory;
use crate::{AreaId, Store};

fn exercise(store: &impl Store) {
    let id = store.create_area(32).unwrap();
    {
        let mut area = store.mutable_area(id).unwrap();
        area.put_i64(0xBEEF).unwrap();
        area.write(b"hello").unwrap();
    }
    {
        let mut area = store.mutable_area(id).unwrap();
        assert_eq!(area.get_i64().unwrap(), 0xBEEF);
        let mut buf = [0u8; 5];
        area.read(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    store.delete_area(id).unwrap();
    assert!(store.mutable_area(id).is_err());

    let _guard = store.lock_for_write();
    store.set_check_point().unwrap();
}

#[test]
fn memory_store_satisfies_the_contract() {
    exercise(&Memory::new());
}

#[test]
fn fs_store_satisfies_the_contract() {
    let dir = tempfile::tempdir().unwrap();
    exercise(&Fs::open(dir.path()).unwrap());
}

#[test]
fn area_id_distinguishes_the_fixed_area() {
    assert_eq!(AreaId::FIXED_AREA, AreaId(-1));
}
