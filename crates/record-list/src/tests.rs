use std::sync::Arc;

use proptest::prelude::*;
use rdbcore_block_store::memory::Memory;
use rdbcore_block_store::Store;

use super::*;

#[test]
fn geometric_addressing_matches_scenario_1() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let header = FixedRecordList::create(&store, 4).unwrap();
    let mut list = FixedRecordList::init(store.clone(), header, 4).unwrap();

    for _ in 0..5 {
        list.increase_size().unwrap();
    }
    assert_eq!(list.addressable_node_count(), 32 + 64 + 128 + 256 + 512);

    let mut entry = list.position(128).unwrap();
    entry.put_i32(7).unwrap();

    let mut entry = list.position(128).unwrap();
    assert_eq!(entry.get_i32().unwrap(), 7);
}

#[test]
fn position_beyond_allocated_blocks_errors() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let header = FixedRecordList::create(&store, 4).unwrap();
    let list = FixedRecordList::init(store.clone(), header, 4).unwrap();
    assert!(matches!(list.position(0), Err(Error::OutOfRange(0, 0))));
}

#[test]
fn decrease_size_frees_the_last_block() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let header = FixedRecordList::create(&store, 4).unwrap();
    let mut list = FixedRecordList::init(store.clone(), header, 4).unwrap();
    list.increase_size().unwrap();
    list.increase_size().unwrap();
    assert_eq!(list.addressable_node_count(), 32 + 64);

    list.decrease_size().unwrap();
    assert_eq!(list.addressable_node_count(), 32);
    assert!(list.position(32).is_err());
}

#[test]
fn decrease_size_on_empty_list_is_an_error() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let header = FixedRecordList::create(&store, 4).unwrap();
    let mut list = FixedRecordList::init(store.clone(), header, 4).unwrap();
    assert!(matches!(list.decrease_size(), Err(Error::NoBlocksToFree)));
}

#[test]
fn reserved_long_round_trips_and_survives_reinit() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let header = FixedRecordList::create(&store, 4).unwrap();
    let mut list = FixedRecordList::init(store.clone(), header, 4).unwrap();
    list.set_reserved_long(-99).unwrap();

    let reopened = FixedRecordList::init(store.clone(), header, 4).unwrap();
    assert_eq!(reopened.reserved_long(), -99);
}

#[test]
fn bad_magic_is_rejected() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let id = store.create_area(HEADER_SIZE).unwrap();
    // Never initialized: magic is all zero bytes, not `MAGIC`.
    assert!(matches!(FixedRecordList::init(store.clone(), id, 4), Err(Error::BadMagic { .. })));
}

#[test]
fn all_areas_used_includes_header_and_every_block() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let header = FixedRecordList::create(&store, 4).unwrap();
    let mut list = FixedRecordList::init(store.clone(), header, 4).unwrap();
    list.increase_size().unwrap();
    list.increase_size().unwrap();
    assert_eq!(list.all_areas_used().len(), 3);
}

proptest! {
    /// For every record id `n` and the block `k` it resolves to,
    /// `position(n)` lands at offset `(n - 32*(2^k - 1)) * entry_size`
    /// inside block `k`.
    #[test]
    fn addressing_formula_is_consistent(n in 0u64..100_000) {
        let (k, offset) = locate(n);
        let block_start = 32 * ((1u64 << k) - 1);
        prop_assert_eq!(n, block_start + offset);
        prop_assert!(offset < block_len(k));
    }

    #[test]
    fn every_record_in_a_block_round_trips(entries_per_call in 1u64..200) {
        let store: Arc<dyn Store> = Arc::new(Memory::new());
        let header = FixedRecordList::create(&store, 8).unwrap();
        let mut list = FixedRecordList::init(store.clone(), header, 8).unwrap();
        while list.addressable_node_count() < entries_per_call {
            list.increase_size().unwrap();
        }
        let n = entries_per_call - 1;
        let mut entry = list.position(n).unwrap();
        entry.put_i64(n as i64).unwrap();
        let mut entry = list.position(n).unwrap();
        prop_assert_eq!(entry.get_i64().unwrap(), n as i64);
    }
}
