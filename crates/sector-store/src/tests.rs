use std::sync::Arc;

use proptest::prelude::*;
use rdbcore_block_store::memory::Memory;
use rdbcore_block_store::Store;

use super::*;

#[test]
fn crash_safe_sector_chain_matches_scenario_2() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let area = store.create_area(0).unwrap();

    let buf1024 = (0..1024u32).map(|i| (i % 251) as u8).collect::<Vec<u8>>();
    let head = {
        let (mut sectors, dirty) = SectorStore::open(store.clone(), area, 64, false).unwrap();
        assert!(!dirty);
        let head = sectors.write_across(&buf1024).unwrap();
        sectors.close().unwrap();
        head
    };

    let (sectors, dirty) = SectorStore::open(store.clone(), area, 64, false).unwrap();
    assert!(!dirty, "a clean close must not report a dirty open");

    let mut out = vec![0u8; 1024];
    let n = sectors.read_across(head, &mut out).unwrap();
    assert_eq!(n, 1024);
    assert_eq!(out, buf1024);
}

#[test]
fn crash_leaves_the_store_dirty() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let area = store.create_area(0).unwrap();
    {
        let (mut sectors, _) = SectorStore::open(store.clone(), area, 64, false).unwrap();
        sectors.add_sector(b"abc").unwrap();
        // No close(): simulates a crash, open_flag stays 1.
    }
    let (_sectors, dirty) = SectorStore::open(store.clone(), area, 64, false).unwrap();
    assert!(dirty);
}

#[test]
fn write_across_then_read_across_round_trips_any_length() {
    for len in [0usize, 1, 59, 60, 61, 500, 4096] {
        let store: Arc<dyn Store> = Arc::new(Memory::new());
        let area = store.create_area(0).unwrap();
        let (mut sectors, _) = SectorStore::open(store.clone(), area, 64, false).unwrap();
        let buf: Vec<u8> = (0..len).map(|i| (i % 250) as u8).collect();
        let head = sectors.write_across(&buf).unwrap();
        let mut out = vec![0u8; len];
        let n = sectors.read_across(head, &mut out).unwrap();
        assert_eq!(n, len);
        assert_eq!(out, buf);
    }
}

#[test]
fn reclaimed_sector_id_yields_its_new_content() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let area = store.create_area(0).unwrap();
    let (mut sectors, _) = SectorStore::open(store.clone(), area, 64, false).unwrap();

    let id_x = sectors.add_sector(b"x-data").unwrap();
    sectors.delete_across(id_x).unwrap();
    let moved = sectors.clear_deleted_sectors().unwrap();
    assert!(!moved, "deleting the only sector then compacting leaves nothing to move");

    let id_new = sectors.add_sector(b"y-data").unwrap();
    let mut out = vec![0u8; 6];
    sectors.read_across(id_new, &mut out).unwrap();
    assert_eq!(&out, b"y-data");
}

#[test]
fn used_and_deleted_sets_partition_every_sector() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let area = store.create_area(0).unwrap();
    let (mut sectors, _) = SectorStore::open(store.clone(), area, 64, false).unwrap();

    let a = sectors.add_sector(b"a").unwrap();
    let _b = sectors.add_sector(b"b").unwrap();
    let c = sectors.add_sector(b"c").unwrap();
    sectors.delete_across(a).unwrap();
    sectors.delete_across(c).unwrap();

    let count = sectors.sector_count().unwrap();
    let mut used = std::collections::HashSet::new();
    let mut deleted = std::collections::HashSet::new();

    let mut head = sectors.delete_head();
    while head != -1 {
        assert!(deleted.insert(head));
        let (_status, next) = sectors.read_sector_header(SectorId(head)).unwrap();
        head = next as i64;
    }
    for i in 0..count as i64 {
        if !deleted.contains(&i) {
            used.insert(i);
        }
    }
    assert_eq!(used.len() + deleted.len(), count as usize);
    assert!(used.is_disjoint(&deleted));
}

#[test]
fn delete_across_preserves_inner_chain_next_pointers() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let area = store.create_area(0).unwrap();
    let (mut sectors, _) = SectorStore::open(store.clone(), area, 64, false).unwrap();
    let buf = vec![7u8; 300]; // spans multiple 59-byte-payload sectors
    let head = sectors.write_across(&buf).unwrap();

    let (status_before, next_before) = sectors.read_sector_header(head).unwrap();
    assert_eq!(status_before, STATUS_USED);

    sectors.delete_across(head).unwrap();
    let (status_after, next_after) = sectors.read_sector_header(head).unwrap();
    assert_eq!(status_after, STATUS_DELETED);
    assert_ne!(next_after, next_before, "head's next is rewritten to the old delete_head");
}

#[test]
fn read_through_a_deleted_sector_is_rejected() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let area = store.create_area(0).unwrap();
    let (mut sectors, _) = SectorStore::open(store.clone(), area, 64, false).unwrap();
    let head = sectors.add_sector(b"hi").unwrap();
    sectors.delete_across(head).unwrap();
    let mut out = [0u8; 2];
    assert!(matches!(sectors.read_across(head, &mut out), Err(Error::ReadThroughDeleted(_))));
}

#[test]
fn lock_prevents_reclamation_of_deleted_sectors() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let area = store.create_area(0).unwrap();
    let (mut sectors, _) = SectorStore::open(store.clone(), area, 64, false).unwrap();
    let id = sectors.add_sector(b"z").unwrap();
    sectors.delete_across(id).unwrap();

    sectors.lock();
    let new_id = sectors.add_sector(b"w").unwrap();
    assert_ne!(new_id, id, "locked store must not reclaim a deleted sector");
    sectors.unlock().unwrap();

    let reclaimed = sectors.add_sector(b"v").unwrap();
    assert_eq!(reclaimed, id, "once unlocked the deleted sector is reused");
}

#[test]
fn unlock_without_a_matching_lock_errors() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let area = store.create_area(0).unwrap();
    let (mut sectors, _) = SectorStore::open(store.clone(), area, 64, false).unwrap();
    assert!(matches!(sectors.unlock(), Err(Error::UnlockUnderflow)));
}

#[test]
fn repair_rebuilds_the_delete_chain_after_a_dirty_open() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let area = store.create_area(0).unwrap();
    let id = {
        let (mut sectors, _) = SectorStore::open(store.clone(), area, 64, false).unwrap();
        let id = sectors.add_sector(b"x").unwrap();
        sectors.delete_across(id).unwrap();
        id
    };

    let (mut sectors, dirty) = SectorStore::open(store.clone(), area, 64, false).unwrap();
    assert!(dirty);
    sectors.repair().unwrap();
    assert_eq!(sectors.delete_head(), id.0);
}

#[test]
fn sector_size_mismatch_is_rejected() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let area = store.create_area(0).unwrap();
    {
        let (_s, _) = SectorStore::open(store.clone(), area, 64, false).unwrap();
    }
    assert!(matches!(
        SectorStore::open(store.clone(), area, 128, false),
        Err(Error::SectorSizeMismatch { .. })
    ));
}

proptest! {
    #[test]
    fn arbitrary_buffers_round_trip(len in 0usize..2000) {
        let store: Arc<dyn Store> = Arc::new(Memory::new());
        let area = store.create_area(0).unwrap();
        let (mut sectors, _) = SectorStore::open(store.clone(), area, 64, false).unwrap();
        let buf: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
        let head = sectors.write_across(&buf).unwrap();
        let mut out = vec![0u8; len];
        sectors.read_across(head, &mut out).unwrap();
        prop_assert_eq!(out, buf);
    }
}
