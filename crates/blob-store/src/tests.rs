use std::sync::Arc;

use rdbcore_block_store::memory::Memory;
use rdbcore_block_store::Store;

use super::*;

fn new_store(store: &Arc<dyn Store>) -> BlobStore {
    let handles = BlobStore::create(store, 64).unwrap();
    let (blobs, dirty) = BlobStore::open(Arc::clone(store), handles, 64).unwrap();
    assert!(!dirty);
    blobs
}

#[test]
fn allocate_then_get_round_trips_content_and_type_tag() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let mut blobs = new_store(&store);

    let data = b"a payload spanning more than one sector at size 64".to_vec();
    let reference = blobs.allocate(7, &data).unwrap();

    let handle = blobs.get(reference).unwrap();
    assert_eq!(handle.type_tag, 7);
    assert_eq!(handle.data, data);
    assert_eq!(handle.refcount, 0);
}

#[test]
fn fresh_blob_starts_at_refcount_zero_until_established() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let mut blobs = new_store(&store);
    let reference = blobs.allocate(1, b"x").unwrap();
    assert!(blobs.is_zero_referenced(reference).unwrap());

    blobs.establish_reference(reference).unwrap();
    assert!(!blobs.is_zero_referenced(reference).unwrap());
    assert_eq!(blobs.get(reference).unwrap().refcount, 1);
}

#[test]
fn establish_and_release_are_symmetric() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let mut blobs = new_store(&store);
    let reference = blobs.allocate(1, b"row-a").unwrap();

    blobs.establish_reference(reference).unwrap();
    blobs.establish_reference(reference).unwrap();
    assert_eq!(blobs.get(reference).unwrap().refcount, 2);

    let remaining = blobs.release_reference(reference).unwrap();
    assert_eq!(remaining, 1);
    assert!(!blobs.is_zero_referenced(reference).unwrap());

    let remaining = blobs.release_reference(reference).unwrap();
    assert_eq!(remaining, 0);
    assert!(blobs.is_zero_referenced(reference).unwrap());
}

#[test]
fn release_below_zero_errors() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let mut blobs = new_store(&store);
    let reference = blobs.allocate(1, b"x").unwrap();
    assert!(matches!(blobs.release_reference(reference), Err(Error::RefcountUnderflow(_))));
}

#[test]
fn try_reclaim_refuses_while_referenced() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let mut blobs = new_store(&store);
    let reference = blobs.allocate(1, b"still-held").unwrap();
    blobs.establish_reference(reference).unwrap();

    assert!(!blobs.try_reclaim(reference).unwrap());
    // Content is still readable: reclamation did not happen.
    assert_eq!(blobs.get(reference).unwrap().data, b"still-held");
}

#[test]
fn try_reclaim_frees_the_chain_once_unreferenced() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let mut blobs = new_store(&store);
    let reference = blobs.allocate(1, b"to-be-freed").unwrap();
    blobs.establish_reference(reference).unwrap();
    blobs.release_reference(reference).unwrap();

    assert!(blobs.try_reclaim(reference).unwrap());
    assert!(matches!(blobs.get(reference), Err(Error::NotFound(_))));
    // A second reclaim attempt on an already-dead entry is an error, not a
    // silent no-op, since the slot is never reused.
    assert!(matches!(blobs.try_reclaim(reference), Err(Error::NotFound(_))));
}

#[test]
fn reclaimed_record_slot_is_never_reused() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let mut blobs = new_store(&store);
    let first = blobs.allocate(1, b"first").unwrap();
    blobs.release_reference(first).unwrap_err(); // refcount already 0; confirms starting state
    blobs.try_reclaim(first).unwrap();

    let second = blobs.allocate(1, b"second").unwrap();
    assert_ne!(first, second, "a fresh allocation must not land on a reclaimed id");
    assert_eq!(blobs.get(second).unwrap().data, b"second");
}

#[test]
fn many_allocations_grow_the_metadata_index_across_blocks() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let mut blobs = new_store(&store);
    let mut refs = Vec::new();
    for i in 0..100u32 {
        refs.push(blobs.allocate(i, &i.to_be_bytes()).unwrap());
    }
    for (i, reference) in refs.into_iter().enumerate() {
        let handle = blobs.get(reference).unwrap();
        assert_eq!(handle.type_tag, i as u32);
        assert_eq!(handle.data, (i as u32).to_be_bytes());
    }
}

#[test]
fn close_then_reopen_preserves_blob_content() {
    let store: Arc<dyn Store> = Arc::new(Memory::new());
    let handles = BlobStore::create(&store, 64).unwrap();
    let reference = {
        let (mut blobs, _) = BlobStore::open(Arc::clone(&store), handles, 64).unwrap();
        let reference = blobs.allocate(9, b"durable-payload").unwrap();
        blobs.close().unwrap();
        reference
    };

    let (blobs, dirty) = BlobStore::open(Arc::clone(&store), handles, 64).unwrap();
    assert!(!dirty);
    let handle = blobs.get(reference).unwrap();
    assert_eq!(handle.type_tag, 9);
    assert_eq!(handle.data, b"durable-payload");
}
