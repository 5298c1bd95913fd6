//! Cross-module behavior: queue handle lifecycle across rename boundaries,
//! and the crash-safety scenario from SPEC_FULL.md 8.

use mixnode::config::MixAlgorithm;
use mixnode::packet::Packet;
use mixnode::queue::{MixPool, OutgoingQueue, QueueEntry, Tag};
use mixnode::worker::spawn_cleaning_task;

#[test]
fn entry_moves_from_incoming_to_mix_to_outgoing_via_rename() {
    let base = tempfile::tempdir().unwrap();
    let incoming_dir = base.path().join("incoming");
    let mix_dir = base.path().join("mix");

    let entry = QueueEntry::new(Packet(vec![1, 2, 3]));
    entry.persist(&incoming_dir).unwrap();
    assert!(incoming_dir.join(&entry.handle).exists());

    QueueEntry::rename_into(&incoming_dir, &mix_dir, &entry.handle).unwrap();
    assert!(!incoming_dir.join(&entry.handle).exists());
    assert!(mix_dir.join(&entry.handle).exists());

    let pool = MixPool::open(mix_dir.clone(), MixAlgorithm::Timed, 5, 0.6).unwrap();
    assert_eq!(pool.len(), 1);

    // tick() only forgets the entry in memory; the caller moves the file.
    let batch = pool.tick().unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].handle, entry.handle);
    assert!(mix_dir.join(&entry.handle).exists());

    let outgoing_dir = base.path().join("outgoing");
    QueueEntry::rename_into(&mix_dir, &outgoing_dir, &entry.handle).unwrap();
    assert!(!mix_dir.join(&entry.handle).exists());
    assert!(outgoing_dir.join(&entry.handle).exists());
}

/// Scenario 5 (SPEC_FULL.md 8): a crash between mix batch selection and
/// outgoing send must not cause a packet to be emitted twice, and a restart
/// must find it waiting in the outgoing queue.
#[tokio::test]
async fn crash_between_mix_and_outgoing_leaves_entry_in_outgoing_queue() {
    let base = tempfile::tempdir().unwrap();
    let mix_dir = base.path().join("mix");
    let outgoing_dir = base.path().join("outgoing");

    let pool = MixPool::open(mix_dir.clone(), MixAlgorithm::Timed, 0, 1.0).unwrap();
    let mut entry = QueueEntry::new(Packet(vec![9, 9, 9]));
    entry.tag = Some(Tag::Relay);
    entry.destination = Some("next-hop".to_string());
    pool.insert(entry.clone()).unwrap();

    // The mix tick forgets the entry in the pool's memory but leaves its
    // backing file in the mix directory untouched.
    let batch = pool.tick().unwrap();
    assert_eq!(batch.len(), 1);
    assert!(mix_dir.join(&entry.handle).exists());

    // The real handoff is a single atomic rename out of the mix directory,
    // followed by the outgoing queue adopting the (already-moved) file —
    // never a delete-then-recreate. A crash at any point either leaves the
    // file in `mix` (and it's simply re-adopted by the pool on restart) or
    // already in `outgoing`; it is never in neither.
    let cleaning = spawn_cleaning_task();
    let outgoing = OutgoingQueue::open(outgoing_dir.clone(), vec![60], cleaning.sender.clone()).unwrap();
    let moved = batch.into_iter().next().unwrap();
    QueueEntry::rename_into(pool.dir(), outgoing.dir(), &moved.handle).unwrap();
    outgoing.adopt(moved);

    assert_eq!(outgoing.len(), 1);
    assert!(outgoing_dir.join(&entry.handle).exists());
    assert!(!mix_dir.join(&entry.handle).exists(), "no double emission: not still in the mix pool");
}
