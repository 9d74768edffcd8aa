use chrono::{Duration, TimeZone, Utc};
use facepunch_core::PunchType;
use facepunch_store::{AttendanceStore, ManualClock, NewIdentity, ReferenceVault, SqliteStore};
use image::{Rgb, RgbImage};
use std::path::Path;
use std::sync::Arc;
use tempfile::{tempdir, NamedTempFile};

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()))
}

fn created(outcome: NewIdentity) -> i64 {
    match outcome {
        NewIdentity::Created(id) => id,
        NewIdentity::NameTaken => panic!("unexpected name collision"),
    }
}

#[test]
fn identities_and_punches_survive_reopen() {
    let tf = NamedTempFile::new().unwrap();
    let clock = clock();

    let id = {
        let store = SqliteStore::open_with_clock(tf.path(), clock.clone()).unwrap();
        let id = created(store.create_identity("alice", Path::new("/faces/alice.png")).unwrap());
        assert_eq!(store.punch(id, 0.8).unwrap().punch_type, PunchType::Entry);
        id
    };

    clock.advance(Duration::minutes(30));
    let store = SqliteStore::open_with_clock(tf.path(), clock.clone()).unwrap();
    assert_eq!(store.list_identities().unwrap(), vec![(id, "alice".to_string())]);
    assert_eq!(store.punch(id, 0.8).unwrap().punch_type, PunchType::Exit);
    assert_eq!(
        store.create_identity("alice", Path::new("/faces/x.png")).unwrap(),
        NewIdentity::NameTaken
    );
}

#[test]
fn concurrent_punches_alternate_in_process() {
    let clock = clock();
    let store = Arc::new(SqliteStore::open_in_memory(clock).unwrap());
    let id = created(store.create_identity("alice", Path::new("/faces/alice.png")).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.punch(id, 0.9).unwrap())
        })
        .collect();
    let mut records: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    records.sort_by_key(|r| r.id);

    let entries = records.iter().filter(|r| r.punch_type == PunchType::Entry).count();
    assert_eq!(entries, 4);
    for (i, record) in records.iter().enumerate() {
        let want = if i % 2 == 0 { PunchType::Entry } else { PunchType::Exit };
        assert_eq!(record.punch_type, want, "record #{i}");
    }
}

#[test]
fn concurrent_punches_alternate_across_connections() {
    let tf = NamedTempFile::new().unwrap();
    let clock = clock();
    let first = Arc::new(SqliteStore::open_with_clock(tf.path(), clock.clone()).unwrap());
    let second = Arc::new(SqliteStore::open_with_clock(tf.path(), clock.clone()).unwrap());
    let id = created(first.create_identity("bob", Path::new("/faces/bob.png")).unwrap());

    let handles: Vec<_> = [first.clone(), second.clone()]
        .into_iter()
        .map(|store| std::thread::spawn(move || (0..10).for_each(|_| {
            store.punch(id, 0.5).unwrap();
        })))
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let todays = first.todays_punches(id).unwrap();
    assert_eq!(todays.len(), 20);
    // most recent first, so the oldest punch is last
    for (i, punch) in todays.iter().rev().enumerate() {
        let want = if i % 2 == 0 { PunchType::Entry } else { PunchType::Exit };
        assert_eq!(punch.punch_type, want, "punch #{i}");
    }
}

#[test]
fn vault_saves_fresh_files_and_discards() {
    let dir = tempdir().unwrap();
    let vault = ReferenceVault::open(dir.path().join("faces")).unwrap();
    let image = RgbImage::from_pixel(6, 4, Rgb([10, 200, 30]));

    let a = vault.save("alice", &image).unwrap();
    let b = vault.save("alice", &image).unwrap();
    assert_ne!(a, b);
    assert!(a.starts_with(vault.dir()));
    assert!(a.file_name().unwrap().to_string_lossy().starts_with("alice_"));

    let loaded = image::open(&a).unwrap().to_rgb8();
    assert_eq!(loaded, image);

    vault.discard(&b);
    assert!(!b.exists());
    assert!(a.exists());

    // no temp files left behind
    let leftovers = std::fs::read_dir(vault.dir())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}
