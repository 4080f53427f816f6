use maestro_sync_core::storage::models::*;
use maestro_sync_core::storage::Database;
use maestro_sync_core::TagSet;

fn candidate(url: &str, hash: Option<&str>, verified: i64) -> CandidateFile {
    CandidateFile {
        url: url.to_string(),
        hash: hash.map(str::to_string),
        verified,
    }
}

#[test]
fn test_known_files_filtered_by_prefix() {
    let db = Database::open_in_memory().unwrap();
    db.insert_known_file("file:///music/a.flac", Some("h1"), 1000)
        .unwrap();
    db.insert_known_file("file:///music/sub/b.flac", None, 0)
        .unwrap();
    db.insert_known_file("file:///music2/c.flac", Some("h3"), 1000)
        .unwrap();

    let files = db.known_files_under("file:///music/").unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.url.starts_with("file:///music/")));

    let a = files
        .iter()
        .find(|f| f.url == "file:///music/a.flac")
        .unwrap();
    assert_eq!(a.hash.as_deref(), Some("h1"));
    assert_eq!(a.verified, 1000);
}

#[test]
fn test_insert_known_file_drops_candidate() {
    let db = Database::open_in_memory().unwrap();
    db.insert_candidates(&[candidate("file:///music/a.flac", Some("h1"), 5)])
        .unwrap();
    assert_eq!(db.candidates_under("file:///music/").unwrap().len(), 1);

    let id = db
        .insert_known_file("file:///music/a.flac", Some("h1"), 5)
        .unwrap();
    assert!(id > 0);
    assert!(db.candidates_under("file:///music/").unwrap().is_empty());
    assert_eq!(db.known_file(id).unwrap().unwrap().url, "file:///music/a.flac");
}

#[test]
fn test_candidate_upsert_and_hash_update() {
    let db = Database::open_in_memory().unwrap();
    let count = db
        .insert_candidates(&[
            candidate("file:///m/a.mp3", None, 0),
            candidate("file:///m/b.mp3", None, 0),
        ])
        .unwrap();
    assert_eq!(count, 2);

    // Re-inserting the same URL updates instead of duplicating
    db.insert_candidates(&[candidate("file:///m/a.mp3", Some("x"), 7)])
        .unwrap();
    let updated = db
        .update_candidate_hashes(&[CandidateHashUpdate {
            url: "file:///m/b.mp3".to_string(),
            hash: Some("y".to_string()),
            verified: 9,
        }])
        .unwrap();
    assert_eq!(updated, 1);

    let mut rows = db.candidates_under("file:///m/").unwrap();
    rows.sort_by(|a, b| a.url.cmp(&b.url));
    assert_eq!(
        rows,
        vec![
            candidate("file:///m/a.mp3", Some("x"), 7),
            candidate("file:///m/b.mp3", Some("y"), 9),
        ]
    );

    let deleted = db
        .delete_candidates(&["file:///m/a.mp3".to_string()])
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(db.candidates_under("file:///m/").unwrap().len(), 1);
}

#[test]
fn test_move_candidate_supersedes_destination() {
    let db = Database::open_in_memory().unwrap();
    db.insert_candidates(&[
        candidate("file:///m/old.mp3", Some("h"), 1),
        candidate("file:///m/new.mp3", Some("other"), 2),
    ])
    .unwrap();

    db.move_candidate("file:///m/old.mp3", "file:///m/new.mp3")
        .unwrap();
    let rows = db.candidates_under("file:///m/").unwrap();
    assert_eq!(rows, vec![candidate("file:///m/new.mp3", Some("h"), 1)]);
}

#[test]
fn test_known_hash_batch_update() {
    let db = Database::open_in_memory().unwrap();
    let a = db.insert_known_file("file:///m/a.ogg", None, 0).unwrap();
    let b = db.insert_known_file("file:///m/b.ogg", None, 0).unwrap();

    let count = db
        .update_known_hashes(&[
            KnownHashUpdate {
                element_id: a,
                hash: Some("ha".to_string()),
                verified: 100,
            },
            KnownHashUpdate {
                element_id: b,
                hash: Some("hb".to_string()),
                verified: 200,
            },
        ])
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(db.known_file(b).unwrap().unwrap().verified, 200);

    db.update_file_url(a, "file:///m/renamed.ogg").unwrap();
    assert_eq!(
        db.known_file(a).unwrap().unwrap().url,
        "file:///m/renamed.ogg"
    );

    assert_eq!(db.file_length(a).unwrap(), None);
    db.update_file_length(a, 215.5).unwrap();
    assert_eq!(db.file_length(a).unwrap(), Some(215.5));
}

#[test]
fn test_shadowed_candidates_are_removed() {
    let db = Database::open_in_memory().unwrap();
    db.insert_known_file("file:///m/a.flac", Some("h"), 1).unwrap();
    // Bypass insert_known_file's cleanup to simulate a stale row
    db.insert_candidates(&[
        candidate("file:///m/a.flac", Some("h"), 1),
        candidate("file:///m/b.flac", None, 0),
    ])
    .unwrap();

    assert_eq!(db.delete_shadowed_candidates("file:///m/").unwrap(), 1);
    let rows = db.candidates_under("file:///m/").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].url, "file:///m/b.flac");
}

#[test]
fn test_tags_round_trip_and_cascade() {
    let db = Database::open_in_memory().unwrap();
    let id = db.insert_known_file("file:///m/a.flac", None, 0).unwrap();

    let mut tags = TagSet::new();
    tags.add("artist", "Bach");
    tags.add("composer", "J. S. Bach");
    tags.add("genre", "Baroque");
    tags.add("genre", "Organ");
    db.set_tags(id, &tags).unwrap();
    assert_eq!(db.get_tags(id).unwrap(), tags);

    let mut replaced = TagSet::new();
    replaced.add("title", "Toccata");
    db.set_tags(id, &replaced).unwrap();
    assert_eq!(db.get_tags(id).unwrap(), replaced);

    db.delete_element(id).unwrap();
    assert!(db.known_file(id).unwrap().is_none());
    assert!(db.get_tags(id).unwrap().is_empty());
}

#[test]
fn test_reopen_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("library.db");
    let path = path.to_str().unwrap();
    {
        let db = Database::open(path).unwrap();
        db.insert_known_file("file:///m/a.flac", Some("h"), 3)
            .unwrap();
    }
    let db = Database::open(path).unwrap();
    assert_eq!(db.known_files_under("file:///m/").unwrap().len(), 1);
}
