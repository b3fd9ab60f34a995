//! Archive log date partitioning.

use terralog::storage::archive::{ArchiveLog, FALLBACK_PARTITION};

fn lines(path: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|c| c.lines().map(|l| l.to_string()).collect())
        .unwrap_or_default()
}

#[test]
fn appends_go_to_the_partition_for_their_date() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive = ArchiveLog::new(dir.path().join("archive")).expect("archive");

    archive.append("2026-03-15", "{\"reading\":1}").expect("append");
    archive.append("2026-03-15", "{\"reading\":2}").expect("append");
    archive.append("2026-03-16", "{\"reading\":3}").expect("append");

    let day1 = dir.path().join("archive/2026-03-15.jsonl");
    let day2 = dir.path().join("archive/2026-03-16.jsonl");
    assert_eq!(lines(&day1), vec!["{\"reading\":1}", "{\"reading\":2}"]);
    assert_eq!(lines(&day2), vec!["{\"reading\":3}"]);
    assert_eq!(archive.partition_count(), 2);
}

#[test]
fn unsynced_clock_writes_to_the_fallback_partition() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive = ArchiveLog::new(dir.path().join("archive")).expect("archive");

    archive
        .append(FALLBACK_PARTITION, "{\"reading\":9}")
        .expect("append");

    let fallback = dir.path().join("archive/unknown.jsonl");
    assert_eq!(lines(&fallback), vec!["{\"reading\":9}"]);
}

#[test]
fn archive_is_append_only_across_reopens() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("archive");
    {
        let archive = ArchiveLog::new(&path).expect("archive");
        archive.append("2026-03-15", "first").expect("append");
    }
    {
        let archive = ArchiveLog::new(&path).expect("archive");
        archive.append("2026-03-15", "second").expect("append");
    }
    let day = dir.path().join("archive/2026-03-15.jsonl");
    assert_eq!(lines(&day), vec!["first", "second"]);
}
