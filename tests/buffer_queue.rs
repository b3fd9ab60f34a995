//! Buffer queue FIFO and drain behavior against a real temp directory.

use async_trait::async_trait;
use terralog::storage::{BufferQueue, RecordPublisher, StoreError};

fn open_queue(dir: &tempfile::TempDir) -> BufferQueue {
    BufferQueue::open(dir.path().join("buffer.jsonl"), 10_000).expect("open queue")
}

fn file_lines(dir: &tempfile::TempDir) -> Vec<String> {
    match std::fs::read_to_string(dir.path().join("buffer.jsonl")) {
        Ok(content) => content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.to_string())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Confirms every record.
#[derive(Default)]
struct AcceptAll {
    seen: Vec<String>,
}

#[async_trait]
impl RecordPublisher for AcceptAll {
    async fn publish_record(&mut self, record: &str) -> bool {
        self.seen.push(record.to_string());
        true
    }
}

/// Rejects one specific record, confirming everything before it.
struct RejectAt {
    needle: String,
    seen: Vec<String>,
}

#[async_trait]
impl RecordPublisher for RejectAt {
    async fn publish_record(&mut self, record: &str) -> bool {
        if record == self.needle {
            return false;
        }
        self.seen.push(record.to_string());
        true
    }
}

#[test]
fn appends_preserve_count_and_oldest() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut queue = open_queue(&dir);
    assert_eq!(queue.count(), 0);
    assert_eq!(queue.peek_oldest(), None);

    for i in 0..5 {
        queue.append(&format!("{{\"reading\":{}}}", i)).expect("append");
    }
    assert_eq!(queue.count(), 5);
    assert_eq!(queue.peek_oldest().as_deref(), Some("{\"reading\":0}"));
    // peek does not mutate
    assert_eq!(queue.count(), 5);
}

#[test]
fn pop_removes_exactly_the_head() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut queue = open_queue(&dir);
    queue.append("first").expect("append");
    queue.append("second").expect("append");

    assert!(queue.pop_oldest());
    assert_eq!(queue.count(), 1);
    assert_eq!(queue.peek_oldest().as_deref(), Some("second"));

    assert!(queue.pop_oldest());
    assert_eq!(queue.count(), 0);
    assert_eq!(queue.peek_oldest(), None);
}

#[test]
fn pop_on_empty_is_a_noop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut queue = open_queue(&dir);
    assert!(!queue.pop_oldest());
    assert_eq!(queue.count(), 0);
    // still a no-op after a fill/drain cycle
    queue.append("x").expect("append");
    assert!(queue.pop_oldest());
    assert!(!queue.pop_oldest());
    assert_eq!(queue.count(), 0);
}

#[tokio::test]
async fn drain_delivers_everything_when_publishes_succeed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut queue = open_queue(&dir);
    for name in ["a", "b", "c"] {
        queue.append(name).expect("append");
    }
    let mut publisher = AcceptAll::default();
    let flushed = queue.drain_while(&mut publisher, 10).await;
    assert_eq!(flushed, 3);
    assert_eq!(queue.count(), 0);
    assert_eq!(publisher.seen, vec!["a", "b", "c"]);
    assert!(file_lines(&dir).is_empty());
}

#[tokio::test]
async fn drain_is_bounded_by_batch_size() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut queue = open_queue(&dir);
    for name in ["A", "B", "C"] {
        queue.append(name).expect("append");
    }
    let mut publisher = AcceptAll::default();
    let flushed = queue.drain_while(&mut publisher, 2).await;
    assert_eq!(flushed, 2);
    assert_eq!(queue.count(), 1);
    assert_eq!(queue.peek_oldest().as_deref(), Some("C"));
    assert_eq!(file_lines(&dir), vec!["C"]);
}

#[tokio::test]
async fn drain_failing_on_first_record_changes_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut queue = open_queue(&dir);
    queue.append("A").expect("append");
    queue.append("B").expect("append");

    let mut publisher = RejectAt {
        needle: "A".to_string(),
        seen: Vec::new(),
    };
    let flushed = queue.drain_while(&mut publisher, 10).await;
    assert_eq!(flushed, 0);
    assert_eq!(queue.count(), 2);
    assert_eq!(file_lines(&dir), vec!["A", "B"]);
    assert!(publisher.seen.is_empty());
}

#[tokio::test]
async fn drain_stops_at_first_failure_keeping_suffix_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut queue = open_queue(&dir);
    for name in ["r1", "r2", "r3", "r4", "r5"] {
        queue.append(name).expect("append");
    }
    let mut publisher = RejectAt {
        needle: "r3".to_string(),
        seen: Vec::new(),
    };
    let flushed = queue.drain_while(&mut publisher, 10).await;
    assert_eq!(flushed, 2);
    assert_eq!(publisher.seen, vec!["r1", "r2"]);
    assert_eq!(file_lines(&dir), vec!["r3", "r4", "r5"]);
    assert_eq!(queue.count(), 3);
}

#[tokio::test]
async fn drain_on_empty_queue_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut queue = open_queue(&dir);
    let mut publisher = AcceptAll::default();
    assert_eq!(queue.drain_while(&mut publisher, 10).await, 0);
    assert!(publisher.seen.is_empty());
}

#[test]
fn append_rejects_when_backlog_bound_reached() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut queue = BufferQueue::open(dir.path().join("buffer.jsonl"), 2).expect("open");
    queue.append("one").expect("append");
    queue.append("two").expect("append");
    match queue.append("three") {
        Err(StoreError::CapacityExceeded { backlog }) => assert_eq!(backlog, 2),
        other => panic!("expected capacity rejection, got {:?}", other.err()),
    }
    assert_eq!(queue.count(), 2);
    assert_eq!(file_lines(&dir), vec!["one", "two"]);
}

#[test]
fn reopen_recovers_count_from_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let mut queue = open_queue(&dir);
        for i in 0..4 {
            queue.append(&format!("record-{}", i)).expect("append");
        }
    }
    let queue = open_queue(&dir);
    assert_eq!(queue.count(), 4);
    assert_eq!(queue.peek_oldest().as_deref(), Some("record-0"));
}
