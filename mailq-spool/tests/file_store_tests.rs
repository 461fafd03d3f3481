#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::{
    path::PathBuf,
    time::{Duration, SystemTime},
};

use mailq_common::{Message, Priority, ResultCode};
use mailq_spool::{FileQueueStore, LogEntry, QueueStore, SpoolError};
use pretty_assertions::assert_eq;

async fn store() -> (tempfile::TempDir, FileQueueStore) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = FileQueueStore::builder()
        .path(dir.path().join("spool"))
        .build()
        .expect("Failed to build store");
    store.init().await.expect("Failed to init store");
    (dir, store)
}

fn message(subject: &str) -> Message {
    Message::new(
        "sender@example.com",
        ["recipient@example.com"],
        subject,
        b"Subject: test\r\n\r\nHello\r\n".as_slice(),
    )
}

#[test]
fn test_path_validation_rejects_parent_dir() {
    let result = FileQueueStore::builder()
        .path(PathBuf::from("/var/spool/../etc/passwd"))
        .build();

    assert!(result.unwrap_err().to_string().contains("cannot contain '..'"));
}

#[test]
fn test_path_validation_rejects_relative_paths() {
    let result = FileQueueStore::builder()
        .path(PathBuf::from("relative/path"))
        .build();

    assert!(result.unwrap_err().to_string().contains("must be absolute"));
}

#[test]
#[cfg(unix)]
fn test_path_validation_rejects_unix_system_directories() {
    for path in ["/etc/spool", "/bin/messages", "/usr/sbin/mail", "/proc/mail", "/dev/spool"] {
        let result = FileQueueStore::builder().path(path).build();

        assert!(result.is_err(), "Path {path} should be rejected but wasn't");
        assert!(
            result.unwrap_err().to_string().contains("system directory"),
            "Wrong error for path {path}"
        );
    }
}

#[test]
#[cfg(unix)]
fn test_path_validation_accepts_valid_unix_paths() {
    for path in ["/var/spool/mailq", "/home/user/mail", "/tmp/test-spool"] {
        let result = FileQueueStore::builder().path(path).build();
        assert!(result.is_ok(), "Valid path {path} was rejected: {result:?}");
    }
}

#[tokio::test]
async fn init_rejects_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-a-dir");
    std::fs::write(&file, b"").unwrap();

    let store = FileQueueStore::builder().path(&file).build().unwrap();
    assert!(matches!(
        store.init().await,
        Err(SpoolError::Validation(_))
    ));
}

#[tokio::test]
async fn entries_survive_a_new_store_instance() {
    let (dir, store) = store().await;

    let id = store.enqueue(message("persist"), Priority::HIGH).await.unwrap();

    let reopened = FileQueueStore::builder()
        .path(dir.path().join("spool"))
        .build()
        .unwrap();
    reopened.init().await.unwrap();

    let entry = reopened.get(&id).await.unwrap();
    assert_eq!(entry.message.subject, "persist");
    assert_eq!(entry.priority, Priority::HIGH);
    assert_eq!(&*entry.message.body, b"Subject: test\r\n\r\nHello\r\n");
}

#[tokio::test]
async fn deferral_is_persisted() {
    let (_dir, store) = store().await;
    let now = SystemTime::now();

    let id = store.enqueue(message("defer"), Priority::MEDIUM).await.unwrap();
    store
        .mark_deferred(&id, now + Duration::from_secs(300), "connection reset")
        .await
        .unwrap();

    let entry = store.get(&id).await.unwrap();
    assert_eq!(entry.retries, 1);
    assert_eq!(entry.deferred_until, Some(now + Duration::from_secs(300)));
    assert!(store.list_eligible(now, None).await.unwrap().is_empty());

    assert_eq!(store.retry_deferred(None).await.unwrap(), 1);
    assert_eq!(store.list_eligible(now, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn sent_and_failed_transitions() {
    let (_dir, store) = store().await;

    let sent = store.enqueue(message("sent"), Priority::LOW).await.unwrap();
    let failed = store.enqueue(message("failed"), Priority::LOW).await.unwrap();

    store.mark_sent(&sent).await.unwrap();
    assert!(matches!(store.get(&sent).await, Err(SpoolError::NotFound(_))));
    assert!(matches!(store.mark_sent(&sent).await, Err(SpoolError::NotFound(_))));

    store.mark_failed(&failed, "554 rejected").await.unwrap();
    assert!(store.list_all().await.unwrap().is_empty());

    let records = store.list_failed().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error(), Some("554 rejected"));

    store.requeue_failed(&failed).await.unwrap();
    assert!(store.list_failed().await.unwrap().is_empty());
    assert_eq!(store.list_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn ordering_and_limit() {
    let (_dir, store) = store().await;

    let low = store.enqueue(message("low"), Priority::LOW).await.unwrap();
    let high = store.enqueue(message("high"), Priority::HIGH).await.unwrap();
    store.enqueue(message("later low"), Priority::LOW).await.unwrap();

    let ids: Vec<_> = store
        .list_eligible(SystemTime::now() + Duration::from_secs(1), Some(2))
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.id)
        .collect();

    assert_eq!(ids, vec![high, low]);
}

#[tokio::test]
async fn stray_files_are_ignored() {
    let (dir, store) = store().await;
    let queue = dir.path().join("spool").join("queue");

    std::fs::write(queue.join("README"), b"hello").unwrap();
    std::fs::write(queue.join("not-a-ulid.bin"), b"junk").unwrap();
    std::fs::write(queue.join(".tmp_01ARZ3NDEKTSV4RRFFQ69G5FAV.bin"), b"partial").unwrap();

    store.enqueue(message("real"), Priority::MEDIUM).await.unwrap();
    assert_eq!(store.list_all().await.unwrap().len(), 1);

    store.init().await.unwrap();
    assert!(!queue.join(".tmp_01ARZ3NDEKTSV4RRFFQ69G5FAV.bin").exists());
}

#[tokio::test]
async fn delivery_log_round_trip() {
    let (_dir, store) = store().await;
    let id = store.enqueue(message("logged"), Priority::MEDIUM).await.unwrap();
    let entry = store.get(&id).await.unwrap();

    store
        .record_log(LogEntry::new(
            Some(id),
            &entry.message,
            ResultCode::Sent,
            "",
            SystemTime::now(),
        ))
        .await
        .unwrap();

    let logs = store.list_logs().await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message_id, Some(id));
    assert_eq!(logs[0].result, ResultCode::Sent);
}

#[tokio::test]
async fn delivery_log_keeps_attempt_order() {
    let (_dir, store) = store().await;
    let logged_at = SystemTime::now();

    for attempt in 0..64 {
        store
            .record_log(LogEntry::new(
                None,
                &message("burst"),
                ResultCode::Sent,
                format!("attempt {attempt}"),
                logged_at,
            ))
            .await
            .unwrap();
    }

    let details: Vec<_> = store
        .list_logs()
        .await
        .unwrap()
        .into_iter()
        .map(|log| log.detail)
        .collect();
    let expected: Vec<_> = (0..64).map(|attempt| format!("attempt {attempt}")).collect();
    assert_eq!(details, expected);
}
