//! Event waiting helpers for integration tests

use std::time::Duration;
use tokio::sync::broadcast;

use media_dl::TaskEvent;

/// Default time allowed for a scenario to settle
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(15);

/// Wait for the first event matching `matches`, discarding the rest
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<TaskEvent>,
    matches: impl Fn(&TaskEvent) -> bool,
) -> TaskEvent {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("Event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("Timed out waiting for task event")
}

/// Every event up to and including the next `TaskFinished`
pub async fn events_until_finished(events: &mut broadcast::Receiver<TaskEvent>) -> Vec<TaskEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("Event channel closed");
            let done = matches!(event, TaskEvent::TaskFinished { .. });
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("Timed out waiting for the task to finish");
    seen
}

pub fn finished(event: &TaskEvent, key: &str) -> bool {
    matches!(event, TaskEvent::DownloadFinished { download } if download.id.chapter_key == key)
}

pub fn cancelled(event: &TaskEvent, key: &str) -> bool {
    matches!(event, TaskEvent::DownloadCancelled { download } if download.id.chapter_key == key)
}

/// Highest progress reported for `key` among `events`
pub fn max_progress(events: &[TaskEvent], key: &str) -> Option<(usize, usize)> {
    events
        .iter()
        .filter_map(|e| match e {
            TaskEvent::DownloadProgressChanged { download } if download.id.chapter_key == key => {
                Some((download.progress, download.total))
            }
            _ => None,
        })
        .max()
}
