use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::Instant;
use super::*;

/// 按文件名返回预设结果的上传器
#[derive(Default)]
struct ScriptedUploader {
    responses: Mutex<HashMap<String, VecDeque<Result<UploadResponse>>>>,
    progress: Mutex<VecDeque<Result<ProgressSnapshot>>>,
    calls: Mutex<Vec<String>>,
    started_at: Mutex<Vec<Instant>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
}

impl ScriptedUploader {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    async fn script(&self, file: &str, response: Result<UploadResponse>) {
        self.responses
            .lock()
            .await
            .entry(file.to_string())
            .or_default()
            .push_back(response);
    }

    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl CsvUploader for ScriptedUploader {
    async fn upload(&self, request: UploadRequest, progress: ProgressSender) -> Result<UploadResponse> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().await.push(request.file.name.clone());
        self.started_at.lock().await.push(Instant::now());

        let _ = progress.send(50);
        tokio::time::sleep(self.delay).await;
        let _ = progress.send(100);

        let response = self
            .responses
            .lock()
            .await
            .get_mut(&request.file.name)
            .and_then(|scripted| scripted.pop_front())
            .unwrap_or_else(|| Ok(ok_response(1, 0)));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }

    async fn upload_progress(&self, _upload_id: &str) -> Result<ProgressSnapshot> {
        self.progress
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(UploadError::internal_error("no progress scripted")))
    }
}

fn ok_response(inserted: u64, duplicates: u64) -> UploadResponse {
    UploadResponse {
        success: true,
        message: "ok".to_string(),
        inserted_count: Some(inserted),
        duplicate_count: Some(duplicates),
        total_records: Some(inserted + duplicates),
        upload_id: None,
    }
}

fn rejected_response(message: &str) -> UploadResponse {
    UploadResponse {
        success: false,
        message: message.to_string(),
        ..Default::default()
    }
}

fn config() -> DispatchConfig {
    DispatchConfig {
        delay: Duration::from_millis(5),
        poll_progress: true,
        poll_interval: Duration::from_millis(5),
        poll_timeout: Duration::from_secs(5),
    }
}

struct Harness {
    queue: SharedQueue,
    dispatcher: UploadDispatcher,
    uploader: Arc<ScriptedUploader>,
    events: broadcast::Receiver<UploadEvent>,
}

fn harness(uploader: ScriptedUploader) -> Harness {
    harness_with(uploader, config())
}

fn harness_with(uploader: ScriptedUploader, config: DispatchConfig) -> Harness {
    let queue: SharedQueue = Arc::new(RwLock::new(UploadQueue::new()));
    let uploader = Arc::new(uploader);
    let (event_tx, events) = broadcast::channel(256);
    let dispatcher = UploadDispatcher::new(queue.clone(), uploader.clone(), event_tx, config);

    Harness {
        queue,
        dispatcher,
        uploader,
        events,
    }
}

async fn enqueue(queue: &SharedQueue, name: &str, account: Option<AccountId>) -> RecordId {
    let record = UploadFileRecord::new(RawFile::new(name, None, "sku,qty\nA,1\n"), DataType::Order);
    let id = record.id;
    let mut queue_guard = queue.write().await;
    queue_guard.append([record]);
    if let Some(account_id) = account {
        queue_guard.select_account(&id, account_id).unwrap();
    }
    id
}

async fn record(queue: &SharedQueue, id: RecordId) -> UploadFileRecord {
    queue.read().await.get(&id).cloned().unwrap()
}

#[tokio::test]
async fn test_dispatch_without_account_is_refused() {
    let h = harness(ScriptedUploader::default());
    let id = enqueue(&h.queue, "orders.csv", None).await;

    let err = h.dispatcher.dispatch(id).await.unwrap_err();

    assert!(matches!(err, UploadError::AccountNotSelected(_)));
    assert!(err.is_refusal());
    assert_eq!(record(&h.queue, id).await.status, UploadStatus::Pending);
    assert!(h.uploader.calls().await.is_empty());
}

#[tokio::test]
async fn test_dispatch_success_completes_record() {
    let h = harness(ScriptedUploader::default());
    let id = enqueue(&h.queue, "orders.csv", Some(7)).await;
    h.uploader.script("orders.csv", Ok(ok_response(12, 3))).await;

    let status = h.dispatcher.dispatch(id).await.unwrap();

    assert_eq!(status, UploadStatus::Completed);
    let r = record(&h.queue, id).await;
    assert_eq!(r.status, UploadStatus::Completed);
    assert_eq!(r.progress, 100);
    assert_eq!(r.message.as_deref(), Some("12 inserted, 3 duplicates skipped (15 records)"));
    assert!(r.completed_at.is_some());
}

#[tokio::test]
async fn test_application_failure_marks_failed() {
    let h = harness(ScriptedUploader::default());
    let id = enqueue(&h.queue, "orders.csv", Some(7)).await;
    h.uploader.script("orders.csv", Ok(rejected_response("Missing column: Order Number"))).await;

    let status = h.dispatcher.dispatch(id).await.unwrap();

    assert_eq!(status, UploadStatus::Failed);
    let r = record(&h.queue, id).await;
    assert_eq!(r.progress, 0);
    assert_eq!(r.message.as_deref(), Some("Missing column: Order Number"));
}

#[tokio::test]
async fn test_transport_failure_marks_failed() {
    let h = harness(ScriptedUploader::default());
    let id = enqueue(&h.queue, "orders.csv", Some(7)).await;
    h.uploader
        .script("orders.csv", Err(UploadError::server_error(503, "unavailable")))
        .await;

    let status = h.dispatcher.dispatch(id).await.unwrap();

    assert_eq!(status, UploadStatus::Failed);
    let message = record(&h.queue, id).await.message.unwrap();
    assert!(message.contains("503"));
    assert!(message.contains("unavailable"));
}

#[tokio::test]
async fn test_retry_after_failure() {
    let mut h = harness(ScriptedUploader::default());
    let id = enqueue(&h.queue, "orders.csv", Some(7)).await;
    h.uploader.script("orders.csv", Ok(rejected_response("busy"))).await;
    h.uploader.script("orders.csv", Ok(ok_response(4, 0))).await;

    assert_eq!(h.dispatcher.dispatch(id).await.unwrap(), UploadStatus::Failed);
    while h.events.try_recv().is_ok() {}

    assert_eq!(h.dispatcher.retry_dispatch(id).await.unwrap(), UploadStatus::Completed);

    let mut transitions = Vec::new();
    while let Ok(event) = h.events.try_recv() {
        if let UploadEvent::StateChanged { from, to, .. } = event {
            transitions.push((from, to));
        }
    }
    assert_eq!(
        transitions,
        vec![
            (UploadStatus::Failed, UploadStatus::Uploading),
            (UploadStatus::Uploading, UploadStatus::Completed),
        ]
    );
    assert_eq!(record(&h.queue, id).await.message.as_deref(), Some("4 inserted, 0 duplicates skipped (4 records)"));
}

#[tokio::test]
async fn test_retry_requires_failed_status() {
    let h = harness(ScriptedUploader::default());
    let id = enqueue(&h.queue, "orders.csv", Some(7)).await;

    let err = h.dispatcher.retry_dispatch(id).await.unwrap_err();
    assert!(matches!(err, UploadError::NotDispatchable { status: UploadStatus::Pending, .. }));

    h.dispatcher.dispatch(id).await.unwrap();
    let err = h.dispatcher.retry_dispatch(id).await.unwrap_err();
    assert!(matches!(err, UploadError::NotDispatchable { status: UploadStatus::Completed, .. }));
    assert_eq!(h.uploader.calls().await.len(), 1);
}

#[tokio::test]
async fn test_dispatch_all_is_sequential() {
    let h = harness(ScriptedUploader::with_delay(Duration::from_millis(20)));
    let mut ids = Vec::new();
    for name in ["a.csv", "b.csv", "c.csv", "d.csv"] {
        ids.push(enqueue(&h.queue, name, Some(1)).await);
    }

    let outcomes = h.dispatcher.dispatch_all().await;

    assert_eq!(outcomes.len(), 4);
    assert_eq!(outcomes.iter().map(|o| o.id).collect::<Vec<_>>(), ids);
    assert_eq!(h.uploader.calls().await, vec!["a.csv", "b.csv", "c.csv", "d.csv"]);
    assert_eq!(h.uploader.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dispatch_all_isolates_failures() {
    let h = harness(ScriptedUploader::default());
    let a = enqueue(&h.queue, "a.csv", Some(1)).await;
    let b = enqueue(&h.queue, "b.csv", Some(1)).await;
    let c = enqueue(&h.queue, "c.csv", Some(1)).await;
    h.uploader.script("b.csv", Err(UploadError::internal_error("connection reset"))).await;

    let outcomes = h.dispatcher.dispatch_all().await;

    let statuses: Vec<_> = outcomes.iter().map(|o| *o.result.as_ref().unwrap()).collect();
    assert_eq!(
        statuses,
        vec![UploadStatus::Completed, UploadStatus::Failed, UploadStatus::Completed]
    );
    assert_eq!(record(&h.queue, a).await.status, UploadStatus::Completed);
    assert_eq!(record(&h.queue, b).await.status, UploadStatus::Failed);
    assert_eq!(record(&h.queue, c).await.status, UploadStatus::Completed);
}

#[tokio::test]
async fn test_dispatch_all_skips_completed_and_unassigned() {
    let h = harness(ScriptedUploader::default());
    let done = enqueue(&h.queue, "done.csv", Some(1)).await;
    let unassigned = enqueue(&h.queue, "unassigned.csv", None).await;
    h.dispatcher.dispatch(done).await.unwrap();
    let done_before = record(&h.queue, done).await;

    let outcomes = h.dispatcher.dispatch_all().await;

    assert!(outcomes.is_empty());
    let done_after = record(&h.queue, done).await;
    assert_eq!(done_after.completed_at, done_before.completed_at);
    assert_eq!(done_after.message, done_before.message);
    assert_eq!(record(&h.queue, unassigned).await.status, UploadStatus::Pending);
    assert_eq!(h.uploader.calls().await, vec!["done.csv"]);
}

#[tokio::test]
async fn test_dispatch_all_retries_failed_records() {
    let h = harness(ScriptedUploader::default());
    let id = enqueue(&h.queue, "a.csv", Some(1)).await;
    h.uploader.script("a.csv", Ok(rejected_response("locked"))).await;
    h.dispatcher.dispatch(id).await.unwrap();

    let outcomes = h.dispatcher.dispatch_all().await;

    assert_eq!(outcomes.len(), 1);
    assert_eq!(record(&h.queue, id).await.status, UploadStatus::Completed);
}

#[tokio::test]
async fn test_single_upload_in_flight_across_calls() {
    let h = harness(ScriptedUploader::with_delay(Duration::from_millis(20)));
    let a = enqueue(&h.queue, "a.csv", Some(1)).await;
    let b = enqueue(&h.queue, "b.csv", Some(1)).await;

    let (ra, rb) = tokio::join!(h.dispatcher.dispatch(a), h.dispatcher.dispatch(b));

    assert_eq!(ra.unwrap(), UploadStatus::Completed);
    assert_eq!(rb.unwrap(), UploadStatus::Completed);
    assert_eq!(h.uploader.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_removed_record_is_not_resurrected() {
    let h = harness(ScriptedUploader::with_delay(Duration::from_millis(50)));
    let id = enqueue(&h.queue, "a.csv", Some(1)).await;

    let dispatcher = h.dispatcher.clone();
    let upload = tokio::spawn(async move { dispatcher.dispatch(id).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(record(&h.queue, id).await.status, UploadStatus::Uploading);
    assert!(h.queue.write().await.remove(&id).is_some());

    let status = upload.await.unwrap().unwrap();
    assert_eq!(status, UploadStatus::Completed);
    assert!(h.queue.read().await.get(&id).is_none());
    assert!(h.queue.read().await.is_empty());
}

#[tokio::test]
async fn test_progress_is_forwarded_while_uploading() {
    let mut h = harness(ScriptedUploader::with_delay(Duration::from_millis(30)));
    let id = enqueue(&h.queue, "a.csv", Some(1)).await;

    let dispatcher = h.dispatcher.clone();
    let upload = tokio::spawn(async move { dispatcher.dispatch(id).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(record(&h.queue, id).await.progress, 50);

    upload.await.unwrap().unwrap();
    assert_eq!(record(&h.queue, id).await.progress, 100);

    let mut percents = Vec::new();
    while let Ok(event) = h.events.try_recv() {
        if let UploadEvent::Progress { percent, .. } = event {
            percents.push(percent);
        }
    }
    assert!(percents.contains(&50));
    assert!(percents.iter().all(|p| *p <= 99));
}

#[tokio::test]
async fn test_polls_server_progress_when_upload_id_present() {
    let h = harness(ScriptedUploader::default());
    let id = enqueue(&h.queue, "a.csv", Some(1)).await;
    h.uploader
        .script(
            "a.csv",
            Ok(UploadResponse {
                success: true,
                message: "queued".to_string(),
                upload_id: Some("up-1".to_string()),
                ..Default::default()
            }),
        )
        .await;
    {
        let mut progress = h.uploader.progress.lock().await;
        progress.push_back(Ok(ProgressSnapshot {
            state: "processing".to_string(),
            message: String::new(),
            progress_percent: 40.0,
        }));
        progress.push_back(Ok(ProgressSnapshot {
            state: "completed".to_string(),
            message: "Imported 40 orders".to_string(),
            progress_percent: 100.0,
        }));
    }

    let status = h.dispatcher.dispatch(id).await.unwrap();

    assert_eq!(status, UploadStatus::Completed);
    let r = record(&h.queue, id).await;
    assert_eq!(r.progress, 100);
    assert_eq!(r.message.as_deref(), Some("Imported 40 orders"));
}

#[tokio::test]
async fn test_failed_server_processing_marks_failed() {
    let h = harness(ScriptedUploader::default());
    let id = enqueue(&h.queue, "a.csv", Some(1)).await;
    h.uploader
        .script(
            "a.csv",
            Ok(UploadResponse {
                success: true,
                upload_id: Some("up-2".to_string()),
                ..Default::default()
            }),
        )
        .await;
    h.uploader.progress.lock().await.push_back(Ok(ProgressSnapshot {
        state: "error".to_string(),
        message: "Row 3: invalid date".to_string(),
        progress_percent: 10.0,
    }));

    let status = h.dispatcher.dispatch(id).await.unwrap();

    assert_eq!(status, UploadStatus::Failed);
    assert_eq!(record(&h.queue, id).await.message.as_deref(), Some("Row 3: invalid date"));
}

fn queued_for_processing(upload_id: &str) -> UploadResponse {
    UploadResponse {
        success: true,
        upload_id: Some(upload_id.to_string()),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_server_processing_timeout_marks_failed() {
    let h = harness_with(
        ScriptedUploader::default(),
        DispatchConfig {
            poll_interval: Duration::from_millis(10),
            poll_timeout: Duration::from_millis(60),
            ..config()
        },
    );
    let id = enqueue(&h.queue, "a.csv", Some(1)).await;
    h.uploader.script("a.csv", Ok(queued_for_processing("up-3"))).await;
    {
        let mut progress = h.uploader.progress.lock().await;
        for _ in 0..100 {
            progress.push_back(Ok(ProgressSnapshot {
                state: "processing".to_string(),
                message: String::new(),
                progress_percent: 30.0,
            }));
        }
    }

    let status = h.dispatcher.dispatch(id).await.unwrap();

    assert_eq!(status, UploadStatus::Failed);
    let r = record(&h.queue, id).await;
    assert_eq!(r.status, UploadStatus::Failed);
    assert_eq!(r.progress, 0);
    assert!(r.message.unwrap_or_default().contains("Timed out"));
    assert!(!h.uploader.progress.lock().await.is_empty());
}

#[tokio::test]
async fn test_progress_lookup_error_marks_failed() {
    let h = harness(ScriptedUploader::default());
    let id = enqueue(&h.queue, "a.csv", Some(1)).await;
    h.uploader.script("a.csv", Ok(queued_for_processing("up-4"))).await;

    let status = h.dispatcher.dispatch(id).await.unwrap();

    assert_eq!(status, UploadStatus::Failed);
    let r = record(&h.queue, id).await;
    assert_eq!(r.progress, 0);
    assert!(r.message.unwrap_or_default().contains("no progress scripted"));
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_all_waits_between_uploads() {
    let delay = Duration::from_millis(500);
    let h = harness_with(ScriptedUploader::default(), DispatchConfig { delay, ..config() });
    enqueue(&h.queue, "a.csv", Some(1)).await;
    enqueue(&h.queue, "b.csv", Some(2)).await;
    enqueue(&h.queue, "c.csv", Some(3)).await;

    let outcomes = h.dispatcher.dispatch_all().await;
    assert_eq!(outcomes.len(), 3);

    let started_at = h.uploader.started_at.lock().await.clone();
    assert_eq!(started_at.len(), 3);
    for pair in started_at.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= delay, "gap {gap:?} shorter than {delay:?}");
        assert!(gap < delay + Duration::from_millis(50), "gap {gap:?}");
    }
}
