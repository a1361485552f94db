use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use crate::utils::run_sequential;
use super::errors::{Result, UploadError};
use super::store::SharedQueue;
use super::traits::CsvUploader;
use super::types::{RecordId, RecordPatch, UploadEvent, UploadResponse, UploadStatus};

/// 上传返回后等待进度转发任务结束的最长时间
const FORWARDER_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// dispatch_all 中相邻两次上传之间的间隔
    pub delay: Duration,
    /// 响应带 upload_id 时是否轮询服务端处理进度
    pub poll_progress: bool,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(500),
            poll_progress: true,
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(600),
        }
    }
}

/// dispatch_all 中单个记录的结果
#[derive(Debug)]
pub struct DispatchOutcome {
    pub id: RecordId,
    pub result: Result<UploadStatus>,
}

/// 上传调度：每次只有一个上传在进行
#[derive(Clone)]
pub struct UploadDispatcher {
    queue: SharedQueue,
    uploader: Arc<dyn CsvUploader>,
    events: broadcast::Sender<UploadEvent>,
    config: DispatchConfig,
    in_flight: Arc<Semaphore>,
}

impl UploadDispatcher {
    pub fn new(
        queue: SharedQueue,
        uploader: Arc<dyn CsvUploader>,
        events: broadcast::Sender<UploadEvent>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            queue,
            uploader,
            events,
            config,
            in_flight: Arc::new(Semaphore::new(1)),
        }
    }

    /// 上传单个记录
    ///
    /// 只有调用被拒绝（记录不存在、未选择账户、状态不对）时返回 `Err`，
    /// 上传失败会写入记录并返回 `Ok(UploadStatus::Failed)`。
    pub async fn dispatch(&self, id: RecordId) -> Result<UploadStatus> {
        self.run(id, false).await
    }

    /// 重试失败的记录
    pub async fn retry_dispatch(&self, id: RecordId) -> Result<UploadStatus> {
        self.run(id, true).await
    }

    /// 依次上传所有可上传的记录，单个失败不会中断后续上传
    pub async fn dispatch_all(&self) -> Vec<DispatchOutcome> {
        let ids = self.queue.read().await.eligible_ids();
        info!(count = ids.len(), "dispatching queued files");

        let tasks = ids.into_iter().map(|id| move || async move {
            DispatchOutcome {
                id,
                result: self.dispatch(id).await,
            }
        });

        let outcomes = run_sequential(tasks, self.config.delay).await;

        let completed = outcomes
            .iter()
            .filter(|outcome| matches!(outcome.result, Ok(UploadStatus::Completed)))
            .count();
        info!(total = outcomes.len(), completed, "dispatch finished");

        outcomes
    }

    async fn run(&self, id: RecordId, retry_only: bool) -> Result<UploadStatus> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| UploadError::internal_error("Dispatcher closed"))?;

        let (request, from) = {
            let mut queue_guard = self.queue.write().await;
            let from = queue_guard
                .get(&id)
                .map(|record| record.status)
                .ok_or(UploadError::RecordNotFound(id))?;

            if retry_only && from != UploadStatus::Failed {
                return Err(UploadError::NotDispatchable { id, status: from });
            }

            (queue_guard.begin_dispatch(&id)?, from)
        };
        self.emit_state_change(id, from, UploadStatus::Uploading);

        info!(
            id = %id,
            file = %request.file.name,
            account_id = request.account_id,
            data_type = %request.data_type,
            "upload started"
        );

        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let forwarder = tokio::spawn(forward_progress(
            self.queue.clone(),
            self.events.clone(),
            id,
            progress_rx,
        ));
        let forwarder_abort = forwarder.abort_handle();

        let result = self.uploader.upload(request, progress_tx).await;

        if timeout(FORWARDER_GRACE, forwarder).await.is_err() {
            forwarder_abort.abort();
        }

        let patch = match result {
            Ok(response) if response.success => match response.upload_id.clone() {
                Some(upload_id) if self.config.poll_progress => {
                    self.await_processing(id, &upload_id, &response).await
                }
                _ => completed(response.summary()),
            },
            Ok(response) => {
                let message = if response.message.is_empty() {
                    "Upload rejected by server".to_string()
                } else {
                    response.message
                };
                failed(message)
            }
            Err(err) => failed(err.to_string()),
        };

        Ok(self.finish(id, patch).await)
    }

    /// 轮询服务端处理进度直到完成、失败或超时
    async fn await_processing(&self, id: RecordId, upload_id: &str, response: &UploadResponse) -> RecordPatch {
        let poll = async {
            loop {
                sleep(self.config.poll_interval).await;

                match self.uploader.upload_progress(upload_id).await {
                    Ok(snapshot) if snapshot.is_completed() => {
                        let message = if snapshot.message.is_empty() {
                            response.summary()
                        } else {
                            snapshot.message
                        };
                        return completed(message);
                    }
                    Ok(snapshot) if snapshot.is_failed() => {
                        if snapshot.message.is_empty() {
                            return failed("Server failed to process the upload");
                        }
                        return failed(snapshot.message);
                    }
                    Ok(snapshot) => {
                        let percent = snapshot.percent();
                        if self.queue.write().await.set_progress(&id, percent) {
                            let _ = self.events.send(UploadEvent::Progress { id, percent: percent.min(99) });
                        }
                    }
                    Err(err) => return failed(err.to_string()),
                }
            }
        };

        match timeout(self.config.poll_timeout, poll).await {
            Ok(patch) => patch,
            Err(_) => failed("Timed out waiting for the server to process the upload"),
        }
    }

    /// 写入终态；记录在上传过程中被删除时什么都不做
    async fn finish(&self, id: RecordId, patch: RecordPatch) -> UploadStatus {
        let to = patch.status.unwrap_or(UploadStatus::Failed);
        let message = patch.message.clone().flatten();

        let updated = self.queue.write().await.update_field(&id, patch);
        match updated {
            Ok(true) => {
                match to {
                    UploadStatus::Completed => info!(id = %id, message = ?message, "upload completed"),
                    _ => warn!(id = %id, message = ?message, "upload failed"),
                }
                self.emit_state_change(id, UploadStatus::Uploading, to);
            }
            Ok(false) => {
                debug!(id = %id, "record removed during upload, result dropped");
            }
            Err(err) => {
                warn!(id = %id, error = %err, "failed to record upload result");
            }
        }

        to
    }

    fn emit_state_change(&self, id: RecordId, from: UploadStatus, to: UploadStatus) {
        let _ = self.events.send(UploadEvent::StateChanged { id, from, to });
    }
}

async fn forward_progress(
    queue: SharedQueue,
    events: broadcast::Sender<UploadEvent>,
    id: RecordId,
    mut progress_rx: mpsc::UnboundedReceiver<u8>,
) {
    while let Some(percent) = progress_rx.recv().await {
        if queue.write().await.set_progress(&id, percent) {
            let _ = events.send(UploadEvent::Progress { id, percent: percent.min(99) });
        }
    }
}

fn completed(message: impl Into<String>) -> RecordPatch {
    RecordPatch::default()
        .status(UploadStatus::Completed)
        .progress(100)
        .message(message)
}

fn failed(message: impl Into<String>) -> RecordPatch {
    RecordPatch::default()
        .status(UploadStatus::Failed)
        .progress(0)
        .message(message)
}
