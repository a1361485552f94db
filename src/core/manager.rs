use std::sync::Arc;
use futures_util::future::join_all;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::info;
use crate::config::Config;
use crate::uploaders::HttpBackend;
use super::dispatcher::{DispatchConfig, DispatchOutcome, UploadDispatcher};
use super::errors::Result;
use super::intake::{FileIntake, IntakeReport};
use super::matcher::AccountMatcher;
use super::store::{SharedQueue, UploadQueue};
use super::traits::{AccountSuggester, CsvUploader};
use super::types::{AccountId, DataType, RawFile, RecordId, UploadEvent, UploadFileRecord, UploadStatus};

/// 上传管理器 - 面向界面/CLI 的入口，组合 intake、匹配、队列和调度
#[derive(Clone)]
pub struct UploadManager {
    queue: SharedQueue,
    intake: FileIntake,
    dispatcher: UploadDispatcher,
    event_tx: broadcast::Sender<UploadEvent>,
    lookups: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl UploadManager {
    pub fn new(
        suggester: Arc<dyn AccountSuggester>,
        uploader: Arc<dyn CsvUploader>,
        max_files: usize,
        default_data_type: DataType,
        dispatch_config: DispatchConfig,
    ) -> Self {
        // 最大缓存 256 个事件
        let (event_tx, _) = broadcast::channel(256);
        let queue: SharedQueue = Arc::new(RwLock::new(UploadQueue::new()));

        let intake = FileIntake::new(max_files, default_data_type, AccountMatcher::new(suggester));
        let dispatcher = UploadDispatcher::new(queue.clone(), uploader, event_tx.clone(), dispatch_config);

        Self {
            queue,
            intake,
            dispatcher,
            event_tx,
            lookups: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 使用 HTTP 后端创建
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = Arc::new(HttpBackend::from_config(config)?);

        Ok(Self::new(
            backend.clone(),
            backend,
            config.max_files,
            config.default_data_type,
            config.dispatch_config(),
        ))
    }

    /// Add files
    pub async fn add_files(&self, files: Vec<RawFile>) -> IntakeReport {
        let (report, handles) = self.intake.add_files(&self.queue, &self.event_tx, files).await;

        let mut lookups = self.lookups.lock().await;
        lookups.retain(|handle| !handle.is_finished());
        lookups.extend(handles);

        report
    }

    /// 等待所有进行中的账户匹配完成
    pub async fn wait_for_matching(&self) {
        let handles: Vec<_> = self.lookups.lock().await.drain(..).collect();
        for result in join_all(handles).await {
            if let Err(err) = result {
                tracing::warn!(error = %err, "account lookup task panicked");
            }
        }
    }

    /// Remove file, no-op when absent
    pub async fn remove_file(&self, id: RecordId) -> bool {
        let removed = self.queue.write().await.remove(&id);
        match removed {
            Some(record) => {
                info!(id = %id, file = %record.file.name, status = %record.status, "file removed");
                let _ = self.event_tx.send(UploadEvent::Removed { id });
                true
            }
            None => false,
        }
    }

    pub async fn select_account(&self, id: RecordId, account_id: AccountId) -> Result<()> {
        self.queue.write().await.select_account(&id, account_id)
    }

    pub async fn select_data_type(&self, id: RecordId, data_type: DataType) -> Result<()> {
        self.queue.write().await.select_data_type(&id, data_type)
    }

    pub async fn upload_one(&self, id: RecordId) -> Result<UploadStatus> {
        self.dispatcher.dispatch(id).await
    }

    pub async fn retry_one(&self, id: RecordId) -> Result<UploadStatus> {
        self.dispatcher.retry_dispatch(id).await
    }

    pub async fn upload_all(&self) -> Vec<DispatchOutcome> {
        self.dispatcher.dispatch_all().await
    }

    /// Get record
    pub async fn record(&self, id: RecordId) -> Option<UploadFileRecord> {
        self.queue.read().await.get(&id).cloned()
    }

    /// Get all records, in queue order
    pub async fn records(&self) -> Vec<UploadFileRecord> {
        self.queue.read().await.snapshot()
    }

    /// 订阅事件
    ///
    /// 注意：
    /// - 如果接收速度跟不上发送速度，可能会丢失事件（lagged error）
    /// - 每个订阅者都会收到完整的事件副本
    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }
}
