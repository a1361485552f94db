use std::fmt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use super::matcher::AccountMatcher;
use super::store::{SharedQueue, SuggestionApply};
use super::types::{DataType, RawFile, RecordId, UploadEvent, UploadFileRecord};

/// 文件被拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotCsv,
    QueueFull,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NotCsv => f.write_str("not a CSV file"),
            RejectReason::QueueFull => f.write_str("upload queue is full"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedFile {
    pub name: String,
    pub reason: RejectReason,
}

/// 一次 add_files 的结果
#[derive(Debug, Clone, Default)]
pub struct IntakeReport {
    /// 新加入的记录（pending，匹配结果尚未写入）
    pub accepted: Vec<UploadFileRecord>,
    pub rejected: Vec<RejectedFile>,
}

impl IntakeReport {
    pub fn ids(&self) -> Vec<RecordId> {
        self.accepted.iter().map(|record| record.id).collect()
    }
}

/// 接收文件：过滤非 CSV，按队列容量截断，并为每个文件启动账户匹配
#[derive(Clone)]
pub struct FileIntake {
    max_files: usize,
    default_data_type: DataType,
    matcher: AccountMatcher,
}

impl FileIntake {
    pub fn new(max_files: usize, default_data_type: DataType, matcher: AccountMatcher) -> Self {
        Self {
            max_files,
            default_data_type,
            matcher,
        }
    }

    /// 纯筛选：不接触队列，`queued` 为当前队列长度
    pub fn admit(&self, queued: usize, files: Vec<RawFile>) -> (Vec<UploadFileRecord>, Vec<RejectedFile>) {
        let mut capacity = self.max_files.saturating_sub(queued);
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for file in files {
            if !file.is_csv() {
                rejected.push(RejectedFile { name: file.name, reason: RejectReason::NotCsv });
                continue;
            }
            if capacity == 0 {
                rejected.push(RejectedFile { name: file.name, reason: RejectReason::QueueFull });
                continue;
            }

            capacity -= 1;
            accepted.push(UploadFileRecord::new(file, self.default_data_type));
        }

        (accepted, rejected)
    }

    /// 加入队列并在后台并发查询匹配账户
    pub async fn add_files(
        &self,
        queue: &SharedQueue,
        events: &broadcast::Sender<UploadEvent>,
        files: Vec<RawFile>,
    ) -> (IntakeReport, Vec<JoinHandle<()>>) {
        let (accepted, rejected) = {
            let mut queue_guard = queue.write().await;
            let (accepted, rejected) = self.admit(queue_guard.len(), files);
            queue_guard.append(accepted.iter().cloned());
            (accepted, rejected)
        };

        for file in &rejected {
            warn!(file = %file.name, reason = %file.reason, "file rejected at intake");
        }

        let mut lookups = Vec::with_capacity(accepted.len());
        for record in &accepted {
            info!(id = %record.id, file = %record.file.name, size = record.file.size(), "file queued");
            let _ = events.send(UploadEvent::FileAdded { id: record.id });

            lookups.push(tokio::spawn(resolve_suggestions(
                self.matcher.clone(),
                queue.clone(),
                events.clone(),
                record.id,
                record.file.clone(),
            )));
        }

        (IntakeReport { accepted, rejected }, lookups)
    }
}

async fn resolve_suggestions(
    matcher: AccountMatcher,
    queue: SharedQueue,
    events: broadcast::Sender<UploadEvent>,
    id: RecordId,
    file: RawFile,
) {
    let lookup = matcher.suggest(&file).await;
    if lookup.is_degraded() {
        info!(id = %id, file = %file.name, "no account suggestions, account must be selected manually");
    }
    let suggestions = lookup.into_suggestions();

    let applied = queue.write().await.apply_suggestions(&id, suggestions);
    match applied {
        SuggestionApply::Applied { auto_selected } => {
            if let Some(account_id) = auto_selected {
                info!(id = %id, account_id, "account auto-selected from exact match");
            }
            let _ = events.send(UploadEvent::SuggestionsResolved { id, auto_selected });
        }
        SuggestionApply::Ignored => {
            tracing::debug!(id = %id, "suggestions arrived for removed record");
        }
    }
}
