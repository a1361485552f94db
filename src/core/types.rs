use std::fmt;
use std::path::Path;
use std::str::FromStr;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use super::errors::{Result, UploadError};

/// 后台账户 ID
pub type AccountId = i64;

/// 队列记录唯一标识，生成后不会改变，也不会被复用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 上传状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// 等待上传
    Pending,
    /// 上传中
    Uploading,
    /// 已完成（终态）
    Completed,
    /// 失败，可重试
    Failed,
}

impl UploadStatus {
    pub fn can_transition(from: UploadStatus, to: UploadStatus) -> bool {
        use UploadStatus::*;

        matches!(
            (from, to),
            (Pending, Uploading) | (Failed, Uploading) | (Uploading, Completed) | (Uploading, Failed)
        )
    }

    /// 是否允许修改账户或数据类型
    pub fn is_editable(self) -> bool {
        matches!(self, UploadStatus::Pending | UploadStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CSV 的数据类型，只由用户选择或使用默认值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    Order,
    Listing,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Order => "order",
            DataType::Listing => "listing",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "order" | "orders" => Ok(DataType::Order),
            "listing" | "listings" => Ok(DataType::Listing),
            other => Err(UploadError::Config(format!("Unknown data type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Partial,
}

/// 匹配服务返回的候选账户
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MatchCandidate {
    #[serde(rename = "id")]
    pub account_id: AccountId,
    #[serde(rename = "name")]
    pub account_name: String,
    pub match_type: MatchType,
}

/// 账户匹配结果，顺序与服务返回一致
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Suggestions {
    #[serde(default)]
    pub detected_username: Option<String>,
    #[serde(default, rename = "suggested_accounts")]
    pub candidates: Vec<MatchCandidate>,
}

impl Suggestions {
    /// 仅当恰好有一个 exact 匹配时返回其账户
    pub fn sole_exact_match(&self) -> Option<AccountId> {
        let mut exact = self
            .candidates
            .iter()
            .filter(|candidate| candidate.match_type == MatchType::Exact);

        match (exact.next(), exact.next()) {
            (Some(only), None) => Some(only.account_id),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

const CSV_CONTENT_TYPES: &[&str] = &[
    "text/csv",
    "application/csv",
    "text/comma-separated-values",
    "application/vnd.ms-excel",
];

/// 待上传的原始文件
#[derive(Debug, Clone)]
pub struct RawFile {
    pub name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl RawFile {
    pub fn new(name: impl Into<String>, content_type: Option<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content_type,
            data: data.into(),
        }
    }

    /// 从磁盘读取文件，按扩展名推断 content type
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| UploadError::Internal(format!("Invalid file name: {}", path.display())))?
            .to_string();

        let data = tokio::fs::read(path).await?;
        let content_type = has_csv_extension(&name).then(|| "text/csv".to_string());

        Ok(Self::new(name, content_type, data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_csv(&self) -> bool {
        let by_type = self
            .content_type
            .as_deref()
            .map(|content_type| {
                let essence = content_type.split(';').next().unwrap_or_default().trim();
                CSV_CONTENT_TYPES
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(essence))
            })
            .unwrap_or(false);

        by_type || has_csv_extension(&self.name)
    }
}

fn has_csv_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}

/// 队列中的单个文件记录
#[derive(Debug, Clone)]
pub struct UploadFileRecord {
    pub id: RecordId,
    pub file: RawFile,
    pub status: UploadStatus,
    /// 0-100，仅在 uploading 时有意义
    pub progress: u8,
    pub data_type: DataType,
    pub detected_username: Option<String>,
    pub suggested_accounts: Vec<MatchCandidate>,
    /// 匹配服务是否已经返回
    pub suggestions_resolved: bool,
    pub selected_account_id: Option<AccountId>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadFileRecord {
    pub fn new(file: RawFile, data_type: DataType) -> Self {
        Self {
            id: RecordId::new(),
            file,
            status: UploadStatus::Pending,
            progress: 0,
            data_type,
            detected_username: None,
            suggested_accounts: Vec::new(),
            suggestions_resolved: false,
            selected_account_id: None,
            message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 可被 dispatch_all 选中：pending/failed 且已选择账户
    pub fn is_eligible(&self) -> bool {
        self.status.is_editable() && self.selected_account_id.is_some()
    }
}

/// 部分字段更新，只合并 Some 的字段
///
/// `message` 使用双层 Option：`Some(None)` 表示清空。
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub status: Option<UploadStatus>,
    pub progress: Option<u8>,
    pub data_type: Option<DataType>,
    pub selected_account_id: Option<AccountId>,
    pub message: Option<Option<String>>,
}

impl RecordPatch {
    pub fn status(mut self, status: UploadStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(Some(message.into()));
        self
    }

    pub fn clear_message(mut self) -> Self {
        self.message = Some(None);
        self
    }
}

/// 发往上传接口的请求
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: RawFile,
    pub account_id: AccountId,
    pub data_type: DataType,
}

/// 上传接口的响应
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub inserted_count: Option<u64>,
    #[serde(default)]
    pub duplicate_count: Option<u64>,
    #[serde(default)]
    pub total_records: Option<u64>,
    #[serde(default)]
    pub upload_id: Option<String>,
}

impl UploadResponse {
    /// 成功时展示给用户的摘要
    pub fn summary(&self) -> String {
        match (self.inserted_count, self.duplicate_count) {
            (Some(inserted), duplicates) => {
                let duplicates = duplicates.unwrap_or(0);
                let total = self.total_records.unwrap_or(inserted + duplicates);
                format!(
                    "{} inserted, {} duplicates skipped ({} records)",
                    inserted, duplicates, total
                )
            }
            (None, _) if !self.message.is_empty() => self.message.clone(),
            (None, _) => "Upload completed".to_string(),
        }
    }
}

/// 服务端处理进度（带 upload_id 的上传）
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProgressSnapshot {
    pub state: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub progress_percent: f64,
}

impl ProgressSnapshot {
    pub fn is_completed(&self) -> bool {
        self.state.eq_ignore_ascii_case("completed")
    }

    pub fn is_failed(&self) -> bool {
        self.state.eq_ignore_ascii_case("failed") || self.state.eq_ignore_ascii_case("error")
    }

    pub fn percent(&self) -> u8 {
        self.progress_percent.clamp(0.0, 100.0) as u8
    }
}

/// 队列事件
#[derive(Debug, Clone)]
pub enum UploadEvent {
    FileAdded {
        id: RecordId,
    },
    SuggestionsResolved {
        id: RecordId,
        auto_selected: Option<AccountId>,
    },
    StateChanged {
        id: RecordId,
        from: UploadStatus,
        to: UploadStatus,
    },
    Progress {
        id: RecordId,
        percent: u8,
    },
    Removed {
        id: RecordId,
    },
}

// 静态断言确保类型是 Send 的
const _: () = {
    #[allow(dead_code)]
    fn assert_send<T: Send>() {}
    #[allow(dead_code)]
    fn assert_types() {
        assert_send::<UploadFileRecord>();
        assert_send::<UploadEvent>();
        assert_send::<UploadRequest>();
    }
};
