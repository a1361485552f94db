use async_trait::async_trait;
use tokio::sync::mpsc;
use super::errors::Result;
use super::types::{ProgressSnapshot, RawFile, Suggestions, UploadRequest, UploadResponse};

/// 发送字节进度（0-100）的通道
pub type ProgressSender = mpsc::UnboundedSender<u8>;

/// 账户匹配服务 - 根据 CSV 内容给出候选账户
#[async_trait]
pub trait AccountSuggester: Send + Sync {
    async fn suggest_accounts(&self, file: &RawFile) -> Result<Suggestions>;
}

/// CSV 上传接口
#[async_trait]
pub trait CsvUploader: Send + Sync {
    /// 上传文件；实现可以通过 `progress` 上报请求体发送进度
    async fn upload(&self, request: UploadRequest, progress: ProgressSender) -> Result<UploadResponse>;

    /// 查询服务端处理进度
    async fn upload_progress(&self, upload_id: &str) -> Result<ProgressSnapshot>;
}
