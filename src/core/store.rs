use std::collections::HashMap;
use std::sync::Arc;
use chrono::Utc;
use tokio::sync::RwLock;
use super::errors::{Result, UploadError};
use super::types::{
    AccountId,
    DataType,
    RecordId,
    RecordPatch,
    Suggestions,
    UploadFileRecord,
    UploadRequest,
    UploadStatus,
};

/// 在 intake、匹配任务和 dispatcher 之间共享的队列
pub type SharedQueue = Arc<RwLock<UploadQueue>>;

/// 匹配结果写回记录的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionApply {
    /// 记录已删除或已经有匹配结果
    Ignored,
    Applied {
        auto_selected: Option<AccountId>,
    },
}

/// 上传队列：按加入顺序保存记录，是界面状态的唯一来源
#[derive(Debug, Default)]
pub struct UploadQueue {
    records: HashMap<RecordId, UploadFileRecord>,
    order: Vec<RecordId>,
}

impl UploadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &RecordId) -> Option<&UploadFileRecord> {
        self.records.get(id)
    }

    /// 按加入顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = &UploadFileRecord> + '_ {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn snapshot(&self) -> Vec<UploadFileRecord> {
        self.iter().cloned().collect()
    }

    pub fn append(&mut self, records: impl IntoIterator<Item = UploadFileRecord>) {
        for record in records {
            let id = record.id;
            if self.records.insert(id, record).is_none() {
                self.order.push(id);
            }
        }
    }

    /// 删除记录，不存在时什么都不做
    pub fn remove(&mut self, id: &RecordId) -> Option<UploadFileRecord> {
        let record = self.records.remove(id)?;
        self.order.retain(|x| x != id);
        Some(record)
    }

    /// 合并部分字段；记录不存在时返回 `Ok(false)`
    pub fn update_field(&mut self, id: &RecordId, patch: RecordPatch) -> Result<bool> {
        let Some(record) = self.records.get_mut(id) else {
            return Ok(false);
        };

        if let Some(to) = patch.status {
            let from = record.status;
            if from != to && !UploadStatus::can_transition(from, to) {
                return Err(UploadError::InvalidTransition { id: *id, from, to });
            }

            record.status = to;
            match to {
                UploadStatus::Uploading => {
                    record.started_at = Some(Utc::now());
                    record.completed_at = None;
                }
                UploadStatus::Completed | UploadStatus::Failed => {
                    record.completed_at = Some(Utc::now());
                }
                UploadStatus::Pending => {}
            }
        }

        if let Some(progress) = patch.progress {
            record.progress = progress.min(100);
        }
        if let Some(data_type) = patch.data_type {
            record.data_type = data_type;
        }
        if let Some(account_id) = patch.selected_account_id {
            record.selected_account_id = Some(account_id);
        }
        if let Some(message) = patch.message {
            record.message = message;
        }

        Ok(true)
    }

    pub fn select_account(&mut self, id: &RecordId, account_id: AccountId) -> Result<()> {
        let record = self.editable(id)?;
        record.selected_account_id = Some(account_id);
        Ok(())
    }

    pub fn select_data_type(&mut self, id: &RecordId, data_type: DataType) -> Result<()> {
        let record = self.editable(id)?;
        record.data_type = data_type;
        Ok(())
    }

    fn editable(&mut self, id: &RecordId) -> Result<&mut UploadFileRecord> {
        let record = self
            .records
            .get_mut(id)
            .ok_or(UploadError::RecordNotFound(*id))?;

        if !record.status.is_editable() {
            return Err(UploadError::RecordLocked { id: *id, status: record.status });
        }

        Ok(record)
    }

    /// 写入匹配结果，每条记录只会写入一次
    ///
    /// 只有仍处于 pending 且用户尚未手动选择账户时才自动选择唯一的 exact 匹配。
    pub fn apply_suggestions(&mut self, id: &RecordId, suggestions: Suggestions) -> SuggestionApply {
        let Some(record) = self.records.get_mut(id) else {
            return SuggestionApply::Ignored;
        };
        if record.suggestions_resolved {
            return SuggestionApply::Ignored;
        }

        let sole_exact = suggestions.sole_exact_match();
        record.detected_username = suggestions.detected_username;
        record.suggested_accounts = suggestions.candidates;
        record.suggestions_resolved = true;

        let auto_selected = match sole_exact {
            Some(account_id)
                if record.status == UploadStatus::Pending && record.selected_account_id.is_none() =>
            {
                record.selected_account_id = Some(account_id);
                Some(account_id)
            }
            _ => None,
        };

        SuggestionApply::Applied { auto_selected }
    }

    /// 校验并切换到 uploading，返回需要发送的请求
    pub fn begin_dispatch(&mut self, id: &RecordId) -> Result<UploadRequest> {
        let record = self
            .records
            .get(id)
            .ok_or(UploadError::RecordNotFound(*id))?;

        let account_id = record
            .selected_account_id
            .ok_or(UploadError::AccountNotSelected(*id))?;

        if !record.status.is_editable() {
            return Err(UploadError::NotDispatchable { id: *id, status: record.status });
        }

        let request = UploadRequest {
            file: record.file.clone(),
            account_id,
            data_type: record.data_type,
        };

        self.update_field(
            id,
            RecordPatch::default()
                .status(UploadStatus::Uploading)
                .progress(0)
                .clear_message(),
        )?;

        Ok(request)
    }

    /// 上传过程中的进度，完成前最多到 99
    pub fn set_progress(&mut self, id: &RecordId, percent: u8) -> bool {
        match self.records.get_mut(id) {
            Some(record) if record.status == UploadStatus::Uploading => {
                record.progress = percent.min(99);
                true
            }
            _ => false,
        }
    }

    /// 可批量上传的记录，按加入顺序
    pub fn eligible_ids(&self) -> Vec<RecordId> {
        self.iter()
            .filter(|record| record.is_eligible())
            .map(|record| record.id)
            .collect()
    }
}
