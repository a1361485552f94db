use std::sync::Arc;
use tracing::{debug, warn};
use super::traits::AccountSuggester;
use super::types::{RawFile, Suggestions};

/// 匹配查询的结果；失败时降级为空结果，不会阻塞上传
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Resolved(Suggestions),
    Degraded {
        reason: String,
    },
}

impl Lookup {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Lookup::Degraded { .. })
    }

    /// 总是得到可用的匹配结果（降级时为空）
    pub fn into_suggestions(self) -> Suggestions {
        match self {
            Lookup::Resolved(suggestions) => suggestions,
            Lookup::Degraded { .. } => Suggestions::default(),
        }
    }
}

#[derive(Clone)]
pub struct AccountMatcher {
    suggester: Arc<dyn AccountSuggester>,
}

impl AccountMatcher {
    pub fn new(suggester: Arc<dyn AccountSuggester>) -> Self {
        Self { suggester }
    }

    pub async fn suggest(&self, file: &RawFile) -> Lookup {
        match self.suggester.suggest_accounts(file).await {
            Ok(suggestions) => {
                debug!(
                    file = %file.name,
                    candidates = suggestions.candidates.len(),
                    detected = ?suggestions.detected_username,
                    "account suggestions resolved"
                );
                Lookup::Resolved(suggestions)
            }
            Err(err) => {
                warn!(file = %file.name, error = %err, "account suggestion lookup failed");
                Lookup::Degraded {
                    reason: err.to_string(),
                }
            }
        }
    }
}
