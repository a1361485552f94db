mod dispatcher;
mod errors;
mod intake;
mod manager;
mod matcher;
mod store;
mod traits;
pub mod types;

pub use dispatcher::{DispatchConfig, DispatchOutcome, UploadDispatcher};
pub use errors::{Result, UploadError};
pub use intake::{FileIntake, IntakeReport, RejectReason, RejectedFile};
pub use manager::UploadManager;
pub use matcher::{AccountMatcher, Lookup};
pub use store::{SharedQueue, SuggestionApply, UploadQueue};
pub use traits::{AccountSuggester, CsvUploader, ProgressSender};
pub use types::{
    AccountId,
    DataType,
    MatchCandidate,
    MatchType,
    ProgressSnapshot,
    RawFile,
    RecordId,
    RecordPatch,
    Suggestions,
    UploadEvent,
    UploadFileRecord,
    UploadRequest,
    UploadResponse,
    UploadStatus,
};

#[cfg(test)]
mod tests;
