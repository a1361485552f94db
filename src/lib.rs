pub mod config;
pub mod core;
pub mod uploaders;
pub mod utils;

// 重新导出核心类型
pub use self::core::{
    AccountId,
    DataType,
    DispatchOutcome,
    IntakeReport,
    MatchCandidate,
    MatchType,
    RawFile,
    RecordId,
    Result,
    Suggestions,
    UploadError,
    UploadEvent,
    UploadFileRecord,
    UploadManager,
    UploadStatus,
};
pub use config::Config;
pub use uploaders::HttpBackend;

/// Initialize tracing for the CLI, `RUST_LOG` overrides the default `info` level.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
