pub mod http;
pub mod progress_stream;

pub use http::HttpBackend;
