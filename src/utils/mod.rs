pub mod format;
pub mod sequence;

pub use format::{format_bytes, format_duration};
pub use sequence::run_sequential;
