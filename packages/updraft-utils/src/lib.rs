pub mod http;
pub mod time;
pub mod versioning;

// Re-export main utilities
pub use http::{fetch, fetch_head, fetch_with_progress, http_status_is_ok, ProgressFn, ResponseData};
pub use time::unix_now;
pub use versioning::{compare_versions, extract_version};
