mod pools;
mod retry;

pub use pools::{client_for, ProxyEntry, ProxyPool, UserAgentPool};
pub use retry::{with_rotation, RetryPolicy};

use std::time::Duration;

/// wall-clock timeout for metadata-sized requests.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
/// wall-clock timeout for image downloads.
pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(10);
