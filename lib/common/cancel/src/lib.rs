pub mod future;

use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("task was cancelled")]
    Cancelled,

    #[error("task timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),
}
