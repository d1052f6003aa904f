//! Error types for the visibility engine.

use thiserror::Error;

/// Errors surfaced by `get_visibility_status` / `change_visibility`.
///
/// `Superseded` and `VisibilityChanged` are not faults: they tell the caller the
/// request was overtaken and should be re-issued if the value is still wanted.
#[derive(Debug, Error)]
pub enum VisibilityError {
    #[error("request superseded by a newer request for the same node")]
    Superseded,

    #[error("visibility changed while the status was being computed")]
    VisibilityChanged,

    #[error("visibility engine has been disposed")]
    Disposed,

    #[error("change queue is closed")]
    QueueClosed,

    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl VisibilityError {
    /// True for outcomes that only mean "ask again".
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            VisibilityError::Superseded | VisibilityError::VisibilityChanged
        )
    }
}

/// Result type for engine operations
pub type VisibilityResult<T> = Result<T, VisibilityError>;
