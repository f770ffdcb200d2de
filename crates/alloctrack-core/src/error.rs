use thiserror::Error;

/// Canonical result for the tracker.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// `delta`/`max_delta`/`snapshot` on a thread that never called `start`.
    #[error("allocation tracker has not been started on this thread")]
    NotStarted,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The live allocation count of a `limit` scope stayed above its threshold
    /// after a forced recount, or the scope was aborted through its handle.
    #[error("allocation limit exceeded: {live} live allocations, threshold {threshold}")]
    LimitExceeded { threshold: u64, live: i64 },

    #[error("limit scopes nested deeper than {max}")]
    NestingTooDeep { max: usize },

    #[error("allocation event source already has a subscriber")]
    AlreadySubscribed,
}

impl Error {
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Error::LimitExceeded { .. })
    }
}
