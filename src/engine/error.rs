use crate::model::Span;
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Span),
    InvalidSpan(Span),
    LimitExceeded(&'static str),
    /// Planning produced overlapping results. Nothing was written.
    Invariant(String),
    Store(StoreError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(span) => write!(f, "no interval at {span}"),
            EngineError::InvalidSpan(span) => {
                write!(f, "invalid interval {span}: \"from\" must not be after \"to\"")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Invariant(msg) => write!(f, "internal invariant violated: {msg}"),
            EngineError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        EngineError::Store(e)
    }
}
