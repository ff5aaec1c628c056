use thiserror::Error;

/// Store-layer error type.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
///
/// A denied permission check is not an error; checks return `Ok(false)`.
#[derive(Debug, Error)]
pub enum Error {
    /// Store or policy adapter failure.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    /// Invalid identifier input.
    #[error("invalid id: {0}")]
    InvalidId(String),
    /// Action outside the fixed vocabulary.
    #[error("unknown action: {0}")]
    UnknownAction(String),
    /// Edit operation other than `add` or `remove`.
    #[error("unknown edit operation: {0}")]
    UnknownEditOp(String),
    /// Malformed ACL edit payload.
    #[error("invalid acl payload: {0}")]
    InvalidPayload(String),
    /// Operation refused on a built-in object.
    #[error("{0}")]
    Protected(String),
    /// Object already exists.
    #[error("{kind} {name} already exists")]
    Conflict { kind: &'static str, name: String },
    /// Object does not exist.
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
    /// Actor type may not hold master-scope permissions.
    #[error("{0} is a client and cannot hold master permissions")]
    IneligibleSubject(String),
}

impl Error {
    /// Returns true for errors caused by malformed caller input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidId(_)
                | Self::UnknownAction(_)
                | Self::UnknownEditOp(_)
                | Self::InvalidPayload(_)
                | Self::Protected(_)
        )
    }

    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub(crate) fn conflict(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind,
            name: name.into(),
        }
    }
}

impl From<StoreError> for Error {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

/// Error raised while decoding persisted policy text.
#[derive(Debug, Error)]
#[error("policy line {line}: {reason}")]
pub struct PolicyParseError {
    /// One-based line number.
    pub line: usize,
    /// What was wrong with the line.
    pub reason: String,
}
