use covenant_store::StoreError;
use covenant_types::ErrorKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuditError>;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("invalid audit event: {0}")]
    InvalidEvent(String),

    #[error("audit chain for {0} is empty")]
    EmptyChain(String),

    #[error("chain store error: {0}")]
    Store(#[from] StoreError),
}

impl AuditError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuditError::InvalidEvent(_) => ErrorKind::Validation,
            AuditError::EmptyChain(_) => ErrorKind::StateViolation,
            AuditError::Store(err) => err.kind(),
        }
    }
}
