use crate::condition::ConditionError;
use crate::store::StoreError;
use crate::subscription::SubscriptionError;

/// Errors returned by the workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid identifier: {0}")]
    InvalidText(#[from] xdw_types::TextError),
    #[error("no workflow definition registered for pathway {0}")]
    MissingDefinition(String),
    #[error("no XDS metadata registered for pathway {0}")]
    MissingMetadata(String),
    #[error("no current workflow for pathway {pathway} and patient {patient}")]
    WorkflowNotFound { pathway: String, patient: String },
    #[error("{count} current workflows for pathway {pathway} and patient {patient}")]
    AmbiguousWorkflow {
        pathway: String,
        patient: String,
        count: usize,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("XDW error: {0}")]
    Xdw(#[from] xdw::XdwError),
    #[error("condition error: {0}")]
    Condition(#[from] ConditionError),
}

/// Failure classes surfaced to callers.
///
/// Configuration errors are raised before any write. Store errors abort the operation and leave
/// previously persisted state untouched, so the whole operation can be retried. Data errors come
/// from content that cannot be interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Store,
    Data,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidInput(_)
            | CoreError::InvalidText(_)
            | CoreError::MissingDefinition(_)
            | CoreError::MissingMetadata(_)
            | CoreError::WorkflowNotFound { .. }
            | CoreError::Xdw(xdw::XdwError::InvalidInput(_)) => ErrorKind::Configuration,
            CoreError::Store(_)
            | CoreError::Subscription(_)
            | CoreError::AmbiguousWorkflow { .. } => ErrorKind::Store,
            CoreError::Xdw(_) | CoreError::Condition(_) => ErrorKind::Data,
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
