//! Error taxonomy shared by every engine component

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },
    #[error("participant {user_id} has already applied to ticket {ticket_id}")]
    AlreadyApplied { ticket_id: u64, user_id: String },
    #[error("participant {user_id} has already been credited for ticket {ticket_id}")]
    DuplicateAward { user_id: String, ticket_id: u64 },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("index {index} references {id} but no record exists")]
    IndexCorrupt { index: String, id: String },
    #[error("{id} is missing from index {index}")]
    IndexEntryMissing { index: String, id: String },
    #[error("order ({ticket_id}, {user_id}) is at status {current} and cannot move to {target}")]
    SequenceViolation {
        ticket_id: u64,
        user_id: String,
        current: u8,
        target: u8,
    },
    #[error("adding {delta} to {id} (currently {current}) overflows")]
    Overflow { id: String, current: i64, delta: i64 },
    #[error("invalid credentials for {0}")]
    InvalidCredentials(String),
    #[error("participant {0} is not an administrator")]
    NotAuthorized(String),
    #[error("entity encoding failed: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("history record encoding failed: {0}")]
    HistoryCodec(String),
    #[error("ledger failure: {0}")]
    Ledger(#[from] sled::Error),
    #[error("ledger transaction aborted while writing {0}")]
    TransactionAborted(String),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
    pub fn already_exists(kind: &'static str, id: impl ToString) -> Self {
        Self::AlreadyExists {
            kind,
            id: id.to_string(),
        }
    }
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
    /// True for failures caused by the caller rather than the ledger itself
    pub fn is_caller_error(&self) -> bool {
        !matches!(
            self,
            Self::Codec(_) | Self::HistoryCodec(_) | Self::Ledger(_) | Self::TransactionAborted(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
