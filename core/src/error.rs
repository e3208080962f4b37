use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown role tag '{tag}'")]
    UnknownRole { tag: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Invalid collection name '{name}'")]
    InvalidCollectionName { name: String },

    #[error("Run '{collection}' has unknown status '{status}' in the registry")]
    UnknownRunStatus { collection: String, status: String },

    #[error("Bus is closed")]
    BusClosed,

    #[error("Bus queue full: '{topic}' not accepted within {timeout_ms}ms")]
    BusQueueFull { topic: String, timeout_ms: u64 },

    #[error("Driver already ran; state is {state}")]
    DriverNotIdle { state: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SimError {
    /// Transport failures are worth retrying; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BusQueueFull { .. })
    }
}

pub type SimResult<T> = Result<T, SimError>;
