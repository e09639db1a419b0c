#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record already exists")]
    AlreadyExists,

    #[error("Record not found")]
    NotFound,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Destination channel {channel_id} not found")]
    NotFound { channel_id: String },

    #[error("Delivery rejected: {0}")]
    Permanent(String),

    #[error("Delivery failed, may succeed later: {0}")]
    Transient(String),
}

impl DeliveryError {
    /// Permanent failures will not go away on their own (deleted channel, missing access).
    pub fn is_permanent(&self) -> bool {
        !matches!(self, DeliveryError::Transient(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("Failed to fetch feed: {0}")]
    Fetch(String),

    #[error("Failed to parse feed: {0}")]
    Parse(String),

    #[error("Feed fetch timed out after {seconds}s")]
    Timeout { seconds: u64 },
}
