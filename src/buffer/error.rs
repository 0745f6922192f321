use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BufferError {
    #[error("Batch {batch_id} is sealed and no longer accepts events")]
    Sealed { batch_id: String },

    #[error("Buffer is closed")]
    BufferClosed,

    #[error("Event serialization failed: {0}")]
    Serialization(String),
}

impl From<crate::sender::SerializationError> for BufferError {
    fn from(error: crate::sender::SerializationError) -> Self {
        BufferError::Serialization(error.to_string())
    }
}
