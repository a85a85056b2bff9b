/// Opaque failure from the `MessageStore` collaborator. The core never
/// inspects the cause; it only decides whether to surface (REST) or log and
/// drop (WS) it.
#[derive(Debug, thiserror::Error)]
#[error("store failure: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Error taxonomy for `DeliveryService` operations and, by extension, the
/// REST handlers built on top of them.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
}
