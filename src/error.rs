//! Error taxonomy for the store and the ingestion pipeline.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Context not found: {0}")]
    ContextNotFound(String),

    /// A context update referenced a document that does not resolve.
    /// The update still commits without the reference.
    #[error("Document {document_id} does not exist")]
    ValidationFailure {
        context_id: String,
        document_id: String,
    },

    /// Anything that goes wrong while the processor applies a queued intent.
    #[error("{0}")]
    TaskApply(String),
}

impl CoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::DocumentNotFound(_) | CoreError::ContextNotFound(_)
        )
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
