use logwarden_backends::BackendError;
use thiserror::Error;

/// Why a worker cycle failed. Every variant counts against the circuit breaker.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("queue error: {0}")]
    Queue(#[source] BackendError),

    #[error("undecodable queue payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to persist analysis: {0}")]
    Persist(#[source] BackendError),
}
