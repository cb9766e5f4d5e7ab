//! Coordinator error types.

/// Errors that stop a transfer before the coordinator can run it.
///
/// Failures while parts are moving are not errors; they are reported in
/// the [`TransferResult`](chunkferry_transfer::TransferResult).
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("transfer error: {0}")]
    Transfer(#[from] chunkferry_transfer::TransferError),

    #[error("endpoint error: {0}")]
    Endpoint(#[from] chunkferry_endpoint::EndpointError),

    #[error("background task failed: {0}")]
    Task(String),
}
