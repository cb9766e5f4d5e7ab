pub mod receive;
pub mod send;
pub mod verify;

use tokio_util::sync::CancellationToken;

/// Cancels `cancel` on Ctrl-C.
pub(crate) fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    tracing::warn!("interrupted, stopping");
                    cancel.cancel();
                }
            }
            _ = cancel.cancelled() => {}
        }
    });
}
