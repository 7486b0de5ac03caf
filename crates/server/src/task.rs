//! Blocking collaborator calls

use crate::error::{BrokerError, Result};

/// Run `call` on the blocking pool
///
/// A panic inside `call` is resumed on the awaiting task, so it is reported
/// like any other panic in that session.
pub(crate) async fn unblock<T, F>(call: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(call).await {
        Ok(value) => Ok(value),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(BrokerError::Task(e.to_string())),
    }
}
