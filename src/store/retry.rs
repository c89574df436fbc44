//! Bounded retry for optimistic-concurrency writes.

use rocket::futures::future::BoxFuture;

use super::StoreError;

/// Run a read-mutate-conditional-write attempt up to `max_attempts` times,
/// retrying only when the attempt loses a write race (a violated revision
/// precondition, or a create racing another create). Any other error, and
/// any success, is returned immediately; exhaustion surfaces the last race
/// loss to the caller.
pub async fn with_optimistic_retry<'a, T>(
    description: &str,
    max_attempts: u32,
    mut attempt: impl FnMut() -> BoxFuture<'a, Result<T, StoreError>>,
) -> Result<T, StoreError> {
    let mut last = StoreError::PreconditionFailed;
    for round in 1..=max_attempts {
        match attempt().await {
            Err(err @ (StoreError::PreconditionFailed | StoreError::AlreadyExists)) => {
                warn!("{description}: lost write race (attempt {round}/{max_attempts})");
                last = err;
            }
            other => return other,
        }
    }
    Err(last)
}
