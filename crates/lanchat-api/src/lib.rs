pub mod auth;
pub mod error;
pub mod files;
pub mod groups;
pub mod history;
pub mod messages;
pub mod users;

use lanchat_db::ChatResult;

use crate::error::ApiError;

/// Run a store closure on the blocking pool, mapping both join failures and
/// store errors into the API taxonomy.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> ChatResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            ApiError(lanchat_db::ChatError::Persistence(format!(
                "blocking task failed: {e}"
            )))
        })?
        .map_err(ApiError)
}
