pub mod connection;
pub mod dispatcher;
pub mod messages;
pub mod policy;
pub mod registry;
pub mod tracker;

use std::path::PathBuf;
use std::sync::Arc;

use lanchat_crypto::MessageCipher;
use lanchat_db::{ChatError, Database};

use crate::dispatcher::Dispatcher;

pub type CoreState = Arc<CoreStateInner>;

/// Everything the real-time core needs: the store, the at-rest cipher, the
/// dispatcher (which owns the presence registry), and the upload directory
/// for file cleanup on hard delete.
pub struct CoreStateInner {
    pub db: Database,
    pub cipher: MessageCipher,
    pub dispatcher: Dispatcher,
    pub upload_dir: PathBuf,
    pub jwt_secret: String,
}

pub(crate) fn join_err(e: tokio::task::JoinError) -> ChatError {
    ChatError::Persistence(format!("blocking task failed: {e}"))
}
