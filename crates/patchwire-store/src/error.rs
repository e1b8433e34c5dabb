#![forbid(unsafe_code)]

use patchwire_reactive::ListenerError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is not ready")]
    NotReady,

    #[error("no entry for key `{key}`")]
    Missing { key: String },

    #[error("entry `{key}` is not a valid record: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Listener(#[from] ListenerError),
}
