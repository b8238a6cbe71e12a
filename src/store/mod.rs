//! On-disk persistence for simulation campaigns.
//!
//! * [`Database`] stores one JSON document per run under `db/<uuid>.json`
//!   plus an `index.csv` of selected scalar fields.
//! * [`PersistentQueue`] is a FIFO of pending work persisted as JSON after
//!   every mutation, so a worker can be stopped and restarted at any time.

pub mod database;
pub mod queue;

pub use database::Database;
pub use queue::PersistentQueue;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("A database already exists at {0}; open it or create with overwrite")]
    AlreadyExists(String),
    #[error("'{0}' is reserved and cannot be used as an index field")]
    ReservedField(String),
    #[error("Document has no field '{0}'")]
    MissingField(String),
    #[error("No document with id {0}")]
    UnknownId(String),
    #[error("Invalid database index: {0}")]
    InvalidIndex(String),
    #[error("JSON Error: {0}")]
    JsonError(String),
    #[error("CSV Error: {0}")]
    CsvError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::IOError(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::JsonError(err.to_string())
    }
}

impl From<csv::Error> for StoreError {
    fn from(err: csv::Error) -> Self {
        StoreError::CsvError(err.to_string())
    }
}
