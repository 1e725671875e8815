use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::supervisor::LifecycleState;

/// Faults raised by a [`RecordStore`](crate::store::RecordStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("query on '{path}' failed: {reason}")]
    Query { path: String, reason: String },
    #[error("insert on '{path}' failed: {reason}")]
    Insert { path: String, reason: String },
    #[error("unknown resource path: {0}")]
    UnknownPath(String),
    #[error("store worker failed: {0}")]
    Worker(String),
    #[error("cannot read fixtures '{}': {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed fixtures '{}': {source}", path.display())]
    Fixtures {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn query(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Query { path: path.into(), reason: reason.to_string() }
    }

    pub fn insert(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Insert { path: path.into(), reason: reason.to_string() }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),
    #[error("server terminated: {0}")]
    Serve(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("cannot {action} while {state:?}")]
    InvalidTransition { action: &'static str, state: LifecycleState },
    #[error(transparent)]
    Startup(#[from] ServerError),
}
