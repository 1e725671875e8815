//! Record Store Adapter seam.
//!
//! The host application's data provider is addressed by resource path
//! (`chats`, `chats/count`, `contacts`, ...) plus filter parameters. Calls are
//! blocking; callers in async context must hop onto a blocking worker first.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

pub mod memory;

pub use memory::MemoryStore;

/// A lazy, finite, one-pass sequence of rows.
pub type Rows = Box<dyn Iterator<Item = Row> + Send>;

pub trait RecordStore: Send + Sync {
    fn query(&self, path: &str, params: &QueryParams) -> Result<Rows, StoreError>;

    /// Insert-style call. `Ok(false)` means the store rejected the write without faulting.
    fn insert(&self, path: &str, params: &QueryParams) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Chats,
    Contacts,
    Messages,
}

impl Resource {
    pub fn path(self) -> &'static str {
        match self {
            Resource::Chats => "chats",
            Resource::Contacts => "contacts",
            Resource::Messages => "messages",
        }
    }

    pub fn count_path(self) -> String {
        format!("{}/count", self.path())
    }
}

/// Issues a count query and reads the `count` column of its first row (0 when absent).
pub fn count(store: &dyn RecordStore, resource: Resource, params: &QueryParams) -> Result<u64, StoreError> {
    let mut rows = store.query(&resource.count_path(), params)?;
    Ok(rows
        .next()
        .and_then(|row| row.get_i64("count"))
        .map(|n| n.max(0) as u64)
        .unwrap_or(0))
}

/// One row of column values as returned by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Map<String, Value>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.0.insert(column.to_string(), value.into());
        self
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(Value::as_str)
    }

    pub fn get_string(&self, column: &str) -> Option<String> {
        match self.0.get(column)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.0.get(column)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Integer-encoded boolean column: `1` is true, anything else false.
    pub fn get_flag(&self, column: &str) -> Option<bool> {
        match self.0.get(column)? {
            Value::Bool(b) => Some(*b),
            _ => self.get_i64(column).map(|n| n == 1),
        }
    }
}

/// Ordered filter parameters. Absent filters are never pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: impl ToString) {
        self.0.push((key.to_string(), value.to_string()));
    }

    pub fn push_opt<T: ToString>(&mut self, key: &str, value: Option<T>) {
        if let Some(v) = value {
            self.push(key, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Same filters with `limit` and `offset` appended.
    pub fn windowed(&self, limit: u32, offset: u32) -> Self {
        let mut out = self.clone();
        out.push("limit", limit);
        out.push("offset", offset);
        out
    }

    pub fn to_query_string(&self) -> String {
        let mut ser = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &self.0 {
            ser.append_pair(k, v);
        }
        ser.finish()
    }
}

/// Provider-style URI for logs, e.g. `content://com.beeper.api/chats?limit=2&offset=0`.
pub fn resource_uri(path: &str, params: &QueryParams) -> String {
    if params.is_empty() {
        format!("content://com.beeper.api/{path}")
    } else {
        format!("content://com.beeper.api/{path}?{}", params.to_query_string())
    }
}
