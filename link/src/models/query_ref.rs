use serde_json::{Map, Value as JsonValue};

use crate::error::{LinkError, Result};

/// Reference to a named backend read operation plus its arguments.
///
/// Two references with the same path and the same arguments identify the
/// same query; a [`Connection`](crate::Connection) subscribes to it once no
/// matter how many consumers are watching.
///
/// # Examples
///
/// ```rust
/// use detector_link::QueryRef;
/// use serde_json::json;
///
/// let all_tasks = QueryRef::new("tasks:get");
/// assert!(all_tasks.args().is_empty());
///
/// let by_owner = QueryRef::new("tasks:byOwner").arg("owner", json!("ada"));
/// assert_eq!(by_owner.args()["owner"], json!("ada"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRef {
    udf_path: String,
    args: Map<String, JsonValue>,
}

impl QueryRef {
    /// Reference a parameterless query by its function path.
    pub fn new(udf_path: impl Into<String>) -> Self {
        Self {
            udf_path: udf_path.into(),
            args: Map::new(),
        }
    }

    /// Add a single named argument.
    pub fn arg(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.args.insert(name.into(), value);
        self
    }

    /// Replace all arguments. Backend functions take a single JSON object, so
    /// anything other than an object (or `null`, meaning "no args") is rejected.
    pub fn with_args(mut self, args: JsonValue) -> Result<Self> {
        self.args = match args {
            JsonValue::Object(map) => map,
            JsonValue::Null => Map::new(),
            other => {
                return Err(LinkError::ConfigurationError(format!(
                    "Query arguments for '{}' must be a JSON object, got {}",
                    self.udf_path, other
                )))
            },
        };
        Ok(self)
    }

    /// Function path, e.g. `tasks:get`.
    pub fn path(&self) -> &str {
        &self.udf_path
    }

    pub fn args(&self) -> &Map<String, JsonValue> {
        &self.args
    }

    pub(crate) fn args_value(&self) -> JsonValue {
        JsonValue::Object(self.args.clone())
    }

    /// Reject paths the backend could never resolve.
    pub fn validate(&self) -> Result<()> {
        let path = self.udf_path.trim();
        if path.is_empty() {
            return Err(LinkError::ConfigurationError(
                "Query path must not be empty".to_string(),
            ));
        }
        if path.len() != self.udf_path.len() || path.chars().any(char::is_whitespace) {
            return Err(LinkError::ConfigurationError(format!(
                "Query path '{}' must not contain whitespace",
                self.udf_path
            )));
        }
        Ok(())
    }

    /// Deduplication key. `serde_json::Map` keeps keys sorted, so equal
    /// argument objects always serialize identically.
    pub(crate) fn dedup_key(&self) -> String {
        format!("{}|{}", self.udf_path, JsonValue::Object(self.args.clone()))
    }
}

impl std::fmt::Display for QueryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.udf_path)
        } else {
            write!(f, "{}({})", self.udf_path, JsonValue::Object(self.args.clone()))
        }
    }
}
