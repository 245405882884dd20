use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::fmt;

use crate::error::{LinkError, Result};

/// Why a query has no usable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The backend function threw for this query.
    Query,
    /// The connection is gone and will not be re-established.
    Connection,
}

/// Failure delivered to subscribers in place of a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl QueryFailure {
    pub fn query(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Query,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Connection,
            message: message.into(),
        }
    }
}

impl fmt::Display for QueryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Query => write!(f, "query failed: {}", self.message),
            FailureKind::Connection => write!(f, "connection failed: {}", self.message),
        }
    }
}

/// Latest known state of a subscribed query.
///
/// Every emission replaces the previous one wholesale.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum QueryResult {
    /// Nothing received from the backend yet.
    #[default]
    Absent,
    /// Latest value pushed by the backend.
    Ready(JsonValue),
    Failed(QueryFailure),
}

impl QueryResult {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn value(&self) -> Option<&JsonValue> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&QueryFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Decode the value into a typed result.
    ///
    /// `Ok(None)` while absent, `Err(QueryError)` when failed.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self {
            Self::Absent => Ok(None),
            Self::Ready(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| {
                    LinkError::SerializationError(format!("Unexpected query result shape: {}", e))
                }),
            Self::Failed(failure) => Err(LinkError::QueryError(failure.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        text: String,
    }

    #[test]
    fn test_absent_decodes_to_none() {
        let result = QueryResult::default();
        assert!(result.is_absent());
        assert_eq!(result.decode::<Vec<Row>>().unwrap(), None);
    }

    #[test]
    fn test_ready_decodes_value() {
        let result = QueryResult::Ready(json!([{"text": "hi"}]));
        assert_eq!(
            result.decode::<Vec<Row>>().unwrap(),
            Some(vec![Row { text: "hi".into() }])
        );
    }

    #[test]
    fn test_wrong_shape_is_serialization_error() {
        let result = QueryResult::Ready(json!({"text": 1}));
        assert!(matches!(
            result.decode::<Vec<Row>>(),
            Err(LinkError::SerializationError(_))
        ));
    }

    #[test]
    fn test_failed_decodes_to_query_error() {
        let result = QueryResult::Failed(QueryFailure::query("boom"));
        assert_eq!(result.failure().map(|f| f.kind), Some(FailureKind::Query));
        match result.decode::<Vec<Row>>() {
            Err(LinkError::QueryError(msg)) => assert!(msg.contains("boom")),
            other => panic!("unexpected {:?}", other),
        }
    }
}
