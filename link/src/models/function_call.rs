use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Request body for one-shot HTTP function calls
/// (`POST /api/query`, `POST /api/mutation`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRequest {
    pub path: String,
    pub args: JsonValue,
    pub format: String,
}

impl FunctionRequest {
    pub fn new(path: impl Into<String>, args: JsonValue) -> Self {
        Self {
            path: path.into(),
            args,
            format: "json".to_string(),
        }
    }
}

/// Response body of an HTTP function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum FunctionResponse {
    #[serde(rename_all = "camelCase")]
    Success {
        value: JsonValue,
        #[serde(default)]
        log_lines: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        error_message: String,
        #[serde(default)]
        error_data: Option<JsonValue>,
        #[serde(default)]
        log_lines: Vec<String>,
    },
}

/// Kind of backend function reachable over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Query,
    Mutation,
}

impl FunctionKind {
    pub fn endpoint(&self) -> &'static str {
        match self {
            FunctionKind::Query => "api/query",
            FunctionKind::Mutation => "api/mutation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_body() {
        let body = serde_json::to_value(FunctionRequest::new("tasks:get", json!({}))).unwrap();
        assert_eq!(body, json!({"path": "tasks:get", "args": {}, "format": "json"}));
    }

    #[test]
    fn test_parse_success() {
        let parsed: FunctionResponse =
            serde_json::from_str(r#"{"status":"success","value":[1,2],"logLines":["hi"]}"#)
                .unwrap();
        assert_eq!(
            parsed,
            FunctionResponse::Success {
                value: json!([1, 2]),
                log_lines: vec!["hi".into()],
            }
        );
    }

    #[test]
    fn test_parse_error_without_optional_fields() {
        let parsed: FunctionResponse =
            serde_json::from_str(r#"{"status":"error","errorMessage":"Server Error"}"#).unwrap();
        match parsed {
            FunctionResponse::Error { error_message, error_data, .. } => {
                assert_eq!(error_message, "Server Error");
                assert!(error_data.is_none());
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}
