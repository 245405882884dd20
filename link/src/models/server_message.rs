use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Server-to-client frames on the sync socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthSuccess,

    AuthError { message: String },

    /// Batch of query state changes, applied in order.
    Transition { modifications: Vec<StateModification> },

    /// The backend is dropping this session; the client reconnects.
    FatalError { error: String },
}

/// One entry of a `transition` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateModification {
    /// New result for the query; replaces any previous one.
    QueryUpdated { query_id: u32, value: JsonValue },

    /// The query function threw.
    QueryFailed { query_id: u32, error_message: String },

    /// The server acknowledged removal of the query.
    QueryRemoved { query_id: u32 },
}

impl StateModification {
    pub fn query_id(&self) -> u32 {
        match self {
            Self::QueryUpdated { query_id, .. }
            | Self::QueryFailed { query_id, .. }
            | Self::QueryRemoved { query_id } => *query_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_transition() {
        let raw = r#"{
            "type": "transition",
            "modifications": [
                {"type": "query_updated", "query_id": 0, "value": [{"_id": "a", "text": "hello"}]},
                {"type": "query_failed", "query_id": 1, "error_message": "nope"}
            ]
        }"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ServerMessage::Transition { modifications } => {
                assert_eq!(modifications.len(), 2);
                assert_eq!(
                    modifications[0],
                    StateModification::QueryUpdated {
                        query_id: 0,
                        value: json!([{"_id": "a", "text": "hello"}]),
                    }
                );
                assert_eq!(modifications[1].query_id(), 1);
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_auth_frames() {
        let ok: ServerMessage = serde_json::from_str(r#"{"type":"auth_success"}"#).unwrap();
        assert_eq!(ok, ServerMessage::AuthSuccess);
        let err: ServerMessage =
            serde_json::from_str(r#"{"type":"auth_error","message":"bad token"}"#).unwrap();
        assert_eq!(
            err,
            ServerMessage::AuthError {
                message: "bad token".into()
            }
        );
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ServerMessage>(r#"{"type":"bogus"}"#).is_err());
    }
}
