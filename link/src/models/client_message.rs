use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Client-to-server frames on the sync socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First frame when a token is configured; answered by
    /// `auth_success` or `auth_error`.
    Authenticate { token: String },

    /// Change the set of queries this connection is subscribed to.
    ///
    /// `base_version` must equal the `new_version` of the previous message on
    /// the same socket; a fresh socket starts from 0.
    ModifyQuerySet {
        base_version: u32,
        new_version: u32,
        modifications: Vec<QuerySetModification>,
    },
}

/// One entry of a `modify_query_set` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuerySetModification {
    Add {
        query_id: u32,
        udf_path: String,
        args: JsonValue,
    },
    Remove {
        query_id: u32,
    },
}
