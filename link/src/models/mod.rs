//! Data models for detector-link.
//!
//! Defines query references and results, the sync-socket wire protocol and
//! the HTTP function-call bodies.

pub mod client_message;
pub mod connection_options;
pub mod function_call;
pub mod query_ref;
pub mod query_result;
pub mod server_message;
pub mod subscription_info;

pub use client_message::{ClientMessage, QuerySetModification};
pub use connection_options::ConnectionOptions;
pub use function_call::{FunctionKind, FunctionRequest, FunctionResponse};
pub use query_ref::QueryRef;
pub use query_result::{FailureKind, QueryFailure, QueryResult};
pub use server_message::{ServerMessage, StateModification};
pub use subscription_info::SubscriptionInfo;
