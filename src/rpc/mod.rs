//! JSON-RPC module for daemon communication.
//!
//! Provides the JSON-RPC 2.0 server over stdin/stdout:
//! - `generate`, `extend`, `remix`: Create a job and start its task
//! - `task_status`, `task_result`: Poll a job by token
//! - `get_generation`, `list_generations`, `toggle_like`, `delete_generation`: Library access
//! - `cancel`: Cancel a running job
//! - `generate_cover`: Render cover art for an existing job
//! - `get_backends`, `list_pipelines`, `reload_config`: Provider introspection and hot reload
//! - `ping`: Health check
//! - `shutdown`: Graceful shutdown
//!
//! Notifications:
//! - `ready`: Sent once when the server starts reading requests

pub mod methods;
pub mod server;
pub mod types;

pub use server::{run_server, send_notification, ServerState};
pub use types::{
    JsonRpcError, JsonRpcErrorResponse, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId,
};
