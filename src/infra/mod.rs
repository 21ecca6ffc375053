//! Infrastructure layer implementations.

pub mod crypto;
pub mod observability;
pub mod registry;

pub use registry::{HttpJsonRpcTransport, JsonRpcTransport, RpcRecordRegistry};
