//! RPC transport: typed messages carried over WebSocket frames

pub mod messages;

pub use messages::{
    methods, RpcCall, RpcError, RpcRequest, RpcResponse, RpcStatus,
};
