//! Client and server runtime for rpcprims.
//!
//! [`ClientManager`] drives requests through a [`Transport`](rpcprims_transport::Transport)
//! as resumable state machines. [`SimpleServer`] receives requests, dispatches
//! them to registered [`Service`]s and sends the replies. Both lease codecs and
//! buffers from shared factories and return them when a message is finished.
//!
//! A client that shares a thread with a server can register the server's
//! [`NestedDispatch`] so blocking calls made from handlers keep serving
//! incoming requests while they wait.

pub mod client;
pub mod server;

pub use client::{ClientConfig, ClientManager, ErrorHandler, RequestContext, RequestState};
pub use server::{
    begin_reply, ActionHook, MessageLogger, NestedDispatch, ServerConfig, ServerState, Service,
    SimpleServer, StopHandle,
};
