//! Cogda Protocol
//!
//! The Cogda live data protocol over WebSocket binary frames.
//!
//! - `messages`: the closed set of protocol messages and their field names
//! - `adapter`: mapping between messages and the generic wire container
//! - `session`: server-side handshake state machine
//! - `auth`: configured users and scheme entitlements
//! - `server`: WebSocket server, one task per connection
//! - `client`: pipelining client with correlation-id matching
//! - `pending`: outstanding client requests
//! - `heartbeat`: ping/pong liveness shared by server and client

pub mod adapter;
pub mod auth;
pub mod client;
pub mod heartbeat;
pub mod messages;
pub mod pending;
pub mod server;
pub mod session;

pub use auth::{SchemeEntitlements, UserDirectory};
pub use client::{ClientConfig, ClientError, CogdaClient};
pub use heartbeat::HeartbeatConfig;
pub use messages::{
    CogdaMessage, CommandResponse, ConnectionRequest, ConnectionResponse, FeedRequest,
    LiveDataUpdate, MessageType, ResponseFields, ResponseMessage, SnapshotResponse,
    SubscriptionResponse,
};
pub use pending::ResponseHandle;
pub use server::{CogdaServer, ServerError, ServerOptions, ServerPorts, ServerStatus};
pub use session::{CapabilityPolicy, ConnectionSession, SessionPolicy, SessionState};
