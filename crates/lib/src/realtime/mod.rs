//! Realtime channel: STOMP over WebSocket, scoped to one session.
//!
//! The backend pushes the agent's thinking, reasoning, tool calls/results, the final response
//! and errors to `/topic/{kind}/{sessionId}`. [`RealtimeClient`] keeps one connection alive
//! for a session and turns those frames into [`RealtimeEvent`]s.

mod client;
mod frame;
mod topics;
mod transport;

pub use client::{ClientOptions, ConnectionState, RealtimeClient, Subscription};
pub use frame::{negotiate_heartbeat, Command, Frame, FrameError};
pub use topics::{
    decode_event, ContentPayload, ErrorPayload, RealtimeEvent, ToolCallPayload,
    ToolResultPayload, TopicKind,
};
pub use transport::{Connection, Connector, TransportError, WsConnector};
