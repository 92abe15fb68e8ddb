//! Advisor client core: session identity, local history, the realtime STOMP channel,
//! the agent activity timeline and the chat controller used by the CLI.

pub mod api;
pub mod chat;
pub mod config;
pub mod history;
pub mod init;
pub mod realtime;
pub mod session;
pub mod storage;
pub mod time;
pub mod timeline;
