//! collab-channel: Network plumbing for the notebook collaboration engine.
//!
//! Provides the realtime channel client (WebSocket), the REST backend
//! client, and a file-backed notebook adapter for headless operation.

pub mod client;
pub mod notebook_file;
pub mod rest;

pub use client::{ChannelClient, ChannelError};
pub use notebook_file::NotebookFile;
pub use rest::RestApi;
