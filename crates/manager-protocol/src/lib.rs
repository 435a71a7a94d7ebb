//! Manager Protocol - async client for the switch manager interface
//!
//! The manager interface is a line-oriented TCP protocol: the switch greets
//! with a banner, the client logs in, then sends actions and receives
//! correlated responses interleaved with unsolicited events.
//!
//! This crate provides:
//! - [`Action`] and [`Message`] with the CRLF wire codec
//! - [`ManagerClient`], a single shared session with a request lock,
//!   ActionID correlation and a background reader task
//! - [`ReconnectPolicy`] for bounded exponential backoff
//!
//! # Example
//!
//! ```ignore
//! use manager_protocol::{ManagerClient, ManagerConfig};
//!
//! let client = ManagerClient::new(ManagerConfig::new("127.0.0.1", 5038, "ivr", "secret"));
//! client.ensure_connected().await?;
//! client.reload_dialplan().await?;
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod message;

pub use client::{ConnectionState, ManagerClient};
pub use config::{ManagerConfig, ReconnectPolicy};
pub use error::{ManagerError, Result};
pub use message::{read_banner, read_message, Action, Message, MessageKind};
