//! Outbound transports
//!
//! A transport is one connection capable of handing over encoded messages.
//! The engine opens it once per pass and reuses it for every message,
//! reopening only when [`Transport::is_connected`] reports it dropped.

mod directory;
mod mock;
mod smtp;

use std::fmt::Debug;

use async_trait::async_trait;
use mailq_common::Message;

pub use directory::DirectoryTransport;
pub use mock::{MockBehavior, MockTransport};
pub use smtp::{Response, SmtpTransport};

use crate::error::TransportError;

#[async_trait]
pub trait Transport: Send + Debug {
    /// Establish the connection
    async fn open(&mut self) -> Result<(), TransportError>;

    /// Hand over one message
    async fn send(&mut self, message: &Message) -> Result<(), TransportError>;

    /// Tear the connection down; a no-op when not connected
    async fn close(&mut self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}
