use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use mailq_common::Message;

use super::Transport;
use crate::error::TransportError;

/// One scripted reaction to a `send` call
#[derive(Debug)]
pub enum MockBehavior {
    Succeed,
    /// Return this error from `send`
    Fail(TransportError),
    /// Fail with [`TransportError::ConnectionClosed`] and drop the connection
    Disconnect,
}

#[derive(Debug, Default)]
struct MockState {
    behaviors: VecDeque<MockBehavior>,
    open_failures: VecDeque<TransportError>,
    connected: bool,
    delivered: Vec<Message>,
    sends: usize,
    opens: usize,
    closes: usize,
}

/// In-memory transport for tests
///
/// Each `send` consumes the next scripted [`MockBehavior`]; once the script
/// runs out every send succeeds. Clones share state, so a test can keep a
/// handle while the engine owns the transport.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that will play `behaviors` in order
    pub fn scripted(behaviors: impl IntoIterator<Item = MockBehavior>) -> Self {
        let transport = Self::new();
        for behavior in behaviors {
            transport.push(behavior);
        }
        transport
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, behavior: MockBehavior) {
        self.state().behaviors.push_back(behavior);
    }

    /// Make the next `open` call fail with `error`
    pub fn fail_next_open(&self, error: TransportError) {
        self.state().open_failures.push_back(error);
    }

    /// Messages that were accepted, in order
    pub fn delivered(&self) -> Vec<Message> {
        self.state().delivered.clone()
    }

    /// Number of `send` calls, successful or not
    pub fn sends(&self) -> usize {
        self.state().sends
    }

    pub fn opens(&self) -> usize {
        self.state().opens
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.opens += 1;

        if let Some(error) = state.open_failures.pop_front() {
            return Err(error);
        }

        state.connected = true;
        Ok(())
    }

    async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let mut state = self.state();
        state.sends += 1;

        if !state.connected {
            return Err(TransportError::ConnectionClosed);
        }

        match state.behaviors.pop_front().unwrap_or(MockBehavior::Succeed) {
            MockBehavior::Succeed => {
                state.delivered.push(message.clone());
                Ok(())
            }
            MockBehavior::Fail(error) => Err(error),
            MockBehavior::Disconnect => {
                state.connected = false;
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.connected {
            state.closes += 1;
            state.connected = false;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }
}
