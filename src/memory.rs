//! In-process transport.
//!
//! [`MemoryTransport`] keeps everything in memory: sent events are recorded, and events are
//! "pushed by the server" by calling [`MemoryTransport::emit`]. It is what the tests of this crate
//! run against, and can stand in for a real connection in host-side simulations.
use crate::{Callback, Payload, Transport, TransportError, CONNECT_EVENT};
use std::{cell::RefCell, rc::Rc};

/// Connection opened on a [`MemoryTransport`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryConnection(u64);

/// Event sent through a [`MemoryTransport`].
#[derive(Clone, Debug, PartialEq)]
pub struct SentEvent {
    pub event: String,
    pub payload: Payload,
}

#[derive(Default)]
struct State {
    next_connection: u64,
    open: Vec<MemoryConnection>,
    listeners: Vec<(MemoryConnection, String, Callback)>,
    sent: Vec<SentEvent>,
    opened: usize,
    fail: Option<String>,
}

/// Transport that lives entirely in memory. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Rc<RefCell<State>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent connection attempts fail with `reason`, or succeed again with `None`.
    pub fn fail_connections(&self, reason: Option<&str>) {
        self.state.borrow_mut().fail = reason.map(String::from);
    }

    /// Dispatch an event to every matching callback on open connections.
    ///
    /// Returns the number of callbacks invoked.
    pub fn emit(&self, event: &str, payload: Payload) -> usize {
        let callbacks: Vec<Callback> = {
            let state = self.state.borrow();
            state
                .listeners
                .iter()
                .filter(|(connection, name, _)| name == event && state.open.contains(connection))
                .map(|(_, _, callback)| callback.clone())
                .collect()
        };
        for callback in &callbacks {
            callback(&payload);
        }
        callbacks.len()
    }

    /// Simulate the connection dropping and coming back.
    pub fn reconnect(&self) -> usize {
        self.emit(CONNECT_EVENT, Payload::Null)
    }

    /// Events sent so far, oldest first.
    pub fn sent(&self) -> Vec<SentEvent> {
        self.state.borrow().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.state.borrow_mut().sent.clear();
    }

    /// Number of callbacks registered for `event` on open connections.
    pub fn listener_count(&self, event: &str) -> usize {
        let state = self.state.borrow();
        state
            .listeners
            .iter()
            .filter(|(connection, name, _)| name == event && state.open.contains(connection))
            .count()
    }

    /// Number of connections opened over the lifetime of this transport.
    pub fn connections_opened(&self) -> usize {
        self.state.borrow().opened
    }

    pub fn open_connections(&self) -> usize {
        self.state.borrow().open.len()
    }
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    fn connect(&self) -> Result<MemoryConnection, TransportError> {
        let mut state = self.state.borrow_mut();
        if let Some(reason) = &state.fail {
            return Err(TransportError::Connect(reason.clone()));
        }
        let connection = MemoryConnection(state.next_connection);
        state.next_connection += 1;
        state.opened += 1;
        state.open.push(connection);
        Ok(connection)
    }

    fn disconnect(&self, connection: &MemoryConnection) {
        let mut state = self.state.borrow_mut();
        state.open.retain(|open| open != connection);
        state.listeners.retain(|(owner, _, _)| owner != connection);
    }

    fn send(
        &self,
        connection: &MemoryConnection,
        event: &str,
        payload: Payload,
    ) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if !state.open.contains(connection) {
            return Err(TransportError::Closed);
        }
        state.sent.push(SentEvent {
            event: event.into(),
            payload,
        });
        Ok(())
    }

    fn on(&self, connection: &MemoryConnection, event: &str, callback: Callback) {
        self.state
            .borrow_mut()
            .listeners
            .push((*connection, event.into(), callback));
    }

    fn off(&self, connection: &MemoryConnection, event: &str, callback: &Callback) {
        self.state.borrow_mut().listeners.retain(|(owner, name, registered)| {
            !(owner == connection && name == event && Rc::ptr_eq(registered, callback))
        });
    }
}
