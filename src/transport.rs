//! Push-message transport.
//!
//! A [`Transport`] is a socket.io-style event channel: clients send named events with a JSON
//! payload and register callbacks for named events pushed by the server. Transports also dispatch
//! the lifecycle events [`CONNECT_EVENT`], [`CONNECT_ERROR_EVENT`] and [`DISCONNECT_EVENT`] to
//! callbacks registered for them.
use crate::TransportError;
use std::rc::Rc;

/// Payload carried by an event.
pub type Payload = serde_json::Value;

/// Callback registered for an event.
///
/// Callbacks are compared by pointer, so the same `Rc` that was passed to [`Transport::on`] must be
/// passed to [`Transport::off`].
pub type Callback = Rc<dyn Fn(&Payload)>;

/// Dispatched every time the connection is established, including reconnects.
pub const CONNECT_EVENT: &str = "connect";

/// Dispatched when the connection fails, with the error message as payload.
pub const CONNECT_ERROR_EVENT: &str = "connect_error";

/// Dispatched when the connection is closed by the other side.
pub const DISCONNECT_EVENT: &str = "disconnect";

pub trait Transport {
    /// Handle to an open connection.
    type Connection: Clone + 'static;

    fn connect(&self) -> Result<Self::Connection, TransportError>;

    /// Close the connection and drop every callback registered on it.
    fn disconnect(&self, connection: &Self::Connection);

    /// Send an event. Delivery is not acknowledged.
    fn send(
        &self,
        connection: &Self::Connection,
        event: &str,
        payload: Payload,
    ) -> Result<(), TransportError>;

    fn on(&self, connection: &Self::Connection, event: &str, callback: Callback);

    fn off(&self, connection: &Self::Connection, event: &str, callback: &Callback);
}
