//! Browser WebSocket transport.
//!
//! Events travel as JSON text frames of the form `{"event": "<name>", "data": <payload>}` in both
//! directions. Outgoing frames are queued on a channel and written by a background task, so
//! [`Transport::send`] never blocks. A second task reads frames and dispatches them to the
//! registered callbacks.
use crate::{
    Callback, Payload, Transport, TransportError, CONNECT_ERROR_EVENT, CONNECT_EVENT,
    DISCONNECT_EVENT,
};
use futures::{channel::mpsc, StreamExt};
use gloo_net::websocket::{futures::WebSocket, Message};
use serde::{Deserialize, Serialize};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};
use wasm_bindgen_futures::spawn_local;

#[derive(Serialize, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Payload,
}

#[derive(Default)]
struct Shared {
    sender: RefCell<Option<mpsc::UnboundedSender<Message>>>,
    listeners: RefCell<Vec<(String, Callback)>>,
    closed: Cell<bool>,
}

impl Shared {
    fn dispatch(&self, event: &str, payload: &Payload) {
        if self.closed.get() {
            return;
        }
        let callbacks: Vec<Callback> = self
            .listeners
            .borrow()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(payload);
        }
    }
}

/// Connection opened by a [`WebSocketTransport`].
#[derive(Clone)]
pub struct WebSocketConnection {
    shared: Rc<Shared>,
}

/// Transport over a browser WebSocket.
#[derive(Clone, Debug)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;

    fn connect(&self) -> Result<WebSocketConnection, TransportError> {
        let socket =
            WebSocket::open(&self.url).map_err(|error| TransportError::Connect(error.to_string()))?;
        let (sink, mut stream) = socket.split::<Message>();
        let (sender, receiver) = mpsc::unbounded();
        let shared = Rc::new(Shared {
            sender: RefCell::new(Some(sender)),
            ..Default::default()
        });

        let url = self.url.clone();
        spawn_local(async move {
            if let Err(error) = receiver.map(Ok).forward(sink).await {
                log::warn!("websocket writer for {url} stopped: {error}");
            }
        });

        let reader = shared.clone();
        spawn_local(async move {
            reader.dispatch(CONNECT_EVENT, &Payload::Null);
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
                        Ok(envelope) => reader.dispatch(&envelope.event, &envelope.data),
                        Err(error) => log::warn!("undecodable websocket frame: {error}"),
                    },
                    Ok(Message::Bytes(_)) => log::debug!("ignoring binary websocket frame"),
                    Err(error) => {
                        reader.dispatch(CONNECT_ERROR_EVENT, &Payload::String(error.to_string()))
                    }
                }
            }
            reader.dispatch(DISCONNECT_EVENT, &Payload::Null);
        });

        Ok(WebSocketConnection { shared })
    }

    fn disconnect(&self, connection: &WebSocketConnection) {
        connection.shared.closed.set(true);
        connection.shared.sender.borrow_mut().take();
        connection.shared.listeners.borrow_mut().clear();
    }

    fn send(
        &self,
        connection: &WebSocketConnection,
        event: &str,
        payload: Payload,
    ) -> Result<(), TransportError> {
        let frame = serde_json::to_string(&Envelope {
            event: event.into(),
            data: payload,
        })
        .map_err(|error| TransportError::Send(error.to_string()))?;
        match connection.shared.sender.borrow().as_ref() {
            Some(sender) => sender
                .unbounded_send(Message::Text(frame))
                .map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    fn on(&self, connection: &WebSocketConnection, event: &str, callback: Callback) {
        connection
            .shared
            .listeners
            .borrow_mut()
            .push((event.into(), callback));
    }

    fn off(&self, connection: &WebSocketConnection, event: &str, callback: &Callback) {
        connection
            .shared
            .listeners
            .borrow_mut()
            .retain(|(name, registered)| !(name == event && Rc::ptr_eq(registered, callback)));
    }
}
