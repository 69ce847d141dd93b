//! Live order tracking.
//!
//! [`LiveTrackingClient`] owns one connection on some [`Transport`] and lets any number of callers
//! join order rooms and listen for pushed messages on it. Clones share the same connection, so a
//! single client is constructed at startup and handed to whoever needs it.
//!
//! Joining and leaving rooms is fire-and-forget: nothing is acknowledged, and doing either while
//! disconnected silently does nothing. Transport failures are logged, never returned.
//!
//! When the transport reports the connection as lost, the client drops it but keeps its rooms and
//! handlers. The next [`LiveTrackingClient::connect`] attaches the handlers again and, unless
//! disabled, rejoins the rooms.
use crate::{
    Callback, ListenerMode, OrderUpdate, Payload, TrackingConfig, Transport, CONNECT_ERROR_EVENT,
    CONNECT_EVENT, DISCONNECT_EVENT,
};
use serde::de::DeserializeOwned;
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    rc::{Rc, Weak},
};

/// Handle for a registered message handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    callback: Callback,
}

struct ClientState<C> {
    connection: Option<C>,
    rooms: BTreeSet<String>,
    listeners: BTreeMap<String, Vec<Listener>>,
    lifecycle: Vec<(&'static str, Callback)>,
    next_listener: u64,
}

impl<C> Default for ClientState<C> {
    fn default() -> Self {
        Self {
            connection: None,
            rooms: BTreeSet::new(),
            listeners: BTreeMap::new(),
            lifecycle: Vec::new(),
            next_listener: 0,
        }
    }
}

/// Shared connection for live order tracking.
pub struct LiveTrackingClient<T: Transport> {
    transport: Rc<T>,
    config: Rc<TrackingConfig>,
    state: Rc<RefCell<ClientState<T::Connection>>>,
}

impl<T: Transport> Clone for LiveTrackingClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
        }
    }
}

impl<T: Transport> PartialEq for LiveTrackingClient<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl<T: Transport + 'static> LiveTrackingClient<T> {
    pub fn new(transport: T, config: TrackingConfig) -> Self {
        Self {
            transport: Rc::new(transport),
            config: Rc::new(config),
            state: Default::default(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().connection.is_some()
    }

    /// Rooms joined and not left since the last [`disconnect`](Self::disconnect).
    pub fn joined_rooms(&self) -> Vec<String> {
        self.state.borrow().rooms.iter().cloned().collect()
    }

    /// Number of handlers tracked for a message type.
    pub fn listener_count(&self, message_type: &str) -> usize {
        self.state
            .borrow()
            .listeners
            .get(message_type)
            .map_or(0, Vec::len)
    }

    /// Open the connection, unless it is already open.
    ///
    /// Handlers registered while disconnected are attached to the new connection.
    pub fn connect(&self) {
        if self.is_connected() {
            return;
        }
        let connection = match self.transport.connect() {
            Ok(connection) => connection,
            Err(error) => {
                log::error!("failed to open tracking connection: {error}");
                return;
            }
        };
        log::debug!("tracking connection opened");

        let lifecycle = self.lifecycle_callbacks();
        let pending: Vec<(String, Callback)> = {
            let mut state = self.state.borrow_mut();
            state.connection = Some(connection.clone());
            state.lifecycle = lifecycle.clone();
            state
                .listeners
                .iter()
                .flat_map(|(message_type, listeners)| {
                    listeners
                        .iter()
                        .map(move |listener| (message_type.clone(), listener.callback.clone()))
                })
                .collect()
        };
        for (event, callback) in lifecycle {
            self.transport.on(&connection, event, callback);
        }
        for (message_type, callback) in pending {
            self.transport.on(&connection, &message_type, callback);
        }
    }

    /// Close the connection, if any, and forget every handler and room.
    pub fn disconnect(&self) {
        let (connection, listeners, lifecycle) = {
            let mut state = self.state.borrow_mut();
            state.rooms.clear();
            (
                state.connection.take(),
                std::mem::take(&mut state.listeners),
                std::mem::take(&mut state.lifecycle),
            )
        };
        for (message_type, listeners) in listeners {
            self.detach(connection.as_ref(), &message_type, &listeners);
        }
        let Some(connection) = connection else {
            return;
        };
        for (event, callback) in lifecycle {
            self.transport.off(&connection, event, &callback);
        }
        self.transport.disconnect(&connection);
        log::debug!("tracking connection closed");
    }

    /// Join the room of an order. Does nothing while disconnected.
    pub fn join_room(&self, order_id: &str) {
        let Some(connection) = self.connection() else {
            log::debug!("not connected, not joining room {order_id}");
            return;
        };
        self.state.borrow_mut().rooms.insert(order_id.to_string());
        signal(
            self.transport.as_ref(),
            &connection,
            &self.config.join_event,
            order_id,
        );
    }

    /// Leave the room of an order. Does nothing while disconnected.
    pub fn leave_room(&self, order_id: &str) {
        let Some(connection) = self.connection() else {
            log::debug!("not connected, not leaving room {order_id}");
            return;
        };
        self.state.borrow_mut().rooms.remove(order_id);
        signal(
            self.transport.as_ref(),
            &connection,
            &self.config.leave_event,
            order_id,
        );
    }

    /// Register a handler for pushed messages of a type.
    ///
    /// With [`ListenerMode::Replace`] the handler takes the place of the one tracked for this type,
    /// but the previous one stays attached to the connection.
    pub fn on_message<F>(&self, message_type: &str, handler: F) -> ListenerId
    where
        F: Fn(&Payload) + 'static,
    {
        let callback: Callback = Rc::new(handler);
        let (id, connection) = {
            let mut state = self.state.borrow_mut();
            let id = ListenerId(state.next_listener);
            state.next_listener += 1;
            let listener = Listener {
                id,
                callback: callback.clone(),
            };
            let listeners = state.listeners.entry(message_type.to_string()).or_default();
            match self.config.listener_mode {
                ListenerMode::FanOut => listeners.push(listener),
                ListenerMode::Replace => *listeners = vec![listener],
            }
            (id, state.connection.clone())
        };
        if let Some(connection) = connection {
            self.transport.on(&connection, message_type, callback);
        }
        log::debug!("registered handler {id:?} for {message_type}");
        id
    }

    /// Register a handler for pushed messages of a type, decoded as `M`.
    ///
    /// Payloads that do not decode are logged and skipped.
    pub fn on_message_as<M, F>(&self, message_type: &str, handler: F) -> ListenerId
    where
        M: DeserializeOwned + 'static,
        F: Fn(M) + 'static,
    {
        let name = message_type.to_string();
        self.on_message(message_type, move |payload| {
            match M::deserialize(payload) {
                Ok(message) => handler(message),
                Err(error) => log::warn!("failed to decode {name} message: {error}"),
            }
        })
    }

    /// Register a handler for order updates.
    pub fn on_order_update<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(OrderUpdate) + 'static,
    {
        let update_event = self.config.update_event.clone();
        self.on_message_as(&update_event, handler)
    }

    /// Unregister one handler.
    pub fn remove_handler(&self, id: ListenerId) {
        let removed = {
            let mut state = self.state.borrow_mut();
            let found = state.listeners.iter().find_map(|(message_type, listeners)| {
                listeners
                    .iter()
                    .position(|listener| listener.id == id)
                    .map(|index| (message_type.clone(), index))
            });
            found.map(|(message_type, index)| {
                let listeners = state.listeners.entry(message_type.clone()).or_default();
                let listener = listeners.remove(index);
                if listeners.is_empty() {
                    state.listeners.remove(&message_type);
                }
                (message_type, listener, state.connection.clone())
            })
        };
        if let Some((message_type, listener, connection)) = removed {
            self.detach(connection.as_ref(), &message_type, &[listener]);
        }
    }

    /// Unregister every handler for a message type.
    pub fn remove_listener(&self, message_type: &str) {
        let (listeners, connection) = {
            let mut state = self.state.borrow_mut();
            (
                state.listeners.remove(message_type).unwrap_or_default(),
                state.connection.clone(),
            )
        };
        self.detach(connection.as_ref(), message_type, &listeners);
    }

    /// Unregister every handler.
    pub fn remove_all_listeners(&self) {
        let (listeners, connection) = {
            let mut state = self.state.borrow_mut();
            (std::mem::take(&mut state.listeners), state.connection.clone())
        };
        for (message_type, listeners) in listeners {
            self.detach(connection.as_ref(), &message_type, &listeners);
        }
    }

    fn connection(&self) -> Option<T::Connection> {
        self.state.borrow().connection.clone()
    }

    fn detach(
        &self,
        connection: Option<&T::Connection>,
        message_type: &str,
        listeners: &[Listener],
    ) {
        for listener in listeners {
            if let Some(connection) = connection {
                self.transport.off(connection, message_type, &listener.callback);
            }
            log::debug!("removed handler {:?} for {message_type}", listener.id);
        }
    }

    fn lifecycle_callbacks(&self) -> Vec<(&'static str, Callback)> {
        let state = Rc::downgrade(&self.state);
        let transport = Rc::downgrade(&self.transport);
        let on_error: Callback =
            Rc::new(|payload: &Payload| log::warn!("tracking connection error: {payload}"));
        let on_disconnect: Callback = {
            let (state, transport) = (state.clone(), transport.clone());
            Rc::new(move |payload: &Payload| connection_lost(&state, &transport, payload))
        };
        let mut callbacks = vec![
            (CONNECT_ERROR_EVENT, on_error),
            (DISCONNECT_EVENT, on_disconnect),
        ];
        if self.config.rejoin_on_reconnect {
            let join_event = self.config.join_event.clone();
            let on_connect: Callback =
                Rc::new(move |_: &Payload| rejoin(&state, &transport, &join_event));
            callbacks.push((CONNECT_EVENT, on_connect));
        }
        callbacks
    }
}

/// Drop a connection the transport reported as lost, keeping rooms and handlers for the next one.
fn connection_lost<T: Transport>(
    state: &Weak<RefCell<ClientState<T::Connection>>>,
    transport: &Weak<T>,
    payload: &Payload,
) {
    let (Some(state), Some(transport)) = (state.upgrade(), transport.upgrade()) else {
        return;
    };
    let connection = {
        let mut state = state.borrow_mut();
        state.lifecycle.clear();
        state.connection.take()
    };
    if let Some(connection) = connection {
        log::info!("tracking connection lost: {payload}");
        transport.disconnect(&connection);
    }
}

/// Send a join for every room joined so far.
fn rejoin<T: Transport>(
    state: &Weak<RefCell<ClientState<T::Connection>>>,
    transport: &Weak<T>,
    join_event: &str,
) {
    let (Some(state), Some(transport)) = (state.upgrade(), transport.upgrade()) else {
        return;
    };
    let (connection, rooms) = {
        let state = state.borrow();
        let Some(connection) = state.connection.clone() else {
            return;
        };
        (connection, state.rooms.iter().cloned().collect::<Vec<_>>())
    };
    if !rooms.is_empty() {
        log::debug!("rejoining {} rooms after reconnect", rooms.len());
    }
    for room in rooms {
        signal(transport.as_ref(), &connection, join_event, &room);
    }
}

fn signal<T: Transport>(transport: &T, connection: &T::Connection, event: &str, order_id: &str) {
    match transport.send(connection, event, Payload::String(order_id.to_string())) {
        Ok(()) => log::debug!("sent {event} for {order_id}"),
        Err(error) => log::warn!("failed to send {event} for {order_id}: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryTransport, OrderStatus, SentEvent, TrackingView};
    use serde_json::json;
    use std::cell::Cell;

    fn client(config: TrackingConfig) -> LiveTrackingClient<MemoryTransport> {
        LiveTrackingClient::new(MemoryTransport::new(), config)
    }

    fn counter() -> (Rc<Cell<usize>>, impl Fn(&Payload)) {
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        (hits, move |_: &Payload| counter.set(counter.get() + 1))
    }

    fn joined(order_id: &str) -> SentEvent {
        SentEvent {
            event: "joinOrderRoom".into(),
            payload: json!(order_id),
        }
    }

    fn left(order_id: &str) -> SentEvent {
        SentEvent {
            event: "leaveOrderRoom".into(),
            payload: json!(order_id),
        }
    }

    #[test]
    fn connect_is_idempotent() {
        let client = client(TrackingConfig::default());
        client.connect();
        client.connect();
        assert!(client.is_connected());
        assert_eq!(client.transport().connections_opened(), 1);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let client = client(TrackingConfig::default());
        client.disconnect();
        client.connect();
        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
        assert_eq!(client.transport().open_connections(), 0);
    }

    #[test]
    fn failed_connect_stays_disconnected() {
        let client = client(TrackingConfig::default());
        client.transport().fail_connections(Some("offline"));
        client.connect();
        assert!(!client.is_connected());

        client.transport().fail_connections(None);
        client.connect();
        assert!(client.is_connected());
    }

    #[test]
    fn join_while_disconnected_does_nothing() {
        let client = client(TrackingConfig::default());
        client.join_room("ord-1");
        client.leave_room("ord-1");
        assert!(client.transport().sent().is_empty());
        assert!(client.joined_rooms().is_empty());
    }

    #[test]
    fn join_twice_leave_once() {
        let client = client(TrackingConfig::default());
        client.connect();
        client.join_room("ord-1");
        client.join_room("ord-1");
        assert_eq!(client.joined_rooms(), vec!["ord-1".to_string()]);
        client.leave_room("ord-1");

        assert!(client.joined_rooms().is_empty());
        assert_eq!(
            client.transport().sent(),
            vec![joined("ord-1"), joined("ord-1"), left("ord-1")]
        );
    }

    #[test]
    fn clones_share_connection() {
        let client = client(TrackingConfig::default());
        let other = client.clone();
        client.connect();
        other.join_room("ord-1");
        assert_eq!(client.joined_rooms(), vec!["ord-1".to_string()]);
        assert!(client == other);
    }

    #[test]
    fn remove_all_listeners_clears_everything() {
        let client = client(TrackingConfig::default());
        client.connect();
        let (hits, handler) = counter();
        let handler = Rc::new(handler);
        for message_type in ["a", "b", "c"] {
            let handler = handler.clone();
            client.on_message(message_type, move |payload| handler(payload));
        }
        client.remove_all_listeners();

        for message_type in ["a", "b", "c"] {
            assert_eq!(client.transport().emit(message_type, json!({})), 0);
            assert_eq!(client.listener_count(message_type), 0);
        }
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn fan_out_delivers_to_every_handler() {
        let client = client(TrackingConfig::default());
        client.connect();
        let (first_hits, first) = counter();
        let (second_hits, second) = counter();
        let first = client.on_message("orderStatusUpdate", first);
        client.on_message("orderStatusUpdate", second);

        client.transport().emit("orderStatusUpdate", json!({}));
        client.remove_handler(first);
        client.transport().emit("orderStatusUpdate", json!({}));

        assert_eq!(first_hits.get(), 1);
        assert_eq!(second_hits.get(), 2);
        assert_eq!(client.listener_count("orderStatusUpdate"), 1);
    }

    #[test]
    fn remove_listener_removes_type_only() {
        let client = client(TrackingConfig::default());
        client.connect();
        let (hits, handler) = counter();
        let handler = Rc::new(handler);
        let a = handler.clone();
        client.on_message("a", move |payload| a(payload));
        client.on_message("b", move |payload| handler(payload));
        client.remove_listener("a");

        client.transport().emit("a", json!(1));
        client.transport().emit("b", json!(1));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn replace_mode_keeps_stale_handler_attached() {
        let client = client(TrackingConfig::default().with_listener_mode(ListenerMode::Replace));
        client.connect();
        let (first_hits, first) = counter();
        let (second_hits, second) = counter();
        client.on_message("a", first);
        client.on_message("a", second);
        assert_eq!(client.listener_count("a"), 1);

        client.remove_listener("a");
        client.transport().emit("a", json!(1));
        assert_eq!(first_hits.get(), 1);
        assert_eq!(second_hits.get(), 0);

        client.disconnect();
        assert_eq!(client.transport().listener_count("a"), 0);
    }

    #[test]
    fn handlers_registered_before_connect_are_attached() {
        let client = client(TrackingConfig::default());
        let (hits, handler) = counter();
        client.on_message("a", handler);
        assert_eq!(client.transport().emit("a", json!(1)), 0);

        client.connect();
        client.transport().emit("a", json!(1));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn disconnect_clears_listeners_and_rooms() {
        let client = client(TrackingConfig::default());
        client.connect();
        client.join_room("ord-1");
        let (hits, handler) = counter();
        client.on_message("a", handler);
        client.disconnect();

        assert_eq!(client.listener_count("a"), 0);
        assert!(client.joined_rooms().is_empty());

        client.connect();
        client.transport().emit("a", json!(1));
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn disconnect_before_connect_clears_listeners() {
        let client = client(TrackingConfig::default());
        let (hits, handler) = counter();
        client.on_message("a", handler);
        client.disconnect();
        assert_eq!(client.listener_count("a"), 0);

        client.connect();
        assert_eq!(client.transport().emit("a", json!(1)), 0);
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn lost_connection_can_be_reopened() {
        let client = client(TrackingConfig::default());
        client.connect();
        client.join_room("ord-1");
        client.transport().emit(DISCONNECT_EVENT, json!("transport close"));

        assert!(!client.is_connected());
        assert_eq!(client.transport().open_connections(), 0);
        assert_eq!(client.joined_rooms(), vec!["ord-1".to_string()]);

        client.join_room("ord-2");
        assert_eq!(client.transport().sent(), vec![joined("ord-1")]);

        client.connect();
        assert!(client.is_connected());
        assert_eq!(client.transport().connections_opened(), 2);
        client.transport().clear_sent();
        client.transport().reconnect();
        assert_eq!(client.transport().sent(), vec![joined("ord-1")]);
    }

    #[test]
    fn handlers_survive_lost_connection() {
        let client = client(TrackingConfig::default());
        client.connect();
        let (hits, handler) = counter();
        client.on_message("a", handler);
        client.transport().emit(DISCONNECT_EVENT, Payload::Null);
        assert_eq!(client.listener_count("a"), 1);
        assert_eq!(client.transport().emit("a", json!(1)), 0);

        client.connect();
        client.transport().emit("a", json!(1));
        assert_eq!(hits.get(), 1);
        assert_eq!(client.transport().listener_count(DISCONNECT_EVENT), 1);
    }

    #[test]
    fn rooms_rejoined_after_reconnect() {
        let client = client(TrackingConfig::default());
        client.connect();
        client.join_room("ord-1");
        client.join_room("ord-2");
        client.leave_room("ord-2");
        client.transport().clear_sent();

        client.transport().reconnect();
        assert_eq!(client.transport().sent(), vec![joined("ord-1")]);
    }

    #[test]
    fn rejoin_can_be_disabled() {
        let client = client(TrackingConfig::default().with_rejoin_on_reconnect(false));
        client.connect();
        client.join_room("ord-1");
        client.transport().clear_sent();

        client.transport().reconnect();
        assert!(client.transport().sent().is_empty());
    }

    #[test]
    fn order_updates_fold_into_view_in_arrival_order() {
        let client = client(TrackingConfig::default());
        client.connect();
        client.join_room("ord-1");
        let view = Rc::new(RefCell::new(TrackingView::new("ord-1")));
        let target = view.clone();
        client.on_order_update(move |update| {
            target.borrow_mut().apply(update);
        });

        let transport = client.transport();
        transport.emit(
            "orderStatusUpdate",
            json!({"orderId": "ord-1", "status": "shipped", "location": "Addis Ababa"}),
        );
        transport.emit("orderStatusUpdate", json!({"unexpected": true}));
        transport.emit(
            "orderStatusUpdate",
            json!({"orderId": "ord-1", "status": "in_transit", "location": "Frankfurt"}),
        );

        let view = view.borrow();
        assert_eq!(view.status, Some(OrderStatus::InTransit));
        assert_eq!(view.location.as_deref(), Some("Frankfurt"));
        assert_eq!(view.updates.len(), 2);
    }

    #[test]
    fn handler_may_unregister_itself() {
        let client = client(TrackingConfig::default());
        client.connect();
        let hits = Rc::new(Cell::new(0));
        let counter = hits.clone();
        let handle = client.clone();
        client.on_message("once", move |_| {
            counter.set(counter.get() + 1);
            handle.remove_listener("once");
        });

        client.transport().emit("once", json!(1));
        client.transport().emit("once", json!(1));
        assert_eq!(hits.get(), 1);
    }
}
