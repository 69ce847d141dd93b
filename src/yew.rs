//! Hooks for the Yew framework.
//!
//! [`use_fetch`] gives every component its own [`FetchCache`]. [`use_order_tracking`] needs a
//! [`LiveTrackingClient`] in context, provided by the application root:
//!
//! ```ignore
//! let client = LiveTrackingClient::new(WebSocketTransport::new(url), TrackingConfig::default());
//! html! {
//!     <ContextProvider<LiveTrackingClient<WebSocketTransport>> context={client}>
//!         <App />
//!     </ContextProvider<LiveTrackingClient<WebSocketTransport>>>
//! }
//! ```
use crate::{
    Fetch, FetchCache, FetchError, FetchState, LiveTrackingClient, Operation, OrderUpdate,
    TrackingView, Transport,
};
use serde::Serialize;
use std::rc::Rc;
use wasm_bindgen_futures::spawn_local;
use yew::prelude::*;

/// State returned by [`use_fetch`].
pub struct UseFetchHandle<T> {
    state: FetchState<T>,
    cache: FetchCache<T>,
}

impl<T: Clone + 'static> UseFetchHandle<T> {
    pub fn data(&self) -> Option<&T> {
        self.state.data.as_ref()
    }

    pub fn loading(&self) -> bool {
        self.state.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.state.error.as_deref()
    }

    pub fn state(&self) -> &FetchState<T> {
        &self.state
    }

    /// Run the request again, ignoring the cache.
    pub async fn refetch(&self) -> Result<T, FetchError> {
        self.cache.refetch().await
    }
}

#[hook]
pub fn use_fetch<O, D>(operation: O, dependencies: D) -> UseFetchHandle<O::Value>
where
    O: Operation + 'static,
    D: Serialize + PartialEq + 'static,
{
    log::debug!("use_fetch({})", std::any::type_name::<O>());
    let cache = use_state(FetchCache::<O::Value>::default);
    let state = use_state(FetchState::<O::Value>::default);

    {
        let cache = (*cache).clone();
        let setter = state.setter();
        use_effect_with_deps(
            move |_| {
                let subscription = cache.subscribe(move |next| setter.set(next.clone()));
                move || {
                    cache.unsubscribe(subscription);
                    cache.cancel();
                }
            },
            (),
        );
    }

    {
        let cache = (*cache).clone();
        use_effect_with_deps(
            move |dependencies| {
                match cache.request(dependencies, operation) {
                    Ok(Fetch::Started(pending)) => spawn_local(async move {
                        let _ = pending.await;
                    }),
                    Ok(_) => {}
                    Err(error) => log::error!("failed to request data: {error}"),
                }
                || ()
            },
            dependencies,
        );
    }

    UseFetchHandle {
        state: (*state).clone(),
        cache: (*cache).clone(),
    }
}

/// Changes applied to a [`TrackingView`] held in a reducer.
pub enum TrackingAction {
    /// Replace the view, typically with the order fetched over REST.
    Seed(TrackingView),
    Update(OrderUpdate),
}

impl Reducible for TrackingView {
    type Action = TrackingAction;

    fn reduce(self: Rc<Self>, action: TrackingAction) -> Rc<Self> {
        match action {
            TrackingAction::Seed(view) => Rc::new(view),
            TrackingAction::Update(update) => {
                let mut view = (*self).clone();
                if view.apply(update) {
                    Rc::new(view)
                } else {
                    self
                }
            }
        }
    }
}

/// Keep an order's tracking view current with pushed updates.
///
/// Whenever `snapshot` changes, the view is reset to it and the room of its order is joined. The
/// room is left and the handler removed again when the snapshot changes or the component unmounts.
#[hook]
pub fn use_order_tracking<T>(snapshot: Option<TrackingView>) -> TrackingView
where
    T: Transport + 'static,
{
    let client = use_context::<LiveTrackingClient<T>>().expect("Tracking client not present");
    let view = use_reducer(TrackingView::default);
    let dispatcher = view.dispatcher();

    use_effect_with_deps(
        move |snapshot: &Option<TrackingView>| {
            let subscription = snapshot
                .clone()
                .filter(|snapshot| !snapshot.order_id.is_empty())
                .map(|snapshot| {
                    let order_id = snapshot.order_id.clone();
                    dispatcher.dispatch(TrackingAction::Seed(snapshot));
                    client.connect();
                    client.join_room(&order_id);
                    let listener = client.on_order_update(move |update| {
                        dispatcher.dispatch(TrackingAction::Update(update))
                    });
                    (order_id, listener)
                });
            move || {
                if let Some((order_id, listener)) = subscription {
                    client.remove_handler(listener);
                    client.leave_room(&order_id);
                }
            }
        },
        snapshot,
    );

    (*view).clone()
}
