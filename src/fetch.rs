//! Request cache for a single logical query.
//!
//! A [`FetchCache`] wraps one query whose inputs change over time. Every distinct dependency list
//! gets its own [`CacheEntry`]; entries younger than the configured stale threshold are served
//! without running the operation again.
//!
//! At most one request is in flight per cache. Starting a request aborts the previous one, and
//! every request carries a generation number that is checked again when it resolves, so only
//! the most recently started request can ever reach the visible [`FetchState`], no matter in which
//! order responses arrive.
use crate::{CacheConfig, CacheEntry, CacheKey, Clock, FetchError, Operation, SystemClock};
use futures::{
    future::{AbortHandle, Abortable, Aborted, FutureExt, LocalBoxFuture},
    Future,
};
use serde::Serialize;
use std::{
    cell::RefCell,
    collections::BTreeMap,
    fmt,
    pin::Pin,
    rc::{Rc, Weak},
    task::{Context, Poll},
};

type BoxedOperation<T> = Rc<dyn Fn() -> LocalBoxFuture<'static, Result<T, String>>>;
type Subscriber<T> = Rc<dyn Fn(&FetchState<T>)>;

/// State visible to callers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchState<T> {
    /// Last successful value, kept while a new request is loading or after it failed.
    pub data: Option<T>,
    pub loading: bool,
    /// Message of the last operation failure.
    pub error: Option<String>,
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }
}

/// Outcome of [`FetchCache::request`].
pub enum Fetch<T> {
    /// A fresh cached value was served, the operation was not invoked.
    Cached(T),
    /// A request was started. It must be driven to completion, for example with `spawn_local`.
    Started(PendingFetch<T>),
    /// A request for the same dependencies is already in flight.
    Unchanged,
}

impl<T: fmt::Debug> fmt::Debug for Fetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cached(value) => f.debug_tuple("Cached").field(value).finish(),
            Self::Started(_) => f.write_str("Started"),
            Self::Unchanged => f.write_str("Unchanged"),
        }
    }
}

/// Request started by a [`FetchCache`].
///
/// Resolves to the value or error of this request. The result is also written into the cache
/// state, unless the request was superseded in the meantime, in which case it resolves to
/// [`FetchError::Cancelled`] and leaves the state alone.
///
/// Dropping it before it resolves cancels the request: `loading` is cleared and the next request
/// for the same dependencies starts over.
#[must_use = "requests do nothing unless polled"]
pub struct PendingFetch<T> {
    future: LocalBoxFuture<'static, Result<T, FetchError>>,
    release: Option<Box<dyn FnOnce()>>,
}

impl<T> Future for PendingFetch<T> {
    type Output = Result<T, FetchError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().future.poll_unpin(cx)
    }
}

impl<T> Drop for PendingFetch<T> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Handle for a registered state listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

struct InFlight {
    generation: u64,
    handle: AbortHandle,
}

struct Inner<T> {
    entries: BTreeMap<CacheKey, CacheEntry<T>>,
    current: Option<CacheKey>,
    operation: Option<BoxedOperation<T>>,
    in_flight: Option<InFlight>,
    generation: u64,
    state: FetchState<T>,
    subscribers: BTreeMap<SubscriberId, Subscriber<T>>,
    next_subscriber: u64,
}

impl<T> Default for Inner<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            current: None,
            operation: None,
            in_flight: None,
            generation: 0,
            state: FetchState::default(),
            subscribers: BTreeMap::new(),
            next_subscriber: 0,
        }
    }
}

impl<T> Inner<T> {
    fn cancel_in_flight(&mut self) -> bool {
        match self.in_flight.take() {
            Some(in_flight) => {
                log::debug!("aborting request {}", in_flight.generation);
                in_flight.handle.abort();
                true
            }
            None => false,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        matches!(&self.in_flight, Some(in_flight) if in_flight.generation == generation)
    }
}

impl<T: Clone> Inner<T> {
    /// Look up a servable value, dropping the entry if it has gone stale.
    fn fresh(
        &mut self,
        key: &CacheKey,
        now: std::time::Duration,
        config: &CacheConfig,
    ) -> Option<T> {
        let entry = self.entries.get(key)?;
        if entry.is_fresh(now, config.stale_threshold) {
            return Some(entry.value().clone());
        }
        log::trace!("entry for {key} is stale");
        self.entries.remove(key);
        None
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        self.cancel_in_flight();
    }
}

/// Cache for one logical query.
///
/// Cloning is cheap and yields a handle to the same cache.
pub struct FetchCache<T> {
    inner: Rc<RefCell<Inner<T>>>,
    config: Rc<CacheConfig>,
    clock: Rc<dyn Clock>,
}

impl<T> Clone for FetchCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
        }
    }
}

impl<T> PartialEq for FetchCache<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> Default for FetchCache<T> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl<T: Clone + 'static> FetchCache<T> {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }

    pub fn with_clock<C: Clock + 'static>(config: CacheConfig, clock: C) -> Self {
        Self {
            inner: Default::default(),
            config: Rc::new(config),
            clock: Rc::new(clock),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> FetchState<T> {
        self.inner.borrow().state.clone()
    }

    /// Number of stored entries, including ones that have gone stale but were not looked up since.
    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fresh cached value for these dependencies, if any. Does not touch the state.
    pub fn cached<D: Serialize + ?Sized>(&self, dependencies: &D) -> Result<Option<T>, FetchError> {
        let key = CacheKey::from_dependencies(dependencies)?;
        let now = self.clock.now();
        let inner = self.inner.borrow();
        Ok(inner
            .entries
            .get(&key)
            .filter(|entry| entry.is_fresh(now, self.config.stale_threshold))
            .map(|entry| entry.value().clone()))
    }

    /// Register a listener that is called with the new state after every change.
    pub fn subscribe<F: Fn(&FetchState<T>) + 'static>(&self, listener: F) -> SubscriberId {
        let mut inner = self.inner.borrow_mut();
        let id = SubscriberId(inner.next_subscriber);
        inner.next_subscriber += 1;
        inner.subscribers.insert(id, Rc::new(listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.borrow_mut().subscribers.remove(&id);
    }

    /// Request the value for a dependency list.
    ///
    /// Serves a fresh cached value directly. Otherwise aborts whatever request is in flight and
    /// starts a new one with `operation`, which is also remembered for [`refetch`](Self::refetch).
    pub fn request<D, O>(&self, dependencies: &D, operation: O) -> Result<Fetch<T>, FetchError>
    where
        D: Serialize + ?Sized,
        O: Operation<Value = T> + 'static,
    {
        let key = CacheKey::from_dependencies(dependencies)?;
        let now = self.clock.now();
        let fetch = {
            let mut inner = self.inner.borrow_mut();
            if inner.current.as_ref() == Some(&key) && inner.in_flight.is_some() {
                log::trace!("request for {key} already in flight");
                return Ok(Fetch::Unchanged);
            }
            inner.cancel_in_flight();
            inner.current = Some(key.clone());
            let operation = erase(operation);
            inner.operation = Some(operation.clone());
            match inner.fresh(&key, now, &self.config) {
                Some(value) => {
                    log::trace!("serving {key} from cache");
                    inner.state = FetchState {
                        data: Some(value.clone()),
                        loading: false,
                        error: None,
                    };
                    Fetch::Cached(value)
                }
                None => Fetch::Started(self.start(&mut inner, key, operation)),
            }
        };
        notify(&self.inner);
        Ok(fetch)
    }

    /// Run the current request again, ignoring any cached value.
    ///
    /// Unlike [`request`](Self::request), failures are returned to the caller as well as being
    /// written into the state.
    pub async fn refetch(&self) -> Result<T, FetchError> {
        let pending = {
            let mut inner = self.inner.borrow_mut();
            let key = inner.current.clone().ok_or(FetchError::NoQuery)?;
            let operation = inner.operation.clone().ok_or(FetchError::NoQuery)?;
            inner.entries.remove(&key);
            inner.cancel_in_flight();
            self.start(&mut inner, key, operation)
        };
        notify(&self.inner);
        pending.await
    }

    /// Abort the request in flight, if any.
    ///
    /// Its result will not be written. The dependencies are forgotten, so requesting the same ones
    /// again starts a new request.
    pub fn cancel(&self) {
        let changed = {
            let mut inner = self.inner.borrow_mut();
            if inner.cancel_in_flight() {
                inner.current = None;
                inner.state.loading = false;
                true
            } else {
                false
            }
        };
        if changed {
            notify(&self.inner);
        }
    }

    fn start(
        &self,
        inner: &mut Inner<T>,
        key: CacheKey,
        operation: BoxedOperation<T>,
    ) -> PendingFetch<T> {
        inner.generation += 1;
        let generation = inner.generation;
        let (handle, registration) = AbortHandle::new_pair();
        inner.in_flight = Some(InFlight { generation, handle });
        inner.state.loading = true;
        inner.state.error = None;
        log::debug!("starting request {generation} for {key}");

        let request = Abortable::new(operation(), registration);
        let weak = Rc::downgrade(&self.inner);
        let clock = self.clock.clone();
        let future = async move {
            let result = request.await;
            settle(&weak, generation, key, result, clock.as_ref())
        };
        let weak = Rc::downgrade(&self.inner);
        PendingFetch {
            future: future.boxed_local(),
            release: Some(Box::new(move || release(&weak, generation))),
        }
    }
}

fn erase<O: Operation + 'static>(operation: O) -> BoxedOperation<O::Value> {
    let operation = Rc::new(operation);
    Rc::new(move || {
        let operation = operation.clone();
        async move { operation.send().await.map_err(|error| error.to_string()) }.boxed_local()
    })
}

/// Write the result of a request, if it is still the current one.
fn settle<T: Clone>(
    inner: &Weak<RefCell<Inner<T>>>,
    generation: u64,
    key: CacheKey,
    result: Result<Result<T, String>, Aborted>,
    clock: &dyn Clock,
) -> Result<T, FetchError> {
    let Some(inner) = inner.upgrade() else {
        log::debug!("cache dropped before request {generation} resolved");
        return Err(FetchError::Cancelled);
    };
    let settled = {
        let mut guard = inner.borrow_mut();
        if !guard.is_current(generation) {
            log::debug!("discarding superseded request {generation}");
            return Err(FetchError::Cancelled);
        }
        guard.in_flight = None;
        match result {
            Err(Aborted) => return Err(FetchError::Cancelled),
            Ok(Ok(value)) => {
                guard
                    .entries
                    .insert(key, CacheEntry::new(value.clone(), clock.now()));
                guard.state = FetchState {
                    data: Some(value.clone()),
                    loading: false,
                    error: None,
                };
                Ok(value)
            }
            Ok(Err(message)) => {
                log::warn!("request {generation} for {key} failed: {message}");
                guard.state.loading = false;
                guard.state.error = Some(message.clone());
                Err(FetchError::Operation(message))
            }
        }
    };
    notify(&inner);
    settled
}

/// Abort a request whose future was dropped, if it is still the current one.
fn release<T: Clone>(inner: &Weak<RefCell<Inner<T>>>, generation: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let released = match inner.try_borrow_mut() {
        Ok(mut guard) if guard.is_current(generation) => {
            guard.cancel_in_flight();
            guard.current = None;
            guard.state.loading = false;
            true
        }
        _ => false,
    };
    if released {
        log::debug!("request {generation} dropped before it resolved");
        notify(&inner);
    }
}

/// Call every subscriber with the current state. Must not be called while the state is borrowed.
fn notify<T: Clone>(inner: &Rc<RefCell<Inner<T>>>) {
    let (state, subscribers) = {
        let inner = inner.borrow();
        let subscribers: Vec<_> = inner.subscribers.values().cloned().collect();
        (inner.state.clone(), subscribers)
    };
    for subscriber in subscribers {
        subscriber(&state);
    }
}
