//! # WebAssembly Live Cache
//!
//! This crate provides the client-side data layer of a browser WebAssembly storefront: an
//! in-memory request cache for queries whose inputs change over time, and a client for live order
//! tracking over a push connection.
//!
//! A [`FetchCache`] serves results younger than a stale threshold from memory, aborts superseded
//! requests and only ever lets the most recently started request update its state. A
//! [`LiveTrackingClient`] shares one connection between any number of callers, who join order
//! rooms and fold pushed [`OrderUpdate`]s into a [`TrackingView`].
//!
//! Connections go through the [`Transport`] trait. A WebSocket implementation is available with the
//! `websocket` feature, and hooks for the Yew framework with the `yew` feature.
mod clock;
mod config;
mod entry;
mod error;
mod fetch;
mod key;
mod memory;
mod operation;
mod tracking;
mod transport;
mod update;
#[cfg(feature = "websocket")]
pub mod websocket;
#[cfg(feature = "yew")]
pub mod yew;

pub use crate::{
    clock::*, config::*, entry::*, error::*, fetch::*, key::*, memory::*, operation::*,
    tracking::*, transport::*, update::*,
};
