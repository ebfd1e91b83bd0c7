// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sink fan-out targets for pipeline events: a relational database, an
//! HTTP webhook, an MQTT topic, and the X-Track platform integration.
//! Every sink implements the same narrow [`Sink`] trait so the
//! pipeline can hold a flat `Vec<Arc<dyn Sink>>` and treat them
//! uniformly; each sink is responsible for its own error isolation —
//! a publish failure never propagates past [`Sink::publish`]'s
//! `Result` into the pipeline's control flow.

pub mod db;
pub mod http;
pub mod mqtt;
pub mod xtrack;

use std::future::Future;
use std::pin::Pin;

use crate::error::BridgeError;
use crate::event::Event;

/// Future type returned by [`Sink::publish`]. Sinks are held as
/// `Arc<dyn Sink>` in the pipeline's fan-out list, so the trait must
/// stay object-safe; that rules out `async fn` in the trait itself
/// (same constraint as [`crate::driver::DriverFuture`] and
/// [`crate::transport::TransportFuture`]).
pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = Result<(), BridgeError>> + Send + 'a>>;

pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;

    fn publish<'a>(&'a self, event: &'a Event) -> SinkFuture<'a>;
}
