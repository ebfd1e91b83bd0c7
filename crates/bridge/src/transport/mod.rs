// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Byte/string transport adapters used by reader drivers: serial,
//! TCP, BLE, and HTTPS streaming. Each adapter exposes the same
//! conceptual contract (`connect`, `write`, `next`, `close`,
//! `is_connected`) so drivers can be written against [`Transport`]
//! without caring which physical medium carries the bytes.

pub mod ble;
pub mod https_stream;
pub mod serial;
pub mod tcp;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::BridgeError;

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BridgeError>> + Send + 'a>>;

/// One item yielded by [`Transport::next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes read from the underlying medium.
    Data(Bytes),
    /// The adapter's idle timer fired with no bytes pending: any partial
    /// frame a driver was accumulating should be discarded rather than
    /// matched against late-arriving bytes from a different frame.
    IdleFlush,
}

/// Conceptual contract shared by every transport adapter (spec: serial,
/// TCP, BLE, HTTPS stream). A driver owns its transport exclusively —
/// adapters never hold application-level state.
pub trait Transport: Send {
    fn connect(&mut self) -> TransportFuture<'_, ()>;

    fn write(&mut self, data: Bytes) -> TransportFuture<'_, ()>;

    /// Await the next event: a chunk of bytes, an idle-flush signal, or
    /// `Ok(None)` on clean end-of-stream.
    fn next(&mut self) -> TransportFuture<'_, Option<TransportEvent>>;

    fn close(&mut self) -> TransportFuture<'_, ()>;

    fn is_connected(&self) -> bool;
}

/// Drain complete `\n`/`\r`-terminated lines from `buf`, leaving any
/// trailing partial line in place. Shared by every line-oriented driver
/// (X714, generic SERIAL/TCP passthrough) so the delimiter logic isn't
/// duplicated per driver.
pub fn drain_lines(buf: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    loop {
        let Some(pos) = buf.iter().position(|b| *b == b'\n' || *b == b'\r') else {
            break;
        };
        let mut line: Vec<u8> = buf.drain(..=pos).collect();
        line.pop(); // drop the delimiter itself
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
