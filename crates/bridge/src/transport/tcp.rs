// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP transport: dial with a fixed timeout, a periodic keep-alive
//! line, and exponential backoff tracking the caller can consult
//! between reconnect attempts.

use std::net::IpAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::BridgeError;
use crate::transport::{Transport, TransportEvent, TransportFuture};

const DIAL_TIMEOUT: Duration = Duration::from_secs(3);
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(3);
const BACKOFF_INITIAL: Duration = Duration::from_secs(3);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Validate and parse an IP literal, rejecting anything that would make
/// `dial` fall through to DNS resolution (and its stalls).
pub fn parse_ip_strict(addr: &str) -> Result<IpAddr, BridgeError> {
    addr.parse::<IpAddr>()
        .map_err(|_| BridgeError::Config(format!("{addr} is not a literal IP address")))
}

/// Exponential backoff that doubles from [`BACKOFF_INITIAL`] up to
/// [`BACKOFF_MAX`], used between reconnect attempts for TCP-backed
/// drivers.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectBackoff {
    current: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self { current: BACKOFF_INITIAL }
    }
}

impl ReconnectBackoff {
    pub fn next(&mut self) -> Duration {
        let this = self.current;
        self.current = (self.current * 2).min(BACKOFF_MAX);
        this
    }

    pub fn reset(&mut self) {
        self.current = BACKOFF_INITIAL;
    }
}

pub struct TcpTransport {
    ip: IpAddr,
    port: u16,
    keep_alive_line: &'static [u8],
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port, keep_alive_line: b"ping\n", stream: None }
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let addr = (self.ip, self.port);
            let stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
                .await
                .map_err(|_| BridgeError::Transport(format!("dial {}:{} timed out", self.ip, self.port)))?
                .map_err(|e| BridgeError::Transport(format!("dial {}:{}: {e}", self.ip, self.port)))?;
            stream.set_nodelay(true).map_err(|e| BridgeError::Transport(e.to_string()))?;
            self.stream = Some(stream);
            Ok(())
        })
    }

    fn write(&mut self, data: Bytes) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let stream = self.stream.as_mut().ok_or(BridgeError::Transport("not connected".into()))?;
            stream.write_all(&data).await.map_err(|e| BridgeError::Transport(e.to_string()))
        })
    }

    fn next(&mut self) -> TransportFuture<'_, Option<TransportEvent>> {
        Box::pin(async move {
            let stream = self.stream.as_mut().ok_or(BridgeError::Transport("not connected".into()))?;
            let mut chunk = [0u8; 1024];
            loop {
                tokio::select! {
                    result = stream.read(&mut chunk) => {
                        let n = result.map_err(|e| BridgeError::Transport(e.to_string()))?;
                        if n == 0 {
                            return Ok(None);
                        }
                        return Ok(Some(TransportEvent::Data(Bytes::from(chunk[..n].to_vec()))));
                    }
                    _ = tokio::time::sleep(KEEP_ALIVE_INTERVAL) => {
                        stream.write_all(self.keep_alive_line).await.map_err(|e| BridgeError::Transport(e.to_string()))?;
                    }
                }
            }
        })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if let Some(mut stream) = self.stream.take() {
                let _ = stream.shutdown().await;
            }
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
#[path = "tcp_tests.rs"]
mod tests;
