// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTPS transport for readers that expose a REST control plane plus a
//! long-lived newline-delimited JSON event stream (R700_IOT). TLS
//! verification is disabled because these readers ship self-signed
//! certificates; this adapter never leaves the configured host.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, Method};
use serde_json::Value;

use crate::error::BridgeError;
use crate::transport::{Transport, TransportEvent, TransportFuture};

const CONTROL_TIMEOUT: Duration = Duration::from_secs(3);

pub struct HttpsStreamTransport {
    base_url: String,
    username: String,
    password: String,
    client: Client,
    stream: Option<reqwest::Response>,
    buf: Vec<u8>,
}

impl HttpsStreamTransport {
    pub fn new(host: &str, username: impl Into<String>, password: impl Into<String>) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        Ok(Self {
            base_url: format!("https://{host}/api/v1"),
            username: username.into(),
            password: password.into(),
            client,
            stream: None,
            buf: Vec::new(),
        })
    }

    /// Issue a control-plane request (`PUT`/`POST`) against a path under
    /// the reader's `/api/v1` root. Used for interface selection,
    /// profile start/stop, GPO writes, and tag-access (EPC write)
    /// requests.
    pub async fn control(&self, method: Method, path: &str, body: Option<Value>) -> Result<(), BridgeError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .client
            .request(method, &url)
            .timeout(CONTROL_TIMEOUT)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.map_err(|e| BridgeError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BridgeError::Transport(format!("{method} {path}: HTTP {}", resp.status())));
        }
        Ok(())
    }

    async fn open_stream(&mut self) -> Result<(), BridgeError> {
        let url = format!("{}/data/stream", self.base_url);
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(BridgeError::Transport(format!("GET /data/stream: HTTP {}", resp.status())));
        }
        self.stream = Some(resp);
        Ok(())
    }
}

impl Transport for HttpsStreamTransport {
    fn connect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move { self.open_stream().await })
    }

    fn write(&mut self, data: Bytes) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let value: Value = serde_json::from_slice(&data)
                .map_err(|e| BridgeError::Validation(format!("control payload must be JSON: {e}")))?;
            let path = value
                .get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| BridgeError::Validation("control payload missing \"path\"".into()))?
                .to_string();
            let method = match value.get("method").and_then(Value::as_str) {
                Some("PUT") => Method::PUT,
                _ => Method::POST,
            };
            let body = value.get("body").cloned();
            self.control(method, &path, body).await
        })
    }

    fn next(&mut self) -> TransportFuture<'_, Option<TransportEvent>> {
        Box::pin(async move {
            loop {
                if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = self.buf.drain(..=pos).collect();
                    if line.len() > 1 {
                        return Ok(Some(TransportEvent::Data(Bytes::from(line[..line.len() - 1].to_vec()))));
                    }
                    continue;
                }
                let resp = self.stream.as_mut().ok_or(BridgeError::Transport("not connected".into()))?;
                match resp.chunk().await.map_err(|e| BridgeError::Transport(e.to_string()))? {
                    Some(chunk) => self.buf.extend_from_slice(&chunk),
                    None => return Ok(None),
                }
            }
        })
    }

    fn close(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.stream = None;
            self.buf.clear();
            Ok(())
        })
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
#[path = "https_stream_tests.rs"]
mod tests;
