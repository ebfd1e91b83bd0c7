// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP webhook sink: posts every event as a JSON body to a configured
//! URL. Grounded on the source's `Actions.send_payload` (a bare
//! `httpx.AsyncClient().post(endpoint, json=payload, timeout=10.0)`).

use std::time::Duration;

use reqwest::Client;
use tracing::info;

use crate::error::BridgeError;
use crate::event::Event;
use crate::sinks::{Sink, SinkFuture};

const POST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpSink {
    url: String,
    client: Client,
}

impl HttpSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), client: Client::new() }
    }
}

impl Sink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    fn publish<'a>(&'a self, event: &'a Event) -> SinkFuture<'a> {
        Box::pin(async move {
            let resp = self
                .client
                .post(&self.url)
                .timeout(POST_TIMEOUT)
                .json(event)
                .send()
                .await
                .map_err(|e| BridgeError::Sink(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(BridgeError::Sink(format!("POST {}: HTTP {}", self.url, resp.status())));
            }
            info!(url = self.url.as_str(), device = event.device.as_str(), "payload posted to http");
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
