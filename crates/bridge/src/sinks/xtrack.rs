// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! X-Track platform sink: posts tag reads as the vendor's fixed XML
//! envelope. Grounded on the source's `Actions.post_tag_xtrack`, which
//! only fires for tag events (other event kinds have no `ant`/`epc` to
//! report) and ignores send failures rather than surfacing them to the
//! caller; here that's expressed as [`BridgeError::Sink`], which the
//! pipeline already logs-and-continues on instead of propagating.

use std::time::Duration;

use reqwest::Client;
use tracing::info;

use crate::error::BridgeError;
use crate::event::{Event, EventData};
use crate::sinks::{Sink, SinkFuture};

const POST_TIMEOUT: Duration = Duration::from_secs(10);

/// Render the fixed `ReportRead` XML envelope for one tag read.
fn report_read_xml(device: &str, ant: i32, epc: &str) -> String {
    format!(
        "<msg>\n            <command>ReportRead</command>\n            \
         <data>EVENT=|DEVICENAME={device}|ANTENNANAME={ant}|TAGID={epc}|</data>\n            \
         <cmpl>STATE=|DATA1=|DATA2=|DATA3=|DATA4=|DATA5=|</cmpl>\n            </msg>"
    )
}

pub struct XtrackSink {
    url: String,
    client: Client,
}

impl XtrackSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), client: Client::new() }
    }
}

impl Sink for XtrackSink {
    fn name(&self) -> &'static str {
        "xtrack"
    }

    fn publish<'a>(&'a self, event: &'a Event) -> SinkFuture<'a> {
        Box::pin(async move {
            let EventData::Tag(tag) = &event.event_data else {
                return Ok(());
            };
            let body = report_read_xml(&tag.device, tag.ant, &tag.epc);
            let resp = self
                .client
                .post(&self.url)
                .timeout(POST_TIMEOUT)
                .header("Content-Type", "application/xml")
                .body(body)
                .send()
                .await
                .map_err(|e| BridgeError::Sink(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(BridgeError::Sink(format!("POST {}: HTTP {}", self.url, resp.status())));
            }
            info!(url = self.url.as_str(), epc = tag.epc.as_str(), "tag posted to xtrack");
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "xtrack_tests.rs"]
mod tests;
