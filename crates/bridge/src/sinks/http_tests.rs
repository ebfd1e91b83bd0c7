// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::event::{Event, EventData};

fn sample_event() -> Event {
    Event::connection("READER-1", true)
}

#[test]
fn sink_name_is_http() {
    let sink = HttpSink::new("http://127.0.0.1:1/webhook");
    assert_eq!(sink.name(), "http");
}

#[tokio::test]
async fn publish_surfaces_a_sink_error_when_the_endpoint_is_unreachable() {
    let sink = HttpSink::new("http://127.0.0.1:1/webhook");
    let event = sample_event();
    let err = sink.publish(&event).await.unwrap_err();
    assert!(matches!(err, BridgeError::Sink(_)));
}

#[test]
fn event_data_serializes_as_plain_bool_for_connection_events() {
    let event = sample_event();
    assert_eq!(event.event_data, EventData::Bool(true));
}
