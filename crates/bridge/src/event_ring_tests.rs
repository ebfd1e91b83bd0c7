// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::event::Event;

fn event(n: u32) -> Event {
    Event::connection(format!("D{n}"), true)
}

#[test]
fn push_keeps_newest_first() {
    let mut ring = EventRing::new();
    ring.push(event(1));
    ring.push(event(2));
    let snap = ring.snapshot();
    assert_eq!(snap[0].device, "D2");
    assert_eq!(snap[1].device, "D1");
}

#[test]
fn push_evicts_oldest_past_capacity() {
    let mut ring = EventRing::new();
    for n in 0..(CAPACITY as u32 + 5) {
        ring.push(event(n));
    }
    assert_eq!(ring.len(), CAPACITY);
    let snap = ring.snapshot();
    assert_eq!(snap[0].device, format!("D{}", CAPACITY as u32 + 4));
}

#[test]
fn empty_ring_reports_empty() {
    let ring = EventRing::new();
    assert!(ring.is_empty());
    assert_eq!(ring.len(), 0);
}
