// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn drain_lines_splits_on_newline_and_keeps_remainder() {
    let mut buf = b"line one\nline two\rpartial".to_vec();
    let lines = drain_lines(&mut buf);
    assert_eq!(lines, vec![b"line one".to_vec(), b"line two".to_vec()]);
    assert_eq!(buf, b"partial".to_vec());
}

#[test]
fn drain_lines_skips_empty_lines() {
    let mut buf = b"\n\none\n".to_vec();
    let lines = drain_lines(&mut buf);
    assert_eq!(lines, vec![b"one".to_vec()]);
    assert!(buf.is_empty());
}

#[test]
fn drain_lines_on_no_delimiter_leaves_buffer_untouched() {
    let mut buf = b"no delimiter here".to_vec();
    let lines = drain_lines(&mut buf);
    assert!(lines.is_empty());
    assert_eq!(buf, b"no delimiter here".to_vec());
}
