// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn encode_sgtin96(filter: u8, partition: u8, company_prefix: u64, item_ref: u64, serial: u64) -> String {
    let (_, _, ir_bits, _) = PARTITION_TABLE[partition as usize];
    let mut rest: u128 = 0;
    rest |= (SGTIN96_HEADER as u128) << 50;
    rest |= (filter as u128) << 47;
    rest |= (partition as u128) << 44;
    rest |= (company_prefix as u128) << ir_bits;
    rest |= item_ref as u128;
    let value = (rest << 38) | (serial as u128);
    format!("{value:024x}")
}

#[test]
fn decodes_partition_5_to_expected_gtin14() {
    let epc = encode_sgtin96(1, 5, 1_234_567, 512_345, 42);
    assert_eq!(decode_sgtin96(&epc), Some("51234567123450".to_string()));
}

#[test]
fn decodes_partition_0_single_digit_item_ref() {
    // partition 0: company prefix 12 digits, item ref 1 digit (the indicator only).
    let epc = encode_sgtin96(1, 0, 614_141_000_123, 7, 99);
    let gtin = decode_sgtin96(&epc).expect("valid SGTIN-96");
    assert_eq!(gtin.len(), 14);
    assert!(gtin.starts_with('7'));
}

#[test]
fn rejects_non_sgtin_header() {
    // Header byte 0x00 instead of 0x30.
    let epc = "000000000000000000000000";
    assert_eq!(decode_sgtin96(epc), None);
}

#[test]
fn rejects_wrong_length() {
    assert_eq!(decode_sgtin96("1234"), None);
}

#[test]
fn rejects_non_hex_characters() {
    assert_eq!(decode_sgtin96(&"z".repeat(24)), None);
}
