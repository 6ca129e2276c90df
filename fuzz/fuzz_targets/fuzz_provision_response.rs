//! Fuzz target: provisioning response parsing.
//!
//! A token is only ever returned non-empty and within capacity.
//!
//! cargo fuzz run fuzz_provision_response

#![no_main]

use libfuzzer_sys::fuzz_target;
use tbcoap::provision::{TOKEN_CAPACITY, parse_response};

fuzz_target!(|data: &[u8]| {
    if let Ok(token) = parse_response(data) {
        assert!(!token.is_empty());
        assert!(token.len() <= TOKEN_CAPACITY);
    }
});
