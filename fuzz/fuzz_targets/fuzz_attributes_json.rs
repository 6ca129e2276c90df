//! Fuzz target: JSON shared-attribute decoding.
//!
//! Anything the decoder accepts must encode again and decode to the same
//! value.
//!
//! cargo fuzz run fuzz_attributes_json

#![no_main]

use libfuzzer_sys::fuzz_target;
use tbcoap::codec::Codec;

fuzz_target!(|data: &[u8]| {
    let Ok(attrs) = Codec::Json.decode_attributes(data) else {
        return;
    };
    let mut buf = [0u8; 1024];
    let len = Codec::Json
        .encode_attributes(&attrs, &mut buf)
        .expect("decoded attributes must re-encode");
    assert_eq!(Codec::Json.decode_attributes(&buf[..len]), Ok(attrs));
});
