//! Fuzz target: binary shared-attribute and timeseries decoding.
//!
//! cargo fuzz run fuzz_attributes_binary

#![no_main]

use libfuzzer_sys::fuzz_target;
use tbcoap::codec::Codec;

fuzz_target!(|data: &[u8]| {
    if let Ok(attrs) = Codec::Binary.decode_attributes(data) {
        let mut buf = [0u8; 1024];
        let len = Codec::Binary
            .encode_attributes(&attrs, &mut buf)
            .expect("decoded attributes must re-encode");
        assert_eq!(Codec::Binary.decode_attributes(&buf[..len]), Ok(attrs));
    }

    // Length-prefixed records must never read past the input.
    let _ = Codec::Binary.decode_timeseries_batch(data);
});
