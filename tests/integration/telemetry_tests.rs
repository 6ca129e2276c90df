//! Outbound traffic: telemetry, timeseries batches, client RPC, and the
//! request pool limits behind them.

use tbcoap::coap::{Completion, Method, Response, ResponseCode};
use tbcoap::codec::Codec;
use tbcoap::config::ClientConfig;
use tbcoap::model::{RpcRequest, Telemetry, TimeseriesEntry};
use tbcoap::pool::MAX_REQUESTS;
use tbcoap::{Error, TransportError};

use crate::mock_ports::{Harness, SharedStorage, quiet_config};

fn uptime(secs: u64) -> Telemetry {
    Telemetry {
        uptime: Some(secs),
        ..Telemetry::default()
    }
}

fn entries(count: usize) -> Vec<TimeseriesEntry> {
    (0..count)
        .map(|i| TimeseriesEntry {
            ts: 1_700_000_000_000 + i as i64,
            values: Telemetry {
                uptime: Some(i as u64),
                rssi: Some(-70),
                ..Telemetry::default()
            },
        })
        .collect()
}

/// Connected, with only the attribute observation outstanding.
fn idle(config: ClientConfig) -> Harness {
    let h = Harness::connected(config);
    h.ack_telemetry();
    assert_eq!(h.client.requests_in_flight(), 1);
    h
}

#[test]
fn telemetry_while_disconnected_is_not_ready() {
    let h = Harness::new(quiet_config(), SharedStorage::with_token("tok123"));
    assert_eq!(h.client.send_telemetry(&uptime(1)), Err(Error::NotReady));
    assert_eq!(h.client.send_telemetry_raw(b"{}"), Err(Error::NotReady));
    assert_eq!(h.client.send_timeseries(&entries(2)), Err(Error::NotReady));
    assert_eq!(h.client.requests_in_flight(), 0);
    assert!(h.sent().is_empty());
}

#[test]
fn telemetry_while_suspended_is_not_ready() {
    let h = idle(quiet_config());
    h.client.suspend().unwrap();
    assert_eq!(h.client.send_telemetry(&uptime(1)), Err(Error::NotReady));
}

#[test]
fn telemetry_is_posted_as_json() {
    let h = idle(quiet_config());
    h.client.send_telemetry(&uptime(42)).unwrap();

    let rq = h.last_sent();
    assert_eq!(rq.method, Method::Post);
    assert_eq!(rq.path, "api/v1/tok123/telemetry");
    assert_eq!(rq.content_format, 50);
    assert_eq!(rq.body(), r#"{"uptime":42}"#);

    h.reply(rq.id, b"");
    assert_eq!(h.client.requests_in_flight(), 1);
}

#[test]
fn binary_codec_uses_octet_stream() {
    let config = ClientConfig {
        codec: Codec::Binary,
        ..quiet_config()
    };
    let h = idle(config);
    h.client.send_telemetry(&uptime(42)).unwrap();

    let rq = h.last_sent();
    assert_eq!(rq.content_format, 42);
    assert_eq!(Codec::Binary.decode_telemetry(&rq.payload), Ok(uptime(42)));
}

#[test]
fn raw_payload_is_posted_untouched() {
    let h = idle(quiet_config());
    h.client.send_telemetry_raw(br#"{"custom":true}"#).unwrap();
    assert_eq!(h.last_sent().body(), r#"{"custom":true}"#);
}

#[test]
fn always_timestamp_wraps_records() {
    let config = ClientConfig {
        telemetry_always_timestamp: true,
        ..quiet_config()
    };
    let h = idle(config);
    h.client.send_telemetry(&uptime(7)).unwrap();

    // No server time yet, so the stamp is zero.
    let batch = Codec::Json.decode_timeseries_batch(&h.last_sent().payload).unwrap();
    assert_eq!(
        batch,
        vec![TimeseriesEntry {
            ts: 0,
            values: uptime(7)
        }]
    );
}

#[test]
fn pool_exhaustion_is_no_space() {
    let h = idle(quiet_config());
    for i in 1..MAX_REQUESTS {
        h.client.send_telemetry(&uptime(i as u64)).unwrap();
    }
    assert_eq!(h.client.requests_in_flight(), MAX_REQUESTS);

    let sent = h.sent().len();
    assert_eq!(h.client.send_telemetry(&uptime(99)), Err(Error::NoSpace));
    assert_eq!(h.sent().len(), sent);

    // A completion frees its slot again.
    h.reply(h.last_sent().id, b"");
    h.client.send_telemetry(&uptime(99)).unwrap();
}

#[test]
fn refused_submit_frees_the_slot() {
    let h = idle(quiet_config());
    h.transport().fail_submit = true;
    assert_eq!(
        h.client.send_telemetry(&uptime(1)),
        Err(Error::Transport(TransportError::Io(-5)))
    );
    assert_eq!(h.client.requests_in_flight(), 1);
}

#[test]
fn timeseries_split_over_requests_and_rejoined() {
    let h = idle(quiet_config());
    let before = h.sent().len();
    let all = entries(12);
    let requests = h.client.send_timeseries(&all).unwrap();
    assert!(requests > 1, "12 entries should not fit one payload");
    assert_eq!(h.client.requests_in_flight(), 1 + requests);

    let batches = h.sent().split_off(before);
    assert_eq!(batches.len(), requests);
    let rejoined: Vec<TimeseriesEntry> = batches
        .iter()
        .flat_map(|s| Codec::Json.decode_timeseries_batch(&s.payload).unwrap())
        .collect();
    assert_eq!(rejoined, all);
}

#[test]
fn timeseries_is_all_or_nothing() {
    let h = idle(quiet_config());
    let sent = h.sent().len();

    assert_eq!(h.client.send_timeseries(&entries(200)), Err(Error::NoSpace));
    assert_eq!(h.client.requests_in_flight(), 1);
    assert_eq!(h.sent().len(), sent);
}

#[test]
fn empty_timeseries_sends_nothing() {
    let h = idle(quiet_config());
    assert_eq!(h.client.send_timeseries(&[]), Ok(0));
    assert_eq!(h.client.requests_in_flight(), 1);
}

#[test]
fn rpc_reply_reaches_handler_by_id() {
    let h = idle(quiet_config());
    let request = RpcRequest::new("getSchedule", r#"{"day":1}"#).unwrap();
    let first = h.client.send_rpc_request(&request).unwrap();
    let second = h.client.send_rpc_request(&request).unwrap();
    assert_ne!(first, second);

    let rq = h.last_sent();
    assert_eq!(rq.id, second);
    assert_eq!(rq.path, "api/v1/tok123/rpc");
    assert_eq!(rq.body(), r#"{"method":"getSchedule","params":{"day":1}}"#);

    // Answered out of order; each reply carries its own id.
    h.reply(second, br#"{"slots":[20]}"#);
    h.reply(first, br#"{"slots":[8]}"#);
    assert_eq!(
        h.rpc_replies(),
        vec![
            (second, r#"{"slots":[20]}"#.to_owned()),
            (first, r#"{"slots":[8]}"#.to_owned()),
        ]
    );
    assert_eq!(h.client.requests_in_flight(), 1);
}

#[test]
fn rpc_error_response_is_not_delivered() {
    let h = idle(quiet_config());
    let request = RpcRequest::new("getSchedule", "{}").unwrap();

    let id = h.client.send_rpc_request(&request).unwrap();
    h.client.handle_completion(Completion {
        id,
        result: Ok(Response::new(ResponseCode::NOT_FOUND, b"").unwrap()),
        last_block: true,
    });

    let id = h.client.send_rpc_request(&request).unwrap();
    h.client
        .handle_completion(Completion::failed(id, TransportError::Timeout));

    assert!(h.rpc_replies().is_empty());
    assert_eq!(h.client.requests_in_flight(), 1);
}

#[test]
fn rpc_with_invalid_params_is_rejected() {
    let h = idle(quiet_config());
    let request = RpcRequest::new("getSchedule", "{not json").unwrap();
    assert!(matches!(
        h.client.send_rpc_request(&request),
        Err(Error::Encode(_))
    ));
    assert_eq!(h.client.requests_in_flight(), 1);
}
