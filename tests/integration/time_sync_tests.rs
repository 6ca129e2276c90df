//! Server time synchronisation over client RPC.

use tbcoap::coap::Completion;
use tbcoap::codec::Codec;
use tbcoap::config::ClientConfig;
use tbcoap::model::{Telemetry, TimeseriesEntry};
use tbcoap::{Event, TransportError};

use crate::mock_ports::{Harness, Sent, config};

const SERVER_MS: i64 = 1_700_000_000_000;

fn sync_requests(h: &Harness) -> Vec<Sent> {
    h.sent_to("rpc")
        .into_iter()
        .filter(|s| s.body().contains("getCurrentTime"))
        .collect()
}

#[test]
fn sync_is_requested_on_connect() {
    let h = Harness::connected(config());
    let rq = sync_requests(&h);
    assert_eq!(rq.len(), 1);
    assert_eq!(rq[0].path, "api/v1/tok123/rpc");
    assert_eq!(rq[0].body(), r#"{"method":"getCurrentTime","params":{}}"#);
    assert_eq!(h.client.time_ms(), None);
}

#[test]
fn answer_sets_server_time() {
    let h = Harness::connected(config());
    h.clock.advance(250);
    h.reply(sync_requests(&h)[0].id, SERVER_MS.to_string().as_bytes());

    assert_eq!(h.events().last(), Some(&Event::TimeUpdate));
    assert_eq!(h.client.time_ms(), Some(SERVER_MS));

    h.clock.advance(1500);
    assert_eq!(h.client.time_ms(), Some(SERVER_MS + 1500));
    assert_eq!(h.client.time_secs(), Some((SERVER_MS + 1500) / 1000));
}

#[test]
fn synced_time_survives_disconnect() {
    let h = Harness::connected(config());
    h.reply(sync_requests(&h)[0].id, SERVER_MS.to_string().as_bytes());
    h.client.disconnect().unwrap();
    h.clock.advance(100);
    assert_eq!(h.client.time_ms(), Some(SERVER_MS + 100));
}

#[test]
fn sync_refreshes_after_interval() {
    let h = Harness::connected(config());
    h.reply(sync_requests(&h)[0].id, SERVER_MS.to_string().as_bytes());

    h.clock.advance(3_599_999);
    h.client.poll();
    assert_eq!(sync_requests(&h).len(), 1);

    h.clock.advance(1);
    h.client.poll();
    assert_eq!(sync_requests(&h).len(), 2);
}

#[test]
fn failed_sync_is_retried() {
    let h = Harness::connected(config());
    h.client.handle_completion(Completion::failed(
        sync_requests(&h)[0].id,
        TransportError::Timeout,
    ));
    assert_eq!(h.client.time_ms(), None);

    h.clock.advance(9_999);
    h.client.poll();
    assert_eq!(sync_requests(&h).len(), 1);
    h.clock.advance(1);
    h.client.poll();
    assert_eq!(sync_requests(&h).len(), 2);
}

#[test]
fn garbage_answer_is_a_failure() {
    let h = Harness::connected(config());
    h.reply(sync_requests(&h)[0].id, b"{\"time\":\"soon\"}");
    assert_eq!(h.client.time_ms(), None);
    assert!(!h.events().contains(&Event::TimeUpdate));
}

#[test]
fn unanswered_sync_is_not_duplicated() {
    let h = Harness::connected(config());
    h.clock.advance(60_000);
    h.client.poll();
    h.client.poll();
    assert_eq!(sync_requests(&h).len(), 1);
}

#[test]
fn suspended_session_does_not_sync() {
    let h = Harness::connected(config());
    h.reply(sync_requests(&h)[0].id, SERVER_MS.to_string().as_bytes());
    h.client.suspend().unwrap();

    h.clock.advance(10 * 3_600_000);
    h.client.poll();
    assert_eq!(sync_requests(&h).len(), 1);

    // Resuming syncs again straight away.
    h.client.resume().unwrap();
    assert_eq!(sync_requests(&h).len(), 2);
}

#[test]
fn disabled_sync_sends_nothing() {
    let mut c = config();
    c.time.enabled = false;
    let h = Harness::connected(c);
    h.clock.advance(10 * 3_600_000);
    h.client.poll();
    assert!(sync_requests(&h).is_empty());
}

#[test]
fn timestamped_telemetry_uses_server_time() {
    let c = ClientConfig {
        telemetry_always_timestamp: true,
        ..config()
    };
    let h = Harness::connected(c);
    h.reply(sync_requests(&h)[0].id, SERVER_MS.to_string().as_bytes());
    h.clock.advance(20);

    let values = Telemetry {
        uptime: Some(3),
        ..Telemetry::default()
    };
    h.client.send_telemetry(&values).unwrap();
    let batch = Codec::Json
        .decode_timeseries_batch(&h.last_sent().payload)
        .unwrap();
    assert_eq!(
        batch,
        vec![TimeseriesEntry {
            ts: SERVER_MS + 20,
            values
        }]
    );
}
