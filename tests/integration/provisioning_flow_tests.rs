//! Integration tests for the provisioning flow.
//!
//! Verifies the end-to-end sequence: a device with no token posts its
//! provisioning credentials, stores the token from the response, and only
//! then opens its attribute observation under the new token.

use tbcoap::coap::{Completion, Method};
use tbcoap::config::ClientConfig;
use tbcoap::{ConnectionState, Event, Outcome, TransportError};

use crate::mock_ports::{Harness, SharedStorage, quiet_config};

const SUCCESS: &[u8] =
    br#"{"status":"SUCCESS","credentialsType":"ACCESS_TOKEN","credentialsValue":"tok123"}"#;

#[test]
fn provisioning_full_flow() {
    let h = Harness::new(quiet_config(), SharedStorage::default());

    assert_eq!(h.client.connect(), Ok(Outcome::Done));
    assert_eq!(h.client.state(), ConnectionState::Connecting);

    // Only the provisioning request goes out until a token exists.
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    let rq = &sent[0];
    assert_eq!(rq.path, "api/v1/provision");
    assert_eq!(rq.method, Method::Post);
    assert_eq!(rq.content_format, 50);
    assert_eq!(
        rq.body(),
        r#"{"deviceName":"sample-device","provisionDeviceKey":"K","provisionDeviceSecret":"S"}"#
    );

    h.reply(rq.id, SUCCESS);

    assert_eq!(h.storage.token().as_deref(), Some("tok123"));
    assert_eq!(h.client.access_token().unwrap().as_str(), "tok123");
    assert_eq!(h.client.state(), ConnectionState::Connected);
    assert_eq!(h.events(), vec![Event::Provisioned, Event::Active]);
    assert_eq!(h.sent()[1].path, "api/v1/tok123/attributes");
    assert!(h.sent()[1].observe);
}

#[test]
fn provisioned_token_is_reused_on_reconnect() {
    let h = Harness::new(quiet_config(), SharedStorage::default());
    h.client.connect().unwrap();
    h.reply(h.last_sent().id, SUCCESS);

    h.client.disconnect().unwrap();
    h.client.connect().unwrap();
    assert_eq!(h.sent_to("provision").len(), 1);
    assert_eq!(h.client.state(), ConnectionState::Connected);
}

#[test]
fn binary_codec_still_provisions_with_json() {
    let config = ClientConfig {
        codec: tbcoap::codec::Codec::Binary,
        ..quiet_config()
    };
    let h = Harness::new(config, SharedStorage::default());
    h.client.connect().unwrap();
    let rq = h.last_sent();
    assert_eq!(rq.content_format, 50);
    assert!(rq.body().starts_with(r#"{"deviceName""#));
}

#[test]
fn rejected_provisioning_disconnects() {
    let h = Harness::new(quiet_config(), SharedStorage::default());
    h.client.connect().unwrap();
    h.reply(h.last_sent().id, br#"{"status":"FAILURE","errorMsg":"bad key"}"#);

    assert_eq!(h.client.state(), ConnectionState::Disconnected);
    assert_eq!(h.events(), vec![Event::Disconnected]);
    assert_eq!(h.storage.token(), None);
    assert_eq!(h.client.requests_in_flight(), 0);
}

#[test]
fn lost_provisioning_request_disconnects() {
    let h = Harness::new(quiet_config(), SharedStorage::default());
    h.client.connect().unwrap();
    h.client
        .handle_completion(Completion::failed(h.last_sent().id, TransportError::Timeout));
    assert_eq!(h.client.state(), ConnectionState::Disconnected);
}

#[test]
fn static_token_skips_provisioning() {
    let config = ClientConfig {
        access_token: Some("static-token".into()),
        ..quiet_config()
    };
    let h = Harness::new(config, SharedStorage::default());
    h.client.connect().unwrap();

    assert!(h.find("provision").is_none());
    assert_eq!(h.find("attributes").unwrap().path, "api/v1/static-token/attributes");
    assert_eq!(h.client.state(), ConnectionState::Connected);
}

#[test]
fn unpersisted_token_still_serves_the_session() {
    let storage = SharedStorage {
        fail_write: true,
        ..SharedStorage::default()
    };
    let h = Harness::new(quiet_config(), storage);
    h.client.connect().unwrap();
    h.reply(h.last_sent().id, SUCCESS);

    assert_eq!(h.client.state(), ConnectionState::Connected);
    assert_eq!(h.storage.token(), None);
    assert_eq!(h.client.access_token().unwrap().as_str(), "tok123");
}

#[test]
fn disconnect_while_provisioning_drops_the_answer() {
    let h = Harness::new(quiet_config(), SharedStorage::default());
    h.client.connect().unwrap();
    let id = h.last_sent().id;

    assert_eq!(h.client.disconnect(), Ok(Outcome::Done));
    h.reply(id, SUCCESS);

    assert_eq!(h.client.state(), ConnectionState::Disconnected);
    assert_eq!(h.storage.token(), None);
}

#[test]
fn forgotten_token_is_provisioned_again() {
    let h = Harness::new(quiet_config(), SharedStorage::with_token("old"));
    h.client.connect().unwrap();
    h.client.disconnect().unwrap();
    h.client.forget_token().unwrap();

    h.client.connect().unwrap();
    assert_eq!(h.client.state(), ConnectionState::Connecting);
    let rq = h.last_sent();
    assert_eq!(rq.path, "api/v1/provision");

    h.reply(rq.id, SUCCESS);
    assert_eq!(h.storage.token().as_deref(), Some("tok123"));
    assert_eq!(h.find("attributes").unwrap().path, "api/v1/tok123/attributes");
}
