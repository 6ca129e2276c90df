//! Connection lifecycle: connect, suspend, resume, disconnect, and the
//! bookkeeping of outstanding requests across them.

use tbcoap::coap::{Completion, Method};
use tbcoap::config::ClientConfig;
use tbcoap::{ConnectionState, Error, Event, Outcome, TransportError};

use crate::mock_ports::{Harness, SharedStorage, config, quiet_config};

#[test]
fn stored_token_connects_straight_to_active() {
    let h = Harness::new(quiet_config(), SharedStorage::with_token("tok123"));
    assert_eq!(h.client.state(), ConnectionState::Disconnected);

    assert_eq!(h.client.connect(), Ok(Outcome::Done));
    assert_eq!(h.client.state(), ConnectionState::Connected);
    assert_eq!(h.events(), vec![Event::Provisioned, Event::Active]);
    assert_eq!(h.client.access_token().unwrap().as_str(), "tok123");

    let observe = h.find("attributes").unwrap();
    assert_eq!(observe.path, "api/v1/tok123/attributes");
    assert_eq!(observe.method, Method::Get);
    assert!(observe.observe);
    assert_eq!(observe.content_format, 50);
    assert!(h.find("provision").is_none());
}

#[test]
fn session_start_reports_running_firmware() {
    let h = Harness::connected(quiet_config());
    let report = h.find("telemetry").unwrap();
    assert_eq!(report.path, "api/v1/tok123/telemetry");
    assert_eq!(report.method, Method::Post);
    assert_eq!(
        report.body(),
        r#"{"current_fw_title":"app","current_fw_version":"1.0.0"}"#
    );
}

#[test]
fn second_connect_reports_already() {
    let h = Harness::connected(quiet_config());
    let sent = h.sent().len();
    assert_eq!(h.client.connect(), Ok(Outcome::Already));
    assert_eq!(h.sent().len(), sent);
    assert_eq!(h.transport().connects, 1);
}

#[test]
fn connect_on_init_connects_in_constructor() {
    let config = ClientConfig {
        connect_on_init: true,
        ..quiet_config()
    };
    let h = Harness::new(config, SharedStorage::with_token("tok123"));
    assert_eq!(h.client.state(), ConnectionState::Connected);
}

#[test]
fn unreachable_server_stays_disconnected() {
    let h = Harness::new(quiet_config(), SharedStorage::with_token("tok123"));
    h.transport().fail_connect = true;
    assert_eq!(h.client.connect(), Err(Error::NotConnected));
    assert_eq!(h.client.state(), ConnectionState::Disconnected);
    assert!(h.sent().is_empty());
    assert!(h.events().is_empty());
}

#[test]
fn suspend_and_resume_cycle() {
    let h = Harness::connected(quiet_config());
    let observation = h.find("attributes").unwrap().id;

    assert_eq!(h.client.suspend(), Ok(Outcome::Done));
    assert_eq!(h.client.state(), ConnectionState::Suspended);
    assert!(h.transport().cancelled.contains(&observation));
    assert_eq!(h.transport().suspends, 1);
    assert_eq!(h.client.suspend(), Ok(Outcome::Already));
    assert_eq!(h.client.connect(), Ok(Outcome::Already));

    assert_eq!(h.client.resume(), Ok(Outcome::Done));
    assert_eq!(h.client.state(), ConnectionState::Connected);
    assert_eq!(h.sent_to("attributes").len(), 2);
    assert_eq!(h.client.resume(), Ok(Outcome::Already));

    assert_eq!(
        h.events(),
        vec![
            Event::Provisioned,
            Event::Active,
            Event::Suspended,
            Event::Active
        ]
    );
}

#[test]
fn suspend_and_resume_need_a_session() {
    let h = Harness::new(quiet_config(), SharedStorage::with_token("tok123"));
    assert_eq!(h.client.suspend(), Err(Error::InvalidState));
    assert_eq!(h.client.resume(), Err(Error::InvalidState));
    assert_eq!(h.client.disconnect(), Ok(Outcome::Already));
}

#[test]
fn refused_suspend_keeps_the_session() {
    let h = Harness::connected(quiet_config());
    h.transport().fail_suspend = true;

    assert_eq!(
        h.client.suspend(),
        Err(Error::Transport(TransportError::Io(-1)))
    );
    assert_eq!(h.client.state(), ConnectionState::Connected);
    // Observation was cancelled and re-established.
    assert_eq!(h.transport().cancelled.len(), 1);
    assert_eq!(h.sent_to("attributes").len(), 2);
}

#[test]
fn failed_resume_tears_down() {
    let h = Harness::connected(quiet_config());
    h.client.suspend().unwrap();
    h.transport().fail_resume = true;

    assert_eq!(
        h.client.resume(),
        Err(Error::Transport(TransportError::Io(-1)))
    );
    assert_eq!(h.client.state(), ConnectionState::Disconnected);
    assert_eq!(h.events().last(), Some(&Event::Disconnected));
    assert_eq!(h.client.requests_in_flight(), 0);
}

#[test]
fn disconnect_abandons_everything_in_flight() {
    let h = Harness::connected(quiet_config());
    assert!(h.client.requests_in_flight() > 0);

    assert_eq!(h.client.disconnect(), Ok(Outcome::Done));
    assert_eq!(h.client.state(), ConnectionState::Disconnected);
    assert_eq!(h.client.requests_in_flight(), 0);
    assert_eq!(h.transport().closes, 1);
    assert_eq!(h.events().last(), Some(&Event::Disconnected));

    assert_eq!(h.client.disconnect(), Ok(Outcome::Already));
    assert_eq!(h.transport().closes, 1);
}

#[test]
fn reconnect_after_disconnect() {
    let h = Harness::connected(quiet_config());
    h.client.disconnect().unwrap();
    assert_eq!(h.client.connect(), Ok(Outcome::Done));
    assert_eq!(h.client.state(), ConnectionState::Connected);
    assert_eq!(h.transport().connects, 2);
}

#[test]
fn completion_for_an_abandoned_request_is_ignored() {
    let h = Harness::connected(quiet_config());
    let old = h.find("attributes").unwrap().id;
    h.client.disconnect().unwrap();
    h.client.connect().unwrap();
    let in_flight = h.client.requests_in_flight();

    h.client.handle_completion(
        Completion::content(old, br#"{"report_interval":30}"#)
            .unwrap()
            .more(),
    );

    assert!(h.attribute_pushes().is_empty());
    assert_eq!(h.client.shared_attributes().report_interval, None);
    assert_eq!(h.client.requests_in_flight(), in_flight);
}

#[test]
fn queued_completions_run_on_poll() {
    let h = Harness::connected(quiet_config());
    let observation = h.find("attributes").unwrap().id;

    h.client
        .deliver(
            Completion::content(observation, br#"{"report_interval":30}"#)
                .unwrap()
                .more(),
        )
        .unwrap();
    assert!(h.attribute_pushes().is_empty());

    h.client.poll();
    assert_eq!(h.attribute_pushes().len(), 1);
    assert_eq!(h.client.shared_attributes().report_interval, Some(30));
}

#[test]
fn attribute_pushes_merge_into_snapshot() {
    let h = Harness::connected(quiet_config());
    h.push_attributes(br#"{"report_interval":30}"#);
    h.push_attributes(br#"{"shared":{"fw_checksum_algorithm":"SHA256"}}"#);

    let attrs = h.client.shared_attributes();
    assert_eq!(attrs.report_interval, Some(30));
    assert_eq!(attrs.fw_checksum_algorithm.as_deref(), Some("SHA256"));
    // Each push reaches the handler with only its own fields.
    let pushes = h.attribute_pushes();
    assert_eq!(pushes.len(), 2);
    assert_eq!(pushes[1].report_interval, None);
}

#[test]
fn observation_stays_open_across_notifications() {
    let h = Harness::connected(quiet_config());
    let before = h.client.requests_in_flight();
    h.push_attributes(br#"{"report_interval":5}"#);
    h.push_attributes(br#"{"report_interval":6}"#);
    assert_eq!(h.client.requests_in_flight(), before);

    let id = h.find("attributes").unwrap().id;
    h.reply(id, br#"{"report_interval":7}"#);
    assert_eq!(h.client.requests_in_flight(), before - 1);
    assert_eq!(h.client.shared_attributes().report_interval, Some(7));
}

#[test]
fn transport_cancelled_observation_ends_quietly() {
    let h = Harness::connected(quiet_config());
    let before = h.client.requests_in_flight();
    let events = h.events();

    let id = h.find("attributes").unwrap().id;
    h.client
        .handle_completion(Completion::failed(id, TransportError::Cancelled));

    assert_eq!(h.client.requests_in_flight(), before - 1);
    assert_eq!(h.client.state(), ConnectionState::Connected);
    assert_eq!(h.events(), events);
    assert!(h.attribute_pushes().is_empty());

    // Already gone, so disconnect has nothing to cancel.
    h.client.disconnect().unwrap();
    assert!(h.transport().cancelled.is_empty());
}

#[test]
fn secure_transport_leaves_token_out_of_paths() {
    let config = ClientConfig {
        provisioning: None,
        security_tags: vec![42],
        ..quiet_config()
    };
    let h = Harness::secure(config);
    assert_eq!(h.client.connect(), Ok(Outcome::Done));
    assert_eq!(h.client.state(), ConnectionState::Connected);
    assert_eq!(h.find("attributes").unwrap().path, "api/v1/attributes");
    assert_eq!(h.find("telemetry").unwrap().path, "api/v1/telemetry");
    assert!(h.find("provision").is_none());
    assert_eq!(h.events(), vec![Event::Active]);
}

#[test]
fn insecure_transport_without_credentials_is_rejected() {
    let config = ClientConfig {
        provisioning: None,
        ..config()
    };
    let err = tbcoap::Client::new(
        config,
        crate::mock_ports::MockTransport::default(),
        SharedStorage::default(),
        crate::mock_ports::MockImage::default(),
        (),
    )
    .err();
    assert_eq!(
        err,
        Some(Error::Config("access_token or provisioning credentials required"))
    );
}

#[test]
fn forget_token_only_while_disconnected() {
    let h = Harness::connected(quiet_config());
    assert_eq!(h.client.forget_token(), Err(Error::InvalidState));

    h.client.disconnect().unwrap();
    h.client.forget_token().unwrap();
    assert_eq!(h.storage.token(), None);
    assert_eq!(h.client.access_token(), None);
}
