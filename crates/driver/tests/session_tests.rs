//! Session lifecycle integration tests
//!
//! Drives attach, open, write, keypad echo and detach against the in-memory
//! transport.
//!
//! # Test Scenarios
//! - Attach and endpoint resolution failures
//! - Exclusive open and reopen after close
//! - Write truncation at the end of the line
//! - Keypad echo and the delete sequence
//! - Detach ordering and reference release
//!
//! Run with: `cargo test -p driver --test session_tests`

use driver::test_utils::{
    DEFAULT_TEST_TIMEOUT, DISPLAY_ENDPOINT, KEYPAD_ENDPOINT, MockTransport, display_descriptors,
};
use driver::{
    ChannelRole, DeviceRegistry, DriverError, EndpointDescriptor, InterruptSignal, SessionOptions,
    TransferClass, lifecycle,
};
use protocol::KeyCode;
use std::sync::Arc;

fn attach_mock(transport: &Arc<MockTransport>) -> lifecycle::Attachment {
    lifecycle::attach(
        0,
        &display_descriptors(),
        transport.clone(),
        SessionOptions::default(),
    )
    .expect("attach failed")
}

/// Deliver one key and wait until `expected_total` display packets went out
fn press(transport: &MockTransport, key: u8, expected_total: usize) {
    assert!(transport.complete_in(KEYPAD_ENDPOINT, &[key]));
    assert!(
        transport.wait_for_sent(DISPLAY_ENDPOINT, expected_total, DEFAULT_TEST_TIMEOUT),
        "display packets for key {:?} not sent",
        key as char
    );
}

// ============================================================================
// Attach Tests
// ============================================================================

#[test]
fn test_attach_arms_keypad() {
    let transport = Arc::new(MockTransport::with_auto_complete());
    let attachment = attach_mock(&transport);

    let session = attachment.session();
    assert_eq!(session.minor(), 0);
    assert_eq!(session.column(), 0);
    assert!(session.is_listening());
    assert!(!session.is_open());
    assert_eq!(session.bulk_out().address, DISPLAY_ENDPOINT);
    assert_eq!(session.interrupt_in().address, KEYPAD_ENDPOINT);
    assert_eq!(transport.in_flight(KEYPAD_ENDPOINT), 1);
    assert_eq!(transport.submissions(DISPLAY_ENDPOINT), 0);

    attachment.detach();
}

#[test]
fn test_attach_without_keypad_endpoint() {
    let transport = Arc::new(MockTransport::new());
    let descriptors = [EndpointDescriptor::new(0x02, TransferClass::Bulk, 64)];

    let result = lifecycle::attach(0, &descriptors, transport.clone(), SessionOptions::default());
    assert!(matches!(
        result,
        Err(DriverError::MissingChannel(ChannelRole::InterruptIn))
    ));
    assert_eq!(transport.submissions(KEYPAD_ENDPOINT), 0);
}

#[test]
fn test_attach_without_display_endpoint() {
    let transport = Arc::new(MockTransport::new());
    let descriptors = [
        // Bulk but IN: not usable for the display
        EndpointDescriptor::new(0x82, TransferClass::Bulk, 64),
        EndpointDescriptor::new(0x81, TransferClass::Interrupt, 8),
    ];

    let result = lifecycle::attach(0, &descriptors, transport.clone(), SessionOptions::default());
    assert!(matches!(
        result,
        Err(DriverError::MissingChannel(ChannelRole::BulkOut))
    ));
}

#[test]
fn test_attach_fails_when_keypad_submit_rejected() {
    let transport = Arc::new(MockTransport::new());
    transport.set_reject(Some("no bandwidth"));

    let result = lifecycle::attach(
        0,
        &display_descriptors(),
        transport.clone(),
        SessionOptions::default(),
    );
    assert!(matches!(result, Err(DriverError::TransferRejected(_))));
}

// ============================================================================
// Open / Close Tests
// ============================================================================

#[test]
fn test_open_is_exclusive() {
    let transport = Arc::new(MockTransport::with_auto_complete());
    let attachment = attach_mock(&transport);
    let session = attachment.session();

    let handle = session.open().unwrap();
    assert!(session.is_open());
    assert!(matches!(session.open(), Err(DriverError::AlreadyOpen)));

    // The losing open leaves the first client untouched
    assert!(session.is_open());
    assert_eq!(handle.write(b"ok", &InterruptSignal::new()).unwrap(), 2);
    assert_eq!(transport.sent(DISPLAY_ENDPOINT), vec![vec![0x01, b'o', b'k']]);

    handle.close();
    assert!(!session.is_open());

    let handle = session.open().unwrap();
    drop(handle);
    assert!(!session.is_open());
}

#[test]
fn test_read_returns_nothing() {
    let transport = Arc::new(MockTransport::with_auto_complete());
    let attachment = attach_mock(&transport);
    let handle = attachment.session().open().unwrap();

    let mut buffer = [0u8; 8];
    assert_eq!(handle.read(&mut buffer).unwrap(), 0);
}

// ============================================================================
// Write Tests
// ============================================================================

#[test]
fn test_write_sends_data_frame() {
    let transport = Arc::new(MockTransport::with_auto_complete());
    let attachment = attach_mock(&transport);
    let handle = attachment.session().open().unwrap();
    let signal = InterruptSignal::new();

    assert_eq!(handle.write(b"HI", &signal).unwrap(), 2);
    assert_eq!(attachment.session().column(), 2);
    assert_eq!(transport.sent(DISPLAY_ENDPOINT), vec![vec![0x01, b'H', b'I']]);
}

#[test]
fn test_write_truncates_at_line_end() {
    let transport = Arc::new(MockTransport::with_auto_complete());
    let attachment = attach_mock(&transport);
    let handle = attachment.session().open().unwrap();
    let signal = InterruptSignal::new();

    assert_eq!(handle.write(b"ABCDEFGHIJKLMNOPQRST", &signal).unwrap(), 20);
    assert_eq!(attachment.session().column(), 16);

    let sent = transport.sent(DISPLAY_ENDPOINT);
    assert_eq!(sent.len(), 1);
    assert_eq!(&sent[0][..], b"\x01ABCDEFGHIJKLMNOP");

    // Line full: consumed but nothing sent
    assert_eq!(handle.write(b"X", &signal).unwrap(), 1);
    assert_eq!(transport.sent(DISPLAY_ENDPOINT).len(), 1);
    assert_eq!(attachment.session().column(), 16);
}

#[test]
fn test_write_split_across_calls() {
    let transport = Arc::new(MockTransport::with_auto_complete());
    let attachment = attach_mock(&transport);
    let handle = attachment.session().open().unwrap();
    let signal = InterruptSignal::new();

    handle.write(b"0123456789", &signal).unwrap();
    handle.write(b"abcdefghij", &signal).unwrap();

    let sent = transport.sent(DISPLAY_ENDPOINT);
    assert_eq!(&sent[1][..], b"\x01abcdef");
    assert_eq!(attachment.session().column(), 16);
}

#[test]
fn test_write_limited_by_packet_size() {
    let transport = Arc::new(MockTransport::with_auto_complete());
    let descriptors = [
        EndpointDescriptor::new(0x01, TransferClass::Bulk, 8),
        EndpointDescriptor::new(0x81, TransferClass::Interrupt, 8),
    ];
    let attachment =
        lifecycle::attach(0, &descriptors, transport.clone(), SessionOptions::default()).unwrap();
    let handle = attachment.session().open().unwrap();

    assert_eq!(attachment.session().max_payload(), 7);
    assert_eq!(handle.write(b"ABCDEFGHIJ", &InterruptSignal::new()).unwrap(), 10);
    assert_eq!(&transport.sent(0x01)[0][..], b"\x01ABCDEFG");
    assert_eq!(attachment.session().column(), 7);
}

#[test]
fn test_empty_write_sends_nothing() {
    let transport = Arc::new(MockTransport::with_auto_complete());
    let attachment = attach_mock(&transport);
    let handle = attachment.session().open().unwrap();

    assert_eq!(handle.write(b"", &InterruptSignal::new()).unwrap(), 0);
    assert!(transport.sent(DISPLAY_ENDPOINT).is_empty());
}

#[test]
fn test_rejected_write_restores_column() {
    let transport = Arc::new(MockTransport::with_auto_complete());
    let attachment = attach_mock(&transport);
    let handle = attachment.session().open().unwrap();
    let signal = InterruptSignal::new();

    transport.set_reject(Some("bus error"));
    assert!(matches!(
        handle.write(b"ABC", &signal),
        Err(DriverError::TransferRejected(_))
    ));
    assert_eq!(attachment.session().column(), 0);
    assert!(attachment.session().display_idle());

    transport.set_reject(None);
    handle.write(b"ABC", &signal).unwrap();
    assert_eq!(attachment.session().column(), 3);
}

// ============================================================================
// Keypad Tests
// ============================================================================

#[test]
fn test_key_echo() {
    let transport = Arc::new(MockTransport::with_auto_complete());
    let attachment = attach_mock(&transport);

    press(&transport, b'7', 1);

    assert_eq!(transport.sent(DISPLAY_ENDPOINT), vec![vec![0x01, b'7']]);
    assert_eq!(attachment.session().column(), 1);
    assert_eq!(attachment.session().last_key(), KeyCode(b'7'));
    // Re-armed after the completion
    assert_eq!(transport.in_flight(KEYPAD_ENDPOINT), 1);
    assert_eq!(transport.submissions(KEYPAD_ENDPOINT), 2);
}

#[test]
fn test_delete_at_home_is_ignored() {
    let transport = Arc::new(MockTransport::with_auto_complete());
    let attachment = attach_mock(&transport);
    let session = Arc::clone(attachment.session());

    assert!(transport.complete_in(KEYPAD_ENDPOINT, b"F"));
    attachment.detach();

    assert!(transport.sent(DISPLAY_ENDPOINT).is_empty());
    assert_eq!(session.column(), 0);
}

#[test]
fn test_custom_delete_key() {
    let transport = Arc::new(MockTransport::with_auto_complete());
    let options = SessionOptions {
        delete_key: KeyCode(b'#'),
    };
    let attachment =
        lifecycle::attach(0, &display_descriptors(), transport.clone(), options).unwrap();

    press(&transport, b'F', 1);
    press(&transport, b'#', 4);

    let sent = transport.sent(DISPLAY_ENDPOINT);
    assert_eq!(sent[0], vec![0x01, b'F']);
    assert_eq!(sent[1], vec![0x00, 0x80]);
    assert_eq!(attachment.session().column(), 0);
}

#[test]
fn test_echo_on_full_line_is_dropped() {
    let transport = Arc::new(MockTransport::with_auto_complete());
    let attachment = attach_mock(&transport);
    let session = Arc::clone(attachment.session());
    let handle = session.open().unwrap();

    handle.write(b"0123456789abcdef", &InterruptSignal::new()).unwrap();
    assert!(transport.complete_in(KEYPAD_ENDPOINT, b"Z"));

    // Detach drains the queued key before returning
    attachment.detach();
    assert_eq!(transport.sent(DISPLAY_ENDPOINT).len(), 1);
    assert_eq!(session.column(), 16);
}

#[test]
fn test_full_scenario() {
    let transport = Arc::new(MockTransport::with_auto_complete());
    let registry = DeviceRegistry::new(4, SessionOptions::default());
    let minor = registry
        .attach(&display_descriptors(), transport.clone())
        .unwrap();
    assert_eq!(minor, 0);

    let session = registry.session(minor).unwrap();
    let handle = registry.open(minor).unwrap();
    let signal = InterruptSignal::new();

    handle.write(b"HI", &signal).unwrap();
    assert_eq!(session.column(), 2);

    // Delete: cursor to 1, blank, cursor back to 1
    press(&transport, b'F', 4);
    assert_eq!(session.column(), 1);

    press(&transport, b'!', 5);
    assert_eq!(session.column(), 2);

    assert_eq!(
        transport.sent(DISPLAY_ENDPOINT),
        vec![
            vec![0x01, b'H', b'I'],
            vec![0x00, 0x81],
            vec![0x01, b' '],
            vec![0x00, 0x81],
            vec![0x01, b'!'],
        ]
    );

    registry.detach(minor).unwrap();
    assert!(matches!(registry.open(minor), Err(DriverError::NoDevice(0))));
    assert!(matches!(session.open(), Err(DriverError::NoDevice(0))));

    // The open handle outlives the device but can no longer write
    assert!(matches!(
        handle.write(b"x", &signal),
        Err(DriverError::DeviceGone)
    ));
    assert_eq!(session.column(), 2);
}

// ============================================================================
// Detach Tests
// ============================================================================

#[test]
fn test_detach_stops_keypad_and_drains_work() {
    let transport = Arc::new(MockTransport::with_auto_complete());
    let attachment = attach_mock(&transport);
    let session = Arc::clone(attachment.session());

    assert!(transport.complete_in(KEYPAD_ENDPOINT, b"Q"));
    attachment.detach();

    // Queued key work ran before detach returned
    assert_eq!(transport.sent(DISPLAY_ENDPOINT), vec![vec![0x01, b'Q']]);
    assert_eq!(transport.cancelled(), vec![KEYPAD_ENDPOINT]);
    assert!(session.is_detached());
    assert!(!session.is_listening());

    // Nothing left to complete and nothing resubmitted
    assert!(!transport.complete_in(KEYPAD_ENDPOINT, b"R"));
    assert_eq!(transport.submissions(KEYPAD_ENDPOINT), 2);
}

#[test]
fn test_all_references_released_after_detach_and_close() {
    let transport = Arc::new(MockTransport::with_auto_complete());
    let attachment = attach_mock(&transport);
    let session = Arc::clone(attachment.session());
    let handle = session.open().unwrap();

    handle.write(b"AB", &InterruptSignal::new()).unwrap();
    press(&transport, b'C', 2);

    attachment.detach();
    assert!(session.ref_count() >= 2);

    handle.close();
    assert_eq!(session.ref_count(), 1);
}

// ============================================================================
// Registry Tests
// ============================================================================

#[test]
fn test_registry_assigns_lowest_free_minor() {
    let registry = DeviceRegistry::new(2, SessionOptions::default());
    let first = Arc::new(MockTransport::with_auto_complete());
    let second = Arc::new(MockTransport::with_auto_complete());
    let third = Arc::new(MockTransport::with_auto_complete());

    assert_eq!(registry.attach(&display_descriptors(), first).unwrap(), 0);
    assert_eq!(registry.attach(&display_descriptors(), second).unwrap(), 1);
    assert!(matches!(
        registry.attach(&display_descriptors(), third.clone()),
        Err(DriverError::ResourceExhausted(_))
    ));

    registry.detach(0).unwrap();
    assert_eq!(registry.minors(), vec![1]);
    assert_eq!(registry.attach(&display_descriptors(), third).unwrap(), 0);
    assert_eq!(registry.minors(), vec![0, 1]);
}

#[test]
fn test_registry_unknown_minor() {
    let registry = DeviceRegistry::new(4, SessionOptions::default());

    assert!(matches!(registry.open(3), Err(DriverError::NoDevice(3))));
    assert!(matches!(registry.detach(3), Err(DriverError::NoDevice(3))));
    assert!(registry.session(3).is_none());
}

#[test]
fn test_registry_session_info() {
    let registry = DeviceRegistry::new(4, SessionOptions::default());
    let transport = Arc::new(MockTransport::with_auto_complete());
    let minor = registry.attach(&display_descriptors(), transport).unwrap();

    let handle = registry.open(minor).unwrap();
    handle.write(b"abc", &InterruptSignal::new()).unwrap();

    let info = registry.sessions();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].minor, minor);
    assert_eq!(info[0].column, 3);
    assert!(info[0].open);
    assert!(info[0].listening);
}
