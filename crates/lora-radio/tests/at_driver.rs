//! AT driver behaviour against simulated modems.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lora_common::RadioConfig;
use lora_radio::{AirLink, AtRadio, Radio, RadioError, RadioState};

const TIMEOUT: Duration = Duration::from_millis(300);
const SHORT_POLL: Duration = Duration::from_millis(150);

fn radio(air: &AirLink) -> AtRadio {
    AtRadio::with_opener(RadioConfig::default(), Arc::new(air.clone()))
}

fn connected_pair(air: &AirLink) -> (AtRadio, AtRadio) {
    let tx = radio(air);
    let rx = radio(air);
    tx.connect("tx", 9600, TIMEOUT).unwrap();
    rx.connect("rx", 9600, TIMEOUT).unwrap();
    (tx, rx)
}

#[test]
fn test_connect_issues_setup_sequence() {
    let air = AirLink::new();
    let radio = radio(&air);

    radio.connect("dev0", 9600, TIMEOUT).unwrap();

    assert!(radio.is_connected());
    assert_eq!(radio.state(), RadioState::Connected);
    assert_eq!(radio.port().as_deref(), Some("dev0"));
    assert_eq!(
        air.commands("dev0"),
        vec![
            "AT".to_string(),
            "AT+MODE=TEST".to_string(),
            "AT+TEST=rfcfg,865.125,sf7,125,14,15,14,on,off,off".to_string(),
        ]
    );
    assert!(air.in_test_mode("dev0"));
}

#[test]
fn test_connect_fails_on_missing_device() {
    let air = AirLink::new();
    air.remove_device("nowhere");
    let radio = radio(&air);

    let err = radio.connect("nowhere", 9600, TIMEOUT).unwrap_err();
    assert!(matches!(err, RadioError::Connection(_)));
    assert_eq!(radio.state(), RadioState::Disconnected);
}

#[test]
fn test_connect_fails_when_setup_command_errors() {
    let air = AirLink::new();
    air.fail_command("dev0", "AT+TEST=RFCFG");
    let radio = radio(&air);

    let err = radio.connect("dev0", 9600, TIMEOUT).unwrap_err();
    assert!(matches!(err, RadioError::Connection(ref msg) if msg.contains("rfcfg")));
    assert!(!radio.is_connected());
    assert!(radio.port().is_none());

    // No retry: the sequence stopped at the failing command
    assert_eq!(air.commands("dev0").len(), 3);
}

#[test]
fn test_send_command_reports_error_response() {
    let air = AirLink::new();
    let radio = radio(&air);
    radio.connect("dev0", 9600, TIMEOUT).unwrap();

    assert_eq!(radio.send_command("AT", TIMEOUT).unwrap(), "+AT: OK");

    let err = radio.send_command("AT+NOPE", TIMEOUT).unwrap_err();
    assert!(matches!(err, RadioError::Command(ref msg) if msg.contains("ERROR")));

    // The connection survives a refused command
    assert!(radio.is_connected());
}

#[test]
fn test_silent_module_still_connects() {
    let air = AirLink::new();
    air.mute("quiet");
    let radio = radio(&air);

    radio.connect("quiet", 9600, TIMEOUT).unwrap();

    assert!(radio.is_connected());
    assert_eq!(air.commands("quiet").len(), 3);
    assert!(air.in_test_mode("quiet"));

    // Silence is an empty response, not a failure
    let start = Instant::now();
    assert_eq!(radio.send_command("AT", SHORT_POLL).unwrap(), "");
    assert!(start.elapsed() >= SHORT_POLL);
}

#[test]
fn test_silent_transmit_counts_as_sent() {
    let air = AirLink::new();
    let (tx, rx) = connected_pair(&air);
    air.mute("tx");
    air.mute("rx");

    assert!(tx.send_packet(b"quiet"));
    assert_eq!(air.transmitted("tx"), vec![b"quiet".to_vec()]);

    // A receiver that never acknowledges RXLRPKT still reports packets
    assert_eq!(rx.receive_packet(TIMEOUT).unwrap(), b"quiet".to_vec());
}

#[test]
fn test_refused_receive_mode_is_an_error() {
    let air = AirLink::new();
    let (_tx, rx) = connected_pair(&air);
    air.fail_command("rx", "AT+TEST=RXLRPKT");

    assert!(matches!(
        rx.receive_packet(SHORT_POLL),
        Err(RadioError::Command(ref msg)) if msg.contains("ERROR")
    ));
    assert!(rx.is_connected());
}

#[test]
fn test_commands_require_connection() {
    let air = AirLink::new();
    let radio = radio(&air);

    assert!(matches!(
        radio.send_command("AT", TIMEOUT),
        Err(RadioError::NotConnected)
    ));
    assert!(!radio.send_packet(b"data"));
    assert!(matches!(
        radio.receive_packet(SHORT_POLL),
        Err(RadioError::NotConnected)
    ));
}

#[test]
fn test_send_packet_uses_uppercase_hex() {
    let air = AirLink::new();
    let radio = radio(&air);
    radio.connect("dev0", 9600, TIMEOUT).unwrap();

    assert!(radio.send_packet(&[0xde, 0xad, 0xbe, 0xef]));
    assert_eq!(
        air.commands("dev0").last().map(String::as_str),
        Some("AT+TEST=TXLRPKT,\"DEADBEEF\"")
    );
}

#[test]
fn test_send_packet_failure_is_false() {
    let air = AirLink::new();
    let radio = radio(&air);
    radio.connect("dev0", 9600, TIMEOUT).unwrap();
    air.fail_command("dev0", "AT+TEST=TXLRPKT");

    assert!(!radio.send_packet(b"lost"));
    assert!(air.transmitted("dev0").is_empty());
}

#[test]
fn test_packet_bytes_survive_hex_boundary() {
    let air = AirLink::new();
    let (tx, rx) = connected_pair(&air);

    let one = vec![0x7f];
    let long: Vec<u8> = (0..=255u8).cycle().take(230).collect();

    for payload in [&one, &long] {
        assert!(tx.send_packet(payload));
        let received = rx.receive_packet(TIMEOUT).unwrap();
        assert_eq!(&received, payload);
    }

    // An empty packet is indistinguishable from silence
    assert!(tx.send_packet(&[]));
    assert_eq!(air.transmitted("tx").last(), Some(&Vec::new()));
    assert!(rx.receive_packet(SHORT_POLL).unwrap().is_empty());
}

#[test]
fn test_receive_times_out_empty() {
    let air = AirLink::new();
    let (_tx, rx) = connected_pair(&air);

    let start = Instant::now();
    let packet = rx.receive_packet(SHORT_POLL).unwrap();
    assert!(packet.is_empty());
    assert!(start.elapsed() >= SHORT_POLL);
    assert!(start.elapsed() < SHORT_POLL * 10);
    assert_eq!(air.commands("rx").last().map(String::as_str), Some("AT+TEST=RXLRPKT"));
}

#[test]
fn test_receive_skips_malformed_lines() {
    let air = AirLink::new();
    let (_tx, rx) = connected_pair(&air);

    // The first queued line is taken as the RXLRPKT response, the rest are
    // polled as notifications.
    air.inject_line("rx", "+TEST: TX DONE");
    air.inject_line("rx", "+TEST: RX \"NOTHEX\"");
    air.inject_line("rx", "+TEST: RX \"ABC");
    air.inject_line("rx", "+TEST: RX \"0102\"");

    let received = rx.receive_packet(TIMEOUT).unwrap();
    assert_eq!(received, vec![0x01, 0x02]);
}

#[test]
fn test_signal_info_from_notification() {
    let air = AirLink::new();
    let (tx, rx) = connected_pair(&air);

    let before = rx.signal_info();
    assert!(!before.measured);
    assert_eq!(before.rssi, -50);
    assert_eq!(before.frequency_mhz, 865.125);

    air.set_signal("rx", -97, -3.5);
    assert!(tx.send_packet(b"ping"));
    assert_eq!(rx.receive_packet(TIMEOUT).unwrap(), b"ping".to_vec());

    let after = rx.signal_info();
    assert!(after.measured);
    assert_eq!(after.rssi, -97);
    assert_eq!(after.snr, -3.5);
}

#[test]
fn test_broken_line_is_transport_error() {
    let air = AirLink::new();
    let (_tx, rx) = connected_pair(&air);

    air.break_line("rx");
    assert!(matches!(
        rx.receive_packet(SHORT_POLL),
        Err(RadioError::Io(_))
    ));
}

#[test]
fn test_reset_and_idempotent_disconnect() {
    let air = AirLink::new();
    let radio = radio(&air);
    radio.connect("dev0", 9600, TIMEOUT).unwrap();

    radio.reset().unwrap();
    assert!(!air.in_test_mode("dev0"));
    assert_eq!(air.commands("dev0").last().map(String::as_str), Some("ATZ"));

    radio.disconnect();
    assert_eq!(radio.state(), RadioState::Disconnected);
    radio.disconnect();
    assert_eq!(radio.state(), RadioState::Disconnected);
    assert!(radio.reset().is_err());

    // The caller reconnects explicitly
    radio.connect("dev0", 9600, TIMEOUT).unwrap();
    assert!(radio.is_connected());
}

#[test]
fn test_attach_runs_setup_on_open_channel() {
    let air = AirLink::new();
    let radio = radio(&air);

    radio
        .attach("pre-opened", Box::new(air.modem("pre-opened")), TIMEOUT)
        .unwrap();

    assert!(radio.is_connected());
    assert_eq!(radio.port().as_deref(), Some("pre-opened"));
    assert_eq!(air.commands("pre-opened").len(), 3);
    assert!(air.in_test_mode("pre-opened"));

    // A channel that refuses test mode leaves the radio closed
    air.fail_command("other", "AT+MODE");
    let err = radio
        .attach("other", Box::new(air.modem("other")), TIMEOUT)
        .unwrap_err();
    assert!(matches!(err, RadioError::Connection(_)));
    assert_eq!(radio.state(), RadioState::Disconnected);
}
