mod common;

use common::{open_recorded, open_with_policy};
use feusb_core::protocol::{
    BatchReply, CommandBatch, CommandReply, ErrorKind, LinkFault, Number, ParsedValue, PollPolicy,
    PortState, ProtocolError,
};
use feusb_core::sim::{PollEvent, SimulatedDevice};
use pretty_assertions::assert_eq;
use std::time::Duration;

fn int(v: i64) -> ParsedValue {
    ParsedValue::Number(Number::Integer(v))
}

#[test]
fn test_three_records_parse_in_order() {
    let device = SimulatedDevice::new();
    device.deliver(b"5\r\n1.5 2.5\r\nA 7\r\n");
    let (mut session, _) = open_recorded(&device);

    let reply = session.read(None, 3).unwrap();
    assert_eq!(
        reply,
        BatchReply::Many(vec![
            CommandReply::Value(int(5)),
            CommandReply::Value(ParsedValue::Tuple(vec![
                Number::Float(1.5),
                Number::Float(2.5)
            ])),
            CommandReply::Value(int(7)),
        ])
    );
    assert_eq!(session.buffered_len(), 0);
}

#[test]
fn test_single_reply_is_scalar() {
    let device = SimulatedDevice::new();
    device.deliver(b"42\r\n");
    let (mut session, _) = open_recorded(&device);

    let reply = session.read(None, 1).unwrap();
    assert_eq!(reply, BatchReply::Single(CommandReply::Value(int(42))));
    assert_eq!(reply.single().and_then(CommandReply::as_i64), Some(42));
}

#[test]
fn test_command_is_written_then_answered() {
    let device = SimulatedDevice::new();
    device.respond("U", "USB-RCS 1 2 1.10");
    let (mut session, sleeper) = open_recorded(&device);

    let reply = session.read(Some("u"), 1).unwrap();
    assert_eq!(device.written(), b"U\r".to_vec());
    assert_eq!(
        reply.single().and_then(CommandReply::as_tuple),
        Some(&[Number::Integer(1), Number::Integer(2), Number::Float(1.1)][..])
    );
    // Settle pause before the first poll
    assert_eq!(sleeper.pauses().first(), Some(&Duration::from_millis(1)));
}

#[test]
fn test_multi_line_record_stays_structured() {
    let device = SimulatedDevice::new();
    device.respond("S", "S\n9000 1 0 0\n10200 1 0 -1");
    let (mut session, _) = open_recorded(&device);

    let reply = session.read(Some("s"), 1).unwrap();
    let lines = reply.single().and_then(CommandReply::lines).unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(
        lines[1],
        ParsedValue::Tuple(vec![
            Number::Integer(10200),
            Number::Integer(1),
            Number::Integer(0),
            Number::Integer(-1)
        ])
    );
}

#[test]
fn test_batch_query() {
    let device = SimulatedDevice::servo_controller();
    let (mut session, _) = open_recorded(&device);

    let batch = CommandBatch::new().command("c").command("a 0").query("m1").query("s1");
    let reply = session.query(&batch).unwrap();
    assert_eq!(device.written(), b"C A 0 M1 S1\r".to_vec());
    assert_eq!(reply.len(), 2);
    assert_eq!(reply.get(0).and_then(CommandReply::as_i64), Some(8190));
}

#[test]
fn test_slow_but_progressing_device_does_not_time_out() {
    let device = SimulatedDevice::new();
    let mut script = Vec::new();
    for record in ["1\r\n", "2\r\n", "3\r\n"] {
        script.extend(std::iter::repeat(PollEvent::Idle).take(4));
        script.push(PollEvent::Deliver(record.as_bytes().to_vec()));
    }
    device.script_polls(script);
    let poll = PollPolicy {
        retry_limit: 5,
        ..PollPolicy::default()
    };
    let (mut session, _) = open_with_policy(&device, poll);

    let reply = session.read(None, 3).unwrap();
    assert_eq!(reply.len(), 3);
    assert_eq!(device.polls(), 15);
}

#[test]
fn test_suspend_is_waited_out() {
    let device = SimulatedDevice::new();
    device.script_polls(std::iter::repeat(PollEvent::Suspend).take(30));
    device.script_polls([PollEvent::Deliver(b"9\r\n".to_vec())]);
    let (mut session, sleeper) = open_recorded(&device);

    // 30 suspended polls exceed the retry ceiling, but suspends never count
    let reply = session.read(None, 1).unwrap();
    assert_eq!(reply, BatchReply::Single(CommandReply::Value(int(9))));
    assert_eq!(sleeper.count(Duration::from_secs(1)), 30);
    assert_eq!(session.raw_status(), PortState::Connected);
}

#[test]
fn test_suspend_during_read_is_waited_out() {
    let device = SimulatedDevice::new();
    device.deliver(b"42\r\n");
    device.fail_reads([LinkFault::Suspended]);
    let (mut session, sleeper) = open_recorded(&device);
    assert!(!session.error_on_suspend());

    let reply = session.read(None, 1).unwrap();
    assert_eq!(reply, BatchReply::Single(CommandReply::Value(int(42))));
    assert_eq!(sleeper.count(Duration::from_secs(1)), 1);
    assert_eq!(session.raw_status(), PortState::Connected);
}

#[test]
fn test_suspend_during_read_surfaces_in_strict_mode() {
    let device = SimulatedDevice::new();
    device.deliver(b"42\r\n");
    device.fail_reads([LinkFault::Suspended]);
    let (mut session, _) = open_recorded(&device);
    session.set_error_on_suspend(true);

    let err = session.read(None, 1).unwrap_err();
    assert!(matches!(err, ProtocolError::Suspended(_)));
    // Nothing was consumed, so the reply is still there afterwards
    session.set_error_on_suspend(false);
    let reply = session.read(None, 1).unwrap();
    assert_eq!(reply.single().and_then(CommandReply::as_i64), Some(42));
}

#[test]
fn test_suspend_surfaces_in_strict_mode() {
    let device = SimulatedDevice::new();
    device.script_polls([PollEvent::Suspend]);
    let (mut session, _) = open_recorded(&device);
    session.set_error_on_suspend(true);

    let err = session.read(None, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Suspended);
    assert_eq!(session.raw_status(), PortState::Suspended);
}

#[test]
fn test_write_waits_out_suspend() {
    let device = SimulatedDevice::new();
    device.fail_writes([LinkFault::Suspended, LinkFault::Suspended]);
    let (mut session, sleeper) = open_recorded(&device);

    session.write("c").unwrap();
    assert_eq!(device.written(), b"C\r".to_vec());
    assert_eq!(sleeper.count(Duration::from_secs(1)), 2);
    assert_eq!(session.raw_status(), PortState::Connected);
}

#[test]
fn test_timeout_exactly_at_retry_ceiling() {
    let device = SimulatedDevice::new();
    let (mut session, sleeper) = open_recorded(&device);

    let err = session.read(None, 1).unwrap_err();
    assert!(matches!(err, ProtocolError::Timeout { .. }));
    assert_eq!(device.polls(), 20);
    assert_eq!(sleeper.count(Duration::from_millis(1)), 19);
    assert_eq!(device.probes(), 1);
    // The device is still considered present
    assert_eq!(session.raw_status(), PortState::Connected);
}

#[test]
fn test_stall_with_dead_port_is_a_disconnect() {
    let device = SimulatedDevice::new();
    device.fail_probes([LinkFault::Disconnected]);
    let (mut session, _) = open_recorded(&device);

    let err = session.read(None, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Disconnected);
    assert_eq!(session.raw_status(), PortState::Disconnected);
}

#[test]
fn test_unnoticed_suspend_is_a_fault() {
    let device = SimulatedDevice::new();
    device.fail_probes([LinkFault::Suspended]);
    let (mut session, _) = open_recorded(&device);

    let err = session.read(None, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolFault);
}

#[test]
fn test_disconnect_fails_fast_until_reconnect() {
    let device = SimulatedDevice::new();
    device.deliver(b"1\r\n2");
    let (mut session, _) = open_recorded(&device);
    let first = session.read(None, 1).unwrap();
    assert_eq!(first.single().and_then(CommandReply::as_i64), Some(1));
    assert_eq!(session.buffered_len(), 1);

    device.script_polls([PollEvent::Disconnect]);
    let err = session.waiting().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Disconnected);
    assert_eq!(session.raw_status(), PortState::Disconnected);
    assert_eq!(device.closes(), 1);

    // No I/O reaches the device while disconnected
    assert!(matches!(session.write("u"), Err(ProtocolError::Disconnected(_))));
    assert!(device.written().is_empty());
    assert_eq!(session.status(), PortState::Disconnected);

    assert_eq!(session.reconnect().unwrap(), PortState::Connected);
    assert_eq!(session.buffered_len(), 0);
    assert_eq!(device.opens(), 2);
}

#[test]
fn test_short_physical_read_is_fatal() {
    let device = SimulatedDevice::new();
    device.deliver(b"12\r\n");
    device.short_read(2);
    let (mut session, _) = open_recorded(&device);

    let err = session.read(None, 1).unwrap_err();
    assert!(matches!(
        err,
        ProtocolError::ShortRead {
            expected: 4,
            actual: 2
        }
    ));
    assert_eq!(err.kind(), ErrorKind::ProtocolFault);
}

#[test]
fn test_malformed_reply() {
    let device = SimulatedDevice::new();
    device.deliver(b"12 3x\r\n");
    let (mut session, _) = open_recorded(&device);

    let err = session.read(None, 1).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidReply { ref token } if token == "3x"));
}

#[test]
fn test_purge_discards_stale_replies() {
    let device = SimulatedDevice::new();
    device.deliver(b"junk\r\n");
    device.script_polls([PollEvent::Idle, PollEvent::Deliver(b"late\r\n".to_vec())]);
    let (mut session, _) = open_with_policy(&device, PollPolicy::immediate());
    assert_eq!(session.raw_waiting().unwrap(), 6);

    session.purge().unwrap();
    assert_eq!(session.buffered_len(), 0);
    assert_eq!(session.waiting().unwrap(), 0);
}

#[test]
fn test_counters() {
    let device = SimulatedDevice::servo_controller();
    let (mut session, _) = open_recorded(&device);
    session.read(Some("m1"), 1).unwrap();

    let (tx_bytes, rx_bytes, commands, records) = session.counters();
    assert_eq!(tx_bytes, 3);
    assert_eq!(rx_bytes, "M 8190\r\n".len() as u64);
    assert_eq!(commands, 1);
    assert_eq!(records, 1);
}
