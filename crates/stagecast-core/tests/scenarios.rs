//! End-to-end scenarios at the hub level: one broadcaster, several
//! viewers, identities across tabs, and fan-out with failing members.

use std::sync::Arc;

use serde_json::json;
use stagecast_core::{ConnectionId, Hub};
use stagecast_protocol::Frame;
use tokio::sync::mpsc;

fn drain(rx: &mut mpsc::Receiver<Arc<Frame>>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push((*frame).clone());
    }
    frames
}

/// A joins, B joins (A is told count 2), A signals B an offer, B
/// disconnects (A is told count 1).
#[test]
fn broadcaster_viewer_handshake_and_departure() {
    let hub = Hub::new();
    let (a, mut rx_a) = hub.connect().unwrap();
    let (b, mut rx_b) = hub.connect().unwrap();

    assert_eq!(hub.join_room(&a, "evt-42").unwrap(), 1);
    assert_eq!(drain(&mut rx_a), vec![Frame::room_count("evt-42", 1)]);

    assert_eq!(hub.join_room(&b, "evt-42").unwrap(), 2);
    assert_eq!(drain(&mut rx_a), vec![Frame::room_count("evt-42", 2)]);
    assert_eq!(drain(&mut rx_b), vec![Frame::room_count("evt-42", 2)]);

    hub.relay(&a, &b, b"offer-sdp".to_vec());
    match drain(&mut rx_b).as_slice() {
        [Frame::SignalRecv { from, payload }] => {
            assert_eq!(from, a.as_str());
            assert_eq!(payload, b"offer-sdp");
        }
        other => panic!("unexpected frames: {other:?}"),
    }

    hub.disconnect(&b);
    assert_eq!(drain(&mut rx_a), vec![Frame::room_count("evt-42", 1)]);
    assert_eq!(hub.member_count("evt-42"), 1);
}

/// Signaling handshakes are sequence-sensitive (offer, answer, then
/// candidates): envelopes from one source to one target arrive in the
/// order they were relayed.
#[test]
fn signals_between_one_pair_preserve_order() {
    let hub = Hub::new();
    let (a, _rx_a) = hub.connect().unwrap();
    let (b, mut rx_b) = hub.connect().unwrap();

    hub.relay(&a, &b, b"offer".to_vec());
    hub.relay(&a, &b, b"answer".to_vec());
    hub.relay(&a, &b, b"ice-1".to_vec());

    let frames = drain(&mut rx_b);
    let payloads: Vec<&[u8]> = frames
        .iter()
        .map(|f| match f {
            Frame::SignalRecv { payload, .. } => payload.as_slice(),
            other => panic!("unexpected frame: {other:?}"),
        })
        .collect();
    assert_eq!(payloads, vec![&b"offer"[..], &b"answer"[..], &b"ice-1"[..]]);
}

/// notify("u1") reaches both of u1's tabs and nobody else.
#[test]
fn notify_reaches_every_tab_of_one_identity() {
    let hub = Hub::new();
    let (c1, mut rx_c1) = hub.connect().unwrap();
    let (c2, mut rx_c2) = hub.connect().unwrap();
    let (c3, mut rx_c3) = hub.connect().unwrap();

    hub.bind_identity(&c1, "u1").unwrap();
    hub.bind_identity(&c2, "u1").unwrap();
    hub.bind_identity(&c3, "u2").unwrap();

    let delivered = hub.notify("u1", json!({"text": "hi"}));
    assert_eq!(delivered, 2);

    let expected = Frame::notice(json!({"text": "hi"}));
    assert_eq!(drain(&mut rx_c1), vec![expected.clone()]);
    assert_eq!(drain(&mut rx_c2), vec![expected]);
    assert!(drain(&mut rx_c3).is_empty());

    // Nobody home: dropped, not queued.
    assert_eq!(hub.notify("u9", json!({"text": "void"})), 0);
}

/// One of five members has a dead transport; the other four still get
/// the broadcast and the sender sees no error.
#[test]
fn fanout_survives_a_dead_member() {
    let hub = Hub::new();
    let mut receivers = Vec::new();
    let mut conns = Vec::new();
    for _ in 0..5 {
        let (conn, rx) = hub.connect().unwrap();
        hub.join_room(&conn, "evt-7").unwrap();
        conns.push(conn);
        receivers.push(rx);
    }

    // Member 4's socket task is gone: its receiver is dropped.
    let dead = receivers.pop().unwrap();
    drop(dead);

    for rx in &mut receivers {
        drain(rx);
    }

    let delivered = hub.broadcast("evt-7", Frame::chat_recv("evt-7", "host", "welcome"), None);
    assert_eq!(delivered, 4);

    for rx in &mut receivers {
        let frames = drain(rx);
        assert!(matches!(frames.as_slice(), [Frame::ChatRecv { .. }]));
    }
}

/// After a disconnect, the connection id is gone from every room and
/// from the identity index.
#[test]
fn disconnect_leaves_no_dangling_references() {
    let hub = Hub::new();
    let (a, _rx_a) = hub.connect().unwrap();
    let (b, _rx_b) = hub.connect().unwrap();

    hub.bind_identity(&a, "u1").unwrap();
    hub.join_room(&a, "evt-1").unwrap();
    hub.join_room(&a, "evt-2").unwrap();
    hub.join_room(&b, "evt-1").unwrap();

    hub.disconnect(&a);
    // Duplicate close events are tolerated.
    hub.disconnect(&a);

    assert_eq!(hub.member_count("evt-1"), 1);
    assert_eq!(hub.member_count("evt-2"), 0);
    assert_eq!(hub.notify("u1", json!({"text": "gone"})), 0);
    assert_eq!(hub.stats().connections, 1);
    assert_eq!(hub.stats().rooms, 1);
}

/// Joining twice yields the same count as joining once; leaving a room
/// you never joined is a no-op.
#[test]
fn join_and_leave_are_idempotent() {
    let hub = Hub::new();
    let (a, _rx_a) = hub.connect().unwrap();

    assert_eq!(hub.join_room(&a, "evt-1").unwrap(), 1);
    assert_eq!(hub.join_room(&a, "evt-1").unwrap(), 1);

    assert_eq!(hub.leave_room(&ConnectionId::new("ghost"), "evt-1"), 1);
    assert_eq!(hub.leave_room(&a, "no-such-room"), 0);
    assert_eq!(hub.member_count("evt-1"), 1);
}

/// A member joining after the fan-out snapshot does not receive the
/// broadcast that preceded it.
#[test]
fn broadcast_is_a_point_in_time_snapshot() {
    let hub = Hub::new();
    let (a, mut rx_a) = hub.connect().unwrap();
    hub.join_room(&a, "evt-1").unwrap();
    drain(&mut rx_a);

    hub.broadcast("evt-1", Frame::chat_recv("evt-1", "host", "early"), None);

    let (late, mut rx_late) = hub.connect().unwrap();
    hub.join_room(&late, "evt-1").unwrap();

    let late_frames = drain(&mut rx_late);
    assert!(
        late_frames.iter().all(|f| !matches!(f, Frame::ChatRecv { .. })),
        "late joiner must not see the earlier broadcast: {late_frames:?}"
    );
    assert!(matches!(
        drain(&mut rx_a).as_slice(),
        [Frame::ChatRecv { .. }, Frame::RoomCount { .. }]
    ));
}
