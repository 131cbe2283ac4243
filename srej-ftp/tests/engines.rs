//! Data-phase engines driven over real sockets against a peer that never
//! answers, to show every blocking wait ends.

use std::io::Cursor;
use std::net::SocketAddr;
use std::time::Duration;

use srej_ftp::connection::{Connection, ControlSeq};
use srej_ftp::error::TransferError;
use srej_ftp::packet::{Flag, Packet};
use srej_ftp::receiver::Receiver;
use srej_ftp::sender::Sender;
use srej_ftp::simulator::Simulator;
use srej_ftp::socket::Socket;
use srej_ftp::timer::TimerConfig;
use srej_ftp::window::Window;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn bind_loopback() -> Socket {
    Socket::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap(), Simulator::transparent())
        .await
        .expect("bind loopback socket")
}

/// 50 ms ack waits, 500 ms idle.
fn timers() -> TimerConfig {
    TimerConfig::default().scaled_down(20)
}

/// A connection whose peer is bound but never replies.
async fn connection_to_silent_peer() -> (Connection, Socket) {
    let silent = bind_loopback().await;
    let conn = Connection::new(bind_loopback().await, silent.local_addr);
    (conn, silent)
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sender_gives_up_when_no_ack_ever_arrives() {
    let (conn, _silent) = connection_to_silent_peer().await;
    // Ten chunks through a window of two: FINAL_DATA is never reached.
    let sender = Sender::new(Cursor::new(vec![7u8; 1000]), Window::new(2).unwrap(), 100);

    let err = tokio::time::timeout(Duration::from_secs(10), sender.run(&conn, &timers()))
        .await
        .expect("sender never gave up")
        .unwrap_err();

    assert!(
        matches!(
            err,
            TransferError::RetriesExhausted {
                stage: "waiting for acknowledgment"
            }
        ),
        "got {err}"
    );
}

#[tokio::test]
async fn sender_reports_unacknowledged_final_separately() {
    let (conn, silent) = connection_to_silent_peer().await;
    let sender = Sender::new(Cursor::new(vec![1u8; 150]), Window::new(4).unwrap(), 100);

    let err = tokio::time::timeout(Duration::from_secs(10), sender.run(&conn, &timers()))
        .await
        .expect("sender never gave up")
        .unwrap_err();

    match err {
        TransferError::FinalAckLost { packets, bytes } => {
            assert_eq!(packets, 2);
            assert_eq!(bytes, 150);
        }
        other => panic!("expected FinalAckLost, got {other}"),
    }

    // The peer did see FINAL_DATA.
    let mut saw_final = false;
    while let Ok(Some((packet, _))) = silent.try_recv_from() {
        saw_final |= packet.is_some_and(|p| p.flag() == Flag::FinalData);
    }
    assert!(saw_final);
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

#[tokio::test]
async fn receiver_idle_timeout_before_any_delivery_is_an_error() {
    let (conn, silent) = connection_to_silent_peer().await;
    let receiver = Receiver::new(Vec::new(), Window::new(4).unwrap(), ControlSeq::default());

    // Sequence 1 first: buffered behind a hole, nothing delivered.
    let first = Packet::new(1, Flag::Data, b"later".to_vec());
    let err = tokio::time::timeout(Duration::from_secs(10), receiver.run(&conn, &timers(), first))
        .await
        .expect("receiver never timed out")
        .unwrap_err();
    assert!(matches!(err, TransferError::IdleTimeout), "got {err}");

    let (packet, _) = silent.recv_from().await.unwrap();
    let srej = packet.expect("SREJ decodes");
    assert_eq!(srej.flag(), Flag::Srej);
    assert_eq!(srej.control_target(), Some(0));
}

#[tokio::test]
async fn receiver_idle_timeout_after_delivery_ends_incomplete() {
    let (conn, silent) = connection_to_silent_peer().await;
    let receiver = Receiver::new(Vec::new(), Window::new(4).unwrap(), ControlSeq::default());

    let first = Packet::new(0, Flag::Data, b"abc".to_vec());
    let summary =
        tokio::time::timeout(Duration::from_secs(10), receiver.run(&conn, &timers(), first))
            .await
            .expect("receiver never timed out")
            .expect("delivery then silence is not an error");

    assert!(!summary.completed);
    assert_eq!(summary.packets_delivered, 1);
    assert_eq!(summary.bytes_written, 3);

    let (packet, _) = silent.recv_from().await.unwrap();
    let rr = packet.expect("RR decodes");
    assert_eq!(rr.flag(), Flag::Rr);
    assert_eq!(rr.control_target(), Some(1));
}
