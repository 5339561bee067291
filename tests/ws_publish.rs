//! End-to-end tests for the detector against a local box server.
//!
//! These tests verify that:
//! 1. `boxes` frames reach a websocket server
//! 2. A dropped connection is re-established on a later tick
//! 3. A server that closes between ticks does not swallow the next frame
//! 4. Unreachable endpoints never fail a tick

use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use homeeye_detector::{
    BoxGenerator, BoxPublisher, Detector, DetectorConfig, DetectorMessage, WsLink, MOTION_LABEL,
};
use tungstenite::{Message, WebSocket};

/// A received frame tagged with the index of the connection it arrived on.
type Received = (usize, String);

fn read_text(ws: &mut WebSocket<TcpStream>) -> Option<String> {
    loop {
        match ws.read() {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Accept `connections` clients in turn. Each is greeted with `hello`, then
/// `frames_per_conn` text frames are forwarded. The server waits
/// `close_delay` and closes before accepting the next client.
fn spawn_box_server(
    connections: usize,
    frames_per_conn: usize,
    close_delay: Duration,
) -> (String, mpsc::Receiver<Received>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for index in 0..connections {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            let Ok(mut ws) = tungstenite::accept(stream) else {
                continue;
            };
            let _ = ws.send(Message::Text(r#"{"type":"hello","ts":1}"#.to_string()));
            for _ in 0..frames_per_conn {
                match read_text(&mut ws) {
                    Some(text) => {
                        if tx.send((index, text)).is_err() {
                            return;
                        }
                    }
                    None => break,
                }
            }
            thread::sleep(close_delay);
            let _ = ws.close(None);
            let _ = ws.flush();
        }
    });
    (format!("ws://{}/ws", addr), rx)
}

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    port
}

fn test_config(ws_url: String) -> DetectorConfig {
    let mut cfg = DetectorConfig::default();
    cfg.ws.url = ws_url;
    cfg.ws.connect_timeout = Duration::from_millis(500);
    cfg.snapshot.enabled = false;
    cfg.interval = Duration::from_millis(10);
    cfg.box_probability = 1.0;
    cfg
}

#[test]
fn delivers_boxes_envelope_to_server() {
    let (url, rx) = spawn_box_server(1, 2, Duration::ZERO);
    let cfg = test_config(url);
    let generator = BoxGenerator::seeded(1.0, 11).expect("generator");
    let mut link = WsLink::new(&cfg.ws);
    link.connect().expect("connect");
    let mut detector = Detector::new(&cfg, generator, link);

    let first = detector.tick().expect("tick");
    assert!(first.delivered);
    let (conn, text) = rx.recv_timeout(Duration::from_secs(5)).expect("frame");
    assert_eq!(conn, 0);

    let value: serde_json::Value = serde_json::from_str(&text).expect("json");
    assert_eq!(value["type"], "boxes");
    let boxes = value["boxes"].as_array().expect("boxes array");
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0]["label"], MOTION_LABEL);
    assert_eq!(DetectorMessage::from_json(&text).expect("parse"), first.message);

    let second = detector.tick().expect("tick");
    assert!(second.delivered);
    let (_, text) = rx.recv_timeout(Duration::from_secs(5)).expect("frame");
    assert_eq!(DetectorMessage::from_json(&text).expect("parse"), second.message);

    let stats = detector.publisher().stats();
    assert_eq!(stats.frames_sent, 2);
    assert_eq!(stats.connect_attempts, 1);
}

#[test]
fn reconnects_after_server_drops_connection() {
    // First connection takes one frame then closes; the second stays for one more.
    let (url, rx) = spawn_box_server(2, 1, Duration::ZERO);
    let cfg = test_config(url);
    let generator = BoxGenerator::seeded(1.0, 5).expect("generator");
    let mut detector = Detector::new(&cfg, generator, WsLink::new(&cfg.ws));

    detector.tick().expect("tick");
    let (conn, _) = rx.recv_timeout(Duration::from_secs(5)).expect("first frame");
    assert_eq!(conn, 0);

    let mut reconnected = false;
    for _ in 0..50 {
        detector.tick().expect("tick");
        if let Ok((conn, text)) = rx.recv_timeout(Duration::from_millis(100)) {
            assert_eq!(conn, 1);
            assert!(DetectorMessage::from_json(&text).is_ok());
            reconnected = true;
            break;
        }
    }
    assert!(reconnected, "detector never reached the second connection");
    let stats = detector.publisher().stats();
    assert!(stats.connect_attempts >= 2);
    assert!(stats.reconnects >= 1);
}

#[test]
fn frame_after_idle_close_reaches_new_connection() {
    // Close lands while the detector sleeps between ticks, like a server restart.
    let (url, rx) = spawn_box_server(2, 1, Duration::from_millis(100));
    let cfg = test_config(url);
    let generator = BoxGenerator::seeded(1.0, 17).expect("generator");
    let mut detector = Detector::new(&cfg, generator, WsLink::new(&cfg.ws));

    assert!(detector.tick().expect("tick").delivered);
    let (conn, _) = rx.recv_timeout(Duration::from_secs(5)).expect("first frame");
    assert_eq!(conn, 0);

    thread::sleep(Duration::from_millis(300));

    let second = detector.tick().expect("tick");
    assert!(second.delivered);
    let (conn, text) = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("second tick's frame must reach the server");
    assert_eq!(conn, 1);
    assert_eq!(DetectorMessage::from_json(&text).expect("parse"), second.message);

    let stats = detector.publisher().stats();
    assert_eq!(stats.frames_sent, 2);
    assert_eq!(stats.connect_attempts, 2);
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.send_failures, 0);
}

#[test]
fn tolerates_unavailable_endpoints() {
    let mut cfg = test_config(format!("ws://127.0.0.1:{}/ws", closed_port()));
    cfg.snapshot.enabled = true;
    cfg.snapshot.url = format!("http://127.0.0.1:{}/snapshot.jpg", closed_port());
    cfg.snapshot.timeout = Duration::from_millis(500);

    let generator = BoxGenerator::seeded(0.5, 21).expect("generator");
    let mut detector = Detector::new(&cfg, generator, WsLink::new(&cfg.ws));

    for _ in 0..3 {
        let report = detector.tick().expect("tick never fails on network errors");
        assert!(!report.delivered);
        assert_eq!(report.snapshot_bytes, None);
        assert!(report.message.box_count() <= 1);
    }
    assert!(!detector.publisher().is_connected());
    let snap = detector.snapshot_fetcher().expect("fetcher").stats();
    assert_eq!(snap.attempts, 3);
    assert_eq!(snap.successes, 0);
}
