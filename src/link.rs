//! Websocket client link to the box server.
//!
//! The link is best-effort: it may be disconnected at any time, and every
//! publish either lands on the current socket or on one fresh reconnect.

use anyhow::{anyhow, Context, Result};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tungstenite::{Message, WebSocket};
use url::Url;

use crate::boxes::DetectorMessage;
use crate::config::WsSettings;

const IO_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_DRAIN_FRAMES: usize = 64;

/// Sink for serialized detector messages.
pub trait BoxPublisher {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Deliver one text frame, reconnecting if needed.
    fn publish(&mut self, text: &str) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Release the connection. Must be safe to call when disconnected.
    fn close(&mut self) {}
}

/// Counters for a websocket link.
#[derive(Clone, Debug, Default)]
pub struct LinkStats {
    pub frames_sent: u64,
    pub connect_attempts: u64,
    /// Successful connects after the first one, whatever triggered them.
    pub reconnects: u64,
    pub send_failures: u64,
}

pub struct WsLink {
    url: String,
    connect_timeout: Duration,
    socket: Option<WebSocket<TcpStream>>,
    ever_connected: bool,
    stats: LinkStats,
}

impl WsLink {
    pub fn new(settings: &WsSettings) -> Self {
        Self {
            url: settings.url.clone(),
            connect_timeout: settings.connect_timeout,
            socket: None,
            ever_connected: false,
            stats: LinkStats::default(),
        }
    }

    pub fn stats(&self) -> LinkStats {
        self.stats.clone()
    }

    /// Open a fresh connection, replacing any existing socket.
    pub fn connect(&mut self) -> Result<()> {
        self.socket = None;
        self.stats.connect_attempts += 1;
        let socket = open_socket(&self.url, self.connect_timeout)?;
        if self.ever_connected {
            self.stats.reconnects += 1;
            log::info!("websocket reconnected to {}", self.url);
        } else {
            log::info!("websocket connected to {}", self.url);
        }
        self.ever_connected = true;
        self.socket = Some(socket);
        Ok(())
    }

    fn send_current(&mut self, text: &str) -> Result<()> {
        let socket = self
            .socket
            .as_mut()
            .ok_or_else(|| anyhow!("websocket not connected"))?;
        socket
            .send(Message::Text(text.to_string()))
            .with_context(|| format!("send websocket frame to {}", self.url))
    }

    /// Read whatever the server has queued without blocking the loop.
    ///
    /// Pings are answered by tungstenite on the next flush. A close frame or
    /// a broken stream drops the socket so the caller reconnects.
    fn drain_incoming(&mut self) {
        let Some(socket) = self.socket.as_mut() else {
            return;
        };
        if let Err(e) = socket.get_mut().set_nonblocking(true) {
            log::debug!("websocket set_nonblocking failed: {}", e);
            return;
        }

        let mut keep = true;
        for _ in 0..MAX_DRAIN_FRAMES {
            match socket.read() {
                Ok(Message::Text(text)) => match DetectorMessage::from_json(&text) {
                    Ok(DetectorMessage::Hello { ts }) => log::debug!("box server hello (ts {ts})"),
                    Ok(other) => log::debug!("ignoring inbound {:?}", other),
                    Err(_) => log::debug!("ignoring inbound text frame: {}", text),
                },
                Ok(Message::Close(frame)) => {
                    log::info!("box server closed websocket: {:?}", frame);
                    keep = false;
                    break;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(e)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    break;
                }
                Err(e) => {
                    log::warn!("websocket read failed: {}", e);
                    keep = false;
                    break;
                }
            }
        }

        if keep {
            let restored = socket.get_mut().set_nonblocking(false);
            let flushed = socket.flush();
            if restored.is_err() || flushed.is_err() {
                keep = false;
            }
        }
        if !keep {
            self.socket = None;
        }
    }
}

impl BoxPublisher for WsLink {
    fn name(&self) -> &str {
        "websocket"
    }

    fn publish(&mut self, text: &str) -> Result<()> {
        // A server that went away between ticks shows up here, not on write.
        self.drain_incoming();
        if self.socket.is_none() {
            self.connect()?;
        } else if let Err(first) = self.send_current(text) {
            self.stats.send_failures += 1;
            log::warn!("websocket send failed, reconnecting: {:#}", first);
            self.connect()
                .with_context(|| format!("reconnect after send failure ({:#})", first))?;
        } else {
            self.stats.frames_sent += 1;
            self.drain_incoming();
            return Ok(());
        }

        // Fresh socket: one more attempt.
        if let Err(e) = self.send_current(text) {
            self.stats.send_failures += 1;
            self.socket = None;
            return Err(e);
        }
        self.stats.frames_sent += 1;
        self.drain_incoming();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).and_then(|_| socket.flush()) {
                log::debug!("websocket close: {}", e);
            }
        }
    }
}

fn open_socket(url: &str, connect_timeout: Duration) -> Result<WebSocket<TcpStream>> {
    let stream = connect_any(&resolve(url)?, connect_timeout)?;
    stream
        .set_read_timeout(Some(IO_TIMEOUT))
        .context("set websocket read timeout")?;
    stream
        .set_write_timeout(Some(IO_TIMEOUT))
        .context("set websocket write timeout")?;
    stream.set_nodelay(true).context("set websocket nodelay")?;
    let (socket, _response) = tungstenite::client(url, stream)
        .map_err(|e| anyhow!("websocket handshake with {} failed: {}", url, e))?;
    Ok(socket)
}

/// Try each resolved address in turn, keeping the last error.
fn connect_any(addrs: &[SocketAddr], timeout: Duration) -> Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                log::debug!("connect to {} failed: {}", addr, e);
                let err = anyhow::Error::new(e).context(format!("connect to box server {}", addr));
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("no addresses to connect to")))
}

fn resolve(url: &str) -> Result<Vec<SocketAddr>> {
    let parsed = Url::parse(url).with_context(|| format!("parse websocket url {}", url))?;
    if parsed.scheme() != "ws" {
        return Err(anyhow!(
            "unsupported websocket scheme '{}'; expected ws",
            parsed.scheme()
        ));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("websocket url missing host"))?;
    let port = parsed.port_or_known_default().unwrap_or(80);
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .with_context(|| format!("resolve {}:{}", host, port))?
        .collect();
    if addrs.is_empty() {
        return Err(anyhow!("no address for {}:{}", host, port));
    }
    Ok(addrs)
}
