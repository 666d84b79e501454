// Serial link to the brick
//
// The link owns the transport. A dedicated reader thread blocks on the
// read half for the lifetime of a connection; the write half is only
// touched through `send`, which the command queue calls from its single
// consumer.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::dispatch::dispatch;
use super::events::{BrickEvent, EventBus};
use super::protocol::frame;

/// Default serial configuration for the NXT's Bluetooth SPP port
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Error types for the link
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("No paired brick found at {0}")]
    NoSuchTarget(String),

    #[error("Link is already connected or connecting")]
    AlreadyConnected,
}

/// Both halves of an opened transport
pub struct Transport {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Opens transports by address
pub trait Connector: Send + Sync {
    fn open(&self, address: &str) -> Result<Transport, LinkError>;
}

/// Opens the brick's serial device (e.g. an rfcomm-bound tty)
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
    timeout: Duration,
}

impl SerialConnector {
    pub fn new(baud_rate: u32, timeout: Duration) -> Self {
        Self { baud_rate, timeout }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BAUDRATE, Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }
}

impl Connector for SerialConnector {
    fn open(&self, address: &str) -> Result<Transport, LinkError> {
        let port = serialport::new(address, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => LinkError::NoSuchTarget(address.to_string()),
                _ => LinkError::Serial(e),
            })?;
        let reader = port.try_clone()?;

        Ok(Transport {
            reader: Box::new(reader),
            writer: Box::new(port),
        })
    }
}

struct Session {
    writer: Box<dyn Write + Send>,
    closing: Arc<AtomicBool>,
}

pub struct Link {
    connector: Box<dyn Connector>,
    events: EventBus,
    state: Arc<Mutex<ConnectionState>>,
    /// Shared with the reader thread, which drops it on a read failure
    session: Arc<Mutex<Option<Session>>>,
}

impl Link {
    pub fn new(connector: impl Connector + 'static, events: EventBus) -> Self {
        Self {
            connector: Box::new(connector),
            events,
            state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
            session: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Open the transport and start the reader thread
    ///
    /// Emits `Connected` or `ConnectError`. Retrying is allowed from
    /// `Disconnected` and `Failed`.
    pub fn connect(&self, address: &str) -> Result<(), LinkError> {
        {
            let mut state = self.state.lock();
            if matches!(
                *state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                return Err(LinkError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }

        info!("Connecting to brick at {}", address);
        let transport = match self.connector.open(address) {
            Ok(transport) => transport,
            Err(e) => {
                self.fail_connect(&e);
                return Err(e);
            }
        };

        let closing = Arc::new(AtomicBool::new(false));
        *self.session.lock() = Some(Session {
            writer: transport.writer,
            closing: Arc::clone(&closing),
        });
        *self.state.lock() = ConnectionState::Connected;

        let reader = transport.reader;
        let session = Arc::clone(&self.session);
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let spawned = thread::Builder::new()
            .name("nxt-rx".to_string())
            .spawn(move || rx_loop(reader, closing, session, state, events));

        // The reader thread is detached; it exits on its first failed or
        // timed-out read after the session is closed.
        if let Err(e) = spawned {
            self.session.lock().take();
            let e = LinkError::Io(e);
            self.fail_connect(&e);
            return Err(e);
        }

        info!("Connected to brick at {}", address);
        self.events.emit(&BrickEvent::Connected);
        Ok(())
    }

    fn fail_connect(&self, e: &LinkError) {
        *self.state.lock() = ConnectionState::Failed;
        warn!("Connect failed: {}", e);
        if let LinkError::NoSuchTarget(_) = e {
            self.events.emit(&BrickEvent::Toast {
                text: "No paired NXT robot found!".to_string(),
            });
        }
        self.events.emit(&BrickEvent::ConnectError {
            reason: e.to_string(),
        });
    }

    /// Write one length-prefixed telegram. Never retries.
    ///
    /// Returns false if there is no open transport. An oversized payload
    /// or a failed write also returns false and emits `SendError`.
    pub fn send(&self, payload: &[u8]) -> bool {
        let result = {
            let mut session = self.session.lock();
            let Some(session) = session.as_mut() else {
                debug!("Not connected, dropping {}-byte telegram", payload.len());
                return false;
            };

            frame(payload).map_err(io::Error::other).and_then(|framed| {
                trace!("TX {:02X?}", framed);
                session
                    .writer
                    .write_all(&framed)
                    .and_then(|_| session.writer.flush())
            })
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Send failed: {}", e);
                self.events.emit(&BrickEvent::SendError {
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// Whether a transport is currently held (connected or draining)
    pub fn has_transport(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Mark the current session as deliberately closing, so a read failure
    /// from here on is not reported
    pub fn begin_close(&self) {
        if let Some(session) = self.session.lock().as_ref() {
            session.closing.store(true, Ordering::Release);
        }
    }

    /// Close the transport
    pub fn close(&self) {
        let taken = {
            let mut current = self.session.lock();
            if let Some(session) = current.as_ref() {
                session.closing.store(true, Ordering::Release);
            }
            current.take()
        };
        let Some(mut session) = taken else {
            return;
        };

        if let Err(e) = session.writer.flush() {
            warn!("Flush on close failed: {}", e);
            self.events.emit(&BrickEvent::Toast {
                text: "Problem in closing the connection!".to_string(),
            });
        }
        drop(session);

        *self.state.lock() = ConnectionState::Disconnected;
        info!("Link closed");
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        // Lets the reader thread exit quietly on its next timeout
        self.begin_close();
    }
}

/// Reader thread body: read telegrams until the transport fails
///
/// A failure after `closing` was set ends the loop silently. Any other
/// failure drops the session's writer, so later sends fail fast, and is
/// reported once as `ReceiveError`.
fn rx_loop(
    mut reader: impl Read,
    closing: Arc<AtomicBool>,
    session: Arc<Mutex<Option<Session>>>,
    state: Arc<Mutex<ConnectionState>>,
    events: EventBus,
) {
    loop {
        let payload = match read_telegram(&mut reader, &closing) {
            Ok(payload) => payload,
            Err(e) => {
                let dropped = {
                    let mut current = session.lock();
                    if closing.load(Ordering::Acquire) {
                        debug!("RX loop: link closed, exiting");
                        return;
                    }
                    closing.store(true, Ordering::Release);
                    // Only our own session; a reconnect may have replaced it
                    match current.as_ref() {
                        Some(s) if Arc::ptr_eq(&s.closing, &closing) => current.take(),
                        _ => None,
                    }
                };
                drop(dropped);

                warn!("RX loop: read failed: {}", e);
                *state.lock() = ConnectionState::Disconnected;
                events.emit(&BrickEvent::ReceiveError {
                    reason: e.to_string(),
                });
                return;
            }
        };

        trace!("RX {:02X?}", payload);
        if let Some(event) = dispatch(&payload) {
            events.emit(&event);
        }
    }
}

fn read_telegram(reader: &mut impl Read, closing: &AtomicBool) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; 2];
    read_full(reader, &mut prefix, closing)?;

    let length = u16::from_le_bytes(prefix) as usize;
    let mut payload = vec![0u8; length];
    read_full(reader, &mut payload, closing)?;
    Ok(payload)
}

/// `read_exact` that rides out port read timeouts until the link closes
fn read_full(reader: &mut impl Read, buf: &mut [u8], closing: &AtomicBool) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Err(io::Error::new(ErrorKind::UnexpectedEof, "transport closed")),
            Ok(n) => filled += n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                if closing.load(Ordering::Acquire) {
                    return Err(io::Error::new(ErrorKind::NotConnected, "link closed"));
                }
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
