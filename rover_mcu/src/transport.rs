//! Async serial transport with COBS framing and auto-reconnect.
//!
//! The transport task owns the port. It asserts DTR/RTS on open (some CDC
//! stacks gate OUT transfers on line state), feeds incoming bytes through
//! a delimiter scanner with a 512-byte frame ceiling, and parses each
//! complete frame. On any I/O error it tears the port down and re-opens
//! with exponential backoff in `[0.5 s, 5.0 s]`.
//!
//! Writes arrive over an unbounded queue from the synchronous side and
//! are bounded by a 100 ms timeout; a timed-out frame is dropped and
//! counted, not retried.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

use rover_common::time::mono_ns;
use rover_proto::frame::{parse_frame, ParsedPacket, ProtocolVersion};

/// Reconnect backoff bounds.
const RECONNECT_MIN: Duration = Duration::from_millis(500);
const RECONNECT_MAX: Duration = Duration::from_secs(5);

/// Frames longer than this (encoded) are discarded as line noise.
const MAX_FRAME_LEN: usize = 512;

/// Bounded write timeout; an overrun drops the frame.
const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Events fanned out to subscribers (tick loop, clock sync).
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Packet(ParsedPacket),
}

/// Counters snapshot for telemetry and troubleshooting.
#[derive(Debug, Clone, Default)]
pub struct TransportSnapshot {
    pub port: String,
    pub connected: bool,
    pub connect_count: u64,
    pub disconnect_count: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub frames_ok: u64,
    pub frames_bad: u64,
    pub frames_too_long: u64,
    pub write_errors: u64,
    pub write_timeouts: u64,
    pub last_error: String,
}

#[derive(Debug, Default)]
struct Counters {
    connect_count: u64,
    disconnect_count: u64,
    rx_bytes: u64,
    tx_bytes: u64,
    frames_ok: u64,
    frames_bad: u64,
    frames_too_long: u64,
    write_errors: u64,
    write_timeouts: u64,
    last_error: String,
}

/// Shared handle to one transport task.
#[derive(Clone)]
pub struct TransportHandle {
    label: &'static str,
    port: String,
    writes: mpsc::UnboundedSender<Vec<u8>>,
    connected: Arc<AtomicBool>,
    version: Arc<AtomicU8>,
    counters: Arc<Mutex<Counters>>,
    events: broadcast::Sender<TransportEvent>,
}

impl TransportHandle {
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Queue one wire-ready frame. Returns false when disconnected; the
    /// frame is then dropped rather than buffered across the outage.
    pub fn write(&self, frame: Vec<u8>) -> bool {
        if !self.connected() {
            return false;
        }
        self.writes.send(frame).is_ok()
    }

    /// Subscribe to connection and packet events.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// Negotiated envelope version for parsing inbound frames.
    pub fn set_protocol_version(&self, version: ProtocolVersion) {
        let raw = match version {
            ProtocolVersion::V1 => 1,
            ProtocolVersion::V2 => 2,
        };
        self.version.store(raw, Ordering::Relaxed);
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        match self.version.load(Ordering::Relaxed) {
            2 => ProtocolVersion::V2,
            _ => ProtocolVersion::V1,
        }
    }

    pub fn snapshot(&self) -> TransportSnapshot {
        let c = self.counters.lock();
        TransportSnapshot {
            port: self.port.clone(),
            connected: self.connected(),
            connect_count: c.connect_count,
            disconnect_count: c.disconnect_count,
            rx_bytes: c.rx_bytes,
            tx_bytes: c.tx_bytes,
            frames_ok: c.frames_ok,
            frames_bad: c.frames_bad,
            frames_too_long: c.frames_too_long,
            write_errors: c.write_errors,
            write_timeouts: c.write_timeouts,
            last_error: c.last_error.clone(),
        }
    }
}

/// Spawn the transport task for one port and return its handle.
pub fn spawn_transport(port: String, baudrate: u32, label: &'static str) -> TransportHandle {
    let (write_tx, write_rx) = mpsc::unbounded_channel();
    let (event_tx, _) = broadcast::channel(256);

    let handle = TransportHandle {
        label,
        port: port.clone(),
        writes: write_tx,
        connected: Arc::new(AtomicBool::new(false)),
        version: Arc::new(AtomicU8::new(1)),
        counters: Arc::new(Mutex::new(Counters::default())),
        events: event_tx,
    };

    let task_handle = handle.clone();
    tokio::spawn(async move {
        run_loop(task_handle, baudrate, write_rx).await;
    });

    handle
}

async fn run_loop(
    handle: TransportHandle,
    baudrate: u32,
    mut writes: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let mut backoff = RECONNECT_MIN;

    loop {
        let stream = match open_port(&handle.port, baudrate) {
            Ok(s) => s,
            Err(e) => {
                debug!("{}: open {} failed: {}", handle.label, handle.port, e);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(RECONNECT_MAX);
                continue;
            }
        };

        info!("{}: connected to {}", handle.label, handle.port);
        backoff = RECONNECT_MIN;
        handle.connected.store(true, Ordering::Relaxed);
        handle.counters.lock().connect_count += 1;
        // Stale queued frames belong to the previous session.
        while writes.try_recv().is_ok() {}
        let _ = handle.events.send(TransportEvent::Connected);

        pump(&handle, stream, &mut writes).await;

        handle.connected.store(false, Ordering::Relaxed);
        handle.counters.lock().disconnect_count += 1;
        let _ = handle.events.send(TransportEvent::Disconnected);
        warn!("{}: disconnected from {}", handle.label, handle.port);

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(RECONNECT_MAX);
    }
}

fn open_port(port: &str, baudrate: u32) -> tokio_serial::Result<SerialStream> {
    let mut stream = tokio_serial::new(port, baudrate)
        .timeout(Duration::from_millis(50))
        .open_native_async()?;
    // Some CDC stacks gate OUT transfers on line state.
    stream.write_data_terminal_ready(true)?;
    stream.write_request_to_send(true)?;
    Ok(stream)
}

/// Read/write pump for one connection. Returns on the first I/O error.
async fn pump(
    handle: &TransportHandle,
    stream: SerialStream,
    writes: &mut mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut rx_buf = [0u8; 256];
    let mut frame_buf: Vec<u8> = Vec::with_capacity(MAX_FRAME_LEN);
    let mut overlong = false;

    loop {
        tokio::select! {
            read = reader.read(&mut rx_buf) => {
                match read {
                    Ok(0) => {
                        handle.counters.lock().last_error = "EOF".into();
                        return;
                    }
                    Ok(n) => {
                        handle.counters.lock().rx_bytes += n as u64;
                        extract_frames(handle, &rx_buf[..n], &mut frame_buf, &mut overlong);
                    }
                    Err(e) => {
                        handle.counters.lock().last_error = e.to_string();
                        return;
                    }
                }
            }
            frame = writes.recv() => {
                let Some(frame) = frame else { return };
                match tokio::time::timeout(WRITE_TIMEOUT, writer.write_all(&frame)).await {
                    Ok(Ok(())) => {
                        handle.counters.lock().tx_bytes += frame.len() as u64;
                    }
                    Ok(Err(e)) => {
                        let mut c = handle.counters.lock();
                        c.write_errors += 1;
                        c.last_error = e.to_string();
                        warn!("{}: write error: {}", handle.label, e);
                        return;
                    }
                    Err(_) => {
                        // Drop this frame, keep the connection.
                        handle.counters.lock().write_timeouts += 1;
                    }
                }
            }
        }
    }
}

/// Scan incoming bytes for `0x00`-delimited frames and parse each one.
fn extract_frames(
    handle: &TransportHandle,
    bytes: &[u8],
    frame_buf: &mut Vec<u8>,
    overlong: &mut bool,
) {
    for &b in bytes {
        if b == 0x00 {
            if *overlong {
                // Tail of a discarded over-length frame.
                *overlong = false;
                frame_buf.clear();
                continue;
            }
            if frame_buf.is_empty() {
                continue; // idle delimiter
            }
            frame_buf.push(0x00);
            match parse_frame(frame_buf, handle.protocol_version()) {
                Ok(mut pkt) => {
                    pkt.t_rx_ns = mono_ns();
                    handle.counters.lock().frames_ok += 1;
                    let _ = handle.events.send(TransportEvent::Packet(pkt));
                }
                Err(e) => {
                    let mut c = handle.counters.lock();
                    c.frames_bad += 1;
                    c.last_error = e.to_string();
                }
            }
            frame_buf.clear();
        } else if *overlong {
            // Keep discarding until the next delimiter.
        } else {
            frame_buf.push(b);
            if frame_buf.len() > MAX_FRAME_LEN {
                handle.counters.lock().frames_too_long += 1;
                frame_buf.clear();
                *overlong = true;
            }
        }
    }
}
