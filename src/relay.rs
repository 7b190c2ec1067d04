// src/relay.rs
//
// Duplex relay between the local serial port and the tunnel. Two independent
// directions run concurrently once setup completes; each terminates on the
// first I/O error on its own endpoints without tearing down the other, and
// both honor a shared cancel flag so shutdown does not depend on I/O errors.
//
// Serial I/O is blocking and runs on spawn_blocking threads with short port
// timeouts; a bounded channel bridges each direction's blocking half to its
// async half. Serial handles are used in a strict split: the outbound
// direction only reads the port, the inbound direction only writes it.

use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::logging::tlog;
use crate::tunnel::TunnelConn;

/// Serial read chunk size. Each chunk becomes exactly one tunnel message, so
/// this also bounds the size of a single outbound message; the remote side
/// reassembles the byte stream from consecutive messages.
pub const SERIAL_CHUNK_SIZE: usize = 128;

/// Read/write timeout on the serial port. Bounds each blocking call so the
/// cancel flag stays responsive; an expired timeout just means no data.
pub const SERIAL_IO_TIMEOUT: Duration = Duration::from_millis(10);

/// How often the inbound direction wakes from the tunnel read to recheck the
/// cancel flag.
const TUNNEL_POLL_INTERVAL: Duration = Duration::from_millis(250);

const CHANNEL_DEPTH: usize = 32;

// ============================================================================
// Types
// ============================================================================

/// One of the two relay directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    SerialToTunnel,
    TunnelToSerial,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::SerialToTunnel => write!(f, "serial->tunnel"),
            Direction::TunnelToSerial => write!(f, "tunnel->serial"),
        }
    }
}

/// Why a direction stopped. Steady-state failures are reported here rather
/// than as errors; they end one direction, never the session as a whole.
#[derive(Debug)]
pub struct RelayOutcome {
    pub direction: Direction,
    pub reason: String,
}

enum InboundEnd {
    StreamSide(String),
    WriterSide,
}

// ============================================================================
// Outbound: serial -> tunnel
// ============================================================================

/// Forward serial reads to the tunnel, one message per chunk read.
pub async fn pump_serial_to_tunnel<R, S>(
    reader: R,
    mut sink: S,
    cancel: Arc<AtomicBool>,
) -> RelayOutcome
where
    R: Read + Send + 'static,
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    // The stop flag lets this direction wind down its blocking reader when
    // the tunnel side fails, without touching the session-wide cancel flag.
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);

    let reader_cancel = cancel.clone();
    let reader_stop = stop.clone();
    let read_task =
        tokio::task::spawn_blocking(move || read_serial_chunks(reader, tx, reader_cancel, reader_stop));

    let reason = loop {
        match rx.recv().await {
            Some(chunk) => {
                if let Err(e) = sink.send(Message::binary(chunk)).await {
                    break format!("tunnel write error: {}", e);
                }
            }
            None => {
                // Serial side ended; its reason is authoritative.
                break match read_task.await {
                    Ok(reason) => reason,
                    Err(e) => format!("serial reader panicked: {}", e),
                };
            }
        }
    };

    stop.store(true, Ordering::Relaxed);
    RelayOutcome { direction: Direction::SerialToTunnel, reason }
}

/// Blocking serial read loop. Chunks are capped at SERIAL_CHUNK_SIZE; empty
/// reads (port timeout) send nothing.
fn read_serial_chunks<R: Read>(
    mut reader: R,
    tx: mpsc::Sender<Vec<u8>>,
    cancel: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
) -> String {
    let mut buf = [0u8; SERIAL_CHUNK_SIZE];
    loop {
        if cancel.load(Ordering::Relaxed) || stop.load(Ordering::Relaxed) {
            return "stopped".to_string();
        }
        match reader.read(&mut buf) {
            // Zero-length read with no error: the endpoint is gone.
            Ok(0) => return "serial endpoint closed".to_string(),
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    return "tunnel side closed".to_string();
                }
            }
            // Expired port timeout; nothing was read, nothing is sent.
            Err(ref e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return format!("serial read error: {}", e),
        }
    }
}

// ============================================================================
// Inbound: tunnel -> serial
// ============================================================================

/// Forward tunnel messages to the serial port, verbatim and in order.
pub async fn pump_tunnel_to_serial<St, E, W>(
    mut stream: St,
    writer: W,
    cancel: Arc<AtomicBool>,
) -> RelayOutcome
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
    W: Write + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);
    let write_task = tokio::task::spawn_blocking(move || write_serial_chunks(writer, rx));

    let end = loop {
        if cancel.load(Ordering::Relaxed) {
            break InboundEnd::StreamSide("stopped".to_string());
        }

        tokio::select! {
            // The writer drops its receiver when it fails; notice promptly
            // even if the tunnel stays quiet.
            _ = tx.closed() => break InboundEnd::WriterSide,

            polled = tokio::time::timeout(TUNNEL_POLL_INTERVAL, stream.next()) => {
                let bytes = match polled {
                    Err(_) => continue, // poll tick, recheck cancel
                    Ok(None) => break InboundEnd::StreamSide("tunnel closed".to_string()),
                    Ok(Some(Err(e))) => {
                        break InboundEnd::StreamSide(format!("tunnel read error: {}", e))
                    }
                    Ok(Some(Ok(Message::Binary(b)))) => b.to_vec(),
                    Ok(Some(Ok(Message::Text(t)))) => t.as_bytes().to_vec(),
                    Ok(Some(Ok(Message::Close(_)))) => {
                        break InboundEnd::StreamSide("closed by remote".to_string())
                    }
                    // Control frames carry no serial payload.
                    Ok(Some(Ok(_))) => continue,
                };
                // A failed send means the writer is gone; the next iteration
                // picks up its reason through tx.closed().
                let _ = tx.send(bytes).await;
            }
        }
    };

    drop(tx);
    let writer_reason = match write_task.await {
        Ok(reason) => reason,
        Err(e) => format!("serial writer panicked: {}", e),
    };

    let reason = match end {
        InboundEnd::WriterSide => writer_reason,
        InboundEnd::StreamSide(reason) => reason,
    };
    RelayOutcome { direction: Direction::TunnelToSerial, reason }
}

/// Blocking serial write loop. Exits when the channel closes or a write fails.
fn write_serial_chunks<W: Write>(mut writer: W, mut rx: mpsc::Receiver<Vec<u8>>) -> String {
    while let Some(bytes) = rx.blocking_recv() {
        if let Err(e) = writer.write_all(&bytes).and_then(|_| writer.flush()) {
            return format!("serial write error: {}", e);
        }
    }
    "tunnel side closed".to_string()
}

// ============================================================================
// Session
// ============================================================================

/// Run both directions to completion. Returns once both have ended, whether
/// through I/O errors or the cancel flag; one direction failing leaves the
/// other bridging until it fails or is cancelled.
pub async fn run_relay<R, W>(
    reader: R,
    writer: W,
    tunnel: TunnelConn,
    cancel: Arc<AtomicBool>,
) -> (RelayOutcome, RelayOutcome)
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    let (sink, stream) = tunnel.split();

    let outbound_cancel = cancel.clone();
    let outbound = tokio::spawn(async move {
        let outcome = pump_serial_to_tunnel(reader, sink, outbound_cancel).await;
        tlog!("[relay] {} ended: {}", outcome.direction, outcome.reason);
        outcome
    });
    let inbound = tokio::spawn(async move {
        let outcome = pump_tunnel_to_serial(stream, writer, cancel).await;
        tlog!("[relay] {} ended: {}", outcome.direction, outcome.reason);
        outcome
    });

    let (outbound, inbound) = tokio::join!(outbound, inbound);
    (
        outbound.unwrap_or_else(|e| RelayOutcome {
            direction: Direction::SerialToTunnel,
            reason: format!("task failed: {}", e),
        }),
        inbound.unwrap_or_else(|e| RelayOutcome {
            direction: Direction::TunnelToSerial,
            reason: format!("task failed: {}", e),
        }),
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::task::{Context, Poll};

    /// Serial-port stand-in: plays back a script of reads. Oversized entries
    /// are handed out in buffer-sized pieces; an exhausted script behaves
    /// like an idle port (timeouts).
    struct ScriptedReader {
        script: VecDeque<io::Result<Vec<u8>>>,
        pending: Vec<u8>,
    }

    impl ScriptedReader {
        fn new(script: Vec<io::Result<Vec<u8>>>) -> Self {
            Self { script: script.into(), pending: Vec::new() }
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pending.is_empty() {
                match self.script.pop_front() {
                    Some(Ok(bytes)) => self.pending = bytes,
                    Some(Err(e)) => return Err(e),
                    None => {
                        std::thread::sleep(Duration::from_millis(1));
                        return Err(io::ErrorKind::TimedOut.into());
                    }
                }
            }
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            Ok(n)
        }
    }

    fn timed_out() -> io::Result<Vec<u8>> {
        Err(io::ErrorKind::TimedOut.into())
    }

    #[derive(Clone, Default)]
    struct SharedWriter {
        data: Arc<Mutex<Vec<u8>>>,
    }

    impl SharedWriter {
        fn contents(&self) -> Vec<u8> {
            self.data.lock().unwrap().clone()
        }
    }

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.data.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "device detached"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingSink;

    impl Sink<Message> for FailingSink {
        type Error = String;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }
        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), String> {
            Err("connection reset".to_string())
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }
        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }
    }

    fn idle() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[tokio::test]
    async fn test_outbound_one_read_is_one_message() {
        let reader = ScriptedReader::new(vec![
            timed_out(),
            Ok(b"hello world".to_vec()),
            Err(io::ErrorKind::BrokenPipe.into()),
        ]);
        let (sink, collected) = futures::channel::mpsc::unbounded::<Message>();

        let outcome = pump_serial_to_tunnel(reader, sink, idle()).await;
        assert_eq!(outcome.direction, Direction::SerialToTunnel);
        assert!(outcome.reason.contains("serial read error"), "{}", outcome.reason);

        let messages: Vec<Message> = collected.collect().await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_binary());
        assert_eq!(messages[0].clone().into_data().as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn test_outbound_chunks_bound_message_size() {
        let payload: Vec<u8> = (0..300u16).map(|i| (i % 251) as u8).collect();
        let reader = ScriptedReader::new(vec![
            Ok(payload.clone()),
            Err(io::ErrorKind::BrokenPipe.into()),
        ]);
        let (sink, collected) = futures::channel::mpsc::unbounded::<Message>();

        pump_serial_to_tunnel(reader, sink, idle()).await;

        let messages: Vec<Message> = collected.collect().await;
        let sizes: Vec<usize> = messages.iter().map(|m| m.clone().into_data().len()).collect();
        assert_eq!(sizes, vec![SERIAL_CHUNK_SIZE, SERIAL_CHUNK_SIZE, 44]);

        let mut reassembled = Vec::new();
        for m in messages {
            reassembled.extend_from_slice(m.into_data().as_ref());
        }
        assert_eq!(reassembled, payload);
    }

    #[tokio::test]
    async fn test_outbound_ends_on_tunnel_write_error() {
        let reader = ScriptedReader::new(vec![Ok(b"x".to_vec())]);
        let outcome = pump_serial_to_tunnel(reader, FailingSink, idle()).await;
        assert!(outcome.reason.contains("tunnel write error"), "{}", outcome.reason);
    }

    #[tokio::test]
    async fn test_inbound_messages_arrive_verbatim_in_order() {
        let items: Vec<Result<Message, &str>> = vec![
            Ok(Message::binary(b"ab".to_vec())),
            Ok(Message::text("cd")),
            Ok(Message::Ping(Vec::new().into())),
            Ok(Message::binary(b"ef".to_vec())),
            Err("connection reset"),
        ];
        let writer = SharedWriter::default();

        let outcome =
            pump_tunnel_to_serial(futures::stream::iter(items), writer.clone(), idle()).await;
        assert_eq!(outcome.direction, Direction::TunnelToSerial);
        assert!(outcome.reason.contains("tunnel read error"), "{}", outcome.reason);
        assert_eq!(writer.contents(), b"abcdef");
    }

    #[tokio::test]
    async fn test_inbound_ends_on_close_frame() {
        let items: Vec<Result<Message, &str>> = vec![Ok(Message::Close(None))];
        let writer = SharedWriter::default();
        let outcome =
            pump_tunnel_to_serial(futures::stream::iter(items), writer, idle()).await;
        assert!(outcome.reason.contains("closed by remote"), "{}", outcome.reason);
    }

    #[tokio::test]
    async fn test_inbound_ends_when_tunnel_stream_ends() {
        let items: Vec<Result<Message, &str>> = Vec::new();
        let outcome =
            pump_tunnel_to_serial(futures::stream::iter(items), SharedWriter::default(), idle())
                .await;
        assert!(outcome.reason.contains("tunnel closed"), "{}", outcome.reason);
    }

    #[tokio::test]
    async fn test_inbound_ends_on_serial_write_error() {
        // The stream stays open after the message; the direction must still
        // notice the dead writer.
        let items: Vec<Result<Message, &str>> = vec![Ok(Message::binary(b"ab".to_vec()))];
        let stream = futures::stream::iter(items).chain(futures::stream::pending());

        let outcome = pump_tunnel_to_serial(stream, FailingWriter, idle()).await;
        assert!(outcome.reason.contains("serial write error"), "{}", outcome.reason);
    }

    #[tokio::test]
    async fn test_cancel_stops_both_directions() {
        let cancel = Arc::new(AtomicBool::new(true));

        let reader = ScriptedReader::new(vec![]);
        let (sink, _collected) = futures::channel::mpsc::unbounded::<Message>();
        let outbound = pump_serial_to_tunnel(reader, sink, cancel.clone()).await;
        assert_eq!(outbound.reason, "stopped");

        let stream = futures::stream::pending::<Result<Message, &str>>();
        let inbound = pump_tunnel_to_serial(stream, SharedWriter::default(), cancel).await;
        assert_eq!(inbound.reason, "stopped");
    }

    #[tokio::test]
    async fn test_directions_are_independent() {
        let cancel = idle();

        // Outbound dies immediately on a serial read error.
        let reader = ScriptedReader::new(vec![Err(io::ErrorKind::BrokenPipe.into())]);
        let (sink, _collected) = futures::channel::mpsc::unbounded::<Message>();
        let outbound_cancel = cancel.clone();
        let outbound =
            tokio::spawn(async move { pump_serial_to_tunnel(reader, sink, outbound_cancel).await });

        // Inbound keeps delivering afterwards.
        let items: Vec<Result<Message, &str>> = vec![Ok(Message::binary(b"zz".to_vec()))];
        let stream = futures::stream::iter(items).chain(futures::stream::pending());
        let writer = SharedWriter::default();
        let inbound_writer = writer.clone();
        let inbound_cancel = cancel.clone();
        let inbound = tokio::spawn(async move {
            pump_tunnel_to_serial(stream, inbound_writer, inbound_cancel).await
        });

        let outbound = outbound.await.unwrap();
        assert!(outbound.reason.contains("serial read error"), "{}", outbound.reason);

        // Give the inbound direction time to write, then confirm it is both
        // alive and delivered.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(writer.contents(), b"zz");
        assert!(!inbound.is_finished());

        cancel.store(true, Ordering::Relaxed);
        let inbound = inbound.await.unwrap();
        assert_eq!(inbound.reason, "stopped");
    }
}
