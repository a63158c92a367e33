//! ---
//! msp_section: "03-transport"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Reader and writer halves over any async byte stream."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

use crate::endpoint::Endpoint;
use crate::{Result, TransportError};

const READ_CHUNK: usize = 1024;
const WRITE_QUEUE: usize = 32;

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Result of one [`TransportReader::read_chunk`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes arrived.
    Data(Bytes),
    /// Nothing arrived within the idle timeout.
    Idle,
}

/// Receiving half of a link. Owned by a single reader task.
pub struct TransportReader {
    inner: BoxedRead,
    buf: BytesMut,
    label: Arc<str>,
}

impl std::fmt::Debug for TransportReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportReader")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl TransportReader {
    /// Wait up to `idle` for the next chunk of bytes.
    ///
    /// Cancel-safe: dropping the future never loses received bytes.
    pub async fn read_chunk(&mut self, idle: Duration) -> Result<ReadOutcome> {
        self.buf.reserve(READ_CHUNK);
        match tokio::time::timeout(idle, self.inner.read_buf(&mut self.buf)).await {
            Err(_) => Ok(ReadOutcome::Idle),
            Ok(Ok(0)) => {
                debug!(link = %self.label, "peer closed the stream");
                Err(TransportError::Closed)
            }
            Ok(Ok(read)) => {
                trace!(link = %self.label, read, "received bytes");
                Ok(ReadOutcome::Data(self.buf.split().freeze()))
            }
            Ok(Err(err)) => Err(TransportError::Io(err)),
        }
    }

    /// Human-readable name of the link.
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Sending half of a link. Clones share one writer task that owns the
/// stream, so every [`write_frame`](Self::write_frame) reaches the wire whole
/// and in submission order, even when the caller stops waiting for it.
#[derive(Clone)]
pub struct TransportWriter {
    ops: mpsc::Sender<WriteOp>,
    label: Arc<str>,
}

enum WriteOp {
    Frame(Bytes, oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<Result<()>>),
}

impl std::fmt::Debug for TransportWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportWriter")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl TransportWriter {
    fn spawn(inner: BoxedWrite, label: Arc<str>) -> Self {
        let (ops, rx) = mpsc::channel(WRITE_QUEUE);
        tokio::spawn(run_writer(inner, rx, Arc::clone(&label)));
        Self { ops, label }
    }

    /// Write one complete frame and flush it.
    ///
    /// Once queued the frame is written to the end; dropping this future
    /// only gives up on the acknowledgement.
    pub async fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.ops
            .send(WriteOp::Frame(Bytes::copy_from_slice(frame), ack))
            .await
            .map_err(|_| TransportError::Closed)?;
        done.await.map_err(|_| TransportError::Closed)?
    }

    /// Close the write direction after every queued frame is out.
    pub async fn shutdown(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.ops
            .send(WriteOp::Shutdown(ack))
            .await
            .map_err(|_| TransportError::Closed)?;
        done.await.map_err(|_| TransportError::Closed)?
    }

    /// Human-readable name of the link.
    pub fn label(&self) -> &str {
        &self.label
    }
}

async fn run_writer(mut inner: BoxedWrite, mut ops: mpsc::Receiver<WriteOp>, label: Arc<str>) {
    while let Some(op) = ops.recv().await {
        match op {
            WriteOp::Frame(frame, ack) => {
                let result = write_all_flush(&mut inner, &frame).await;
                match &result {
                    Ok(()) => trace!(link = %label, len = frame.len(), "frame written"),
                    Err(err) => debug!(link = %label, error = %err, "frame write failed"),
                }
                // The caller may have given up; the frame is out regardless.
                let _ = ack.send(result);
            }
            WriteOp::Shutdown(ack) => {
                let result = inner.shutdown().await.map_err(map_write_error);
                let _ = ack.send(result);
                break;
            }
        }
    }
    // Anything still queued after a shutdown sees a dropped acknowledgement.
    ops.close();
    trace!(link = %label, "writer stopped");
}

async fn write_all_flush(inner: &mut BoxedWrite, frame: &[u8]) -> Result<()> {
    inner.write_all(frame).await.map_err(map_write_error)?;
    inner.flush().await.map_err(map_write_error)
}

fn map_write_error(err: std::io::Error) -> TransportError {
    let err = TransportError::Io(err);
    if err.is_closed() {
        TransportError::Closed
    } else {
        err
    }
}

/// Split any duplex stream into reader and writer halves. Must be called
/// from within a tokio runtime; the writer half runs on its own task.
pub fn split<S>(stream: S, label: impl Into<String>) -> (TransportReader, TransportWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let label: Arc<str> = Arc::from(label.into());
    let (read, write): (ReadHalf<S>, WriteHalf<S>) = tokio::io::split(stream);
    (
        TransportReader {
            inner: Box::new(read),
            buf: BytesMut::with_capacity(READ_CHUNK),
            label: Arc::clone(&label),
        },
        TransportWriter::spawn(Box::new(write), label),
    )
}

/// Open `endpoint` and split it.
pub async fn connect(
    endpoint: &Endpoint,
    connect_timeout: Duration,
) -> Result<(TransportReader, TransportWriter)> {
    match endpoint {
        Endpoint::Tcp { addr } => {
            let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr.as_str()))
                .await
                .map_err(|_| TransportError::ConnectTimeout {
                    endpoint: endpoint.to_string(),
                    timeout: connect_timeout,
                })??;
            stream.set_nodelay(true)?;
            info!(%endpoint, "tcp link established");
            Ok(split(stream, endpoint.to_string()))
        }
        Endpoint::Serial { path, baud_rate } => open_serial(endpoint, path, *baud_rate),
    }
}

#[cfg(feature = "serial")]
fn open_serial(
    endpoint: &Endpoint,
    path: &str,
    baud_rate: u32,
) -> Result<(TransportReader, TransportWriter)> {
    use tokio_serial::SerialPortBuilderExt;

    let port = tokio_serial::new(path, baud_rate)
        .open_native_async()
        .map_err(|err| TransportError::Serial {
            path: path.to_string(),
            reason: err.to_string(),
        })?;
    info!(%endpoint, "serial link established");
    Ok(split(port, endpoint.to_string()))
}

#[cfg(not(feature = "serial"))]
fn open_serial(
    _endpoint: &Endpoint,
    path: &str,
    _baud_rate: u32,
) -> Result<(TransportReader, TransportWriter)> {
    Err(TransportError::Serial {
        path: path.to_string(),
        reason: "built without serial support".to_string(),
    })
}
