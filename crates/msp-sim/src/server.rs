//! ---
//! msp_section: "05-simulation"
//! msp_subsection: "module"
//! msp_type: "source"
//! msp_scope: "code"
//! msp_description: "Serving loops binding the simulated flight controller to a link."
//! msp_version: "v0.0.0-prealpha"
//! msp_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use msp_transport::{split, ReadOutcome};
use msp_wire::FrameDecoder;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::fc::SimulatedFc;

const IDLE_POLL: Duration = Duration::from_millis(250);
const DUPLEX_BUFFER: usize = 4096;

/// Answer requests arriving on `stream` until the peer goes away.
pub async fn serve_stream<S>(fc: Arc<SimulatedFc>, stream: S, label: impl Into<String>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = split(stream, label);
    let mut decoder = FrameDecoder::new();
    info!(link = %reader.label(), "simulated flight controller serving");
    loop {
        let bytes = match reader.read_chunk(IDLE_POLL).await {
            Ok(ReadOutcome::Data(bytes)) => bytes,
            Ok(ReadOutcome::Idle) => continue,
            Err(err) if err.is_closed() => break,
            Err(err) => return Err(err).context("simulator read failed"),
        };
        decoder.extend(&bytes);
        while let Some(result) = decoder.next_frame() {
            let frame = match result {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(error = %err, "simulator dropped malformed input");
                    continue;
                }
            };
            let Some(reply) = fc.handle(&frame) else {
                continue;
            };
            let bytes = reply.to_bytes().context("encoding simulator reply")?;
            match writer.write_frame(&bytes).await {
                Ok(()) => debug!(code = reply.code.get(), len = reply.payload.len(), "reply sent"),
                Err(err) if err.is_closed() => {
                    info!(link = %writer.label(), "peer left before reply");
                    return Ok(());
                }
                Err(err) => return Err(err).context("simulator write failed"),
            }
        }
    }
    info!(link = %reader.label(), stats = ?fc.stats(), "simulated flight controller stopped");
    Ok(())
}

/// In-memory link to a freshly spawned simulator. The returned stream is
/// the host side.
pub fn spawn_duplex(fc: Arc<SimulatedFc>) -> (DuplexStream, JoinHandle<Result<()>>) {
    let (host, device) = tokio::io::duplex(DUPLEX_BUFFER);
    let task = tokio::spawn(serve_stream(fc, device, "sim-duplex"));
    (host, task)
}

/// Accept TCP clients forever, serving each on its own task. All clients
/// share the same flight controller state.
pub async fn serve_tcp(fc: Arc<SimulatedFc>, listener: TcpListener) -> Result<()> {
    let local = listener.local_addr().context("listener address")?;
    info!(%local, "simulator listening");
    loop {
        let (stream, peer) = listener.accept().await.context("accepting simulator client")?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(%peer, error = %err, "nodelay not applied");
        }
        let fc = Arc::clone(&fc);
        tokio::spawn(async move {
            if let Err(err) = serve_stream(fc, stream, format!("tcp://{peer}")).await {
                warn!(%peer, error = %err, "simulator session failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use msp_schema::{codes, Registry};
    use msp_wire::{encode_request, Direction};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> msp_wire::Frame {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 256];
        loop {
            if let Some(frame) = decoder.next_frame() {
                return frame.expect("valid frame");
            }
            let n = stream.read(&mut buf).await.expect("read");
            assert!(n > 0, "simulator closed early");
            decoder.extend(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn duplex_round_trip() {
        let fc = Arc::new(SimulatedFc::new(Registry::builtin()));
        let (mut host, task) = spawn_duplex(Arc::clone(&fc));
        host.write_all(&encode_request(codes::MSP_FC_VERSION, &[]).unwrap())
            .await
            .unwrap();
        let reply = read_frame(&mut host).await;
        assert_eq!(reply.direction, Direction::Response);
        assert_eq!(&reply.payload[..], &[4, 5, 0]);

        drop(host);
        task.await.unwrap().unwrap();
        assert_eq!(fc.stats().replies, 1);
    }

    #[tokio::test]
    async fn garbage_does_not_stop_the_loop() {
        let fc = Arc::new(SimulatedFc::new(Registry::builtin()));
        let (mut host, _task) = spawn_duplex(fc);
        host.write_all(b"noise$M<\x00").await.unwrap();
        host.write_all(&encode_request(codes::MSP_NAME, &[]).unwrap())
            .await
            .unwrap();
        let reply = read_frame(&mut host).await;
        assert_eq!(reply.code, codes::MSP_NAME);
        assert_eq!(&reply.payload[..], b"SIMFC");
    }

    #[tokio::test]
    async fn tcp_clients_are_served() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let fc = Arc::new(SimulatedFc::new(Registry::builtin()));
        tokio::spawn(serve_tcp(fc, listener));

        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client
            .write_all(&encode_request(codes::MSP_API_VERSION, &[]).unwrap())
            .await
            .unwrap();
        let reply = read_frame(&mut client).await;
        assert_eq!(&reply.payload[..], &[0, 1, 46]);
    }
}
