//! TCP transport.
//!
//! Splits the stream into a reader task and a writer task. The reader decodes
//! frames into [`Inbound`] events and enforces the read deadline; the writer
//! drains an unbounded queue of packets and completes each write callback
//! once the frame has been flushed. Shutdown is broadcast over a [`watch`]
//! channel so both tasks exit together.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::codec::{decode_packet, encode_packet};
use crate::config::ProtocolConfig;
use crate::error::TransportError;
use crate::framing::{FrameError, FrameReader, FrameWriter};
use crate::packet::{Packet, Payload};
use crate::transport::{CloseFuture, Inbound, Transport, WriteCallback};

type Outbound<M> = (Packet<M>, WriteCallback);

/// A [`Transport`] over one TCP stream.
pub struct TcpTransport<M> {
    peer: SocketAddr,
    /// Runtime the I/O tasks run on, for completing refused writes.
    runtime: Handle,
    outbound: mpsc::UnboundedSender<Outbound<M>>,
    open: Arc<AtomicBool>,
    read_tx: watch::Sender<bool>,
    /// Sending `true` causes reader and writer tasks to exit.
    shutdown_tx: Arc<watch::Sender<bool>>,
    /// Becomes `true` once the writer has shut the stream down.
    closed_rx: watch::Receiver<bool>,
}

impl<M> TcpTransport<M>
where
    M: Payload + Serialize + DeserializeOwned,
{
    /// Connect to `addr` and start the I/O tasks.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        config: &ProtocolConfig,
    ) -> std::io::Result<(Arc<Self>, mpsc::Receiver<Inbound<M>>)> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_stream(stream, config)
    }

    /// Wrap an already connected stream, such as one returned by `accept`.
    ///
    /// Sets `TCP_NODELAY` and spawns the reader and writer tasks. Must be
    /// called inside a tokio runtime.
    pub fn from_stream(
        stream: TcpStream,
        config: &ProtocolConfig,
    ) -> std::io::Result<(Arc<Self>, mpsc::Receiver<Inbound<M>>)> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();

        let open = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        let (closed_tx, closed_rx) = watch::channel(false);
        let (read_tx, read_rx) = watch::channel(true);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer.max(1));

        tokio::spawn(Self::read_loop(
            FrameReader::new(reader, config.frame.clone()),
            inbound_tx,
            read_rx,
            shutdown_rx.clone(),
            Arc::clone(&shutdown_tx),
            Arc::clone(&open),
            config.read_timeout,
        ));
        tokio::spawn(Self::write_loop(
            FrameWriter::new(writer, config.frame.clone()),
            outbound_rx,
            shutdown_rx,
            closed_tx,
            Arc::clone(&open),
        ));

        tracing::debug!("TCP transport to {peer} started");

        let transport = Arc::new(Self {
            peer,
            runtime: Handle::current(),
            outbound,
            open,
            read_tx,
            shutdown_tx,
            closed_rx,
        });
        Ok((transport, inbound_rx))
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Decode frames until the stream ends or shutdown is signalled.
    async fn read_loop(
        mut frames: FrameReader<OwnedReadHalf>,
        inbound: mpsc::Sender<Inbound<M>>,
        mut read_rx: watch::Receiver<bool>,
        mut shutdown_rx: watch::Receiver<bool>,
        shutdown_tx: Arc<watch::Sender<bool>>,
        open: Arc<AtomicBool>,
        read_timeout: Option<Duration>,
    ) {
        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }

            if !*read_rx.borrow_and_update() {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => if changed.is_err() { break },
                    changed = read_rx.changed() => if changed.is_err() { break },
                }
                continue;
            }

            // Waiting for readiness is cancel-safe, so a pause takes effect
            // even while the peer is idle.
            let ready = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = read_rx.changed() => continue,
                ready = with_deadline(read_timeout, frames.get_ref().readable()) => ready,
            };
            match ready {
                None => {
                    let _ = inbound.send(Inbound::Fault(TransportError::Timeout)).await;
                    Self::await_shutdown(&mut shutdown_rx).await;
                    break;
                }
                Some(Err(err)) => {
                    Self::report_io_fault(&inbound, &open, err).await;
                    break;
                }
                Some(Ok(())) => {}
            }

            let frame = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                frame = with_deadline(read_timeout, frames.next_frame()) => frame,
            };
            let event = match frame {
                None => {
                    let _ = inbound.send(Inbound::Fault(TransportError::Timeout)).await;
                    Self::await_shutdown(&mut shutdown_rx).await;
                    break;
                }
                Some(Err(FrameError::ConnectionClosed)) => break,
                Some(Err(FrameError::Io(err))) => {
                    Self::report_io_fault(&inbound, &open, err).await;
                    break;
                }
                Some(Err(err @ FrameError::PayloadTooLarge { .. })) => {
                    // The stream is out of sync; report and stop reading.
                    let _ = inbound.send(Inbound::Fault(err.into())).await;
                    Self::await_shutdown(&mut shutdown_rx).await;
                    break;
                }
                Some(Ok(payload)) => match decode_packet::<M>(&payload) {
                    Ok(packet) => Inbound::Packet(packet),
                    Err(err) => Inbound::Fault(err.into()),
                },
            };
            if inbound.send(event).await.is_err() {
                break;
            }
        }

        open.store(false, Ordering::Release);
        shutdown_tx.send_replace(true);
        let _ = inbound.send(Inbound::Closed).await;
    }

    /// A failed read leaves the stream unusable, so the transport reports
    /// itself closed before the fault reaches the handler.
    async fn report_io_fault(
        inbound: &mpsc::Sender<Inbound<M>>,
        open: &AtomicBool,
        err: std::io::Error,
    ) {
        tracing::debug!("Read error: {err}");
        open.store(false, Ordering::Release);
        let _ = inbound.send(Inbound::Fault(TransportError::Io(err))).await;
    }

    async fn await_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
        while !*shutdown_rx.borrow_and_update() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Write queued packets in order until shutdown is signalled, then fail
    /// whatever is left and shut the stream down.
    async fn write_loop(
        mut frames: FrameWriter<OwnedWriteHalf>,
        mut outbound: mpsc::UnboundedReceiver<Outbound<M>>,
        mut shutdown_rx: watch::Receiver<bool>,
        closed_tx: watch::Sender<bool>,
        open: Arc<AtomicBool>,
    ) {
        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => if changed.is_err() { break },
                next = outbound.recv() => {
                    let Some((packet, on_complete)) = next else { break };
                    let result = match encode_packet(&packet) {
                        Ok(bytes) => frames.send_frame(&bytes).await.map_err(TransportError::from),
                        Err(err) => Err(err.into()),
                    };
                    on_complete(result);
                }
            }
        }

        open.store(false, Ordering::Release);
        outbound.close();
        while let Ok((_, on_complete)) = outbound.try_recv() {
            on_complete(Err(TransportError::Closed));
        }
        if let Err(err) = frames.shutdown().await {
            tracing::debug!("Shutdown of TCP stream failed: {err}");
        }
        closed_tx.send_replace(true);
    }
}

/// Run `fut` under an optional deadline. `None` means it timed out.
async fn with_deadline<F: Future>(deadline: Option<Duration>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

impl<M> Transport<M> for TcpTransport<M>
where
    M: Payload + Serialize + DeserializeOwned,
{
    fn write(&self, packet: Packet<M>, on_complete: WriteCallback) {
        if !self.is_open() {
            self.runtime
                .spawn(async move { on_complete(Err(TransportError::Closed)) });
            return;
        }
        if let Err(mpsc::error::SendError((_, on_complete))) =
            self.outbound.send((packet, on_complete))
        {
            self.runtime
                .spawn(async move { on_complete(Err(TransportError::Closed)) });
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) -> CloseFuture {
        self.open.store(false, Ordering::Release);
        self.shutdown_tx.send_replace(true);

        let mut closed_rx = self.closed_rx.clone();
        Box::pin(async move {
            while !*closed_rx.borrow_and_update() {
                if closed_rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    fn set_read_enabled(&self, enabled: bool) {
        self.read_tx.send_replace(enabled);
    }

    fn is_loopback(&self) -> bool {
        false
    }

    fn peer(&self) -> String {
        self.peer.to_string()
    }
}
