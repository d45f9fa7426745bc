//! Managed framed connection.
//!
//! Wraps any bidirectional byte stream in the [`GlintCodec`] and splits
//! it into background reader and writer tasks bridged by bounded
//! channels, so session logic works with whole packets and never touches
//! the socket directly. TCP in production; `tokio::io::duplex` in tests.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::codec::GlintCodec;
use crate::error::GlintError;
use crate::packet::WirePacket;

/// Depth of the link's internal packet channels.
const LINK_QUEUE: usize = 64;

/// Cloneable outbound handle.
pub type LinkSender = mpsc::Sender<WirePacket>;

/// A managed connection carrying [`WirePacket`]s.
#[derive(Debug)]
pub struct Link {
    tx: mpsc::Sender<WirePacket>,
    rx: mpsc::Receiver<WirePacket>,
}

impl Link {
    /// Wrap an established stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut writer, mut reader) = Framed::new(stream, GlintCodec).split();

        // Session → network.
        let (user_tx, mut outbound_rx) = mpsc::channel::<WirePacket>(LINK_QUEUE);
        // Network → session.
        let (inbound_tx, user_rx) = mpsc::channel::<WirePacket>(LINK_QUEUE);

        tokio::spawn(async move {
            while let Some(packet) = outbound_rx.recv().await {
                if let Err(e) = writer.send(packet).await {
                    debug!(error = %e, "link write failed");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(result) = reader.next().await {
                match result {
                    Ok(packet) => {
                        if inbound_tx.send(packet).await.is_err() {
                            break; // session side dropped
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "link read failed");
                        break;
                    }
                }
            }
        });

        Self {
            tx: user_tx,
            rx: user_rx,
        }
    }

    /// Dial a TCP peer.
    pub async fn connect(addr: &str) -> Result<Self, GlintError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream))
    }

    /// Queue a packet for transmission.
    pub async fn send(&self, packet: WirePacket) -> Result<(), GlintError> {
        self.tx
            .send(packet)
            .await
            .map_err(|_| GlintError::TransportDisconnect)
    }

    /// Receive the next packet. `None` means the link is gone.
    pub async fn recv(&mut self) -> Option<WirePacket> {
        self.rx.recv().await
    }

    /// Receive with a deadline.
    pub async fn recv_timeout(
        &mut self,
        deadline: std::time::Duration,
    ) -> Result<WirePacket, GlintError> {
        match tokio::time::timeout(deadline, self.rx.recv()).await {
            Ok(Some(packet)) => Ok(packet),
            Ok(None) => Err(GlintError::TransportDisconnect),
            Err(_) => Err(GlintError::Timeout(deadline)),
        }
    }

    /// A cloneable handle for the outbound direction.
    pub fn sender(&self) -> LinkSender {
        self.tx.clone()
    }
}

// ── Tests ────────────────────────────────────────────────────────
