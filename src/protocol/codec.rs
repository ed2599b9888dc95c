use std::future::Future;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::messages::{Message, MessageKind};
use crate::error::{Result, RouterError};

pub const WIRE_VERSION: u8 = 1;
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported wire version {0}")]
    Version(u8),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_SIZE} byte limit")]
    TooLarge(usize),
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy)]
struct Header {
    version: u8,
    /// Payload size in bytes.
    size: u32,
}

impl Header {
    const LEN: usize = 5;
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Header,
    Payload(Header),
}

/// Frames messages as `version: u8 | size: u32 BE | JSON payload`.
#[derive(Debug, Default)]
pub struct Codec {
    state: State,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for Codec {
    type Item = Message;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Header => {
                    if src.len() < Header::LEN {
                        return Ok(None);
                    }

                    let header = Header {
                        version: src.get_u8(),
                        size: src.get_u32(),
                    };
                    if header.version != WIRE_VERSION {
                        return Err(WireError::Version(header.version));
                    }
                    if header.size as usize > MAX_FRAME_SIZE {
                        return Err(WireError::TooLarge(header.size as usize));
                    }

                    src.reserve(header.size as usize);
                    self.state = State::Payload(header);
                }
                State::Payload(header) => {
                    if src.len() < header.size as usize {
                        return Ok(None);
                    }

                    let payload = src.split_to(header.size as usize);
                    self.state = State::Header;
                    return Ok(Some(serde_json::from_slice(&payload)?));
                }
            }
        }
    }
}

impl Encoder<Message> for Codec {
    type Error = WireError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(WireError::TooLarge(payload.len()));
        }

        dst.reserve(Header::LEN + payload.len());
        dst.put_u8(WIRE_VERSION);
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);

        Ok(())
    }
}

/// Runs `fut` unless it outlives `timeout` or `cancel` fires first.
async fn bounded<F: Future>(cancel: &CancellationToken, timeout: Duration, what: &'static str, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RouterError::Cancelled),
        res = tokio::time::timeout(timeout, fut) => res.map_err(|_| RouterError::Timeout(what)),
    }
}

/// One framed request/reply exchange with a peer router. Every step is
/// bounded by the exchange timeout and aborted by cancellation.
#[derive(Debug)]
pub struct Connection {
    framed: Framed<TcpStream, Codec>,
    peer: String,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Connection {
    pub async fn open(endpoint: &str, timeout: Duration, cancel: CancellationToken) -> Result<Self> {
        let stream = bounded(&cancel, timeout, "connecting", TcpStream::connect(endpoint)).await??;
        stream.set_nodelay(true)?;
        Ok(Self {
            framed: Framed::new(stream, Codec::new()),
            peer: endpoint.to_string(),
            timeout,
            cancel,
        })
    }

    pub fn accept(stream: TcpStream, timeout: Duration, cancel: CancellationToken) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            framed: Framed::new(stream, Codec::new()),
            peer,
            timeout,
            cancel,
        }
    }

    /// Checks that something is listening at `endpoint`, then hangs up.
    pub async fn probe(endpoint: &str, timeout: Duration, cancel: CancellationToken) -> Result<()> {
        Self::open(endpoint, timeout, cancel).await?.finish().await;
        Ok(())
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub async fn send(&mut self, msg: Message) -> Result<()> {
        trace!("→ {:?} to {}", msg.kind, self.peer);
        bounded(&self.cancel, self.timeout, "sending", self.framed.send(msg)).await??;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Message> {
        match bounded(&self.cancel, self.timeout, "receiving", self.framed.next()).await? {
            Some(Ok(msg)) => {
                trace!("← {:?} from {}", msg.kind, self.peer);
                Ok(msg)
            }
            Some(Err(e)) => Err(e.into()),
            None => Err(RouterError::PeerClosed),
        }
    }

    /// Receives the next message and checks its kind.
    pub async fn expect(&mut self, expected: MessageKind) -> Result<Message> {
        let msg = self.recv().await?;
        if msg.kind != expected {
            return Err(RouterError::UnexpectedMessage {
                expected,
                received: msg.kind,
            });
        }
        Ok(msg)
    }

    pub async fn request(&mut self, msg: Message, reply: MessageKind) -> Result<Message> {
        self.send(msg).await?;
        self.expect(reply).await
    }

    pub async fn close(mut self) -> Result<()> {
        bounded(&self.cancel, self.timeout, "closing", self.framed.close()).await??;
        Ok(())
    }

    /// Closes once the exchange is complete. The outcome is already decided,
    /// so a failed shutdown is only logged.
    pub async fn finish(self) {
        let peer = self.peer.clone();
        if let Err(e) = self.close().await {
            debug!("Closing connection to {} failed: {}", peer, e);
        }
    }
}
