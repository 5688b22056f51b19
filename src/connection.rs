use crate::callbacks::Callbacks;
use crate::client::{Client, Writer};
use crate::codec;
use crate::compression::Inflater;
use crate::config::ServerConfig;
use crate::error::{error_info, Error, ErrorInfo};
use crate::frame::{CloseCode, Frame};
use crate::handshake;
use crate::message::{Assembly, Message, MessageAssembler};
use bytes::{Buf, BytesMut};
use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, error};
use rand::random;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf};
use tokio::net::TcpStream;
use uuid::Uuid;

// Connection ids are random v8 UUIDs, which is more flexible and secure
// than incrementing counters.
fn new_connection_id() -> Uuid {
    let random_bytes: [u8; 16] = random();
    Uuid::new_v8(random_bytes)
}

/// Runs one accepted connection from handshake to teardown. Hosted on its
/// own tokio task by the accept loop.
pub(crate) async fn run(
    stream: TcpStream,
    peer: SocketAddr,
    config: ServerConfig,
    callbacks: Arc<Callbacks>,
) {
    let id = new_connection_id();
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let negotiated = match handshake::accept(&mut reader, &mut write_half, &config, &callbacks).await
    {
        Ok(negotiated) => negotiated,
        Err(error) => {
            // The upgrade never completed, so there is no client to report
            // a disconnect for.
            debug!("connection {} from {}: handshake failed: {}", id, peer, error);
            let _ = write_half.shutdown().await;
            return;
        }
    };
    debug!(
        "connection {} from {}: established (compression: {})",
        id, peer, negotiated.compression
    );

    let client = Arc::new(Client::new(
        Writer::new(write_half, negotiated.compression),
        id,
        peer,
        config.max_message_size,
    ));

    let mut engine = Engine {
        reader,
        client: client.clone(),
        callbacks,
        inflater: negotiated.compression.then(Inflater::new),
        assembler: MessageAssembler::new(config.max_message_size),
        config,
    };

    if let Err(error) = engine.read_loop().await {
        if error.is_benign_disconnect() {
            debug!("connection {} from {}: peer went away: {}", id, peer, error);
        } else {
            engine.dispatch_error(error_info!(error)).await;
        }
    }

    // Exactly one teardown path: shut the socket down, then tell the
    // application.
    client.shutdown().await;
    engine.dispatch_disconnect().await;
    debug!("connection {} from {}: closed", id, peer);
}

struct Engine {
    reader: BufReader<ReadHalf<TcpStream>>,
    client: Arc<Client>,
    callbacks: Arc<Callbacks>,
    config: ServerConfig,
    inflater: Option<Inflater>,
    assembler: MessageAssembler,
}

impl Engine {
    /// Turns wire bytes into callback dispatches until the peer disconnects,
    /// a protocol error ends the connection, or the application asks for
    /// teardown.
    async fn read_loop(&mut self) -> Result<(), Error> {
        let mut chunk = vec![0u8; self.config.read_buffer_size];
        let mut pending = BytesMut::with_capacity(self.config.read_buffer_size);

        'outer: loop {
            if self.client.close_requested() {
                break;
            }

            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            pending.extend_from_slice(&chunk[..n]);

            // Decode every complete frame sitting in the buffer; a trailing
            // partial frame stays put until the next read fills it up.
            while !pending.is_empty() {
                let decoded = match codec::decode(&pending, self.inflater.as_mut()) {
                    Ok(decoded) => decoded,
                    Err(Error::TooFewBytes) => break,
                    Err(Error::MissingBytes { expected, .. }) => {
                        // A frame advertising more than the message cap will
                        // never fit, no point buffering towards it.
                        if expected > self.config.max_message_size {
                            return Err(Error::MessageTooLarge);
                        }
                        break;
                    }
                    Err(error) => return Err(error),
                };
                let consumed = pending.len() - decoded.remaining;
                pending.advance(consumed);

                // Frames arriving at a server must be masked.
                if !decoded.masked {
                    return Err(Error::UnmaskedFrame);
                }

                if self.handle_frame(decoded.frame).await? {
                    break 'outer;
                }
                if self.client.close_requested() {
                    break 'outer;
                }
            }
        }

        Ok(())
    }

    /// Feeds one frame through the assembler and dispatches whatever comes
    /// out. Returns true when the connection should wind down.
    async fn handle_frame(&mut self, frame: Frame) -> Result<bool, Error> {
        match self.assembler.feed(frame)? {
            Assembly::Partial => Ok(false),
            Assembly::Complete(Message::Text(text)) => {
                if let Some(handler) = &self.callbacks.text {
                    dispatch_guarded(handler(self.client.clone(), text), "text").await;
                }
                Ok(false)
            }
            Assembly::Complete(Message::Binary(data)) => {
                if let Some(handler) = &self.callbacks.binary {
                    dispatch_guarded(handler(self.client.clone(), data), "binary").await;
                }
                Ok(false)
            }
            Assembly::Close(payload) => {
                match peer_close_code(&payload) {
                    Some(code) => debug!(
                        "connection {}: peer sent close, status {:?}",
                        self.client.id(),
                        code
                    ),
                    None => debug!(
                        "connection {}: peer sent close with an unrecognized status",
                        self.client.id()
                    ),
                }
                if let Some(handler) = &self.callbacks.close {
                    dispatch_guarded(handler(self.client.clone()), "close").await;
                }
                // Finish the closing handshake unless the application
                // already sent its half.
                if !self.client.close_sent() {
                    let _ = self.client.echo_close(&payload).await;
                }
                Ok(true)
            }
            Assembly::Ping(payload) => {
                if let Some(handler) = &self.callbacks.ping {
                    dispatch_guarded(handler(self.client.clone()), "ping").await;
                }
                let _ = self.client.pong_with(payload).await;
                Ok(false)
            }
            Assembly::Pong(_) => {
                if let Some(handler) = &self.callbacks.pong {
                    dispatch_guarded(handler(self.client.clone()), "pong").await;
                }
                Ok(false)
            }
        }
    }

    async fn dispatch_error(&self, info: ErrorInfo) {
        error!("connection {}: {}", self.client.id(), info);
        if let Some(handler) = &self.callbacks.error {
            dispatch_guarded(handler(Some(self.client.clone()), info), "error").await;
        }
    }

    async fn dispatch_disconnect(&self) {
        if let Some(handler) = &self.callbacks.disconnect {
            dispatch_guarded(handler(self.client.clone()), "disconnect").await;
        }
    }
}

/// Runs one application handler, containing any panic so a misbehaving
/// callback can't take the whole connection task down with it.
pub(crate) async fn dispatch_guarded(fut: BoxFuture<'static, ()>, event: &str) {
    if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
        error!("{} handler panicked", event);
    }
}

// The first two bytes of a close payload carry the status code; a shorter
// payload means the peer sent none.
fn peer_close_code(payload: &[u8]) -> Option<CloseCode> {
    if payload.len() < 2 {
        return Some(CloseCode::NoStatus);
    }
    CloseCode::from_u16(u16::from_be_bytes([payload[0], payload[1]]))
}
