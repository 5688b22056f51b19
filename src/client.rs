use crate::codec;
use crate::compression::Deflater;
use crate::error::Error;
use crate::frame::{CloseCode, Frame, OpCode};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Largest payload `text`/`binary` will put in a single fragment: a
/// 65535-byte write with the four header bytes of a 16-bit-length frame
/// taken off.
pub(crate) const CHUNK_PAYLOAD_SIZE: usize = 65531;

/// Owns the write half of the socket plus the connection's deflate stream.
/// Always used behind the client's mutex, so fragments of one message never
/// interleave with another task's frames.
pub(crate) struct Writer {
    write_half: WriteHalf<TcpStream>,
    deflater: Deflater,
    compression: bool,
}

impl Writer {
    pub fn new(write_half: WriteHalf<TcpStream>, compression: bool) -> Self {
        Self {
            write_half,
            deflater: Deflater::new(),
            compression,
        }
    }

    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), Error> {
        // Control frames are never compressed.
        let deflater = if self.compression && !frame.opcode.is_control() {
            Some(&mut self.deflater)
        } else {
            None
        };
        let bytes = codec::encode(&frame, deflater)?;
        self.write_half.write_all(&bytes).await?;
        self.write_half.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        let _ = self.write_half.shutdown().await;
    }
}

/// Handle to one connected peer, handed to application callbacks.
///
/// The engine owns the connection lifecycle; this handle only carries the
/// send side. Sends after the peer went away return `Ok(false)` instead of
/// failing.
pub struct Client {
    writer: Mutex<Writer>,
    id: Uuid,
    peer: SocketAddr,
    max_message_size: usize,
    close_requested: AtomicBool,
    close_sent: AtomicBool,
}

impl Client {
    pub(crate) fn new(
        writer: Writer,
        id: Uuid,
        peer: SocketAddr,
        max_message_size: usize,
    ) -> Self {
        Self {
            writer: Mutex::new(writer),
            id,
            peer,
            max_message_size,
            close_requested: AtomicBool::new(false),
            close_sent: AtomicBool::new(false),
        }
    }

    /// The connection id used in this connection's log lines.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The peer's remote address.
    pub fn address(&self) -> SocketAddr {
        self.peer
    }

    /// Sends a text message, splitting it into a fragmented message when it
    /// exceeds one fragment's worth of payload.
    pub async fn text(&self, data: &str) -> Result<bool, Error> {
        self.send_chunked(OpCode::Text, data.as_bytes()).await
    }

    /// Sends a text message as exactly one frame.
    pub async fn text_all(&self, data: &str) -> Result<bool, Error> {
        self.send_whole(OpCode::Text, data.as_bytes()).await
    }

    /// Sends a binary message, splitting it into a fragmented message when
    /// it exceeds one fragment's worth of payload.
    pub async fn binary(&self, data: &[u8]) -> Result<bool, Error> {
        self.send_chunked(OpCode::Binary, data).await
    }

    /// Sends a binary message as exactly one frame.
    pub async fn binary_all(&self, data: &[u8]) -> Result<bool, Error> {
        self.send_whole(OpCode::Binary, data).await
    }

    /// Starts the closing handshake with status 1000. The connection stays
    /// up until the peer echoes a close frame.
    pub async fn close(&self) -> Result<bool, Error> {
        self.close_with(CloseCode::Normal, None).await
    }

    /// Starts the closing handshake with the given status code and reason.
    pub async fn close_with(&self, code: CloseCode, reason: Option<&str>) -> Result<bool, Error> {
        self.close_sent.store(true, Ordering::SeqCst);
        self.send_frame(Frame::close(code, reason)).await
    }

    /// Sends an empty ping frame.
    pub async fn ping(&self) -> Result<bool, Error> {
        self.send_frame(Frame::new(true, OpCode::Ping, Vec::new())).await
    }

    /// Sends an empty pong frame.
    pub async fn pong(&self) -> Result<bool, Error> {
        self.send_frame(Frame::new(true, OpCode::Pong, Vec::new())).await
    }

    /// Flags the connection for teardown without a closing handshake. No
    /// close frame goes out; the engine drops the socket when its read loop
    /// next wakes.
    pub fn close_immediately(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn close_sent(&self) -> bool {
        self.close_sent.load(Ordering::SeqCst)
    }

    // Echoes the peer's close payload back to finish the closing handshake
    // when the application hasn't already done so.
    pub(crate) async fn echo_close(&self, payload: &[u8]) -> Result<bool, Error> {
        self.close_sent.store(true, Ordering::SeqCst);
        self.send_frame(Frame::new(true, OpCode::Close, payload.to_vec())).await
    }

    // A ping is answered with a pong carrying the same payload.
    pub(crate) async fn pong_with(&self, payload: Vec<u8>) -> Result<bool, Error> {
        self.send_frame(Frame::new(true, OpCode::Pong, payload)).await
    }

    pub(crate) async fn shutdown(&self) {
        self.writer.lock().await.shutdown().await;
    }

    async fn send_whole(&self, opcode: OpCode, data: &[u8]) -> Result<bool, Error> {
        if data.len() > self.max_message_size {
            return Err(Error::MessageTooLarge);
        }
        self.send_frame(Frame::new(true, opcode, data.to_vec())).await
    }

    async fn send_chunked(&self, opcode: OpCode, data: &[u8]) -> Result<bool, Error> {
        if data.len() > self.max_message_size {
            return Err(Error::MessageTooLarge);
        }
        if data.len() <= CHUNK_PAYLOAD_SIZE {
            return self.send_frame(Frame::new(true, opcode, data.to_vec())).await;
        }

        // Hold the writer across the whole message so no other frame lands
        // between two of its fragments.
        let mut writer = self.writer.lock().await;
        let chunks = data.chunks(CHUNK_PAYLOAD_SIZE);
        let total_chunks = chunks.len();
        for (i, chunk) in chunks.enumerate() {
            let frame = Frame::new(
                i == total_chunks - 1,
                if i == 0 { opcode } else { OpCode::Continue },
                chunk.to_vec(),
            );
            match writer.write_frame(frame).await {
                Ok(()) => {}
                Err(error) if is_peer_gone(&error) => return Ok(false),
                Err(error) => return Err(error),
            }
        }
        Ok(true)
    }

    async fn send_frame(&self, frame: Frame) -> Result<bool, Error> {
        match self.writer.lock().await.write_frame(frame).await {
            Ok(()) => Ok(true),
            Err(error) if is_peer_gone(&error) => Ok(false),
            Err(error) => Err(error),
        }
    }
}

fn is_peer_gone(error: &Error) -> bool {
    match error {
        Error::IOError { source } => matches!(
            source.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::NotConnected
        ),
        _ => false,
    }
}
