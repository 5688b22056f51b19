use socket_harbor::{Error, Server, ServerConfig};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";
const MASK_KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

const OP_CONTINUE: u8 = 0x0;
const OP_TEXT: u8 = 0x1;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;

fn spawn_server(server: Server) {
    tokio::spawn(async move {
        let _ = server.listen().await;
    });
}

/// Connects, performs the upgrade handshake and returns the stream plus the
/// server's HTTP response.
async fn connect(port: u16, extra_headers: &str) -> (TcpStream, String) {
    let mut stream = None;
    for _ in 0..50 {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
    let mut stream = stream.expect("server did not come up");

    let request = format!(
        "GET / HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n{}\r\n",
        SAMPLE_KEY, extra_headers
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        response.push(byte[0]);
    }
    let response = String::from_utf8(response).unwrap();
    assert!(
        response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"),
        "unexpected handshake response: {}",
        response
    );
    assert!(response.contains(SAMPLE_ACCEPT));

    (stream, response)
}

/// Builds a client-to-server frame, masked the way RFC 6455 requires.
fn masked_frame(opcode: u8, fin: bool, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![(fin as u8) << 7 | opcode];
    let len = payload.len();
    if len <= 125 {
        frame.push(0x80 | len as u8);
    } else if len <= 65535 {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }
    frame.extend_from_slice(&MASK_KEY);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ MASK_KEY[i % 4]));
    frame
}

/// Reads one server frame, asserting it is unmasked. Returns the first
/// header byte and the payload.
async fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await.unwrap();
    assert_eq!(header[1] & 0x80, 0, "server frames must not be masked");

    let mut len = (header[1] & 0x7f) as usize;
    if len == 126 {
        let mut ext = [0u8; 2];
        stream.read_exact(&mut ext).await.unwrap();
        len = u16::from_be_bytes(ext) as usize;
    } else if len == 127 {
        let mut ext = [0u8; 8];
        stream.read_exact(&mut ext).await.unwrap();
        len = u64::from_be_bytes(ext) as usize;
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    (header[0], payload)
}

async fn read_until_eof(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    loop {
        match timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
            Ok(Ok(0)) => return,
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => return,
            Err(_) => panic!("connection was not closed"),
        }
    }
}

#[tokio::test]
async fn echo_round_trip() {
    let mut server = Server::new("127.0.0.1", 9301);
    server.on_text(|client, _text| async move {
        client.text_all("Hello!").await.unwrap();
    });
    spawn_server(server);

    let (mut stream, _) = connect(9301, "").await;
    stream
        .write_all(&masked_frame(OP_TEXT, true, b"Hi"))
        .await
        .unwrap();

    let mut echoed = vec![0u8; 8];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, [0x81, 0x06, b'H', b'e', b'l', b'l', b'o', b'!']);
}

#[tokio::test]
async fn fragmented_message_is_reassembled() {
    let mut server = Server::new("127.0.0.1", 9302);
    server.on_text(|client, text| async move {
        client.text_all(&text).await.unwrap();
    });
    spawn_server(server);

    let (mut stream, _) = connect(9302, "").await;
    stream
        .write_all(&masked_frame(OP_TEXT, false, b"Hel"))
        .await
        .unwrap();
    stream
        .write_all(&masked_frame(OP_CONTINUE, true, b"lo"))
        .await
        .unwrap();

    let (first_byte, payload) = read_frame(&mut stream).await;
    assert_eq!(first_byte, 0x81);
    assert_eq!(payload, b"Hello");
}

#[tokio::test]
async fn large_sends_are_chunked() {
    const SIZE: usize = 130_000;

    let mut server = Server::new("127.0.0.1", 9303);
    server.on_text(|client, _text| async move {
        client.text(&"x".repeat(SIZE)).await.unwrap();
    });
    spawn_server(server);

    let (mut stream, _) = connect(9303, "").await;
    stream
        .write_all(&masked_frame(OP_TEXT, true, b"go"))
        .await
        .unwrap();

    let (first_byte, first_payload) = read_frame(&mut stream).await;
    assert_eq!(first_byte, 0x01, "first fragment: text opcode, FIN clear");
    assert_eq!(first_payload.len(), 65531);

    let (second_byte, second_payload) = read_frame(&mut stream).await;
    assert_eq!(second_byte, 0x80, "last fragment: continue opcode, FIN set");
    assert_eq!(second_payload.len(), SIZE - 65531);

    let mut assembled = first_payload;
    assembled.extend_from_slice(&second_payload);
    assert_eq!(assembled, "x".repeat(SIZE).into_bytes());
}

#[tokio::test]
async fn close_handshake_completes() {
    let mut server = Server::new("127.0.0.1", 9304);
    server.on_close(|client| async move {
        let _ = client.close().await;
    });
    spawn_server(server);

    let (mut stream, _) = connect(9304, "").await;
    stream
        .write_all(&masked_frame(OP_CLOSE, true, &[0x03, 0xe8]))
        .await
        .unwrap();

    let (first_byte, payload) = read_frame(&mut stream).await;
    assert_eq!(first_byte, 0x88);
    assert_eq!(payload, [0x03, 0xe8]);

    read_until_eof(&mut stream).await;
}

#[tokio::test]
async fn unanswered_close_is_echoed_by_the_engine() {
    let server = Server::new("127.0.0.1", 9305);
    spawn_server(server);

    let (mut stream, _) = connect(9305, "").await;
    stream
        .write_all(&masked_frame(OP_CLOSE, true, &[0x03, 0xe8]))
        .await
        .unwrap();

    let (first_byte, payload) = read_frame(&mut stream).await;
    assert_eq!(first_byte, 0x88);
    assert_eq!(payload, [0x03, 0xe8]);

    read_until_eof(&mut stream).await;
}

#[tokio::test]
async fn oversize_message_reports_error_then_disconnect() {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut server = Server::new("127.0.0.1", 9306);
    server.set_config(ServerConfig {
        read_buffer_size: 1024,
        max_message_size: 1024,
        compression: false,
    });
    let error_tx = tx.clone();
    server.on_error(move |_, info| {
        let error_tx = error_tx.clone();
        async move {
            let kind = match info.error {
                Error::MessageTooLarge => "message-too-large",
                _ => "other",
            };
            let _ = error_tx.send(kind);
        }
    });
    server.on_disconnect(move |_| {
        let tx = tx.clone();
        async move {
            let _ = tx.send("disconnect");
        }
    });
    spawn_server(server);

    let (mut stream, _) = connect(9306, "").await;
    let _ = stream
        .write_all(&masked_frame(OP_TEXT, true, &vec![b'x'; 2048]))
        .await;

    let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert_eq!(first, Some("message-too-large"));
    let second = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert_eq!(second, Some("disconnect"));

    read_until_eof(&mut stream).await;
}

#[tokio::test]
async fn unmasked_client_frame_is_rejected() {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut server = Server::new("127.0.0.1", 9307);
    server.on_error(move |_, info| {
        let tx = tx.clone();
        async move {
            let kind = match info.error {
                Error::UnmaskedFrame => "unmasked",
                _ => "other",
            };
            let _ = tx.send(kind);
        }
    });
    spawn_server(server);

    let (mut stream, _) = connect(9307, "").await;
    let _ = stream.write_all(&[0x81, 0x02, b'H', b'i']).await;

    let report = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert_eq!(report, Some("unmasked"));

    read_until_eof(&mut stream).await;
}

#[tokio::test]
async fn ping_is_answered_with_matching_pong() {
    let server = Server::new("127.0.0.1", 9308);
    spawn_server(server);

    let (mut stream, _) = connect(9308, "").await;
    stream
        .write_all(&masked_frame(OP_PING, true, b"p"))
        .await
        .unwrap();

    let (first_byte, payload) = read_frame(&mut stream).await;
    assert_eq!(first_byte, 0x8a);
    assert_eq!(payload, b"p");
}

#[tokio::test]
async fn compression_negotiates_and_inflates() {
    const TEXT: &str = "a reply that deflate can shrink shrink shrink shrink shrink";

    let mut server = Server::new("127.0.0.1", 9309);
    server.set_config(ServerConfig {
        compression: true,
        ..ServerConfig::default()
    });
    server.on_text(|client, _text| async move {
        client.text_all(TEXT).await.unwrap();
    });
    spawn_server(server);

    let (mut stream, response) = connect(
        9309,
        "Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits\r\n",
    )
    .await;
    assert!(response.contains("Sec-WebSocket-Extensions: permessage-deflate\r\n"));

    // An uncompressed frame from the client is still fine; compression is
    // per frame.
    stream
        .write_all(&masked_frame(OP_TEXT, true, b"go"))
        .await
        .unwrap();

    let (first_byte, payload) = read_frame(&mut stream).await;
    assert_eq!(first_byte, 0xc1, "FIN + RSV1 + text opcode");
    assert!(payload.len() < TEXT.len());

    let mut input = payload;
    input.extend_from_slice(&[0x00, 0x00, 0xff, 0xff]);
    let mut decompressor = flate2::Decompress::new(false);
    let mut inflated = Vec::with_capacity(16 * 1024);
    decompressor
        .decompress_vec(&input, &mut inflated, flate2::FlushDecompress::Sync)
        .unwrap();
    assert_eq!(inflated, TEXT.as_bytes());
}
