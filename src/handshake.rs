use crate::callbacks::Callbacks;
use crate::config::ServerConfig;
use crate::error::Error;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const SEC_WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";
const SEC_WEBSOCKET_EXTENSIONS: &str = "Sec-WebSocket-Extensions";
const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

// Real user agents routinely carry long cookie and User-Agent headers, so
// the per-line bound is generous; the total bound caps what one request can
// make us buffer.
const MAX_HEADER_LINE: usize = 8 * 1024;
const MAX_REQUEST_SIZE: usize = 16 * 1024;

// Attackers sometimes open the TCP socket and never send the upgrade
// request; drop those instead of parking a task on them forever.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

const BAD_REQUEST_RESPONSE: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

/// What the upgrade negotiation settled on.
pub(crate) struct Negotiated {
    pub headers: HashMap<String, String>,
    pub compression: bool,
}

/// Validates the HTTP/1.1 upgrade request and writes the 101 response, or a
/// 400 rejection when the request falls short.
pub(crate) async fn accept<R, W>(
    reader: &mut R,
    writer: &mut W,
    config: &ServerConfig,
    callbacks: &Callbacks,
) -> Result<Negotiated, Error>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let headers = match timeout(HANDSHAKE_TIMEOUT, read_request(reader)).await? {
        Ok(headers) => headers,
        Err(error) => {
            reject(writer).await?;
            return Err(error);
        }
    };

    let key = match headers.get(SEC_WEBSOCKET_KEY) {
        Some(key) => key.clone(),
        None => {
            reject(writer).await?;
            return Err(Error::NoSecWebsocketKey);
        }
    };

    // With compression on, the extension is mandatory: every connection of
    // this server speaks permessage-deflate or doesn't connect at all.
    let compression = config.compression;
    if compression {
        let offered = headers
            .get(SEC_WEBSOCKET_EXTENSIONS)
            .map(|value| offers_permessage_deflate(value))
            .unwrap_or(false);
        if !offered {
            reject(writer).await?;
            return Err(Error::NoDeflateExtension);
        }
    }

    if let Some(handler) = &callbacks.handshake {
        if !handler(&headers) {
            reject(writer).await?;
            return Err(Error::HandshakeRejected);
        }
    }

    let mut response = String::from(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n",
    );
    if compression {
        response.push_str("Sec-WebSocket-Extensions: permessage-deflate\r\n");
    }
    response.push_str("Sec-WebSocket-Accept: ");
    response.push_str(&generate_accept_value(&key));
    response.push_str("\r\n\r\n");

    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;

    Ok(Negotiated {
        headers,
        compression,
    })
}

// Reads CRLF-terminated lines up to the first empty one. The request line is
// skipped; header lines are split on the first ": " and stored with their
// RFC casing intact.
async fn read_request<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<HashMap<String, String>, Error> {
    let mut headers = HashMap::new();
    let mut line = String::new();
    let mut total = 0usize;
    let mut request_line = true;

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            // EOF before the blank line that ends the header block.
            return Err(Error::InvalidUpgradeRequest);
        }
        if n > MAX_HEADER_LINE {
            return Err(Error::HeaderLineTooLong(MAX_HEADER_LINE));
        }
        total += n;
        if total > MAX_REQUEST_SIZE {
            return Err(Error::InvalidUpgradeRequest);
        }

        let trimmed = line.trim_end_matches('\n').trim_end_matches('\r');
        if request_line {
            // Nothing in the request line feeds the negotiation.
            request_line = false;
            continue;
        }
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(": ") {
            headers.insert(name.to_string(), value.to_string());
        }
    }

    Ok(headers)
}

async fn reject<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<(), Error> {
    writer.write_all(BAD_REQUEST_RESPONSE).await?;
    writer.flush().await?;
    Ok(())
}

// The header value is a list of offers separated by commas, each a list of
// parameters separated by semicolons; the bare token anywhere in it is an
// offer we can take.
fn offers_permessage_deflate(header_value: &str) -> bool {
    header_value
        .split(',')
        .flat_map(|offer| offer.split(';'))
        .any(|token| token.trim() == PERMESSAGE_DEFLATE)
}

pub(crate) fn generate_accept_value(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WS_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}
