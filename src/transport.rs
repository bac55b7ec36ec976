//! Single-exchange TCP transport.
//! Opens a fresh connection per command, writes one framed request, reads one
//! framed response, and closes. The protocol is stateless request/response;
//! there is no connection pooling or reuse.

use crate::error::{KasaError, Result};
use crate::protocol::{self, HEADER_LEN};
use log::debug;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Consecutive zero-byte reads tolerated while accumulating the body.
/// The stream may deliver the payload in several chunks under normal
/// operation, but a stalled or half-closed connection must not hang forever.
const MAX_ZERO_READS: u32 = 2;

/// Perform one blocking request/response exchange.
///
/// The request plaintext is framed and ciphered on the way out; the returned
/// bytes are the deciphered response plaintext. The socket is closed on every
/// exit path (drop). A timed-out exchange is a transport failure; retry is
/// the caller's next scheduled poll, never this call.
pub(crate) async fn exchange(
    host: &str,
    port: u16,
    plaintext: &[u8],
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Vec<u8>> {
    let addr = format!("{}:{}", host, port);
    debug!("Connecting to {} ({} byte request)", addr, plaintext.len());

    let mut stream = timeout(connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| KasaError::ConnectFailed(addr.clone(), "connect timeout".into()))?
        .map_err(|e| KasaError::ConnectFailed(addr.clone(), e.to_string()))?;

    // Full framed request in one write; the transport guarantees full
    // delivery or an error.
    stream.write_all(&protocol::pack_frame(plaintext)).await?;

    let mut header = [0u8; HEADER_LEN];
    timeout(read_timeout, stream.read_exact(&mut header))
        .await
        .map_err(|_| KasaError::ShortHeader)?
        .map_err(|_| KasaError::ShortHeader)?;

    let expected = protocol::parse_header(&header);
    let body = read_body(&mut stream, expected, read_timeout).await?;
    debug!("Response frame from {} (hex): {}", addr, hex::encode(&body));

    protocol::unpack_frame(&header, &body)
}

/// Accumulate exactly `expected` body bytes.
async fn read_body(
    stream: &mut TcpStream,
    expected: usize,
    read_timeout: Duration,
) -> Result<Vec<u8>> {
    let mut body = vec![0u8; expected];
    let mut received = 0usize;
    let mut zero_reads = 0u32;

    while received < expected {
        let n = timeout(read_timeout, stream.read(&mut body[received..]))
            .await
            .map_err(|_| KasaError::ShortBody { expected, received })?
            .map_err(|_| KasaError::ShortBody { expected, received })?;

        if n == 0 {
            zero_reads += 1;
            if zero_reads >= MAX_ZERO_READS {
                return Err(KasaError::ShortBody { expected, received });
            }
        } else {
            zero_reads = 0;
            received += n;
        }
    }

    Ok(body)
}
