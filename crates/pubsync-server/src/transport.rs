//! TCP transport.
//!
//! Each accepted connection gets a reader loop that feeds decoded frames to
//! the [`ProtocolEngine`] in arrival order, and a writer task that encodes
//! the session's outbound messages onto the socket. EOF or an I/O error on
//! the read side closes the session. After EOF the writer keeps running until
//! replies to requests already received have been flushed, bounded by
//! [`DRAIN_TIMEOUT`].

use crate::engine::{Outbound, ProtocolEngine};
use pubsync_proto::codec::CBOR_HEADER_LEN;
use pubsync_proto::{Codec, MAX_FRAME_LEN};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{TcpListener, TcpStream};

/// How long a half-closed connection may keep flushing pending replies.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Accept connections until the listener fails.
///
/// # Errors
///
/// Returns error if accepting a connection fails.
pub async fn serve(engine: ProtocolEngine, listener: TcpListener) -> io::Result<()> {
    let local = listener.local_addr()?;
    tracing::info!(address = %local, codec = %engine.codec(), "Listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let engine = engine.clone();
        tokio::spawn(async move {
            handle_connection(engine, stream, peer).await;
        });
    }
}

async fn handle_connection(engine: ProtocolEngine, stream: TcpStream, peer: SocketAddr) {
    if let Err(err) = stream.set_nodelay(true) {
        tracing::debug!(%peer, error = %err, "Failed to set TCP_NODELAY");
    }

    let codec = engine.codec();
    let (read_half, write_half) = stream.into_split();
    let (session, outbound) = engine.open();
    tracing::debug!(%peer, session = %session.id(), "Accepted connection");

    let mut writer = tokio::spawn(write_loop(write_half, outbound, codec));

    let mut reader = BufReader::new(read_half);
    let clean_eof = loop {
        match read_frame(&mut reader, codec).await {
            Ok(Some(body)) => engine.handle_frame(&session, &body),
            Ok(None) => break true,
            Err(err) => {
                tracing::warn!(%peer, session = %session.id(), error = %err, "Read failed");
                break false;
            }
        }
    };

    engine.close(&session);
    if !clean_eof {
        writer.abort();
        return;
    }

    // The outbound channel closes once in-flight method calls release the
    // session, which ends the writer.
    let id = session.id().clone();
    drop(session);
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut writer).await.is_err() {
        tracing::debug!(%peer, session = %id, "Pending replies not flushed in time");
        writer.abort();
    }
}

/// Read one frame body. Returns `None` on a clean end of stream.
///
/// # Errors
///
/// Returns error on I/O failure, a truncated frame, or a frame over
/// [`MAX_FRAME_LEN`].
pub async fn read_frame<R>(reader: &mut R, codec: Codec) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    match codec {
        Codec::Json => loop {
            let mut line = Vec::new();
            let read = (&mut *reader)
                .take(MAX_FRAME_LEN as u64 + 2)
                .read_until(b'\n', &mut line)
                .await?;
            if read == 0 {
                return Ok(None);
            }
            if line.last() != Some(&b'\n') && line.len() > MAX_FRAME_LEN {
                return Err(frame_too_large(line.len()));
            }
            while matches!(line.last(), Some(b'\n' | b'\r')) {
                line.pop();
            }
            if !line.is_empty() {
                return Ok(Some(line));
            }
        },
        Codec::Cbor => {
            let mut header = [0u8; CBOR_HEADER_LEN];
            match reader.read_exact(&mut header).await {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(err) => return Err(err),
            }
            let len = u32::from_be_bytes(header) as usize;
            if len > MAX_FRAME_LEN {
                return Err(frame_too_large(len));
            }
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).await?;
            Ok(Some(body))
        }
    }
}

/// Encode outbound messages onto `writer` until the channel closes.
async fn write_loop<W>(mut writer: W, mut outbound: Outbound, codec: Codec)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        let frame = match codec.encode(&message) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(kind = message.kind(), error = %err, "Failed to encode message");
                continue;
            }
        };
        if let Err(err) = writer.write_all(&frame).await {
            tracing::debug!(error = %err, "Write failed");
            break;
        }
    }
    if let Err(err) = writer.shutdown().await {
        tracing::debug!(error = %err, "Shutdown failed");
    }
}

fn frame_too_large(len: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"),
    )
}
