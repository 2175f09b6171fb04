//! Line-delimited JSON channel between slotd and its orchestrator.

use crate::dispatcher::Dispatcher;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use slotd_core::DaemonState;
use slotd_protocol::OutboundMessage;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

/// Serves packets read from `reader` until shutdown or end of input.
///
/// Lines are handed to `dispatcher` in arrival order. Everything sent on the
/// dispatcher's outbound channel is written to `writer` by a single writer
/// task fed from `outbound`. Once termination is signalled, messages already
/// queued are flushed before this returns.
pub async fn serve<R, W>(
    reader: R,
    writer: W,
    dispatcher: Dispatcher,
    outbound: UnboundedReceiver<OutboundMessage>,
    max_packet_bytes: usize,
) -> io::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let state = Arc::clone(dispatcher.state());
    let writer = tokio::spawn(write_outbound(writer, outbound, Arc::clone(&state)));

    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(max_packet_bytes));
    // A decode error makes the framed reader yield `None` once before it
    // resumes reading.
    let mut recovering = false;
    loop {
        let frame = tokio::select! {
            _ = state.shutdown.terminated() => break,
            frame = lines.next() => frame,
        };

        match frame {
            Some(Ok(line)) => {
                recovering = false;
                match serde_json::from_str::<Value>(&line) {
                    Ok(packet) => {
                        dispatcher.dispatch(packet);
                    }
                    Err(err) => debug!(error = %err, "dropping line that is not JSON"),
                }
            }
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                debug!(max_packet_bytes, "dropping oversized line");
                recovering = true;
            }
            None if recovering => recovering = false,
            Some(Err(LinesCodecError::Io(err))) => {
                state.shutdown.terminate();
                if let Err(write_err) = writer.await.map_err(io::Error::from).and_then(|r| r) {
                    warn!(error = %write_err, "writer failed after a read error");
                }
                return Err(err);
            }
            None => {
                info!("channel closed by peer");
                // Nobody is left to answer, so stop the writer as well.
                state.shutdown.terminate();
                break;
            }
        }
    }

    drop(dispatcher);
    writer.await?
}

async fn write_outbound<W>(
    writer: W,
    mut outbound: UnboundedReceiver<OutboundMessage>,
    state: Arc<DaemonState>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut sink = FramedWrite::new(writer, LinesCodec::new());
    loop {
        tokio::select! {
            biased;
            message = outbound.recv() => match message {
                Some(message) => write_message(&mut sink, &message).await?,
                None => break,
            },
            _ = state.shutdown.terminated() => {
                outbound.close();
                while let Some(message) = outbound.recv().await {
                    write_message(&mut sink, &message).await?;
                }
                break;
            }
        }
    }
    Ok(())
}

async fn write_message<W>(
    sink: &mut FramedWrite<W, LinesCodec>,
    message: &OutboundMessage,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = serde_json::to_string(message)?;
    sink.send(line).await.map_err(|err| match err {
        LinesCodecError::Io(err) => err,
        LinesCodecError::MaxLineLengthExceeded => io::Error::other(err),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use slotd_core::NativeEngine;
    use slotd_protocol::AckEnvelope;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadBuf, duplex};
    use tokio::sync::mpsc;

    const MAX_LINE: usize = 1024;

    /// Reader and writer whose every operation fails.
    struct Broken(&'static str);

    impl AsyncRead for Broken {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::other(self.0)))
        }
    }

    impl AsyncWrite for Broken {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::other(self.0)))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::other(self.0)))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn queued_messages_are_flushed_on_termination() {
        let state = Arc::new(DaemonState::new(Arc::new(NativeEngine::new())));
        let (tx, rx) = mpsc::unbounded_channel();
        let (server_out, client_in) = duplex(4096);

        tx.send(AckEnvelope::ok(json!(1), json!(true)).into()).unwrap();
        tx.send(AckEnvelope::ok(json!(2), json!(false)).into()).unwrap();
        state.shutdown.terminate();

        write_outbound(server_out, rx, state).await.unwrap();

        let mut lines = BufReader::new(client_in).lines();
        for expected in [1, 2] {
            let line = lines.next_line().await.unwrap().unwrap();
            let ack: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(ack["id"], json!(expected));
        }
        assert!(lines.next_line().await.unwrap().is_none());
        drop(tx);
    }

    #[tokio::test]
    async fn oversized_lines_are_skipped() {
        let state = Arc::new(DaemonState::new(Arc::new(NativeEngine::new())));
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(state, Some(tx));
        let (mut client_out, server_in) = duplex(4096);
        let (server_out, client_in) = duplex(4096);

        let server = tokio::spawn(serve(server_in, server_out, dispatcher, rx, 64));

        let padding = "x".repeat(128);
        client_out
            .write_all(format!("{{\"id\":1,\"type\":\"PING\",\"pad\":\"{padding}\"}}\n").as_bytes())
            .await
            .unwrap();
        client_out
            .write_all(b"{\"id\":2,\"type\":\"PING\"}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(client_in).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let ack: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(ack["id"], json!(2));

        drop(client_out);
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn read_error_wins_over_writer_error() {
        let state = Arc::new(DaemonState::new(Arc::new(NativeEngine::new())));
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(AckEnvelope::ok(json!(1), json!(true)).into()).unwrap();
        let dispatcher = Dispatcher::new(Arc::clone(&state), Some(tx));

        let err = serve(
            Broken("read failed"),
            Broken("write failed"),
            dispatcher,
            rx,
            MAX_LINE,
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "read failed");
        assert!(state.shutdown.is_terminated());
    }
}
