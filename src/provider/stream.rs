use super::sse::{LineDecoder, SseLine};
use super::{Delta, DeltaStream, StreamError};
use futures_core::Stream;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Raw body chunks with transport errors already stringified.
type ByteChunks = Pin<Box<dyn Stream<Item = Result<Vec<u8>, String>> + Send>>;

/// Turns one `data:` payload into zero or more deltas.
pub type RecordDecoder = fn(&str) -> Result<Vec<Delta>, serde_json::Error>;

#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    /// `None` waits on the upstream forever.
    pub idle_timeout: Option<Duration>,
}

/// Spawn the read loop for a successful streaming response.
///
/// The task stops when the upstream ends or sends `[DONE]`, when `cancel`
/// fires, or when the returned stream is dropped.
pub fn spawn_reader(
    resp: reqwest::Response,
    decode: RecordDecoder,
    cancel: CancellationToken,
    opts: ReadOptions,
) -> DeltaStream {
    let chunks = resp
        .bytes_stream()
        .map(|item| item.map(|b| b.to_vec()).map_err(|e| e.without_url().to_string()));
    spawn_chunk_reader(Box::pin(chunks), decode, cancel, opts)
}

fn spawn_chunk_reader(
    mut chunks: ByteChunks,
    decode: RecordDecoder,
    cancel: CancellationToken,
    opts: ReadOptions,
) -> DeltaStream {
    let (tx, rx) = mpsc::channel::<Result<Delta, StreamError>>(64);

    tokio::spawn(async move {
        let mut lines = LineDecoder::new();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("stream cancelled");
                    return;
                }
                _ = tx.closed() => return,
                next = next_chunk(&mut chunks, opts.idle_timeout) => next,
            };

            let (batch, at_eof) = match next {
                Ok(Some(bytes)) => (lines.push(&bytes), false),
                Ok(None) => (lines.finish().into_iter().collect(), true),
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            for line in batch {
                match line {
                    SseLine::Done => {
                        tracing::debug!("upstream sent [DONE]");
                        return;
                    }
                    SseLine::Data(payload) => match decode(&payload) {
                        Ok(deltas) => {
                            for d in deltas {
                                if tx.send(Ok(d)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "skipping malformed stream record");
                        }
                    },
                }
            }

            if at_eof {
                tracing::debug!("upstream closed the stream");
                return;
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}

async fn next_chunk(
    chunks: &mut ByteChunks,
    idle_timeout: Option<Duration>,
) -> Result<Option<Vec<u8>>, StreamError> {
    let next = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, chunks.next())
            .await
            .map_err(|_| {
                StreamError::StreamRead(format!(
                    "no data received for {} seconds",
                    limit.as_secs()
                ))
            })?,
        None => chunks.next().await,
    };

    match next {
        Some(Ok(bytes)) => Ok(Some(bytes)),
        Some(Err(e)) => Err(StreamError::StreamRead(e)),
        None => Ok(None),
    }
}
