//! Agent output reader task.
//!
//! Reads raw byte chunks from one of the agent's output pipes and forwards
//! them, in read order, as [`ProcessEvent::Output`] through a tokio [`mpsc`]
//! channel. Line assembly and decoding happen on the receiving side, in the
//! session that owns the transcript; the reader never touches it.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::stream::{OutputStream, ProcessEvent};

/// Forward every chunk read from `source` until EOF or a read error.
///
/// Returns the number of bytes forwarded. The task stops early, without
/// error, when the receiving side of `event_tx` has been dropped.
pub async fn run_reader<R>(
    cycle: u64,
    stream: OutputStream,
    source: R,
    event_tx: mpsc::Sender<ProcessEvent>,
) -> usize
where
    R: AsyncRead + Unpin + Send,
{
    let mut chunks = ReaderStream::new(source);
    let mut forwarded = 0usize;

    while let Some(item) = chunks.next().await {
        match item {
            Ok(chunk) => {
                forwarded += chunk.len();
                let event = ProcessEvent::Output {
                    cycle,
                    stream,
                    chunk,
                };
                if event_tx.send(event).await.is_err() {
                    debug!(cycle, ?stream, "reader: event channel closed, stopping");
                    break;
                }
            }
            Err(err) => {
                warn!(cycle, ?stream, error = %err, "reader: read failed, stopping");
                break;
            }
        }
    }

    debug!(cycle, ?stream, bytes = forwarded, "reader: EOF");
    forwarded
}
