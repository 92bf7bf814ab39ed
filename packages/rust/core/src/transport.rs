//! Wire framing for the progress stream.
//!
//! Events are framed either as newline-delimited JSON or as server-sent
//! events (`event: <type>` / `data: <json>` followed by a blank line).

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::events::ProgressEvent;

/// Output framing for a progress stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Ndjson,
    Sse,
}

/// Frame one event.
pub fn encode_event(event: &ProgressEvent, framing: Framing) -> serde_json::Result<String> {
    let json = serde_json::to_string(event)?;
    Ok(match framing {
        Framing::Ndjson => format!("{json}\n"),
        Framing::Sse => format!("event: {}\ndata: {json}\n\n", event.kind()),
    })
}

/// Write every event from `rx` to `writer` until the stream ends.
///
/// Returns the number of events written. On a write error the receiver is
/// dropped, which tells the emitter that the consumer is gone.
pub async fn forward_events<W>(
    mut rx: mpsc::Receiver<ProgressEvent>,
    writer: &mut W,
    framing: Framing,
) -> std::io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(event) = rx.recv().await {
        let frame = encode_event(&event, framing)?;
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;
        written += 1;
    }
    debug!(written, "progress stream finished");
    Ok(written)
}
