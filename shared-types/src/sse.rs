//! Server-Sent Events framing for execution streams.
//!
//! Each event is written as a single `data: <json>\n\n` frame. The decoder is
//! incremental: it accepts arbitrary byte chunks, holds back the trailing
//! (possibly incomplete) fragment, and yields every complete frame in order.

use serde_json::Value;

use crate::StreamEvent;

const FRAME_DELIMITER: &[u8] = b"\n\n";

#[derive(Debug, thiserror::Error)]
pub enum SseDecodeError {
    #[error("invalid UTF-8 in event stream frame")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed event frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event frame missing string `type` field")]
    MissingType,
}

/// Encode one event as an SSE frame.
pub fn encode_event(event: &StreamEvent) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    Ok(format!("data: {json}\n\n"))
}

/// Incremental frame parser with an explicit pending buffer.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    /// Offset into `pending` before which no delimiter can start.
    scan_from: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held back waiting for a frame delimiter.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feed a chunk and return every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, SseDecodeError> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut consumed = 0;
        let mut search_from = self.scan_from;
        while let Some(offset) = find_delimiter(&self.pending[search_from..]) {
            let frame_end = search_from + offset;
            let frame = &self.pending[consumed..frame_end];
            consumed = frame_end + FRAME_DELIMITER.len();
            search_from = consumed;
            if let Some(event) = decode_frame(frame)? {
                events.push(event);
            }
        }
        self.pending.drain(..consumed);
        // A delimiter may straddle the next chunk boundary.
        self.scan_from = self
            .pending
            .len()
            .saturating_sub(FRAME_DELIMITER.len() - 1);
        Ok(events)
    }

    /// Parse whatever is left once the stream has ended.
    ///
    /// A residual that is a truncated JSON value is dropped; any other decoding
    /// failure is returned.
    pub fn finish(self) -> Result<Option<StreamEvent>, SseDecodeError> {
        let residual = trim_ascii(&self.pending);
        if residual.is_empty() {
            return Ok(None);
        }
        match decode_frame(residual) {
            Err(SseDecodeError::Json(err)) if err.is_eof() => {
                tracing::debug!(
                    bytes = residual.len(),
                    "Discarding incomplete trailing event frame"
                );
                Ok(None)
            }
            other => other,
        }
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(FRAME_DELIMITER.len())
        .position(|window| window == FRAME_DELIMITER)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(start);
    &bytes[start..end]
}

fn decode_frame(frame: &[u8]) -> Result<Option<StreamEvent>, SseDecodeError> {
    let text = std::str::from_utf8(frame)?;

    let mut data_lines: Vec<&str> = Vec::new();
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
        // event:, id: and retry: fields carry nothing for this protocol.
    }
    if data_lines.is_empty() {
        return Ok(None);
    }

    let payload = data_lines.join("\n");
    if payload.trim().is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(&payload)?;
    let Some(tag) = value.get("type").and_then(Value::as_str) else {
        return Err(SseDecodeError::MissingType);
    };
    if !StreamEvent::KNOWN_TYPES.contains(&tag) {
        tracing::trace!(event_type = tag, "Skipping unknown event type");
        return Ok(None);
    }

    Ok(Some(serde_json::from_value(value)?))
}
