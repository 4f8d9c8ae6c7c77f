use bytes::Bytes;

pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";

/// Incremental scanner for `data: <payload>` SSE lines.
///
/// Upstream frames arrive at arbitrary byte boundaries; the scanner buffers
/// until a newline, then hands back the payload of every complete `data:`
/// line. Lines without the marker (comments, blank keep-alives) are dropped.
#[derive(Debug, Default)]
pub struct SseDataScanner {
    buffer: Vec<u8>,
}

impl SseDataScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = data_payload(&line) {
                payloads.push(payload);
            }
        }

        payloads
    }

    /// Flush a trailing line that never got its newline.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(line).ok()?.trim();
    let payload = text.strip_prefix("data: ")?;
    if payload.is_empty() {
        return None;
    }
    Some(payload.to_string())
}

/// Encode one downstream SSE frame: `data: <json>\n\n`.
pub fn data_frame(json: &str) -> Bytes {
    let mut out = String::with_capacity(json.len() + 8);
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    Bytes::from(out)
}

pub fn done_frame() -> Bytes {
    Bytes::from_static(DONE_FRAME)
}
