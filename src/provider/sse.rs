/// One decoded `data:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    Data(String),
    Done,
}

/// Line-oriented `data:` decoder.
///
/// - Buffers raw bytes so lines (and UTF-8 sequences) split across reads are
///   reassembled before decoding
/// - Every complete `data:` line is one record; blank lines and other fields
///   (`event:`, `id:`, comments) are dropped
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseLine> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(ev) = decode_line(&line) {
                out.push(ev);
            }
        }

        out
    }

    /// Decode whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Option<SseLine> {
        let rest = std::mem::take(&mut self.buf);
        decode_line(&rest)
    }
}

fn decode_line(raw: &[u8]) -> Option<SseLine> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    if raw.is_empty() {
        return None;
    }

    let line = match std::str::from_utf8(raw) {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(error = %e, "skipping SSE line that is not valid UTF-8");
            return None;
        }
    };

    let rest = line.strip_prefix("data:")?;
    let payload = rest.strip_prefix(' ').unwrap_or(rest);
    if payload.trim() == "[DONE]" {
        return Some(SseLine::Done);
    }
    if payload.trim().is_empty() {
        return None;
    }
    Some(SseLine::Data(payload.to_string()))
}
