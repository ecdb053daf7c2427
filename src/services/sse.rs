//! Incremental parser for upstream server-sent events.

/// Payload of one complete upstream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseData {
    /// A `data:` payload
    Message(String),
    /// The `[DONE]` terminator
    Done,
}

/// SSE parser state.
///
/// Bytes are buffered until a blank line closes an event, so frames split across network
/// reads (including inside a multi-byte UTF-8 sequence) are reassembled before decoding.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return the data payloads of every event completed by them.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseData> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((end, sep_len)) = find_event_boundary(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + sep_len).take(end).collect();
            if let Some(data) = parse_block(&String::from_utf8_lossy(&block)) {
                events.push(data);
            }
        }
        events
    }

    /// Parse whatever is left once the upstream closes without a trailing blank line.
    pub fn finish(&mut self) -> Option<SseData> {
        let block = std::mem::take(&mut self.buffer);
        parse_block(&String::from_utf8_lossy(&block))
    }
}

/// Position of the first blank line and the length of its separator.
fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));

    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_block(block: &str) -> Option<SseData> {
    let mut data: Option<String> = None;

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        if field == "data" {
            match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        }
    }

    data.map(|d| {
        if d.trim() == "[DONE]" {
            SseData::Done
        } else {
            SseData::Message(d)
        }
    })
}
