//! Cuts streamed text into speakable sentences so playback can start on the
//! first one instead of waiting for the whole reply.

/// Accumulates text deltas and releases complete sentences.
#[derive(Debug, Clone)]
pub struct SentenceBuffer {
    buffer: String,
    min_chars: usize,
}

impl SentenceBuffer {
    pub fn new(min_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            min_chars: min_chars.max(1),
        }
    }

    /// Add a delta; returns any sentences it completed, in order.
    ///
    /// A sentence ends at a newline, or at `.`, `!` or `?` followed by
    /// whitespace. Fragments shorter than `min_chars` stay buffered and join
    /// the next sentence.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut out = Vec::new();
        let mut start = 0;
        let mut chars = self.buffer.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            let boundary = match c {
                '\n' => true,
                '.' | '!' | '?' => chars.peek().is_some_and(|&(_, next)| next.is_whitespace()),
                _ => false,
            };
            if !boundary {
                continue;
            }
            let end = i + c.len_utf8();
            let candidate = self.buffer[start..end].trim();
            if candidate.chars().count() >= self.min_chars {
                out.push(candidate.to_string());
                start = end;
            }
        }
        self.buffer.drain(..start);
        out
    }

    /// Whatever is left once the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
