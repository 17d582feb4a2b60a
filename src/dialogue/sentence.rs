//! Incremental sentence segmentation of a streamed reply.

/// Byte index just past the first run of terminal punctuation in `text`.
///
/// A run of consecutive `.`, `!`, `?` is treated as one terminator so that
/// `"Really?!"` and `"Wait..."` stay whole.
pub fn find_sentence_end(text: &str) -> Option<usize> {
    let mut chars = text.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if is_terminal(c) {
            let mut end = text.len();
            while let Some(&(j, next)) = chars.peek() {
                if is_terminal(next) {
                    chars.next();
                } else {
                    end = j;
                    break;
                }
            }
            return Some(end);
        }
    }
    None
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Buffers reply fragments and emits sentences as soon as they complete.
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    /// Create an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a fragment and return every sentence it completes, in order.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);
        let mut sentences = Vec::new();
        while let Some(end) = find_sentence_end(&self.buffer) {
            let sentence: String = self.buffer.drain(..end).collect();
            if let Some(s) = clean(&sentence) {
                sentences.push(s);
            }
        }
        sentences
    }

    /// End of stream: return the unterminated remainder, if any.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        clean(&rest)
    }

    /// Split a complete text in one call.
    pub fn split_all(text: &str) -> Vec<String> {
        let mut splitter = Self::new();
        let mut out = splitter.push(text);
        out.extend(splitter.finish());
        out
    }
}

/// Trim, and drop units with nothing speakable.
fn clean(text: &str) -> Option<String> {
    let trimmed = text.trim();
    trimmed
        .chars()
        .any(char::is_alphanumeric)
        .then(|| trimmed.to_owned())
}
