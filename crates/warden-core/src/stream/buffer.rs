//! Token buffer for chunked text streaming
//!
//! Coalesces the token-sized fragments of a generator into chunks of at
//! least `min_chunk_size` characters so clients receive fewer, larger deltas.
//! Concatenating every emitted chunk reproduces the input exactly.

use futures::{Stream, StreamExt};
use tracing::{debug, trace};

use crate::constants;

/// Accumulates fragments and hands out chunks once the threshold is reached
#[derive(Debug)]
pub struct TokenBuffer {
    /// Internal buffer for accumulating text
    buffer: String,
    /// Characters currently held in `buffer`
    buffered_chars: usize,
    /// Flush threshold (in characters)
    min_chunk_size: usize,
    /// Total characters processed
    total_chars: usize,
    /// Chunks handed out so far
    chunks_emitted: usize,
}

impl TokenBuffer {
    /// Create a buffer with the given threshold (clamped to at least 1)
    pub fn new(min_chunk_size: usize) -> Self {
        Self {
            buffer: String::with_capacity(min_chunk_size.max(1) * 4),
            buffered_chars: 0,
            min_chunk_size: min_chunk_size.max(1),
            total_chars: 0,
            chunks_emitted: 0,
        }
    }

    /// Append a fragment; returns a chunk when the threshold is reached
    ///
    /// The whole accumulator is emitted, so a chunk always ends on a
    /// fragment boundary and never inside a character.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        if fragment.is_empty() {
            return None;
        }

        let chars = fragment.chars().count();
        self.buffer.push_str(fragment);
        self.buffered_chars += chars;
        self.total_chars += chars;
        trace!(
            "TokenBuffer: +{} chars, holding {}",
            chars,
            self.buffered_chars
        );

        if self.buffered_chars >= self.min_chunk_size {
            Some(self.take())
        } else {
            None
        }
    }

    /// Emit any remainder, even below the threshold
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            debug!(
                "TokenBuffer: finished, {} chars in {} chunks",
                self.total_chars, self.chunks_emitted
            );
            return None;
        }
        let chunk = self.take();
        debug!(
            "TokenBuffer: finished, {} chars in {} chunks",
            self.total_chars, self.chunks_emitted
        );
        Some(chunk)
    }

    fn take(&mut self) -> String {
        self.buffered_chars = 0;
        self.chunks_emitted += 1;
        std::mem::take(&mut self.buffer)
    }

    pub fn total_chars(&self) -> usize {
        self.total_chars
    }

    pub fn chunks_emitted(&self) -> usize {
        self.chunks_emitted
    }

    pub fn min_chunk_size(&self) -> usize {
        self.min_chunk_size
    }
}

impl Default for TokenBuffer {
    fn default() -> Self {
        Self::new(constants::streaming::MIN_CHUNK_SIZE)
    }
}

struct BufferState<S, E> {
    inner: Option<S>,
    buffer: TokenBuffer,
    pending_error: Option<E>,
}

/// Wrap a fragment stream so it yields buffered chunks
///
/// A fragment error first flushes whatever was buffered, then surfaces the
/// error and ends the stream.
pub fn buffered<S, E>(fragments: S, min_chunk_size: usize) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<String, E>> + Unpin,
{
    let state = BufferState {
        inner: Some(fragments),
        buffer: TokenBuffer::new(min_chunk_size),
        pending_error: None,
    };

    futures::stream::unfold(state, |mut state| async move {
        if let Some(err) = state.pending_error.take() {
            return Some((Err(err), state));
        }

        loop {
            let inner = state.inner.as_mut()?;
            let next = inner.next().await;
            match next {
                Some(Ok(fragment)) => {
                    if let Some(chunk) = state.buffer.push(&fragment) {
                        return Some((Ok(chunk), state));
                    }
                }
                Some(Err(err)) => {
                    state.inner = None;
                    return match state.buffer.finish() {
                        Some(chunk) => {
                            state.pending_error = Some(err);
                            Some((Ok(chunk), state))
                        }
                        None => Some((Err(err), state)),
                    };
                }
                None => {
                    state.inner = None;
                    return state.buffer.finish().map(|chunk| (Ok(chunk), state));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks_of(fragments: &[&str], min: usize) -> Vec<String> {
        let mut buffer = TokenBuffer::new(min);
        let mut out: Vec<String> = fragments.iter().filter_map(|f| buffer.push(f)).collect();
        out.extend(buffer.finish());
        out
    }

    #[test]
    fn test_flushes_once_threshold_reached() {
        let chunks = chunks_of(&["Based", " on", " the", " scan", " data"], 20);
        assert_eq!(chunks, vec!["Based on the scan data".to_string()]);
    }

    #[test]
    fn test_remainder_emitted_at_end() {
        let mut buffer = TokenBuffer::new(20);
        assert_eq!(buffer.push("ab"), None);
        assert_eq!(buffer.push("cd"), None);
        assert_eq!(buffer.finish(), Some("abcd".to_string()));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_lossless_and_bounded_for_many_splits() {
        let text = "Open ports: 22/ssh, 443/https. TLS 1.0 enabled on api.example.com; \
                    recommend disabling legacy ciphers and rotating the exposed key.";
        let chars: Vec<char> = text.chars().collect();

        for piece in 1..=9 {
            for min in [1usize, 5, 20, 64] {
                let fragments: Vec<String> = chars
                    .chunks(piece)
                    .map(|c| c.iter().collect::<String>())
                    .collect();
                let refs: Vec<&str> = fragments.iter().map(|s| s.as_str()).collect();
                let chunks = chunks_of(&refs, min);

                assert_eq!(chunks.concat(), text, "piece={} min={}", piece, min);
                let bound = chars.len().div_ceil(min) + 1;
                assert!(chunks.len() <= bound, "piece={} min={}", piece, min);
                assert!(chunks.iter().all(|c| !c.is_empty()));
            }
        }
    }

    #[test]
    fn test_threshold_counts_characters_not_bytes() {
        let mut buffer = TokenBuffer::new(4);
        // 3 characters, 9 bytes
        assert_eq!(buffer.push("日本語"), None);
        assert_eq!(buffer.push("é"), Some("日本語é".to_string()));
        assert_eq!(buffer.total_chars(), 4);
    }

    #[test]
    fn test_empty_fragments_ignored() {
        let chunks = chunks_of(&["", "", "x", ""], 20);
        assert_eq!(chunks, vec!["x".to_string()]);
        assert!(chunks_of(&[], 20).is_empty());
    }

    #[tokio::test]
    async fn test_buffered_stream_matches_buffer() {
        let fragments = stream::iter(
            ["Based", " on", " the", " scan", " data", ", two", " hosts"]
                .into_iter()
                .map(|s| Ok::<_, String>(s.to_string())),
        );
        let chunks: Vec<Result<String, String>> = buffered(fragments, 20).collect().await;
        assert_eq!(
            chunks,
            vec![
                Ok("Based on the scan data".to_string()),
                Ok(", two hosts".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_buffered_stream_flushes_before_error() {
        let fragments = stream::iter(vec![
            Ok("partial".to_string()),
            Err("connection reset".to_string()),
            Ok("never seen".to_string()),
        ]);
        let chunks: Vec<Result<String, String>> = buffered(fragments, 20).collect().await;
        assert_eq!(
            chunks,
            vec![
                Ok("partial".to_string()),
                Err("connection reset".to_string())
            ]
        );
    }
}
