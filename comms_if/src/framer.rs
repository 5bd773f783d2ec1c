//! # Framer
//!
//! Splits a raw byte stream into messages. Every message is terminated by [`DELIMITER`], and a
//! single socket read may carry part of a message, several messages, or both. The framer keeps any
//! trailing fragment and prefixes it to the next chunk it is fed.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::fmt;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Message terminator.
pub const DELIMITER: u8 = b'#';

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The bytes of one message, without its terminator. Never contains a [`DELIMITER`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RawMessage(Vec<u8>);

/// Reassembles messages from a byte stream.
///
/// By default there is no limit on message length, so a peer that never sends a delimiter will
/// grow the buffer without bound. Use [`Framer::with_max_len`] to cap it.
#[derive(Debug, Default)]
pub struct Framer {
    /// Bytes fed but not yet consumed start at `start`.
    buf: Vec<u8>,
    start: usize,

    max_len: Option<usize>,

    /// Set while skipping the rest of an overlong message.
    discarding: bool,
}

/// Lazy iterator over the messages completed by one [`Framer::feed`] call.
///
/// Messages the caller doesn't take stay buffered and are returned by the next `feed`.
pub struct Frames<'a> {
    framer: &'a mut Framer,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Defects in the byte stream itself.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FramingDefect {
    #[error("Message exceeded the maximum length of {limit} bytes and was discarded")]
    MessageTooLong { limit: usize },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RawMessage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The message as text, or `None` if it isn't valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for RawMessage {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for RawMessage {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl Framer {
    /// Create a framer with no limit on message length.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a framer which discards messages longer than `max_len` bytes.
    ///
    /// An overlong message produces a single [`FramingDefect::MessageTooLong`], after which the
    /// framer skips to the next delimiter.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len: Some(max_len),
            ..Default::default()
        }
    }

    /// Feed a chunk of bytes into the framer, returning the messages it completes.
    pub fn feed(&mut self, bytes: &[u8]) -> Frames<'_> {
        self.compact();
        self.buf.extend_from_slice(bytes);
        Frames { framer: self }
    }

    /// Bytes held back waiting for a delimiter.
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.start..]
    }

    fn next_frame(&mut self) -> Option<Result<RawMessage, FramingDefect>> {
        loop {
            let pending = &self.buf[self.start..];

            match pending.iter().position(|b| *b == DELIMITER) {
                Some(len) => {
                    let msg_start = self.start;
                    self.start += len + 1;

                    if self.discarding {
                        // Tail of an overlong message, already reported
                        self.discarding = false;
                        continue;
                    }

                    if let Some(limit) = self.max_len {
                        if len > limit {
                            return Some(Err(FramingDefect::MessageTooLong { limit }));
                        }
                    }

                    // Consecutive delimiters are silently skipped
                    if len == 0 {
                        continue;
                    }

                    return Some(Ok(RawMessage::from(
                        &self.buf[msg_start..msg_start + len],
                    )));
                }
                None => {
                    if let Some(limit) = self.max_len {
                        if pending.len() > limit {
                            // Drop what we have now so the buffer stays bounded
                            self.start = self.buf.len();

                            if !self.discarding {
                                self.discarding = true;
                                return Some(Err(FramingDefect::MessageTooLong { limit }));
                            }
                        }
                    }

                    return None;
                }
            }
        }
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<RawMessage, FramingDefect>;

    fn next(&mut self) -> Option<Self::Item> {
        self.framer.next_frame()
    }
}

impl<'a> Drop for Frames<'a> {
    fn drop(&mut self) {
        self.framer.compact();
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn collect(framer: &mut Framer, bytes: &[u8]) -> Vec<Result<RawMessage, FramingDefect>> {
        framer.feed(bytes).collect()
    }

    fn feed_in_chunks(
        mut framer: Framer,
        stream: &[u8],
        chunk: usize,
    ) -> Vec<Result<RawMessage, FramingDefect>> {
        stream
            .chunks(chunk)
            .flat_map(|c| collect(&mut framer, c))
            .collect()
    }

    #[test]
    fn test_split_and_buffer() {
        let mut framer = Framer::new();

        let out = collect(&mut framer, b"forward-500#stop#lef");
        assert_eq!(
            out,
            vec![Ok(RawMessage::from("forward-500")), Ok(RawMessage::from("stop"))]
        );
        assert_eq!(framer.pending(), b"lef");

        let out = collect(&mut framer, b"t-200#");
        assert_eq!(out, vec![Ok(RawMessage::from("left-200"))]);
        assert!(framer.pending().is_empty());
    }

    #[test]
    fn test_empty_fragments_skipped() {
        let mut framer = Framer::new();
        let out = collect(&mut framer, b"##stop###raise#");
        assert_eq!(
            out,
            vec![Ok(RawMessage::from("stop")), Ok(RawMessage::from("raise"))]
        );
    }

    #[test]
    fn test_unconsumed_frames_kept() {
        let mut framer = Framer::new();

        {
            let mut frames = framer.feed(b"stop#raise#lower#");
            assert_eq!(frames.next(), Some(Ok(RawMessage::from("stop"))));
        }

        let out = collect(&mut framer, b"");
        assert_eq!(
            out,
            vec![Ok(RawMessage::from("raise")), Ok(RawMessage::from("lower"))]
        );
    }

    #[test]
    fn test_chunk_boundary_independence() {
        let stream: &[u8] = b"forward-500#stop##driveleft-120-300#lift#emergency#back-1";

        let whole = collect(&mut Framer::new(), stream);
        assert_eq!(whole.len(), 5);

        for chunk in 1..=stream.len() {
            assert_eq!(
                feed_in_chunks(Framer::new(), stream, chunk),
                whole,
                "chunk size {}",
                chunk
            );
        }

        // Every possible two-way split
        for split in 0..=stream.len() {
            let mut framer = Framer::new();
            let mut out = collect(&mut framer, &stream[..split]);
            out.extend(collect(&mut framer, &stream[split..]));
            assert_eq!(out, whole, "split at {}", split);
        }
    }

    #[test]
    fn test_max_len() {
        let mut framer = Framer::with_max_len(8);

        let out = collect(&mut framer, b"stop#this-is-far-too-long#raise#");
        assert_eq!(
            out,
            vec![
                Ok(RawMessage::from("stop")),
                Err(FramingDefect::MessageTooLong { limit: 8 }),
                Ok(RawMessage::from("raise")),
            ]
        );

        // Exactly at the limit is fine
        let out = collect(&mut framer, b"12345678#");
        assert_eq!(out, vec![Ok(RawMessage::from("12345678"))]);
    }

    #[test]
    fn test_max_len_bounds_buffer() {
        let mut framer = Framer::with_max_len(4);

        let out = collect(&mut framer, b"aaaaaaaa");
        assert_eq!(out, vec![Err(FramingDefect::MessageTooLong { limit: 4 })]);
        assert!(framer.pending().is_empty());

        // Still skipping the same message, no second error
        assert!(collect(&mut framer, b"bbbbbbbbbb").is_empty());
        assert!(framer.pending().is_empty());

        let out = collect(&mut framer, b"cc#stop#");
        assert_eq!(out, vec![Ok(RawMessage::from("stop"))]);
    }

    #[test]
    fn test_max_len_chunk_boundary_independence() {
        let stream: &[u8] = b"stop#0123456789abcdef#raise##lift-120#xxxxxxxxxxxxxxxxxxxx";

        let whole = collect(&mut Framer::with_max_len(8), stream);
        assert_eq!(whole.len(), 5);

        for chunk in 1..=stream.len() {
            assert_eq!(
                feed_in_chunks(Framer::with_max_len(8), stream, chunk),
                whole,
                "chunk size {}",
                chunk
            );
        }
    }
}
