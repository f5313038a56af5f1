//! Fixed-size chunking for a [`Data`](crate::ir::Data) payload fed into a
//! pipe.
//!
//! Python's `str` is a sequence of code points, not bytes, so the upstream
//! implementation this crate's redirect semantics are modeled on needs an
//! incremental UTF-8 encoder to turn a large string into bounded-size
//! output chunks without first materializing the whole encoded buffer.
//! Rust's `String` is already a contiguous, validated UTF-8 byte buffer, so
//! that concern doesn't apply here: chunking a `Data::Text` is the same
//! zero-copy slicing operation as chunking a `Data::Bytes`. This module
//! keeps the name and the chunk-size contract the upstream encoder
//! guarantees (useful for callers porting tests or reasoning about memory
//! bounds) without reimplementing a redundant incremental encoder.

use crate::ir::Data;

/// Yields zero-copy `chunk_size`-byte slices of `data`, in order. The final
/// slice may be shorter than `chunk_size`; empty input yields no slices.
pub(crate) fn iterencode(data: &Data, chunk_size: usize) -> Chunks<'_> {
    assert!(chunk_size > 0, "chunk_size must be positive");
    let bytes: &[u8] = match data {
        Data::Text(s) => s.as_bytes(),
        Data::Bytes(b) => b.as_slice(),
    };
    Chunks { bytes, chunk_size }
}

/// Iterator returned by [`iterencode`].
pub(crate) struct Chunks<'a> {
    bytes: &'a [u8],
    chunk_size: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.bytes.is_empty() {
            return None;
        }
        let take = self.chunk_size.min(self.bytes.len());
        let (chunk, rest) = self.bytes.split_at(take);
        self.bytes = rest;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn concat(data: &Data, chunk_size: usize) -> Vec<u8> {
        iterencode(data, chunk_size).flatten().copied().collect()
    }

    #[test]
    fn bytes_chunks_concatenate_to_input() {
        let data = Data::Bytes(vec![7u8; 200_000]);
        assert_eq!(concat(&data, 65536), vec![7u8; 200_000]);
    }

    #[test]
    fn text_chunks_concatenate_to_utf8_bytes() {
        let text = "héllo wörld — 本☃".repeat(5000);
        let data = Data::Text(text.clone());
        assert_eq!(concat(&data, 4096), text.into_bytes());
    }

    #[test]
    fn all_but_last_chunk_is_full_size() {
        let data = Data::Bytes(vec![1u8; 10_000]);
        let chunks: Vec<_> = iterencode(&data, 4096).collect();
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.len(), 4096);
        }
        let last = chunks.last().unwrap();
        assert!(!last.is_empty() && last.len() <= 4096);
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let data = Data::Bytes(Vec::new());
        assert_eq!(iterencode(&data, 65536).count(), 0);
    }
}
