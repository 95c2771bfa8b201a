//! # chain
//!
//! why: a stream's history is the ordered list of segments its leaders created
//! relations: persisted by ledger-commit's ChainStore through the Coordination trait
//! what: SegmentChain with insertion ordering and its flat big-endian byte encoding

use crate::entry::SegmentId;
use crate::error::CoordinationError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

const SEGMENT_ID_LEN: usize = std::mem::size_of::<u64>();

/// Ordered segment ids for one stream. Insertion order is chronological order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentChain {
    segments: Vec<SegmentId>,
}

impl SegmentChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chain from 8-byte big-endian segment ids
    pub fn from_bytes(path: &str, bytes: &[u8]) -> Result<Self, CoordinationError> {
        if bytes.len() % SEGMENT_ID_LEN != 0 {
            return Err(CoordinationError::Corrupted {
                path: path.to_string(),
                reason: format!("chain length {} is not a multiple of 8", bytes.len()),
            });
        }

        let mut buf = bytes;
        let mut segments = Vec::with_capacity(bytes.len() / SEGMENT_ID_LEN);
        while buf.has_remaining() {
            segments.push(buf.get_u64());
        }
        Ok(Self { segments })
    }

    /// Encode as a flat concatenation of 8-byte big-endian ids
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.segments.len() * SEGMENT_ID_LEN);
        for id in &self.segments {
            buf.put_u64(*id);
        }
        buf.freeze()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn append(&mut self, segment: SegmentId) {
        self.segments.push(segment);
    }

    pub fn last(&self) -> Option<SegmentId> {
        self.segments.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.segments.iter().copied()
    }

    /// Segments from `segment` onwards, `segment` included.
    ///
    /// An id the chain has never seen yields the whole chain.
    pub fn starting_at(&self, segment: SegmentId) -> Self {
        let from = self
            .segments
            .iter()
            .position(|id| *id == segment)
            .unwrap_or(0);
        Self {
            segments: self.segments[from..].to_vec(),
        }
    }
}

impl FromIterator<SegmentId> for SegmentChain {
    fn from_iter<I: IntoIterator<Item = SegmentId>>(iter: I) -> Self {
        Self {
            segments: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a SegmentChain {
    type Item = SegmentId;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, SegmentId>>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter().copied()
    }
}

impl fmt::Display for SegmentChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_ids_as_big_endian_u64() {
        let chain: SegmentChain = [1, 258].into_iter().collect();
        let bytes = chain.to_bytes();

        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(&bytes[8..], &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(SegmentChain::from_bytes("p", &bytes).unwrap(), chain);
    }

    #[test]
    fn rejects_truncated_bytes() {
        let err = SegmentChain::from_bytes("acc/day", &[0, 1, 2]).unwrap_err();
        assert!(matches!(err, CoordinationError::Corrupted { .. }));
    }

    #[test]
    fn starting_at_includes_the_segment() {
        let chain: SegmentChain = [10, 11, 12].into_iter().collect();

        assert_eq!(chain.starting_at(11).iter().collect::<Vec<_>>(), vec![11, 12]);
        assert_eq!(chain.starting_at(12).len(), 1);
    }

    #[test]
    fn unknown_segment_yields_whole_chain() {
        let chain: SegmentChain = [10, 11].into_iter().collect();
        assert_eq!(chain.starting_at(99), chain);
    }
}
