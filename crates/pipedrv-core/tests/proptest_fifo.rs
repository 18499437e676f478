//! Property-based tests for the byte FIFO.
//!
//! These check the ordering and bounds laws over arbitrary append/extract
//! sequences rather than hand-picked cases.

use pipedrv_core::fifo::{ByteFifo, BUF_SIZE};
use proptest::prelude::*;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
enum Op {
    Append(Vec<u8>),
    Extract(usize),
}

fn any_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        proptest::collection::vec(any::<u8>(), 0..400).prop_map(Op::Append),
        (0usize..1500).prop_map(Op::Extract),
    ]
}

/// Chunks whose total length stays within capacity.
fn chunks_within_capacity() -> impl Strategy<Value = Vec<Vec<u8>>> {
    proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..200), 0..8)
        .prop_filter("total must fit", |chunks| {
            chunks.iter().map(Vec::len).sum::<usize>() <= BUF_SIZE
        })
}

proptest! {
    /// Appends totalling at most C, then one extract of the total, return the
    /// concatenation in order.
    #[test]
    fn test_fifo_law(chunks in chunks_within_capacity()) {
        let mut fifo = ByteFifo::new();
        let mut expected = Vec::new();
        for chunk in &chunks {
            prop_assert_eq!(fifo.append(chunk), chunk.len());
            expected.extend_from_slice(chunk);
        }
        prop_assert_eq!(fifo.extract(expected.len()), expected);
        prop_assert!(fifo.is_empty());
    }

    /// The fill cursor stays within [0, C] and the FIFO matches a reference
    /// queue after every operation.
    #[test]
    fn test_matches_reference_queue(ops in proptest::collection::vec(any_op(), 0..64)) {
        let mut fifo = ByteFifo::new();
        let mut model: VecDeque<u8> = VecDeque::new();

        for op in ops {
            match op {
                Op::Append(bytes) => {
                    let accepted = fifo.append(&bytes);
                    let room = BUF_SIZE - model.len();
                    prop_assert_eq!(accepted, bytes.len().min(room));
                    model.extend(&bytes[..accepted]);
                }
                Op::Extract(n) => {
                    let out = fifo.extract(n);
                    let take = n.min(model.len());
                    let expected: Vec<u8> = model.drain(..take).collect();
                    prop_assert_eq!(out, expected);
                }
            }
            prop_assert!(fifo.len() <= BUF_SIZE);
            prop_assert_eq!(fifo.len(), model.len());
            let pending: Vec<u8> = model.iter().copied().collect();
            prop_assert_eq!(fifo.as_slice(), pending.as_slice());
        }
    }

    /// Appending C+k bytes to an empty FIFO always accepts exactly C.
    #[test]
    fn test_truncation_idempotent(k in 0usize..4096, byte in any::<u8>()) {
        let mut fifo = ByteFifo::new();
        let data = vec![byte; BUF_SIZE + k];
        prop_assert_eq!(fifo.append(&data), BUF_SIZE);
        prop_assert_eq!(fifo.len(), BUF_SIZE);
        prop_assert!(fifo.is_full());
    }

    /// Extracting n bytes then appending them back onto an emptied buffer
    /// restores the same leading content.
    #[test]
    fn test_extract_then_reappend_restores_content(
        data in proptest::collection::vec(any::<u8>(), 1..BUF_SIZE),
        n in 0usize..BUF_SIZE,
    ) {
        let mut fifo = ByteFifo::new();
        fifo.append(&data);
        let before = fifo.as_slice().to_vec();

        let head = fifo.extract(n);
        let tail = fifo.extract(BUF_SIZE);
        prop_assert_eq!(fifo.append(&head), head.len());
        prop_assert_eq!(fifo.append(&tail), tail.len());
        prop_assert_eq!(fifo.as_slice(), before.as_slice());
    }
}
