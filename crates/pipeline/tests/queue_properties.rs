//! Ordering, accounting and blocking properties of the inter-node queues.
#![allow(
    clippy::unwrap_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation
)]

mod common;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use common::data;
use pipeline::byte_ring::ByteRing;
use pipeline::packet::PacketKind;
use pipeline::{EventRing, NewStream, StreamError, StreamFormat, StreamId, StreamPacket, Timeout};
use proptest::prelude::*;

fn stream(id: u16, format: StreamFormat) -> StreamPacket {
    NewStream::new(StreamId::new(id).unwrap(), format).into()
}

/// What a pull returned, reduced to something comparable.
#[derive(Debug, PartialEq, Eq)]
enum Seen {
    Stream(u16),
    Bytes(usize),
}

fn seen(pkt: StreamPacket) -> Seen {
    match pkt {
        StreamPacket::NewStream(ns) => Seen::Stream(ns.stream_id.get()),
        StreamPacket::Data(buf) => Seen::Bytes(buf.len()),
        other => panic!("unexpected {other:?}"),
    }
}

// ── EventRing ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pull_never_crosses_into_the_next_stream() {
    let ring = EventRing::new(16, 4096);
    ring.push_back(stream(1, StreamFormat::pcm(44_100, 16, 2)), Timeout::NONE)
        .await
        .unwrap();
    ring.push_back(data(&[1; 100]), Timeout::NONE).await.unwrap();
    ring.push_back(stream(2, StreamFormat::pcm(48_000, 24, 2)), Timeout::NONE)
        .await
        .unwrap();
    ring.push_back(data(&[2; 50]), Timeout::NONE).await.unwrap();

    let mut got = Vec::new();
    while !ring.is_empty() {
        got.push(seen(ring.pull(30, Timeout::NONE).await.unwrap()));
    }
    assert_eq!(
        got,
        vec![
            Seen::Stream(1),
            Seen::Bytes(30),
            Seen::Bytes(30),
            Seen::Bytes(30),
            Seen::Bytes(10),
            Seen::Stream(2),
            Seen::Bytes(30),
            Seen::Bytes(20),
        ]
    );
    assert_eq!(ring.data_size(), 0);
}

#[tokio::test]
async fn test_prefill_gate_holds_data_until_completed() {
    let ring = Arc::new(EventRing::new(16, 4096));
    ring.push_back(StreamPacket::Prefill { id: 7 }, Timeout::NONE).await.unwrap();
    ring.push_back(data(&[1; 40]), Timeout::NONE).await.unwrap();

    assert_eq!(ring.pull(64, Timeout::NONE).await.unwrap().kind(), PacketKind::Prefill);
    assert!(ring.is_gated());
    assert_eq!(
        ring.pull(64, Timeout::millis(20)).await.unwrap_err(),
        StreamError::Timeout
    );

    // data pushed while gated is held too
    ring.push_back(data(&[2; 24]), Timeout::NONE).await.unwrap();
    assert_eq!(ring.data_size(), 64);

    let consumer = {
        let ring = Arc::clone(&ring);
        tokio::spawn(async move { ring.pull(64, Timeout::Forever).await })
    };
    tokio::task::yield_now().await;
    assert!(!consumer.is_finished());

    ring.complete_prefill(7);
    let first = consumer.await.unwrap().unwrap();
    assert_eq!(&*expect_data(first), &[1; 40][..]);
    assert_eq!(&*expect_data(ring.pull(64, Timeout::NONE).await.unwrap()), &[2; 24][..]);
}

#[tokio::test]
async fn test_already_completed_prefill_does_not_gate() {
    let ring = EventRing::new(16, 4096);
    ring.push_back(StreamPacket::Prefill { id: 3 }, Timeout::NONE).await.unwrap();
    ring.push_back(data(&[1; 8]), Timeout::NONE).await.unwrap();
    ring.complete_prefill(3);
    assert_eq!(ring.pull(64, Timeout::NONE).await.unwrap().kind(), PacketKind::Prefill);
    assert!(!ring.is_gated());
    assert_eq!(ring.pull(64, Timeout::NONE).await.unwrap().data_len(), 8);
}

#[tokio::test]
async fn test_blocked_producer_resumes_after_one_pop() {
    let ring = Arc::new(EventRing::new(4, 4096));
    for _ in 0..4 {
        ring.push_back(data(&[0; 16]), Timeout::NONE).await.unwrap();
    }
    let producer = {
        let ring = Arc::clone(&ring);
        tokio::spawn(async move { ring.push_back(data(&[9; 16]), Timeout::Forever).await })
    };
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
    assert!(!producer.is_finished());

    ring.pop_front(Timeout::NONE).await.unwrap();
    tokio::time::timeout(Duration::from_millis(500), producer)
        .await
        .expect("producer still blocked")
        .unwrap()
        .unwrap();
    assert_eq!(ring.len(), 4);
}

#[tokio::test]
async fn test_stop_signal_releases_a_blocked_consumer() {
    let ring = Arc::new(EventRing::new(4, 4096));
    let consumer = {
        let ring = Arc::clone(&ring);
        tokio::spawn(async move { ring.pull(16, Timeout::Forever).await })
    };
    tokio::task::yield_now().await;
    ring.set_stop_signal();
    let result = tokio::time::timeout(Duration::from_millis(500), consumer).await.unwrap().unwrap();
    assert_eq!(result.unwrap_err(), StreamError::Stopped);
}

fn expect_data(pkt: StreamPacket) -> pipeline::buffer::DataBuf {
    match pkt {
        StreamPacket::Data(buf) => buf,
        other => panic!("expected data, got {other:?}"),
    }
}

#[derive(Debug, Clone)]
enum Op {
    Data(usize),
    End,
    Pop,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1usize..200).prop_map(Op::Data),
        1 => Just(Op::End),
        3 => Just(Op::Pop),
    ]
}

proptest! {
    /// Packets come out in the order they went in, and `data_size` is the
    /// sum of the queued `Data` lengths only.
    #[test]
    fn event_ring_is_fifo_and_counts_only_data(ops in proptest::collection::vec(op(), 1..64)) {
        let ring = EventRing::new(1024, 1 << 20);
        let mut model: VecDeque<(PacketKind, usize)> = VecDeque::new();
        for (n, op) in ops.into_iter().enumerate() {
            match op {
                Op::Data(len) => {
                    let byte = n as u8;
                    prop_assert!(ring.try_push_back(data(&vec![byte; len])).is_ok());
                    model.push_back((PacketKind::Data, len));
                }
                Op::End => {
                    let pkt = StreamPacket::StreamEnd { stream_id: StreamId::FIRST };
                    prop_assert!(ring.try_push_back(pkt).is_ok());
                    model.push_back((PacketKind::StreamEnd, 0));
                }
                Op::Pop => {
                    let Some((kind, len)) = model.pop_front() else {
                        continue;
                    };
                    let pkt = embassy_futures::block_on(ring.pop_front(Timeout::NONE)).unwrap();
                    prop_assert_eq!(pkt.kind(), kind);
                    prop_assert_eq!(pkt.data_len(), len);
                }
            }
            let queued: usize = model.iter().map(|(_, len)| len).sum();
            prop_assert_eq!(ring.data_size(), queued);
            prop_assert_eq!(ring.len(), model.len());
        }
    }
}

// ── ByteRing ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_byte_ring_last_byte_fits_then_writer_blocks() {
    let ring = Arc::new(ByteRing::<16>::new());
    ring.write(&[1; 15], Timeout::NONE).await.unwrap();
    ring.write(&[2], Timeout::NONE).await.unwrap();
    assert!(ring.is_full());
    assert!(!ring.is_empty());

    let writer = {
        let ring = Arc::clone(&ring);
        tokio::spawn(async move { ring.write(&[3], Timeout::Forever).await })
    };
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
    assert!(!writer.is_finished());

    let mut one = [0u8; 1];
    ring.read(&mut one, Timeout::NONE).await.unwrap();
    assert_eq!(one, [1]);
    tokio::time::timeout(Duration::from_millis(500), writer)
        .await
        .expect("writer still blocked")
        .unwrap()
        .unwrap();

    let mut rest = [0u8; 16];
    ring.read(&mut rest, Timeout::NONE).await.unwrap();
    assert_eq!(&rest[..14], &[1; 14]);
    assert_eq!(&rest[14..], &[2, 3]);
    assert!(ring.is_empty());
}

proptest! {
    /// Bytes come out exactly once and in order, however writes and reads
    /// straddle the physical end of the buffer.
    #[test]
    fn byte_ring_round_trips_across_wraparound(chunks in proptest::collection::vec(1usize..24, 1..48)) {
        let ring = ByteRing::<32>::new();
        let mut model: VecDeque<u8> = VecDeque::new();
        let mut next = 0u8;
        for (i, len) in chunks.into_iter().enumerate() {
            if i % 2 == 0 {
                let bytes: Vec<u8> = (0..len).map(|_| { next = next.wrapping_add(1); next }).collect();
                match ring.try_write(&bytes) {
                    Ok(()) => model.extend(bytes),
                    Err(_) => prop_assert!(ring.free_space() < len),
                }
            } else {
                let n = len.min(model.len());
                if n == 0 {
                    continue;
                }
                let mut out = vec![0u8; n];
                embassy_futures::block_on(ring.read(&mut out, Timeout::NONE)).unwrap();
                let expected: Vec<u8> = model.drain(..n).collect();
                prop_assert_eq!(out, expected);
            }
            prop_assert_eq!(ring.data_size(), model.len());
        }
    }
}
