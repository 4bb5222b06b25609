//! Packets a node has produced but not yet queued downstream.

use alloc::collections::VecDeque;

use crate::error::StreamError;
use crate::event_ring::EventRing;
use crate::packet::StreamPacket;
use crate::timeout::Timeout;

/// FIFO of outgoing packets that survives a cancelled step.
///
/// Nodes stage output here, then [`flush`](Outbox::flush) it into their
/// output ring. A flush interrupted at any await point keeps every packet
/// not yet accepted by the ring.
#[derive(Debug, Default)]
pub struct Outbox {
    slot: Option<StreamPacket>,
    backlog: VecDeque<StreamPacket>,
}

impl Outbox {
    /// Empty outbox.
    pub const fn new() -> Self {
        Self {
            slot: None,
            backlog: VecDeque::new(),
        }
    }

    /// Stage `pkt` behind everything already staged.
    pub fn push(&mut self, pkt: StreamPacket) {
        self.backlog.push_back(pkt);
    }

    /// `true` when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.slot.is_none() && self.backlog.is_empty()
    }

    /// Number of staged packets.
    pub fn len(&self) -> usize {
        self.backlog.len().saturating_add(usize::from(self.slot.is_some()))
    }

    /// Next packet a flush would queue.
    pub fn front(&self) -> Option<&StreamPacket> {
        self.slot.as_ref().or_else(|| self.backlog.front())
    }

    /// Drop everything staged.
    pub fn clear(&mut self) {
        self.slot = None;
        self.backlog.clear();
    }

    /// Queue every staged packet into `ring`, in order.
    ///
    /// # Errors
    ///
    /// [`StreamError::Stopped`] or [`StreamError::Timeout`] from the ring;
    /// unqueued packets stay staged.
    pub async fn flush(&mut self, ring: &EventRing, timeout: Timeout) -> Result<(), StreamError> {
        loop {
            if self.slot.is_none() {
                self.slot = self.backlog.pop_front();
            }
            if self.slot.is_none() {
                return Ok(());
            }
            ring.push_from(&mut self.slot, timeout).await?;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::buffer::DataBuf;
    use crate::packet::PacketKind;

    #[tokio::test]
    async fn test_flush_keeps_what_does_not_fit() {
        let ring = EventRing::new(2, 1024);
        let mut out = Outbox::new();
        for _ in 0..3 {
            out.push(StreamPacket::Data(DataBuf::from(&[0u8; 4][..])));
        }
        assert_eq!(out.flush(&ring, Timeout::millis(5)).await, Err(StreamError::Timeout));
        assert_eq!(out.len(), 1);
        assert_eq!(ring.pop_front(Timeout::NONE).await.unwrap().kind(), PacketKind::Data);
        out.flush(&ring, Timeout::NONE).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(ring.len(), 2);
    }

    #[tokio::test]
    async fn test_front_is_the_packet_left_behind() {
        let ring = EventRing::new(1, 1024);
        let mut out = Outbox::new();
        out.push(StreamPacket::Prefill { id: 1 });
        out.push(StreamPacket::Prefill { id: 2 });
        assert_eq!(out.front(), Some(&StreamPacket::Prefill { id: 1 }));
        assert_eq!(out.flush(&ring, Timeout::millis(5)).await, Err(StreamError::Timeout));
        assert_eq!(out.front(), Some(&StreamPacket::Prefill { id: 2 }));
    }
}
