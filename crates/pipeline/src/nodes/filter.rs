//! In-place PCM transform node.

use alloc::sync::Arc;

use crate::error::StreamError;
use crate::event_ring::EventRing;
use crate::format::StreamFormat;
use crate::node::{NodeBehavior, NodeContext, Step, Transition};
use crate::outbox::Outbox;
use crate::packet::StreamPacket;
use crate::timeout::Timeout;

/// A sample processor a [`FilterNode`] runs on every `Data` packet.
pub trait PcmProcessor: Send + 'static {
    /// Parameter updates accepted through the node mailbox.
    type Command: Send + 'static;

    /// A new stream starts; bytes that follow are laid out as `format`.
    ///
    /// Formats the processor cannot handle must turn processing into a
    /// passthrough until the next call.
    fn configure(&mut self, format: &StreamFormat);

    /// Transform interleaved samples in place.
    fn process(&mut self, pcm: &mut [u8]);

    /// Forget filter history.
    fn reset(&mut self);

    /// Apply a parameter update.
    fn apply(&mut self, cmd: Self::Command);
}

/// Pipeline stage running a [`PcmProcessor`] between two rings.
pub struct FilterNode<P: PcmProcessor> {
    input: Arc<EventRing>,
    output: Arc<EventRing>,
    processor: P,
    outbox: Outbox,
}

impl<P: PcmProcessor> FilterNode<P> {
    /// Node processing packets from `input` into `output`.
    pub fn new(input: Arc<EventRing>, output: Arc<EventRing>, processor: P) -> Self {
        Self {
            input,
            output,
            processor,
            outbox: Outbox::new(),
        }
    }

    /// The wrapped processor.
    pub fn processor(&self) -> &P {
        &self.processor
    }
}

impl<P: PcmProcessor> NodeBehavior for FilterNode<P> {
    type Command = P::Command;

    async fn step(&mut self, _ctx: &NodeContext) -> Result<Step, StreamError> {
        self.outbox.flush(&self.output, Timeout::Forever).await?;
        match self.input.pop_front(Timeout::Forever).await? {
            StreamPacket::NewStream(ns) => {
                self.processor.configure(&ns.format);
                self.outbox.push(ns.into());
            }
            StreamPacket::Data(mut buf) => {
                self.processor.process(&mut buf);
                self.outbox.push(buf.into());
            }
            StreamPacket::Prefill { .. } => {}
            other => self.outbox.push(other),
        }
        Ok(Step::Continue)
    }

    async fn on_command(&mut self, cmd: P::Command, _ctx: &NodeContext) -> Transition {
        self.processor.apply(cmd);
        Transition::Stay
    }

    fn on_stop(&mut self, flush: bool, _ctx: &NodeContext) {
        if flush {
            self.outbox.clear();
            self.processor.reset();
        }
    }
}
