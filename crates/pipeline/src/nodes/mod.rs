//! Concrete pipeline stages.
//!
//! ```text
//!  SourceNode ──┐
//!               ├─► DecoderNode ─► FilterNode<Equalizer> ─► SinkNode
//!  CallbackInput┘
//! ```
//!
//! Each stage owns the consuming end of its input ring and the producing
//! end of its output ring; rings are shared through `Arc` with the
//! neighbouring stage.

pub mod callback_input;
pub mod equalizer;
pub mod filter;
pub mod sink;
pub mod source;

pub use callback_input::{CallbackInput, InputFeeder};
pub use equalizer::{EqCommand, Equalizer};
pub use filter::{FilterNode, PcmProcessor};
pub use sink::{SinkCommand, SinkNode};
pub use source::{SourceCommand, SourceNode};
