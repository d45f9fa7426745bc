//! Transport: the framed link, per-channel delivery policies, and the
//! encrypting channel multiplexer.

pub mod link;
pub mod mux;
pub mod reliable;
pub mod reorder;

pub use link::{Link, LinkSender};
pub use mux::{ChannelMux, InboundFrame};
pub use reliable::ReliableOutbound;
pub use reorder::ReorderWindow;
