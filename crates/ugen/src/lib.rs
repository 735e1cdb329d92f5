//! A real-time audio graph: unit generators wired into shared, block-memoized nodes, plus zero-latency convolution.
//!
//! Build graphs with the factories in [nodes] and the arithmetic operators on [UGen], then drive them one block at a
//! time from [Context::next_block].  The processing path neither allocates nor locks.
#[macro_use]
pub mod logging;

mod buffer;
pub mod config;
mod context;
pub mod deferred_drop;
mod error;
mod is_audio_thread;
mod kernel;
mod node;
pub mod nodes;
mod ops;
mod rate;
mod ugen;
mod unique_id;

pub use buffer::Buffer;
pub use config::{ContextOptions, ConvolutionOptions};
pub use context::{Block, BlockId, Context, PrepareSpec};
pub use error::{Error, Result};
pub use is_audio_thread::{mark_audio_thread, unmark_audio_thread, AudioThreadGuard};
pub use kernel::{Kernel, KernelStatus, MultiKernel, ProxyOwner, Signal};
pub use node::{Node, NodeRef};
pub use nodes::*;
pub use rate::Rate;
pub use ugen::UGen;
pub use unique_id::UniqueId;

