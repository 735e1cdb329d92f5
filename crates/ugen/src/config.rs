//! Defaults and hard limits.

/// Sample rate used when the host doesn't say otherwise.
pub const DEFAULT_SAMPLE_RATE: f64 = 44100.0;

/// Audio block size used when the host doesn't say otherwise.
pub const DEFAULT_BLOCK_SIZE: usize = 128;

/// Control block size used when the host doesn't say otherwise.  Must divide [DEFAULT_BLOCK_SIZE].
pub const DEFAULT_CONTROL_BLOCK_SIZE: usize = 64;

/// The most channels a single handle or proxy owner may have.
pub const MAX_CHANNELS: usize = 64;

/// The most inputs a single node may read.  Wider sums are built as trees.
pub const MAX_INPUTS: usize = 32;

/// The most sources a [crate::nodes::Plug] keeps alive at once.
pub const MAX_PLUG_SOURCES: usize = 16;

/// Partition count at which convolution history stops growing.  Anything past it in the impulse is dropped.
pub const DEFAULT_MAX_PARTITIONS: usize = 8192;

/// Options for [crate::Context::new].
#[derive(Clone, Debug, PartialEq)]
pub struct ContextOptions {
    pub sample_rate: f64,
    pub block_size: usize,
    pub control_block_size: usize,
    pub convolution: ConvolutionOptions,
}

impl Default for ContextOptions {
    fn default() -> Self {
        ContextOptions {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            control_block_size: DEFAULT_CONTROL_BLOCK_SIZE,
            convolution: Default::default(),
        }
    }
}

/// Options shared by every convolution node built against a context.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ConvolutionOptions {
    /// Start each partitioned stage at a random point in its first hop, so that many convolvers don't all transform
    /// on the same block.
    pub stagger: bool,

    /// Upper bound on partitions per stage.
    pub max_partitions: usize,
}

impl Default for ConvolutionOptions {
    fn default() -> Self {
        ConvolutionOptions {
            stagger: true,
            max_partitions: DEFAULT_MAX_PARTITIONS,
        }
    }
}
