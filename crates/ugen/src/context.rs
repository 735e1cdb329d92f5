use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use ugen_dsp::{fft_size_for, FftEngine};

use crate::config::{ContextOptions, ConvolutionOptions};
use crate::error::{Error, Result};

/// Identifies one block.  Strictly increasing for the life of a [Context].
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, derive_more::Display,
)]
pub struct BlockId(u64);

impl BlockId {
    pub(crate) fn from_raw(raw: u64) -> BlockId {
        BlockId(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Rate-dependent configuration which buffers and kernels are sized against.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PrepareSpec {
    pub sample_rate: f64,

    /// The most frames any block will have.
    pub block_size: usize,

    /// Frames per control period.  Evenly divides `block_size`.
    pub control_block_size: usize,
}

impl PrepareSpec {
    pub fn new(sample_rate: f64, block_size: usize, control_block_size: usize) -> Result<PrepareSpec> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(Error::invalid_sample_rate(sample_rate));
        }

        if block_size == 0 {
            return Err(Error::invalid_block_size(block_size));
        }

        if control_block_size == 0 {
            return Err(Error::invalid_block_size(control_block_size));
        }

        if block_size % control_block_size != 0 {
            return Err(Error::control_block_mismatch(block_size, control_block_size));
        }

        Ok(PrepareSpec {
            sample_rate,
            block_size,
            control_block_size,
        })
    }
}

/// One block of work, as handed to every node in the graph.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Block {
    id: BlockId,
    frames: usize,
    spec: PrepareSpec,
}

impl Block {
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Audio frames in this block.  At most `spec().block_size`.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Control periods in this block.  A short final block still gets a (partial) period.
    pub fn control_frames(&self) -> usize {
        self.frames.div_ceil(self.spec.control_block_size)
    }

    pub fn sample_rate(&self) -> f64 {
        self.spec.sample_rate
    }

    pub fn control_block_size(&self) -> usize {
        self.spec.control_block_size
    }

    pub fn spec(&self) -> &PrepareSpec {
        &self.spec
    }
}

/// Owns the block counter, the rate-dependent configuration, and resources shared between nodes.
///
/// Nodes are built against a context with `&Context`, and the host drives it from the audio thread through
/// [Context::next_block].  The context owns no threads.
pub struct Context {
    spec: PrepareSpec,
    convolution: ConvolutionOptions,
    next_block: AtomicU64,
    warned_clamp: AtomicBool,
    fft_engines: DashMap<usize, FftEngine, ahash::RandomState>,
}

impl Context {
    pub fn new(options: ContextOptions) -> Result<Context> {
        let spec = PrepareSpec::new(
            options.sample_rate,
            options.block_size,
            options.control_block_size,
        )?;

        log::debug!("Creating context: {:?}", options);

        Ok(Context {
            spec,
            convolution: options.convolution,
            next_block: AtomicU64::new(0),
            warned_clamp: AtomicBool::new(false),
            fft_engines: DashMap::with_hasher(ahash::RandomState::new()),
        })
    }

    /// Reconfigure for a new sample rate or block size.
    ///
    /// Graphs built earlier must be re-prepared with [crate::UGen::prepare] before their next block, or they will
    /// resize themselves on the audio thread the first time they see the new configuration.
    pub fn prepare_to_play(
        &mut self,
        sample_rate: f64,
        block_size: usize,
        control_block_size: usize,
    ) -> Result<()> {
        let spec = PrepareSpec::new(sample_rate, block_size, control_block_size)?;
        if spec != self.spec {
            log::info!(
                "Reconfiguring context: sample rate {}, block size {}, control block size {}",
                sample_rate,
                block_size,
                control_block_size
            );
        }

        self.spec = spec;
        self.warned_clamp.store(false, Ordering::Relaxed);
        Ok(())
    }

    pub fn spec(&self) -> &PrepareSpec {
        &self.spec
    }

    pub fn sample_rate(&self) -> f64 {
        self.spec.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.spec.block_size
    }

    pub fn control_block_size(&self) -> usize {
        self.spec.control_block_size
    }

    pub fn convolution_options(&self) -> &ConvolutionOptions {
        &self.convolution
    }

    /// Start the next block.  Called once per hardware callback.
    ///
    /// `requested` may be less than the prepared block size, for example on the final partial block.  Requests above it
    /// are clamped, which is reported once.
    pub fn next_block(&self, requested: usize) -> Block {
        let frames = if requested > self.spec.block_size {
            if !self.warned_clamp.swap(true, Ordering::Relaxed) {
                rt_warn!(
                    "Requested {} frames but the context was prepared for {}; clamping",
                    requested,
                    self.spec.block_size
                );
            }
            self.spec.block_size
        } else {
            requested
        };

        let id = self.next_block.fetch_add(1, Ordering::Relaxed);
        Block {
            id: BlockId::from_raw(id),
            frames,
            spec: self.spec,
        }
    }

    /// Get the FFT engine for a size, rounded up to a power of two.  Engines are cached, so every caller asking for the
    /// same size shares one.
    pub fn fft(&self, size: usize) -> FftEngine {
        let size = fft_size_for(size);
        self.fft_engines
            .entry(size)
            .or_insert_with(|| {
                log::debug!("Planning FFT of size {}", size);
                FftEngine::new(size)
            })
            .clone()
    }

    /// Tear down, flushing anything the audio thread left behind.
    pub fn shutdown(self) {
        log::debug!("Shutting down context");
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let drops = crate::deferred_drop::drain();
        let messages = crate::logging::drain();
        log::trace!(
            "Context dropped after releasing {} deferred objects and {} log messages",
            drops,
            messages
        );
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("spec", &self.spec)
            .field("convolution", &self.convolution)
            .field("next_block", &self.next_block.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        assert!(PrepareSpec::new(0.0, 128, 64).unwrap_err().is_invalid_timing());
        assert!(PrepareSpec::new(f64::NAN, 128, 64).unwrap_err().is_invalid_timing());
        assert!(PrepareSpec::new(-1.0, 128, 64).unwrap_err().is_invalid_timing());
        assert!(PrepareSpec::new(44100.0, 0, 64).unwrap_err().is_invalid_timing());
        assert!(PrepareSpec::new(44100.0, 128, 0).unwrap_err().is_invalid_timing());
        assert!(PrepareSpec::new(44100.0, 128, 48).unwrap_err().is_invalid_timing());
        assert!(PrepareSpec::new(44100.0, 128, 32).is_ok());
    }

    #[test]
    fn test_block_ids_increase() {
        let ctx = Context::new(Default::default()).unwrap();
        let a = ctx.next_block(128);
        let b = ctx.next_block(128);
        assert!(b.id() > a.id());
        assert_eq!(b.id().get(), a.id().get() + 1);
    }

    #[test]
    fn test_clamping_and_partial_blocks() {
        let ctx = Context::new(Default::default()).unwrap();
        assert_eq!(ctx.next_block(1000).frames(), ctx.block_size());

        let partial = ctx.next_block(65);
        assert_eq!(partial.frames(), 65);
        assert_eq!(partial.control_frames(), 2);
    }

    #[test]
    fn test_fft_engines_are_shared() {
        let ctx = Context::new(Default::default()).unwrap();
        let a = ctx.fft(1000);
        let b = ctx.fft(1024);
        assert_eq!(a.size(), 1024);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&ctx.fft(2048)));
    }

    #[test]
    fn test_prepare_to_play() {
        let mut ctx = Context::new(Default::default()).unwrap();
        assert!(ctx.prepare_to_play(48000.0, 256, 96).is_err());
        ctx.prepare_to_play(48000.0, 256, 64).unwrap();
        assert_eq!(ctx.sample_rate(), 48000.0);
        assert_eq!(ctx.next_block(512).frames(), 256);
    }
}
