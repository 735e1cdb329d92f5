use std::sync::Arc;

use ugen_dsp::{bin_range, FftEngine, FftWorkspace, SplitSpectrum};

use crate::config::MAX_CHANNELS;
use crate::context::{Block, Context};
use crate::error::{Error, Result};
use crate::kernel::{KernelStatus, MultiKernel, OwnerNode, Signal};
use crate::rate::Rate;
use crate::ugen::UGen;

struct FftMagnitudeKernel {
    engine: FftEngine,
    workspace: FftWorkspace,
    spectrum: SplitSpectrum,

    /// The last `fft_size` samples, written twice so they are always contiguous at `position..position + fft_size`.
    ring: Vec<f32>,
    position: usize,
    hop: usize,
    since_transform: usize,
    first_bin: usize,
    held: Vec<f32>,
}

impl FftMagnitudeKernel {
    fn transform(&mut self) {
        let size = self.engine.size();
        let window = &self.ring[self.position..self.position + size];
        self.engine
            .forward(&mut self.workspace, window, true, &mut self.spectrum);
        self.spectrum.magnitudes(
            self.first_bin,
            self.engine.magnitude_scale(true),
            &mut self.held,
        );
    }
}

impl MultiKernel for FftMagnitudeKernel {
    fn process(
        &mut self,
        _block: &Block,
        inputs: &[Signal<'_>],
        outputs: &mut [&mut [f32]],
    ) -> KernelStatus {
        let input = inputs[0];
        let size = self.engine.size();
        let frames = outputs.first().map(|o| o.len()).unwrap_or(0);

        for i in 0..frames {
            let x = input.at(i);
            self.ring[self.position] = x;
            self.ring[self.position + size] = x;
            self.position = (self.position + 1) % size;

            self.since_transform += 1;
            if self.since_transform == self.hop {
                self.since_transform = 0;
                self.transform();
            }

            for (o, m) in outputs.iter_mut().zip(self.held.iter()) {
                o[i] = *m;
            }
        }

        KernelStatus::Running
    }
}

/// Track the magnitudes of a range of FFT bins.
///
/// Output channel `k` is the amplitude of bin `first_bin + k`, measured through a Hann window every
/// `fft_size / overlap` samples and held in between.  A sinusoid centred on a bin reads as its amplitude.  The bin range
/// is clamped to the bins the transform has; the input must be mono.
pub fn fft_magnitude(
    context: &Context,
    input: &UGen,
    fft_size: usize,
    overlap: usize,
    first_bin: usize,
    num_bins: usize,
) -> Result<UGen> {
    if input.channel_count() != 1 {
        return Err(Error::channel_mismatch(1, input.channel_count()));
    }

    let engine = context.fft(fft_size);
    let size = engine.size();
    let range = bin_range(size, first_bin, num_bins);
    if range.is_empty() {
        return Err(Error::validation(format!(
            "No bins in {}..{} for a transform of size {}",
            first_bin,
            first_bin.saturating_add(num_bins),
            size
        )));
    }
    if range.len() > MAX_CHANNELS {
        return Err(Error::too_many_channels(range.len(), MAX_CHANNELS));
    }

    let hop = (size / overlap.clamp(1, size)).max(1);
    let kernel = FftMagnitudeKernel {
        workspace: engine.workspace(),
        spectrum: engine.spectrum(),
        ring: vec![0.0; size * 2],
        position: 0,
        hop,
        since_transform: 0,
        first_bin: range.start,
        held: vec![0.0; range.len()],
        engine,
    };

    let input = crate::nodes::rate_conversion::conform(input.node(0), Rate::Audio);
    let owner = Arc::new(OwnerNode::new(Rate::Audio, range.len(), [input], kernel));
    Ok(UGen::from_owner(owner))
}
