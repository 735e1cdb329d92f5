//! Uniformly partitioned overlap-save convolution.
//!
//! Let `H = fft_size / 2`, the hop.  Input arrives in hops.  Each hop's samples are written into two windows of
//! `fft_size` samples: the second half of the window which completes at the end of this hop, and the first half of
//! the one which completes at the end of the next.  So at every hop boundary some window holds the last `2H` input
//! samples contiguously and goes straight into the forward transform.
//!
//! Input spectra are kept in a history ring with one slot per partition.  During a hop, the products for partitions
//! `1..P` are accumulated a few at a time as dictated by [PartitionSchedule].  At the end of the hop the newest
//! spectrum is multiplied with partition 0, the sum is inverse transformed, and the last `H` samples become the output
//! for the next hop.
//!
//! The result is `x ⊛ h` delayed by exactly `H` samples regardless of block size or starting offset.
use std::sync::Arc;

use crate::fft::{FftEngine, FftWorkspace, InverseOptions};
use crate::partition::PartitionedImpulse;
use crate::schedule::PartitionSchedule;
use crate::spectrum::SplitSpectrum;

#[derive(Debug)]
pub struct PartitionedConvolver {
    engine: FftEngine,
    workspace: FftWorkspace,
    impulse: Arc<PartitionedImpulse>,
    schedule: PartitionSchedule,
    hop: usize,

    windows: [Vec<f32>; 2],

    /// The window which completes at the end of the current hop.
    filling: usize,

    /// Samples of the current hop seen so far.
    position: usize,

    history: Vec<SplitSpectrum>,

    /// History slot of the most recent input spectrum.
    newest: usize,

    /// How many history slots hold real spectra.  Until the history fills, older partitions have nothing to multiply.
    valid: usize,

    accumulator: SplitSpectrum,
    inverse_out: Vec<f32>,

    /// Output for the current hop, computed at the end of the previous one.
    output: Vec<f32>,
}

impl PartitionedConvolver {
    /// Build a convolver.
    ///
    /// `engine` must be the engine the impulse was partitioned with.  `initial_offset` starts the convolver that many
    /// samples into its first hop, which staggers the transforms of convolvers built together; the output does not
    /// depend on it.
    pub fn new(engine: &FftEngine, impulse: Arc<PartitionedImpulse>, initial_offset: usize) -> Self {
        debug_assert_eq!(engine.size(), impulse.fft_size());
        let fft_size = engine.size();
        let hop = engine.half_size();
        let partitions = impulse.partition_count();

        PartitionedConvolver {
            workspace: engine.workspace(),
            engine: engine.clone(),
            schedule: PartitionSchedule::new(partitions, hop),
            hop,
            windows: [vec![0.0; fft_size], vec![0.0; fft_size]],
            filling: 0,
            position: initial_offset % hop,
            history: (0..partitions).map(|_| engine.spectrum()).collect(),
            newest: 0,
            valid: 0,
            accumulator: engine.spectrum(),
            inverse_out: vec![0.0; fft_size],
            output: vec![0.0; hop],
            impulse,
        }
    }

    /// Samples between an input sample and the first output it affects.
    pub fn latency(&self) -> usize {
        self.hop
    }

    pub fn partition_count(&self) -> usize {
        self.impulse.partition_count()
    }

    /// Convolve `input` into `output`, which must be the same length.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), output.len());

        if self.impulse.is_empty() {
            output.fill(0.0);
            return;
        }

        let len = input.len().min(output.len());
        let mut done = 0;

        while done < len {
            let n = (len - done).min(self.hop - self.position);
            self.ingest(&input[done..done + n]);
            output[done..done + n].copy_from_slice(&self.output[self.position..self.position + n]);

            self.position += n;
            done += n;

            if self.position == self.hop {
                self.transform();
                self.position = 0;
            } else {
                let range = self.schedule.advance(self.position);
                self.accumulate(range);
            }
        }
    }

    fn ingest(&mut self, samples: &[f32]) {
        let (first, second) = self.windows.split_at_mut(1);
        let (completing, next) = if self.filling == 0 {
            (&mut first[0], &mut second[0])
        } else {
            (&mut second[0], &mut first[0])
        };

        let at = self.position;
        completing[self.hop + at..self.hop + at + samples.len()].copy_from_slice(samples);
        next[at..at + samples.len()].copy_from_slice(samples);
    }

    /// Multiply-accumulate the given partitions, each against the input spectrum it pairs with this hop.
    fn accumulate(&mut self, partitions: std::ops::Range<usize>) {
        let count = self.history.len();

        for p in partitions {
            // During a hop, partition p pairs with the spectrum p - 1 transforms old.
            if p > self.valid {
                break;
            }

            let slot = (self.newest + count - (p - 1)) % count;
            self.accumulator
                .multiply_accumulate(&self.history[slot], self.impulse.partition(p));
        }
    }

    fn transform(&mut self) {
        let remaining = self.schedule.finish_hop();
        self.accumulate(remaining);

        let count = self.history.len();
        self.newest = (self.newest + 1) % count;
        self.valid = (self.valid + 1).min(count);

        self.engine.forward(
            &mut self.workspace,
            &self.windows[self.filling],
            false,
            &mut self.history[self.newest],
        );
        self.accumulator
            .multiply_accumulate(&self.history[self.newest], self.impulse.partition(0));

        self.engine.inverse(
            &mut self.workspace,
            &self.accumulator,
            &mut self.inverse_out,
            InverseOptions::RAW,
        );

        let scale = 1.0 / (4.0 * self.engine.size() as f32);
        for (o, s) in self.output.iter_mut().zip(self.inverse_out[self.hop..].iter()) {
            *o = *s * scale;
        }

        self.accumulator.clear();
        self.filling ^= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::close_floats::close_slices32;

    use rand::{Rng, SeedableRng};

    /// Full linear convolution, by the textbook sum.
    fn reference(input: &[f32], impulse: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0f32; input.len()];
        for (t, o) in out.iter_mut().enumerate() {
            let mut sum = 0.0f64;
            for (k, h) in impulse.iter().enumerate() {
                if k <= t {
                    sum += *h as f64 * input[t - k] as f64;
                }
            }
            *o = sum as f32;
        }
        out
    }

    fn delayed(signal: &[f32], by: usize) -> Vec<f32> {
        let mut out = vec![0.0; signal.len()];
        out[by..].copy_from_slice(&signal[..signal.len() - by]);
        out
    }

    fn run(
        fft_size: usize,
        impulse_len: usize,
        block: usize,
        offset: usize,
        input: &[f32],
        tolerance: f32,
    ) {
        let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(impulse_len as u64);
        let impulse = (0..impulse_len)
            .map(|_| rng.gen_range(-1.0f32..1.0))
            .collect::<Vec<_>>();

        let engine = FftEngine::new(fft_size);
        let partitioned = Arc::new(PartitionedImpulse::new(
            &engine,
            &impulse,
            0,
            None,
            usize::MAX,
        ));
        let mut conv = PartitionedConvolver::new(&engine, partitioned, offset);

        let mut output = vec![0.0f32; input.len()];
        for (i, o) in input.chunks(block).zip(output.chunks_mut(block)) {
            conv.process(i, o);
        }

        let expected = delayed(&reference(input, &impulse), conv.latency());
        close_slices32(&output, &expected, tolerance);
    }

    fn unit_impulses(len: usize) -> Vec<f32> {
        let mut input = vec![0.0f32; len];
        for i in [0, 3, 97, 500, 1203] {
            if i < len {
                input[i] = 1.0;
            }
        }
        input
    }

    #[test]
    fn test_shorter_than_one_partition() {
        run(64, 20, 16, 0, &unit_impulses(1024), 1e-4);
    }

    #[test]
    fn test_exactly_one_partition() {
        run(64, 32, 8, 0, &unit_impulses(1024), 1e-4);
    }

    #[test]
    fn test_many_partitions() {
        run(64, 300, 16, 0, &unit_impulses(2048), 1e-4);
    }

    #[test]
    fn test_blocks_larger_than_hop() {
        run(32, 100, 128, 0, &unit_impulses(2048), 1e-4);
    }

    #[test]
    fn test_odd_blocks_and_offsets() {
        for offset in [1, 7, 31] {
            run(64, 150, 13, offset, &unit_impulses(2048), 1e-4);
        }
    }

    #[test]
    fn test_noise_input() {
        let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(5);
        let input = (0..4096)
            .map(|_| rng.gen_range(-0.5f32..0.5))
            .collect::<Vec<_>>();
        run(128, 700, 32, 3, &input, 1e-3);
    }

    #[test]
    fn test_empty_impulse_is_silent() {
        let engine = FftEngine::new(64);
        let partitioned = Arc::new(PartitionedImpulse::new(&engine, &[], 0, None, usize::MAX));
        let mut conv = PartitionedConvolver::new(&engine, partitioned, 0);
        let mut out = vec![1.0f32; 100];
        conv.process(&[1.0; 100], &mut out);
        assert!(out.iter().all(|x| *x == 0.0));
    }
}
