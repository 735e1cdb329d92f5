//! Convolution nodes.
//!
//! All of them convolve each output channel's input with one channel of an impulse.  Output is as wide as the wider of
//! the input and the impulse, and the narrower one wraps.
use std::sync::Arc;

use rand::Rng;
use ugen_dsp::{PartitionedConvolver, PartitionedImpulse, TimeConvolver, MAX_DIRECT_TAPS};

use crate::buffer::Buffer;
use crate::config::MAX_CHANNELS;
use crate::context::{Block, Context, PrepareSpec};
use crate::error::{Error, Result};
use crate::kernel::{Kernel, KernelNode, KernelStatus, Signal};
use crate::node::NodeRef;
use crate::nodes::rate_conversion::conform;
use crate::rate::Rate;
use crate::ugen::UGen;

/// The zero-latency convolver convolves `[0, DIRECT_TAPS)` directly.
const DIRECT_TAPS: usize = 128;

/// Partitioned stages of the zero-latency convolver: `(fft_size, start, end)`.  Each starts at its own hop, which is
/// what cancels that stage's latency.
const ZERO_LATENCY_STAGES: [(usize, usize, Option<usize>); 4] = [
    (256, 128, Some(512)),
    (1024, 512, Some(2048)),
    (4096, 2048, Some(8192)),
    (16384, 8192, None),
];

/// Build one node per output channel, handing `make` the channel and the impulse channel it should use.
fn per_channel<K: Kernel>(
    input: &UGen,
    impulse_channels: usize,
    mut make: impl FnMut(usize, usize) -> K,
) -> UGen {
    let channels = input.channel_count().max(impulse_channels).min(MAX_CHANNELS);
    UGen::from_nodes((0..channels).map(|c| {
        let source = conform(input.node(c), Rate::Audio);
        Arc::new(KernelNode::new(Rate::Audio, [source], make(c, c % impulse_channels))) as NodeRef
    }))
}

fn initial_offset(context: &Context, hop: usize) -> usize {
    if context.convolution_options().stagger && hop > 1 {
        rand::thread_rng().gen_range(0..hop)
    } else {
        0
    }
}

/// Partition every channel of an impulse segment once, so that all output channels share the transforms.
fn partition_channels(
    context: &Context,
    impulse: &Buffer,
    fft_size: usize,
    start: usize,
    end: Option<usize>,
) -> Vec<Arc<PartitionedImpulse>> {
    let engine = context.fft(fft_size);
    let max_partitions = context.convolution_options().max_partitions;
    (0..impulse.channels())
        .map(|c| {
            let p = PartitionedImpulse::new(&engine, impulse.channel(c), start, end, max_partitions);
            if end.unwrap_or(impulse.frames()).min(impulse.frames()) > start + p.len() {
                log::warn!(
                    "Impulse channel {} was truncated to {} partitions of {} samples",
                    c,
                    p.partition_count(),
                    p.hop()
                );
            }
            Arc::new(p)
        })
        .collect()
}

fn reserve(scratch: &mut Vec<f32>, spec: &PrepareSpec) {
    if scratch.len() < spec.block_size {
        scratch.resize(spec.block_size, 0.0);
    }
}

struct PartConvolveKernel {
    convolver: PartitionedConvolver,
    scratch: Vec<f32>,
}

impl Kernel for PartConvolveKernel {
    fn prepare(&mut self, spec: &PrepareSpec) {
        reserve(&mut self.scratch, spec);
    }

    fn process(&mut self, _block: &Block, inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        let n = output.len();
        let input = inputs[0].expand(&mut self.scratch[..n]);
        self.convolver.process(input, output);
        KernelStatus::Running
    }
}

struct TimeConvolveKernel {
    convolver: TimeConvolver,
    scratch: Vec<f32>,
}

impl Kernel for TimeConvolveKernel {
    fn prepare(&mut self, spec: &PrepareSpec) {
        reserve(&mut self.scratch, spec);
    }

    fn process(&mut self, _block: &Block, inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        let n = output.len();
        let input = inputs[0].expand(&mut self.scratch[..n]);
        self.convolver.process(input, output);
        KernelStatus::Running
    }
}

struct ZeroLatencyKernel {
    direct: TimeConvolver,
    stages: Vec<PartitionedConvolver>,
    scratch: Vec<f32>,
    stage_output: Vec<f32>,
}

impl Kernel for ZeroLatencyKernel {
    fn prepare(&mut self, spec: &PrepareSpec) {
        reserve(&mut self.scratch, spec);
        reserve(&mut self.stage_output, spec);
    }

    fn process(&mut self, _block: &Block, inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        let n = output.len();
        let input = inputs[0].expand(&mut self.scratch[..n]);
        self.direct.process(input, output);

        let stage_output = &mut self.stage_output[..n];
        for stage in self.stages.iter_mut() {
            stage.process(input, stage_output);
            for (o, s) in output.iter_mut().zip(stage_output.iter()) {
                *o += *s;
            }
        }

        KernelStatus::Running
    }
}

/// Uniformly partitioned convolution with `impulse[start..end]`.
///
/// The output is delayed by `fft_size / 2` samples (after rounding the size up to a power of two), and the impulse is
/// cut short past the context's partition limit.
pub fn part_convolve(
    context: &Context,
    input: &UGen,
    impulse: &Buffer,
    start: usize,
    end: Option<usize>,
    fft_size: usize,
) -> UGen {
    let engine = context.fft(fft_size);
    let partitions = partition_channels(context, impulse, engine.size(), start, end);

    per_channel(input, impulse.channels(), |_, ic| PartConvolveKernel {
        convolver: PartitionedConvolver::new(
            &engine,
            partitions[ic].clone(),
            initial_offset(context, engine.half_size()),
        ),
        scratch: vec![],
    })
}

/// Direct convolution with `impulse[start..end]`, for short impulses.  At most [MAX_DIRECT_TAPS] taps are used.
pub fn time_convolve(input: &UGen, impulse: &Buffer, start: usize, end: Option<usize>) -> UGen {
    let len = end.unwrap_or(impulse.frames()).min(impulse.frames()).saturating_sub(start);
    if len > MAX_DIRECT_TAPS {
        log::warn!(
            "Direct convolution supports {} taps; truncating an impulse of {}",
            MAX_DIRECT_TAPS,
            len
        );
    }

    per_channel(input, impulse.channels(), |_, ic| TimeConvolveKernel {
        convolver: TimeConvolver::new(impulse.channel(ic), start, end),
        scratch: vec![],
    })
}

/// Convolution with no added latency, at any impulse length.
///
/// The head of the impulse is convolved directly and the rest by partitioned stages of growing size, each starting
/// exactly one hop into the impulse.
pub fn zero_latency_convolve(context: &Context, input: &UGen, impulse: &Buffer) -> UGen {
    let stages = ZERO_LATENCY_STAGES
        .iter()
        .filter(|(_, start, _)| *start < impulse.frames())
        .map(|(fft_size, start, end)| {
            let engine = context.fft(*fft_size);
            let partitions = partition_channels(context, impulse, *fft_size, *start, *end);
            (engine, partitions)
        })
        .collect::<Vec<_>>();

    per_channel(input, impulse.channels(), |_, ic| ZeroLatencyKernel {
        direct: TimeConvolver::new(impulse.channel(ic), 0, Some(DIRECT_TAPS)),
        stages: stages
            .iter()
            .map(|(engine, partitions)| {
                PartitionedConvolver::new(
                    engine,
                    partitions[ic].clone(),
                    initial_offset(context, engine.half_size()),
                )
            })
            .collect(),
        scratch: vec![],
        stage_output: vec![],
    })
}

/// Convolve the left input through `left` and the right input through `right`, and sum.
///
/// `input` must have two channels.  The impulses must have one or two channels each; with two, each input channel
/// reaches both outputs.
pub fn true_stereo_convolve(
    context: &Context,
    input: &UGen,
    left: &Buffer,
    right: &Buffer,
) -> Result<UGen> {
    if input.channel_count() != 2 {
        return Err(Error::channel_mismatch(2, input.channel_count()));
    }

    for impulse in [left, right] {
        if !(1..=2).contains(&impulse.channels()) {
            return Err(Error::impulse_channels(impulse.channels()));
        }
    }

    let from_left = zero_latency_convolve(context, &input.channel(0), left);
    let from_right = zero_latency_convolve(context, &input.channel(1), right);
    Ok(from_left + from_right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::audio_in::AudioIn;

    use rand::SeedableRng;

    /// Full linear convolution, truncated to the input's length.
    fn reference(input: &[f32], impulse: &[f32]) -> Vec<f32> {
        (0..input.len())
            .map(|t| {
                impulse
                    .iter()
                    .take(t + 1)
                    .enumerate()
                    .map(|(k, h)| *h as f64 * input[t - k] as f64)
                    .sum::<f64>() as f32
            })
            .collect()
    }

    fn noise(len: usize, seed: u64) -> Vec<f32> {
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen_range(-0.5f32..0.5)).collect()
    }

    /// Run a mono graph fed from `input`, a block at a time.
    fn run(ctx: &Context, build: impl FnOnce(&UGen) -> UGen, input: &[f32]) -> Vec<f32> {
        let (source, inputs) = AudioIn::new(1).unwrap();
        let mut graph = build(&source);
        graph.prepare(ctx);

        let mut out = vec![0.0; input.len()];
        for (i, o) in input
            .chunks(ctx.block_size())
            .zip(out.chunks_mut(ctx.block_size()))
        {
            inputs.set_input(0, i);
            let block = ctx.next_block(i.len());
            graph.set_output(&block, o);
        }
        out
    }

    fn assert_close(got: &[f32], expected: &[f32], tolerance: f32) {
        for (i, (g, e)) in got.iter().zip(expected.iter()).enumerate() {
            assert!((g - e).abs() <= tolerance, "index {}: got {}, expected {}", i, g, e);
        }
    }

    #[test]
    fn test_time_convolve_matches_reference() {
        let ctx = Context::new(Default::default()).unwrap();
        let impulse = noise(300, 1);
        let input = noise(1000, 2);
        let got = run(
            &ctx,
            |s| time_convolve(s, &Buffer::from_mono(impulse.clone()), 0, None),
            &input,
        );
        assert_close(&got, &reference(&input, &impulse), 1e-4);
    }

    #[test]
    fn test_part_convolve_latency() {
        let ctx = Context::new(Default::default()).unwrap();
        let impulse = noise(700, 3);
        let input = noise(3000, 4);
        let got = run(
            &ctx,
            |s| part_convolve(&ctx, s, &Buffer::from_mono(impulse.clone()), 0, None, 256),
            &input,
        );

        let expected = reference(&input, &impulse);
        assert!(got[..128].iter().all(|x| *x == 0.0));
        assert_close(&got[128..], &expected[..input.len() - 128], 1e-3);
    }

    #[test]
    fn test_zero_latency_matches_direct() {
        let ctx = Context::new(Default::default()).unwrap();
        for len in [50, 128, 129, 600, 3000, 9000] {
            let impulse = noise(len, len as u64);
            let input = noise(10000, 7);
            let got = run(
                &ctx,
                |s| zero_latency_convolve(&ctx, s, &Buffer::from_mono(impulse.clone())),
                &input,
            );
            assert_close(&got, &reference(&input, &impulse), 2e-3);
        }
    }

    #[test]
    fn test_empty_impulse_is_silent() {
        let ctx = Context::new(Default::default()).unwrap();
        let input = noise(500, 1);
        let got = run(
            &ctx,
            |s| zero_latency_convolve(&ctx, s, &Buffer::zeroed(1, 0)),
            &input,
        );
        assert!(got.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_impulse_channels_expand() {
        let impulse = Buffer::from_channels(vec![vec![1.0], vec![2.0], vec![3.0]]).unwrap();
        let u = time_convolve(&UGen::constant(1.0), &impulse, 0, None);
        assert_eq!(u.channel_count(), 3);
    }

    #[test]
    fn test_true_stereo_validation() {
        let ctx = Context::new(Default::default()).unwrap();
        let mono = Buffer::from_mono(vec![1.0]);
        let wide = Buffer::zeroed(3, 4);
        let stereo_in = UGen::stack([&UGen::constant(1.0), &UGen::constant(2.0)]);

        assert!(true_stereo_convolve(&ctx, &UGen::constant(1.0), &mono, &mono)
            .unwrap_err()
            .is_channel_error());
        assert!(true_stereo_convolve(&ctx, &stereo_in, &mono, &wide)
            .unwrap_err()
            .is_channel_error());

        let u = true_stereo_convolve(&ctx, &stereo_in, &mono, &Buffer::zeroed(2, 4)).unwrap();
        assert_eq!(u.channel_count(), 2);
    }
}
