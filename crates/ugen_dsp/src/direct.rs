/// Longest impulse [TimeConvolver] will run.  Past this, partitioned convolution wins.
pub const MAX_DIRECT_TAPS: usize = 2044;

/// Evaluate a convolution by directly evaluating the sum.
///
/// Complexity is `theta(M*N)` where `M` is the impulse length and `N` the output's length in frames.
///
/// Input and output are interleaved, with the given channel counts, and only one channel of each is touched.  The
/// impulse must be reversed.  The input must start `M - 1` samples in the past and be `M - 1` frames longer than the
/// output.
///
/// This is designed for use in streaming contexts, and so only outputs a block of audio, not the trailing portion.
///
/// # Panics
///
/// Panics if any validation fails, as these are (or should be) programmer bugs.
pub fn convolve_direct(
    input: &[f32],
    input_channels: usize,
    input_channel: usize,
    output: &mut [f32],
    output_channels: usize,
    output_channel: usize,
    impulse: &[f32],
) {
    assert!(input_channel < input_channels);
    assert!(output_channel < output_channels);
    assert!(!impulse.is_empty());
    assert_eq!(input.len() % input_channels, 0);
    assert_eq!(output.len() % output_channels, 0);

    let output_frames = output.len() / output_channels;
    assert_eq!(input.len() / input_channels, output_frames + impulse.len() - 1);

    for frame in 0..output_frames {
        // f64 would help with precision, but we only use this on short impulses.
        let mut sum: f32 = 0.0;
        for (impulse_ind, impulse_val) in impulse.iter().copied().enumerate() {
            let input_frame = frame + impulse_ind;
            sum += impulse_val * input[input_channels * input_frame + input_channel];
        }

        output[frame * output_channels + output_channel] = sum;
    }
}

/// Streaming time-domain convolution for short impulses.
///
/// Input goes into a ring of length `M` which is written twice, once at `pos` and once at `pos + M`, so the most
/// recent `M` samples are always contiguous and can be handed straight to [convolve_direct].
#[derive(Clone, Debug)]
pub struct TimeConvolver {
    reversed: Vec<f32>,
    ring: Vec<f32>,
    pos: usize,
}

impl TimeConvolver {
    /// Convolve with `impulse[start..end]`, keeping at most [MAX_DIRECT_TAPS] taps.
    pub fn new(impulse: &[f32], start: usize, end: Option<usize>) -> Self {
        let end = end.unwrap_or(impulse.len()).min(impulse.len());
        let start = start.min(end);
        let taps = (end - start).min(MAX_DIRECT_TAPS);

        let reversed = impulse[start..start + taps]
            .iter()
            .rev()
            .copied()
            .collect::<Vec<_>>();

        TimeConvolver {
            ring: vec![0.0; taps * 2],
            reversed,
            pos: 0,
        }
    }

    pub fn taps(&self) -> usize {
        self.reversed.len()
    }

    /// Convolve `input` into `output`, which must be the same length.  An empty impulse gives silence.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), output.len());
        let taps = self.reversed.len();

        if taps == 0 {
            output.fill(0.0);
            return;
        }

        for (i, s) in input.iter().copied().enumerate() {
            self.pos = (self.pos + 1) % taps;
            self.ring[self.pos] = s;
            self.ring[self.pos + taps] = s;

            let window = &self.ring[self.pos + 1..self.pos + 1 + taps];
            convolve_direct(window, 1, 0, &mut output[i..i + 1], 1, 0, &self.reversed);
        }
    }
}
