//! A fixed-size real FFT with optional windowing.
//!
//! Planning a transform is expensive, so an [FftEngine] is built once per size and shared by cloning.  The engine
//! itself is immutable; all scratch memory lives in an [FftWorkspace] owned by whoever runs the transform, which is
//! what lets one engine serve many nodes without locking or allocating.
//!
//! Gain convention: the forward transform produces twice the unnormalized DFT, and the inverse is the unnormalized
//! real inverse DFT.  So `inverse(forward(x)) == 2N * x`, and the inverse of the product of two forward spectra is
//! `4N` times their circular convolution.
use std::f32::consts::PI;
use std::sync::Arc;

use realfft::num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

use crate::spectrum::SplitSpectrum;

/// Smallest transform we will build.
pub const MIN_FFT_SIZE: usize = 16;

/// Transform size used when a caller has no opinion.
pub const DEFAULT_FFT_SIZE: usize = 4096;

/// Round a requested size up to the transform size which will actually be used.
pub fn fft_size_for(requested: usize) -> usize {
    requested.max(MIN_FFT_SIZE).next_power_of_two()
}

/// How to run an inverse transform.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct InverseOptions {
    /// Multiply the result by the synthesis window.
    pub windowed: bool,

    /// Divide by `2N`, so that an unwindowed `inverse(forward(x))` returns `x`.
    pub scaled: bool,
}

impl InverseOptions {
    pub const RAW: InverseOptions = InverseOptions {
        windowed: false,
        scaled: false,
    };

    pub const SCALED: InverseOptions = InverseOptions {
        windowed: false,
        scaled: true,
    };
}

struct EngineInner {
    size: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    analysis_window: Vec<f32>,
    synthesis_window: Vec<f32>,
    window_gain: f32,
}

/// A shared, immutable FFT of one size.
#[derive(Clone)]
pub struct FftEngine {
    inner: Arc<EngineInner>,
}

/// Per-user scratch for running transforms through an [FftEngine].
pub struct FftWorkspace {
    size: usize,
    time: Vec<f32>,
    freq: Vec<Complex32>,
    forward_scratch: Vec<Complex32>,
    inverse_scratch: Vec<Complex32>,
}

/// A periodic Hann window, which sums to exactly half its length.
fn hann(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / size as f32).cos())
        .collect()
}

impl FftEngine {
    /// Build an engine for `requested` points, rounded up to a power of two no smaller than [MIN_FFT_SIZE].
    pub fn new(requested: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        Self::with_planner(&mut planner, requested)
    }

    /// Like [FftEngine::new], but lets callers building several sizes share a planner.
    pub fn with_planner(planner: &mut RealFftPlanner<f32>, requested: usize) -> Self {
        let size = fft_size_for(requested);
        let analysis_window = hann(size);
        let window_gain = analysis_window.iter().sum::<f32>() / size as f32;

        FftEngine {
            inner: Arc::new(EngineInner {
                size,
                forward: planner.plan_fft_forward(size),
                inverse: planner.plan_fft_inverse(size),
                synthesis_window: analysis_window.clone(),
                analysis_window,
                window_gain,
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn half_size(&self) -> usize {
        self.inner.size / 2
    }

    pub fn analysis_window(&self) -> &[f32] {
        &self.inner.analysis_window
    }

    /// Mean value of the analysis window.
    pub fn window_gain(&self) -> f32 {
        self.inner.window_gain
    }

    /// The factor which turns a packed bin's magnitude into the amplitude of a bin-centred sinusoid.
    pub fn magnitude_scale(&self, windowed: bool) -> f32 {
        let gain = if windowed { self.inner.window_gain } else { 1.0 };
        1.0 / (self.inner.size as f32 * gain)
    }

    /// True if both handles share the same plans.
    pub fn ptr_eq(&self, other: &FftEngine) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Allocate scratch for running this engine.
    pub fn workspace(&self) -> FftWorkspace {
        FftWorkspace {
            size: self.inner.size,
            time: vec![0.0; self.inner.size],
            freq: self.inner.forward.make_output_vec(),
            forward_scratch: self.inner.forward.make_scratch_vec(),
            inverse_scratch: self.inner.inverse.make_scratch_vec(),
        }
    }

    /// A zeroed spectrum of the right size for this engine.
    pub fn spectrum(&self) -> SplitSpectrum {
        SplitSpectrum::new(self.inner.size)
    }

    /// Forward transform `input` into `output`.
    ///
    /// `input` shorter than the transform is zero padded; longer input is truncated.  Never fails: should the
    /// underlying transform reject its buffers, `output` is cleared.
    pub fn forward(
        &self,
        workspace: &mut FftWorkspace,
        input: &[f32],
        windowed: bool,
        output: &mut SplitSpectrum,
    ) {
        let size = self.inner.size;
        let half = size / 2;
        debug_assert_eq!(workspace.size, size);
        debug_assert_eq!(output.fft_size(), size);
        debug_assert!(input.len() <= size);

        let used = input.len().min(size);
        workspace.time[..used].copy_from_slice(&input[..used]);
        workspace.time[used..].fill(0.0);

        if windowed {
            for (s, w) in workspace.time.iter_mut().zip(self.inner.analysis_window.iter()) {
                *s *= *w;
            }
        }

        if self
            .inner
            .forward
            .process_with_scratch(
                &mut workspace.time,
                &mut workspace.freq,
                &mut workspace.forward_scratch,
            )
            .is_err()
        {
            output.clear();
            return;
        }

        let freq = &workspace.freq;
        let (real, imag) = output.parts_mut();
        real[0] = 2.0 * freq[0].re;
        imag[0] = 2.0 * freq[half].re;
        for k in 1..half {
            real[k] = 2.0 * freq[k].re;
            imag[k] = 2.0 * freq[k].im;
        }
    }

    /// Inverse transform `input` into `output`, which must be exactly one transform long.
    ///
    /// On failure, `output` is zeroed.
    pub fn inverse(
        &self,
        workspace: &mut FftWorkspace,
        input: &SplitSpectrum,
        output: &mut [f32],
        options: InverseOptions,
    ) {
        let size = self.inner.size;
        let half = size / 2;
        debug_assert_eq!(workspace.size, size);
        debug_assert_eq!(input.fft_size(), size);
        debug_assert_eq!(output.len(), size);

        let (real, imag) = (input.real(), input.imag());
        let freq = &mut workspace.freq;
        freq[0] = Complex32::new(real[0], 0.0);
        freq[half] = Complex32::new(imag[0], 0.0);
        for k in 1..half {
            freq[k] = Complex32::new(real[k], imag[k]);
        }

        if self
            .inner
            .inverse
            .process_with_scratch(freq, &mut workspace.time, &mut workspace.inverse_scratch)
            .is_err()
        {
            output.fill(0.0);
            return;
        }

        let scale = if options.scaled {
            1.0 / (2.0 * size as f32)
        } else {
            1.0
        };

        let count = output.len().min(size);
        if options.windowed {
            for i in 0..count {
                output[i] = workspace.time[i] * scale * self.inner.synthesis_window[i];
            }
        } else {
            for i in 0..count {
                output[i] = workspace.time[i] * scale;
            }
        }
        output[count..].fill(0.0);
    }
}

impl std::fmt::Debug for FftEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftEngine")
            .field("size", &self.inner.size)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for FftWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftWorkspace")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::close_floats::*;

    use proptest::prelude::*;

    fn round_trip(size: usize) {
        let engine = FftEngine::new(size);
        assert_eq!(engine.size(), size);
        let mut ws = engine.workspace();
        let mut spectrum = engine.spectrum();

        let input = (0..size)
            .map(|i| ((i * 7919) % 113) as f32 / 113.0 - 0.5)
            .collect::<Vec<_>>();
        let mut output = vec![0.0f32; size];

        engine.forward(&mut ws, &input, false, &mut spectrum);
        engine.inverse(&mut ws, &spectrum, &mut output, InverseOptions::SCALED);

        close_slices32(&output, &input, 1e-4);
    }

    macro_rules! round_trip_test {
        ($size: literal) => {
            paste::paste! {
                #[test]
                fn [<test_round_trip_ $size>]() {
                    round_trip($size);
                }
            }
        };
    }

    round_trip_test!(16);
    round_trip_test!(32);
    round_trip_test!(64);
    round_trip_test!(128);
    round_trip_test!(256);
    round_trip_test!(512);
    round_trip_test!(1024);
    round_trip_test!(2048);
    round_trip_test!(4096);
    round_trip_test!(8192);

    #[test]
    fn test_sizes_round_up() {
        assert_eq!(fft_size_for(0), 16);
        assert_eq!(fft_size_for(3), 16);
        assert_eq!(fft_size_for(17), 32);
        assert_eq!(fft_size_for(4096), 4096);
        assert_eq!(FftEngine::new(1000).size(), 1024);
    }

    #[test]
    fn test_nyquist_is_packed_into_imag_zero() {
        let engine = FftEngine::new(16);
        let mut ws = engine.workspace();
        let mut spectrum = engine.spectrum();

        // Alternating signs put everything in the Nyquist bin.
        let input = (0..16)
            .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect::<Vec<f32>>();
        engine.forward(&mut ws, &input, false, &mut spectrum);

        close_floats32(spectrum.real()[0], 0.0, 1e-4);
        close_floats32(spectrum.imag()[0], 32.0, 1e-4);
        for k in 1..8 {
            close_floats32(spectrum.real()[k], 0.0, 1e-4);
            close_floats32(spectrum.imag()[k], 0.0, 1e-4);
        }
    }

    #[test]
    fn test_magnitude_scale_reads_amplitude() {
        let size = 256;
        let bin = 8;
        let engine = FftEngine::new(size);
        let mut ws = engine.workspace();
        let mut spectrum = engine.spectrum();

        let input = (0..size)
            .map(|i| 0.25 * (2.0 * PI * bin as f32 * i as f32 / size as f32).sin())
            .collect::<Vec<_>>();

        let mut mags = [0.0f32; 1];
        engine.forward(&mut ws, &input, false, &mut spectrum);
        spectrum.magnitudes(bin, engine.magnitude_scale(false), &mut mags);
        close_floats32(mags[0], 0.25, 1e-4);

        engine.forward(&mut ws, &input, true, &mut spectrum);
        spectrum.magnitudes(bin, engine.magnitude_scale(true), &mut mags);
        close_floats32(mags[0], 0.25, 1e-4);
    }

    #[test]
    fn test_hann_gain() {
        let engine = FftEngine::new(64);
        close_floats32(engine.window_gain(), 0.5, 1e-6);
    }

    proptest! {
        #![proptest_config(ProptestConfig{cases:200, ..Default::default()})]
        #[test]
        fn test_round_trip_random(
            log2 in 4usize..12,
            seed in prop::collection::vec(-1.0f32..1.0, 1..64),
        ) {
            let size = 1 << log2;
            let engine = FftEngine::new(size);
            let mut ws = engine.workspace();
            let mut spectrum = engine.spectrum();
            let input = (0..size).map(|i| seed[i % seed.len()]).collect::<Vec<_>>();
            let mut output = vec![0.0f32; size];

            engine.forward(&mut ws, &input, false, &mut spectrum);
            engine.inverse(&mut ws, &spectrum, &mut output, InverseOptions::SCALED);

            for (g, e) in output.iter().zip(input.iter()) {
                prop_assert!((g - e).abs() < 1e-3, "got={g}, expected={e}");
            }
        }
    }
}
