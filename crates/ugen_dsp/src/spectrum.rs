//! Split real/imaginary spectra in the packed real-FFT layout.
//!
//! A transform of size `N` has `N / 2 + 1` meaningful bins, but bins 0 and `N / 2` are purely real.  We store `N / 2`
//! real values and `N / 2` imaginary values, and put the real part of the Nyquist bin in `imag[0]`.  Every operation
//! in this module understands that packing.
use std::ops::Range;

/// A packed split spectrum.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitSpectrum {
    real: Vec<f32>,
    imag: Vec<f32>,
}

/// Clamp a bin request to the bins a transform of `fft_size` actually has.
///
/// A real transform of size `N` has bins `0..=N/2`.  Requests past the end are shortened, and an out of range
/// `first_bin` yields an empty range.
pub fn bin_range(fft_size: usize, first_bin: usize, num_bins: usize) -> Range<usize> {
    let available = fft_size / 2 + 1;
    let start = first_bin.min(available);
    let end = first_bin.saturating_add(num_bins).min(available);
    start..end
}

impl SplitSpectrum {
    /// A zeroed spectrum for a transform of `fft_size` points.
    pub fn new(fft_size: usize) -> Self {
        debug_assert!(fft_size >= 2 && fft_size.is_power_of_two());
        let half = fft_size / 2;
        Self {
            real: vec![0.0; half],
            imag: vec![0.0; half],
        }
    }

    /// The size of the transform this spectrum belongs to.
    pub fn fft_size(&self) -> usize {
        self.real.len() * 2
    }

    pub fn real(&self) -> &[f32] {
        &self.real
    }

    pub fn imag(&self) -> &[f32] {
        &self.imag
    }

    pub fn real_mut(&mut self) -> &mut [f32] {
        &mut self.real
    }

    pub fn imag_mut(&mut self) -> &mut [f32] {
        &mut self.imag
    }

    /// Both halves at once, for writers which fill them together.
    pub fn parts_mut(&mut self) -> (&mut [f32], &mut [f32]) {
        (&mut self.real, &mut self.imag)
    }

    pub fn clear(&mut self) {
        self.real.fill(0.0);
        self.imag.fill(0.0);
    }

    pub fn copy_from(&mut self, other: &SplitSpectrum) {
        debug_assert_eq!(self.real.len(), other.real.len());
        self.real.copy_from_slice(&other.real);
        self.imag.copy_from_slice(&other.imag);
    }

    /// Unpack one bin in `0..=N/2` to `(re, im)`.
    pub fn bin(&self, index: usize) -> (f32, f32) {
        let half = self.real.len();
        debug_assert!(index <= half);

        if index == 0 {
            (self.real[0], 0.0)
        } else if index == half {
            (self.imag[0], 0.0)
        } else {
            (self.real[index], self.imag[index])
        }
    }

    /// `self += a * b`, bin by bin.
    ///
    /// The DC and Nyquist bins are real and are multiplied separately; all other bins are full complex products.
    pub fn multiply_accumulate(&mut self, a: &SplitSpectrum, b: &SplitSpectrum) {
        let half = self.real.len();
        debug_assert_eq!(a.real.len(), half);
        debug_assert_eq!(b.real.len(), half);

        self.real[0] += a.real[0] * b.real[0];
        self.imag[0] += a.imag[0] * b.imag[0];

        let (acc_re, acc_im) = (&mut self.real[1..], &mut self.imag[1..]);
        let (a_re, a_im) = (&a.real[1..], &a.imag[1..]);
        let (b_re, b_im) = (&b.real[1..], &b.imag[1..]);

        for i in 0..acc_re.len() {
            let (ar, ai, br, bi) = (a_re[i], a_im[i], b_re[i], b_im[i]);
            acc_re[i] += ar * br - ai * bi;
            acc_im[i] += ar * bi + ai * br;
        }
    }

    /// Write unpacked real and imaginary parts for bins starting at `first_bin`.
    ///
    /// Writes `min(real_out.len(), imag_out.len())` bins, clamped to the bins which exist.  Returns how many were
    /// written.
    pub fn unpack_real_imag(&self, first_bin: usize, real_out: &mut [f32], imag_out: &mut [f32]) -> usize {
        let wanted = real_out.len().min(imag_out.len());
        let range = bin_range(self.fft_size(), first_bin, wanted);
        let count = range.len();

        for (out, bin) in range.enumerate() {
            let (re, im) = self.bin(bin);
            real_out[out] = re;
            imag_out[out] = im;
        }

        count
    }

    /// Magnitudes of bins starting at `first_bin`, multiplied by `scale`.
    ///
    /// Use [crate::FftEngine::magnitude_scale] to get a scale which reads a bin-centred sinusoid's amplitude.
    pub fn magnitudes(&self, first_bin: usize, scale: f32, out: &mut [f32]) -> usize {
        let range = bin_range(self.fft_size(), first_bin, out.len());
        let count = range.len();

        for (dest, bin) in out.iter_mut().zip(range) {
            let (re, im) = self.bin(bin);
            *dest = re.hypot(im) * scale;
        }

        count
    }

    /// Phases in radians of bins starting at `first_bin`.
    pub fn phases(&self, first_bin: usize, out: &mut [f32]) -> usize {
        let range = bin_range(self.fft_size(), first_bin, out.len());
        let count = range.len();

        for (dest, bin) in out.iter_mut().zip(range) {
            let (re, im) = self.bin(bin);
            *dest = im.atan2(re);
        }

        count
    }

    /// Magnitudes and phases together.
    pub fn magnitude_phase(
        &self,
        first_bin: usize,
        scale: f32,
        magnitudes: &mut [f32],
        phases: &mut [f32],
    ) -> usize {
        let wanted = magnitudes.len().min(phases.len());
        let written = self.magnitudes(first_bin, scale, &mut magnitudes[..wanted]);
        self.phases(first_bin, &mut phases[..written]);
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum_from(real: &[f32], imag: &[f32]) -> SplitSpectrum {
        let mut s = SplitSpectrum::new(real.len() * 2);
        s.real_mut().copy_from_slice(real);
        s.imag_mut().copy_from_slice(imag);
        s
    }

    #[test]
    fn test_bin_range_clamps() {
        assert_eq!(bin_range(16, 0, 100), 0..9);
        assert_eq!(bin_range(16, 3, 2), 3..5);
        assert_eq!(bin_range(16, 20, 2), 9..9);
    }

    #[test]
    fn test_packed_bins() {
        let s = spectrum_from(&[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(s.bin(0), (1.0, 0.0));
        assert_eq!(s.bin(1), (2.0, 6.0));
        assert_eq!(s.bin(4), (5.0, 0.0));
    }

    #[test]
    fn test_multiply_accumulate_respects_packing() {
        let a = spectrum_from(&[2.0, 1.0], &[3.0, 2.0]);
        let b = spectrum_from(&[5.0, 3.0], &[7.0, -1.0]);
        let mut acc = spectrum_from(&[1.0, 1.0], &[1.0, 1.0]);

        acc.multiply_accumulate(&a, &b);

        // DC and Nyquist multiply as plain reals.
        assert_eq!(acc.real()[0], 11.0);
        assert_eq!(acc.imag()[0], 22.0);
        // (1 + 2i)(3 - i) = 5 + 5i.
        assert_eq!(acc.real()[1], 6.0);
        assert_eq!(acc.imag()[1], 6.0);
    }

    #[test]
    fn test_unpack_and_magnitudes() {
        let s = spectrum_from(&[1.0, 3.0], &[-2.0, 4.0]);
        let mut re = [0.0; 8];
        let mut im = [0.0; 8];
        assert_eq!(s.unpack_real_imag(0, &mut re, &mut im), 3);
        assert_eq!(&re[..3], &[1.0, 3.0, -2.0]);
        assert_eq!(&im[..3], &[0.0, 4.0, 0.0]);

        let mut mags = [0.0; 1];
        let mut phases = [0.0; 1];
        assert_eq!(s.magnitude_phase(1, 0.5, &mut mags, &mut phases), 1);
        assert_eq!(mags[0], 2.5);
        assert!((phases[0] - 4.0f32.atan2(3.0)).abs() < 1e-6);
    }
}
