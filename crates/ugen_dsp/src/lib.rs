//! Graph-independent DSP: the FFT engine, packed split spectra, and the direct and partitioned convolvers built on
//! them.
#[doc(hidden)]
pub mod close_floats;
mod convolver;
mod direct;
mod fft;
mod partition;
mod schedule;
mod spectrum;

pub use convolver::PartitionedConvolver;
pub use direct::{convolve_direct, TimeConvolver, MAX_DIRECT_TAPS};
pub use fft::{fft_size_for, FftEngine, FftWorkspace, InverseOptions, DEFAULT_FFT_SIZE, MIN_FFT_SIZE};
pub use partition::{partition_count, PartitionedImpulse};
pub use schedule::PartitionSchedule;
pub use spectrum::{bin_range, SplitSpectrum};

/// Re-exported so that callers sharing a planner across engine sizes don't need their own dependency.
pub use realfft::RealFftPlanner;
