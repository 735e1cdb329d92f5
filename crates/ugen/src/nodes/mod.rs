//! The node library.  Every factory here returns a [crate::UGen] and expands over multichannel inputs.
pub mod audio_in;
pub mod convolution;
pub mod delay;
pub mod envelope;
pub mod fft_magnitude;
pub mod lag;
pub mod mix;
pub mod oscillator;
pub mod param;
pub mod plug;
pub(crate) mod rate_conversion;
pub mod triggers;

pub use audio_in::{AudioIn, AudioInputs};
pub use convolution::{part_convolve, time_convolve, true_stereo_convolve, zero_latency_convolve};
pub use delay::FeedbackDelay;
pub use envelope::{line, line_triggered, DoneAction};
pub use fft_magnitude::fft_magnitude;
pub use lag::{lag, lag_ud};
pub use mix::{mix, mix_array};
pub use oscillator::sine;
pub use param::Param;
pub use plug::Plug;
pub use triggers::{sah, toggle_ff, TriggerEdge};
