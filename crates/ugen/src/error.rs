#[derive(Debug, derive_more::Display, derive_more::IsVariant)]
enum ErrorPayload {
    #[display(fmt = "Sample rate {} is not positive and finite", _0)]
    InvalidSampleRate(f64),

    #[display(fmt = "Block size {} is invalid", _0)]
    InvalidBlockSize(usize),

    #[display(
        fmt = "Control block size {} does not evenly divide audio block size {}",
        control,
        audio
    )]
    ControlBlockMismatch { audio: usize, control: usize },

    #[display(fmt = "Expected {} channels, but got {}", expected, got)]
    ChannelMismatch { expected: usize, got: usize },

    #[display(fmt = "{} channels is more than the maximum of {}", _0, _1)]
    TooManyChannels(usize, usize),

    #[display(fmt = "Impulse has {} channels, but only 1 or 2 are supported here", _0)]
    ImpulseChannels(usize),

    #[display(fmt = "{}", _0)]
    Validation(String),
}

#[derive(Debug, thiserror::Error)]
#[error("{payload}")]
pub struct Error {
    payload: ErrorPayload,
}

macro_rules! ctor {
    ($name: ident, $variant: ident $(, $arg: ident: $ty: ty)*) => {
        pub(crate) fn $name($($arg: $ty),*) -> Error {
            Error {
                payload: ErrorPayload::$variant($($arg),*),
            }
        }
    };
}

impl Error {
    ctor!(invalid_sample_rate, InvalidSampleRate, sr: f64);
    ctor!(invalid_block_size, InvalidBlockSize, size: usize);
    ctor!(too_many_channels, TooManyChannels, got: usize, max: usize);
    ctor!(impulse_channels, ImpulseChannels, got: usize);

    pub(crate) fn control_block_mismatch(audio: usize, control: usize) -> Error {
        Error {
            payload: ErrorPayload::ControlBlockMismatch { audio, control },
        }
    }

    pub(crate) fn channel_mismatch(expected: usize, got: usize) -> Error {
        Error {
            payload: ErrorPayload::ChannelMismatch { expected, got },
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Error {
        Error {
            payload: ErrorPayload::Validation(message.into()),
        }
    }

    /// Was this error caused by a bad sample rate, block size, or control block size?
    pub fn is_invalid_timing(&self) -> bool {
        self.payload.is_invalid_sample_rate()
            || self.payload.is_invalid_block_size()
            || self.payload.is_control_block_mismatch()
    }

    /// Was this error caused by handing something the wrong number of channels?
    pub fn is_channel_error(&self) -> bool {
        self.payload.is_channel_mismatch()
            || self.payload.is_too_many_channels()
            || self.payload.is_impulse_channels()
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
