use crate::context::Block;
use crate::kernel::{Kernel, KernelStatus, Signal};
use crate::rate::Rate;
use crate::ugen::UGen;

/// Coefficient which decays by 60 dB over `seconds` at `rate` values per second.
fn coefficient(seconds: f32, rate: f64) -> f32 {
    if seconds <= 0.0 || !seconds.is_finite() {
        return 0.0;
    }
    ((0.001f64).ln() / (seconds as f64 * rate)).exp() as f32
}

/// Caches the coefficient for the last lag time seen, since lag times rarely change.
#[derive(Debug)]
struct Coefficient {
    seconds: f32,
    b1: f32,
}

impl Coefficient {
    fn new() -> Self {
        Coefficient {
            seconds: f32::NAN,
            b1: 0.0,
        }
    }

    fn get(&mut self, seconds: f32, rate: f64) -> f32 {
        if seconds != self.seconds {
            self.seconds = seconds;
            self.b1 = coefficient(seconds, rate);
        }
        self.b1
    }
}

/// Values per second a node at this rate produces.
fn values_per_second(rate: Rate, block: &Block) -> f64 {
    match rate {
        Rate::Audio => block.sample_rate(),
        Rate::Control => block.sample_rate() / block.control_block_size() as f64,
    }
}

#[derive(Debug)]
struct LagKernel {
    rate: Rate,
    up: Coefficient,
    down: Coefficient,

    /// Whether the second lag input is separate from the first.
    separate_down: bool,
    y: Option<f32>,
}

impl Kernel for LagKernel {
    fn process(&mut self, block: &Block, inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        let input = inputs[0];
        let per_second = values_per_second(self.rate, block);
        let b_up = self.up.get(inputs[1].first(), per_second);
        let b_down = if self.separate_down {
            self.down.get(inputs[2].first(), per_second)
        } else {
            b_up
        };

        let mut y = self.y.unwrap_or_else(|| input.first());
        for (i, o) in output.iter_mut().enumerate() {
            let x = input.at(i);
            let b1 = if x > y { b_up } else { b_down };
            y = x + b1 * (y - x);
            *o = y;
        }
        self.y = Some(y);

        KernelStatus::Running
    }
}

/// Exponential smoothing which gets 60 dB of the way to a new value in `lag_time` seconds.
///
/// Starts at the input's first value.  Lag times are read once per block.
pub fn lag(input: impl Into<UGen>, lag_time: impl Into<UGen>) -> UGen {
    let (input, lag_time) = (input.into(), lag_time.into());
    let rate = input.rate();
    UGen::from_kernels(rate, &[&input, &lag_time], |_| LagKernel {
        rate,
        up: Coefficient::new(),
        down: Coefficient::new(),
        separate_down: false,
        y: None,
    })
}

/// Like [lag], with separate times for rising and falling input.
pub fn lag_ud(input: impl Into<UGen>, up: impl Into<UGen>, down: impl Into<UGen>) -> UGen {
    let (input, up, down) = (input.into(), up.into(), down.into());
    let rate = input.rate();
    UGen::from_kernels(rate, &[&input, &up, &down], |_| LagKernel {
        rate,
        up: Coefficient::new(),
        down: Coefficient::new(),
        separate_down: true,
        y: None,
    })
}
