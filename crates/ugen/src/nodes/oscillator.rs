use std::f64::consts::TAU;

use crate::context::Block;
use crate::kernel::{Kernel, KernelStatus, Signal};
use crate::rate::Rate;
use crate::ugen::UGen;

/// Phase accumulator in cycles, kept in `[0, 1)`.
#[derive(Debug, Default)]
struct SineKernel {
    cycles: f64,
}

impl Kernel for SineKernel {
    fn process(&mut self, block: &Block, inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        let (freq, phase, amplitude) = (inputs[0], inputs[1], inputs[2]);
        let sr = block.sample_rate();

        for (i, o) in output.iter_mut().enumerate() {
            let angle = TAU * self.cycles + phase.at(i) as f64;
            *o = amplitude.at(i) * angle.sin() as f32;

            self.cycles += freq.at(i) as f64 / sr;
            self.cycles -= self.cycles.floor();
        }

        KernelStatus::Running
    }
}

/// A sine oscillator: `amplitude * sin(2π * freq * t + phase)`, with `phase` in radians.
///
/// Expands over all three inputs.
pub fn sine(freq: impl Into<UGen>, phase: impl Into<UGen>, amplitude: impl Into<UGen>) -> UGen {
    let (freq, phase, amplitude) = (freq.into(), phase.into(), amplitude.into());
    UGen::from_kernels(Rate::Audio, &[&freq, &phase, &amplitude], |_| {
        SineKernel::default()
    })
}
