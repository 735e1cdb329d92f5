use crate::context::Block;
use crate::kernel::{Kernel, KernelStatus, Signal};
use crate::rate::Rate;
use crate::ugen::UGen;

/// Detects a signal crossing from at most zero to above zero.
#[derive(Copy, Clone, Debug, Default)]
pub struct TriggerEdge {
    last: f32,
}

impl TriggerEdge {
    pub fn new() -> Self {
        Default::default()
    }

    /// Feed the next value.  True on a rising edge.
    #[inline(always)]
    pub fn check(&mut self, value: f32) -> bool {
        let rising = self.last <= 0.0 && value > 0.0;
        self.last = value;
        rising
    }
}

#[derive(Debug, Default)]
struct SahKernel {
    edge: TriggerEdge,
    held: f32,
}

impl Kernel for SahKernel {
    fn process(&mut self, _block: &Block, inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        let (input, trig) = (inputs[0], inputs[1]);
        for (i, o) in output.iter_mut().enumerate() {
            if self.edge.check(trig.at(i)) {
                self.held = input.at(i);
            }
            *o = self.held;
        }
        KernelStatus::Running
    }
}

#[derive(Debug, Default)]
struct ToggleFfKernel {
    edge: TriggerEdge,
    state: bool,
}

impl Kernel for ToggleFfKernel {
    fn process(&mut self, _block: &Block, inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        let trig = inputs[0];
        for (i, o) in output.iter_mut().enumerate() {
            if self.edge.check(trig.at(i)) {
                self.state = !self.state;
            }
            *o = if self.state { 1.0 } else { 0.0 };
        }
        KernelStatus::Running
    }
}

/// Sample `input` on each rising edge of `trig` and hold it.  Starts at zero.
pub fn sah(input: impl Into<UGen>, trig: impl Into<UGen>) -> UGen {
    let (input, trig) = (input.into(), trig.into());
    let rate = Rate::combine([input.rate(), trig.rate()]);
    UGen::from_kernels(rate, &[&input, &trig], |_| SahKernel::default())
}

/// Flip between 0 and 1 on each rising edge of `trig`.
pub fn toggle_ff(trig: impl Into<UGen>) -> UGen {
    let trig = trig.into();
    UGen::from_kernels(trig.rate(), &[&trig], |_| ToggleFfKernel::default())
}
