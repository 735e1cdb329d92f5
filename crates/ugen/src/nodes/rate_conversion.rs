use std::sync::Arc;

use crate::context::Block;
use crate::kernel::{Kernel, KernelNode, KernelStatus, Signal};
use crate::node::NodeRef;
use crate::rate::Rate;

/// Control to audio: ramp linearly over one control period from the last emitted value to each new one.
///
/// The ramp is carried across blocks, so blocks shorter than a control period continue it rather than restarting.
#[derive(Debug, Default)]
pub(crate) struct Slew {
    ramp: Option<Ramp>,
}

#[derive(Debug, Clone, Copy)]
struct Ramp {
    from: f32,
    to: f32,

    /// Samples of the ramp already emitted.
    pos: usize,
}

impl Ramp {
    fn value(&self, period: usize) -> f32 {
        if self.pos >= period {
            self.to
        } else {
            self.from + (self.to - self.from) * self.pos as f32 / period as f32
        }
    }
}

impl Kernel for Slew {
    fn process(&mut self, block: &Block, inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        let period = block.control_block_size();
        let input = inputs[0];

        for (p, chunk) in output.chunks_mut(period).enumerate() {
            let target = input.at(p);
            let mut ramp = match self.ramp {
                None => Ramp {
                    from: target,
                    to: target,
                    pos: period,
                },
                Some(r) if r.to != target => Ramp {
                    from: r.value(period),
                    to: target,
                    pos: 0,
                },
                Some(r) => r,
            };

            for o in chunk.iter_mut() {
                ramp.pos = (ramp.pos + 1).min(period);
                *o = ramp.value(period);
            }

            self.ramp = Some(ramp);
        }

        KernelStatus::Running
    }
}

/// Audio to control: the first sample of each control period.
#[derive(Debug, Default)]
pub(crate) struct Decimate;

impl Kernel for Decimate {
    fn process(&mut self, block: &Block, inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        let period = block.control_block_size();
        for (p, o) in output.iter_mut().enumerate() {
            *o = inputs[0].at(p * period);
        }
        KernelStatus::Running
    }
}

/// Make `node` produce values at `wanted`, inserting a converter if it doesn't already.  Constants are left alone.
pub(crate) fn conform(node: &NodeRef, wanted: Rate) -> NodeRef {
    if node.is_constant() || node.rate() == wanted {
        return node.clone();
    }

    match wanted {
        Rate::Audio => Arc::new(KernelNode::new(Rate::Audio, [node.clone()], Slew::default())),
        Rate::Control => Arc::new(KernelNode::new(Rate::Control, [node.clone()], Decimate)),
    }
}
