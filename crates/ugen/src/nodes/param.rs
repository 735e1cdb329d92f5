use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::context::Block;
use crate::kernel::{Kernel, KernelStatus, Signal};
use crate::rate::Rate;
use crate::ugen::UGen;

#[derive(Debug)]
struct ParamKernel {
    value: Arc<AtomicU32>,
}

impl Kernel for ParamKernel {
    fn process(&mut self, _block: &Block, _inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        output.fill(f32::from_bits(self.value.load(Ordering::Relaxed)));
        KernelStatus::Running
    }
}

/// A control-rate value the host can change from any thread.  Changes are picked up at the next block.
#[derive(Clone, Debug)]
pub struct Param {
    value: Arc<AtomicU32>,
    ugen: UGen,
}

impl Param {
    pub fn new(initial: f32) -> Param {
        let value = Arc::new(AtomicU32::new(initial.to_bits()));
        let ugen = UGen::from_kernels(Rate::Control, &[], |_| ParamKernel {
            value: value.clone(),
        });
        Param { value, ugen }
    }

    pub fn set(&self, value: f32) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.value.load(Ordering::Relaxed))
    }

    pub fn ugen(&self) -> UGen {
        self.ugen.clone()
    }
}
