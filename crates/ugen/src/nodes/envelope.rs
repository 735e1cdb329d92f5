use crate::context::Block;
use crate::kernel::{Kernel, KernelStatus, Signal};
use crate::nodes::triggers::TriggerEdge;
use crate::rate::Rate;
use crate::ugen::UGen;

/// What a time-limited node does once it has finished.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, derive_more::IsVariant)]
pub enum DoneAction {
    /// Keep outputting the final value.
    #[default]
    DoNothing,

    /// Output silence and ask to be removed from the graph.
    FreeWhenDone,
}

#[derive(Debug)]
struct LineKernel {
    start: f32,
    end: f32,
    duration: f64,
    action: DoneAction,

    /// Samples since the line (re)started.
    position: f64,
    trigger: Option<TriggerEdge>,
}

impl LineKernel {
    fn value_at(&self, total: f64) -> (f32, bool) {
        if self.position >= total {
            return (self.end, true);
        }
        let t = (self.position / total) as f32;
        (self.start + (self.end - self.start) * t, false)
    }
}

impl Kernel for LineKernel {
    fn process(&mut self, block: &Block, inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        let total = self.duration * block.sample_rate();

        for (i, o) in output.iter_mut().enumerate() {
            if let (Some(edge), Some(trig)) = (self.trigger.as_mut(), inputs.first()) {
                if edge.check(trig.at(i)) {
                    self.position = 0.0;
                }
            }

            let (value, finished) = self.value_at(total);
            *o = value;
            self.position += 1.0;

            if finished && self.action.is_free_when_done() {
                return KernelStatus::Done { at: i + 1 };
            }
        }

        KernelStatus::Running
    }
}

/// A linear ramp from `start` to `end` over `duration` seconds, then `end` forever (or until [DoneAction] applies).
pub fn line(start: f32, end: f32, duration: f64, action: DoneAction) -> UGen {
    UGen::from_kernels(Rate::Audio, &[], |_| LineKernel {
        start,
        end,
        duration: duration.max(0.0),
        action,
        position: 0.0,
        trigger: None,
    })
}

/// Like [line], but restarts from `start` whenever `trigger` crosses from at most zero to above zero.
pub fn line_triggered(
    start: f32,
    end: f32,
    duration: f64,
    trigger: impl Into<UGen>,
    action: DoneAction,
) -> UGen {
    let trigger = trigger.into();
    UGen::from_kernels(Rate::Audio, &[&trigger], |_| LineKernel {
        start,
        end,
        duration: duration.max(0.0),
        action,
        position: 0.0,
        trigger: Some(TriggerEdge::new()),
    })
}
