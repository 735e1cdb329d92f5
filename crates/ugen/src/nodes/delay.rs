use std::sync::{Arc, Weak};

use atomic_refcell::{AtomicRef, AtomicRefCell};

use crate::buffer::BlockBuffer;
use crate::context::{Block, BlockId, PrepareSpec};
use crate::node::{Memo, Node};
use crate::unique_id::UniqueId;
use crate::ugen::UGen;

/// Copy `from` into `to`, holding single values and short (control rate) input across control periods.
fn copy_expanding(from: &[f32], to: &mut [f32], period: usize) {
    if from.len() >= to.len() && from.len() > 1 {
        to.copy_from_slice(&from[..to.len()]);
        return;
    }

    for (i, o) in to.iter_mut().enumerate() {
        *o = match from.len() {
            0 => 0.0,
            1 => from[0],
            _ => from.get(i / period).copied().unwrap_or(0.0),
        };
    }
}

struct DelayState {
    output: BlockBuffer,
    pending: BlockBuffer,
    prepared: Option<PrepareSpec>,
}

impl DelayState {
    fn ensure(&mut self, spec: &PrepareSpec) {
        if self.prepared.as_ref() == Some(spec) {
            return;
        }
        self.output.reserve(spec.block_size);
        self.pending.reserve(spec.block_size);
        self.prepared = Some(*spec);
    }
}

struct DelayNode {
    id: UniqueId,
    memo: Memo,
    source: AtomicRefCell<Option<Weak<dyn Node>>>,
    state: AtomicRefCell<DelayState>,
}

impl Node for DelayNode {
    fn process(&self, block: &Block, _done: &mut bool) -> AtomicRef<'_, [f32]> {
        if !self.memo.is_current(block.id()) {
            // Set first: the source may well read this node while we run it.
            self.memo.set_current(block.id());
            let frames = block.frames();

            {
                let mut guard = self.state.borrow_mut();
                let state = &mut *guard;
                state.ensure(block.spec());
                state.output.set_frames(frames);
                let previous = state.pending.channel(0);
                let out = state.output.channel_mut(0);
                let n = previous.len().min(out.len());
                out[..n].copy_from_slice(&previous[..n]);
                out[n..].fill(0.0);
            }

            let source = self.source.borrow().as_ref().and_then(|w| w.upgrade());
            let mut guard = self.state.borrow_mut();
            guard.pending.set_frames(frames);

            match source {
                Some(source) => {
                    drop(guard);
                    let mut ignored = false;
                    let got = source.process(block, &mut ignored);
                    let mut guard = self.state.borrow_mut();
                    copy_expanding(&got, guard.pending.channel_mut(0), block.control_block_size());
                }
                None => guard.pending.channel_mut(0).fill(0.0),
            }
        }

        AtomicRef::map(self.state.borrow(), |s| s.output.channel(0))
    }

    fn id(&self) -> UniqueId {
        self.id
    }

    fn last_block(&self) -> Option<BlockId> {
        self.memo.last_block()
    }

    fn prepare(&self, spec: &PrepareSpec) {
        self.state.borrow_mut().ensure(spec);
    }
}

/// A one-block delay whose source can be set after it is built, which is how graphs express feedback.
///
/// The delay holds its source weakly: something else (usually the graph's root) must keep the source alive.
#[derive(Clone)]
pub struct FeedbackDelay {
    nodes: Vec<Arc<DelayNode>>,
}

impl FeedbackDelay {
    pub fn new(channels: usize) -> FeedbackDelay {
        let nodes = (0..channels.clamp(1, crate::config::MAX_CHANNELS))
            .map(|_| {
                Arc::new(DelayNode {
                    id: UniqueId::new(),
                    memo: Memo::new(),
                    source: AtomicRefCell::new(None),
                    state: AtomicRefCell::new(DelayState {
                        output: BlockBuffer::new(1),
                        pending: BlockBuffer::new(1),
                        prepared: None,
                    }),
                })
            })
            .collect();
        FeedbackDelay { nodes }
    }

    /// The delayed signal.
    pub fn ugen(&self) -> UGen {
        UGen::from_nodes(self.nodes.iter().map(|n| n.clone() as Arc<dyn Node>))
    }

    /// Point the delay at its source.  Channels wrap.
    ///
    /// Must not race processing; set it while building the graph.
    pub fn set_source(&self, source: &UGen) {
        for (c, n) in self.nodes.iter().enumerate() {
            *n.source.borrow_mut() = Some(Arc::downgrade(source.node(c)));
        }
    }
}

impl std::fmt::Debug for FeedbackDelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackDelay")
            .field("channels", &self.nodes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::nodes::param::Param;

    #[test]
    fn test_delays_one_block() {
        let ctx = Context::new(Default::default()).unwrap();
        let p = Param::new(1.0);
        let source = p.ugen().ar();
        let delay = FeedbackDelay::new(1);
        delay.set_source(&source);
        let delayed = delay.ugen();

        let mut done = false;
        let block = ctx.next_block(128);
        assert!(delayed.process_channel(&block, 0, &mut done).iter().all(|x| *x == 0.0));

        let block = ctx.next_block(128);
        assert!(delayed.process_channel(&block, 0, &mut done).iter().all(|x| *x == 1.0));
    }

    #[test]
    fn test_feedback_loop() {
        // y[n] = 1 + 0.5 * y[n - block], per block.
        let ctx = Context::new(Default::default()).unwrap();
        let delay = FeedbackDelay::new(1);
        let y = (delay.ugen() * 0.5) + 1.0;
        delay.set_source(&y);

        let mut expected = 1.0f32;
        for _ in 0..5 {
            let block = ctx.next_block(128);
            let mut done = false;
            let got = y.process_channel(&block, 0, &mut done);
            assert!(got.iter().all(|x| *x == expected), "{} vs {}", got[0], expected);
            expected = 1.0 + 0.5 * expected;
        }
    }

    #[test]
    fn test_dropped_source_is_silence() {
        let ctx = Context::new(Default::default()).unwrap();
        let delay = FeedbackDelay::new(1);
        {
            let source = Param::new(1.0).ugen();
            delay.set_source(&source);
        }
        let u = delay.ugen();
        for _ in 0..2 {
            let block = ctx.next_block(128);
            let mut done = false;
            assert!(u.process_channel(&block, 0, &mut done).iter().all(|x| *x == 0.0));
        }
    }
}
