use std::sync::Arc;

use atomic_refcell::AtomicRef;
use smallvec::{smallvec, SmallVec};

use crate::config::MAX_CHANNELS;
use crate::context::{Block, BlockId, Context, PrepareSpec};
use crate::kernel::{Kernel, KernelNode, Proxy, ProxyOwner};
use crate::node::{finished_before, ConstantNode, NodeRef, NULL};
use crate::nodes::rate_conversion::conform;
use crate::rate::Rate;

/// A handle to one or more channels of a graph.
///
/// Cloning is cheap and shares the nodes.  Dropping the last handle to a subgraph releases it.
#[derive(Clone)]
pub struct UGen {
    channels: SmallVec<[NodeRef; 2]>,
}

impl UGen {
    pub fn from_node(node: NodeRef) -> UGen {
        UGen {
            channels: smallvec![node],
        }
    }

    /// Build a handle from several single-channel nodes.  An empty list is silence.
    pub fn from_nodes(nodes: impl IntoIterator<Item = NodeRef>) -> UGen {
        let channels: SmallVec<[NodeRef; 2]> = nodes.into_iter().take(MAX_CHANNELS).collect();
        if channels.is_empty() {
            return UGen::null();
        }
        UGen { channels }
    }

    /// Expose every channel of a proxy owner.
    pub fn from_owner(owner: Arc<dyn ProxyOwner>) -> UGen {
        UGen::from_nodes(
            (0..owner.channel_count())
                .map(|c| Arc::new(Proxy::new(owner.clone(), c)) as NodeRef),
        )
    }

    /// Build one kernel per output channel.
    ///
    /// The channel count is the widest input's, and narrower inputs wrap.  Inputs are converted to `rate` as needed.
    /// With no inputs this builds one channel.
    pub fn from_kernels<K: Kernel>(
        rate: Rate,
        inputs: &[&UGen],
        mut make: impl FnMut(usize) -> K,
    ) -> UGen {
        let channels = inputs
            .iter()
            .map(|i| i.channel_count())
            .max()
            .unwrap_or(1)
            .min(MAX_CHANNELS);

        UGen::from_nodes((0..channels).map(|c| {
            let ins = inputs.iter().map(|i| conform(i.node(c), rate));
            Arc::new(KernelNode::new(rate, ins, make(c))) as NodeRef
        }))
    }

    pub fn constant(value: f32) -> UGen {
        UGen::from_node(Arc::new(ConstantNode::new(value)))
    }

    /// One channel of silence.
    pub fn null() -> UGen {
        UGen::from_node(NULL.clone())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// A handle to one channel.  Indices wrap.
    pub fn channel(&self, index: usize) -> UGen {
        UGen::from_node(self.node(index).clone())
    }

    /// The node for a channel.  Indices wrap.
    pub fn node(&self, index: usize) -> &NodeRef {
        &self.channels[index % self.channels.len()]
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.channels
    }

    /// Concatenate the channels of several handles.
    pub fn stack<'a>(ugens: impl IntoIterator<Item = &'a UGen>) -> UGen {
        UGen::from_nodes(
            ugens
                .into_iter()
                .flat_map(|u| u.channels.iter().cloned()),
        )
    }

    /// If every channel is the same constant, that constant.
    pub fn constant_value(&self) -> Option<f32> {
        let first = self.channels[0].constant_value()?;
        self.channels[1..]
            .iter()
            .all(|c| c.constant_value() == Some(first))
            .then_some(first)
    }

    pub fn is_constant(&self) -> bool {
        self.channels.iter().all(|c| c.is_constant())
    }

    /// Audio if any non-constant channel is audio rate.
    pub fn rate(&self) -> Rate {
        Rate::combine(
            self.channels
                .iter()
                .filter(|c| !c.is_constant())
                .map(|c| c.rate()),
        )
    }

    /// Convert to control rate.
    pub fn kr(&self) -> UGen {
        UGen::from_nodes(self.channels.iter().map(|c| conform(c, Rate::Control)))
    }

    /// Convert to audio rate.
    pub fn ar(&self) -> UGen {
        UGen::from_nodes(self.channels.iter().map(|c| conform(c, Rate::Audio)))
    }

    /// Size the whole graph for the context's current configuration, off the audio thread.
    pub fn prepare(&self, context: &Context) {
        self.prepare_with(context.spec());
    }

    pub fn prepare_with(&self, spec: &PrepareSpec) {
        for c in self.channels.iter() {
            c.prepare(spec);
        }
    }

    /// Do both handles point at the same nodes?
    pub fn ptr_eq(&self, other: &UGen) -> bool {
        self.channels.len() == other.channels.len()
            && self
                .channels
                .iter()
                .zip(other.channels.iter())
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }

    /// The most recent block any channel ran for.
    pub fn last_block(&self) -> Option<BlockId> {
        self.channels.iter().filter_map(|c| c.last_block()).max()
    }

    pub fn process_channel(&self, block: &Block, channel: usize, done: &mut bool) -> AtomicRef<'_, [f32]> {
        self.node(channel).process(block, done)
    }

    /// Prune whatever finished in an earlier block.  Call at the start of each block, before processing.
    ///
    /// If a channel of this handle finished, the whole handle becomes silence.  Otherwise finished nodes further down
    /// are swapped for silence wherever a consumer outlives them, as [crate::mix] does without auto delete.  Returns
    /// true if anything was pruned.  Pruned nodes are released through the deferred drop queue, so this is safe on
    /// the audio thread.
    pub fn prepare_for_block(&mut self, block: &Block) -> bool {
        if !self.finished_before(block) {
            return self.prune_nodes(block);
        }

        rt_debug!("Pruning a finished graph at block {}", block.id());
        let old = std::mem::replace(self, UGen::null());
        crate::deferred_drop::defer_graph(old);
        true
    }

    /// Did any channel finish before `block`?
    pub(crate) fn finished_before(&self, block: &Block) -> bool {
        self.channels.iter().any(|c| finished_before(c, block))
    }

    /// Prune below the roots, leaving the roots themselves in place.
    pub(crate) fn prune_nodes(&self, block: &Block) -> bool {
        let mut pruned = false;
        for c in self.channels.iter() {
            pruned |= c.prepare_for_block(block);
        }
        pruned
    }

    /// Process channel 0 into `output`.  Returns true if the graph wants to be removed.
    pub fn set_output(&mut self, block: &Block, output: &mut [f32]) -> bool {
        let mut done = false;
        let got = self.process_channel(block, 0, &mut done);
        copy_out(block, &got, output);
        done
    }

    /// Process one channel into each output.  Channels wrap.  Returns true if the graph wants to be removed.
    pub fn set_outputs(&mut self, block: &Block, outputs: &mut [&mut [f32]]) -> bool {
        let mut done = false;
        for (c, o) in outputs.iter_mut().enumerate() {
            let got = self.process_channel(block, c, &mut done);
            copy_out(block, &got, o);
        }
        done
    }

    /// Process into an interleaved buffer of `channels` channels.  Returns true if the graph wants to be removed.
    pub fn render_interleaved(&mut self, block: &Block, output: &mut [f32], channels: usize) -> bool {
        let mut done = false;
        if channels == 0 {
            return done;
        }

        for c in 0..channels {
            let got = self.process_channel(block, c, &mut done);
            let period = block.control_block_size();
            for (f, frame) in output.chunks_exact_mut(channels).take(block.frames()).enumerate() {
                frame[c] = sample_at(&got, f, block.frames(), period);
            }
        }
        done
    }
}

/// Read frame `f` of a processed channel, whatever its length: audio, control (held), or constant.
fn sample_at(got: &[f32], f: usize, frames: usize, period: usize) -> f32 {
    match got.len() {
        0 => 0.0,
        1 => got[0],
        n if n >= frames => got[f],
        _ => got.get(f / period).copied().unwrap_or(0.0),
    }
}

fn copy_out(block: &Block, got: &[f32], output: &mut [f32]) {
    let frames = block.frames().min(output.len());
    if got.len() >= frames && got.len() > 1 {
        output[..frames].copy_from_slice(&got[..frames]);
    } else {
        let period = block.control_block_size();
        for (f, o) in output[..frames].iter_mut().enumerate() {
            *o = sample_at(got, f, block.frames(), period);
        }
    }
    output[frames..].fill(0.0);
}

impl From<f32> for UGen {
    fn from(value: f32) -> UGen {
        UGen::constant(value)
    }
}

impl From<&UGen> for UGen {
    fn from(value: &UGen) -> UGen {
        value.clone()
    }
}

impl From<NodeRef> for UGen {
    fn from(value: NodeRef) -> UGen {
        UGen::from_node(value)
    }
}

impl std::fmt::Debug for UGen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UGen")
            .field("channels", &self.channels.len())
            .field("rate", &self.rate())
            .field("constant", &self.constant_value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_wrapping() {
        let a = UGen::constant(1.0);
        let b = UGen::constant(2.0);
        let s = UGen::stack([&a, &b]);
        assert_eq!(s.channel_count(), 2);
        assert_eq!(s.channel(3).constant_value(), Some(2.0));
        assert!(s.channel(0).ptr_eq(&a));
        assert_eq!(s.constant_value(), None);
        assert!(s.is_constant());
    }

    #[test]
    fn test_empty_is_null() {
        let u = UGen::from_nodes(std::iter::empty());
        assert_eq!(u.channel_count(), 1);
        assert_eq!(u.constant_value(), Some(0.0));
    }

    #[test]
    fn test_constant_output_fills_block() {
        let ctx = Context::new(Default::default()).unwrap();
        let block = ctx.next_block(100);
        let mut u = UGen::constant(0.5);
        let mut out = vec![9.0f32; 128];
        assert!(!u.set_output(&block, &mut out));
        assert!(out[..100].iter().all(|x| *x == 0.5));
        assert!(out[100..].iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_interleaved() {
        let ctx = Context::new(Default::default()).unwrap();
        let block = ctx.next_block(4);
        let mut u = UGen::stack([&UGen::constant(1.0), &UGen::constant(2.0)]);
        let mut out = vec![0.0f32; 8];
        u.render_interleaved(&block, &mut out, 2);
        assert_eq!(out, [1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    }
}
