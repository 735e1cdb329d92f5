//! Generic node plumbing.
//!
//! Most nodes are written as a [Kernel]: per-kind state plus a function from input slices to an output slice.
//! [KernelNode] wraps a kernel in the memoization and input resolution every node needs.  Kernels which produce
//! several channels at once are [MultiKernel]s, wrapped by an owner which hands out one [Proxy] per channel.
use std::sync::Arc;

use arrayvec::ArrayVec;
use atomic_refcell::{AtomicRef, AtomicRefCell};
use smallvec::SmallVec;

use crate::buffer::BlockBuffer;
use crate::config::{MAX_CHANNELS, MAX_INPUTS};
use crate::context::{Block, BlockId, PrepareSpec};
use crate::deferred_drop::defer_graph;
use crate::is_audio_thread::is_audio_thread;
use crate::node::{finished_before, Memo, Node, NodeRef, NULL};
use crate::rate::Rate;
use crate::ugen::UGen;
use crate::unique_id::UniqueId;

/// One resolved input.
///
/// Inputs are either as long as the consumer's output or, for constants, a single value.
#[derive(Copy, Clone, Debug)]
pub struct Signal<'a>(&'a [f32]);

impl<'a> Signal<'a> {
    pub fn new(samples: &'a [f32]) -> Self {
        Signal(samples)
    }

    /// The value at frame `index`.  Single-value signals read the same everywhere.
    #[inline(always)]
    pub fn at(&self, index: usize) -> f32 {
        if self.0.len() == 1 {
            return self.0[0];
        }
        self.0.get(index).copied().unwrap_or(0.0)
    }

    pub fn first(&self) -> f32 {
        self.0.first().copied().unwrap_or(0.0)
    }

    pub fn as_slice(&self) -> &'a [f32] {
        self.0
    }

    /// Get exactly `scratch.len()` samples, copying into `scratch` only if this signal is shorter.
    pub fn expand<'b>(&'b self, scratch: &'b mut [f32]) -> &'b [f32] {
        if self.0.len() == scratch.len() {
            return self.0;
        }
        for (i, o) in scratch.iter_mut().enumerate() {
            *o = self.at(i);
        }
        scratch
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, derive_more::IsVariant)]
pub enum KernelStatus {
    Running,

    /// Finished at frame `at` of this block.  Everything from there on is silence, forever.
    Done { at: usize },
}

pub trait Kernel: Send + Sync + 'static {
    /// Size state for a configuration.  Called off the audio thread when possible.
    fn prepare(&mut self, _spec: &PrepareSpec) {}

    /// Fill `output`, which has one value per frame at the node's rate.
    fn process(&mut self, block: &Block, inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus;
}

/// Like [Kernel], but produces several channels in one call.
pub trait MultiKernel: Send + Sync + 'static {
    fn prepare(&mut self, _spec: &PrepareSpec) {}

    fn process(
        &mut self,
        block: &Block,
        inputs: &[Signal<'_>],
        outputs: &mut [&mut [f32]],
    ) -> KernelStatus;
}

/// A node computing several channels together, exposed through one [Proxy] per channel.
pub trait ProxyOwner: Send + Sync + 'static {
    fn channel_count(&self) -> usize;

    fn process_channel(&self, block: &Block, channel: usize, done: &mut bool) -> AtomicRef<'_, [f32]>;

    fn last_block(&self) -> Option<BlockId>;

    fn prepare(&self, spec: &PrepareSpec);

    fn rate(&self) -> Rate;

    fn done_at(&self) -> Option<BlockId>;

    /// See [Node::prepare_for_block].
    fn prepare_for_block(&self, _block: &Block) -> bool {
        false
    }
}

type Inputs = AtomicRefCell<SmallVec<[NodeRef; 4]>>;

type InputBorrows<'a> = ArrayVec<AtomicRef<'a, [f32]>, MAX_INPUTS>;

/// Process every input for `block`, reporting whether any of them is done.
fn resolve_inputs<'a>(inputs: &'a [NodeRef], block: &Block) -> (InputBorrows<'a>, bool) {
    let mut any_done = false;
    let borrows = inputs
        .iter()
        .take(MAX_INPUTS)
        .map(|i| {
            let mut done = false;
            let got = i.process(block, &mut done);
            any_done |= done;
            got
        })
        .collect();
    (borrows, any_done)
}

/// Swap inputs which finished before `block` for silence, and let the others prune their own inputs.
fn prune_inputs(inputs: &Inputs, block: &Block) -> bool {
    let Ok(mut inputs) = inputs.try_borrow_mut() else {
        return false;
    };

    let mut pruned = false;
    for input in inputs.iter_mut() {
        if finished_before(input, block) {
            rt_debug!("Pruning finished node {} at block {}", input.id().get(), block.id());
            let old = std::mem::replace(input, NULL.clone());
            defer_graph(UGen::from_node(old));
            pruned = true;
        } else {
            pruned |= input.prepare_for_block(block);
        }
    }
    pruned
}

/// Resize if the configuration changed.  Returns true if it did.
fn ensure_prepared(
    prepared: &mut Option<PrepareSpec>,
    spec: &PrepareSpec,
    output: &mut BlockBuffer,
    rate: Rate,
    prepare: impl FnOnce(&PrepareSpec),
) -> bool {
    if prepared.as_ref() == Some(spec) && output.capacity() >= rate.capacity(spec) {
        return false;
    }

    prepare(spec);
    output.reserve(rate.capacity(spec));
    *prepared = Some(*spec);
    true
}

struct KernelState<K> {
    kernel: K,
    output: BlockBuffer,
    finished: bool,
    prepared: Option<PrepareSpec>,
}

/// Memoizing wrapper around a [Kernel].
pub(crate) struct KernelNode<K> {
    id: UniqueId,
    rate: Rate,
    inputs: Inputs,

    /// Finish when any input does.
    follows_inputs: bool,
    memo: Memo,
    state: AtomicRefCell<KernelState<K>>,
}

impl<K: Kernel> KernelNode<K> {
    pub(crate) fn new(rate: Rate, inputs: impl IntoIterator<Item = NodeRef>, kernel: K) -> Self {
        let inputs: SmallVec<[NodeRef; 4]> = inputs.into_iter().collect();
        debug_assert!(inputs.len() <= MAX_INPUTS);

        KernelNode {
            id: UniqueId::new(),
            rate,
            inputs: AtomicRefCell::new(inputs),
            follows_inputs: true,
            memo: Memo::new(),
            state: AtomicRefCell::new(KernelState {
                kernel,
                output: BlockBuffer::new(1),
                finished: false,
                prepared: None,
            }),
        }
    }

    /// Keep running when inputs finish.  Finished inputs read as silence until the next
    /// [Node::prepare_for_block] swaps them out.
    pub(crate) fn outliving_inputs(mut self) -> Self {
        self.follows_inputs = false;
        self
    }

    fn run(&self, block: &Block, inputs: &[Signal<'_>], inputs_done: bool) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;

        let KernelState {
            kernel,
            output,
            finished,
            prepared,
        } = state;
        if ensure_prepared(prepared, block.spec(), output, self.rate, |s| kernel.prepare(s))
            && is_audio_thread()
        {
            rt_debug!("Node {} resized on the audio thread", self.id.get());
        }

        output.set_frames(self.rate.frames(block));
        let out = output.channel_mut(0);

        if *finished {
            out.fill(0.0);
        } else if let KernelStatus::Done { at } = kernel.process(block, inputs, out) {
            let at = at.min(out.len());
            out[at..].fill(0.0);
            *finished = true;
        }

        if *finished || (inputs_done && self.follows_inputs) {
            self.memo.mark_done(block.id());
        }
        self.memo.set_current(block.id());
    }
}

impl<K: Kernel> Node for KernelNode<K> {
    fn process(&self, block: &Block, done: &mut bool) -> AtomicRef<'_, [f32]> {
        if !self.memo.is_current(block.id()) {
            let inputs = self.inputs.borrow();
            let (borrows, inputs_done) = resolve_inputs(&inputs, block);

            // Feedback through a delay can run this node while its inputs were resolving.
            if !self.memo.is_current(block.id()) {
                let signals = borrows
                    .iter()
                    .map(|b| Signal(&**b))
                    .collect::<ArrayVec<_, MAX_INPUTS>>();
                self.run(block, &signals, inputs_done);
            }
        }

        if self.memo.done_at().is_some() {
            *done = true;
        }

        AtomicRef::map(self.state.borrow(), |s| s.output.channel(0))
    }

    fn id(&self) -> UniqueId {
        self.id
    }

    fn rate(&self) -> Rate {
        self.rate
    }

    fn last_block(&self) -> Option<BlockId> {
        self.memo.last_block()
    }

    fn prepare(&self, spec: &PrepareSpec) {
        {
            let mut guard = self.state.borrow_mut();
            let KernelState {
                kernel,
                output,
                prepared,
                ..
            } = &mut *guard;
            if !ensure_prepared(prepared, spec, output, self.rate, |s| kernel.prepare(s)) {
                return;
            }
        }

        for i in self.inputs.borrow().iter() {
            i.prepare(spec);
        }
    }

    fn scheduled_for_deletion(&self) -> Option<BlockId> {
        self.memo.done_at()
    }

    fn prepare_for_block(&self, block: &Block) -> bool {
        self.memo.begin_pruning(block.id()) && prune_inputs(&self.inputs, block)
    }
}

/// Memoizing wrapper around a [MultiKernel].
pub(crate) struct OwnerNode<K> {
    rate: Rate,
    channels: usize,
    inputs: Inputs,
    memo: Memo,
    state: AtomicRefCell<KernelState<K>>,
}

impl<K: MultiKernel> OwnerNode<K> {
    pub(crate) fn new(
        rate: Rate,
        channels: usize,
        inputs: impl IntoIterator<Item = NodeRef>,
        kernel: K,
    ) -> Self {
        let channels = channels.clamp(1, MAX_CHANNELS);
        OwnerNode {
            rate,
            channels,
            inputs: AtomicRefCell::new(inputs.into_iter().collect()),
            memo: Memo::new(),
            state: AtomicRefCell::new(KernelState {
                kernel,
                output: BlockBuffer::new(channels),
                finished: false,
                prepared: None,
            }),
        }
    }

    fn run(&self, block: &Block, inputs: &[Signal<'_>], inputs_done: bool) {
        let mut guard = self.state.borrow_mut();
        let KernelState {
            kernel,
            output,
            finished,
            prepared,
        } = &mut *guard;
        ensure_prepared(prepared, block.spec(), output, self.rate, |s| kernel.prepare(s));

        output.set_frames(self.rate.frames(block));
        let mut outs = output.channels_mut();

        if *finished {
            outs.iter_mut().for_each(|o| o.fill(0.0));
        } else if let KernelStatus::Done { at } = kernel.process(block, inputs, &mut outs[..]) {
            for o in outs.iter_mut() {
                let at = at.min(o.len());
                o[at..].fill(0.0);
            }
            *finished = true;
        }

        if *finished || inputs_done {
            self.memo.mark_done(block.id());
        }
        self.memo.set_current(block.id());
    }
}

impl<K: MultiKernel> ProxyOwner for OwnerNode<K> {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn process_channel(&self, block: &Block, channel: usize, done: &mut bool) -> AtomicRef<'_, [f32]> {
        if !self.memo.is_current(block.id()) {
            let inputs = self.inputs.borrow();
            let (borrows, inputs_done) = resolve_inputs(&inputs, block);
            if !self.memo.is_current(block.id()) {
                let signals = borrows
                    .iter()
                    .map(|b| Signal(&**b))
                    .collect::<ArrayVec<_, MAX_INPUTS>>();
                self.run(block, &signals, inputs_done);
            }
        }

        if self.memo.done_at().is_some() {
            *done = true;
        }

        let channel = channel % self.channels;
        AtomicRef::map(self.state.borrow(), |s| s.output.channel(channel))
    }

    fn last_block(&self) -> Option<BlockId> {
        self.memo.last_block()
    }

    fn prepare(&self, spec: &PrepareSpec) {
        {
            let mut guard = self.state.borrow_mut();
            let KernelState {
                kernel,
                output,
                prepared,
                ..
            } = &mut *guard;
            if !ensure_prepared(prepared, spec, output, self.rate, |s| kernel.prepare(s)) {
                return;
            }
        }

        for i in self.inputs.borrow().iter() {
            i.prepare(spec);
        }
    }

    fn rate(&self) -> Rate {
        self.rate
    }

    fn done_at(&self) -> Option<BlockId> {
        self.memo.done_at()
    }

    fn prepare_for_block(&self, block: &Block) -> bool {
        self.memo.begin_pruning(block.id()) && prune_inputs(&self.inputs, block)
    }
}

/// One channel of a [ProxyOwner].
pub(crate) struct Proxy {
    id: UniqueId,
    owner: Arc<dyn ProxyOwner>,
    channel: usize,
}

impl Proxy {
    pub(crate) fn new(owner: Arc<dyn ProxyOwner>, channel: usize) -> Self {
        Proxy {
            id: UniqueId::new(),
            owner,
            channel,
        }
    }
}

impl Node for Proxy {
    fn process(&self, block: &Block, done: &mut bool) -> AtomicRef<'_, [f32]> {
        self.owner.process_channel(block, self.channel, done)
    }

    fn id(&self) -> UniqueId {
        self.id
    }

    fn rate(&self) -> Rate {
        self.owner.rate()
    }

    fn last_block(&self) -> Option<BlockId> {
        self.owner.last_block()
    }

    fn prepare(&self, spec: &PrepareSpec) {
        self.owner.prepare(spec);
    }

    fn scheduled_for_deletion(&self) -> Option<BlockId> {
        self.owner.done_at()
    }

    fn prepare_for_block(&self, block: &Block) -> bool {
        self.owner.prepare_for_block(block)
    }
}
