//! A long-lived socket which sources can be swapped in and out of, with crossfading.
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use arrayvec::ArrayVec;
use atomic_refcell::{AtomicRef, AtomicRefCell};

use crate::buffer::BlockBuffer;
use crate::config::{MAX_CHANNELS, MAX_PLUG_SOURCES};
use crate::context::{Block, BlockId, Context, PrepareSpec};
use crate::deferred_drop::defer_shared;
use crate::kernel::ProxyOwner;
use crate::node::Memo;
use crate::rate::Rate;
use crate::ugen::UGen;

#[derive(Debug)]
struct PlugRequest {
    source: UGen,
    fade_seconds: f64,
    release_previous: bool,
}

struct PlugState {
    sources: ArrayVec<Arc<PlugRequest>, MAX_PLUG_SOURCES>,
    levels: ArrayVec<f32, MAX_PLUG_SOURCES>,
    current: Option<usize>,

    /// Level change per sample while fading.
    delta: f32,
    release_previous: bool,
    output: BlockBuffer,
    prepared: Option<PrepareSpec>,
}

#[inline(always)]
fn step(level: f32, target: f32, delta: f32) -> f32 {
    if level < target {
        (level + delta).min(target)
    } else {
        (level - delta).max(target)
    }
}

/// Frame `i` of a source channel, whatever its rate.
#[inline(always)]
fn sample_at(got: &[f32], i: usize, frames: usize, period: usize) -> f32 {
    match got.len() {
        0 => 0.0,
        1 => got[0],
        n if n >= frames => got[i],
        _ => got.get(i / period).copied().unwrap_or(0.0),
    }
}

impl PlugState {
    fn target(&self, index: usize) -> f32 {
        if Some(index) == self.current {
            1.0
        } else if self.release_previous {
            0.0
        } else {
            self.levels[index]
        }
    }

    fn accept(&mut self, request: Arc<PlugRequest>, sample_rate: f64) {
        self.delta = if request.fade_seconds > 0.0 {
            (1.0 / (request.fade_seconds * sample_rate)) as f32
        } else {
            f32::INFINITY
        };
        self.release_previous = request.release_previous;

        if let Some(existing) = self
            .sources
            .iter()
            .position(|s| s.source.ptr_eq(&request.source))
        {
            self.current = Some(existing);
            defer_shared(request);
            return;
        }

        if self.sources.is_full() {
            self.evict_quietest();
        }

        self.sources.push(request);
        self.levels.push(0.0);
        self.current = Some(self.sources.len() - 1);
    }

    /// Make room by dropping the quietest source which isn't current.
    fn evict_quietest(&mut self) {
        let victim = (0..self.sources.len())
            .filter(|i| Some(*i) != self.current)
            .min_by(|a, b| self.levels[*a].total_cmp(&self.levels[*b]));
        let Some(victim) = victim else {
            return;
        };

        rt_warn!("Plug has {} sources; dropping one to make room", MAX_PLUG_SOURCES);
        self.remove(victim);
    }

    fn remove(&mut self, index: usize) {
        defer_shared(self.sources.remove(index));
        self.levels.remove(index);
        self.current = match self.current {
            Some(c) if c > index => Some(c - 1),
            Some(c) if c == index => None,
            x => x,
        };
    }

    /// Once a releasing fade completes, let go of everything but the current source.
    fn release_faded(&mut self) {
        if !self.release_previous {
            return;
        }

        let Some(current) = self.current else {
            return;
        };
        if self.levels[current] < 1.0 {
            return;
        }

        let mut i = 0;
        while i < self.sources.len() {
            if Some(i) != self.current && self.levels[i] <= 0.0 {
                self.remove(i);
            } else {
                i += 1;
            }
        }
    }
}

struct PlugOwner {
    channels: usize,
    allow_auto_delete: bool,
    pending: ArcSwapOption<PlugRequest>,
    memo: Memo,
    state: AtomicRefCell<PlugState>,
}

impl PlugOwner {
    fn run(&self, block: &Block) {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;

        if state.prepared.as_ref() != Some(block.spec()) {
            state.output.reserve(block.spec().block_size);
            state.prepared = Some(*block.spec());
        }

        if let Some(request) = self.pending.swap(None) {
            rt_debug!("Plug switching source with a {} second fade", request.fade_seconds);
            state.accept(request, block.sample_rate());
        }

        let targets = (0..state.sources.len())
            .map(|k| state.target(k))
            .collect::<ArrayVec<f32, MAX_PLUG_SOURCES>>();

        let frames = block.frames();
        let period = block.control_block_size();
        state.output.set_frames(frames);

        let mut current_done = false;
        {
            let PlugState {
                sources,
                levels,
                current,
                delta,
                output,
                ..
            } = &mut *state;
            let mut outs = output.channels_mut();
            outs.iter_mut().for_each(|o| o.fill(0.0));

            for (k, source) in sources.iter().enumerate() {
                let start = levels[k];
                let mut end = start;

                for (c, out) in outs.iter_mut().enumerate() {
                    let mut done = false;
                    let got = source.source.process_channel(block, c, &mut done);
                    current_done |= done && Some(k) == *current;

                    let mut level = start;
                    for (i, o) in out.iter_mut().enumerate() {
                        level = step(level, targets[k], *delta);
                        *o += level * sample_at(&got, i, frames, period);
                    }
                    end = level;
                }

                levels[k] = end;
            }
        }

        state.release_faded();

        if current_done && self.allow_auto_delete {
            self.memo.mark_done(block.id());
        }
        self.memo.set_current(block.id());
    }
}

impl ProxyOwner for PlugOwner {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn process_channel(&self, block: &Block, channel: usize, done: &mut bool) -> AtomicRef<'_, [f32]> {
        if !self.memo.is_current(block.id()) {
            self.run(block);
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
        let mut state = self.state.borrow_mut();
        state.output.reserve(spec.block_size);
        state.prepared = Some(*spec);
        for s in state.sources.iter() {
            s.source.prepare_with(spec);
        }
    }

    fn rate(&self) -> Rate {
        Rate::Audio
    }

    fn done_at(&self) -> Option<BlockId> {
        self.memo.done_at()
    }

    /// Let go of sources which finished, then prune inside the ones still playing.
    fn prepare_for_block(&self, block: &Block) -> bool {
        if !self.memo.begin_pruning(block.id()) {
            return false;
        }
        let Ok(mut state) = self.state.try_borrow_mut() else {
            return false;
        };

        let mut pruned = false;
        let mut i = 0;
        while i < state.sources.len() {
            if state.sources[i].source.finished_before(block) {
                rt_debug!("Plug dropping a finished source at block {}", block.id());
                state.remove(i);
                pruned = true;
            } else {
                pruned |= state.sources[i].source.prune_nodes(block);
                i += 1;
            }
        }
        pruned
    }
}

/// A handle whose source can be replaced while it plays.
///
/// Sources are handed to the audio thread through a lock-free slot and picked up at the start of the next block.
pub struct Plug {
    owner: Arc<PlugOwner>,
    ugen: UGen,
}

impl Plug {
    /// A silent plug of `channels` channels.
    ///
    /// With `allow_auto_delete`, the plug reports itself done when its current source does.  Otherwise it shields the
    /// graph around it from its sources finishing.
    pub fn new(channels: usize, allow_auto_delete: bool) -> Plug {
        let channels = channels.clamp(1, MAX_CHANNELS);
        let owner = Arc::new(PlugOwner {
            channels,
            allow_auto_delete,
            pending: ArcSwapOption::empty(),
            memo: Memo::new(),
            state: AtomicRefCell::new(PlugState {
                sources: ArrayVec::new(),
                levels: ArrayVec::new(),
                current: None,
                delta: f32::INFINITY,
                release_previous: true,
                output: BlockBuffer::new(channels),
                prepared: None,
            }),
        });

        let ugen = UGen::from_owner(owner.clone());
        Plug { owner, ugen }
    }

    pub fn ugen(&self) -> UGen {
        self.ugen.clone()
    }

    /// Switch to `source`, fading over `fade_seconds` (0 switches at once).
    ///
    /// With `release_previous`, earlier sources fade out and are dropped once the fade ends.  Without it they keep
    /// playing alongside the new one.  Setting a source the plug already holds switches back to it.
    pub fn set_source(&self, context: &Context, source: &UGen, fade_seconds: f64, release_previous: bool) {
        source.prepare(context);
        self.owner.pending.store(Some(Arc::new(PlugRequest {
            source: source.clone(),
            fade_seconds: fade_seconds.max(0.0),
            release_previous,
        })));
    }
}

impl std::fmt::Debug for Plug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plug")
            .field("channels", &self.owner.channels)
            .field("allow_auto_delete", &self.owner.allow_auto_delete)
            .finish_non_exhaustive()
    }
}
