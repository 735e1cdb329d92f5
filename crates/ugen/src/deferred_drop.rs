//! Dropping graph pieces without freeing memory on the audio thread.
//!
//! Pruned nodes and released sources are pushed onto a preallocated queue when the current thread is marked as the
//! audio thread, and dropped inline otherwise.  Since the engine owns no threads, the host empties the queue with
//! [drain] from some non-realtime thread.  Should the queue fill up, we drop on the audio thread as a last resort.
use std::any::Any;
use std::sync::Arc;

use thingbuf::StaticThingBuf;

use crate::is_audio_thread::is_audio_thread;
use crate::ugen::UGen;

/// The number of items allowed to be pending a drop.
const BACKLOG: usize = 4096;

/// Clone is only there for thingbuf's default recycling, which resets emptied slots to `None`.
#[derive(Clone, derivative::Derivative)]
#[derivative(Debug)]
pub(crate) enum DropElement {
    Graph(#[derivative(Debug = "ignore")] UGen),
    Shared(#[derivative(Debug = "ignore")] Arc<dyn Any + Send + Sync>),
}

/// Slots are `None` once drained, so recycling one on the audio thread never drops anything.
static WORK_QUEUE: StaticThingBuf<Option<DropElement>, BACKLOG> = StaticThingBuf::new();

/// Drop `element` later if this is the audio thread, otherwise now.
pub(crate) fn defer(element: DropElement) {
    if !is_audio_thread() {
        return;
    }

    if let Err(full) = WORK_QUEUE.push(Some(element)) {
        rt_warn!("Deferred drop queue is full; dropping on the audio thread");
        std::mem::drop(full);
    }
}

pub(crate) fn defer_graph(graph: UGen) {
    defer(DropElement::Graph(graph));
}

pub(crate) fn defer_shared<T: Any + Send + Sync>(value: Arc<T>) {
    defer(DropElement::Shared(value as Arc<dyn Any + Send + Sync>));
}

/// Drop everything the audio thread has handed off.  Returns how many items were dropped.
///
/// Must not be called from the audio thread.
pub fn drain() -> usize {
    let mut count = 0;
    while let Some(slot) = WORK_QUEUE.pop() {
        if slot.is_some() {
            count += 1;
        }
        std::mem::drop(slot);
    }
    count
}
