//! Which thread is the real-time one.
//!
//! Logging and dropping both behave differently on the audio thread: they queue work for the host to finish later
//! instead of doing I/O or freeing memory inline.
thread_local! {
    static IS_AUDIO_THREAD: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

pub(crate) fn is_audio_thread() -> bool {
    IS_AUDIO_THREAD.with(|x| x.get())
}

/// Mark this thread as being an audio thread, which tells the library to defer or otherwise not perform operations
/// that may block or enter the kernel.
///
/// Hosts call this once from inside their audio callback.
#[inline(always)]
pub fn mark_audio_thread() {
    IS_AUDIO_THREAD.with(|x| x.replace(true));
}

/// Undo [mark_audio_thread], e.g. before reusing a callback thread for other work.
pub fn unmark_audio_thread() {
    IS_AUDIO_THREAD.with(|x| x.replace(false));
}

/// Marks the current thread as an audio thread until dropped.
pub struct AudioThreadGuard {
    was: bool,
}

impl AudioThreadGuard {
    pub fn new() -> AudioThreadGuard {
        let was = IS_AUDIO_THREAD.with(|x| x.replace(true));
        AudioThreadGuard { was }
    }
}

impl Default for AudioThreadGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioThreadGuard {
    fn drop(&mut self) {
        IS_AUDIO_THREAD.with(|x| x.replace(self.was));
    }
}
