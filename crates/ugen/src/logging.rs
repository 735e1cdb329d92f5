//! Logging which is safe to call from the audio thread.
//!
//! The audio thread cannot allocate or do I/O, and no `log` backend promises either.  So we provide `rt_level!`
//! macros which mostly act like those from the log crate:
//!
//! - Off the audio thread they forward straight to `log`.
//! - On the audio thread they format into a fixed-size inline buffer and push it onto a preallocated queue.
//!
//! The engine owns no threads, so nothing empties that queue on its own.  Hosts call [drain] from a non-realtime
//! thread (a UI timer, the thread which owns the [crate::Context], etc.) and the context drains it once more on drop.
//! Messages which didn't fit are reported as truncated, and messages which didn't fit in the queue are counted and
//! reported with the next message that did.
use std::cell::Cell;
use std::fmt::Arguments as FmtArgs;
use std::time::{Duration, Instant};

use arrayvec::ArrayString;
use thingbuf::StaticThingBuf;

const LOG_LENGTH_LIMIT: usize = 256;
const LOG_QUEUE_LENGTH: usize = 1024;

/// If a message waited this long to be drained, say so.
const WARN_LATENCY: Duration = Duration::from_millis(250);

type InlineText = ArrayString<LOG_LENGTH_LIMIT>;

#[derive(Clone, Debug)]
#[allow(clippy::large_enum_variant)] // This is basically Cow.
enum RecordText {
    Static(&'static str),
    Inline(InlineText),
}

#[derive(Clone, Debug)]
pub(crate) struct RtRecord {
    level: log::Level,

    /// Output of `module_path!` at the call site.
    target: &'static str,
    text: RecordText,
    truncated: bool,

    /// Messages this thread failed to enqueue just before this one.
    dropped_before: u64,
    queued_at: Instant,
}

static QUEUE: StaticThingBuf<Option<RtRecord>, LOG_QUEUE_LENGTH> = StaticThingBuf::new();

/// Writes into an inline buffer until it is full, then notes the truncation and throws the rest away.
struct TruncatingWriter<'a> {
    text: &'a mut InlineText,
    truncated: &'a mut bool,
}

impl std::fmt::Write for TruncatingWriter<'_> {
    fn write_str(&mut self, s: &str) -> std::fmt::Result {
        if *self.truncated {
            return Ok(());
        }

        // ArrayString capacity is in bytes.
        if s.len() <= self.text.remaining_capacity() {
            self.text.push_str(s);
            return Ok(());
        }

        *self.truncated = true;

        // Go char by char to stay on a character boundary.
        for c in s.chars() {
            if self.text.try_push(c).is_err() {
                break;
            }
        }

        Ok(())
    }
}

fn build_record(level: log::Level, args: FmtArgs<'_>, target: &'static str) -> RtRecord {
    use std::fmt::Write;

    let mut truncated = false;
    let text = match args.as_str() {
        Some(s) => RecordText::Static(s),
        None => {
            let mut text = InlineText::new();
            let mut writer = TruncatingWriter {
                text: &mut text,
                truncated: &mut truncated,
            };
            // The writer never reports an error.
            let _ = write!(writer, "{}", args);
            RecordText::Inline(text)
        }
    };

    RtRecord {
        level,
        target,
        text,
        truncated,
        dropped_before: 0,
        queued_at: Instant::now(),
    }
}

/// Queue a message from the audio thread.  Entrypoint for the macros.
pub(crate) fn enqueue(level: log::Level, args: FmtArgs<'_>, target: &'static str) {
    thread_local! {
        static DROPPED: Cell<u64> = const { Cell::new(0) };
    }

    if level > log::max_level() {
        return;
    }

    let mut record = build_record(level, args, target);
    record.dropped_before = DROPPED.get();

    match QUEUE.push(Some(record)) {
        Ok(()) => DROPPED.set(0),
        Err(_) => DROPPED.set(DROPPED.get() + 1),
    }
}

fn emit(record: RtRecord) {
    let text = match &record.text {
        RecordText::Static(s) => s,
        RecordText::Inline(i) => i.as_str(),
    };

    if record.dropped_before != 0 {
        log::warn!(
            "Audio thread log queue overflowed; {} messages were dropped",
            record.dropped_before
        );
    }

    let waited = record.queued_at.elapsed();
    let truncated = if record.truncated { ", truncated" } else { "" };

    if waited > WARN_LATENCY {
        log::log!(
            target: record.target,
            record.level,
            "{text} (from audio thread, delayed by {:.3} seconds{truncated})",
            waited.as_secs_f64()
        );
    } else {
        log::log!(target: record.target, record.level, "{text} (from audio thread{truncated})");
    }
}

/// Forward everything the audio thread logged to the `log` crate.  Returns how many messages were forwarded.
///
/// Must not be called from the audio thread.
pub fn drain() -> usize {
    let mut count = 0;
    while let Some(slot) = QUEUE.pop() {
        if let Some(record) = slot {
            emit(record);
            count += 1;
        }
    }
    count
}

/// Same as the log macro, but realtime-safe and the target is always the current module.
#[allow(clippy::crate_in_macro_def)] // This is private.
macro_rules! rt_log {
    ($level: expr, $fmt: expr $(, $args: expr)* $(,)?) => {
        let macro_level = $level;
        if crate::is_audio_thread::is_audio_thread() {
            if macro_level <= log::max_level() {
                crate::logging::enqueue(macro_level, format_args!($fmt, $($args),*), module_path!());
            }
        } else {
            log::log!(macro_level, $fmt, $($args),*);
        }
    }
}

macro_rules! rt_error {
    ($($args: tt)+) => {
        rt_log!(log::Level::Error, $($args)*);
    }
}

macro_rules! rt_warn {
    ($($args: tt)+) => {
        rt_log!(log::Level::Warn, $($args)*);
    }
}

macro_rules! rt_debug {
    ($($args: tt)+) => {
        rt_log!(log::Level::Debug, $($args)*);
    }
}
