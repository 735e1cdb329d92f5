use std::sync::Arc;

use arrayvec::ArrayVec;

use crate::config::MAX_CHANNELS;
use crate::error::{Error, Result};

/// Immutable, cheaply clonable multichannel sample data, such as an impulse response.
///
/// Channels are planar: channel `c` starts `c * stride` samples after the first.  Regions share the underlying
/// allocation.
#[derive(Clone)]
pub struct Buffer {
    data: Arc<[f32]>,
    offset: usize,
    channels: usize,
    frames: usize,
    stride: usize,
}

fn check_channels(channels: usize) -> Result<()> {
    if channels == 0 {
        return Err(Error::channel_mismatch(1, 0));
    }
    if channels > MAX_CHANNELS {
        return Err(Error::too_many_channels(channels, MAX_CHANNELS));
    }
    Ok(())
}

impl Buffer {
    /// A buffer of silence.  Zero channels are treated as one.
    pub fn zeroed(channels: usize, frames: usize) -> Buffer {
        let channels = channels.clamp(1, MAX_CHANNELS);
        Buffer {
            data: vec![0.0; channels * frames].into(),
            offset: 0,
            channels,
            frames,
            stride: frames,
        }
    }

    pub fn from_mono(samples: impl Into<Arc<[f32]>>) -> Buffer {
        let data: Arc<[f32]> = samples.into();
        let frames = data.len();
        Buffer {
            data,
            offset: 0,
            channels: 1,
            frames,
            stride: frames,
        }
    }

    /// Build from one vec per channel.  All channels must be the same length.
    pub fn from_channels(channels: Vec<Vec<f32>>) -> Result<Buffer> {
        check_channels(channels.len())?;
        let frames = channels[0].len();

        if let Some(bad) = channels.iter().find(|c| c.len() != frames) {
            return Err(Error::validation(format!(
                "Channels must all be the same length: expected {} frames but got {}",
                frames,
                bad.len()
            )));
        }

        let count = channels.len();
        let data = channels.into_iter().flatten().collect::<Vec<_>>();
        Ok(Buffer {
            data: data.into(),
            offset: 0,
            channels: count,
            frames,
            stride: frames,
        })
    }

    /// Deinterleave.  The length must be a multiple of the channel count.
    pub fn from_interleaved(samples: &[f32], channels: usize) -> Result<Buffer> {
        check_channels(channels)?;
        if samples.len() % channels != 0 {
            return Err(Error::validation(format!(
                "{} samples is not a whole number of {}-channel frames",
                samples.len(),
                channels
            )));
        }

        let frames = samples.len() / channels;
        let mut data = vec![0.0f32; samples.len()];
        for (f, frame) in samples.chunks_exact(channels).enumerate() {
            for (c, s) in frame.iter().enumerate() {
                data[c * frames + f] = *s;
            }
        }

        Ok(Buffer {
            data: data.into(),
            offset: 0,
            channels,
            frames,
            stride: frames,
        })
    }

    /// Wrap existing planar data without copying.
    pub fn from_shared(data: Arc<[f32]>, channels: usize, frames: usize, stride: usize) -> Result<Buffer> {
        check_channels(channels)?;
        if stride < frames {
            return Err(Error::validation(format!(
                "Stride {} is shorter than the {} frames in a channel",
                stride, frames
            )));
        }

        let needed = (channels - 1) * stride + frames;
        if needed > data.len() {
            return Err(Error::validation(format!(
                "{} channels of {} frames at stride {} need {} samples, but only {} were provided",
                channels,
                frames,
                stride,
                needed,
                data.len()
            )));
        }

        Ok(Buffer {
            data,
            offset: 0,
            channels,
            frames,
            stride,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// # Panics
    ///
    /// If `index` is not a channel of this buffer.
    pub fn channel(&self, index: usize) -> &[f32] {
        assert!(
            index < self.channels,
            "Channel {} out of range for a buffer of {} channels",
            index,
            self.channels
        );
        let start = self.offset + index * self.stride;
        &self.data[start..start + self.frames]
    }

    /// A view of frames `start..end`, clamped to this buffer.  Shares the data.
    pub fn region(&self, start: usize, end: usize) -> Buffer {
        let end = end.min(self.frames);
        let start = start.min(end);
        Buffer {
            data: self.data.clone(),
            offset: self.offset + start,
            channels: self.channels,
            frames: end - start,
            stride: self.stride,
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("channels", &self.channels)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

/// Per-node output storage: some channels of up to `capacity` frames, of which the first `frames` are valid this block.
///
/// Only [BlockBuffer::reserve] allocates, and nodes only call it when the configuration changes.
#[derive(Debug)]
pub(crate) struct BlockBuffer {
    data: Vec<f32>,
    channels: usize,
    capacity: usize,
    frames: usize,
}

impl BlockBuffer {
    pub(crate) fn new(channels: usize) -> BlockBuffer {
        BlockBuffer {
            data: vec![],
            channels: channels.max(1),
            capacity: 0,
            frames: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Grow to at least `capacity` frames per channel.  Never shrinks.
    pub(crate) fn reserve(&mut self, capacity: usize) {
        if capacity <= self.capacity {
            return;
        }

        let mut data = vec![0.0; capacity * self.channels];
        for c in 0..self.channels {
            let old = &self.data[c * self.capacity..c * self.capacity + self.frames];
            data[c * capacity..c * capacity + self.frames].copy_from_slice(old);
        }

        self.data = data;
        self.capacity = capacity;
    }

    /// Set the valid length.  Clamped to the capacity, which callers reserve ahead of time.
    pub(crate) fn set_frames(&mut self, frames: usize) {
        debug_assert!(frames <= self.capacity);
        self.frames = frames.min(self.capacity);
    }

    pub(crate) fn channel(&self, index: usize) -> &[f32] {
        let start = index * self.capacity;
        &self.data[start..start + self.frames]
    }

    pub(crate) fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        let start = index * self.capacity;
        &mut self.data[start..start + self.frames]
    }

    pub(crate) fn channels_mut(&mut self) -> ArrayVec<&mut [f32], MAX_CHANNELS> {
        let frames = self.frames;
        if self.capacity == 0 {
            return (0..self.channels.min(MAX_CHANNELS)).map(|_| <&mut [f32]>::default()).collect();
        }

        self.data
            .chunks_mut(self.capacity)
            .take(self.channels.min(MAX_CHANNELS))
            .map(|c| &mut c[..frames])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleaved() {
        let b = Buffer::from_interleaved(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2).unwrap();
        assert_eq!(b.channels(), 2);
        assert_eq!(b.frames(), 3);
        assert_eq!(b.channel(0), &[1.0, 3.0, 5.0]);
        assert_eq!(b.channel(1), &[2.0, 4.0, 6.0]);

        assert!(Buffer::from_interleaved(&[1.0, 2.0, 3.0], 2).is_err());
        assert!(Buffer::from_interleaved(&[], 0).unwrap_err().is_channel_error());
    }

    #[test]
    fn test_channels_must_match() {
        assert!(Buffer::from_channels(vec![vec![1.0], vec![1.0, 2.0]]).is_err());
        assert!(Buffer::from_channels(vec![]).is_err());
        let b = Buffer::from_channels(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(b.channel(1), &[3.0, 4.0]);
    }

    #[test]
    fn test_shared_and_region() {
        let data: Arc<[f32]> = (0..10).map(|x| x as f32).collect::<Vec<_>>().into();
        let b = Buffer::from_shared(data.clone(), 2, 4, 5).unwrap();
        assert_eq!(b.channel(0), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(b.channel(1), &[5.0, 6.0, 7.0, 8.0]);

        let r = b.region(1, 100);
        assert_eq!(r.frames(), 3);
        assert_eq!(r.channel(1), &[6.0, 7.0, 8.0]);
        assert!(b.region(3, 2).is_empty());

        assert!(Buffer::from_shared(data.clone(), 2, 6, 5).is_err());
        assert!(Buffer::from_shared(data, 3, 4, 5).is_err());
    }

    #[test]
    fn test_block_buffer_growth_keeps_contents() {
        let mut b = BlockBuffer::new(2);
        b.reserve(4);
        b.set_frames(4);
        b.channel_mut(1).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        b.reserve(8);
        assert_eq!(b.capacity(), 8);
        assert_eq!(b.channel(1), &[1.0, 2.0, 3.0, 4.0]);

        b.set_frames(8);
        let chans = b.channels_mut();
        assert_eq!(chans.len(), 2);
        assert!(chans.iter().all(|c| c.len() == 8));
    }
}
