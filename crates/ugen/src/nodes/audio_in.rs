use std::sync::Arc;

use atomic_refcell::AtomicRefCell;

use crate::config::MAX_CHANNELS;
use crate::context::{Block, PrepareSpec};
use crate::error::{Error, Result};
use crate::kernel::{Kernel, KernelStatus, Signal};
use crate::rate::Rate;
use crate::ugen::UGen;

#[derive(Debug)]
struct InputStorage {
    channels: Vec<Vec<f32>>,

    /// Valid samples per channel.
    lengths: Vec<usize>,
}

#[derive(Debug)]
struct AudioInKernel {
    storage: Arc<AtomicRefCell<InputStorage>>,
    channel: usize,
}

impl Kernel for AudioInKernel {
    /// Every kernel shares the storage, so whichever prepares first sizes it for all of them.
    fn prepare(&mut self, spec: &PrepareSpec) {
        let Ok(mut storage) = self.storage.try_borrow_mut() else {
            return;
        };
        for c in storage.channels.iter_mut() {
            if c.len() < spec.block_size {
                c.resize(spec.block_size, 0.0);
            }
        }
    }

    fn process(&mut self, _block: &Block, _inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        let Ok(storage) = self.storage.try_borrow() else {
            rt_warn!("Audio input is being written while the graph reads it; outputting silence");
            output.fill(0.0);
            return KernelStatus::Running;
        };

        let data = &storage.channels[self.channel][..storage.lengths[self.channel]];
        let n = data.len().min(output.len());
        output[..n].copy_from_slice(&data[..n]);
        output[n..].fill(0.0);
        KernelStatus::Running
    }
}

/// Writes host audio into an [AudioIn] graph.  Cheap to clone.
#[derive(Clone, Debug)]
pub struct AudioInputs {
    storage: Arc<AtomicRefCell<InputStorage>>,
}

impl AudioInputs {
    pub fn channel_count(&self) -> usize {
        self.storage.borrow().channels.len()
    }

    /// Provide the next block of input for one channel.  Short input is zero padded.
    ///
    /// Call from the audio thread before processing the block, after the graph was prepared with
    /// [UGen::prepare].  Never allocates: input past the prepared block size is dropped.
    pub fn set_input(&self, channel: usize, samples: &[f32]) {
        let Ok(mut storage) = self.storage.try_borrow_mut() else {
            rt_error!("Audio input written while the graph is reading it");
            return;
        };

        let Some(dest) = storage.channels.get_mut(channel) else {
            rt_error!("No audio input channel {}", channel);
            return;
        };
        let n = samples.len().min(dest.len());
        if n < samples.len() {
            rt_warn!(
                "Audio input of {} frames is longer than the prepared {}; truncating",
                samples.len(),
                dest.len()
            );
        }
        dest[..n].copy_from_slice(&samples[..n]);
        storage.lengths[channel] = n;
    }

    /// Provide one slice per channel.  Missing channels are silent this block.
    pub fn set_inputs(&self, inputs: &[&[f32]]) {
        for c in 0..self.channel_count() {
            self.set_input(c, inputs.get(c).copied().unwrap_or(&[]));
        }
    }
}

/// Host-supplied audio.
pub struct AudioIn;

impl AudioIn {
    /// A graph handle reading `channels` channels of host audio, and the writer which feeds it.
    ///
    /// Input storage is sized when the graph is prepared.
    pub fn new(channels: usize) -> Result<(UGen, AudioInputs)> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(Error::too_many_channels(channels, MAX_CHANNELS));
        }

        let storage = Arc::new(AtomicRefCell::new(InputStorage {
            channels: vec![vec![]; channels],
            lengths: vec![0; channels],
        }));

        let inputs = (0..channels)
            .map(|c| {
                UGen::from_kernels(Rate::Audio, &[], |_| AudioInKernel {
                    storage: storage.clone(),
                    channel: c,
                })
            })
            .collect::<Vec<_>>();

        Ok((UGen::stack(inputs.iter()), AudioInputs { storage }))
    }
}
