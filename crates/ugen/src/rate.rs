use crate::context::{Block, PrepareSpec};

/// How often a node produces values.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, derive_more::IsVariant)]
pub enum Rate {
    /// One value per sample.
    Audio,

    /// One value per control period.
    Control,
}

impl Rate {
    /// Values this rate produces during the given block.
    pub fn frames(&self, block: &Block) -> usize {
        match self {
            Rate::Audio => block.frames(),
            Rate::Control => block.control_frames(),
        }
    }

    /// The most values this rate can produce in one block under the given configuration.
    pub fn capacity(&self, spec: &PrepareSpec) -> usize {
        match self {
            Rate::Audio => spec.block_size,
            Rate::Control => spec.block_size.div_ceil(spec.control_block_size),
        }
    }

    /// The rate of a node computed from inputs at the given rates: audio if anything is audio.
    pub fn combine(rates: impl IntoIterator<Item = Rate>) -> Rate {
        if rates.into_iter().any(|r| r.is_audio()) {
            Rate::Audio
        } else {
            Rate::Control
        }
    }
}
