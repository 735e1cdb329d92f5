use crate::fft::{FftEngine, FftWorkspace};
use crate::spectrum::SplitSpectrum;

/// An impulse response cut into equal partitions, each transformed once up front.
///
/// Partitions are `fft_size / 2` samples long and are zero padded to a full transform, which is what makes each
/// product with an input window a linear (not circular) convolution over the second half of the window.
#[derive(Debug)]
pub struct PartitionedImpulse {
    fft_size: usize,
    partitions: Vec<SplitSpectrum>,
    segment_len: usize,
}

/// Partitions needed for a segment of `len` samples at the given hop.
pub fn partition_count(len: usize, hop: usize) -> usize {
    debug_assert!(hop > 0);
    len.div_ceil(hop)
}

impl PartitionedImpulse {
    /// Partition `impulse[start..end]`.
    ///
    /// `end` is clamped to the impulse, and `None` means the whole remainder.  At most `max_partitions` partitions are
    /// kept; anything past that is dropped.  An empty segment gives an impulse with no partitions, which convolves to
    /// silence.
    pub fn new(
        engine: &FftEngine,
        impulse: &[f32],
        start: usize,
        end: Option<usize>,
        max_partitions: usize,
    ) -> Self {
        let fft_size = engine.size();
        let hop = engine.half_size();

        let end = end.unwrap_or(impulse.len()).min(impulse.len());
        let start = start.min(end);
        let segment = &impulse[start..end];

        let count = partition_count(segment.len(), hop).min(max_partitions);
        let segment_len = segment.len().min(count * hop);

        let mut workspace: FftWorkspace = engine.workspace();
        let partitions = segment[..segment_len]
            .chunks(hop)
            .map(|chunk| {
                let mut spectrum = engine.spectrum();
                engine.forward(&mut workspace, chunk, false, &mut spectrum);
                spectrum
            })
            .collect::<Vec<_>>();

        debug_assert_eq!(partitions.len(), count);

        PartitionedImpulse {
            fft_size,
            partitions,
            segment_len,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn hop(&self) -> usize {
        self.fft_size / 2
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Samples of the impulse which made it into partitions.
    pub fn len(&self) -> usize {
        self.segment_len
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn partition(&self, index: usize) -> &SplitSpectrum {
        &self.partitions[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_counts() {
        let engine = FftEngine::new(64);
        let impulse = vec![1.0f32; 100];

        assert_eq!(
            PartitionedImpulse::new(&engine, &impulse, 0, None, usize::MAX).partition_count(),
            4
        );
        assert_eq!(
            PartitionedImpulse::new(&engine, &impulse, 0, Some(32), usize::MAX).partition_count(),
            1
        );
        assert_eq!(
            PartitionedImpulse::new(&engine, &impulse, 0, Some(33), usize::MAX).partition_count(),
            2
        );
        assert_eq!(
            PartitionedImpulse::new(&engine, &impulse, 90, Some(1000), usize::MAX).partition_count(),
            1
        );
    }

    #[test]
    fn test_capacity_clamps() {
        let engine = FftEngine::new(64);
        let impulse = vec![1.0f32; 1000];
        let p = PartitionedImpulse::new(&engine, &impulse, 0, None, 3);
        assert_eq!(p.partition_count(), 3);
        assert_eq!(p.len(), 96);
    }

    #[test]
    fn test_empty_segments() {
        let engine = FftEngine::new(64);
        assert!(PartitionedImpulse::new(&engine, &[], 0, None, usize::MAX).is_empty());
        assert!(PartitionedImpulse::new(&engine, &[1.0; 10], 10, None, usize::MAX).is_empty());
        assert!(PartitionedImpulse::new(&engine, &[1.0; 10], 8, Some(4), usize::MAX).is_empty());
    }
}
