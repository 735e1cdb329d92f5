//! Spreading partition work across the blocks of a hop.
//!
//! With `P` partitions, the product for partition 0 has to wait for the newest input spectrum, so it happens at the
//! transform.  Products for partitions `1..P` only involve spectra which already exist when the hop begins, so they
//! can be done at any point during the hop.  We hand them out in proportion to how much of the hop has elapsed, which
//! keeps per-block work near `(P - 1) * block / hop` and guarantees each partition is serviced exactly once per hop.
use std::ops::Range;

#[derive(Clone, Debug)]
pub struct PartitionSchedule {
    partitions: usize,
    hop: usize,

    /// The next partition to hand out.  Partition 0 belongs to the transform, so this starts at 1.
    cursor: usize,
}

impl PartitionSchedule {
    pub fn new(partitions: usize, hop: usize) -> Self {
        debug_assert!(hop > 0);
        Self {
            partitions,
            hop,
            cursor: 1,
        }
    }

    /// With one partition (or none) there is no work to spread, and every hop is ready as soon as its input is.
    pub fn is_degenerate(&self) -> bool {
        self.partitions <= 1
    }

    /// Partitions to service now that `filled` samples of the current hop have arrived.
    ///
    /// `filled` must be less than the hop; the final portion of a hop goes through [PartitionSchedule::finish_hop].
    pub fn advance(&mut self, filled: usize) -> Range<usize> {
        debug_assert!(filled < self.hop);
        if self.is_degenerate() {
            return 1..1;
        }

        let spread = self.partitions - 1;
        let target = (1 + spread * filled.min(self.hop) / self.hop).min(self.partitions);
        let start = self.cursor;
        self.cursor = target.max(start);
        start..self.cursor
    }

    /// Everything not yet handed out this hop.  Resets for the next hop.
    pub fn finish_hop(&mut self) -> Range<usize> {
        let start = self.cursor.min(self.partitions.max(1));
        let end = self.partitions.max(1);
        self.cursor = 1;
        start..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_degenerate_is_always_ready() {
        let mut s = PartitionSchedule::new(1, 64);
        assert!(s.is_degenerate());
        for filled in [0, 16, 63] {
            assert!(s.advance(filled).is_empty());
        }
        assert!(s.finish_hop().is_empty());
    }

    #[test]
    fn test_even_spread() {
        // 9 partitions, 8 blocks per hop: one partition per block.
        let mut s = PartitionSchedule::new(9, 512);
        let mut got = vec![];
        for block in 1..8 {
            got.push(s.advance(block * 64));
        }
        got.push(s.finish_hop());
        assert_eq!(got, (1..9).map(|p| p..p + 1).collect::<Vec<_>>());
    }

    proptest! {
        #![proptest_config(ProptestConfig{cases:1000, ..Default::default()})]
        #[test]
        fn test_each_partition_once_per_hop(
            partitions in 0usize..200,
            hop_log2 in 3u32..13,
            block_log2 in 0u32..10,
            hops in 1usize..4,
        ) {
            let hop = 1usize << hop_log2;
            let block = (1usize << block_log2).min(hop);
            let blocks_per_hop = hop / block;
            let mut schedule = PartitionSchedule::new(partitions, hop);

            for _ in 0..hops {
                let mut seen = vec![0u32; partitions.max(1)];
                let mut worst = 0;

                let mut visit = |r: Range<usize>, seen: &mut Vec<u32>| {
                    worst = worst.max(r.len());
                    for p in r {
                        seen[p] += 1;
                    }
                };

                for b in 1..blocks_per_hop {
                    let r = schedule.advance(b * block);
                    visit(r, &mut seen);
                }
                let r = schedule.finish_hop();
                visit(r, &mut seen);

                // Partition 0 is the transform's job.
                prop_assert_eq!(seen[0], 0);
                for p in 1..partitions {
                    prop_assert_eq!(seen[p], 1, "partition {} serviced {} times", p, seen[p]);
                }

                let bound = (partitions.saturating_sub(1)).div_ceil(blocks_per_hop) + 1;
                prop_assert!(worst <= bound, "worst={}, bound={}", worst, bound);
            }
        }
    }
}
