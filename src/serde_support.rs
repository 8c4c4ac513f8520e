//! Serialization support for the block tree.
//!
//! A vector serializes as its logical size, configuration and the list of
//! non-empty blocks; dense blocks as their words, GAP blocks as their run
//! sequence, FULL blocks as a bare tag. This is generic state capture for
//! embedding applications, not a compressed wire format.

#[cfg(not(test))]
use alloc::vec::Vec;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::block::new_zero_block;
use crate::gap::{GapBlock, GapLevels, GAP_LEVELS, RUN_TERM};
use crate::store::{AllocStrategy, BlockSlot, SubArray};
use crate::vector::{BitVector, VectorConfig};
use crate::BLOCK_WORDS;

#[derive(Serialize, Deserialize)]
enum SlotRepr {
    Full,
    Bit(Vec<u64>),
    Gap { start: bool, runs: Vec<u16> },
}

#[derive(Serialize, Deserialize)]
struct VectorRepr {
    size: u64,
    strategy: u8,
    gap_levels: Vec<u16>,
    blocks: Vec<(u64, SlotRepr)>,
}

impl Serialize for BitVector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let store = self.store();
        let mut blocks = Vec::new();
        for i in 0..store.top_len() {
            let sub = store.sub(i);
            if matches!(sub, SubArray::Empty) {
                continue;
            }
            for j in 0..crate::BLOCKS_IN_SUB {
                let nb = ((i as u64) << 8) | j as u64;
                let repr = match sub.slot(j) {
                    BlockSlot::Empty => continue,
                    BlockSlot::Full => SlotRepr::Full,
                    BlockSlot::Bit(b) => SlotRepr::Bit(b.to_vec()),
                    BlockSlot::Gap(g) => SlotRepr::Gap {
                        start: g.start_value(),
                        runs: g.runs().to_vec(),
                    },
                };
                blocks.push((nb, repr));
            }
        }
        let repr = VectorRepr {
            size: self.size(),
            strategy: match store.strategy() {
                AllocStrategy::Bit => 0,
                AllocStrategy::Gap => 1,
            },
            gap_levels: store.gap_levels().to_vec(),
            blocks,
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BitVector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let repr = VectorRepr::deserialize(deserializer)?;
        let strategy = match repr.strategy {
            0 => AllocStrategy::Bit,
            1 => AllocStrategy::Gap,
            _ => return Err(D::Error::custom("unknown strategy tag")),
        };
        if repr.gap_levels.len() != GAP_LEVELS {
            return Err(D::Error::custom("bad GAP level table length"));
        }
        let mut gap_levels: GapLevels = Default::default();
        gap_levels.copy_from_slice(&repr.gap_levels);

        let mut bv = BitVector::with_config(VectorConfig {
            size: repr.size,
            strategy,
            gap_levels,
        });
        for (nb, slot_repr) in repr.blocks {
            match slot_repr {
                SlotRepr::Full => {
                    *bv.store.slot_mut(nb) = BlockSlot::Full;
                }
                SlotRepr::Bit(words) => {
                    if words.len() != BLOCK_WORDS {
                        return Err(D::Error::custom("bad dense block length"));
                    }
                    let mut b = new_zero_block();
                    b.copy_from_slice(&words);
                    *bv.store.slot_mut(nb) = BlockSlot::Bit(b);
                }
                SlotRepr::Gap { start, runs } => {
                    if runs.last() != Some(&RUN_TERM) {
                        return Err(D::Error::custom("unterminated run sequence"));
                    }
                    match GapBlock::from_runs(start, runs, &gap_levels) {
                        Some(g) => *bv.store.slot_mut(nb) = BlockSlot::Gap(g),
                        None => return Err(D::Error::custom("run sequence exceeds level table")),
                    }
                }
            }
        }
        Ok(bv)
    }
}

#[cfg(test)]
mod tests {
    use crate::vector::{BitVector, SortOrder};

    #[test]
    fn test_round_trip_json() {
        let mut bv = BitVector::with_size(1 << 20);
        bv.set_ids(&[0, 17, 65_536, 1_000_000], SortOrder::Sorted)
            .unwrap();
        let json = serde_json::to_string(&bv).unwrap();
        let restored: BitVector = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.size(), bv.size());
        assert_eq!(restored.count(), bv.count());
        assert_eq!(restored, bv);
    }
}
