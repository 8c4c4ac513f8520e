//! Two-level block tree: the blocks manager.
//!
//! The top array holds sub-arrays of 256 block slots; a slot is `Empty`
//! (all zeros), `Full` (all ones), or a concrete bit/GAP block. Whole
//! sub-arrays collapse to `Empty`/`Full` the same way. All pointer access
//! from the other engine layers goes through this module.

#[cfg(not(test))]
use alloc::boxed::Box;
#[cfg(not(test))]
use alloc::vec::Vec;

use core::mem;

use crate::block::{self, new_full_block, new_zero_block, BitBlock, FULL_BLOCK};
use crate::gap::{GapBlock, GapLevels, DEFAULT_GAP_LEVELS};
use crate::{BITS_IN_BLOCK, BLOCKS_IN_SUB};

/// Representation chosen for blocks created on first write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AllocStrategy {
    /// New blocks start dense.
    #[default]
    Bit,
    /// New blocks start run-length encoded.
    Gap,
}

/// Optimization depth for a tree pass. Higher modes include the lower ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum OptMode {
    /// Walk only, collect statistics.
    None,
    /// Free blocks that turn out all-zero.
    FreeZero,
    /// Additionally collapse all-one blocks to the FULL sentinel.
    #[default]
    FreeZeroAndOne,
    /// Additionally re-encode dense blocks as GAP where that is shorter.
    Compress,
}

/// Statistics gathered by an optimization pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OptStat {
    /// Concrete dense blocks after the pass.
    pub bit_blocks: usize,
    /// Concrete GAP blocks after the pass.
    pub gap_blocks: usize,
    /// Blocks released to Empty or Full.
    pub blocks_freed: usize,
    /// Dense blocks re-encoded as GAP.
    pub gaps_reencoded: usize,
}

/// One block slot of the tree.
#[derive(Clone, Debug)]
pub enum BlockSlot {
    /// Logically all zeros; nothing allocated.
    Empty,
    /// Logically all ones; shared sentinel, nothing allocated.
    Full,
    /// Dense bitmap.
    Bit(Box<BitBlock>),
    /// Run-length encoded block.
    Gap(GapBlock),
}

static EMPTY_SLOT: BlockSlot = BlockSlot::Empty;
static FULL_SLOT: BlockSlot = BlockSlot::Full;

impl BlockSlot {
    /// Population count of the slot.
    pub fn count(&self) -> u32 {
        match self {
            BlockSlot::Empty => 0,
            BlockSlot::Full => BITS_IN_BLOCK as u32,
            BlockSlot::Bit(b) => block::count(b),
            BlockSlot::Gap(g) => g.count(),
        }
    }

    /// Bits set in `[l, r]` of the slot.
    pub fn count_range(&self, l: u32, r: u32) -> u32 {
        match self {
            BlockSlot::Empty => 0,
            BlockSlot::Full => r - l + 1,
            BlockSlot::Bit(b) => block::count_range(b, l, r),
            BlockSlot::Gap(g) => g.count_range(l, r),
        }
    }

    /// Test the in-block bit `n`.
    #[inline]
    pub fn test(&self, n: u32) -> bool {
        match self {
            BlockSlot::Empty => false,
            BlockSlot::Full => true,
            BlockSlot::Bit(b) => block::test_bit(b, n),
            BlockSlot::Gap(g) => g.test(n),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, BlockSlot::Empty)
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        matches!(self, BlockSlot::Full)
    }

    /// Dense word view, resolving the FULL sentinel to the shared all-ones
    /// block. `None` for Empty and GAP slots.
    #[inline]
    pub fn bit_words(&self) -> Option<&BitBlock> {
        match self {
            BlockSlot::Bit(b) => Some(b),
            BlockSlot::Full => Some(&FULL_BLOCK),
            _ => None,
        }
    }

    /// Least set bit in the slot.
    pub fn find_first(&self) -> Option<u32> {
        match self {
            BlockSlot::Empty => None,
            BlockSlot::Full => Some(0),
            BlockSlot::Bit(b) => block::find_first(b),
            BlockSlot::Gap(g) => g.find_first(),
        }
    }

    /// Greatest set bit in the slot.
    pub fn find_last(&self) -> Option<u32> {
        match self {
            BlockSlot::Empty => None,
            BlockSlot::Full => Some(BITS_IN_BLOCK as u32 - 1),
            BlockSlot::Bit(b) => block::find_last(b),
            BlockSlot::Gap(g) => g.find_last(),
        }
    }

    /// Least set bit at in-block position >= `n`.
    pub fn find_from(&self, n: u32) -> Option<u32> {
        match self {
            BlockSlot::Empty => None,
            BlockSlot::Full => Some(n),
            BlockSlot::Bit(b) => block::find_from(b, n),
            BlockSlot::Gap(g) => g.find_from(n),
        }
    }
}

/// One sub-array of 256 block slots.
#[derive(Clone, Debug)]
pub enum SubArray {
    /// All 256 blocks are zero.
    Empty,
    /// All 256 blocks are full.
    Full,
    /// Materialized slots.
    Live(Box<[BlockSlot; BLOCKS_IN_SUB]>),
}

impl SubArray {
    fn new_live(fill_full: bool) -> Box<[BlockSlot; BLOCKS_IN_SUB]> {
        Box::new(core::array::from_fn(|_| {
            if fill_full {
                BlockSlot::Full
            } else {
                BlockSlot::Empty
            }
        }))
    }

    /// Slot `j`, resolving collapsed sub-arrays to the shared sentinels.
    #[inline]
    pub fn slot(&self, j: usize) -> &BlockSlot {
        match self {
            SubArray::Empty => &EMPTY_SLOT,
            SubArray::Full => &FULL_SLOT,
            SubArray::Live(blocks) => &blocks[j],
        }
    }
}

/// Owner of the top array and every allocation decision below it.
#[derive(Clone, Debug)]
pub struct BlockStore {
    top: Vec<SubArray>,
    strategy: AllocStrategy,
    levels: GapLevels,
    temp: Option<Box<BitBlock>>,
}

impl Default for BlockStore {
    fn default() -> Self {
        Self::new(AllocStrategy::default(), DEFAULT_GAP_LEVELS)
    }
}

impl BlockStore {
    pub fn new(strategy: AllocStrategy, levels: GapLevels) -> Self {
        BlockStore {
            top: Vec::new(),
            strategy,
            levels,
            temp: None,
        }
    }

    /// Decode a block index into (top, sub) coordinates. Shift/mask only.
    #[inline]
    pub fn coords(nb: u64) -> (usize, usize) {
        ((nb >> 8) as usize, (nb & (BLOCKS_IN_SUB as u64 - 1)) as usize)
    }

    #[inline]
    pub fn strategy(&self) -> AllocStrategy {
        self.strategy
    }

    #[inline]
    pub fn gap_levels(&self) -> &GapLevels {
        &self.levels
    }

    pub fn set_gap_levels(&mut self, levels: GapLevels) {
        self.levels = levels;
        // re-class existing GAP blocks against the new table; blocks that no
        // longer fit any level become dense
        for sub in self.top.iter_mut() {
            let blocks = match sub {
                SubArray::Live(blocks) => blocks,
                _ => continue,
            };
            for slot in blocks.iter_mut() {
                let needs_convert = match slot {
                    BlockSlot::Gap(g) => {
                        if g.reclass(&levels) {
                            g.pack(&levels);
                            false
                        } else {
                            true
                        }
                    }
                    _ => false,
                };
                if needs_convert {
                    let old = mem::replace(slot, BlockSlot::Empty);
                    if let BlockSlot::Gap(g) = old {
                        let mut b = new_zero_block();
                        g.to_bit_block(&mut b);
                        *slot = BlockSlot::Bit(b);
                    }
                }
            }
        }
    }

    /// Number of sub-arrays currently reserved.
    #[inline]
    pub fn top_len(&self) -> usize {
        self.top.len()
    }

    /// Sub-array `i`; never allocates.
    #[inline]
    pub fn sub(&self, i: usize) -> &SubArray {
        static EMPTY_SUB: SubArray = SubArray::Empty;
        self.top.get(i).unwrap_or(&EMPTY_SUB)
    }

    /// Grow the top array to cover at least `subs` sub-arrays.
    pub fn reserve_top(&mut self, subs: usize) {
        if self.top.len() < subs {
            self.top.resize_with(subs, || SubArray::Empty);
        }
    }

    /// The tagged slot for block `nb`; never allocates.
    #[inline]
    pub fn slot(&self, nb: u64) -> &BlockSlot {
        let (i, j) = Self::coords(nb);
        self.sub(i).slot(j)
    }

    fn ensure_sub(&mut self, i: usize) -> &mut [BlockSlot; BLOCKS_IN_SUB] {
        self.reserve_top(i + 1);
        if !matches!(self.top[i], SubArray::Live(_)) {
            let fill_full = matches!(self.top[i], SubArray::Full);
            self.top[i] = SubArray::Live(SubArray::new_live(fill_full));
        }
        match &mut self.top[i] {
            SubArray::Live(blocks) => blocks,
            _ => unreachable!(),
        }
    }

    /// Mutable slot access; materializes the sub-array if needed.
    pub fn slot_mut(&mut self, nb: u64) -> &mut BlockSlot {
        let (i, j) = Self::coords(nb);
        &mut self.ensure_sub(i)[j]
    }

    /// Make the slot a concrete block per the allocation strategy so a
    /// write can land in it. `Empty` and `Full` expand; concrete blocks are
    /// returned as they are.
    pub fn ensure_writable(&mut self, nb: u64) -> &mut BlockSlot {
        let strategy = self.strategy;
        let levels = self.levels;
        let slot = self.slot_mut(nb);
        if slot.is_empty() {
            *slot = match strategy {
                AllocStrategy::Bit => BlockSlot::Bit(new_zero_block()),
                AllocStrategy::Gap => BlockSlot::Gap(GapBlock::zero(&levels)),
            };
        } else if slot.is_full() {
            *slot = match strategy {
                AllocStrategy::Bit => BlockSlot::Bit(new_full_block()),
                AllocStrategy::Gap => BlockSlot::Gap(GapBlock::one(&levels)),
            };
        }
        slot
    }

    /// Replace a GAP or FULL (or Empty) block with an equivalent dense
    /// block and return it; used by operations that are defined on or
    /// cheaper with dense blocks.
    pub fn deoptimize(&mut self, nb: u64) -> &mut BitBlock {
        let slot = self.slot_mut(nb);
        if !matches!(slot, BlockSlot::Bit(_)) {
            let old = mem::replace(slot, BlockSlot::Empty);
            let bit = match old {
                BlockSlot::Bit(b) => b,
                BlockSlot::Empty => new_zero_block(),
                BlockSlot::Full => new_full_block(),
                BlockSlot::Gap(g) => {
                    let mut b = new_zero_block();
                    g.to_bit_block(&mut b);
                    b
                }
            };
            *slot = BlockSlot::Bit(bit);
        }
        match self.slot_mut(nb) {
            BlockSlot::Bit(b) => b,
            _ => unreachable!(),
        }
    }

    /// Restore slot invariants after a GAP mutation: uniform blocks
    /// collapse, level overflow promotes, past the largest level the block
    /// converts to dense.
    pub fn normalize_gap(&mut self, nb: u64) {
        let levels = self.levels;
        let slot = self.slot_mut(nb);
        let action = match &mut *slot {
            BlockSlot::Gap(g) => {
                if g.is_all_zero() {
                    0
                } else if g.is_all_one() {
                    1
                } else if g.reclass(&levels) {
                    return;
                } else {
                    2
                }
            }
            _ => return,
        };
        match action {
            0 => *slot = BlockSlot::Empty,
            1 => *slot = BlockSlot::Full,
            _ => {
                let old = mem::replace(slot, BlockSlot::Empty);
                if let BlockSlot::Gap(g) = old {
                    let mut b = new_zero_block();
                    g.to_bit_block(&mut b);
                    *slot = BlockSlot::Bit(b);
                }
            }
        }
    }

    /// Collapse a dense block that an operation proved uniform; otherwise
    /// leave it in place.
    pub fn normalize_bit(&mut self, nb: u64) {
        let slot = self.slot_mut(nb);
        let action = match &*slot {
            BlockSlot::Bit(b) => {
                if block::is_all_zero(b) {
                    0
                } else if block::is_all_one(b) {
                    1
                } else {
                    return;
                }
            }
            _ => return,
        };
        *slot = if action == 0 {
            BlockSlot::Empty
        } else {
            BlockSlot::Full
        };
    }

    /// Set block `nb` to all-zero, releasing any allocation.
    pub fn set_zero(&mut self, nb: u64) {
        let (i, j) = Self::coords(nb);
        if matches!(self.sub(i), SubArray::Empty) {
            return;
        }
        self.ensure_sub(i)[j] = BlockSlot::Empty;
    }

    /// Set block `nb` to all-one.
    pub fn set_full(&mut self, nb: u64) {
        let (i, j) = Self::coords(nb);
        if matches!(self.sub(i), SubArray::Full) {
            return;
        }
        self.ensure_sub(i)[j] = BlockSlot::Full;
    }

    /// Zero every block in the inclusive block range, collapsing whole
    /// sub-arrays without materializing them.
    pub fn set_range_zero(&mut self, nb_from: u64, nb_to: u64) {
        self.set_range_uniform(nb_from, nb_to, false);
    }

    /// Fill every block in the inclusive block range.
    pub fn set_range_full(&mut self, nb_from: u64, nb_to: u64) {
        self.set_range_uniform(nb_from, nb_to, true);
    }

    fn set_range_uniform(&mut self, nb_from: u64, nb_to: u64, full: bool) {
        debug_assert!(nb_from <= nb_to);
        let mut nb = nb_from;
        while nb <= nb_to {
            let (i, j) = Self::coords(nb);
            let sub_last = ((i as u64) << 8) + BLOCKS_IN_SUB as u64 - 1;
            if j == 0 && sub_last <= nb_to {
                // whole sub-array covered
                if full {
                    self.reserve_top(i + 1);
                    self.top[i] = SubArray::Full;
                } else if i < self.top.len() {
                    self.top[i] = SubArray::Empty;
                }
                nb = sub_last + 1;
            } else {
                if full {
                    self.set_full(nb);
                } else {
                    self.set_zero(nb);
                }
                nb += 1;
            }
        }
    }

    /// Deep-copy `src` into slot `nb`; with `invert` the complement is
    /// produced without an intermediate materialization.
    pub fn assign_slot(&mut self, nb: u64, src: &BlockSlot, invert: bool) {
        let new = match (src, invert) {
            (BlockSlot::Empty, false) | (BlockSlot::Full, true) => BlockSlot::Empty,
            (BlockSlot::Empty, true) | (BlockSlot::Full, false) => BlockSlot::Full,
            (BlockSlot::Bit(b), inv) => {
                let mut copy = b.clone();
                if inv {
                    block::invert(&mut copy);
                }
                BlockSlot::Bit(copy)
            }
            (BlockSlot::Gap(g), inv) => {
                let mut copy = g.clone();
                if inv {
                    copy.invert();
                }
                BlockSlot::Gap(copy)
            }
        };
        if new.is_empty() {
            self.set_zero(nb);
        } else {
            *self.slot_mut(nb) = new;
        }
    }

    /// Take a block out of slot `nb`, leaving it Empty. Used by merge to
    /// steal blocks instead of copying them.
    pub fn take_slot(&mut self, nb: u64) -> BlockSlot {
        let (i, _) = Self::coords(nb);
        if matches!(self.sub(i), SubArray::Empty) {
            return BlockSlot::Empty;
        }
        mem::replace(self.slot_mut(nb), BlockSlot::Empty)
    }

    // -----------------------------------------------------------------------
    // temp block pool
    // -----------------------------------------------------------------------

    /// Borrow the per-vector scratch bit-block. Contents are undefined; the
    /// caller must fully overwrite it. Must be returned with [`Self::put_temp`]
    /// before the next borrow.
    pub fn take_temp(&mut self) -> Box<BitBlock> {
        self.temp.take().unwrap_or_else(new_zero_block)
    }

    /// Return the scratch block; exactly one is cached across calls.
    pub fn put_temp(&mut self, tb: Box<BitBlock>) {
        self.temp = Some(tb);
    }

    /// Release the cached scratch block.
    pub fn free_temp(&mut self) {
        self.temp = None;
    }

    // -----------------------------------------------------------------------
    // optimization pass
    // -----------------------------------------------------------------------

    /// Walk every concrete block; free all-zero blocks, collapse all-one
    /// blocks, optionally re-encode dense blocks as GAP. Collapses
    /// sub-arrays that become uniform.
    pub fn optimize(&mut self, mode: OptMode, stat: &mut OptStat) {
        let levels = self.levels;
        for sub in self.top.iter_mut() {
            let blocks = match sub {
                SubArray::Empty | SubArray::Full => continue,
                SubArray::Live(blocks) => blocks,
            };
            let mut all_empty = true;
            let mut all_full = true;
            for slot in blocks.iter_mut() {
                let cur = mem::replace(slot, BlockSlot::Empty);
                let new = Self::optimize_slot(cur, mode, &levels, stat);
                match &new {
                    BlockSlot::Empty => all_full = false,
                    BlockSlot::Full => all_empty = false,
                    _ => {
                        all_empty = false;
                        all_full = false;
                    }
                }
                *slot = new;
            }
            if all_empty {
                *sub = SubArray::Empty;
            } else if all_full {
                *sub = SubArray::Full;
            }
        }
        self.free_temp();
    }

    fn optimize_slot(
        slot: BlockSlot,
        mode: OptMode,
        levels: &GapLevels,
        stat: &mut OptStat,
    ) -> BlockSlot {
        match slot {
            BlockSlot::Empty => BlockSlot::Empty,
            BlockSlot::Full => BlockSlot::Full,
            BlockSlot::Bit(b) => {
                if mode >= OptMode::FreeZero && block::is_all_zero(&b) {
                    stat.blocks_freed += 1;
                    return BlockSlot::Empty;
                }
                if mode >= OptMode::FreeZeroAndOne && block::is_all_one(&b) {
                    stat.blocks_freed += 1;
                    return BlockSlot::Full;
                }
                if mode >= OptMode::Compress {
                    if let Some(g) = GapBlock::from_bit_block(&b, levels) {
                        stat.gaps_reencoded += 1;
                        stat.gap_blocks += 1;
                        return BlockSlot::Gap(g);
                    }
                }
                stat.bit_blocks += 1;
                BlockSlot::Bit(b)
            }
            BlockSlot::Gap(mut g) => {
                if mode >= OptMode::FreeZero && g.is_all_zero() {
                    stat.blocks_freed += 1;
                    return BlockSlot::Empty;
                }
                if mode >= OptMode::FreeZeroAndOne && g.is_all_one() {
                    stat.blocks_freed += 1;
                    return BlockSlot::Full;
                }
                if mode >= OptMode::Compress {
                    g.pack(levels);
                }
                stat.gap_blocks += 1;
                BlockSlot::Gap(g)
            }
        }
    }

    /// Complement every block in the reserved tree: Empty and Full swap at
    /// both levels, concrete blocks invert in place.
    pub fn invert_tree(&mut self) {
        for sub in self.top.iter_mut() {
            match sub {
                SubArray::Empty => *sub = SubArray::Full,
                SubArray::Full => *sub = SubArray::Empty,
                SubArray::Live(blocks) => {
                    for slot in blocks.iter_mut() {
                        let cur = mem::replace(slot, BlockSlot::Empty);
                        *slot = match cur {
                            BlockSlot::Empty => BlockSlot::Full,
                            BlockSlot::Full => BlockSlot::Empty,
                            BlockSlot::Bit(mut b) => {
                                block::invert(&mut b);
                                BlockSlot::Bit(b)
                            }
                            BlockSlot::Gap(mut g) => {
                                g.invert();
                                BlockSlot::Gap(g)
                            }
                        };
                    }
                }
            }
        }
    }

    /// Drop every block. With `free_mem` the top array itself is released.
    pub fn clear_all(&mut self, free_mem: bool) {
        if free_mem {
            self.top = Vec::new();
            self.temp = None;
        } else {
            for sub in self.top.iter_mut() {
                *sub = SubArray::Empty;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coords() {
        assert_eq!(BlockStore::coords(0), (0, 0));
        assert_eq!(BlockStore::coords(255), (0, 255));
        assert_eq!(BlockStore::coords(256), (1, 0));
        assert_eq!(BlockStore::coords(513), (2, 1));
    }

    #[test]
    fn test_slot_defaults_to_empty() {
        let store = BlockStore::default();
        assert!(store.slot(0).is_empty());
        assert!(store.slot(1_000_000).is_empty());
    }

    #[test]
    fn test_ensure_writable_strategies() {
        let mut store = BlockStore::new(AllocStrategy::Gap, DEFAULT_GAP_LEVELS);
        assert!(matches!(store.ensure_writable(3), BlockSlot::Gap(_)));

        let mut store = BlockStore::new(AllocStrategy::Bit, DEFAULT_GAP_LEVELS);
        assert!(matches!(store.ensure_writable(3), BlockSlot::Bit(_)));

        // Full expands to a writable all-ones representation
        store.set_full(7);
        let slot = store.ensure_writable(7);
        match slot {
            BlockSlot::Bit(b) => assert!(block::is_all_one(b)),
            _ => panic!("expected dense block"),
        }
    }

    #[test]
    fn test_full_sub_expansion() {
        let mut store = BlockStore::default();
        store.set_range_full(0, 255);
        assert!(matches!(store.sub(0), SubArray::Full));
        assert!(store.slot(17).is_full());

        // a single write inside a full sub-array materializes it
        store.set_zero(17);
        assert!(store.slot(17).is_empty());
        assert!(store.slot(16).is_full());
        assert!(store.slot(18).is_full());
    }

    #[test]
    fn test_set_range_uniform_collapses_subs() {
        let mut store = BlockStore::default();
        // blocks 100..=700 cover sub 0 partially, sub 1 fully, sub 2 partially
        store.set_range_full(100, 700);
        assert!(matches!(store.sub(1), SubArray::Full));
        assert!(store.slot(99).is_empty());
        assert!(store.slot(100).is_full());
        assert!(store.slot(700).is_full());
        assert!(store.slot(701).is_empty());

        store.set_range_zero(100, 700);
        assert!(store.slot(100).is_empty());
        assert!(store.slot(700).is_empty());
        assert!(matches!(store.sub(1), SubArray::Empty));
    }

    #[test]
    fn test_deoptimize() {
        let mut store = BlockStore::new(AllocStrategy::Gap, DEFAULT_GAP_LEVELS);
        match store.ensure_writable(0) {
            BlockSlot::Gap(g) => {
                g.set(42, true);
            }
            _ => panic!(),
        }
        let b = store.deoptimize(0);
        assert!(block::test_bit(b, 42));
        assert_eq!(block::count(b), 1);
        assert!(matches!(store.slot(0), BlockSlot::Bit(_)));
    }

    #[test]
    fn test_normalize_gap_collapses() {
        let mut store = BlockStore::new(AllocStrategy::Gap, DEFAULT_GAP_LEVELS);
        match store.ensure_writable(0) {
            BlockSlot::Gap(g) => {
                g.set(5, true);
                g.set(5, false);
            }
            _ => panic!(),
        }
        store.normalize_gap(0);
        assert!(store.slot(0).is_empty());
    }

    #[test]
    fn test_assign_slot_invert() {
        let mut store = BlockStore::default();
        let src = BlockSlot::Empty;
        store.assign_slot(0, &src, true);
        assert!(store.slot(0).is_full());

        let mut g = GapBlock::zero(&DEFAULT_GAP_LEVELS);
        g.set(9, true);
        let src = BlockSlot::Gap(g);
        store.assign_slot(1, &src, true);
        assert_eq!(store.slot(1).count(), 65535);
        assert!(!store.slot(1).test(9));
    }

    #[test]
    fn test_temp_pool_caches_one_block() {
        let mut store = BlockStore::default();
        let t = store.take_temp();
        store.put_temp(t);
        let t2 = store.take_temp();
        store.put_temp(t2);
        store.free_temp();
        let _ = store.take_temp();
    }

    #[test]
    fn test_optimize_collapses() {
        let mut store = BlockStore::default();
        // an explicitly zero dense block
        *store.slot_mut(0) = BlockSlot::Bit(new_zero_block());
        // an explicitly full dense block
        *store.slot_mut(1) = BlockSlot::Bit(new_full_block());
        // a sparse dense block worth re-encoding
        let mut b = new_zero_block();
        block::set_bit(&mut b, 8, true);
        *store.slot_mut(2) = BlockSlot::Bit(b);

        let mut stat = OptStat::default();
        store.optimize(OptMode::Compress, &mut stat);

        assert!(store.slot(0).is_empty());
        assert!(store.slot(1).is_full());
        assert!(matches!(store.slot(2), BlockSlot::Gap(_)));
        assert_eq!(stat.blocks_freed, 2);
        assert_eq!(stat.gaps_reencoded, 1);
    }

    #[test]
    fn test_optimize_collapses_uniform_sub() {
        let mut store = BlockStore::default();
        for nb in 0..256u64 {
            *store.slot_mut(nb) = BlockSlot::Bit(new_full_block());
        }
        let mut stat = OptStat::default();
        store.optimize(OptMode::FreeZeroAndOne, &mut stat);
        assert!(matches!(store.sub(0), SubArray::Full));
    }

    #[test]
    fn test_take_slot() {
        let mut store = BlockStore::default();
        store.set_full(4);
        let taken = store.take_slot(4);
        assert!(taken.is_full());
        assert!(store.slot(4).is_empty());
        assert!(store.take_slot(9999).is_empty());
    }
}
