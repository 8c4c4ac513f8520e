//! The bit-vector façade.
//!
//! `BitVector` owns a two-level block tree and dispatches every public
//! operation to the block-level kernels: single-bit and range updates, bulk
//! import, the full set algebra in two- and three-operand forms, shifts and
//! insert/erase with carry propagation across blocks, and the search and
//! counting surface (rank/select via [`RsIndex`]).

#[cfg(not(test))]
use alloc::boxed::Box;
#[cfg(not(test))]
use alloc::vec::Vec;

use core::cmp::Ordering;
use core::mem;

use crate::block::{self, new_zero_block, BitBlock, RankScan, FULL_BLOCK, ZERO_BLOCK};
use crate::error::Error;
use crate::gap::{self, GapBlock, GapLevels, DEFAULT_GAP_LEVELS, RUN_TERM};
use crate::iter::OnesIter;
use crate::rs_index::RsIndex;
use crate::store::{AllocStrategy, BlockSlot, BlockStore, OptMode, OptStat, SubArray};
use crate::{SetOp, BITS_IN_BLOCK, BLOCKS_IN_SUB, BLOCK_SHIFT, MAX_BITS};

/// Sort-order hint for bulk imports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// The id list is known to be ascending.
    Sorted,
    /// No ordering guarantee.
    #[default]
    Unknown,
}

/// Build-time knobs for a vector.
#[derive(Clone, Copy, Debug)]
pub struct VectorConfig {
    /// Logical size in bits.
    pub size: u64,
    /// Representation for blocks created on first write.
    pub strategy: AllocStrategy,
    /// GAP capacity level table.
    pub gap_levels: GapLevels,
}

impl Default for VectorConfig {
    fn default() -> Self {
        VectorConfig {
            size: 1 << 32,
            strategy: AllocStrategy::default(),
            gap_levels: DEFAULT_GAP_LEVELS,
        }
    }
}

/// Memory footprint report.
#[derive(Clone, Copy, Debug, Default)]
pub struct Stat {
    /// Concrete dense blocks.
    pub bit_blocks: usize,
    /// Concrete GAP blocks.
    pub gap_blocks: usize,
    /// Bytes held by blocks and the top array.
    pub memory_used: usize,
    /// Serialization estimate: memory_used plus a 10% margin with a floor.
    pub max_serialize_mem: usize,
    /// The GAP capacity table in use.
    pub gap_levels: GapLevels,
}

/// Floor for the serialization-estimate safety margin, in bytes.
const SERIALIZE_MARGIN_FLOOR: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotKind {
    Empty,
    Full,
    Bit,
    Gap,
}

#[inline]
fn kind(slot: &BlockSlot) -> SlotKind {
    match slot {
        BlockSlot::Empty => SlotKind::Empty,
        BlockSlot::Full => SlotKind::Full,
        BlockSlot::Bit(_) => SlotKind::Bit,
        BlockSlot::Gap(_) => SlotKind::Gap,
    }
}

#[inline]
fn split(pos: u64) -> (u64, u32) {
    (pos >> BLOCK_SHIFT, (pos & (BITS_IN_BLOCK as u64 - 1)) as u32)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Uniform {
    Zero,
    One,
    Mixed,
}

/// Compressed, dynamically-sized bit vector.
#[derive(Clone, Debug)]
pub struct BitVector {
    pub(crate) store: BlockStore,
    size: u64,
}

impl Default for BitVector {
    fn default() -> Self {
        Self::new()
    }
}

impl BitVector {
    /// Vector with the default configuration (2^32 addressable positions,
    /// dense allocation strategy).
    pub fn new() -> Self {
        Self::with_config(VectorConfig::default())
    }

    /// Vector with the given logical size.
    pub fn with_size(size: u64) -> Self {
        Self::with_config(VectorConfig {
            size,
            ..VectorConfig::default()
        })
    }

    /// Vector with explicit size, strategy and GAP level table.
    pub fn with_config(cfg: VectorConfig) -> Self {
        BitVector {
            store: BlockStore::new(cfg.strategy, cfg.gap_levels),
            size: cfg.size.min(MAX_BITS),
        }
    }

    /// Vector initialised from a list of set positions (any order).
    pub fn from_positions(ids: &[u64]) -> Result<Self, Error> {
        let mut bv = Self::new();
        bv.set_ids(ids, SortOrder::Unknown)?;
        Ok(bv)
    }

    /// Vector holding a copy of `src` restricted to `[from, to]`.
    pub fn copy_range_of(src: &BitVector, from: u64, to: u64) -> Result<Self, Error> {
        let mut bv = Self::with_config(VectorConfig {
            size: src.size,
            strategy: src.store.strategy(),
            gap_levels: *src.store.gap_levels(),
        });
        bv.copy_range(src, from, to)?;
        Ok(bv)
    }

    #[inline]
    pub(crate) fn store(&self) -> &BlockStore {
        &self.store
    }

    // -----------------------------------------------------------------------
    // size
    // -----------------------------------------------------------------------

    /// Logical size in bits.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Addressable bits covered by the reserved top array.
    #[inline]
    pub fn capacity(&self) -> u64 {
        (self.store.top_len() as u64) << (BLOCK_SHIFT + 8)
    }

    /// Change the logical size. Shrinking clears every position at or
    /// beyond the new size.
    pub fn resize(&mut self, new_size: u64) {
        let new_size = new_size.min(MAX_BITS);
        let shrink = new_size < self.size;
        self.size = new_size;
        if shrink {
            self.clamp_tail();
        }
    }

    fn check_pos(&self, pos: u64) -> Result<(), Error> {
        if pos >= self.size {
            Err(Error::PositionOutOfRange {
                pos,
                max: self.size,
            })
        } else {
            Ok(())
        }
    }

    #[inline]
    fn last_nb(&self) -> u64 {
        debug_assert!(self.size > 0);
        (self.size - 1) >> BLOCK_SHIFT
    }

    // -----------------------------------------------------------------------
    // bit access
    // -----------------------------------------------------------------------

    /// Test a position; positions at or beyond the size read as 0.
    #[inline]
    pub fn test(&self, pos: u64) -> bool {
        if pos >= self.size {
            return false;
        }
        let (nb, nbit) = split(pos);
        self.store.slot(nb).test(nbit)
    }

    /// Alias of [`Self::test`].
    #[inline]
    pub fn get(&self, pos: u64) -> bool {
        self.test(pos)
    }

    // raw read ignoring the logical size (still within the reserved tree)
    #[inline]
    fn test_raw(&self, pos: u64) -> bool {
        let (nb, nbit) = split(pos);
        self.store.slot(nb).test(nbit)
    }

    /// Set a position to `val`. Returns true iff the vector changed.
    pub fn set_value(&mut self, pos: u64, val: bool) -> Result<bool, Error> {
        self.check_pos(pos)?;
        let (nb, nbit) = split(pos);
        match self.store.slot(nb) {
            BlockSlot::Empty if !val => return Ok(false),
            BlockSlot::Full if val => return Ok(false),
            _ => {}
        }
        let mut was_gap = false;
        let changed = match self.store.ensure_writable(nb) {
            BlockSlot::Bit(b) => block::set_bit(b, nbit, val),
            BlockSlot::Gap(g) => {
                was_gap = true;
                g.set(nbit, val)
            }
            _ => unreachable!(),
        };
        if was_gap && changed {
            self.store.normalize_gap(nb);
        }
        Ok(changed)
    }

    /// Set a position.
    #[inline]
    pub fn set(&mut self, pos: u64) -> Result<bool, Error> {
        self.set_value(pos, true)
    }

    /// Clear a position.
    #[inline]
    pub fn clear_bit(&mut self, pos: u64) -> Result<bool, Error> {
        self.set_value(pos, false)
    }

    /// Flip a position, returning the prior value as the carry.
    pub fn flip(&mut self, pos: u64) -> Result<bool, Error> {
        self.check_pos(pos)?;
        let prior = self.test(pos);
        self.set_value(pos, !prior)?;
        Ok(prior)
    }

    /// Set `pos` to `val` only when its current value equals `condition`.
    /// Returns true iff the vector changed.
    pub fn set_conditional(&mut self, pos: u64, val: bool, condition: bool) -> Result<bool, Error> {
        self.check_pos(pos)?;
        if self.test(pos) != condition {
            return Ok(false);
        }
        self.set_value(pos, val)
    }

    /// Writable handle for one position; its writes map to
    /// [`Self::set_value`].
    pub fn at(&mut self, pos: u64) -> BitMut<'_> {
        BitMut { bv: self, pos }
    }

    // -----------------------------------------------------------------------
    // counting
    // -----------------------------------------------------------------------

    /// Total number of set positions.
    pub fn count(&self) -> u64 {
        let mut total = 0u64;
        for i in 0..self.store.top_len() {
            match self.store.sub(i) {
                SubArray::Empty => {}
                SubArray::Full => total += (BITS_IN_BLOCK * BLOCKS_IN_SUB) as u64,
                SubArray::Live(blocks) => {
                    for slot in blocks.iter() {
                        total += slot.count() as u64;
                    }
                }
            }
        }
        total
    }

    /// True iff any position is set.
    pub fn any(&self) -> bool {
        self.find().is_some()
    }

    /// True iff no position is set.
    #[inline]
    pub fn none(&self) -> bool {
        !self.any()
    }

    /// Bits set in `[from, to]`, scanning block counts.
    pub fn count_range(&self, from: u64, to: u64) -> Result<u64, Error> {
        if from > to {
            return Err(Error::RangeOutOfOrder { from, to });
        }
        if self.size == 0 || from >= self.size {
            return Ok(0);
        }
        let to = to.min(self.size - 1);
        let (nb_l, bit_l) = split(from);
        let (nb_r, bit_r) = split(to);
        if nb_l == nb_r {
            return Ok(self.store.slot(nb_l).count_range(bit_l, bit_r) as u64);
        }
        let mut total = self
            .store
            .slot(nb_l)
            .count_range(bit_l, BITS_IN_BLOCK as u32 - 1) as u64;
        let mut nb = nb_l + 1;
        while nb < nb_r {
            let (i, j) = BlockStore::coords(nb);
            if j == 0 && nb + BLOCKS_IN_SUB as u64 <= nb_r {
                match self.store.sub(i) {
                    SubArray::Empty => {
                        nb += BLOCKS_IN_SUB as u64;
                        continue;
                    }
                    SubArray::Full => {
                        total += (BITS_IN_BLOCK * BLOCKS_IN_SUB) as u64;
                        nb += BLOCKS_IN_SUB as u64;
                        continue;
                    }
                    SubArray::Live(_) => {}
                }
            }
            total += self.store.slot(nb).count() as u64;
            nb += 1;
        }
        total += self.store.slot(nb_r).count_range(0, bit_r) as u64;
        Ok(total)
    }

    /// Bits set in `[0, pos]` using a prebuilt rank/select index.
    pub fn count_to(&self, pos: u64, rs: &RsIndex) -> u64 {
        if self.size == 0 {
            return 0;
        }
        let pos = pos.min(self.size - 1);
        let (nb, nbit) = split(pos);
        rs.prefix_before(nb) + rs.block_count_to(self.store.slot(nb), nb, nbit) as u64
    }

    /// Rank: number of set positions in `[0, pos]`.
    #[inline]
    pub fn rank(&self, pos: u64, rs: &RsIndex) -> u64 {
        self.count_to(pos, rs)
    }

    /// `count_to(pos)` when the bit at `pos` is set, 0 otherwise.
    pub fn count_to_test(&self, pos: u64, rs: &RsIndex) -> u64 {
        if !self.test(pos) {
            0
        } else {
            self.count_to(pos, rs)
        }
    }

    /// Bits set in `[from, to]` using a prebuilt rank/select index.
    pub fn count_range_rs(&self, from: u64, to: u64, rs: &RsIndex) -> Result<u64, Error> {
        if from > to {
            return Err(Error::RangeOutOfOrder { from, to });
        }
        if self.size == 0 || from >= self.size {
            return Ok(0);
        }
        let high = self.count_to(to, rs);
        let low = if from == 0 {
            0
        } else {
            self.count_to(from - 1, rs)
        };
        Ok(high - low)
    }

    /// Position of the `rank`-th set bit (1-based).
    pub fn select(&self, rank: u64, rs: &RsIndex) -> Option<u64> {
        let (nb, sub_from, residual) = rs.find(rank)?;
        let pos = match self.store.slot(nb) {
            BlockSlot::Empty => return None,
            BlockSlot::Full => sub_from + residual - 1,
            BlockSlot::Bit(b) => match block::rank_find(b, sub_from, residual) {
                RankScan::Found(p) => p,
                RankScan::Remaining(_) => return None,
            },
            BlockSlot::Gap(g) => match g.rank_find(sub_from, residual) {
                RankScan::Found(p) => p,
                RankScan::Remaining(_) => return None,
            },
        };
        Some((nb << BLOCK_SHIFT) | pos as u64)
    }

    /// Build a fresh rank/select index over the current contents.
    pub fn build_rs_index(&self) -> RsIndex {
        RsIndex::build(self)
    }

    // -----------------------------------------------------------------------
    // search
    // -----------------------------------------------------------------------

    /// First set position >= `pos`, if any.
    pub(crate) fn check_or_next(&self, pos: u64) -> Option<u64> {
        if pos >= self.size {
            return None;
        }
        let last_nb = self.last_nb();
        let (first_nb, nbit) = split(pos);
        if let Some(p) = self.store.slot(first_nb).find_from(nbit) {
            let abs = (first_nb << BLOCK_SHIFT) | p as u64;
            return if abs < self.size { Some(abs) } else { None };
        }
        let mut nb = first_nb + 1;
        while nb <= last_nb {
            let (i, j) = BlockStore::coords(nb);
            if j == 0 && matches!(self.store.sub(i), SubArray::Empty) {
                nb += BLOCKS_IN_SUB as u64;
                continue;
            }
            if let Some(p) = self.store.slot(nb).find_first() {
                let abs = (nb << BLOCK_SHIFT) | p as u64;
                return if abs < self.size { Some(abs) } else { None };
            }
            nb += 1;
        }
        None
    }

    /// Least set position.
    #[inline]
    pub fn find(&self) -> Option<u64> {
        self.check_or_next(0)
    }

    /// Least set position >= `from`.
    #[inline]
    pub fn find_from(&self, from: u64) -> Option<u64> {
        self.check_or_next(from)
    }

    /// Greatest set position.
    pub fn find_reverse(&self) -> Option<u64> {
        if self.size == 0 {
            return None;
        }
        let mut nb = self.last_nb();
        loop {
            let (i, _) = BlockStore::coords(nb);
            if matches!(self.store.sub(i), SubArray::Empty) {
                if i == 0 {
                    return None;
                }
                nb = ((i as u64) << 8) - 1;
                continue;
            }
            if let Some(p) = self.store.slot(nb).find_last() {
                let abs = (nb << BLOCK_SHIFT) | p as u64;
                if abs < self.size {
                    return Some(abs);
                }
            }
            if nb == 0 {
                return None;
            }
            nb -= 1;
        }
    }

    /// Least and greatest set positions.
    pub fn find_range(&self) -> Option<(u64, u64)> {
        let first = self.find()?;
        let last = self.find_reverse()?;
        Some((first, last))
    }

    /// The `rank`-th set position (1-based) at or after `from`, by scan.
    pub fn find_rank(&self, rank: u64, from: u64) -> Option<u64> {
        if rank == 0 || self.size == 0 || from >= self.size {
            return None;
        }
        let last_nb = self.last_nb();
        let (mut nb, mut bit) = split(from);
        let mut remaining = rank;
        while nb <= last_nb {
            if bit == 0 {
                let (i, j) = BlockStore::coords(nb);
                if j == 0 && matches!(self.store.sub(i), SubArray::Empty) {
                    nb += BLOCKS_IN_SUB as u64;
                    continue;
                }
            }
            let slot = self.store.slot(nb);
            let avail = slot.count_range(bit, BITS_IN_BLOCK as u32 - 1) as u64;
            if avail < remaining {
                remaining -= avail;
            } else {
                let hit = match slot {
                    BlockSlot::Empty => RankScan::Remaining(remaining as u32),
                    BlockSlot::Full => RankScan::Found(bit + remaining as u32 - 1),
                    BlockSlot::Bit(b) => block::rank_find(b, bit, remaining as u32),
                    BlockSlot::Gap(g) => g.rank_find(bit, remaining as u32),
                };
                if let RankScan::Found(p) = hit {
                    let abs = (nb << BLOCK_SHIFT) | p as u64;
                    return if abs < self.size { Some(abs) } else { None };
                }
                return None;
            }
            bit = 0;
            nb += 1;
        }
        None
    }

    /// Find-and-clear of the next set bit at or after `from`.
    pub fn extract_next(&mut self, from: u64) -> Option<u64> {
        let pos = self.check_or_next(from)?;
        self.set_value(pos, false).ok()?;
        Some(pos)
    }

    // -----------------------------------------------------------------------
    // iteration
    // -----------------------------------------------------------------------

    /// Iterator over set positions in increasing order.
    pub fn ones(&self) -> OnesIter<'_> {
        OnesIter::new(self, 0)
    }

    /// Iterator over set positions starting at the first set bit >= `pos`.
    pub fn ones_from(&self, pos: u64) -> OnesIter<'_> {
        OnesIter::new(self, pos)
    }

    // -----------------------------------------------------------------------
    // ranges
    // -----------------------------------------------------------------------

    /// Set `[from, to]` to `val`.
    pub fn set_range(&mut self, from: u64, to: u64, val: bool) -> Result<(), Error> {
        if from > to {
            return Err(Error::RangeOutOfOrder { from, to });
        }
        self.check_pos(to)?;
        let (nb_l, bit_l) = split(from);
        let (nb_r, bit_r) = split(to);
        if nb_l == nb_r {
            self.combine_range_block(nb_l, bit_l, bit_r, val);
            return Ok(());
        }
        self.combine_range_block(nb_l, bit_l, BITS_IN_BLOCK as u32 - 1, val);
        if nb_r > nb_l + 1 {
            if val {
                self.store.set_range_full(nb_l + 1, nb_r - 1);
            } else {
                self.store.set_range_zero(nb_l + 1, nb_r - 1);
            }
        }
        self.combine_range_block(nb_r, 0, bit_r, val);
        Ok(())
    }

    /// Replace this vector with a copy of `src` restricted to `[from, to]`.
    pub fn copy_range(&mut self, src: &BitVector, from: u64, to: u64) -> Result<(), Error> {
        if from > to {
            return Err(Error::RangeOutOfOrder { from, to });
        }
        self.store.clear_all(false);
        self.size = src.size;
        if src.size == 0 || from >= src.size {
            return Ok(());
        }
        let to = to.min(src.size - 1);
        let (nb_l, bit_l) = split(from);
        let (nb_r, bit_r) = split(to);
        let mut nb = nb_l;
        while nb <= nb_r {
            let (i, j) = BlockStore::coords(nb);
            if j == 0 && matches!(src.store.sub(i), SubArray::Empty) {
                nb += BLOCKS_IN_SUB as u64;
                continue;
            }
            self.store.assign_slot(nb, src.store.slot(nb), false);
            nb += 1;
        }
        if bit_l > 0 {
            self.combine_range_block(nb_l, 0, bit_l - 1, false);
        }
        if bit_r < BITS_IN_BLOCK as u32 - 1 {
            self.combine_range_block(nb_r, bit_r + 1, BITS_IN_BLOCK as u32 - 1, false);
        }
        Ok(())
    }

    /// Combine a partial-block range update via a scratch run-length mask:
    /// OR for set, AND for clear.
    fn combine_range_block(&mut self, nb: u64, l: u32, r: u32, val: bool) {
        if l == 0 && r == BITS_IN_BLOCK as u32 - 1 {
            if val {
                self.store.set_full(nb);
            } else {
                self.store.set_zero(nb);
            }
            return;
        }
        let levels = *self.store.gap_levels();
        let mask = range_mask_gap(l, r, val, &levels);
        match kind(self.store.slot(nb)) {
            SlotKind::Empty => {
                if val {
                    *self.store.slot_mut(nb) = BlockSlot::Gap(mask);
                }
            }
            SlotKind::Full => {
                if !val {
                    *self.store.slot_mut(nb) = BlockSlot::Gap(mask);
                }
            }
            SlotKind::Gap => {
                let op = if val { SetOp::Or } else { SetOp::And };
                self.gap_op_block(nb, &mask, op);
            }
            SlotKind::Bit => {
                let b = self.bit_mut(nb);
                if val {
                    gap::add_to_bitset(b, &mask);
                } else {
                    gap::and_to_bitset(b, &mask);
                }
                self.store.normalize_bit(nb);
            }
        }
    }

    // -----------------------------------------------------------------------
    // bulk import
    // -----------------------------------------------------------------------

    /// Set every position in `ids`. Runs of ids that share a block are
    /// scattered into a dense block in one pass; correct for unsorted
    /// input, fastest when the hint says sorted.
    pub fn set_ids(&mut self, ids: &[u64], order: SortOrder) -> Result<(), Error> {
        self.check_ids(ids, order)?;
        let mut i = 0;
        while i < ids.len() {
            let nb = ids[i] >> BLOCK_SHIFT;
            let mut j = i + 1;
            while j < ids.len() && ids[j] >> BLOCK_SHIFT == nb {
                j += 1;
            }
            let b = self.store.deoptimize(nb);
            block::scatter_set(b, &ids[i..j]);
            self.store.normalize_bit(nb);
            i = j;
        }
        Ok(())
    }

    /// Keep only the positions in `ids` (intersection).
    pub fn keep_ids(&mut self, ids: &[u64], order: SortOrder) -> Result<(), Error> {
        let mut mask = BitVector::with_config(VectorConfig {
            size: self.size,
            strategy: self.store.strategy(),
            gap_levels: *self.store.gap_levels(),
        });
        mask.set_ids(ids, order)?;
        self.and_with(&mask);
        Ok(())
    }

    /// Clear every position in `ids`.
    pub fn clear_ids(&mut self, ids: &[u64], order: SortOrder) -> Result<(), Error> {
        let mut mask = BitVector::with_config(VectorConfig {
            size: self.size,
            strategy: self.store.strategy(),
            gap_levels: *self.store.gap_levels(),
        });
        mask.set_ids(ids, order)?;
        self.sub_with(&mask);
        Ok(())
    }

    fn check_ids(&self, ids: &[u64], order: SortOrder) -> Result<(), Error> {
        match order {
            SortOrder::Sorted => {
                if let Some(&last) = ids.last() {
                    self.check_pos(last)?;
                }
            }
            SortOrder::Unknown => {
                for &id in ids {
                    self.check_pos(id)?;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // set algebra, two-operand
    // -----------------------------------------------------------------------

    /// `self |= rhs`.
    pub fn or_with(&mut self, rhs: &BitVector) {
        if rhs.size > self.size {
            self.size = rhs.size;
        }
        for i in 0..rhs.store.top_len() {
            match rhs.store.sub(i) {
                SubArray::Empty => {}
                SubArray::Full => {
                    let first = (i as u64) << 8;
                    self.store.set_range_full(first, first | 255);
                }
                SubArray::Live(rblocks) => {
                    for (j, rslot) in rblocks.iter().enumerate() {
                        let nb = ((i as u64) << 8) | j as u64;
                        self.or_block(nb, rslot);
                    }
                }
            }
        }
    }

    /// `self &= rhs`.
    pub fn and_with(&mut self, rhs: &BitVector) {
        for i in 0..self.store.top_len() {
            if matches!(self.store.sub(i), SubArray::Empty) {
                continue;
            }
            match rhs.store.sub(i) {
                SubArray::Full => {}
                SubArray::Empty => {
                    let first = (i as u64) << 8;
                    self.store.set_range_zero(first, first | 255);
                }
                SubArray::Live(rblocks) => {
                    for (j, rslot) in rblocks.iter().enumerate() {
                        let nb = ((i as u64) << 8) | j as u64;
                        self.and_block(nb, rslot);
                    }
                }
            }
        }
    }

    /// `self ^= rhs`.
    pub fn xor_with(&mut self, rhs: &BitVector) {
        if rhs.size > self.size {
            self.size = rhs.size;
        }
        for i in 0..rhs.store.top_len() {
            match rhs.store.sub(i) {
                SubArray::Empty => {}
                SubArray::Full => {
                    for j in 0..BLOCKS_IN_SUB {
                        let nb = ((i as u64) << 8) | j as u64;
                        self.invert_slot(nb);
                    }
                }
                SubArray::Live(rblocks) => {
                    for (j, rslot) in rblocks.iter().enumerate() {
                        let nb = ((i as u64) << 8) | j as u64;
                        self.xor_block(nb, rslot);
                    }
                }
            }
        }
    }

    /// `self &= !rhs`.
    pub fn sub_with(&mut self, rhs: &BitVector) {
        for i in 0..self.store.top_len() {
            if matches!(self.store.sub(i), SubArray::Empty) {
                continue;
            }
            match rhs.store.sub(i) {
                SubArray::Empty => {}
                SubArray::Full => {
                    let first = (i as u64) << 8;
                    self.store.set_range_zero(first, first | 255);
                }
                SubArray::Live(rblocks) => {
                    for (j, rslot) in rblocks.iter().enumerate() {
                        let nb = ((i as u64) << 8) | j as u64;
                        self.sub_block(nb, rslot);
                    }
                }
            }
        }
    }

    /// Destructive OR: steals rhs's blocks where this vector has none.
    pub fn merge(&mut self, rhs: &mut BitVector) {
        if rhs.size > self.size {
            self.size = rhs.size;
        }
        for i in 0..rhs.store.top_len() {
            match rhs.store.sub(i) {
                SubArray::Empty => continue,
                SubArray::Full => {
                    let first = (i as u64) << 8;
                    self.store.set_range_full(first, first | 255);
                    continue;
                }
                SubArray::Live(_) => {}
            }
            for j in 0..BLOCKS_IN_SUB {
                let nb = ((i as u64) << 8) | j as u64;
                if rhs.store.slot(nb).is_empty() {
                    continue;
                }
                if self.store.slot(nb).is_empty() {
                    let taken = rhs.store.take_slot(nb);
                    *self.store.slot_mut(nb) = taken;
                } else {
                    self.or_block(nb, rhs.store.slot(nb));
                }
            }
        }
    }

    fn or_block(&mut self, nb: u64, rslot: &BlockSlot) {
        if rslot.is_empty() {
            return;
        }
        if rslot.is_full() {
            self.store.set_full(nb);
            return;
        }
        match kind(self.store.slot(nb)) {
            SlotKind::Full => {}
            SlotKind::Empty => self.store.assign_slot(nb, rslot, false),
            SlotKind::Bit => match rslot {
                BlockSlot::Bit(rb) => {
                    let b = self.bit_mut(nb);
                    if block::or_assign(b, rb) {
                        self.store.set_full(nb);
                    }
                }
                BlockSlot::Gap(rg) => {
                    let b = self.bit_mut(nb);
                    gap::add_to_bitset(b, rg);
                    self.store.normalize_bit(nb);
                }
                _ => unreachable!(),
            },
            SlotKind::Gap => match rslot {
                BlockSlot::Gap(rg) => self.gap_op_block(nb, rg, SetOp::Or),
                BlockSlot::Bit(rb) => {
                    let b = self.store.deoptimize(nb);
                    if block::or_assign(b, rb) {
                        self.store.set_full(nb);
                    }
                }
                _ => unreachable!(),
            },
        }
    }

    fn and_block(&mut self, nb: u64, rslot: &BlockSlot) {
        if rslot.is_full() {
            return;
        }
        if rslot.is_empty() {
            self.store.set_zero(nb);
            return;
        }
        match kind(self.store.slot(nb)) {
            SlotKind::Empty => {}
            SlotKind::Full => self.store.assign_slot(nb, rslot, false),
            SlotKind::Bit => match rslot {
                BlockSlot::Bit(rb) => {
                    let b = self.bit_mut(nb);
                    if block::and_assign(b, rb) == 0 {
                        self.store.set_zero(nb);
                    }
                }
                BlockSlot::Gap(rg) => {
                    let b = self.bit_mut(nb);
                    gap::and_to_bitset(b, rg);
                    self.store.normalize_bit(nb);
                }
                _ => unreachable!(),
            },
            SlotKind::Gap => match rslot {
                BlockSlot::Gap(rg) => self.gap_op_block(nb, rg, SetOp::And),
                BlockSlot::Bit(rb) => {
                    let b = self.store.deoptimize(nb);
                    if block::and_assign(b, rb) == 0 {
                        self.store.set_zero(nb);
                    }
                }
                _ => unreachable!(),
            },
        }
    }

    fn xor_block(&mut self, nb: u64, rslot: &BlockSlot) {
        if rslot.is_empty() {
            return;
        }
        if rslot.is_full() {
            self.invert_slot(nb);
            return;
        }
        match kind(self.store.slot(nb)) {
            SlotKind::Empty => self.store.assign_slot(nb, rslot, false),
            SlotKind::Full => self.store.assign_slot(nb, rslot, true),
            SlotKind::Bit => match rslot {
                BlockSlot::Bit(rb) => {
                    let b = self.bit_mut(nb);
                    if !block::xor_assign(b, rb) {
                        self.store.set_zero(nb);
                    } else {
                        self.store.normalize_bit(nb);
                    }
                }
                BlockSlot::Gap(rg) => {
                    let b = self.bit_mut(nb);
                    gap::xor_to_bitset(b, rg);
                    self.store.normalize_bit(nb);
                }
                _ => unreachable!(),
            },
            SlotKind::Gap => match rslot {
                BlockSlot::Gap(rg) => self.gap_op_block(nb, rg, SetOp::Xor),
                BlockSlot::Bit(rb) => {
                    let b = self.store.deoptimize(nb);
                    if !block::xor_assign(b, rb) {
                        self.store.set_zero(nb);
                    }
                }
                _ => unreachable!(),
            },
        }
    }

    fn sub_block(&mut self, nb: u64, rslot: &BlockSlot) {
        if rslot.is_empty() {
            return;
        }
        if rslot.is_full() {
            self.store.set_zero(nb);
            return;
        }
        match kind(self.store.slot(nb)) {
            SlotKind::Empty => {}
            SlotKind::Full => self.store.assign_slot(nb, rslot, true),
            SlotKind::Bit => match rslot {
                BlockSlot::Bit(rb) => {
                    let b = self.bit_mut(nb);
                    if block::sub_assign(b, rb) == 0 {
                        self.store.set_zero(nb);
                    }
                }
                BlockSlot::Gap(rg) => {
                    let b = self.bit_mut(nb);
                    gap::sub_to_bitset(b, rg);
                    self.store.normalize_bit(nb);
                }
                _ => unreachable!(),
            },
            SlotKind::Gap => match rslot {
                BlockSlot::Gap(rg) => self.gap_op_block(nb, rg, SetOp::Sub),
                BlockSlot::Bit(rb) => {
                    let b = self.store.deoptimize(nb);
                    if block::sub_assign(b, rb) == 0 {
                        self.store.set_zero(nb);
                    }
                }
                _ => unreachable!(),
            },
        }
    }

    /// Complement one block slot in place.
    fn invert_slot(&mut self, nb: u64) {
        match kind(self.store.slot(nb)) {
            SlotKind::Empty => self.store.set_full(nb),
            SlotKind::Full => self.store.set_zero(nb),
            SlotKind::Bit => {
                let b = self.bit_mut(nb);
                block::invert(b);
                self.store.normalize_bit(nb);
            }
            SlotKind::Gap => {
                match self.store.slot_mut(nb) {
                    BlockSlot::Gap(g) => g.invert(),
                    _ => unreachable!(),
                }
                self.store.normalize_gap(nb);
            }
        }
    }

    fn bit_mut(&mut self, nb: u64) -> &mut BitBlock {
        match self.store.slot_mut(nb) {
            BlockSlot::Bit(b) => b,
            _ => unreachable!(),
        }
    }

    fn gap_op_block(&mut self, nb: u64, rg: &GapBlock, op: SetOp) {
        let levels = *self.store.gap_levels();
        let (sv, out) = {
            let g = match self.store.slot(nb) {
                BlockSlot::Gap(g) => g,
                _ => unreachable!(),
            };
            let mut out = Vec::with_capacity(g.len() + rg.len());
            let sv = gap::gap_op_into(g, rg, op, &mut out);
            (sv, out)
        };
        match GapBlock::from_runs(sv, out, &levels) {
            Some(res) => {
                if res.is_all_zero() {
                    self.store.set_zero(nb);
                } else if res.is_all_one() {
                    self.store.set_full(nb);
                } else {
                    *self.store.slot_mut(nb) = BlockSlot::Gap(res);
                }
            }
            None => {
                // result too long for any level: materialize and redo densely
                let b = self.store.deoptimize(nb);
                match op {
                    SetOp::Or => gap::add_to_bitset(b, rg),
                    SetOp::And => gap::and_to_bitset(b, rg),
                    SetOp::Sub => gap::sub_to_bitset(b, rg),
                    SetOp::Xor => gap::xor_to_bitset(b, rg),
                }
                self.store.normalize_bit(nb);
            }
        }
    }

    // -----------------------------------------------------------------------
    // set algebra, three-operand
    // -----------------------------------------------------------------------

    /// `self := a | b`, re-initialising this vector.
    pub fn assign_or(&mut self, a: &BitVector, b: &BitVector, opt: OptMode) {
        self.assign_op(a, b, SetOp::Or, opt);
    }

    /// `self := a & b`.
    pub fn assign_and(&mut self, a: &BitVector, b: &BitVector, opt: OptMode) {
        self.assign_op(a, b, SetOp::And, opt);
    }

    /// `self := a ^ b`.
    pub fn assign_xor(&mut self, a: &BitVector, b: &BitVector, opt: OptMode) {
        self.assign_op(a, b, SetOp::Xor, opt);
    }

    /// `self := a & !b`.
    pub fn assign_sub(&mut self, a: &BitVector, b: &BitVector, opt: OptMode) {
        self.assign_op(a, b, SetOp::Sub, opt);
    }

    fn assign_op(&mut self, a: &BitVector, b: &BitVector, op: SetOp, opt: OptMode) {
        self.store.clear_all(false);
        self.size = a.size.max(b.size);
        let top = a.store.top_len().max(b.store.top_len());
        for i in 0..top {
            let sub_a = a.store.sub(i);
            let sub_b = b.store.sub(i);
            if matches!(sub_a, SubArray::Empty) && matches!(sub_b, SubArray::Empty) {
                continue;
            }
            for j in 0..BLOCKS_IN_SUB {
                let nb = ((i as u64) << 8) | j as u64;
                self.assign_combine(nb, sub_a.slot(j), sub_b.slot(j), op, opt);
            }
        }
    }

    fn assign_combine(
        &mut self,
        nb: u64,
        ra: &BlockSlot,
        rb: &BlockSlot,
        op: SetOp,
        opt: OptMode,
    ) {
        use SlotKind::{Empty, Full};
        let ka = kind(ra);
        let kb = kind(rb);
        match op {
            SetOp::Or => match (ka, kb) {
                (Empty, Empty) => return,
                (Full, _) | (_, Full) => {
                    self.store.set_full(nb);
                    return;
                }
                (Empty, _) => {
                    self.store.assign_slot(nb, rb, false);
                    return;
                }
                (_, Empty) => {
                    self.store.assign_slot(nb, ra, false);
                    return;
                }
                _ => {}
            },
            SetOp::And => match (ka, kb) {
                (Empty, _) | (_, Empty) => return,
                (Full, Full) => {
                    self.store.set_full(nb);
                    return;
                }
                (Full, _) => {
                    self.store.assign_slot(nb, rb, false);
                    return;
                }
                (_, Full) => {
                    self.store.assign_slot(nb, ra, false);
                    return;
                }
                _ => {}
            },
            SetOp::Sub => match (ka, kb) {
                (Empty, _) | (_, Full) => return,
                (_, Empty) => {
                    self.store.assign_slot(nb, ra, false);
                    return;
                }
                (Full, _) => {
                    self.store.assign_slot(nb, rb, true);
                    return;
                }
                _ => {}
            },
            SetOp::Xor => match (ka, kb) {
                (Empty, Empty) | (Full, Full) => return,
                (Empty, _) => {
                    self.store.assign_slot(nb, rb, false);
                    return;
                }
                (_, Empty) => {
                    self.store.assign_slot(nb, ra, false);
                    return;
                }
                (Full, _) => {
                    self.store.assign_slot(nb, rb, true);
                    return;
                }
                (_, Full) => {
                    self.store.assign_slot(nb, ra, true);
                    return;
                }
                _ => {}
            },
        }

        // both operands concrete from here on
        let levels = *self.store.gap_levels();
        if let (BlockSlot::Gap(ga), BlockSlot::Gap(gb)) = (ra, rb) {
            let mut out = Vec::with_capacity(ga.len() + gb.len());
            let sv = gap::gap_op_into(ga, gb, op, &mut out);
            if let Some(res) = GapBlock::from_runs(sv, out, &levels) {
                if res.is_all_zero() {
                    return;
                }
                if res.is_all_one() {
                    self.store.set_full(nb);
                } else {
                    *self.store.slot_mut(nb) = BlockSlot::Gap(res);
                }
                return;
            }
            // overflow falls through to the dense path
        }

        let mut tb = self.store.take_temp();
        dense_combine(&mut tb, ra, rb, op);
        match classify(&tb) {
            Uniform::Zero => self.store.put_temp(tb),
            Uniform::One => {
                self.store.put_temp(tb);
                self.store.set_full(nb);
            }
            Uniform::Mixed => {
                if opt >= OptMode::Compress {
                    if let Some(g) = GapBlock::from_bit_block(&tb, &levels) {
                        *self.store.slot_mut(nb) = BlockSlot::Gap(g);
                        self.store.put_temp(tb);
                        return;
                    }
                }
                *self.store.slot_mut(nb) = BlockSlot::Bit(tb);
            }
        }
    }

    // -----------------------------------------------------------------------
    // inversion
    // -----------------------------------------------------------------------

    /// Flip every position below the logical size.
    pub fn invert(&mut self) {
        if self.size == 0 {
            return;
        }
        let subs = ((self.last_nb() >> 8) + 1) as usize;
        self.store.reserve_top(subs);
        self.store.invert_tree();
        self.clamp_tail();
    }

    /// Clear every position at or beyond the logical size within the
    /// reserved tree.
    fn clamp_tail(&mut self) {
        let cap_blocks = (self.store.top_len() as u64) << 8;
        if cap_blocks == 0 {
            return;
        }
        if self.size >= cap_blocks << BLOCK_SHIFT {
            return;
        }
        if self.size == 0 {
            self.store.set_range_zero(0, cap_blocks - 1);
            return;
        }
        let (nb_s, bit_s) = split(self.size);
        if bit_s > 0 {
            self.combine_range_block(nb_s, bit_s, BITS_IN_BLOCK as u32 - 1, false);
            if nb_s + 1 < cap_blocks {
                self.store.set_range_zero(nb_s + 1, cap_blocks - 1);
            }
        } else {
            self.store.set_range_zero(nb_s, cap_blocks - 1);
        }
    }

    // -----------------------------------------------------------------------
    // shift / insert / erase
    // -----------------------------------------------------------------------

    /// Shift every position one step up (towards higher ids); position 0
    /// becomes 0. Returns the bit shifted out past `size - 1`. Size is
    /// unchanged.
    pub fn shift_right(&mut self) -> bool {
        if self.size == 0 {
            return false;
        }
        let last_nb = self.last_nb();
        let mut carry = false;
        let mut nb = 0u64;
        while nb <= last_nb {
            if !carry {
                let (i, j) = BlockStore::coords(nb);
                if j == 0 && matches!(self.store.sub(i), SubArray::Empty) {
                    nb += BLOCKS_IN_SUB as u64;
                    continue;
                }
                if self.store.slot(nb).is_empty() {
                    nb += 1;
                    continue;
                }
            }
            carry = self.shift_r1_block(nb, carry);
            nb += 1;
        }
        if self.size & (BITS_IN_BLOCK as u64 - 1) == 0 {
            return carry;
        }
        // the old bit at size-1 landed on the size boundary inside the last
        // block; report and clamp it
        let dropped = self.test_raw(self.size);
        if dropped {
            let (nb_s, bit_s) = split(self.size);
            self.combine_range_block(nb_s, bit_s, BITS_IN_BLOCK as u32 - 1, false);
        }
        dropped
    }

    /// Shift every position one step down; position 0 is dropped and
    /// returned. Size is unchanged.
    pub fn shift_left(&mut self) -> bool {
        if self.size == 0 {
            return false;
        }
        let last_nb = self.last_nb();
        let dropped = self.test(0);
        let mut nb = 0u64;
        while nb <= last_nb {
            let (i, j) = BlockStore::coords(nb);
            if j == 0 && matches!(self.store.sub(i), SubArray::Empty) {
                let next_first = (nb + BLOCKS_IN_SUB as u64) << BLOCK_SHIFT;
                let carry_after = nb + BLOCKS_IN_SUB as u64 <= last_nb && self.test_raw(next_first);
                if !carry_after {
                    nb += BLOCKS_IN_SUB as u64;
                    continue;
                }
            }
            let carry_in = nb < last_nb && self.test_raw((nb + 1) << BLOCK_SHIFT);
            self.shift_l1_block(nb, carry_in);
            nb += 1;
        }
        dropped
    }

    fn shift_r1_block(&mut self, nb: u64, carry_in: bool) -> bool {
        match kind(self.store.slot(nb)) {
            SlotKind::Empty => {
                if carry_in {
                    self.set_block_bit(nb, 0);
                }
                false
            }
            SlotKind::Full => {
                if carry_in {
                    true
                } else {
                    let b = self.store.deoptimize(nb);
                    let (carry, _) = block::shift_r1(b, false);
                    carry
                }
            }
            SlotKind::Gap => {
                let carry = match self.store.slot_mut(nb) {
                    BlockSlot::Gap(g) => g.shift_r1(carry_in),
                    _ => unreachable!(),
                };
                self.store.normalize_gap(nb);
                carry
            }
            SlotKind::Bit => {
                let b = self.bit_mut(nb);
                let (carry, any) = block::shift_r1(b, carry_in);
                if !any {
                    self.store.set_zero(nb);
                }
                carry
            }
        }
    }

    fn shift_l1_block(&mut self, nb: u64, carry_in: bool) -> bool {
        match kind(self.store.slot(nb)) {
            SlotKind::Empty => {
                if carry_in {
                    self.set_block_bit(nb, BITS_IN_BLOCK as u32 - 1);
                }
                false
            }
            SlotKind::Full => {
                if carry_in {
                    true
                } else {
                    let b = self.store.deoptimize(nb);
                    let (carry, _) = block::shift_l1(b, false);
                    carry
                }
            }
            SlotKind::Gap => {
                let carry = match self.store.slot_mut(nb) {
                    BlockSlot::Gap(g) => g.shift_l1(carry_in),
                    _ => unreachable!(),
                };
                self.store.normalize_gap(nb);
                carry
            }
            SlotKind::Bit => {
                let b = self.bit_mut(nb);
                let (carry, any) = block::shift_l1(b, carry_in);
                if !any {
                    self.store.set_zero(nb);
                }
                carry
            }
        }
    }

    fn set_block_bit(&mut self, nb: u64, nbit: u32) {
        let mut was_gap = false;
        match self.store.ensure_writable(nb) {
            BlockSlot::Bit(b) => {
                block::set_bit(b, nbit, true);
            }
            BlockSlot::Gap(g) => {
                was_gap = true;
                g.set(nbit, true);
            }
            _ => unreachable!(),
        }
        if was_gap {
            self.store.normalize_gap(nb);
        }
    }

    /// Insert a bit with value `val` at `pos`; everything at and above
    /// `pos` moves one position up and the size grows by one (saturating at
    /// the addressable maximum). Returns the bit pushed out of the
    /// addressable space, if any.
    pub fn insert(&mut self, pos: u64, val: bool) -> Result<bool, Error> {
        if pos >= MAX_BITS {
            return Err(Error::PositionOutOfRange { pos, max: MAX_BITS });
        }
        if pos >= self.size {
            // inserting past the tail: grow and write the single bit
            self.size = (pos + 1).min(MAX_BITS);
            if val {
                self.set_value(pos, true)?;
            }
            return Ok(false);
        }
        let (nb0, nbit) = split(pos);
        let last_nb = self.last_nb();
        let mut carry = self.insert_in_block(nb0, nbit, val);
        let mut nb = nb0 + 1;
        while nb <= last_nb {
            if !carry {
                let (i, j) = BlockStore::coords(nb);
                if j == 0 && matches!(self.store.sub(i), SubArray::Empty) {
                    nb += BLOCKS_IN_SUB as u64;
                    continue;
                }
                if self.store.slot(nb).is_empty() {
                    nb += 1;
                    continue;
                }
            }
            carry = self.shift_r1_block(nb, carry);
            nb += 1;
        }
        let old_size = self.size;
        self.size = (old_size + 1).min(MAX_BITS);
        if carry {
            let landing = (last_nb + 1) << BLOCK_SHIFT;
            if landing < self.size {
                let _ = self.set_value(landing, true);
                carry = false;
            }
        }
        Ok(carry)
    }

    fn insert_in_block(&mut self, nb: u64, nbit: u32, val: bool) -> bool {
        match kind(self.store.slot(nb)) {
            SlotKind::Empty => {
                if val {
                    self.set_block_bit(nb, nbit);
                }
                false
            }
            SlotKind::Full => {
                if val {
                    true
                } else {
                    let b = self.store.deoptimize(nb);
                    block::insert_bit(b, nbit, false)
                }
            }
            _ => {
                if nbit == 0 {
                    return self.shift_r1_block(nb, val);
                }
                let b = self.store.deoptimize(nb);
                let carry = block::insert_bit(b, nbit, val);
                self.store.normalize_bit(nb);
                carry
            }
        }
    }

    /// Remove the bit at `pos`; everything above moves one position down
    /// and the size shrinks by one.
    pub fn erase(&mut self, pos: u64) -> Result<(), Error> {
        self.check_pos(pos)?;
        let (nb0, nbit) = split(pos);
        let last_nb = self.last_nb();
        let mut nb = nb0;
        while nb <= last_nb {
            if nb != nb0 {
                let (i, j) = BlockStore::coords(nb);
                if j == 0 && matches!(self.store.sub(i), SubArray::Empty) {
                    let after = nb + BLOCKS_IN_SUB as u64;
                    let carry_after = after <= last_nb && self.test_raw(after << BLOCK_SHIFT);
                    if !carry_after {
                        nb += BLOCKS_IN_SUB as u64;
                        continue;
                    }
                }
            }
            let carry_in = nb < last_nb && self.test_raw((nb + 1) << BLOCK_SHIFT);
            if nb == nb0 {
                self.erase_in_block(nb, nbit, carry_in);
            } else {
                self.shift_l1_block(nb, carry_in);
            }
            nb += 1;
        }
        self.size -= 1;
        Ok(())
    }

    fn erase_in_block(&mut self, nb: u64, nbit: u32, carry_in: bool) {
        match kind(self.store.slot(nb)) {
            SlotKind::Empty => {
                if carry_in {
                    self.set_block_bit(nb, BITS_IN_BLOCK as u32 - 1);
                }
            }
            SlotKind::Full => {
                if !carry_in {
                    let b = self.store.deoptimize(nb);
                    block::erase_bit(b, nbit, false);
                }
            }
            SlotKind::Gap if nbit == 0 => {
                self.shift_l1_block(nb, carry_in);
            }
            _ => {
                let b = self.store.deoptimize(nb);
                block::erase_bit(b, nbit, carry_in);
                self.store.normalize_bit(nb);
            }
        }
    }

    // -----------------------------------------------------------------------
    // comparison
    // -----------------------------------------------------------------------

    /// First position where the two vectors differ.
    pub fn find_first_mismatch(&self, other: &BitVector) -> Option<u64> {
        let top = self.store.top_len().max(other.store.top_len());
        let mut scratch_a: Option<Box<BitBlock>> = None;
        let mut scratch_b: Option<Box<BitBlock>> = None;
        for i in 0..top {
            let sa = self.store.sub(i);
            let sb = other.store.sub(i);
            match (sa, sb) {
                (SubArray::Empty, SubArray::Empty) | (SubArray::Full, SubArray::Full) => continue,
                _ => {}
            }
            for j in 0..BLOCKS_IN_SUB {
                let a = sa.slot(j);
                let b = sb.slot(j);
                if a.is_empty() && b.is_empty() {
                    continue;
                }
                if a.is_full() && b.is_full() {
                    continue;
                }
                let wa = resolve_words(a, &mut scratch_a);
                let wb = resolve_words(b, &mut scratch_b);
                if let Some(p) = block::find_first_diff(wa, wb) {
                    let nb = ((i as u64) << 8) | j as u64;
                    return Some((nb << BLOCK_SHIFT) | p as u64);
                }
            }
        }
        None
    }

    /// Lexicographic comparison by content: at the first differing
    /// position, the vector holding a 1 is the greater one.
    pub fn compare(&self, other: &BitVector) -> Ordering {
        match self.find_first_mismatch(other) {
            None => Ordering::Equal,
            Some(pos) => {
                if self.test_raw(pos) {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // maintenance
    // -----------------------------------------------------------------------

    /// Run an optimization pass over the block tree.
    pub fn optimize(&mut self, mode: OptMode) -> OptStat {
        let mut stat = OptStat::default();
        self.store.optimize(mode, &mut stat);
        stat
    }

    /// Install a new GAP capacity table; existing GAP blocks are re-classed.
    pub fn set_gap_levels(&mut self, levels: GapLevels) {
        self.store.set_gap_levels(levels);
    }

    /// Census of the block tree over the reserved top span: concrete dense
    /// and GAP blocks, FULL sentinels and empty slots, in that order.
    pub fn count_blocks(&self) -> (usize, usize, usize, usize) {
        let (mut bit, mut gap, mut full, mut empty) = (0usize, 0usize, 0usize, 0usize);
        for i in 0..self.store.top_len() {
            match self.store.sub(i) {
                SubArray::Empty => empty += BLOCKS_IN_SUB,
                SubArray::Full => full += BLOCKS_IN_SUB,
                SubArray::Live(blocks) => {
                    for slot in blocks.iter() {
                        match slot {
                            BlockSlot::Empty => empty += 1,
                            BlockSlot::Full => full += 1,
                            BlockSlot::Bit(_) => bit += 1,
                            BlockSlot::Gap(_) => gap += 1,
                        }
                    }
                }
            }
        }
        (bit, gap, full, empty)
    }

    /// Memory footprint and serialization estimate.
    pub fn stat(&self) -> Stat {
        let mut st = Stat {
            gap_levels: *self.store.gap_levels(),
            ..Stat::default()
        };
        let mut bytes = self.store.top_len() * mem::size_of::<SubArray>();
        for i in 0..self.store.top_len() {
            if let SubArray::Live(blocks) = self.store.sub(i) {
                bytes += mem::size_of_val(&**blocks);
                for slot in blocks.iter() {
                    match slot {
                        BlockSlot::Bit(_) => {
                            st.bit_blocks += 1;
                            bytes += mem::size_of::<BitBlock>();
                        }
                        BlockSlot::Gap(g) => {
                            st.gap_blocks += 1;
                            bytes += g.capacity() * mem::size_of::<u16>();
                        }
                        _ => {}
                    }
                }
            }
        }
        st.memory_used = bytes;
        st.max_serialize_mem = bytes + (bytes / 10).max(SERIALIZE_MARGIN_FLOOR);
        st
    }

    /// Drop to the empty set. With `free_mem` the top array is released.
    pub fn clear(&mut self, free_mem: bool) {
        self.store.clear_all(free_mem);
    }

    /// O(1) full-state exchange.
    pub fn swap(&mut self, other: &mut BitVector) {
        mem::swap(self, other);
    }
}

impl PartialEq for BitVector {
    /// Content equality: both vectors report the same set of positions.
    fn eq(&self, other: &Self) -> bool {
        self.find_first_mismatch(other).is_none()
    }
}

impl Eq for BitVector {}

impl core::ops::Index<u64> for BitVector {
    type Output = bool;

    fn index(&self, pos: u64) -> &bool {
        if self.test(pos) {
            &true
        } else {
            &false
        }
    }
}

/// Reference handle to one bit of a vector.
pub struct BitMut<'a> {
    bv: &'a mut BitVector,
    pos: u64,
}

impl BitMut<'_> {
    /// Current value of the referenced position.
    #[inline]
    pub fn get(&self) -> bool {
        self.bv.test(self.pos)
    }

    /// Write the referenced position. Returns true iff the vector changed.
    pub fn set(self, val: bool) -> Result<bool, Error> {
        self.bv.set_value(self.pos, val)
    }

    /// Flip the referenced position, returning the prior value.
    pub fn flip(self) -> Result<bool, Error> {
        self.bv.flip(self.pos)
    }
}

/// Scratch run-length mask for a partial-block range update: `[l, r]`
/// carries `val`, the rest of the block carries the complement.
fn range_mask_gap(l: u32, r: u32, val: bool, levels: &GapLevels) -> GapBlock {
    let mut runs: Vec<u16> = Vec::with_capacity(4);
    if l > 0 {
        runs.push((l - 1) as u16);
    }
    if r < BITS_IN_BLOCK as u32 - 1 {
        runs.push(r as u16);
    }
    runs.push(RUN_TERM);
    let start_value = if val { l == 0 } else { l > 0 };
    GapBlock::from_runs(start_value, runs, levels).expect("range mask fits the smallest level")
}

fn resolve_words<'a>(slot: &'a BlockSlot, scratch: &'a mut Option<Box<BitBlock>>) -> &'a BitBlock {
    match slot {
        BlockSlot::Empty => &ZERO_BLOCK,
        BlockSlot::Full => &FULL_BLOCK,
        BlockSlot::Bit(b) => b,
        BlockSlot::Gap(g) => {
            let tb = scratch.get_or_insert_with(new_zero_block);
            g.to_bit_block(tb);
            tb
        }
    }
}

fn gap_of(slot: &BlockSlot) -> &GapBlock {
    match slot {
        BlockSlot::Gap(g) => g,
        _ => unreachable!(),
    }
}

/// Compute `ra OP rb` densely into `tb`. Both operands are concrete (or
/// sentinel-resolvable) blocks.
fn dense_combine(tb: &mut BitBlock, ra: &BlockSlot, rb: &BlockSlot, op: SetOp) {
    match (ra.bit_words(), rb.bit_words()) {
        (Some(wa), Some(wb)) => match op {
            SetOp::And => {
                block::and_into(tb, wa, wb);
            }
            SetOp::Or => {
                block::or_into(tb, wa, wb);
            }
            SetOp::Xor => {
                block::xor_into(tb, wa, wb);
            }
            SetOp::Sub => {
                block::sub_into(tb, wa, wb);
            }
        },
        (Some(wa), None) => {
            let gb = gap_of(rb);
            *tb = *wa;
            match op {
                SetOp::Or => gap::add_to_bitset(tb, gb),
                SetOp::And => gap::and_to_bitset(tb, gb),
                SetOp::Xor => gap::xor_to_bitset(tb, gb),
                SetOp::Sub => gap::sub_to_bitset(tb, gb),
            }
        }
        (None, Some(wb)) => {
            let ga = gap_of(ra);
            match op {
                // commutative: start from the dense side
                SetOp::Or => {
                    *tb = *wb;
                    gap::add_to_bitset(tb, ga);
                }
                SetOp::And => {
                    *tb = *wb;
                    gap::and_to_bitset(tb, ga);
                }
                SetOp::Xor => {
                    *tb = *wb;
                    gap::xor_to_bitset(tb, ga);
                }
                SetOp::Sub => {
                    ga.to_bit_block(tb);
                    block::sub_assign(tb, wb);
                }
            }
        }
        (None, None) => {
            // two GAP blocks whose run-domain result overflowed
            let ga = gap_of(ra);
            let gb = gap_of(rb);
            ga.to_bit_block(tb);
            match op {
                SetOp::Or => gap::add_to_bitset(tb, gb),
                SetOp::And => gap::and_to_bitset(tb, gb),
                SetOp::Xor => gap::xor_to_bitset(tb, gb),
                SetOp::Sub => gap::sub_to_bitset(tb, gb),
            }
        }
    }
}

fn classify(b: &BitBlock) -> Uniform {
    if block::is_all_zero(b) {
        Uniform::Zero
    } else if block::is_all_one(b) {
        Uniform::One
    } else {
        Uniform::Mixed
    }
}
