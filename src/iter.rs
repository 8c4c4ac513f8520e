//! Lazy forward traversal of set bits.
//!
//! The iterator yields set positions in increasing order. Dense blocks are
//! decoded a 256-bit wave at a time into a cache of bit offsets; GAP blocks
//! are walked run by run. Because the iterator borrows the vector, a
//! mutation while iterating is a compile error rather than a stale cursor.

use crate::block::{self, RankScan};
use crate::popcount::popcount_word;
use crate::store::{BlockSlot, BlockStore, SubArray};
use crate::vector::BitVector;
use crate::{BITS_IN_BLOCK, BLOCKS_IN_SUB, BLOCK_SHIFT, BLOCK_WORDS};

/// 64-bit words per bitscan wave (256 bits per decode).
const SCAN_WAVE_WORDS: usize = 4;

struct BitCursor {
    /// First word of the decoded wave (wave-aligned).
    word_idx: usize,
    /// Bit offsets of the wave's set bits, relative to the wave start.
    offsets: [u8; 256],
    cnt: u16,
    idx: u16,
}

struct GapCursor {
    /// Index of the current ON run.
    run_idx: usize,
    /// Current in-block position.
    pos: u32,
    /// Set bits left in the current run after `pos`.
    remaining: u32,
}

enum State {
    Bit(BitCursor),
    Gap(GapCursor),
    Dead,
}

enum Adv {
    Done,
    NextBlock(u64),
}

/// Iterator over set positions of a [`BitVector`].
pub struct OnesIter<'a> {
    bv: &'a BitVector,
    nb: u64,
    state: State,
    pending: Option<u64>,
}

/// Decode one wave of up to 256 bits into relative offsets.
fn bitscan_wave(words: &[u64], start: usize, out: &mut [u8; 256]) -> u16 {
    let mut cnt = 0u16;
    for k in 0..SCAN_WAVE_WORDS {
        let mut w = words[start + k];
        let base = (k * 64) as u32;
        while w != 0 {
            out[cnt as usize] = (base + w.trailing_zeros()) as u8;
            cnt += 1;
            w &= w - 1;
        }
    }
    cnt
}

impl<'a> OnesIter<'a> {
    /// Iterator positioned at the first set bit >= `from`.
    pub fn new(bv: &'a BitVector, from: u64) -> Self {
        let mut it = OnesIter {
            bv,
            nb: 0,
            state: State::Dead,
            pending: None,
        };
        it.go_to(from);
        it
    }

    /// True while the iterator has a position to yield.
    #[inline]
    pub fn valid(&self) -> bool {
        self.pending.is_some()
    }

    /// The position that the next `next()` call would yield.
    #[inline]
    pub fn value(&self) -> Option<u64> {
        self.pending
    }

    /// Re-position at the first set bit >= `pos`.
    pub fn go_to(&mut self, pos: u64) {
        match self.bv.check_or_next(pos) {
            Some(p) => {
                let nb = p >> BLOCK_SHIFT;
                let nbit = (p & (BITS_IN_BLOCK as u64 - 1)) as u32;
                self.enter_block_at(nb, nbit);
            }
            None => {
                self.state = State::Dead;
                self.pending = None;
            }
        }
    }

    /// Position the cursor at a bit known to be set.
    fn enter_block_at(&mut self, nb: u64, nbit: u32) {
        self.nb = nb;
        let slot = self.bv.store().slot(nb);
        match slot {
            BlockSlot::Bit(_) | BlockSlot::Full => {
                let words = match slot.bit_words() {
                    Some(w) => w,
                    None => unreachable!(),
                };
                let word = (nbit >> 6) as usize;
                let wave_start = word & !(SCAN_WAVE_WORDS - 1);
                let mut cur = BitCursor {
                    word_idx: wave_start,
                    offsets: [0; 256],
                    cnt: 0,
                    idx: 0,
                };
                cur.cnt = bitscan_wave(words, wave_start, &mut cur.offsets);
                let rel = (nbit - (wave_start as u32) * 64) as u8;
                let mut idx = 0u16;
                while cur.offsets[idx as usize] != rel {
                    idx += 1;
                }
                cur.idx = idx;
                self.state = State::Bit(cur);
            }
            BlockSlot::Gap(g) => {
                let (run_idx, val) = g.bfind(nbit);
                debug_assert!(val);
                let end = g.runs()[run_idx] as u32;
                self.state = State::Gap(GapCursor {
                    run_idx,
                    pos: nbit,
                    remaining: end - nbit,
                });
            }
            BlockSlot::Empty => unreachable!(),
        }
        self.pending = Some((nb << BLOCK_SHIFT) | nbit as u64);
    }

    /// Move the cursor to the successor of the pending position.
    fn advance(&mut self) {
        let nb = self.nb;
        let adv = match &mut self.state {
            State::Dead => Adv::Done,
            State::Bit(cur) => {
                cur.idx += 1;
                if cur.idx < cur.cnt {
                    self.pending = Some(
                        (nb << BLOCK_SHIFT)
                            | (cur.word_idx as u64 * 64 + cur.offsets[cur.idx as usize] as u64),
                    );
                    Adv::Done
                } else {
                    let words = match self.bv.store().slot(nb).bit_words() {
                        Some(w) => w,
                        None => unreachable!(),
                    };
                    let mut w = cur.word_idx + SCAN_WAVE_WORDS;
                    let mut found = false;
                    while w < BLOCK_WORDS {
                        let cnt = bitscan_wave(words, w, &mut cur.offsets);
                        if cnt > 0 {
                            cur.word_idx = w;
                            cur.cnt = cnt;
                            cur.idx = 0;
                            self.pending = Some(
                                (nb << BLOCK_SHIFT)
                                    | (w as u64 * 64 + cur.offsets[0] as u64),
                            );
                            found = true;
                            break;
                        }
                        w += SCAN_WAVE_WORDS;
                    }
                    if found {
                        Adv::Done
                    } else {
                        Adv::NextBlock(nb + 1)
                    }
                }
            }
            State::Gap(cur) => {
                if cur.remaining > 0 {
                    cur.remaining -= 1;
                    cur.pos += 1;
                    self.pending = Some((nb << BLOCK_SHIFT) | cur.pos as u64);
                    Adv::Done
                } else {
                    let g = match self.bv.store().slot(nb) {
                        BlockSlot::Gap(g) => g,
                        _ => unreachable!(),
                    };
                    let runs = g.runs();
                    let off_idx = cur.run_idx + 1;
                    if off_idx >= runs.len() || runs[off_idx] as u32 == BITS_IN_BLOCK as u32 - 1 {
                        // the OFF run reaches the block end
                        Adv::NextBlock(nb + 1)
                    } else {
                        let start = runs[off_idx] as u32 + 1;
                        let end = runs[off_idx + 1] as u32;
                        cur.run_idx = off_idx + 1;
                        cur.pos = start;
                        cur.remaining = end - start;
                        self.pending = Some((nb << BLOCK_SHIFT) | start as u64);
                        Adv::Done
                    }
                }
            }
        };
        if let Adv::NextBlock(next) = adv {
            self.next_block(next);
        }
    }

    /// Search forward for the next non-empty block and enter it.
    fn next_block(&mut self, mut nb: u64) {
        let size = self.bv.size();
        if size == 0 {
            self.state = State::Dead;
            self.pending = None;
            return;
        }
        let last_nb = (size - 1) >> BLOCK_SHIFT;
        while nb <= last_nb {
            let (i, j) = BlockStore::coords(nb);
            if j == 0 && matches!(self.bv.store().sub(i), SubArray::Empty) {
                nb += BLOCKS_IN_SUB as u64;
                continue;
            }
            if let Some(p) = self.bv.store().slot(nb).find_first() {
                let abs = (nb << BLOCK_SHIFT) | p as u64;
                if abs >= size {
                    break;
                }
                self.enter_block_at(nb, p);
                return;
            }
            nb += 1;
        }
        self.state = State::Dead;
        self.pending = None;
    }

    /// Advance across exactly `rank` set bits. Whole waves and blocks are
    /// skipped by their popcounts without decoding.
    pub fn skip(&mut self, rank: u64) {
        if rank == 0 {
            return;
        }
        let cur_pos = match self.pending {
            Some(p) => p,
            None => return,
        };
        let mut remaining = rank;

        // within the decoded wave cache
        if let State::Bit(cur) = &mut self.state {
            let avail = (cur.cnt - cur.idx - 1) as u64;
            if remaining <= avail {
                cur.idx += remaining as u16;
                self.pending = Some(
                    (self.nb << BLOCK_SHIFT)
                        | (cur.word_idx as u64 * 64 + cur.offsets[cur.idx as usize] as u64),
                );
                return;
            }
        }
        // within the current ON run
        if let State::Gap(cur) = &mut self.state {
            if remaining <= cur.remaining as u64 {
                cur.pos += remaining as u32;
                cur.remaining -= remaining as u32;
                self.pending = Some((self.nb << BLOCK_SHIFT) | cur.pos as u64);
                return;
            }
        }

        // stride over the rest of the current block by popcount
        let nb0 = self.nb;
        let nbit0 = (cur_pos & (BITS_IN_BLOCK as u64 - 1)) as u32;
        let slot = self.bv.store().slot(nb0);
        let after = if nbit0 == BITS_IN_BLOCK as u32 - 1 {
            0
        } else {
            slot.count_range(nbit0 + 1, BITS_IN_BLOCK as u32 - 1) as u64
        };
        if remaining <= after {
            let hit = match slot {
                BlockSlot::Full => RankScan::Found(nbit0 + remaining as u32),
                BlockSlot::Bit(b) => {
                    // word-stride scan, decoding only the final word
                    let mut w = ((nbit0 + 1) >> 6) as usize;
                    let mut need = remaining as u32;
                    let first = b[w] & (!0u64 << ((nbit0 + 1) & 63));
                    let mut word = first;
                    loop {
                        let pc = popcount_word(word);
                        if pc >= need {
                            break RankScan::Found(
                                (w as u32) * 64 + block::word_select(word, need),
                            );
                        }
                        need -= pc;
                        w += 1;
                        word = b[w];
                    }
                }
                BlockSlot::Gap(g) => g.rank_find(nbit0 + 1, remaining as u32),
                BlockSlot::Empty => unreachable!(),
            };
            match hit {
                RankScan::Found(p) => {
                    self.enter_block_at(nb0, p);
                    return;
                }
                RankScan::Remaining(_) => unreachable!(),
            }
        }
        remaining -= after;

        // whole-block strides
        let size = self.bv.size();
        let last_nb = (size - 1) >> BLOCK_SHIFT;
        let mut nb = nb0 + 1;
        while nb <= last_nb {
            let (i, j) = BlockStore::coords(nb);
            if j == 0 && matches!(self.bv.store().sub(i), SubArray::Empty) {
                nb += BLOCKS_IN_SUB as u64;
                continue;
            }
            let slot = self.bv.store().slot(nb);
            let c = slot.count() as u64;
            if remaining <= c {
                let hit = match slot {
                    BlockSlot::Full => RankScan::Found(remaining as u32 - 1),
                    BlockSlot::Bit(b) => block::rank_find(b, 0, remaining as u32),
                    BlockSlot::Gap(g) => g.rank_find(0, remaining as u32),
                    BlockSlot::Empty => RankScan::Remaining(remaining as u32),
                };
                if let RankScan::Found(p) = hit {
                    self.enter_block_at(nb, p);
                    return;
                }
            }
            remaining -= c;
            nb += 1;
        }
        self.state = State::Dead;
        self.pending = None;
    }
}

impl<'a> Iterator for OnesIter<'a> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let cur = self.pending?;
        self.advance();
        Some(cur)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gap::DEFAULT_GAP_LEVELS;
    use crate::store::AllocStrategy;
    use crate::vector::{BitVector, SortOrder, VectorConfig};

    fn vector_with(bits: &[u64]) -> BitVector {
        let mut bv = BitVector::with_size(1 << 24);
        bv.set_ids(bits, SortOrder::Unknown).unwrap();
        bv
    }

    #[test]
    fn test_empty_iteration() {
        let bv = BitVector::with_size(1 << 20);
        let mut it = bv.ones();
        assert!(!it.valid());
        assert_eq!(it.next(), None);
        assert_eq!(it.next(), None); // advancing an invalid iterator stays invalid
    }

    #[test]
    fn test_basic_iteration() {
        let bits = [0u64, 1, 63, 64, 255, 256, 65_535, 65_536, 1_000_000];
        let bv = vector_with(&bits);
        let collected: Vec<u64> = bv.ones().collect();
        assert_eq!(collected, bits);
    }

    #[test]
    fn test_iteration_dense_run() {
        let bits: Vec<u64> = (1000..2000).collect();
        let bv = vector_with(&bits);
        let collected: Vec<u64> = bv.ones().collect();
        assert_eq!(collected, bits);
    }

    #[test]
    fn test_iteration_over_gap_blocks() {
        let mut bv = BitVector::with_config(VectorConfig {
            size: 1 << 24,
            strategy: AllocStrategy::Gap,
            gap_levels: DEFAULT_GAP_LEVELS,
        });
        let bits = [5u64, 6, 7, 100, 65_535, 65_536, 70_000];
        for &p in &bits {
            bv.set(p).unwrap();
        }
        let collected: Vec<u64> = bv.ones().collect();
        assert_eq!(collected, bits);
    }

    #[test]
    fn test_iteration_full_block() {
        let mut bv = BitVector::with_size(1 << 20);
        bv.set_range(0, 65_535, true).unwrap();
        bv.set(70_000).unwrap();
        let collected: Vec<u64> = bv.ones().collect();
        assert_eq!(collected.len(), 65_537);
        assert_eq!(collected[0], 0);
        assert_eq!(collected[65_535], 65_535);
        assert_eq!(collected[65_536], 70_000);
    }

    #[test]
    fn test_ones_from_and_go_to() {
        let bv = vector_with(&[10, 20, 70_000]);
        let mut it = bv.ones_from(11);
        assert_eq!(it.value(), Some(20));
        assert_eq!(it.next(), Some(20));
        assert_eq!(it.next(), Some(70_000));
        assert_eq!(it.next(), None);

        let mut it = bv.ones();
        it.go_to(21);
        assert_eq!(it.next(), Some(70_000));
    }

    #[test]
    fn test_skip() {
        let bits: Vec<u64> = (0..500).map(|i| i * 171).collect();
        let bv = vector_with(&bits);
        let mut it = bv.ones();
        assert_eq!(it.value(), Some(bits[0]));
        OnesIter::skip(&mut it, 3);
        assert_eq!(it.value(), Some(bits[3]));
        OnesIter::skip(&mut it, 100);
        assert_eq!(it.value(), Some(bits[103]));
        OnesIter::skip(&mut it, 396);
        assert_eq!(it.value(), Some(bits[499]));
        OnesIter::skip(&mut it, 1);
        assert!(!it.valid());
    }

    #[test]
    fn test_skip_through_gap_and_full_blocks() {
        let mut bv = BitVector::with_size(1 << 24);
        bv.set_range(65_536, 131_071, true).unwrap(); // block 1 full
        bv.set(10).unwrap();
        bv.set(200_000).unwrap();
        let mut it = bv.ones();
        OnesIter::skip(&mut it, 1);
        assert_eq!(it.value(), Some(65_536));
        OnesIter::skip(&mut it, 65_536);
        assert_eq!(it.value(), Some(200_000));
    }

    #[test]
    fn test_skip_matches_repeated_next() {
        let bits: Vec<u64> = (0..2000).map(|i| i * 37 + (i % 5)).collect();
        let bv = vector_with(&bits);
        for skip_by in [1u64, 2, 7, 64, 255, 256, 257, 1000] {
            let mut a = bv.ones();
            let mut b = bv.ones();
            OnesIter::skip(&mut a, skip_by);
            for _ in 0..skip_by {
                b.next();
            }
            assert_eq!(a.value(), b.value(), "skip_by={}", skip_by);
        }
    }
}
