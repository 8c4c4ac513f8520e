//! XOR similarity scanner.
//!
//! Before entropy coding, a block can sometimes be rewritten as the XOR of
//! itself with a "reference" block from a related vector, masked to the
//! waves where that actually helps. The scanner measures per-wave GAP and
//! bit counts of the target, scores every candidate reference by the gain
//! in the best of three metrics (GAP count, bit count, inverse bit count),
//! and validates the winner against the fixed cost of storing the
//! reference (token, 64-bit digest, reference index).

#[cfg(not(test))]
use alloc::vec::Vec;

use crate::block::{self, BitBlock};
use crate::gap::{self, GapBlock};
use crate::store::BlockSlot;
use crate::vector::BitVector;
use crate::{SetOp, BITS_IN_BLOCK, BLOCK_WAVES, WAVE_WORDS};

/// Outcome of a similarity probe between a target and a reference block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MatchKind {
    /// No profitable reference found.
    #[default]
    None,
    /// XOR improves the GAP (run) count.
    GapCount,
    /// XOR improves the bit count.
    BitCount,
    /// XOR improves the inverse bit count.
    InvBitCount,
    /// The reference is bit-for-bit identical to the target.
    Equal,
}

/// Per-wave complexity profile of a target block and of its XOR products.
#[derive(Clone, Debug)]
pub struct WaveDescriptor {
    /// GAP counts of the target block, per wave.
    pub gc: [u16; BLOCK_WAVES],
    /// Bit counts of the target block, per wave.
    pub bc: [u16; BLOCK_WAVES],
    /// GAP counts of the current XOR product, per wave.
    pub xor_gc: [u16; BLOCK_WAVES],
    /// Bit counts of the current XOR product, per wave.
    pub xor_bc: [u16; BLOCK_WAVES],
}

impl WaveDescriptor {
    fn new() -> Self {
        WaveDescriptor {
            gc: [0; BLOCK_WAVES],
            bc: [0; BLOCK_WAVES],
            xor_gc: [0; BLOCK_WAVES],
            xor_bc: [0; BLOCK_WAVES],
        }
    }
}

/// Ordered list of reference vectors with their external row indexes.
pub struct RefVector<'a> {
    vectors: Vec<&'a BitVector>,
    rows: Vec<usize>,
}

impl<'a> Default for RefVector<'a> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> RefVector<'a> {
    pub fn new() -> Self {
        RefVector {
            vectors: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Append a reference vector with its external row index.
    pub fn add(&mut self, bv: &'a BitVector, row: usize) {
        self.vectors.push(bv);
        self.rows.push(row);
    }

    /// Number of references.
    #[inline]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Reference vector at list position `ri`.
    #[inline]
    pub fn get(&self, ri: usize) -> &'a BitVector {
        self.vectors[ri]
    }

    /// External row index of list position `ri`.
    #[inline]
    pub fn row(&self, ri: usize) -> usize {
        self.rows[ri]
    }

    /// Find the list position carrying an external row index.
    pub fn find_row(&self, row: usize) -> Option<usize> {
        self.rows.iter().position(|&r| r == row)
    }

    /// Block `nb` of the reference at list position `ri`.
    #[inline]
    pub fn get_block(&self, ri: usize, nb: u64) -> &'a BlockSlot {
        self.vectors[ri].store().slot(nb)
    }
}

/// Pick the cheapest of the three block metrics; ties resolve GC > BC > iBC.
pub fn best_metric(bc: u32, gc: u32) -> (MatchKind, u32) {
    let ibc = BITS_IN_BLOCK as u32 - bc;
    if ibc == 0 {
        return (MatchKind::GapCount, gc);
    }
    if gc < bc {
        if gc < ibc {
            return (MatchKind::GapCount, gc);
        }
    } else if bc < ibc {
        return (MatchKind::BitCount, bc);
    }
    (MatchKind::InvBitCount, ibc)
}

/// Score `block XOR xor_block` wave by wave against the target profile in
/// `descr`. Returns the winning metric, its wave digest and the total gain.
///
/// A pair with zero gain in every metric is a no-match, even when the two
/// blocks share the same zero-wave mask.
fn compute_xor_match(
    block: &BitBlock,
    xor_block: &BitBlock,
    descr: &mut WaveDescriptor,
) -> (MatchKind, u64, u32) {
    let d0 = !block::digest(block);

    for i in 0..BLOCK_WAVES {
        let off = i * WAVE_WORDS;
        let (gc, bc) = block::words_xor_run_and_bit_count(
            &block[off..off + WAVE_WORDS],
            &xor_block[off..off + WAVE_WORDS],
        );
        descr.xor_gc[i] = gc as u16;
        descr.xor_bc[i] = bc as u16;
    }

    let wave_max_bits = (WAVE_WORDS * 64) as u32;
    let (mut gc_gain, mut bc_gain, mut ibc_gain) = (0u32, 0u32, 0u32);
    let (mut gc_digest, mut bc_digest, mut ibc_digest) = (0u64, 0u64, 0u64);

    for i in 0..BLOCK_WAVES {
        let dmask = 1u64 << i;
        if d0 & dmask != 0 {
            continue;
        }
        let xor_gc = descr.xor_gc[i] as u32;
        if xor_gc <= 1 {
            gc_digest |= dmask;
            gc_gain += descr.gc[i] as u32;
        } else if xor_gc < descr.gc[i] as u32 {
            gc_digest |= dmask;
            gc_gain += descr.gc[i] as u32 - xor_gc;
        }
        let xor_bc = descr.xor_bc[i] as u32;
        if xor_bc < descr.bc[i] as u32 {
            bc_digest |= dmask;
            bc_gain += descr.bc[i] as u32 - xor_bc;
        }
        let xor_ibc = wave_max_bits - xor_bc;
        let wave_ibc = wave_max_bits - descr.bc[i] as u32;
        if xor_ibc < wave_ibc {
            ibc_digest |= dmask;
            ibc_gain += wave_ibc - xor_ibc;
        }
    }

    if gc_gain | bc_gain | ibc_gain == 0 {
        return (MatchKind::None, 0, 0);
    }
    if gc_gain > bc_gain {
        if gc_gain > ibc_gain {
            return (MatchKind::GapCount, gc_digest, gc_gain);
        }
    } else if bc_gain > ibc_gain {
        return (MatchKind::BitCount, bc_digest, bc_gain);
    }
    (MatchKind::InvBitCount, ibc_digest, ibc_gain)
}

/// Scanner state for one target block against a list of references.
pub struct XorScanner {
    descr: WaveDescriptor,
    x_bc: u32,
    x_gc: u32,
    x_best_metric: u32,
    x_block_best: u32,
    x_kind: MatchKind,
    digest: u64,
    found_ref: usize,
    /// Entropy-coding estimate: bits each stored integer is expected to
    /// take. Drives the profitability limit of a match.
    pub bits_per_int: f32,
}

impl Default for XorScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl XorScanner {
    pub fn new() -> Self {
        XorScanner {
            descr: WaveDescriptor::new(),
            x_bc: 0,
            x_gc: 0,
            x_best_metric: 0,
            x_block_best: 0,
            x_kind: MatchKind::None,
            digest: 0,
            found_ref: usize::MAX,
            bits_per_int: 3.0,
        }
    }

    /// Target bit count measured by [`Self::compute_block_stats`].
    #[inline]
    pub fn target_bit_count(&self) -> u32 {
        self.x_bc
    }

    /// Target GAP count measured by [`Self::compute_block_stats`].
    #[inline]
    pub fn target_gap_count(&self) -> u32 {
        self.x_gc
    }

    /// Best metric value found so far (target's own, until a scan wins).
    #[inline]
    pub fn best_metric_value(&self) -> u32 {
        self.x_best_metric
    }

    /// Winning metric kind of the last scan.
    #[inline]
    pub fn match_kind(&self) -> MatchKind {
        self.x_kind
    }

    /// Winning wave digest of the last scan.
    #[inline]
    pub fn xor_digest(&self) -> u64 {
        self.digest
    }

    /// List position of the winning reference.
    #[inline]
    pub fn found_ref(&self) -> usize {
        self.found_ref
    }

    /// Phase 1: profile the target block (per-wave GAP/bit counts and the
    /// block-level best metric).
    pub fn compute_block_stats(&mut self, block: &BitBlock) {
        for i in 0..BLOCK_WAVES {
            let off = i * WAVE_WORDS;
            let (gc, bc) = block::words_run_and_bit_count(&block[off..off + WAVE_WORDS]);
            self.descr.gc[i] = gc as u16;
            self.descr.bc[i] = bc as u16;
        }
        let (gc, bc) = block::words_run_and_bit_count(&block[..]);
        self.x_gc = gc;
        self.x_bc = bc;
        let (kind, best) = best_metric(bc, gc);
        self.x_kind = kind;
        self.x_block_best = best;
        self.x_best_metric = best;
    }

    /// Phase 2: scan dense reference blocks `[ri_from, ri_to)` at block
    /// coordinate `nb`, retaining the reference with the largest gain.
    /// `tb` is caller scratch for the trial XOR product.
    ///
    /// Returns true when a reference beat the target's own best metric.
    pub fn search_best_mask(
        &mut self,
        block: &BitBlock,
        refs: &RefVector<'_>,
        nb: u64,
        ri_from: usize,
        ri_to: usize,
        tb: &mut BitBlock,
    ) -> bool {
        let ri_to = ri_to.min(refs.len());
        let mut best_gain = 0u32;
        let mut best_ri = None;
        let mut d64 = 0u64;

        for ri in ri_from..ri_to {
            let rb = match refs.get_block(ri, nb) {
                BlockSlot::Bit(b) => &**b,
                _ => continue,
            };
            let (_, digest, gain) = compute_xor_match(block, rb, &mut self.descr);
            if digest != 0 && gain > best_gain {
                best_gain = gain;
                best_ri = Some(ri);
                d64 = digest;
                if gain >= BITS_IN_BLOCK as u32 {
                    break;
                }
            }
        }

        let mut found = false;
        if let Some(ri) = best_ri {
            let bie_limit = (BITS_IN_BLOCK as f32 / self.bits_per_int) as u32;
            let rb = match refs.get_block(ri, nb) {
                BlockSlot::Bit(b) => &**b,
                _ => unreachable!(),
            };
            block::xor_into_masked(tb, block, rb, d64);
            let (xor_gc, xor_bc) = block::words_run_and_bit_count(&tb[..]);
            if xor_bc == 0 {
                // possibly an identical block
                self.x_best_metric = 0;
                self.x_kind = MatchKind::BitCount;
                self.found_ref = ri;
                found = true;
            } else {
                if xor_gc < self.x_best_metric && xor_gc < bie_limit {
                    self.x_best_metric = xor_gc;
                    self.x_kind = MatchKind::GapCount;
                    self.found_ref = ri;
                    found = true;
                }
                if xor_bc < self.x_best_metric && xor_bc < bie_limit {
                    self.x_best_metric = xor_bc;
                    self.x_kind = MatchKind::BitCount;
                    self.found_ref = ri;
                    found = true;
                }
                let xor_ibc = BITS_IN_BLOCK as u32 - xor_bc;
                if xor_ibc < self.x_best_metric && xor_ibc < bie_limit {
                    self.x_best_metric = xor_ibc;
                    self.x_kind = MatchKind::InvBitCount;
                    self.found_ref = ri;
                    found = true;
                }
            }
        }
        self.digest = d64;
        found
    }

    /// Scan GAP reference blocks when the target itself is a GAP block of
    /// length > 3. Scores in the run-length domain; `scratch` must be able
    /// to hold 3x the largest level.
    pub fn search_best_gap(
        &mut self,
        target: &GapBlock,
        refs: &RefVector<'_>,
        nb: u64,
        ri_from: usize,
        ri_to: usize,
        scratch: &mut Vec<u16>,
    ) -> bool {
        let ri_to = ri_to.min(refs.len());
        if target.len() <= 3 {
            return false;
        }
        let bc = target.count();
        let mut best = (target.len() as u32).min(bc);
        let mut found = false;

        for ri in ri_from..ri_to {
            let rg = match refs.get_block(ri, nb) {
                BlockSlot::Gap(g) => g,
                _ => continue,
            };
            if rg.len() <= 3 {
                continue;
            }
            let sv = gap::gap_op_into(target, rg, SetOp::Xor, scratch);
            let res_len = scratch.len() as u32;
            let res_bc = gap::runs_bit_count(sv, scratch);
            if res_bc == 0 {
                // identical block
                best = 0;
                found = true;
                self.found_ref = ri;
                self.x_kind = MatchKind::BitCount;
                self.x_best_metric = 0;
                break;
            }
            if res_len < best && best - res_len > 2 {
                best = res_len;
                found = true;
                self.found_ref = ri;
                self.x_kind = MatchKind::GapCount;
                self.x_best_metric = best;
            }
            if res_bc < best && best - res_bc > 2 {
                best = res_bc;
                found = true;
                self.found_ref = ri;
                self.x_kind = MatchKind::BitCount;
                self.x_best_metric = best;
            }
            let res_ibc = BITS_IN_BLOCK as u32 - res_bc;
            if res_ibc < best && best - res_ibc > 2 {
                best = res_ibc;
                found = true;
                self.found_ref = ri;
                self.x_kind = MatchKind::InvBitCount;
                self.x_best_metric = best;
            }
            if best <= 1 {
                break;
            }
        }
        found
    }

    /// Phase 3: materialize the winning XOR product into `out` and accept
    /// the match only when its gain clears the cost of storing the
    /// reference (token, digest, reference index), or the blocks are
    /// bit-for-bit equal.
    pub fn validate(&self, out: &mut BitBlock, block: &BitBlock, key: &BitBlock) -> MatchKind {
        let d64 = self.digest;
        debug_assert!(d64 != 0);
        block::xor_into_masked(out, block, key, d64);
        let (gc, bc) = block::words_run_and_bit_count(&out[..]);
        let (kind, best) = best_metric(bc, gc);

        if kind == MatchKind::BitCount && bc == 0 && block::find_first_diff(block, key).is_none() {
            return MatchKind::Equal;
        }

        if best < self.x_block_best {
            let gain = ((self.x_block_best - best) as f32 * self.bits_per_int) as u32;
            // token (1 byte) + digest (8 bytes) + reference index (4 bytes)
            let overhead_bits = 8 * (1 + 8 + 4);
            if gain > overhead_bits {
                return kind;
            }
        }
        MatchKind::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{new_zero_block, set_bit};
    use crate::gap::DEFAULT_GAP_LEVELS;
    use crate::store::AllocStrategy;
    use crate::vector::{BitVector, SortOrder, VectorConfig};

    fn dense_vector(bits: &[u64]) -> BitVector {
        let mut bv = BitVector::with_size(1 << 24);
        bv.set_ids(bits, SortOrder::Unknown).unwrap();
        bv
    }

    #[test]
    fn test_best_metric_tie_breaks() {
        // sparse block: bc smallest
        assert_eq!(best_metric(10, 20), (MatchKind::BitCount, 10));
        // runny block: gc smallest
        assert_eq!(best_metric(30_000, 8), (MatchKind::GapCount, 8));
        // dense block: ibc smallest
        assert_eq!(best_metric(65_000, 70_000), (MatchKind::InvBitCount, 536));
        // all ones
        assert_eq!(best_metric(65_536, 1), (MatchKind::GapCount, 1));
    }

    #[test]
    fn test_identical_blocks_report_equal() {
        // target: 64 bits inside wave 3, zero elsewhere
        let mut target = new_zero_block();
        for k in 0..64 {
            set_bit(&mut target, 3 * 1024 + k, true);
        }
        let bits: Vec<u64> = (0..64u64).map(|k| 3 * 1024 + k).collect();
        let refs_owner = dense_vector(&bits);
        let mut refs = RefVector::new();
        refs.add(&refs_owner, 0);

        let mut scanner = XorScanner::new();
        scanner.compute_block_stats(&target);
        let mut tb = new_zero_block();
        let found = scanner.search_best_mask(&target, &refs, 0, 0, refs.len(), &mut tb);
        assert!(found);
        assert_eq!(scanner.found_ref(), 0);
        assert!(scanner.xor_digest() & (1 << 3) != 0);

        let key = match refs.get_block(0, 0) {
            BlockSlot::Bit(b) => &**b,
            _ => panic!("expected dense reference"),
        };
        let mut out = new_zero_block();
        let kind = scanner.validate(&mut out, &target, key);
        assert_eq!(kind, MatchKind::Equal);
        assert!(block::is_all_zero(&out));
    }

    #[test]
    fn test_partial_overlap_wins_a_metric() {
        // target has two busy waves; the reference cancels one of them
        let mut target = new_zero_block();
        for k in (0..1024).step_by(2) {
            set_bit(&mut target, k, true); // wave 0: alternating, expensive
        }
        for k in 0..32 {
            set_bit(&mut target, 5 * 1024 + k * 4, true); // wave 5
        }
        let wave0: Vec<u64> = (0..1024u64).step_by(2).collect();
        let refs_owner = dense_vector(&wave0);
        let mut refs = RefVector::new();
        refs.add(&refs_owner, 7);

        let mut scanner = XorScanner::new();
        scanner.compute_block_stats(&target);
        let mut tb = new_zero_block();
        let found = scanner.search_best_mask(&target, &refs, 0, 0, refs.len(), &mut tb);
        assert!(found);
        assert_eq!(scanner.xor_digest() & 1, 1); // wave 0 masked
        assert_eq!(refs.row(scanner.found_ref()), 7);

        let key = match refs.get_block(0, 0) {
            BlockSlot::Bit(b) => &**b,
            _ => panic!(),
        };
        let mut out = new_zero_block();
        let kind = scanner.validate(&mut out, &target, key);
        assert_ne!(kind, MatchKind::None);
        // the masked waves cancelled: wave 0 gone, wave 5 untouched
        assert!(!block::test_bit(&out, 0));
        assert!(block::test_bit(&out, 5 * 1024));
    }

    #[test]
    fn test_unrelated_reference_is_no_match() {
        let mut target = new_zero_block();
        set_bit(&mut target, 100, true);
        let refs_owner = dense_vector(&[9_000_000]); // block 137, block 0 empty
        let mut refs = RefVector::new();
        refs.add(&refs_owner, 0);

        let mut scanner = XorScanner::new();
        scanner.compute_block_stats(&target);
        let mut tb = new_zero_block();
        // the reference's block 0 is Empty, never a candidate
        assert!(!scanner.search_best_mask(&target, &refs, 0, 0, refs.len(), &mut tb));
        assert_eq!(scanner.xor_digest(), 0);
    }

    #[test]
    fn test_gap_domain_scan() {
        let mut target_owner = BitVector::with_config(VectorConfig {
            size: 1 << 24,
            strategy: AllocStrategy::Gap,
            gap_levels: DEFAULT_GAP_LEVELS,
        });
        let mut ref_owner = BitVector::with_config(VectorConfig {
            size: 1 << 24,
            strategy: AllocStrategy::Gap,
            gap_levels: DEFAULT_GAP_LEVELS,
        });
        // near-identical run structures
        for p in [10u64, 11, 12, 500, 501, 900] {
            target_owner.set(p).unwrap();
            ref_owner.set(p).unwrap();
        }
        target_owner.set(2000).unwrap();

        let target = match target_owner.store().slot(0) {
            BlockSlot::Gap(g) => g.clone(),
            _ => panic!("expected GAP block"),
        };
        let mut refs = RefVector::new();
        refs.add(&ref_owner, 3);

        let mut scanner = XorScanner::new();
        let mut scratch = Vec::new();
        let found = scanner.search_best_gap(&target, &refs, 0, 0, refs.len(), &mut scratch);
        assert!(found);
        assert_eq!(scanner.match_kind(), MatchKind::GapCount);
        assert_eq!(refs.row(scanner.found_ref()), 3);
    }

    #[test]
    fn test_refvector_lookup() {
        let a = dense_vector(&[1]);
        let b = dense_vector(&[2]);
        let mut refs = RefVector::new();
        refs.add(&a, 10);
        refs.add(&b, 20);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs.find_row(20), Some(1));
        assert_eq!(refs.find_row(30), None);
    }
}
