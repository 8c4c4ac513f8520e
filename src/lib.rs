//! # Sparsebits
//!
//! Compressed, dynamically-sized bit vectors with a full set-algebra engine.
//!
//! A [`BitVector`] logically represents a very large sparse or dense set of
//! integer ids (up to 2^48 positions). Storage is a two-level block tree:
//! all-zero and all-one blocks take no memory, dense blocks hold a 65,536-bit
//! bitmap, and runny blocks collapse to a run-length (GAP) encoding. Every
//! set operation works block-by-block in whichever representation is
//! cheapest.
//!
//! ## Quick Start
//!
//! ```
//! use sparsebits::BitVector;
//!
//! let mut bv = BitVector::with_size(1 << 20);
//! bv.set(17).unwrap();
//! bv.set(100_000).unwrap();
//!
//! assert_eq!(bv.count(), 2);
//! assert!(bv.test(100_000));
//!
//! // rank/select through a prebuilt index
//! let rs = bv.build_rs_index();
//! assert_eq!(bv.rank(100_000, &rs), 2);
//! assert_eq!(bv.select(1, &rs), Some(17));
//!
//! // set algebra
//! let other = BitVector::from_positions(&[17, 40_000]).unwrap();
//! let mut and = bv.clone();
//! and.and_with(&other);
//! assert_eq!(and.count(), 1);
//! ```
//!
//! ## Cargo features
//!
//! - `std` (default) — link the standard library. Turning it off leaves a
//!   `no_std` crate that only needs `alloc`.
//! - `serde` — serialization of the block tree.
//! - `portable-popcount` — count bits with the pure bitwise routine, no
//!   reliance on a native instruction. Takes precedence over `simd`.
//! - `simd` — benchmark knob pinning the counting path to the hardware
//!   popcount instruction.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

// Heap containers resolve through `alloc::` paths everywhere. On std
// builds, and under test where the harness needs std anyway, the alias
// points at std so the same paths keep working.
#[cfg(not(any(feature = "std", test)))]
extern crate alloc;
#[cfg(any(feature = "std", test))]
extern crate std as alloc;

pub mod block;
mod error;
pub mod gap;
mod iter;
pub mod popcount;
mod rs_index;
pub mod store;
mod vector;
pub mod xor;

#[cfg(feature = "serde")]
mod serde_support;

pub use error::Error;
pub use gap::{GapBlock, GapLevels, DEFAULT_GAP_LEVELS};
pub use iter::OnesIter;
pub use popcount::{popcount_word, popcount_words};
pub use rs_index::{RsIndex, RS_BORDER0, RS_BORDER1};
pub use store::{AllocStrategy, OptMode, OptStat};
pub use vector::{BitMut, BitVector, SortOrder, Stat, VectorConfig};
pub use xor::{MatchKind, RefVector, XorScanner};

/// Bits covered by one block.
pub const BITS_IN_BLOCK: usize = 65_536;

/// 64-bit words per block.
pub const BLOCK_WORDS: usize = BITS_IN_BLOCK / 64;

/// Shift turning a position into its block index.
pub const BLOCK_SHIFT: u32 = 16;

/// Block slots per sub-array.
pub const BLOCKS_IN_SUB: usize = 256;

/// Digest waves per block (1024 bits each).
pub const BLOCK_WAVES: usize = 64;

/// 64-bit words per digest wave.
pub const WAVE_WORDS: usize = BLOCK_WORDS / BLOCK_WAVES;

/// Width of the addressable id space.
pub const ADDRESS_BITS: u32 = 48;

/// First unaddressable position.
pub const MAX_BITS: u64 = 1u64 << ADDRESS_BITS;

/// Set-algebra operation selector, shared by the run-length codec and the
/// block-combine dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOp {
    And,
    Or,
    Sub,
    Xor,
}
