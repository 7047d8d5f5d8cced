//! Pending-Set Tracker
//!
//! A `PendingSet` records which members of an index range `[0, len)` are
//! currently invalid: an upstream dependency has signaled that a new value is
//! coming, but the value has not arrived yet. The derivation engine keeps one
//! tracker per active derivation and withholds recomputation until the
//! tracker reports nothing pending.
//!
//! # Representation
//!
//! The tracker picks its storage from the length it is constructed with:
//!
//! - `0` indices: no storage; nothing can ever be pending.
//! - `1` index: a single boolean.
//! - up to one machine word of indices: a single bitmask.
//! - anything larger: one bitmask per word-sized group plus a live count of
//!   nonzero groups, so `pending()` stays O(1) at unbounded length and
//!   updates stay O(1) amortized (the count moves only when a group's mask
//!   transitions to or from zero).

use smallvec::{smallvec, SmallVec};

const WORD_BITS: usize = usize::BITS as usize;

/// Tracks which indices of a fixed range are currently invalid.
#[derive(Debug, Clone)]
pub enum PendingSet {
    /// Zero indices; all operations are no-ops.
    Empty,

    /// Exactly one index.
    Single(bool),

    /// Up to `usize::BITS` indices in one mask.
    Word(usize),

    /// More than one word of indices.
    Groups {
        /// One mask per word-sized group of indices.
        words: SmallVec<[usize; 4]>,
        /// Number of masks that are currently nonzero.
        dirty_words: usize,
    },
}

impl PendingSet {
    /// Create a tracker for `len` distinct indices, all initially valid.
    pub fn new(len: usize) -> Self {
        match len {
            0 => Self::Empty,
            1 => Self::Single(false),
            n if n <= WORD_BITS => Self::Word(0),
            n => Self::Groups {
                words: smallvec![0; n.div_ceil(WORD_BITS)],
                dirty_words: 0,
            },
        }
    }

    /// Mark `index` invalid.
    ///
    /// `index` must be within the length the tracker was constructed with.
    pub fn invalidate(&mut self, index: usize) {
        match self {
            Self::Empty => {}
            Self::Single(flag) => {
                debug_assert_eq!(index, 0);
                *flag = true;
            }
            Self::Word(mask) => {
                debug_assert!(index < WORD_BITS);
                *mask |= 1 << index;
            }
            Self::Groups { words, dirty_words } => {
                debug_assert!(index / WORD_BITS < words.len());
                let word = &mut words[index / WORD_BITS];
                if *word == 0 {
                    *dirty_words += 1;
                }
                *word |= 1 << (index % WORD_BITS);
            }
        }
    }

    /// Mark `index` valid.
    pub fn validate(&mut self, index: usize) {
        match self {
            Self::Empty => {}
            Self::Single(flag) => {
                debug_assert_eq!(index, 0);
                *flag = false;
            }
            Self::Word(mask) => {
                debug_assert!(index < WORD_BITS);
                *mask &= !(1 << index);
            }
            Self::Groups { words, dirty_words } => {
                debug_assert!(index / WORD_BITS < words.len());
                let word = &mut words[index / WORD_BITS];
                if *word != 0 {
                    *word &= !(1 << (index % WORD_BITS));
                    if *word == 0 {
                        *dirty_words -= 1;
                    }
                }
            }
        }
    }

    /// True iff at least one index is currently invalid.
    pub fn pending(&self) -> bool {
        match self {
            Self::Empty => false,
            Self::Single(flag) => *flag,
            Self::Word(mask) => *mask != 0,
            Self::Groups { dirty_words, .. } => *dirty_words != 0,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
