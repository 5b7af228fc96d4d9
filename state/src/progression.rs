use borsh::{BorshDeserialize, BorshSerialize};
use serde_derive::{Deserialize, Serialize};

/// How the block number of a transition must relate to the block number of the transition
/// before it.
#[derive(Serialize, Deserialize, BorshSerialize, BorshDeserialize, Clone, Copy, Default, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum BlockProgression {
    /// `block >= previous`. Several deposits can land in one block.
    #[default]
    NonDecreasing,
    /// `block > previous`.
    StrictlyIncreasing,
    /// `block == previous + 1`.
    Consecutive,
}

impl BlockProgression {
    /// Smallest admissible distance between consecutive block numbers.
    pub fn min_step(&self) -> u64 {
        match self {
            BlockProgression::NonDecreasing => 0,
            BlockProgression::StrictlyIncreasing | BlockProgression::Consecutive => 1,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, BlockProgression::Consecutive)
    }

    pub fn allows(&self, previous: u64, block: u64) -> bool {
        match self {
            BlockProgression::NonDecreasing => block >= previous,
            BlockProgression::StrictlyIncreasing => block > previous,
            BlockProgression::Consecutive => previous.checked_add(1) == Some(block),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BlockProgression::*;

    #[test]
    fn non_decreasing_accepts_same_block() {
        assert!(NonDecreasing.allows(10, 10));
        assert!(NonDecreasing.allows(10, 30));
        assert!(!NonDecreasing.allows(10, 9));
    }

    #[test]
    fn strictly_increasing_rejects_same_block() {
        assert!(!StrictlyIncreasing.allows(10, 10));
        assert!(StrictlyIncreasing.allows(10, 11));
        assert!(StrictlyIncreasing.allows(10, 500));
    }

    #[test]
    fn consecutive_only_accepts_next_block() {
        assert!(Consecutive.allows(10, 11));
        assert!(!Consecutive.allows(10, 12));
        assert!(!Consecutive.allows(10, 10));
        assert!(!Consecutive.allows(u64::MAX, 0));
    }
}
