mod quick_reject;
mod refinement;

pub use self::quick_reject::{ApproxFilter, QuickRejectClassifier, QuickRejectParams, RectValue};
pub use self::refinement::RefinementClassifier;

/// Result of a cascade evaluation: the index of the last evaluated filter and
/// the hyperplane distance at that filter level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelAndDistance {
    level: usize,
    distance: f64,
}

impl LevelAndDistance {
    pub fn new(level: usize, distance: f64) -> Self {
        LevelAndDistance { level, distance }
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.level
    }

    #[inline]
    pub fn distance(&self) -> f64 {
        self.distance
    }
}
