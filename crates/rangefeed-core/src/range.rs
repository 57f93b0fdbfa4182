//! Feed ranges: half-open slices of a container's effective partition key space.
//!
//! Boundaries are upper-case hex strings compared lexicographically, with
//! `""` as the lowest key and `"FF"` as the highest. A range `[min, max)`
//! is immutable once observed; topology changes show up as new ranges that
//! either split an old one or merge several old ones.
//!
//! # Classification
//!
//! ```text
//! old: [00,80) [80,FF)          new: [00,40) [40,80) [80,FF)
//!        │        └──────────────────────────────────┘  Unchanged
//!        └── SplitChild ──┬─ [00,40)
//!                         └─ [40,80)
//!
//! old: [00,40) [40,80)          new: [00,80)
//!        └───────┴── MergeResult ──┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest boundary of the key space.
pub const MIN_BOUNDARY: &str = "";

/// Highest boundary of the key space.
pub const MAX_BOUNDARY: &str = "FF";

/// A range boundary pair that cannot describe a valid feed range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed range [{min},{max}): {reason}")]
pub struct MalformedRangeError {
    pub min: String,
    pub max: String,
    pub reason: String,
}

impl MalformedRangeError {
    fn new(min: &str, max: &str, reason: impl Into<String>) -> Self {
        Self {
            min: min.to_string(),
            max: max.to_string(),
            reason: reason.into(),
        }
    }
}

/// A half-open `[min, max)` slice of a container's key space.
///
/// Ordering is `(min, max)` lexicographic, which is also the order the
/// partitioner uses to lay out units deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct Range {
    min: String,
    max: String,
}

#[derive(Deserialize)]
struct RawRange {
    min: String,
    max: String,
}

impl TryFrom<RawRange> for Range {
    type Error = MalformedRangeError;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        Range::new(raw.min, raw.max)
    }
}

impl Range {
    /// Build a range from its boundaries, normalising hex digits to upper case.
    pub fn new(min: impl Into<String>, max: impl Into<String>) -> Result<Self, MalformedRangeError> {
        let min = min.into().to_ascii_uppercase();
        let max = max.into().to_ascii_uppercase();

        if let Some(c) = min.chars().chain(max.chars()).find(|c| !c.is_ascii_hexdigit()) {
            return Err(MalformedRangeError::new(
                &min,
                &max,
                format!("non-hex character {c:?} in boundary"),
            ));
        }
        if max.is_empty() {
            return Err(MalformedRangeError::new(&min, &max, "empty upper boundary"));
        }
        if min >= max {
            return Err(MalformedRangeError::new(
                &min,
                &max,
                "lower boundary is not below upper boundary",
            ));
        }

        Ok(Self { min, max })
    }

    /// The whole key space `["", "FF")`.
    pub fn full() -> Self {
        Self {
            min: MIN_BOUNDARY.to_string(),
            max: MAX_BOUNDARY.to_string(),
        }
    }

    /// Inclusive lower boundary.
    pub fn min_inclusive(&self) -> &str {
        &self.min
    }

    /// Exclusive upper boundary.
    pub fn max_exclusive(&self) -> &str {
        &self.max
    }

    /// True if `other` lies entirely inside this range (equality included).
    pub fn contains(&self, other: &Range) -> bool {
        self.min <= other.min && other.max <= self.max
    }

    /// True if the two ranges share at least one key.
    pub fn overlaps(&self, other: &Range) -> bool {
        self.min < other.max && other.min < self.max
    }

    /// True if this range is a strict subset of `parent`.
    pub fn is_child_of(&self, parent: &Range) -> bool {
        parent.contains(self) && self != parent
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.min, self.max)
    }
}

/// Reject range lists that overlap or repeat a range.
pub fn validate_disjoint(ranges: &[Range]) -> Result<(), MalformedRangeError> {
    let mut sorted: Vec<&Range> = ranges.iter().collect();
    sorted.sort();
    for pair in sorted.windows(2) {
        if pair[0].max > pair[1].min {
            return Err(MalformedRangeError::new(
                &pair[1].min,
                &pair[1].max,
                format!("overlaps {}", pair[0]),
            ));
        }
    }
    Ok(())
}

/// True if `parts` tile `whole` exactly: contiguous, non-overlapping, same outer boundaries.
pub fn union_is_exactly(parts: &[&Range], whole: &Range) -> bool {
    let mut sorted = parts.to_vec();
    sorted.sort();

    let (Some(first), Some(last)) = (sorted.first(), sorted.last()) else {
        return false;
    };
    if first.min != whole.min || last.max != whole.max {
        return false;
    }
    sorted.windows(2).all(|pair| pair[0].max == pair[1].min)
}

/// How a current range relates to the previously persisted topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeLineage {
    /// Present unchanged in the old topology.
    Unchanged,
    /// Strict subset of a single old range that is gone.
    SplitChild { parent: Range },
    /// Exact union of two or more old ranges.
    MergeResult { parents: Vec<Range> },
    /// Overlaps the old topology in a way that is neither a split nor a
    /// merge, or does not overlap it at all.
    Unclassified { overlapping: Vec<Range> },
}

/// A current range paired with its lineage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedRange {
    pub range: Range,
    pub lineage: RangeLineage,
}

/// Result of comparing an old and a new range set for one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyDiff {
    /// Every new range, in `(min, max)` order.
    pub ranges: Vec<ClassifiedRange>,
    /// Old ranges that no longer exist as-is.
    pub retired: Vec<Range>,
}

impl TopologyDiff {
    /// True if old and new describe the same range set.
    pub fn is_stable(&self) -> bool {
        self.retired.is_empty()
            && self
                .ranges
                .iter()
                .all(|r| r.lineage == RangeLineage::Unchanged)
    }
}

/// Classify each range of `new` against `old` (both for the same container).
pub fn classify(old: &[Range], new: &[Range]) -> TopologyDiff {
    let mut current: Vec<&Range> = new.iter().collect();
    current.sort();
    current.dedup();

    let ranges = current
        .iter()
        .map(|range| ClassifiedRange {
            range: (*range).clone(),
            lineage: lineage_of(range, old),
        })
        .collect();

    let mut retired: Vec<Range> = old
        .iter()
        .filter(|o| !new.contains(o))
        .cloned()
        .collect();
    retired.sort();
    retired.dedup();

    TopologyDiff { ranges, retired }
}

fn lineage_of(range: &Range, old: &[Range]) -> RangeLineage {
    let mut overlapping: Vec<&Range> = old.iter().filter(|o| o.overlaps(range)).collect();
    overlapping.sort();
    overlapping.dedup();

    match overlapping.as_slice() {
        [only] if *only == range => RangeLineage::Unchanged,
        [only] if range.is_child_of(only) => RangeLineage::SplitChild {
            parent: (*only).clone(),
        },
        [_, _, ..]
            if overlapping.iter().all(|o| range.contains(o))
                && union_is_exactly(&overlapping, range) =>
        {
            RangeLineage::MergeResult {
                parents: overlapping.iter().map(|o| (*o).clone()).collect(),
            }
        }
        _ => RangeLineage::Unclassified {
            overlapping: overlapping.iter().map(|o| (*o).clone()).collect(),
        },
    }
}
