use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::region::Visibility;

/// A constraint on the number of mines inside a set of cells, plus the two
/// action-only tags a rule can carry instead of a count constraint.
///
/// The count kinds are the only ones that may be evaluated with [`apply`];
/// `Reveal` and `Visibility` exist so a rule action fits in the same slot as
/// a derived-region predicate, and are never tested against a count.
///
/// [`apply`]: RegionType::apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionType {
    /// No constraint; vacuously true.
    None,
    Equal(u8),
    NotEqual(u8),
    AtMost(u8),
    AtLeast(u8),
    /// n == v or n == v + 2.
    Xor2(u8),
    /// n == v or n == v + 3.
    Xor3(u8),
    /// n in {v, v + 2, v + 4}.
    Xor22(u8),
    /// n in {v, v + 2, v + 4, v + 6}.
    Xor222(u8),
    /// Action tag: resolve the selected cells as clear (false) or mined (true).
    Reveal(bool),
    /// Action tag: move the bound regions to a display tier.
    Visibility(Visibility),
}

// Packed wire form: a kind tag in the high bits, the value in the low byte.
// Values below the tag range are the legacy untagged form.
const PACK_BASE: i32 = 0x100;

impl RegionType {
    pub fn is_action(self) -> bool {
        matches!(self, RegionType::Reveal(_) | RegionType::Visibility(_))
    }

    /// A kind that constrains a count (everything except the action tags).
    pub fn is_count(self) -> bool {
        !self.is_action()
    }

    /// Tests the constraint against a mine count.
    pub fn apply(self, n: u32) -> bool {
        debug_assert!(self.is_count(), "action tag evaluated as a predicate");
        match self {
            RegionType::None => true,
            RegionType::Equal(v) => n == u32::from(v),
            RegionType::NotEqual(v) => n != u32::from(v),
            RegionType::AtMost(v) => n <= u32::from(v),
            RegionType::AtLeast(v) => n >= u32::from(v),
            RegionType::Xor2(_)
            | RegionType::Xor3(_)
            | RegionType::Xor22(_)
            | RegionType::Xor222(_) => self
                .finite_values()
                .map(|vs| vs.contains(&n))
                .unwrap_or(false),
            RegionType::Reveal(_) | RegionType::Visibility(_) => false,
        }
    }

    /// The largest count the constraint can accept, if it has one.
    pub fn upper_bound(self) -> Option<u32> {
        match self {
            RegionType::Equal(v) | RegionType::AtMost(v) => Some(u32::from(v)),
            RegionType::Xor2(v) => Some(u32::from(v) + 2),
            RegionType::Xor3(v) => Some(u32::from(v) + 3),
            RegionType::Xor22(v) => Some(u32::from(v) + 4),
            RegionType::Xor222(v) => Some(u32::from(v) + 6),
            RegionType::None | RegionType::NotEqual(_) | RegionType::AtLeast(_) => None,
            RegionType::Reveal(_) | RegionType::Visibility(_) => Some(0),
        }
    }

    /// The line above which the constraint's verdict no longer depends on `n`.
    pub fn horizon(self) -> u32 {
        match self {
            RegionType::None | RegionType::Reveal(_) | RegionType::Visibility(_) => 0,
            RegionType::Equal(v)
            | RegionType::NotEqual(v)
            | RegionType::AtMost(v)
            | RegionType::AtLeast(v) => u32::from(v),
            RegionType::Xor2(v) => u32::from(v) + 2,
            RegionType::Xor3(v) => u32::from(v) + 3,
            RegionType::Xor22(v) => u32::from(v) + 4,
            RegionType::Xor222(v) => u32::from(v) + 6,
        }
    }

    /// The exact accepted counts for kinds that accept a finite set.
    pub fn finite_values(self) -> Option<Vec<u32>> {
        let (v, offsets): (u8, &[u32]) = match self {
            RegionType::Equal(v) => (v, &[0]),
            RegionType::Xor2(v) => (v, &[0, 2]),
            RegionType::Xor3(v) => (v, &[0, 3]),
            RegionType::Xor22(v) => (v, &[0, 2, 4]),
            RegionType::Xor222(v) => (v, &[0, 2, 4, 6]),
            _ => return None,
        };
        Some(offsets.iter().map(|o| u32::from(v) + o).collect())
    }

    /// Same kind with the value lowered by `by` mines already accounted for.
    pub fn reduce(self, by: u32) -> RegionType {
        let cut = |v: u8| v.saturating_sub(by.min(255) as u8);
        match self {
            RegionType::Equal(v) => RegionType::Equal(cut(v)),
            RegionType::NotEqual(v) => RegionType::NotEqual(cut(v)),
            RegionType::AtMost(v) => RegionType::AtMost(cut(v)),
            RegionType::AtLeast(v) => RegionType::AtLeast(cut(v)),
            RegionType::Xor2(v) => RegionType::Xor2(cut(v)),
            RegionType::Xor3(v) => RegionType::Xor3(cut(v)),
            RegionType::Xor22(v) => RegionType::Xor22(cut(v)),
            RegionType::Xor222(v) => RegionType::Xor222(cut(v)),
            other => other,
        }
    }

    /// Packs kind and value into one integer for the wire format.
    pub fn pack(self) -> i32 {
        match self {
            RegionType::None => -1,
            RegionType::Equal(v) => PACK_BASE + i32::from(v),
            RegionType::NotEqual(v) => 2 * PACK_BASE + i32::from(v),
            RegionType::AtMost(v) => 3 * PACK_BASE + i32::from(v),
            RegionType::AtLeast(v) => 4 * PACK_BASE + i32::from(v),
            RegionType::Xor2(v) => 5 * PACK_BASE + i32::from(v),
            RegionType::Xor3(v) => 6 * PACK_BASE + i32::from(v),
            RegionType::Xor22(v) => 7 * PACK_BASE + i32::from(v),
            RegionType::Xor222(v) => 8 * PACK_BASE + i32::from(v),
            RegionType::Reveal(flag) => 9 * PACK_BASE + i32::from(flag),
            RegionType::Visibility(t) => 10 * PACK_BASE + i32::from(t.level()),
        }
    }

    /// Unpacks the wire form.
    ///
    /// An untagged value (below the tag range) is the legacy encoding:
    /// negative means unconstrained, anything else is `Equal(value)`.
    pub fn unpack(raw: i32) -> anyhow::Result<RegionType> {
        if raw < PACK_BASE {
            return Ok(if raw < 0 {
                RegionType::None
            } else {
                RegionType::Equal(raw as u8)
            });
        }
        let value = (raw % PACK_BASE) as u8;
        Ok(match raw / PACK_BASE {
            1 => RegionType::Equal(value),
            2 => RegionType::NotEqual(value),
            3 => RegionType::AtMost(value),
            4 => RegionType::AtLeast(value),
            5 => RegionType::Xor2(value),
            6 => RegionType::Xor3(value),
            7 => RegionType::Xor22(value),
            8 => RegionType::Xor222(value),
            9 => RegionType::Reveal(value != 0),
            10 => RegionType::Visibility(Visibility::from_level(value)?),
            tag => bail!("unknown region type tag {tag}"),
        })
    }
}

impl fmt::Display for RegionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionType::None => write!(f, "any"),
            RegionType::Equal(v) => write!(f, "={v}"),
            RegionType::NotEqual(v) => write!(f, "!={v}"),
            RegionType::AtMost(v) => write!(f, "<={v}"),
            RegionType::AtLeast(v) => write!(f, ">={v}"),
            RegionType::Xor2(v) => write!(f, "={v}|{}", v + 2),
            RegionType::Xor3(v) => write!(f, "={v}|{}", v + 3),
            RegionType::Xor22(v) => write!(f, "={v}|{}|{}", v + 2, v + 4),
            RegionType::Xor222(v) => write!(f, "={v}|{}|{}|{}", v + 2, v + 4, v + 6),
            RegionType::Reveal(false) => write!(f, "reveal-clear"),
            RegionType::Reveal(true) => write!(f, "reveal-mine"),
            RegionType::Visibility(t) => write!(f, "show-as-{t:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_kinds_match_their_formulas() {
        for n in 0..16u32 {
            assert!(RegionType::None.apply(n));
            assert_eq!(RegionType::Equal(3).apply(n), n == 3);
            assert_eq!(RegionType::NotEqual(3).apply(n), n != 3);
            assert_eq!(RegionType::AtMost(3).apply(n), n <= 3);
            assert_eq!(RegionType::AtLeast(3).apply(n), n >= 3);
            assert_eq!(RegionType::Xor2(1).apply(n), n == 1 || n == 3);
            assert_eq!(RegionType::Xor3(1).apply(n), n == 1 || n == 4);
            assert_eq!(RegionType::Xor22(1).apply(n), [1, 3, 5].contains(&n));
            assert_eq!(RegionType::Xor222(1).apply(n), [1, 3, 5, 7].contains(&n));
        }
    }

    #[test]
    fn upper_bounds() {
        assert_eq!(RegionType::Equal(4).upper_bound(), Some(4));
        assert_eq!(RegionType::AtMost(4).upper_bound(), Some(4));
        assert_eq!(RegionType::Xor2(4).upper_bound(), Some(6));
        assert_eq!(RegionType::Xor3(4).upper_bound(), Some(7));
        assert_eq!(RegionType::Xor22(4).upper_bound(), Some(8));
        assert_eq!(RegionType::Xor222(4).upper_bound(), Some(10));
        assert_eq!(RegionType::NotEqual(4).upper_bound(), None);
        assert_eq!(RegionType::AtLeast(4).upper_bound(), None);
        assert_eq!(RegionType::None.upper_bound(), None);
    }

    #[test]
    fn reduce_lowers_the_value() {
        assert_eq!(RegionType::Equal(3).reduce(1), RegionType::Equal(2));
        assert_eq!(RegionType::Equal(1).reduce(4), RegionType::Equal(0));
        assert_eq!(RegionType::Xor2(2).reduce(2), RegionType::Xor2(0));
        assert_eq!(RegionType::Reveal(true).reduce(1), RegionType::Reveal(true));
    }

    #[test]
    fn pack_round_trips() {
        let all = [
            RegionType::None,
            RegionType::Equal(7),
            RegionType::NotEqual(0),
            RegionType::AtMost(2),
            RegionType::AtLeast(9),
            RegionType::Xor2(1),
            RegionType::Xor3(2),
            RegionType::Xor22(3),
            RegionType::Xor222(0),
            RegionType::Reveal(false),
            RegionType::Reveal(true),
            RegionType::Visibility(Visibility::Hidden),
        ];
        for kind in all {
            assert_eq!(RegionType::unpack(kind.pack()).unwrap(), kind);
        }
    }

    #[test]
    fn legacy_unpack() {
        assert_eq!(RegionType::unpack(-3).unwrap(), RegionType::None);
        assert_eq!(RegionType::unpack(0).unwrap(), RegionType::Equal(0));
        assert_eq!(RegionType::unpack(5).unwrap(), RegionType::Equal(5));
        assert!(RegionType::unpack(11 * 0x100).is_err());
    }
}
