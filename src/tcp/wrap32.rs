use std::fmt;
use std::ops::{Add, AddAssign, Sub};

/// Signed distance from `b` to `a` in 32-bit sequence space.
///
/// A sequence number is "after" another when the modular distance to it is
/// less than half the space, independent of numeric magnitude. Exactly half
/// the space apart is ambiguous and reports `i32::MIN` in both directions, so
/// `-seq_diff(b, a)` overflows there: combine two diffs with `wrapping_add`
/// (or negate with `wrapping_neg`), never plain `+` or `-`.
pub fn seq_diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// A TCP sequence (or acknowledgment) number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Wrap32 {
    value: u32,
}

impl Wrap32 {
    pub fn new(value: u32) -> Self {
        Wrap32 { value }
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    /// Signed distance `self - other`, see [`seq_diff`].
    pub fn diff(self, other: Wrap32) -> i32 {
        seq_diff(self.value, other.value)
    }

    /// `self` comes strictly after `other`.
    pub fn after(self, other: Wrap32) -> bool {
        self.diff(other) > 0
    }

    /// `self` comes strictly before `other`.
    pub fn before(self, other: Wrap32) -> bool {
        self.diff(other) < 0
    }

    /// Number of sequence numbers from `other` up to `self`, zero if `self` is not after it.
    pub fn distance_from(self, other: Wrap32) -> u32 {
        self.diff(other).max(0) as u32
    }
}

impl Add for Wrap32 {
    type Output = Wrap32;

    fn add(self, other: Wrap32) -> Wrap32 {
        Wrap32::new(self.value.wrapping_add(other.value))
    }
}

impl Add<u32> for Wrap32 {
    type Output = Wrap32;

    fn add(self, len: u32) -> Wrap32 {
        Wrap32::new(self.value.wrapping_add(len))
    }
}

impl AddAssign<u32> for Wrap32 {
    fn add_assign(&mut self, len: u32) {
        self.value = self.value.wrapping_add(len);
    }
}

impl Sub<u32> for Wrap32 {
    type Output = Wrap32;

    fn sub(self, len: u32) -> Wrap32 {
        Wrap32::new(self.value.wrapping_sub(len))
    }
}

impl fmt::Display for Wrap32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

// -- Unit tests --
