//! Reciprocal-space bounds shared by every energy channel.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// A Miller index `(h, k, l)`.
pub type MillerIndex = [i32; 3];

/// Inclusive `(h, k, l)` bounds of a dense structure-factor grid.
///
/// Tables are laid out with `l` varying fastest:
/// `offset = ((h - h_min) * k_range + (k - k_min)) * l_range + (l - l_min)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HklBounds {
    pub h_min: i32,
    pub h_max: i32,
    pub k_min: i32,
    pub k_max: i32,
    pub l_min: i32,
    pub l_max: i32,
}

impl HklBounds {
    /// Creates validated bounds.
    ///
    /// # Errors
    /// Returns [`Error::InvalidBounds`] if any max is below its min.
    pub fn new(h: (i32, i32), k: (i32, i32), l: (i32, i32)) -> Result<Self> {
        let bounds = Self {
            h_min: h.0,
            h_max: h.1,
            k_min: k.0,
            k_max: k.1,
            l_min: l.0,
            l_max: l.1,
        };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Symmetric bounds `-n..=n` on every axis (`|n|` capped at `i32::MAX`).
    #[must_use]
    pub fn symmetric(n: i32) -> Self {
        let n = n.checked_abs().unwrap_or(i32::MAX);
        Self {
            h_min: -n,
            h_max: n,
            k_min: -n,
            k_max: n,
            l_min: -n,
            l_max: n,
        }
    }

    /// Checks that every axis has `min <= max`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidBounds`] naming the first offending axis, or
    /// [`Error::InvalidParameters`] if the grid size overflows `usize`.
    pub fn validate(&self) -> Result<()> {
        for (axis, min, max) in [
            ('h', self.h_min, self.h_max),
            ('k', self.k_min, self.k_max),
            ('l', self.l_min, self.l_max),
        ] {
            if min > max {
                return Err(Error::InvalidBounds { axis, min, max });
            }
        }
        if self.checked_total_count().is_none() {
            return Err(Error::InvalidParameters(format!(
                "Miller index grid {}x{}x{} overflows",
                self.h_range(),
                self.k_range(),
                self.l_range()
            )));
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn h_range(&self) -> usize {
        axis_range(self.h_min, self.h_max)
    }

    #[inline]
    #[must_use]
    pub fn k_range(&self) -> usize {
        axis_range(self.k_min, self.k_max)
    }

    #[inline]
    #[must_use]
    pub fn l_range(&self) -> usize {
        axis_range(self.l_min, self.l_max)
    }

    /// Number of grid points, `h_range * k_range * l_range`, saturating.
    #[inline]
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.checked_total_count().unwrap_or(usize::MAX)
    }

    fn checked_total_count(&self) -> Option<usize> {
        self.h_range()
            .checked_mul(self.k_range())?
            .checked_mul(self.l_range())
    }

    /// Returns true if `hkl` lies inside the bounds.
    #[inline]
    #[must_use]
    pub fn contains(&self, hkl: MillerIndex) -> bool {
        (self.h_min..=self.h_max).contains(&hkl[0])
            && (self.k_min..=self.k_max).contains(&hkl[1])
            && (self.l_min..=self.l_max).contains(&hkl[2])
    }

    /// Flattened table offset of `hkl`, or `None` when out of bounds.
    #[inline]
    #[must_use]
    pub fn offset(&self, hkl: MillerIndex) -> Option<usize> {
        if !self.contains(hkl) {
            return None;
        }
        let h = axis_range(self.h_min, hkl[0]) - 1;
        let k = axis_range(self.k_min, hkl[1]) - 1;
        let l = axis_range(self.l_min, hkl[2]) - 1;
        h.checked_mul(self.k_range())?
            .checked_add(k)?
            .checked_mul(self.l_range())?
            .checked_add(l)
    }
}

#[allow(clippy::cast_sign_loss)]
fn axis_range(min: i32, max: i32) -> usize {
    if max < min {
        0
    } else {
        (i64::from(max) - i64::from(min) + 1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_and_total_count() {
        let b = HklBounds::new((-2, 2), (0, 3), (-1, 0)).unwrap();
        assert_eq!(b.h_range(), 5);
        assert_eq!(b.k_range(), 4);
        assert_eq!(b.l_range(), 2);
        assert_eq!(b.total_count(), 40);
    }

    #[test]
    fn test_offset_is_l_fastest() {
        let b = HklBounds::symmetric(1);
        assert_eq!(b.offset([-1, -1, -1]), Some(0));
        assert_eq!(b.offset([-1, -1, 0]), Some(1));
        assert_eq!(b.offset([-1, 0, -1]), Some(3));
        assert_eq!(b.offset([0, -1, -1]), Some(9));
        assert_eq!(b.offset([1, 1, 1]), Some(26));
        assert_eq!(b.offset([2, 0, 0]), None);
    }

    #[test]
    fn test_extreme_bounds() {
        let b = HklBounds::symmetric(i32::MIN);
        assert_eq!(b.h_min, -i32::MAX);
        assert_eq!(b.h_max, i32::MAX);

        let wide = HklBounds::new((i32::MIN, i32::MAX), (0, 0), (0, 0)).unwrap();
        assert_eq!(wide.h_range(), 1 << 32);
        assert_eq!(wide.offset([i32::MIN, 0, 0]), Some(0));
        assert_eq!(wide.offset([i32::MAX, 0, 0]), Some((1 << 32) - 1));

        let err = HklBounds::new((i32::MIN, i32::MAX), (i32::MIN, i32::MAX), (i32::MIN, i32::MAX))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameters(_)));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let err = HklBounds::new((0, 1), (3, 2), (0, 0)).unwrap_err();
        assert!(matches!(err, Error::InvalidBounds { axis: 'k', .. }));
    }
}
