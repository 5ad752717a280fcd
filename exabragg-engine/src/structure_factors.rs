//! Per-energy-channel structure-factor tables.
//!
//! The store is append-only: tables are immutable once inserted and a
//! channel id is simply the insertion index. Every table shares the
//! reciprocal-space bounds the store was created with.

use crate::dispatch::ParallelDispatch;
use crate::{Error, Result};
use exabragg_core::{HklBounds, MillerIndex};
use tracing::debug;

/// Index of an energy channel in the store.
pub type ChannelId = usize;

/// Dense amplitude table for one energy channel.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureFactorTable {
    bounds: HklBounds,
    amplitudes: Box<[f64]>,
}

impl StructureFactorTable {
    /// Bounds this table was tagged with.
    #[must_use]
    pub fn bounds(&self) -> &HklBounds {
        &self.bounds
    }

    /// Flattened amplitudes, `l` fastest.
    #[must_use]
    pub fn amplitudes(&self) -> &[f64] {
        &self.amplitudes
    }

    /// Number of amplitudes (`bounds().total_count()`).
    #[must_use]
    pub fn len(&self) -> usize {
        self.amplitudes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.amplitudes.is_empty()
    }

    /// Amplitude at `hkl`, or `None` outside the bounds.
    #[inline]
    #[must_use]
    pub fn lookup(&self, hkl: MillerIndex) -> Option<f64> {
        self.bounds
            .offset(hkl)
            .and_then(|i| self.amplitudes.get(i).copied())
    }
}

/// Ordered, append-only collection of structure-factor tables.
#[derive(Debug, Clone)]
pub struct EnergyChannelStore {
    bounds: HklBounds,
    channels: Vec<StructureFactorTable>,
}

impl EnergyChannelStore {
    /// Creates an empty store for the given reciprocal-space grid.
    ///
    /// # Errors
    /// Returns an error if `bounds` has an axis with `max < min`.
    pub fn new(bounds: HklBounds) -> Result<Self> {
        bounds.validate()?;
        Ok(Self {
            bounds,
            channels: Vec::new(),
        })
    }

    /// Bounds shared by every channel.
    #[must_use]
    pub fn bounds(&self) -> &HklBounds {
        &self.bounds
    }

    /// Number of channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Copies `amplitudes` into a new channel and returns its id.
    ///
    /// # Errors
    /// Returns [`Error::TableSizeMismatch`] unless the slice holds exactly
    /// `bounds().total_count()` values. Nothing is appended on error.
    pub fn insert(&mut self, amplitudes: &[f64]) -> Result<ChannelId> {
        let expected = self.bounds.total_count();
        if amplitudes.len() != expected {
            return Err(Error::TableSizeMismatch {
                expected,
                actual: amplitudes.len(),
            });
        }
        Ok(self.push(amplitudes.into()))
    }

    /// Builds a dense channel from sparse `(h, k, l) -> F` pairs.
    ///
    /// Grid points with no entry take `default_f`. Later duplicates win.
    ///
    /// # Errors
    /// Returns [`Error::LengthMismatch`] if the two slices differ in length,
    /// or [`Error::MillerOutOfBounds`] for the first index outside the store
    /// bounds. Nothing is appended on error.
    pub fn insert_from_miller(
        &mut self,
        indices: &[MillerIndex],
        amplitudes: &[f64],
        default_f: f64,
    ) -> Result<ChannelId> {
        if indices.len() != amplitudes.len() {
            return Err(Error::LengthMismatch {
                what: "Miller indices vs amplitudes",
                left: indices.len(),
                right: amplitudes.len(),
            });
        }

        let mut dense = vec![default_f; self.bounds.total_count()];
        for (&hkl, &f) in indices.iter().zip(amplitudes) {
            let offset = self.bounds.offset(hkl).ok_or(Error::MillerOutOfBounds {
                h: hkl[0],
                k: hkl[1],
                l: hkl[2],
            })?;
            dense[offset] = f;
        }
        Ok(self.push(dense.into_boxed_slice()))
    }

    fn push(&mut self, amplitudes: Box<[f64]>) -> ChannelId {
        let id = self.channels.len();
        self.channels.push(StructureFactorTable {
            bounds: self.bounds,
            amplitudes,
        });
        debug!(
            channel = id,
            amplitudes = self.bounds.total_count(),
            "inserted structure factor channel"
        );
        id
    }

    /// Table for `channel`.
    ///
    /// # Errors
    /// Returns [`Error::UnknownChannel`] if the id was never issued.
    pub fn table(&self, channel: ChannelId) -> Result<&StructureFactorTable> {
        self.channels.get(channel).ok_or(Error::UnknownChannel {
            channel,
            count: self.channels.len(),
        })
    }

    /// Iterates tables in channel order.
    pub fn iter(&self) -> impl Iterator<Item = &StructureFactorTable> {
        self.channels.iter()
    }

    /// Reads `[first, last)` of a channel in parallel and logs each entry.
    ///
    /// Debugging aid only; the store is not modified.
    ///
    /// # Errors
    /// Returns [`Error::UnknownChannel`] or [`Error::InvalidRange`].
    pub fn dump_range<D: ParallelDispatch>(
        &self,
        dispatch: &D,
        channel: ChannelId,
        first: usize,
        last: usize,
    ) -> Result<Vec<(usize, f64)>> {
        let table = self.table(channel)?;
        if first > last || last > table.len() {
            return Err(Error::InvalidRange {
                first,
                last,
                len: table.len(),
            });
        }

        let amplitudes = table.amplitudes();
        let entries = dispatch.map_range("dump_range", first..last, |i| (i, amplitudes[i]));
        for &(i, f) in &entries {
            debug!(channel, index = i, amplitude = f, "Fhkl");
        }
        Ok(entries)
    }
}
