//! Four-component vectors in `[magnitude, x, y, z]` layout.
//!
//! Beam, spindle, basis and detector vectors are all carried in this layout
//! so that kernels can read a precomputed magnitude from slot 0.

/// A `[magnitude, x, y, z]` vector.
pub type Vector4 = [f64; 4];

/// Number of scalars per staged vector (and the per-panel geometry stride).
pub const VECTOR_LENGTH: usize = 4;

/// Euclidean length of the spatial components (slot 0 is ignored).
#[inline]
#[must_use]
pub fn magnitude(v: &Vector4) -> f64 {
    (v[1] * v[1] + v[2] * v[2] + v[3] * v[3]).sqrt()
}

/// Returns the unit vector pointing along `v` with its magnitude in slot 0,
/// together with that magnitude.
///
/// A zero-length input yields the all-zero vector and a magnitude of zero.
#[must_use]
pub fn unitize(v: &Vector4) -> (Vector4, f64) {
    let mag = magnitude(v);
    if mag == 0.0 {
        return ([0.0; 4], 0.0);
    }
    ([mag, v[1] / mag, v[2] / mag, v[3] / mag], mag)
}

/// Builds a vector from spatial components, filling in the magnitude slot.
#[must_use]
pub fn from_xyz(x: f64, y: f64, z: f64) -> Vector4 {
    let mut v = [0.0, x, y, z];
    v[0] = magnitude(&v);
    v
}
