// src/coordinates.rs - Voxel index <-> physical coordinate conversion

use std::str::FromStr;

use crate::errors::{CochleogramError, Result};

/// Spatial axis of an image volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl FromStr for Axis {
    type Err = CochleogramError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "x" | "X" => Ok(Axis::X),
            "y" | "Y" => Ok(Axis::Y),
            "z" | "Z" => Ok(Axis::Z),
            other => Err(CochleogramError::UnknownAxis(other.to_string())),
        }
    }
}

/// Affine map between voxel indices and microns for one volume:
/// `coords = lower + indices * voxel_size`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransform {
    pub lower: [f64; 3],
    pub voxel_size: [f64; 3],
}

impl CoordinateTransform {
    pub fn new(lower: [f64; 3], voxel_size: [f64; 3]) -> Self {
        Self { lower, voxel_size }
    }

    /// Physical position of voxel (i, j, k)
    pub fn to_coords3(&self, i: f64, j: f64, k: f64) -> [f64; 3] {
        [
            self.lower[0] + i * self.voxel_size[0],
            self.lower[1] + j * self.voxel_size[1],
            self.lower[2] + k * self.voxel_size[2],
        ]
    }

    /// Fractional voxel index of physical position (x, y, z)
    pub fn to_indices3(&self, x: f64, y: f64, z: f64) -> [f64; 3] {
        [
            (x - self.lower[0]) / self.voxel_size[0],
            (y - self.lower[1]) / self.voxel_size[1],
            (z - self.lower[2]) / self.voxel_size[2],
        ]
    }

    /// Physical (x, y) of index (i, j) in the volume's lowest z plane
    pub fn to_coords(&self, i: f64, j: f64) -> (f64, f64) {
        let [x, y, _] = self.to_coords3(i, j, 0.0);
        (x, y)
    }

    /// Index (i, j) of physical (x, y) in the volume's lowest z plane
    pub fn to_indices(&self, x: f64, y: f64) -> (f64, f64) {
        let [i, j, _] = self.to_indices3(x, y, self.lower[2]);
        (i, j)
    }

    /// Convert a physical displacement along one axis to index units
    pub fn to_indices_delta(&self, v: f64, axis: Axis) -> f64 {
        v / self.voxel_size[axis.index()]
    }

    /// Same as [`CoordinateTransform::to_indices_delta`] with the axis given
    /// by name ("x", "y" or "z")
    pub fn to_indices_delta_named(&self, v: f64, axis: &str) -> Result<f64> {
        Ok(self.to_indices_delta(v, axis.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn coords_and_indices_are_inverse() {
        let t = CoordinateTransform::new([100.0, -50.0, 3.0], [0.5, 0.25, 2.0]);
        let [x, y, z] = t.to_coords3(10.0, 8.0, 2.0);
        assert_approx_eq!(x, 105.0);
        assert_approx_eq!(y, -48.0);
        assert_approx_eq!(z, 7.0);

        let [i, j, k] = t.to_indices3(x, y, z);
        assert_approx_eq!(i, 10.0);
        assert_approx_eq!(j, 8.0);
        assert_approx_eq!(k, 2.0);

        let (i, j) = t.to_indices(101.0, -49.0);
        assert_approx_eq!(i, 2.0);
        assert_approx_eq!(j, 4.0);
        assert_eq!(t.to_coords(i, j), (101.0, -49.0));
    }

    #[test]
    fn delta_uses_axis_voxel_size() {
        let t = CoordinateTransform::new([0.0; 3], [0.5, 0.25, 2.0]);
        assert_approx_eq!(t.to_indices_delta(5.0, Axis::X), 10.0);
        assert_approx_eq!(t.to_indices_delta_named(5.0, "y").unwrap(), 20.0);
        assert_approx_eq!(t.to_indices_delta_named(5.0, "z").unwrap(), 2.5);
        assert!(matches!(
            t.to_indices_delta_named(5.0, "c"),
            Err(CochleogramError::UnknownAxis(_))
        ));
    }
}
