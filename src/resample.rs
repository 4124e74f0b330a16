use crate::{
    enums::Interpolation,
    interpolator::Interpolator,
    volume::{Geometry, Volume, invert},
};

use ndarray::Zip;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ResampleError {
    #[error("Direction matrix of the moving volume is singular")]
    SingularDirection,

    #[error("Invalid spacing {0:?}")]
    InvalidSpacing([f64; 3]),
}

/// Resamples volumes onto a fixed target grid.
///
/// The target grid (origin, spacing, direction, size) is copied verbatim
/// into every output volume. Output voxels whose physical position falls
/// outside the moving volume receive `default_value`.
pub struct Resampler {
    target: Geometry,
    interpolation: Interpolation,
    default_value: f32,
}

impl Resampler {
    pub fn new(target: Geometry) -> Self {
        Self {
            target,
            interpolation: Interpolation::default(),
            default_value: 0.0,
        }
    }

    /// Use the grid of `reference` as the target grid
    pub fn with_reference(reference: &Volume) -> Self {
        Self::new(reference.geometry().clone())
    }

    pub fn interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn default_value(mut self, value: f32) -> Self {
        self.default_value = value;
        self
    }

    pub fn resample(&self, moving: &Volume) -> Result<Volume, ResampleError> {
        self.resample_with(moving, self.interpolation)
    }

    /// Resample with an interpolation mode other than the configured one.
    pub fn resample_with(
        &self,
        moving: &Volume,
        interpolation: Interpolation,
    ) -> Result<Volume, ResampleError> {
        let (matrix, offset) = self.index_transform(moving.geometry())?;
        let source = moving.data();
        let default_value = self.default_value;
        let mut output = Volume::zeros(self.target.clone());

        Zip::indexed(output.data_mut()).par_for_each(|(z, y, x), value| {
            let target = [x as f64, y as f64, z as f64];
            let mut index = offset;
            for (row, component) in index.iter_mut().enumerate() {
                for (col, t) in target.iter().enumerate() {
                    *component += matrix[row * 3 + col] * t;
                }
            }
            let sample = match interpolation {
                Interpolation::Nearest => Interpolator::nearest(source, index),
                Interpolation::Linear => Interpolator::trilinear(source, index),
            };
            *value = sample.unwrap_or(default_value);
        });

        Ok(output)
    }

    /// Affine map from a target voxel index to a continuous moving index:
    /// `S_m^-1 * D_m^-1 * (o_t - o_m + D_t * S_t * i)`.
    fn index_transform(&self, moving: &Geometry) -> Result<([f64; 9], [f64; 3]), ResampleError> {
        for spacing in [self.target.spacing, moving.spacing] {
            if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
                return Err(ResampleError::InvalidSpacing(spacing));
            }
        }
        let inverse = invert(&moving.direction).ok_or(ResampleError::SingularDirection)?;

        let mut matrix = [0.0; 9];
        for row in 0..3 {
            for col in 0..3 {
                let dot: f64 = (0..3)
                    .map(|k| inverse[row * 3 + k] * self.target.direction[k * 3 + col])
                    .sum();
                matrix[row * 3 + col] = dot * self.target.spacing[col] / moving.spacing[row];
            }
        }

        let delta = [
            self.target.origin[0] - moving.origin[0],
            self.target.origin[1] - moving.origin[1],
            self.target.origin[2] - moving.origin[2],
        ];
        let mut offset = [0.0; 3];
        for (row, value) in offset.iter_mut().enumerate() {
            let dot: f64 = (0..3).map(|k| inverse[row * 3 + k] * delta[k]).sum();
            *value = dot / moving.spacing[row];
        }

        Ok((matrix, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::IDENTITY_DIRECTION;
    use ndarray::Array3;

    fn labelled(dim: (usize, usize, usize), origin: [f64; 3], spacing: [f64; 3]) -> Volume {
        let data = Array3::from_shape_fn(dim, |(z, y, x)| (100 * z + 10 * y + x) as f32);
        Volume::new(data, origin, spacing, IDENTITY_DIRECTION)
    }

    #[test]
    fn identical_grid_is_a_copy() {
        let volume = labelled((3, 4, 5), [1.0, 2.0, 3.0], [0.5, 0.5, 2.0]);
        let resampled = Resampler::with_reference(&volume).resample(&volume).unwrap();
        assert_eq!(resampled, volume);
    }

    #[test]
    fn output_takes_the_target_grid() {
        let reference = labelled((2, 6, 6), [0.0; 3], [1.0, 1.0, 3.0]);
        let moving = labelled((4, 3, 3), [0.3, -0.2, 0.0], [2.0, 2.0, 1.5]);
        let resampled = Resampler::with_reference(&reference).resample(&moving).unwrap();
        assert_eq!(resampled.geometry(), reference.geometry());
    }

    #[test]
    fn nearest_neighbour_keeps_the_value_set() {
        let reference = labelled((2, 6, 6), [0.0; 3], [1.0, 1.0, 3.0]);
        let moving = labelled((4, 3, 3), [0.3, -0.2, 0.0], [2.0, 2.0, 1.5]);
        let resampled = Resampler::with_reference(&reference).resample(&moving).unwrap();
        assert!(
            resampled
                .data()
                .iter()
                .all(|v| *v == 0.0 || moving.data().iter().any(|m| m == v))
        );
    }

    #[test]
    fn shifted_origin_moves_samples() {
        let moving = labelled((1, 1, 4), [0.0; 3], [1.0; 3]);
        let mut target = moving.geometry().clone();
        target.origin = [1.0, 0.0, 0.0];
        let resampled = Resampler::new(target).resample(&moving).unwrap();
        assert_eq!(resampled.data().as_slice().unwrap(), &[1.0, 2.0, 3.0, 0.0]);
    }

    #[test]
    fn default_value_fills_outside() {
        let moving = labelled((1, 1, 2), [0.0; 3], [1.0; 3]);
        let mut target = moving.geometry().clone();
        target.origin = [10.0, 0.0, 0.0];
        let resampled = Resampler::new(target)
            .default_value(-1.0)
            .resample(&moving)
            .unwrap();
        assert!(resampled.data().iter().all(|v| *v == -1.0));
    }

    #[test]
    fn linear_interpolates_between_samples() {
        let moving = labelled((1, 1, 3), [0.0; 3], [2.0, 1.0, 1.0]);
        let target = Geometry {
            origin: [0.0; 3],
            spacing: [1.0; 3],
            direction: IDENTITY_DIRECTION,
            size: [5, 1, 1],
        };
        let resampled = Resampler::new(target)
            .interpolation(Interpolation::Linear)
            .resample(&moving)
            .unwrap();
        assert_eq!(resampled.data().as_slice().unwrap(), &[0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn rejects_singular_moving_direction() {
        let reference = labelled((1, 2, 2), [0.0; 3], [1.0; 3]);
        let moving = Volume::new(Array3::zeros((1, 2, 2)), [0.0; 3], [1.0; 3], [0.0; 9]);
        let result = Resampler::with_reference(&reference).resample(&moving);
        assert_eq!(result.unwrap_err(), ResampleError::SingularDirection);
    }
}
