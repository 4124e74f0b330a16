use serde::Deserialize;

/// Interpolation used when a series is resampled onto the reference grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Keeps the source value set, no blending between voxels.
    #[default]
    #[serde(alias = "nearest_neighbor", alias = "nearest_neighbour")]
    Nearest,
    #[serde(alias = "trilinear")]
    Linear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    /// Position along the slice normal, falling back to InstanceNumber
    #[default]
    ImagePositionPatient,
    InstanceNumber,
    None,
}
