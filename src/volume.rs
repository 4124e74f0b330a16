use ndarray::Array3;

/// Identity direction cosines, row-major.
pub const IDENTITY_DIRECTION: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

/// Physical placement of a voxel grid.
///
/// Indices and sizes are ordered (x, y, z). `direction` is row-major and its
/// columns are the x, y and z image axes expressed in patient space, so a
/// voxel index `i` lies at `origin + direction * (i * spacing)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Geometry {
    pub origin: [f64; 3],
    pub spacing: [f64; 3],
    pub direction: [f64; 9],
    pub size: [usize; 3],
}

impl Geometry {
    /// Compare two grids with an absolute tolerance on the real-valued parts.
    pub fn same_grid(&self, other: &Geometry, tolerance: f64) -> bool {
        let close = |a: &[f64], b: &[f64]| a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tolerance);
        self.size == other.size
            && close(&self.origin, &other.origin)
            && close(&self.spacing, &other.spacing)
            && close(&self.direction, &other.direction)
    }
}

/// Inverse of a row-major 3x3 matrix, `None` if it is (numerically) singular.
pub(crate) fn invert(m: &[f64; 9]) -> Option<[f64; 9]> {
    let cofactor = |r0: usize, r1: usize, c0: usize, c1: usize| {
        m[r0 * 3 + c0] * m[r1 * 3 + c1] - m[r0 * 3 + c1] * m[r1 * 3 + c0]
    };
    let det = m[0] * cofactor(1, 2, 1, 2) - m[1] * cofactor(1, 2, 0, 2) + m[2] * cofactor(1, 2, 0, 1);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    Some([
        cofactor(1, 2, 1, 2) * inv_det,
        -cofactor(0, 2, 1, 2) * inv_det,
        cofactor(0, 1, 1, 2) * inv_det,
        -cofactor(1, 2, 0, 2) * inv_det,
        cofactor(0, 2, 0, 2) * inv_det,
        -cofactor(0, 1, 0, 2) * inv_det,
        cofactor(1, 2, 0, 1) * inv_det,
        -cofactor(0, 2, 0, 1) * inv_det,
        cofactor(0, 1, 0, 1) * inv_det,
    ])
}

/// A scalar volume together with its grid.
///
/// Voxels are stored (depth, height, width), i.e. `data[[z, y, x]]`, while
/// the grid reports its size as (x, y, z).
#[derive(Clone, Debug, PartialEq)]
pub struct Volume {
    data: Array3<f32>,
    geometry: Geometry,
}

impl Volume {
    pub fn new(data: Array3<f32>, origin: [f64; 3], spacing: [f64; 3], direction: [f64; 9]) -> Self {
        let (depth, height, width) = data.dim();
        Self {
            data,
            geometry: Geometry {
                origin,
                spacing,
                direction,
                size: [width, height, depth],
            },
        }
    }

    /// An all-zero volume laid out on `geometry`.
    pub fn zeros(geometry: Geometry) -> Self {
        let [width, height, depth] = geometry.size;
        Self {
            data: Array3::zeros((depth, height, width)),
            geometry,
        }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Number of slices along the z axis
    pub fn depth(&self) -> usize {
        self.data.dim().0
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// Get a mutable reference to the underlying data
    pub fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn size(&self) -> [usize; 3] {
        self.geometry.size
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.geometry.spacing
    }
}
