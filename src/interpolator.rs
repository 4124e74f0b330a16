use ndarray::Array3;

pub(crate) struct Interpolator;

impl Interpolator {
    /// A continuous index is inside the buffer when it lies within half a
    /// voxel of the outermost voxel centres.
    #[inline]
    pub(crate) fn is_inside(dim: (usize, usize, usize), index: [f64; 3]) -> bool {
        // index is (x, y, z), dim is (depth, height, width)
        let extents = [dim.2, dim.1, dim.0];
        index
            .iter()
            .zip(extents)
            .all(|(&c, n)| n > 0 && c >= -0.5 && c < n as f64 - 0.5)
    }

    #[inline]
    pub(crate) fn nearest(data: &Array3<f32>, index: [f64; 3]) -> Option<f32> {
        let dim = data.dim();
        if !Self::is_inside(dim, index) {
            return None;
        }
        let round = |c: f64, n: usize| ((c + 0.5).floor().max(0.0) as usize).min(n - 1);
        let x = round(index[0], dim.2);
        let y = round(index[1], dim.1);
        let z = round(index[2], dim.0);
        Some(data[[z, y, x]])
    }

    #[inline]
    pub(crate) fn trilinear(data: &Array3<f32>, index: [f64; 3]) -> Option<f32> {
        let (depth, height, width) = data.dim();
        if !Self::is_inside((depth, height, width), index) {
            return None;
        }

        let clamp = |c: f64, n: usize| c.max(0.0).min((n - 1) as f64);
        let x = clamp(index[0], width);
        let y = clamp(index[1], height);
        let z = clamp(index[2], depth);

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let z0 = z.floor() as usize;
        let x1 = (x0 + 1).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);
        let z1 = (z0 + 1).min(depth - 1);

        let dx = (x - x0 as f64) as f32;
        let dy = (y - y0 as f64) as f32;
        let dz = (z - z0 as f64) as f32;

        let lerp = |a: f32, b: f32, t: f32| a.mul_add(1.0 - t, b * t);

        let c00 = lerp(data[[z0, y0, x0]], data[[z0, y0, x1]], dx);
        let c01 = lerp(data[[z0, y1, x0]], data[[z0, y1, x1]], dx);
        let c10 = lerp(data[[z1, y0, x0]], data[[z1, y0, x1]], dx);
        let c11 = lerp(data[[z1, y1, x0]], data[[z1, y1, x1]], dx);

        let c0 = lerp(c00, c01, dy);
        let c1 = lerp(c10, c11, dy);

        Some(lerp(c0, c1, dz))
    }
}
