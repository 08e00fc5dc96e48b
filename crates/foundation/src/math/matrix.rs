use super::Vec3;

/// Row-major 3×3 matrix.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Mat3 {
    pub rows: [[f64; 3]; 3],
}

impl Mat3 {
    pub fn new(rows: [[f64; 3]; 3]) -> Self {
        Self { rows }
    }

    pub fn identity() -> Self {
        Self::diagonal(1.0, 1.0, 1.0)
    }

    pub fn diagonal(a: f64, b: f64, c: f64) -> Self {
        Self::new([[a, 0.0, 0.0], [0.0, b, 0.0], [0.0, 0.0, c]])
    }

    pub fn mul_vec(&self, v: Vec3) -> Vec3 {
        let r = &self.rows;
        Vec3::new(
            r[0][0] * v.x + r[0][1] * v.y + r[0][2] * v.z,
            r[1][0] * v.x + r[1][1] * v.y + r[1][2] * v.z,
            r[2][0] * v.x + r[2][1] * v.y + r[2][2] * v.z,
        )
    }

    pub fn determinant(&self) -> f64 {
        let r = &self.rows;
        r[0][0] * (r[1][1] * r[2][2] - r[1][2] * r[2][1])
            - r[0][1] * (r[1][0] * r[2][2] - r[1][2] * r[2][0])
            + r[0][2] * (r[1][0] * r[2][1] - r[1][1] * r[2][0])
    }

    /// Adjugate inverse. `None` when the matrix is (numerically) singular.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < f64::EPSILON * self.max_abs().powi(3).max(1e-300) {
            return None;
        }
        let r = &self.rows;
        let inv = 1.0 / det;
        Some(Self::new([
            [
                (r[1][1] * r[2][2] - r[1][2] * r[2][1]) * inv,
                (r[0][2] * r[2][1] - r[0][1] * r[2][2]) * inv,
                (r[0][1] * r[1][2] - r[0][2] * r[1][1]) * inv,
            ],
            [
                (r[1][2] * r[2][0] - r[1][0] * r[2][2]) * inv,
                (r[0][0] * r[2][2] - r[0][2] * r[2][0]) * inv,
                (r[0][2] * r[1][0] - r[0][0] * r[1][2]) * inv,
            ],
            [
                (r[1][0] * r[2][1] - r[1][1] * r[2][0]) * inv,
                (r[0][1] * r[2][0] - r[0][0] * r[2][1]) * inv,
                (r[0][0] * r[1][1] - r[0][1] * r[1][0]) * inv,
            ],
        ]))
    }

    fn max_abs(&self) -> f64 {
        self.rows
            .iter()
            .flatten()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }
}

/// Row-major 4×4 matrix operating on homogeneous points.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Mat4 {
    pub rows: [[f64; 4]; 4],
}

impl Mat4 {
    pub fn new(rows: [[f64; 4]; 4]) -> Self {
        Self { rows }
    }

    pub fn identity() -> Self {
        Self::new([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// Embeds a 3×4 projection matrix; the last row is `[0, 0, 0, 1]`.
    pub fn from_3x4(rows: [[f64; 4]; 3]) -> Self {
        Self::new([rows[0], rows[1], rows[2], [0.0, 0.0, 0.0, 1.0]])
    }

    pub fn mul_vec4(&self, v: [f64; 4]) -> [f64; 4] {
        let mut out = [0.0; 4];
        for (o, row) in out.iter_mut().zip(self.rows.iter()) {
            *o = row[0] * v[0] + row[1] * v[1] + row[2] * v[2] + row[3] * v[3];
        }
        out
    }

    pub fn mul_point(&self, p: Vec3) -> [f64; 4] {
        self.mul_vec4([p.x, p.y, p.z, 1.0])
    }
}
