use std::ops::{Index, Mul};

use crate::Deme;

/// A 2x2 matrix indexed by deme, row is the starting deme.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Mat2(pub [[f64; 2]; 2]);

impl Mat2 {
    pub const IDENTITY: Mat2 = Mat2([[1.0, 0.0], [0.0, 1.0]]);

    pub fn get(&self, from: Deme, to: Deme) -> f64 {
        self.0[from.index()][to.index()]
    }

    pub fn scale(&self, factor: f64) -> Mat2 {
        let m = &self.0;
        Mat2([
            [m[0][0] * factor, m[0][1] * factor],
            [m[1][0] * factor, m[1][1] * factor],
        ])
    }

    pub fn row_sums(&self) -> [f64; 2] {
        [self.0[0][0] + self.0[0][1], self.0[1][0] + self.0[1][1]]
    }

    /// Largest absolute entrywise difference.
    pub fn max_abs_diff(&self, other: &Mat2) -> f64 {
        let mut diff: f64 = 0.0;
        for i in 0..2 {
            for j in 0..2 {
                diff = diff.max((self.0[i][j] - other.0[i][j]).abs());
            }
        }
        diff
    }

    /// `exp(self * t)` for a two-state generator (rows summing to zero).
    ///
    /// With `a = Q[0][1]` and `b = Q[1][0]` the exponential has the closed form
    /// `(1/s) [[b + a e, a - a e], [b - b e, a + b e]]` where `s = a + b` and `e = exp(-s t)`.
    pub fn generator_exp(&self, t: f64) -> Mat2 {
        let a = self.0[0][1];
        let b = self.0[1][0];
        let s = a + b;
        if s == 0.0 {
            return Mat2::IDENTITY;
        }
        let e = (-s * t).exp();
        Mat2([
            [(b + a * e) / s, (a - a * e) / s],
            [(b - b * e) / s, (a + b * e) / s],
        ])
    }
}

impl Index<usize> for Mat2 {
    type Output = [f64; 2];

    fn index(&self, row: usize) -> &[f64; 2] {
        &self.0[row]
    }
}

impl Mul for Mat2 {
    type Output = Mat2;

    fn mul(self, rhs: Mat2) -> Mat2 {
        let (l, r) = (&self.0, &rhs.0);
        Mat2([
            [
                l[0][0] * r[0][0] + l[0][1] * r[1][0],
                l[0][0] * r[0][1] + l[0][1] * r[1][1],
            ],
            [
                l[1][0] * r[0][0] + l[1][1] * r[1][0],
                l[1][0] * r[0][1] + l[1][1] * r[1][1],
            ],
        ])
    }
}
