//! Symmetric 3x3 tensor kernel for the Riemannian metric field.
//!
//! A metric is stored as its six independent components, upper triangle by
//! rows: `[m11, m12, m13, m22, m23, m33]`. The node table keeps both the
//! tensor and its matrix log so that length queries (closed form in M) and
//! interpolation (linear in log M) are both one lookup away.

use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymTensor(pub [f64; 6]);

impl SymTensor {
    pub fn identity() -> Self {
        Self([1.0, 0.0, 0.0, 1.0, 0.0, 1.0])
    }

    pub fn diag(m11: f64, m22: f64, m33: f64) -> Self {
        Self([m11, 0.0, 0.0, m22, 0.0, m33])
    }

    /// Isotropic metric for target edge length `h`.
    pub fn from_h(h: f64) -> Self {
        let m = 1.0 / (h * h);
        Self::diag(m, m, m)
    }

    pub fn to_matrix(self) -> na::Matrix3<f64> {
        let [m11, m12, m13, m22, m23, m33] = self.0;
        na::Matrix3::new(m11, m12, m13, m12, m22, m23, m13, m23, m33)
    }

    pub fn from_matrix(m: &na::Matrix3<f64>) -> Self {
        Self([m[(0, 0)], m[(0, 1)], m[(0, 2)], m[(1, 1)], m[(1, 2)], m[(2, 2)]])
    }

    pub fn det(self) -> f64 {
        let [m11, m12, m13, m22, m23, m33] = self.0;
        m11 * (m22 * m33 - m23 * m23) - m12 * (m12 * m33 - m23 * m13)
            + m13 * (m12 * m23 - m22 * m13)
    }

    /// Matrix logarithm. Fails on non-SPD input, where the log of an
    /// eigenvalue would be undefined.
    pub fn log(self) -> Result<SymTensor> {
        self.map_eigenvalues(|e| {
            if e <= 0.0 {
                Err(Error::Invalid("metric tensor is not positive definite"))
            } else {
                Ok(e.ln())
            }
        })
    }

    /// Matrix exponential; always SPD for symmetric input.
    pub fn exp(self) -> SymTensor {
        self.map_eigenvalues(|e| Ok(e.exp()))
            .expect("exp of a symmetric tensor cannot fail")
    }

    fn map_eigenvalues(self, f: impl Fn(f64) -> Result<f64>) -> Result<SymTensor> {
        let eigen = na::SymmetricEigen::new(self.to_matrix());
        let mut mapped = eigen.eigenvalues;
        for value in mapped.iter_mut() {
            *value = f(*value)?;
        }
        let m = &eigen.eigenvectors
            * na::Matrix3::from_diagonal(&mapped)
            * eigen.eigenvectors.transpose();
        Ok(SymTensor::from_matrix(&m))
    }

    /// Cholesky factor J with JᵀJ = M; maps points so that Euclidean
    /// measure in the image equals metric measure in the source.
    pub fn jacobian(self) -> Result<na::Matrix3<f64>> {
        let chol = na::Cholesky::new(self.to_matrix())
            .ok_or(Error::Invalid("metric tensor is not positive definite"))?;
        Ok(chol.l().transpose())
    }

    pub fn vt_m_v(self, v: &[f64; 3]) -> f64 {
        let [m11, m12, m13, m22, m23, m33] = self.0;
        m11 * v[0] * v[0]
            + m22 * v[1] * v[1]
            + m33 * v[2] * v[2]
            + 2.0 * (m12 * v[0] * v[1] + m13 * v[0] * v[2] + m23 * v[1] * v[2])
    }

    /// Length of `v` under the metric.
    pub fn sqrt_vt_m_v(self, v: &[f64; 3]) -> f64 {
        self.vt_m_v(v).max(0.0).sqrt()
    }

    /// `vᵀMv` and its gradient with respect to `v`.
    pub fn vt_m_v_deriv(self, v: &[f64; 3]) -> (f64, [f64; 3]) {
        let [m11, m12, m13, m22, m23, m33] = self.0;
        let value = self.vt_m_v(v);
        let deriv = [
            2.0 * (m11 * v[0] + m12 * v[1] + m13 * v[2]),
            2.0 * (m12 * v[0] + m22 * v[1] + m23 * v[2]),
            2.0 * (m13 * v[0] + m23 * v[1] + m33 * v[2]),
        ];
        (value, deriv)
    }

    /// `√(vᵀMv)` and its gradient with respect to `v`; gradient falls back
    /// to zero at the apex where the length vanishes.
    pub fn sqrt_vt_m_v_deriv(self, v: &[f64; 3]) -> (f64, [f64; 3]) {
        let (l2, d_l2) = self.vt_m_v_deriv(v);
        let length = l2.max(0.0).sqrt();
        if !crate::geometry::divisible(1.0, 2.0 * length) {
            return (length, [0.0; 3]);
        }
        let scale = 0.5 / length;
        (length, [scale * d_l2[0], scale * d_l2[1], scale * d_l2[2]])
    }
}

/// Componentwise blend `(1-w1)·a + w1·b`, the log-Euclidean weighting when
/// applied to matrix logs.
pub fn weight(a: &SymTensor, b: &SymTensor, w1: f64) -> SymTensor {
    let w0 = 1.0 - w1;
    let mut out = [0.0; 6];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = w0 * a.0[i] + w1 * b.0[i];
    }
    SymTensor(out)
}

/// Componentwise average of matrix logs.
pub fn average_log(logs: &[SymTensor]) -> SymTensor {
    let mut out = [0.0; 6];
    for log in logs {
        for (slot, value) in out.iter_mut().zip(log.0) {
            *slot += value;
        }
    }
    let n = logs.len() as f64;
    for slot in out.iter_mut() {
        *slot /= n;
    }
    SymTensor(out)
}
