//! Constrained ↔ unconstrained reparameterization.
//!
//! The sampler operates on an unconstrained vector `z ∈ R^d`; each coordinate
//! maps to its constrained parameter through a bijection whose
//! log-absolute-Jacobian is added to the log-density, making sampling in `z`
//! equivalent to sampling the constrained posterior.

/// Per-coordinate bijection from unconstrained `z` to constrained `theta`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamTransform {
    /// `theta = z` (already unconstrained).
    Identity,
    /// `theta = exp(z)`, for positive parameters. `log|J| = z`.
    Exp,
    /// `theta = upper * sigmoid(z)`, for parameters on `(0, upper)`.
    /// `log|J| = ln(upper) + log σ(z) + log σ(−z)`.
    ScaledSigmoid { upper: f64 },
}

impl ParamTransform {
    /// Unconstrained → constrained.
    pub fn forward(&self, z: f64) -> f64 {
        match self {
            Self::Identity => z,
            Self::Exp => z.exp(),
            Self::ScaledSigmoid { upper } => {
                // sigmoid saturates to exactly 0 or 1 around |z| ≈ 37;
                // clamp so theta stays strictly inside the open interval
                // and inverse(forward(z)) stays finite.
                let s = sigmoid(z).clamp(f64::EPSILON, 1.0 - f64::EPSILON);
                upper * s
            }
        }
    }

    /// Constrained → unconstrained. Exact inverse of [`Self::forward`].
    pub fn inverse(&self, theta: f64) -> f64 {
        match self {
            Self::Identity => theta,
            Self::Exp => theta.ln(),
            Self::ScaledSigmoid { upper } => {
                let p = theta / upper;
                p.ln() - (1.0 - p).ln()
            }
        }
    }

    /// `log |d theta / d z|`.
    pub fn log_jacobian(&self, z: f64) -> f64 {
        match self {
            Self::Identity => 0.0,
            Self::Exp => z,
            Self::ScaledSigmoid { upper } => upper.ln() - softplus(-z) - softplus(z),
        }
    }

    /// `d/dz log |d theta / d z|`.
    pub fn grad_log_jacobian(&self, z: f64) -> f64 {
        match self {
            Self::Identity => 0.0,
            Self::Exp => 1.0,
            Self::ScaledSigmoid { .. } => 1.0 - 2.0 * sigmoid(z),
        }
    }

    /// `d theta / d z`.
    pub fn jacobian(&self, z: f64) -> f64 {
        match self {
            Self::Identity => 1.0,
            Self::Exp => z.exp(),
            Self::ScaledSigmoid { upper } => {
                let s = sigmoid(z);
                upper * s * (1.0 - s)
            }
        }
    }
}

/// Vector-valued transform: one [`ParamTransform`] per coordinate.
#[derive(Debug, Clone)]
pub struct ParameterTransform {
    transforms: Vec<ParamTransform>,
}

impl ParameterTransform {
    pub fn new(transforms: Vec<ParamTransform>) -> Self {
        Self { transforms }
    }

    /// Transform for the BEST parameter vector `[alpha; gamma; nu]`:
    /// identity for the G locations, exp for the G scales, and a scaled
    /// sigmoid squeezing `nu` into `(0, nu_upper)`.
    pub fn for_groups(n_groups: usize, nu_upper: f64) -> Self {
        let mut transforms = Vec::with_capacity(2 * n_groups + 1);
        transforms.extend(std::iter::repeat(ParamTransform::Identity).take(n_groups));
        transforms.extend(std::iter::repeat(ParamTransform::Exp).take(n_groups));
        transforms.push(ParamTransform::ScaledSigmoid { upper: nu_upper });
        Self { transforms }
    }

    pub fn dim(&self) -> usize {
        self.transforms.len()
    }

    pub fn forward(&self, z: &[f64]) -> Vec<f64> {
        self.transforms
            .iter()
            .zip(z.iter())
            .map(|(t, &zi)| t.forward(zi))
            .collect()
    }

    pub fn inverse(&self, theta: &[f64]) -> Vec<f64> {
        self.transforms
            .iter()
            .zip(theta.iter())
            .map(|(t, &ti)| t.inverse(ti))
            .collect()
    }

    /// Sum of per-coordinate `log|J|` terms.
    pub fn log_jacobian(&self, z: &[f64]) -> f64 {
        self.transforms
            .iter()
            .zip(z.iter())
            .map(|(t, &zi)| t.log_jacobian(zi))
            .sum()
    }

    pub fn grad_log_jacobian(&self, z: &[f64]) -> Vec<f64> {
        self.transforms
            .iter()
            .zip(z.iter())
            .map(|(t, &zi)| t.grad_log_jacobian(zi))
            .collect()
    }

    /// Diagonal of `d theta / d z`.
    pub fn jacobian_diag(&self, z: &[f64]) -> Vec<f64> {
        self.transforms
            .iter()
            .zip(z.iter())
            .map(|(t, &zi)| t.jacobian(zi))
            .collect()
    }
}

/// Numerically stable logistic function.
pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + exp(x))` without overflow.
pub(crate) fn softplus(x: f64) -> f64 {
    if x > 30.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_roundtrip(t: ParamTransform, theta: f64) {
        let z = t.inverse(theta);
        let back = t.forward(z);
        assert!(
            (back - theta).abs() < 1e-10 * theta.abs().max(1.0),
            "{:?}: {} -> {} -> {}",
            t,
            theta,
            z,
            back
        );
    }

    #[test]
    fn test_roundtrip_identity() {
        for &v in &[-3.0, 0.0, 7.5] {
            check_roundtrip(ParamTransform::Identity, v);
        }
    }

    #[test]
    fn test_roundtrip_exp() {
        for &v in &[1e-6, 0.5, 1.0, 42.0] {
            check_roundtrip(ParamTransform::Exp, v);
        }
    }

    #[test]
    fn test_roundtrip_scaled_sigmoid() {
        let t = ParamTransform::ScaledSigmoid { upper: 100.0 };
        for &v in &[0.01, 1.0, 30.0, 99.9] {
            check_roundtrip(t, v);
        }
    }

    #[test]
    fn test_scaled_sigmoid_stays_in_bounds() {
        let t = ParamTransform::ScaledSigmoid { upper: 100.0 };
        for &z in &[-50.0, -1.0, 0.0, 1.0, 50.0] {
            let theta = t.forward(z);
            assert!(theta > 0.0 && theta < 100.0, "theta = {}", theta);
        }
    }

    #[test]
    fn test_scaled_sigmoid_never_saturates() {
        // Past |z| ≈ 37 the raw sigmoid rounds to exactly 0 or 1; the
        // transform must still keep theta off the boundary and invertible.
        let t = ParamTransform::ScaledSigmoid { upper: 100.0 };
        for &z in &[-1e6, -100.0, -40.0, 40.0, 100.0, 1e6] {
            let theta = t.forward(z);
            assert!(
                theta > 0.0 && theta < 100.0,
                "theta = {} at z = {}",
                theta,
                z
            );
            assert!(t.inverse(theta).is_finite(), "inverse blew up at z = {}", z);
        }
    }

    #[test]
    fn test_log_jacobian_matches_finite_diff() {
        let eps = 1e-6;
        let transforms = [
            ParamTransform::Identity,
            ParamTransform::Exp,
            ParamTransform::ScaledSigmoid { upper: 100.0 },
        ];
        for t in transforms {
            for &z in &[-2.0, -0.3, 0.0, 0.7, 2.5] {
                let numerical = ((t.forward(z + eps) - t.forward(z - eps)) / (2.0 * eps))
                    .abs()
                    .ln();
                assert!(
                    (t.log_jacobian(z) - numerical).abs() < 1e-5,
                    "{:?} at z={}: analytic={}, numerical={}",
                    t,
                    z,
                    t.log_jacobian(z),
                    numerical
                );
                let jac_fd = (t.forward(z + eps) - t.forward(z - eps)) / (2.0 * eps);
                assert!((t.jacobian(z) - jac_fd).abs() < 1e-5);
                let glj_fd =
                    (t.log_jacobian(z + eps) - t.log_jacobian(z - eps)) / (2.0 * eps);
                assert!((t.grad_log_jacobian(z) - glj_fd).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_vector_transform_for_groups() {
        let t = ParameterTransform::for_groups(2, 100.0);
        assert_eq!(t.dim(), 5);
        let theta = vec![-1.0, 4.0, 0.5, 2.0, 30.0];
        let z = t.inverse(&theta);
        let back = t.forward(&z);
        for (a, b) in theta.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
        // log|J| decomposes as the sum of per-coordinate terms
        let sum: f64 = (0..5)
            .map(|i| {
                let pt = [
                    ParamTransform::Identity,
                    ParamTransform::Identity,
                    ParamTransform::Exp,
                    ParamTransform::Exp,
                    ParamTransform::ScaledSigmoid { upper: 100.0 },
                ][i];
                pt.log_jacobian(z[i])
            })
            .sum();
        assert!((t.log_jacobian(&z) - sum).abs() < 1e-12);
    }
}
