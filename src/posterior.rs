//! The unconstrained posterior density the sampler explores.
//!
//! Composes the model's constrained log-density with the parameter transform
//! and its Jacobian correction:
//!
//!   logp_unconstrained(z) = logp(forward(z)) + log|J(z)|

use crate::model::BestModel;
use crate::transforms::ParameterTransform;

/// Upper bound squeezing `nu` into a bounded interval; beyond ~100 the
/// Student-t is indistinguishable from a Gaussian.
pub const NU_UPPER: f64 = 100.0;

/// Log-density and gradient in unconstrained space.
///
/// Borrows the model (shared read-only across chains) and owns the
/// per-coordinate transform. All methods are pure; non-finite results are
/// valid outputs that the sampler treats as rejected proposals.
pub struct Posterior<'a> {
    model: &'a BestModel,
    transform: ParameterTransform,
}

impl<'a> Posterior<'a> {
    pub fn new(model: &'a BestModel) -> Self {
        let transform = ParameterTransform::for_groups(model.n_groups(), NU_UPPER);
        Self { model, transform }
    }

    pub fn dim(&self) -> usize {
        self.model.dim()
    }

    pub fn model(&self) -> &BestModel {
        self.model
    }

    pub fn transform(&self) -> &ParameterTransform {
        &self.transform
    }

    /// `logp(forward(z)) + log|J(z)|`.
    pub fn logp_unconstrained(&self, z: &[f64]) -> f64 {
        let theta = self.transform.forward(z);
        self.model.logp(&theta) + self.transform.log_jacobian(z)
    }

    /// Unconstrained log-density and its gradient.
    ///
    /// Chain rule over the diagonal Jacobian:
    /// `grad_z[i] = grad_theta[i] * dtheta_i/dz_i + d/dz_i log|J_i|`.
    pub fn logp_grad_unconstrained(&self, z: &[f64]) -> (f64, Vec<f64>) {
        let theta = self.transform.forward(z);
        let (lp, grad_theta) = self.model.logp_grad(&theta);
        if !lp.is_finite() {
            return (f64::NEG_INFINITY, vec![0.0; z.len()]);
        }
        let jac = self.transform.jacobian_diag(z);
        let grad_lj = self.transform.grad_log_jacobian(z);
        let grad_z: Vec<f64> = grad_theta
            .iter()
            .zip(jac.iter())
            .zip(grad_lj.iter())
            .map(|((&gt, &jd), &glj)| gt * jd + glj)
            .collect();
        (lp + self.transform.log_jacobian(z), grad_z)
    }

    pub fn to_constrained(&self, z: &[f64]) -> Vec<f64> {
        self.transform.forward(z)
    }

    pub fn to_unconstrained(&self, theta: &[f64]) -> Vec<f64> {
        self.transform.inverse(theta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Dataset;

    fn toy_posterior_model() -> BestModel {
        let ds = Dataset::new(
            vec![0.3, -0.5, 1.2, 4.8, 5.5, 4.1],
            vec![1, 1, 1, 2, 2, 2],
            2,
        )
        .unwrap();
        BestModel::new(&ds)
    }

    #[test]
    fn test_roundtrip_through_posterior() {
        let model = toy_posterior_model();
        let post = Posterior::new(&model);
        let theta = vec![0.2, 4.9, 0.7, 1.1, 25.0];
        let z = post.to_unconstrained(&theta);
        let back = post.to_constrained(&z);
        for (a, b) in theta.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-9, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_unconstrained_logp_includes_jacobian() {
        let model = toy_posterior_model();
        let post = Posterior::new(&model);
        let theta = vec![0.2, 4.9, 0.7, 1.1, 25.0];
        let z = post.to_unconstrained(&theta);

        let lp_c = model.logp(&theta);
        let lp_u = post.logp_unconstrained(&z);
        let log_jac = post.transform().log_jacobian(&z);
        assert!((lp_u - lp_c - log_jac).abs() < 1e-9);
    }

    #[test]
    fn test_unconstrained_grad_vs_finite_diff() {
        let model = toy_posterior_model();
        let post = Posterior::new(&model);
        let theta = vec![0.2, 4.9, 0.7, 1.1, 25.0];
        let z = post.to_unconstrained(&theta);
        let (_, grad) = post.logp_grad_unconstrained(&z);

        let eps = 1e-6;
        for i in 0..z.len() {
            let mut plus = z.clone();
            plus[i] += eps;
            let mut minus = z.clone();
            minus[i] -= eps;
            let numerical =
                (post.logp_unconstrained(&plus) - post.logp_unconstrained(&minus)) / (2.0 * eps);
            let scale = grad[i].abs().max(1.0);
            assert!(
                (grad[i] - numerical).abs() / scale < 1e-4,
                "z[{}]: analytic={}, numerical={}",
                i,
                grad[i],
                numerical
            );
        }
    }

    #[test]
    fn test_any_real_input_is_safe() {
        // Extreme unconstrained points must not panic; -inf is acceptable.
        let model = toy_posterior_model();
        let post = Posterior::new(&model);
        for &v in &[-1e4, -50.0, 0.0, 50.0, 1e4] {
            let z = vec![v; post.dim()];
            let lp = post.logp_unconstrained(&z);
            assert!(!lp.is_nan(), "logp is NaN at z={}", v);
            let (lp2, grad) = post.logp_grad_unconstrained(&z);
            assert!(!lp2.is_nan());
            assert!(grad.iter().all(|g| !g.is_nan()));
        }
    }
}
