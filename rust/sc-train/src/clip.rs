//! Global-norm gradient clipping over a `GradStore`.

use candle_core::backprop::GradStore;
use candle_core::{Result, Var};

/// L2 norm of all gradients across `vars`.
pub fn grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f64> {
    let mut total_sq = 0.0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            let norm_sq = grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
            total_sq += f64::from(norm_sq);
        }
    }
    Ok(total_sq.sqrt())
}

/// Scale every gradient by `max_norm / norm` when the global norm exceeds
/// `max_norm`. Returns the norm before clipping; a non-finite norm leaves the
/// gradients as they are and is the caller's to reject.
pub fn clip_grad_store(grads: &mut GradStore, vars: &[Var], max_norm: f64) -> Result<f64> {
    let total_norm = grad_norm(grads, vars)?;
    if total_norm <= max_norm || !total_norm.is_finite() {
        return Ok(total_norm);
    }
    let scale = max_norm / total_norm;
    for var in vars {
        if let Some(grad) = grads.remove(var.as_tensor()) {
            grads.insert(var.as_tensor(), (&grad * scale)?);
        }
    }
    Ok(total_norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};

    #[test]
    fn clipping_bounds_global_norm() {
        let a = Var::new(&[1.0f32, 2.0], &Device::Cpu).unwrap();
        let b = Var::new(&[3.0f32], &Device::Cpu).unwrap();
        // d/dx of 10 * sum(x^2) is 20x: large gradients.
        let loss = ((a.as_tensor().sqr().unwrap().sum_all().unwrap()
            + b.as_tensor().sqr().unwrap().sum_all().unwrap())
        .unwrap()
            * 10.0)
            .unwrap();
        let vars = vec![a.clone(), b.clone()];
        let mut grads = loss.backward().unwrap();

        let before = clip_grad_store(&mut grads, &vars, 0.5).unwrap();
        let expected = 20.0 * (1.0f64 + 4.0 + 9.0).sqrt();
        assert!((before - expected).abs() < 1e-3);
        let after = grad_norm(&grads, &vars).unwrap();
        assert!((after - 0.5).abs() < 1e-4, "after={after}");

        // Direction is preserved.
        let ga: Vec<f32> = grads.get(a.as_tensor()).unwrap().to_vec1().unwrap();
        assert!((ga[1] / ga[0] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn small_gradients_are_left_alone() {
        let a = Var::new(&[0.01f32], &Device::Cpu).unwrap();
        let loss: Tensor = a.as_tensor().sqr().unwrap().sum_all().unwrap();
        let vars = vec![a.clone()];
        let mut grads = loss.backward().unwrap();
        let n = clip_grad_store(&mut grads, &vars, 1.0).unwrap();
        assert!((n - 0.02).abs() < 1e-6);
        assert!((grad_norm(&grads, &vars).unwrap() - n).abs() < 1e-9);
    }
}
