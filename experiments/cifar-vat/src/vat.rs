//! Virtual adversarial training.
//!
//! The regulariser measures how far the model's class distribution moves when
//! each input is pushed along the direction that moves it the most, within an
//! L2 ball of radius `epsilon`. That direction is found by power iteration on
//! random noise, using gradients of the divergence with respect to the noise.

use anyhow::{anyhow, Result};
use burn::tensor::{
    activation::softmax,
    backend::{AutodiffBackend, Backend},
    Distribution, Tensor,
};

use crate::model::ConvLarge;

/// Smoothing added inside the logarithms of the divergence.
const LOG_EPSILON: f64 = 1e-8;
/// Guards the normalisation of an all-zero direction.
const NORM_EPSILON: f64 = 1e-12;

#[derive(Clone, Copy, Debug)]
pub struct VatParams {
    pub xi: f64,
    pub epsilon: f64,
    pub power_iterations: usize,
}

/// Scale every sample of `d` to unit L2 norm over its non-batch dimensions.
pub fn normalize_per_sample<B: Backend>(d: Tensor<B, 4>) -> Tensor<B, 4> {
    let [batch, _, _, _] = d.dims();
    let norm = d
        .clone()
        .powf_scalar(2.0)
        .flatten::<2>(1, 3)
        .sum_dim(1)
        .sqrt()
        .add_scalar(NORM_EPSILON)
        .reshape([batch, 1, 1, 1]);
    d / norm
}

/// `KL(p || q)` per sample for class distributions of shape `[N, C]`; returns `[N, 1]`.
pub fn kl_divergence<B: Backend>(p: Tensor<B, 2>, q: Tensor<B, 2>) -> Tensor<B, 2> {
    let log_p = p.clone().add_scalar(LOG_EPSILON).log();
    let log_q = q.add_scalar(LOG_EPSILON).log();
    (p * (log_p - log_q)).sum_dim(1)
}

/// Standard normal noise shaped like `images`, the starting point of the power iteration.
pub fn sample_noise<B: Backend>(images: &Tensor<B, 4>) -> Tensor<B, 4> {
    Tensor::random(
        images.dims(),
        Distribution::Normal(0.0, 1.0),
        &images.device(),
    )
}

/// Mean divergence between the clean predictions and the predictions on
/// virtually adversarial inputs.
///
/// `clean_logits` must come from `model.forward(images)`; they are treated as
/// constants. The adversarial perturbation carries no gradient, so only the
/// final perturbed pass contributes parameter gradients. Perturbed passes do
/// not update the batch-norm running statistics.
pub fn virtual_adversarial_loss<B: AutodiffBackend>(
    model: &ConvLarge<B>,
    images: Tensor<B, 4>,
    clean_logits: Tensor<B, 2>,
    noise: Tensor<B, 4>,
    params: VatParams,
) -> Result<Tensor<B, 1>> {
    let clean = softmax(clean_logits.detach(), 1);
    let r_adv = adversarial_direction(model, images.clone(), clean.clone(), noise, params)?
        .mul_scalar(params.epsilon);

    let perturbed = softmax(model.forward_without_stat_updates(images + r_adv), 1);
    Ok(kl_divergence(clean, perturbed).mean())
}

/// Unit-norm direction (per sample) approximating the most divergence-increasing
/// perturbation, refined from `noise` by power iteration.
pub fn adversarial_direction<B: AutodiffBackend>(
    model: &ConvLarge<B>,
    images: Tensor<B, 4>,
    clean: Tensor<B, 2>,
    noise: Tensor<B, 4>,
    params: VatParams,
) -> Result<Tensor<B, 4>> {
    let images = images.detach();
    let mut d = noise.detach();

    for iteration in 0..params.power_iterations {
        let d_leaf = d.require_grad();
        let perturbation = normalize_per_sample(d_leaf.clone()).mul_scalar(params.xi);
        let perturbed = softmax(model.forward_without_stat_updates(images.clone() + perturbation), 1);
        let divergence = kl_divergence(clean.clone(), perturbed).sum();

        let grads = divergence.backward();
        let grad = d_leaf.grad(&grads).ok_or_else(|| {
            anyhow!("no gradient for the perturbation at power iteration {}", iteration)
        })?;
        d = Tensor::from_inner(grad);
    }

    Ok(normalize_per_sample(d))
}
