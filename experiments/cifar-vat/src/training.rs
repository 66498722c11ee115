use std::time::Instant;

use anyhow::{anyhow, Result};
use burn::{
    module::{AutodiffModule, Module},
    nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig},
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::Backend, ElementConversion, Int, Tensor},
};
use burn_autodiff::Autodiff;
use burn_dataset::Dataset;
use burn_ndarray::{NdArray, NdArrayDevice};
use vatnet_core::{
    encode_planar_rgb_png_data_url, permutation, seeded_rng, EpochMetrics, EvaluationMetrics,
    MetricAccumulator,
};

use crate::{
    config::ExperimentConfig,
    data::{batch_indices, CifarBatch, CifarDataset, IMAGE_SIZE},
    model::{ConvLarge, ConvLargeConfig},
    schedule::LearningRateSchedule,
    vat::{sample_noise, virtual_adversarial_loss, VatParams},
};

pub type InferenceBackend = NdArray<f32>;
pub type TrainingBackend = Autodiff<InferenceBackend>;

pub struct TrainingOutcome {
    pub model: ConvLarge<TrainingBackend>,
    pub history: Vec<EpochMetrics>,
}

impl TrainingOutcome {
    pub fn final_epoch(&self) -> Result<&EpochMetrics> {
        self.history
            .last()
            .ok_or_else(|| anyhow!("training history is empty"))
    }
}

#[derive(Clone, Debug)]
pub struct SamplePrediction {
    pub index: usize,
    pub label: usize,
    pub prediction: usize,
    pub image_data_url: String,
}

/// Everything the loss needs besides the batch.
struct Objective {
    cross_entropy: CrossEntropyLoss<TrainingBackend>,
    vat: VatParams,
    alpha: f64,
}

impl Objective {
    /// Cross-entropy on the clean batch plus the weighted adversarial divergence.
    /// Returns the loss and the clean logits.
    fn forward(
        &self,
        model: &ConvLarge<TrainingBackend>,
        batch: CifarBatch<TrainingBackend>,
    ) -> Result<(Tensor<TrainingBackend, 1>, Tensor<TrainingBackend, 2>)> {
        let noise = (self.alpha != 0.0).then(|| sample_noise(&batch.images));
        self.forward_with_noise(model, batch, noise)
    }

    /// Same as `forward`, starting the power iteration from `noise`. The
    /// divergence is skipped when `alpha` is zero or no noise is given.
    fn forward_with_noise(
        &self,
        model: &ConvLarge<TrainingBackend>,
        batch: CifarBatch<TrainingBackend>,
        noise: Option<Tensor<TrainingBackend, 4>>,
    ) -> Result<(Tensor<TrainingBackend, 1>, Tensor<TrainingBackend, 2>)> {
        let logits = model.forward(batch.images.clone());
        let loss = self.cross_entropy.forward(logits.clone(), batch.labels);
        let noise = match noise {
            Some(noise) if self.alpha != 0.0 => noise,
            _ => return Ok((loss, logits)),
        };

        let vat = virtual_adversarial_loss(model, batch.images, logits.clone(), noise, self.vat)?;
        Ok((loss + vat.mul_scalar(self.alpha), logits))
    }
}

pub fn run_training(
    config: &ExperimentConfig,
    epochs: usize,
    train: &CifarDataset,
    test: &CifarDataset,
    device: &NdArrayDevice,
) -> Result<TrainingOutcome> {
    TrainingBackend::seed(config.seed);
    let mut model = ConvLargeConfig::cifar().init::<TrainingBackend>(device);
    println!("model parameters: {}", model.num_params());

    let mut optimizer = AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.999)
        .with_epsilon(1e-8)
        .init();
    let objective = Objective {
        cross_entropy: CrossEntropyLossConfig::new().init(device),
        vat: VatParams {
            xi: config.vat.xi,
            epsilon: config.vat.epsilon,
            power_iterations: config.vat.power_iterations,
        },
        alpha: config.vat_alpha(),
    };
    let schedule = LearningRateSchedule {
        initial: config.learning_rate,
        final_rate: config.final_learning_rate,
        epochs,
        decay: config.lr_decay,
    };

    let mut rng = seeded_rng(config.seed);
    let mut history = Vec::with_capacity(epochs);

    for epoch in 0..epochs {
        let started = Instant::now();
        let learning_rate = schedule.rate(epoch);
        let order = permutation(train.len(), &mut rng);
        let mut running = MetricAccumulator::default();

        for indices in batch_indices(&order, config.batch_size) {
            let items = train.items(indices)?;
            let batch = CifarBatch::<TrainingBackend>::from_items(device, &items);
            let labels = batch.labels.clone();

            let (loss, logits) = objective.forward(&model, batch)?;
            let (correct, total) = accuracy_counts(logits, labels);
            running.add_batch(loss.clone().into_scalar().elem::<f32>(), correct, total);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(learning_rate, model, grads);
        }

        let train_metrics = running.finish();
        let validation = evaluate(&model.valid(), test, config.batch_size, device)?;
        let metrics = EpochMetrics {
            epoch: epoch + 1,
            learning_rate,
            loss: train_metrics.loss,
            accuracy: train_metrics.accuracy,
            validation,
            seconds: started.elapsed().as_secs_f32(),
        };

        println!(
            "epoch {:03}/{:03} - {:.1}s - lr {:.5} - loss {:.4} - acc {:.2}% - val_loss {:.4} - val_acc {:.2}%",
            metrics.epoch,
            epochs,
            metrics.seconds,
            metrics.learning_rate,
            metrics.loss,
            metrics.accuracy,
            metrics.validation.loss,
            metrics.validation.accuracy
        );
        history.push(metrics);
    }

    Ok(TrainingOutcome { model, history })
}

/// Mean cross-entropy and accuracy over `dataset`, in dataset order.
pub fn evaluate<B: Backend>(
    model: &ConvLarge<B>,
    dataset: &CifarDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<EvaluationMetrics> {
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let order: Vec<usize> = (0..dataset.len()).collect();
    let mut totals = MetricAccumulator::default();

    for indices in batch_indices(&order, batch_size) {
        let items = dataset.items(indices)?;
        let batch = CifarBatch::<B>::from_items(device, &items);
        let logits = model.forward(batch.images);
        let loss = loss_fn.forward(logits.clone(), batch.labels.clone());
        let (correct, total) = accuracy_counts(logits, batch.labels);
        totals.add_batch(loss.into_scalar().elem::<f32>(), correct, total);
    }

    Ok(totals.finish())
}

pub fn accuracy_counts<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> (usize, usize) {
    let predictions = logits.argmax(1).squeeze::<1>(1);
    let correct = predictions
        .equal(targets.clone())
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize;
    let total = targets.dims()[0];

    (correct, total)
}

/// Predictions for the first `count` items of `dataset`, with the images attached.
pub fn sample_predictions<B: Backend>(
    model: &ConvLarge<B>,
    device: &B::Device,
    dataset: &CifarDataset,
    count: usize,
) -> Result<Vec<SamplePrediction>> {
    let indices: Vec<usize> = (0..count.min(dataset.len())).collect();
    if indices.is_empty() {
        return Ok(Vec::new());
    }

    let items = dataset.items(&indices)?;
    let batch = CifarBatch::<B>::from_items(device, &items);
    let predictions = model
        .forward(batch.images)
        .argmax(1)
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|err| anyhow!("failed to decode predictions: {err:?}"))?;

    indices
        .iter()
        .zip(items.iter())
        .zip(predictions)
        .map(|((&index, item), prediction)| {
            let planes: Vec<f32> = item.image.iter().map(|&p| p as f32 / 255.0).collect();
            Ok(SamplePrediction {
                index,
                label: item.label as usize,
                prediction: prediction as usize,
                image_data_url: encode_planar_rgb_png_data_url(
                    IMAGE_SIZE as u32,
                    IMAGE_SIZE as u32,
                    &planes,
                )?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{NUM_CLASSES, PIXELS_PER_IMAGE};

    fn tiny_dataset(count: u8) -> CifarDataset {
        let bytes: Vec<u8> = (0..count)
            .flat_map(|i| {
                let mut record = vec![i % NUM_CLASSES as u8];
                record.extend((0..PIXELS_PER_IMAGE).map(|p| (p as u8).wrapping_mul(i + 1)));
                record
            })
            .collect();
        CifarDataset::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn counts_correct_predictions() {
        let device = NdArrayDevice::Cpu;
        let logits = Tensor::<InferenceBackend, 2>::from_floats(
            [[0.1, 0.9, 0.0], [2.0, 0.5, 0.1], [0.0, 0.0, 3.0]],
            &device,
        );
        let targets = Tensor::<InferenceBackend, 1, Int>::from_ints([1, 1, 2], &device);

        assert_eq!(accuracy_counts(logits, targets), (2, 3));
    }

    #[test]
    fn evaluation_covers_every_item() {
        let device = NdArrayDevice::Cpu;
        let model = ConvLargeConfig::cifar().init::<InferenceBackend>(&device);
        let dataset = tiny_dataset(3);

        let metrics = evaluate(&model, &dataset, 2, &device).unwrap();
        assert!(metrics.loss.is_finite());
        let hits = metrics.accuracy / 100.0 * 3.0;
        assert!((hits - hits.round()).abs() < 1e-3);
    }

    #[test]
    fn samples_carry_labels_and_images() {
        let device = NdArrayDevice::Cpu;
        let model = ConvLargeConfig::cifar().init::<InferenceBackend>(&device);
        let samples = sample_predictions(&model, &device, &tiny_dataset(4), 3).unwrap();

        assert_eq!(samples.len(), 3);
        assert_eq!(samples[2].index, 2);
        assert_eq!(samples[2].label, 2);
        assert!(samples.iter().all(|s| s.prediction < NUM_CLASSES));
        assert!(samples[0].image_data_url.starts_with("data:image/png;base64,"));
        assert!(sample_predictions(&model, &device, &CifarDataset::default(), 3)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn trains_with_and_without_vat() {
        let device = NdArrayDevice::Cpu;
        let dataset = tiny_dataset(4);

        for alpha in [None, Some(0.0)] {
            let mut config = ExperimentConfig::default();
            config.batch_size = 2;
            config.vat.alpha = alpha;

            let outcome = run_training(&config, 2, &dataset, &dataset, &device).unwrap();
            assert_eq!(outcome.history.len(), 2);

            let last = outcome.final_epoch().unwrap();
            assert_eq!(last.epoch, 2);
            assert!(last.loss.is_finite());
            assert!(last.validation.loss.is_finite());
        }
    }

    #[test]
    fn objective_adds_weighted_divergence() {
        let device = NdArrayDevice::Cpu;
        let model = ConvLargeConfig::cifar()
            .with_dropout(0.0)
            .init::<TrainingBackend>(&device);
        let items = tiny_dataset(4).items(&[0, 1, 2, 3]).unwrap();
        let batch = || CifarBatch::<TrainingBackend>::from_items(&device, &items);
        let noise = sample_noise(&batch().images);
        let params = VatParams {
            xi: 10.0,
            epsilon: 2.0,
            power_iterations: 1,
        };
        let objective = |alpha: f64| Objective {
            cross_entropy: CrossEntropyLossConfig::new().init(&device),
            vat: params,
            alpha,
        };

        let logits = model.forward(batch().images);
        let cross_entropy = objective(0.0)
            .cross_entropy
            .forward(logits.clone(), batch().labels)
            .into_scalar();
        let vat = virtual_adversarial_loss(&model, batch().images, logits, noise.clone(), params)
            .unwrap()
            .into_scalar();
        assert!(vat > 0.0);

        let alpha = 1000.0;
        let (total, _) = objective(alpha)
            .forward_with_noise(&model, batch(), Some(noise.clone()))
            .unwrap();
        let expected = cross_entropy + alpha as f32 * vat;
        let total = total.into_scalar();
        assert!(
            (total - expected).abs() <= 1e-3 * expected.abs(),
            "{total} vs {expected}"
        );

        let (plain, _) = objective(0.0)
            .forward_with_noise(&model, batch(), Some(noise))
            .unwrap();
        assert!((plain.into_scalar() - cross_entropy).abs() < 1e-6);
    }
}
