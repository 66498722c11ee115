use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
    },
    tensor::{activation::leaky_relu, backend::Backend, Tensor},
};

use crate::data::{CHANNELS, NUM_CLASSES};

/// Convolution, batch norm, leaky ReLU.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBlock<B> {
    fn new(
        device: &B::Device,
        channels: [usize; 2],
        kernel: usize,
        padding: PaddingConfig2d,
        config: &ConvLargeConfig,
    ) -> Self {
        let conv = Conv2dConfig::new(channels, [kernel, kernel])
            .with_padding(padding)
            .init(device);
        let norm = BatchNormConfig::new(channels[1])
            .with_momentum(config.norm_momentum)
            .with_epsilon(config.norm_epsilon)
            .init(device);
        Self { conv, norm }
    }

    fn forward(&self, input: Tensor<B, 4>, slope: f64, update_stats: bool) -> Tensor<B, 4> {
        let x = self.conv.forward(input);
        let x = if update_stats {
            self.norm.forward(x)
        } else {
            self.normalize_with_batch_stats(x)
        };
        leaky_relu(x, slope)
    }

    /// Training-mode batch norm that leaves the running mean and variance untouched.
    fn normalize_with_batch_stats(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = x.dims();
        let mean = x.clone().mean_dim(0).mean_dim(2).mean_dim(3);
        let centered = x - mean;
        let var = centered
            .clone()
            .powf_scalar(2.0)
            .mean_dim(0)
            .mean_dim(2)
            .mean_dim(3);
        let normalized = centered / var.add_scalar(self.norm.epsilon).sqrt();

        let gamma = self.norm.gamma.val().reshape([1, channels, 1, 1]);
        let beta = self.norm.beta.val().reshape([1, channels, 1, 1]);
        normalized * gamma + beta
    }
}

/// Hyper-parameters of the "conv-large" classifier.
#[derive(Config, Debug)]
pub struct ConvLargeConfig {
    #[config(default = 10)]
    pub num_classes: usize,
    #[config(default = 0.1)]
    pub leaky_slope: f64,
    #[config(default = 0.5)]
    pub dropout: f64,
    /// Weight of the current batch in the running statistics.
    #[config(default = 0.01)]
    pub norm_momentum: f64,
    #[config(default = 1e-3)]
    pub norm_epsilon: f64,
}

/// Three convolution stages and a linear head over global average pooling.
///
/// Input `[N, 3, 32, 32]`, output `[N, num_classes]` logits. Spatial sizes run
/// 32 -> 30 -> 15 -> 13 -> 6 -> 1.
#[derive(Module, Debug)]
pub struct ConvLarge<B: Backend> {
    stage1: Vec<ConvBlock<B>>,
    stage2: Vec<ConvBlock<B>>,
    stage3: Vec<ConvBlock<B>>,
    pool: MaxPool2d,
    dropout: Dropout,
    global_pool: AdaptiveAvgPool2d,
    head: Linear<B>,
    leaky_slope: f64,
}

impl ConvLargeConfig {
    pub fn cifar() -> Self {
        Self::new().with_num_classes(NUM_CLASSES)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvLarge<B> {
        let same = || PaddingConfig2d::Same;
        let valid = || PaddingConfig2d::Valid;
        let block = |channels: [usize; 2], kernel: usize, padding: PaddingConfig2d| {
            ConvBlock::<B>::new(device, channels, kernel, padding, self)
        };

        let stage1 = vec![
            block([CHANNELS, 128], 3, same()),
            block([128, 128], 3, same()),
            block([128, 128], 3, valid()),
        ];
        let stage2 = vec![
            block([128, 256], 3, same()),
            block([256, 256], 3, same()),
            block([256, 256], 3, valid()),
        ];
        let stage3 = vec![
            block([256, 512], 3, same()),
            block([512, 256], 1, same()),
            block([256, 128], 1, valid()),
        ];

        ConvLarge {
            stage1,
            stage2,
            stage3,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: LinearConfig::new(128, self.num_classes).init(device),
            leaky_slope: self.leaky_slope,
        }
    }
}

impl<B: Backend> ConvLarge<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward_with(images, true)
    }

    /// Forward pass whose batch norms normalise with batch statistics and do not
    /// record them. Used for the perturbed inputs of the adversarial regulariser.
    pub fn forward_without_stat_updates(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward_with(images, false)
    }

    fn forward_with(&self, images: Tensor<B, 4>, update_stats: bool) -> Tensor<B, 2> {
        let x = self.run_stage(&self.stage1, images, update_stats);
        let x = self.dropout.forward(self.pool.forward(x));
        let x = self.run_stage(&self.stage2, x, update_stats);
        let x = self.dropout.forward(self.pool.forward(x));
        let x = self.run_stage(&self.stage3, x, update_stats);

        let x = self.global_pool.forward(x);
        let [batch, channels, _, _] = x.dims();
        self.head.forward(x.reshape([batch, channels]))
    }

    fn run_stage(
        &self,
        blocks: &[ConvBlock<B>],
        input: Tensor<B, 4>,
        update_stats: bool,
    ) -> Tensor<B, 4> {
        blocks
            .iter()
            .fold(input, |x, block| block.forward(x, self.leaky_slope, update_stats))
    }

    /// Running means and variances of every batch norm, flattened.
    #[cfg(test)]
    pub fn running_statistics(&self) -> Vec<f32> {
        self.stage1
            .iter()
            .chain(&self.stage2)
            .chain(&self.stage3)
            .flat_map(|block| [block.norm.running_mean.value(), block.norm.running_var.value()])
            .flat_map(|stat| stat.into_data().convert::<f32>().to_vec::<f32>().unwrap())
            .collect()
    }
}
