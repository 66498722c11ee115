use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use burn_dataset::Dataset;

pub const IMAGE_SIZE: usize = 32;
pub const CHANNELS: usize = 3;
pub const PIXELS_PER_IMAGE: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;
pub const NUM_CLASSES: usize = 10;
const BYTES_PER_RECORD: usize = PIXELS_PER_IMAGE + 1;

pub const CLASS_NAMES: [&str; NUM_CLASSES] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_FILE: &str = "test_batch.bin";

/// One CIFAR-10 image. Pixels are channel-major: the red plane, then green, then blue.
#[derive(Clone, Debug)]
pub struct CifarItem {
    pub image: Vec<u8>,
    pub label: u8,
}

/// A CIFAR-10 split held in memory, decoded from the binary distribution.
#[derive(Clone, Debug, Default)]
pub struct CifarDataset {
    pixels: Vec<u8>,
    labels: Vec<u8>,
}

impl CifarDataset {
    pub fn train(dir: &Path) -> Result<Self> {
        Self::from_files(dir, &TRAIN_FILES)
    }

    pub fn test(dir: &Path) -> Result<Self> {
        Self::from_files(dir, &[TEST_FILE])
    }

    fn from_files(dir: &Path, names: &[&str]) -> Result<Self> {
        let mut dataset = Self::default();
        for name in names {
            let path = dir.join(name);
            let bytes = fs::read(&path).with_context(|| {
                format!(
                    "failed to read {} (download the binary version from https://www.cs.toronto.edu/~kriz/cifar.html)",
                    path.display()
                )
            })?;
            let part = Self::from_bytes(&bytes)
                .with_context(|| format!("failed to decode {}", path.display()))?;
            dataset.pixels.extend_from_slice(&part.pixels);
            dataset.labels.extend_from_slice(&part.labels);
        }
        Ok(dataset)
    }

    /// Decode consecutive `label, 3072 pixel` records.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() % BYTES_PER_RECORD != 0 {
            bail!(
                "record {} is truncated ({} trailing bytes, expected {} per record)",
                bytes.len() / BYTES_PER_RECORD,
                bytes.len() % BYTES_PER_RECORD,
                BYTES_PER_RECORD
            );
        }

        let count = bytes.len() / BYTES_PER_RECORD;
        let mut pixels = Vec::with_capacity(count * PIXELS_PER_IMAGE);
        let mut labels = Vec::with_capacity(count);
        for (index, record) in bytes.chunks_exact(BYTES_PER_RECORD).enumerate() {
            let label = record[0];
            if label as usize >= NUM_CLASSES {
                bail!("record {} has label {} outside 0..{}", index, label, NUM_CLASSES);
            }
            labels.push(label);
            pixels.extend_from_slice(&record[1..]);
        }

        Ok(Self { pixels, labels })
    }

    /// The first `count` items.
    pub fn truncated(mut self, count: usize) -> Self {
        let count = count.min(self.labels.len());
        self.labels.truncate(count);
        self.pixels.truncate(count * PIXELS_PER_IMAGE);
        self
    }

    /// Items at `indices`, in that order.
    pub fn items(&self, indices: &[usize]) -> Result<Vec<CifarItem>> {
        indices
            .iter()
            .map(|&index| {
                self.get(index).ok_or_else(|| {
                    anyhow::anyhow!("dataset index {} out of bounds ({})", index, self.len())
                })
            })
            .collect()
    }
}

impl Dataset<CifarItem> for CifarDataset {
    fn get(&self, index: usize) -> Option<CifarItem> {
        let label = *self.labels.get(index)?;
        let start = index * PIXELS_PER_IMAGE;
        Some(CifarItem {
            image: self.pixels[start..start + PIXELS_PER_IMAGE].to_vec(),
            label,
        })
    }

    fn len(&self) -> usize {
        self.labels.len()
    }
}

#[derive(Clone, Debug)]
pub struct CifarBatch<B: Backend> {
    /// `[N, 3, 32, 32]`, scaled to [0, 1].
    pub images: Tensor<B, 4>,
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> CifarBatch<B> {
    pub fn from_items(device: &B::Device, items: &[CifarItem]) -> Self {
        let mut images = Vec::with_capacity(items.len() * PIXELS_PER_IMAGE);
        let mut labels = Vec::with_capacity(items.len());

        for item in items {
            images.extend(item.image.iter().map(|&pixel| pixel as f32 / 255.0));
            labels.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images, [items.len(), CHANNELS, IMAGE_SIZE, IMAGE_SIZE]),
            device,
        );
        let labels = Tensor::<B, 1, Int>::from_ints(TensorData::new(labels, [items.len()]), device);

        Self { images, labels }
    }
}

/// Split `order` into consecutive batches; the final batch may be short.
pub fn batch_indices(order: &[usize], batch_size: usize) -> impl Iterator<Item = &[usize]> {
    order.chunks(batch_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::{NdArray, NdArrayDevice};

    type TestBackend = NdArray<f32>;

    fn record(label: u8, fill: u8) -> Vec<u8> {
        let mut bytes = vec![label];
        bytes.extend(std::iter::repeat(fill).take(PIXELS_PER_IMAGE));
        bytes
    }

    #[test]
    fn decodes_records() {
        let mut bytes = record(3, 255);
        bytes.extend(record(9, 0));

        let dataset = CifarDataset::from_bytes(&bytes).unwrap();
        assert_eq!(dataset.len(), 2);

        let first = dataset.get(0).unwrap();
        assert_eq!(first.label, 3);
        assert_eq!(first.image.len(), PIXELS_PER_IMAGE);
        assert!(first.image.iter().all(|&p| p == 255));
        assert_eq!(dataset.get(1).unwrap().label, 9);
        assert!(dataset.get(2).is_none());
    }

    #[test]
    fn rejects_truncated_and_bad_labels() {
        let mut bytes = record(1, 0);
        bytes.push(4);
        let err = CifarDataset::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("truncated"));

        let err = CifarDataset::from_bytes(&record(10, 0)).unwrap_err();
        assert!(err.to_string().contains("label 10"));
    }

    #[test]
    fn missing_directory_names_the_file() {
        let dir = std::env::temp_dir().join("vatnet-no-such-cifar-dir");
        let err = CifarDataset::test(&dir).unwrap_err();
        assert!(format!("{err:#}").contains(TEST_FILE));
    }

    #[test]
    fn truncation_and_lookup() {
        let bytes: Vec<u8> = (0..5u8).flat_map(|label| record(label, label)).collect();
        let dataset = CifarDataset::from_bytes(&bytes).unwrap().truncated(3);
        assert_eq!(dataset.len(), 3);

        let items = dataset.items(&[2, 0]).unwrap();
        assert_eq!(items[0].label, 2);
        assert_eq!(items[1].label, 0);
        assert!(dataset.items(&[3]).is_err());
    }

    #[test]
    fn batch_is_scaled_and_shaped() {
        let bytes: Vec<u8> = [record(1, 255), record(4, 0)].concat();
        let dataset = CifarDataset::from_bytes(&bytes).unwrap();
        let items = dataset.items(&[0, 1]).unwrap();

        let batch = CifarBatch::<TestBackend>::from_items(&NdArrayDevice::Cpu, &items);
        assert_eq!(batch.images.dims(), [2, 3, 32, 32]);

        let max = batch.images.clone().max().into_scalar();
        let min = batch.images.min().into_scalar();
        assert_eq!(max, 1.0);
        assert_eq!(min, 0.0);

        let labels = batch.labels.into_data().to_vec::<i64>().unwrap();
        assert_eq!(labels, vec![1, 4]);
    }

    #[test]
    fn last_batch_is_short() {
        let order: Vec<usize> = (0..7).collect();
        let sizes: Vec<usize> = batch_indices(&order, 3).map(|batch| batch.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(batch_indices(&[], 3).count(), 0);
    }
}
