use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Result};
use crossbeam::channel::{bounded, Receiver};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error};

use crate::clip::assembler::concat_batch;
use crate::clip::ClipTensor;
use crate::training::dataset::VideoDataset;

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub batch_size: usize,
    pub shuffle: bool,
    pub num_workers: usize,
    /// Batches decoded ahead of the consumer.
    pub prefetch: usize,
    pub max_batches: Option<usize>,
    pub seed: u64,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            batch_size: 8,
            shuffle: true,
            num_workers: 8,
            prefetch: 2,
            max_batches: None,
            seed: 0,
        }
    }
}

#[derive(Debug)]
pub struct Batch {
    pub data: ClipTensor,
    pub labels: Vec<usize>,
    pub indices: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Each sample gets its own generator so results do not depend on which
/// worker decodes it.
fn sample_seed(seed: u64, epoch: usize, index: usize) -> u64 {
    seed ^ ((epoch as u64) << 32) ^ index as u64
}

/// Decodes `indices` in parallel and stacks them into one batch.
pub fn load_batch(dataset: &VideoDataset, indices: &[usize], seed: u64, epoch: usize) -> Result<Batch> {
    let loaded = indices
        .par_iter()
        .map(|&i| dataset.get(i, &mut StdRng::seed_from_u64(sample_seed(seed, epoch, i))))
        .collect::<Result<Vec<_>>>()?;

    let (tensors, labels): (Vec<_>, Vec<_>) = loaded.into_iter().unzip();
    Ok(Batch {
        data: concat_batch(&tensors)?,
        labels,
        indices: indices.to_vec(),
    })
}

/// Iterates a dataset in batches, decoding on a background thread.
pub struct BatchLoader {
    dataset: Arc<VideoDataset>,
    options: LoaderOptions,
    pool: Arc<ThreadPool>,
}

impl BatchLoader {
    pub fn new(dataset: Arc<VideoDataset>, options: LoaderOptions) -> Result<Self> {
        if options.batch_size == 0 {
            return Err(anyhow!("batch size must be > 0"));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(options.num_workers.max(1))
            .thread_name(|i| format!("clip-loader-{i}"))
            .build()?;
        Ok(Self {
            dataset,
            options,
            pool: Arc::new(pool),
        })
    }

    pub fn dataset(&self) -> &VideoDataset {
        &self.dataset
    }

    pub fn num_batches(&self) -> usize {
        let full = self.dataset.len().div_ceil(self.options.batch_size);
        match self.options.max_batches {
            Some(limit) => full.min(limit),
            None => full,
        }
    }

    /// Sample order for `epoch`, shuffled with a per-epoch seed when enabled.
    pub fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.options.shuffle {
            let mut rng = StdRng::seed_from_u64(self.options.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
    }

    pub fn epoch(&self, epoch: usize) -> EpochBatches {
        let (tx, rx) = bounded(self.options.prefetch.max(1));
        let order = self.epoch_order(epoch);
        let dataset = Arc::clone(&self.dataset);
        let pool = Arc::clone(&self.pool);
        let batch_size = self.options.batch_size;
        let num_batches = self.num_batches();
        let seed = self.options.seed;

        let handle = thread::spawn(move || {
            for (i, chunk) in order.chunks(batch_size).take(num_batches).enumerate() {
                let batch = pool.install(|| load_batch(&dataset, chunk, seed, epoch));
                if let Err(e) = &batch {
                    error!("Failed to load batch {} of epoch {}: {:#}", i, epoch, e);
                }
                // The consumer went away; stop decoding.
                if tx.send(batch).is_err() {
                    debug!("Epoch {} loader stopped early at batch {}", epoch, i);
                    break;
                }
            }
        });

        EpochBatches {
            rx,
            handle: Some(handle),
        }
    }
}

pub struct EpochBatches {
    rx: Receiver<Result<Batch>>,
    handle: Option<JoinHandle<()>>,
}

impl Iterator for EpochBatches {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rx.recv() {
            Ok(batch) => Some(batch),
            Err(_) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        return Some(Err(anyhow!("batch loader thread panicked")));
                    }
                }
                None
            }
        }
    }
}
