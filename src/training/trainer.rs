use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::training::loader::{Batch, BatchLoader};
use crate::training::schedule::StepDecay;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub optimizer: String,
    pub log_interval: usize,
    pub num_workers: usize,
    pub max_batches_per_epoch: usize,
    pub lr_decay: f64,
    pub lr_decay_epochs: Vec<usize>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            epochs: 10,
            learning_rate: 0.001,
            momentum: 0.9,
            weight_decay: 0.0001,
            optimizer: "sgd".to_string(),
            log_interval: 100,
            num_workers: 8,
            max_batches_per_epoch: 100,
            lr_decay: 0.1,
            lr_decay_epochs: vec![40, 80, 100],
        }
    }
}

impl TrainingConfig {
    pub fn schedule(&self) -> StepDecay {
        StepDecay::new(self.learning_rate)
            .with_factor(self.lr_decay)
            .with_epochs(self.lr_decay_epochs.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub loss: f32,
    /// Predicted class per batch entry.
    pub predicted: Vec<usize>,
}

/// The model side of training. Implementations own their parameters and
/// optimizer state.
pub trait Learner {
    /// One optimisation step on `batch` at learning rate `lr`.
    fn step(&mut self, batch: &Batch, lr: f64) -> Result<StepOutput>;

    /// Predictions without updating any state.
    fn evaluate(&mut self, batch: &Batch) -> Result<Vec<usize>>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: usize,
    pub lr: f64,
    pub loss: f64,
    pub train_accuracy: f64,
    pub val_accuracy: Option<f64>,
    pub samples: usize,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochStats>,
}

impl TrainingHistory {
    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.epochs
            .iter()
            .filter_map(|e| e.val_accuracy)
            .fold(None, |best, acc| Some(best.map_or(acc, |b: f64| b.max(acc))))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

/// Running accuracy over a stream of batches.
#[derive(Debug, Default, Clone, Copy)]
struct Accuracy {
    correct: usize,
    total: usize,
}

impl Accuracy {
    fn update(&mut self, labels: &[usize], predicted: &[usize]) -> Result<()> {
        if labels.len() != predicted.len() {
            return Err(anyhow!(
                "{} predictions for a batch of {}",
                predicted.len(),
                labels.len()
            ));
        }
        self.correct += labels.iter().zip(predicted).filter(|(l, p)| l == p).count();
        self.total += labels.len();
        Ok(())
    }

    fn value(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

pub struct Trainer {
    config: TrainingConfig,
    show_progress: bool,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    fn progress_bar(&self, len: usize, epoch: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::with_template("{prefix} [{bar:30}] {pos}/{len} {msg}") {
            bar.set_style(style.progress_chars("=> "));
        }
        bar.set_prefix(format!("epoch {}", epoch));
        bar
    }

    /// Runs every configured epoch, evaluating on `val` after each one.
    pub fn fit<L: Learner>(
        &self,
        learner: &mut L,
        train: &BatchLoader,
        val: Option<&BatchLoader>,
    ) -> Result<TrainingHistory> {
        let schedule = self.config.schedule();
        let mut history = TrainingHistory::default();
        info!(
            "Training {} epochs, {} batches each, optimizer {} (momentum {}, wd {})",
            self.config.epochs,
            train.num_batches(),
            self.config.optimizer,
            self.config.momentum,
            self.config.weight_decay
        );

        for epoch in 0..self.config.epochs {
            let start = Instant::now();
            let lr = schedule.lr_at(epoch);
            if epoch > 0 && lr != schedule.lr_at(epoch - 1) {
                info!("Learning rate decayed to {:e} at epoch {}", lr, epoch);
            }

            let bar = self.progress_bar(train.num_batches(), epoch);
            let mut accuracy = Accuracy::default();
            let mut loss_sum = 0.0f64;
            let mut batches = 0usize;

            for (i, batch) in train.epoch(epoch).enumerate() {
                let batch = batch.with_context(|| format!("epoch {} batch {}", epoch, i))?;
                let output = learner.step(&batch, lr)?;
                if !output.loss.is_finite() {
                    warn!("Non-finite loss at epoch {} batch {}", epoch, i);
                }
                accuracy.update(&batch.labels, &output.predicted)?;
                loss_sum += output.loss as f64;
                batches += 1;

                if self.config.log_interval > 0 && (i + 1) % self.config.log_interval == 0 {
                    info!(
                        "[Epoch {}] [Batch {}] loss={:.4} acc={:.4} lr={:e}",
                        epoch,
                        i + 1,
                        loss_sum / batches as f64,
                        accuracy.value(),
                        lr
                    );
                }
                bar.inc(1);
                bar.set_message(format!("loss {:.4}", loss_sum / batches as f64));
            }
            bar.finish_and_clear();

            let val_accuracy = match val {
                Some(loader) => Some(self.evaluate(learner, loader, epoch)?),
                None => None,
            };

            let stats = EpochStats {
                epoch,
                lr,
                loss: if batches == 0 { 0.0 } else { loss_sum / batches as f64 },
                train_accuracy: accuracy.value(),
                val_accuracy,
                samples: accuracy.total,
                elapsed_secs: start.elapsed().as_secs_f64(),
            };
            info!(
                "[Epoch {}] train-acc={:.4} val-acc={} loss={:.4} time={:.1}s",
                epoch,
                stats.train_accuracy,
                stats
                    .val_accuracy
                    .map_or_else(|| "n/a".to_string(), |a| format!("{a:.4}")),
                stats.loss,
                stats.elapsed_secs
            );
            history.epochs.push(stats);
        }

        Ok(history)
    }

    pub fn evaluate<L: Learner>(&self, learner: &mut L, loader: &BatchLoader, epoch: usize) -> Result<f64> {
        let mut accuracy = Accuracy::default();
        for batch in loader.epoch(epoch) {
            let batch = batch?;
            let predicted = learner.evaluate(&batch)?;
            accuracy.update(&batch.labels, &predicted)?;
        }
        Ok(accuracy.value())
    }
}

/// Class-prior baseline: predicts the most frequent label seen so far and
/// reports the cross-entropy of the smoothed prior. Exercises the full data
/// path without a network.
#[derive(Debug, Clone)]
pub struct PriorLearner {
    counts: Vec<u64>,
}

impl PriorLearner {
    pub fn new(num_classes: usize) -> Self {
        Self {
            counts: vec![0; num_classes.max(1)],
        }
    }

    fn majority(&self) -> usize {
        self.counts
            .iter()
            .enumerate()
            .fold((0, 0), |best, (i, &c)| if c > best.1 { (i, c) } else { best })
            .0
    }

    fn probability(&self, label: usize) -> f64 {
        let total: u64 = self.counts.iter().sum();
        let count = self.counts.get(label).copied().unwrap_or(0);
        (count as f64 + 1.0) / (total as f64 + self.counts.len() as f64)
    }
}

impl Learner for PriorLearner {
    fn step(&mut self, batch: &Batch, _lr: f64) -> Result<StepOutput> {
        let predicted = vec![self.majority(); batch.len()];
        let loss = batch
            .labels
            .iter()
            .map(|&l| -self.probability(l).ln())
            .sum::<f64>()
            / batch.len().max(1) as f64;

        for &label in &batch.labels {
            if label >= self.counts.len() {
                self.counts.resize(label + 1, 0);
            }
            self.counts[label] += 1;
        }
        Ok(StepOutput {
            loss: loss as f32,
            predicted,
        })
    }

    fn evaluate(&mut self, batch: &Batch) -> Result<Vec<usize>> {
        Ok(vec![self.majority(); batch.len()])
    }
}
