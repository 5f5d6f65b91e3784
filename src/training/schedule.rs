/// Step decay: the rate is multiplied by `factor` at each listed epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDecay {
    base_lr: f64,
    factor: f64,
    epochs: Vec<usize>,
}

impl StepDecay {
    pub fn new(base_lr: f64) -> Self {
        Self {
            base_lr,
            factor: 0.1,
            epochs: vec![40, 80, 100],
        }
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_epochs(mut self, mut epochs: Vec<usize>) -> Self {
        epochs.sort_unstable();
        self.epochs = epochs;
        self
    }

    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }

    /// Learning rate in effect during `epoch` (0-based).
    pub fn lr_at(&self, epoch: usize) -> f64 {
        let decays = self.epochs.iter().filter(|&&e| e <= epoch).count();
        self.base_lr * self.factor.powi(decays as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_default_decay_points() {
        let schedule = StepDecay::new(0.001);
        assert!(close(schedule.lr_at(0), 0.001));
        assert!(close(schedule.lr_at(39), 0.001));
        assert!(close(schedule.lr_at(40), 0.0001));
        assert!(close(schedule.lr_at(80), 0.00001));
        assert!(close(schedule.lr_at(150), 0.000001));
    }

    #[test]
    fn test_custom_epochs_are_sorted() {
        let schedule = StepDecay::new(1.0).with_factor(0.5).with_epochs(vec![5, 2]);
        assert!(close(schedule.lr_at(1), 1.0));
        assert!(close(schedule.lr_at(2), 0.5));
        assert!(close(schedule.lr_at(5), 0.25));
    }
}
