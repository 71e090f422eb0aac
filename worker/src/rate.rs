use std::collections::VecDeque;

/// Default number of samples averaged per published rate.
pub const DEFAULT_WINDOW: usize = 32;

/// Sliding-window frame rate estimator.
///
/// Each positive elapsed-time sample becomes an instantaneous rate
/// (`1000 / elapsed_ms`). The published average only changes once every
/// `window` accepted samples: the queue is drained, averaged and the sample
/// counter reset. Memory stays bounded at `window` samples.
///
/// Not synchronized; owned by a single run-loop thread.
#[derive(Debug)]
pub struct RateEstimator {
    window: usize,
    samples: VecDeque<f64>,
    sample_number: usize,
    average: f64,
}

impl RateEstimator {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window + 1),
            sample_number: 0,
            average: 0.0,
        }
    }

    /// Record one iteration latency. Returns the new average when this
    /// sample completed a window.
    ///
    /// Non-positive (or non-finite) samples are ignored entirely.
    pub fn record_sample(&mut self, elapsed_ms: f64) -> Option<f64> {
        if elapsed_ms > 0.0 && elapsed_ms.is_finite() {
            self.samples.push_back(1000.0 / elapsed_ms);
            self.sample_number += 1;
        }

        if self.samples.len() > self.window {
            self.samples.pop_front();
        }

        if self.samples.len() == self.window && self.sample_number == self.window {
            let sum: f64 = self.samples.drain(..).sum();
            self.average = sum / self.window as f64;
            self.sample_number = 0;
            return Some(self.average);
        }
        None
    }

    /// Last published average, 0.0 until the first window completes.
    pub fn average(&self) -> f64 {
        self.average
    }

    /// Samples accepted since the last publish.
    pub fn sample_count(&self) -> usize {
        self.sample_number
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

impl Default for RateEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
