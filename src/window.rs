//! Rolling walk-forward window boundaries.
//!
//! A series of length `L` is cut into `n_periods` overlapping folds. Every
//! fold has a training window, an optional validation window carved from
//! the tail of the training window, and a test window. Successive folds
//! shift forward by exactly one test window.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// Invalid-argument errors raised before any offset is produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WindowError {
    #[error("series length must be positive")]
    EmptySeries,

    #[error("test fraction must be in (0, 1), got {0}")]
    TestFraction(f64),

    #[error("validation fraction must be in [0, 1), got {0}")]
    ValFraction(f64),

    #[error("number of periods must be positive")]
    NoPeriods,

    #[error("split denominator must be positive, got {0}")]
    Denominator(f64),

    #[error("{window} window is empty for len={len}, test_fraction={test_fraction}, n_periods={n_periods}")]
    EmptyWindow {
        window: &'static str,
        len: usize,
        test_fraction: f64,
        n_periods: usize,
    },
}

/// Inputs of a split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowParams {
    /// Series length `L`.
    pub len: usize,
    /// Share of each fold reserved for testing, in `(0, 1)`.
    pub test_fraction: f64,
    /// Share of the training window moved into validation, in `[0, 1)`.
    pub val_fraction: f64,
    /// Number of rolling folds.
    pub n_periods: usize,
}

/// Window sizes shared by every period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSizes {
    pub test: usize,
    /// Training size after the validation carve-out.
    pub train: usize,
    pub val: usize,
}

/// Boundary offsets of one period, clamped to `[0, L)`.
///
/// `train = [train_start, train_end)`, `validation = [train_end, val_end)`,
/// `test = [val_end, test_end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub period: usize,
    pub train_start: usize,
    pub train_end: usize,
    pub val_end: usize,
    pub test_end: usize,
}

impl Window {
    pub fn train_range(&self) -> Range<usize> {
        self.train_start..self.train_end
    }

    pub fn test_range(&self) -> Range<usize> {
        self.val_end..self.test_end
    }
}

impl WindowParams {
    pub fn new(len: usize, test_fraction: f64, val_fraction: f64, n_periods: usize) -> Self {
        Self {
            len,
            test_fraction,
            val_fraction,
            n_periods,
        }
    }

    /// Check the scalar inputs without deriving sizes.
    pub fn validate(&self) -> Result<(), WindowError> {
        if self.len == 0 {
            return Err(WindowError::EmptySeries);
        }
        if !self.test_fraction.is_finite() || self.test_fraction <= 0.0 || self.test_fraction >= 1.0 {
            return Err(WindowError::TestFraction(self.test_fraction));
        }
        if !self.val_fraction.is_finite() || self.val_fraction < 0.0 || self.val_fraction >= 1.0 {
            return Err(WindowError::ValFraction(self.val_fraction));
        }
        if self.n_periods == 0 {
            return Err(WindowError::NoPeriods);
        }
        Ok(())
    }

    fn empty(&self, window: &'static str) -> WindowError {
        WindowError::EmptyWindow {
            window,
            len: self.len,
            test_fraction: self.test_fraction,
            n_periods: self.n_periods,
        }
    }

    /// Derive the test, training and validation sizes.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn sizes(&self) -> Result<WindowSizes, WindowError> {
        self.validate()?;

        // training windows per test window
        let ratio = 1.0 / self.test_fraction - 1.0;
        let denom = ratio + self.n_periods as f64;
        if !denom.is_finite() || denom <= 0.0 {
            return Err(WindowError::Denominator(denom));
        }

        let test = (self.len as f64 / denom).floor() as usize;
        if test == 0 {
            return Err(self.empty("test"));
        }
        let full_train = (test as f64 * ratio).floor() as usize;
        let val = if self.val_fraction > 0.0 {
            (self.val_fraction * full_train as f64).floor() as usize
        } else {
            0
        };
        let train = full_train - val;
        if train == 0 {
            return Err(self.empty("train"));
        }
        // the test window starts after validation but still ends at train_end + test
        if val >= test {
            return Err(self.empty("test"));
        }

        Ok(WindowSizes { test, train, val })
    }

    /// Boundary offsets for every period.
    pub fn windows(&self) -> Result<Vec<Window>, WindowError> {
        let sizes = self.sizes()?;
        self.windows_with(&sizes)
    }

    fn windows_with(&self, sizes: &WindowSizes) -> Result<Vec<Window>, WindowError> {
        let last = self.len - 1;
        (0..self.n_periods)
            .map(|period| {
                let train_start = period.saturating_mul(sizes.test);
                let train_end = train_start.saturating_add(sizes.train);
                let val_end = train_end.saturating_add(sizes.val);
                let test_end = train_end.saturating_add(sizes.test);
                let w = Window {
                    period,
                    train_start: train_start.min(last),
                    train_end: train_end.min(last),
                    val_end: val_end.min(last),
                    test_end: test_end.min(last),
                };
                // the clamp can swallow the last test window
                if w.val_end >= w.test_end {
                    return Err(self.empty("test"));
                }
                Ok(w)
            })
            .collect()
    }

    /// Sizes and windows together.
    pub fn plan(&self) -> Result<WindowPlan, WindowError> {
        let sizes = self.sizes()?;
        let windows = self.windows_with(&sizes)?;
        Ok(WindowPlan {
            params: *self,
            sizes,
            windows,
        })
    }
}

/// Compute the window boundaries of every period.
///
/// # Errors
/// Returns a [`WindowError`] if a fraction is out of range, `n_periods` is
/// zero, or any derived window would be empty.
pub fn compute_windows(
    len: usize,
    test_fraction: f64,
    val_fraction: f64,
    n_periods: usize,
) -> Result<Vec<Window>, WindowError> {
    WindowParams::new(len, test_fraction, val_fraction, n_periods).windows()
}

/// A full split description, serializable for manifests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowPlan {
    pub params: WindowParams,
    pub sizes: WindowSizes,
    pub windows: Vec<Window>,
}

impl fmt::Display for WindowPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "len={} test_fraction={} val_fraction={} n_periods={}",
            self.params.len, self.params.test_fraction, self.params.val_fraction, self.params.n_periods
        )?;
        writeln!(
            f,
            "train={} val={} test={}",
            self.sizes.train, self.sizes.val, self.sizes.test
        )?;
        writeln!(
            f,
            "{:>6} {:>11} {:>9} {:>7} {:>8}",
            "period", "train_start", "train_end", "val_end", "test_end"
        )?;
        for w in &self.windows {
            writeln!(
                f,
                "{:>6} {:>11} {:>9} {:>7} {:>8}",
                w.period, w.train_start, w.train_end, w.val_end, w.test_end
            )?;
        }
        Ok(())
    }
}
