//! Sliding-window moving average.

use crate::error::{CorticalError, Result};
use std::collections::VecDeque;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Mean over the most recent `window_size` values.
///
/// # Example
///
/// ```rust
/// use cortical::utils::MovingAverage;
///
/// let mut avg = MovingAverage::new(2).unwrap();
/// assert_eq!(avg.next(3.0), 3.0);
/// assert_eq!(avg.next(4.0), 3.5);
/// assert_eq!(avg.next(5.0), 4.5);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MovingAverage {
    window: VecDeque<f64>,
    window_size: usize,
    total: f64,
}

impl MovingAverage {
    /// Creates an empty moving average over `window_size` values.
    pub fn new(window_size: usize) -> Result<Self> {
        if window_size == 0 {
            return Err(CorticalError::InvalidParameter {
                name: "window_size",
                message: "Must be greater than 0".to_string(),
            });
        }

        Ok(Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
            total: 0.0,
        })
    }

    /// Pushes a value, dropping the oldest one if the window is full, and
    /// returns the new average.
    pub fn next(&mut self, value: f64) -> f64 {
        if self.window.len() == self.window_size {
            if let Some(oldest) = self.window.pop_front() {
                self.total -= oldest;
            }
        }

        self.window.push_back(value);
        self.total += value;
        self.average()
    }

    /// Returns the current average, or 0 for an empty window.
    pub fn average(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.total / self.window.len() as f64
        }
    }

    /// Number of values currently in the window.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Returns whether no value has been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Values in the window, oldest first.
    pub fn sliding_window(&self) -> impl Iterator<Item = f64> + '_ {
        self.window.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_zero_window_rejected() {
        assert!(MovingAverage::new(0).is_err());
    }

    #[test]
    fn test_sliding_window() {
        let mut avg = MovingAverage::new(3).unwrap();
        assert!(avg.is_empty());
        assert_eq!(avg.average(), 0.0);

        avg.next(3.0);
        avg.next(4.0);
        avg.next(5.0);
        assert_relative_eq!(avg.average(), 4.0);

        avg.next(6.0);
        assert_eq!(avg.len(), 3);
        assert_eq!(avg.sliding_window().collect::<Vec<_>>(), vec![4.0, 5.0, 6.0]);
        assert_relative_eq!(avg.average(), 5.0);
    }
}
