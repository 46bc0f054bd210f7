use serde::{Deserialize, Serialize};

use crate::error::OdeError;

/// Sampled solution curve: parallel time and state sequences, monotone in
/// the direction the sampler reported. Freshly allocated and fully owned by
/// the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub t: Vec<f64>,
    pub x: Vec<Vec<f64>>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &[f64])> {
        self.t
            .iter()
            .copied()
            .zip(self.x.iter().map(Vec::as_slice))
    }

    /// Returns the sample at `index`, or `InvalidRequest` past the end.
    pub fn sample(&self, index: usize) -> Result<(f64, &[f64]), OdeError> {
        if index >= self.t.len() {
            return Err(OdeError::InvalidRequest {
                index,
                len: self.t.len(),
            });
        }
        Ok((self.t[index], &self.x[index]))
    }

    /// Returns the stored sample whose time is closest to `t`.
    pub fn nearest(&self, t: f64) -> Result<(f64, &[f64]), OdeError> {
        if self.t.is_empty() {
            return Err(OdeError::InvalidRequest { index: 0, len: 0 });
        }
        let mut best = 0;
        for (index, &time) in self.t.iter().enumerate() {
            if (time - t).abs() < (self.t[best] - t).abs() {
                best = index;
            }
        }
        Ok((self.t[best], &self.x[best]))
    }

    /// Reverses both parallel sequences in place.
    pub fn reverse(&mut self) {
        self.t.reverse();
        self.x.reverse();
    }
}
