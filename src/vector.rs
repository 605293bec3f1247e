//! 1D vectors of doubles

use crate::metadata::CommonMetadata;
use std::fmt;
use std::ops::Index;

/// A sequence of doubles with free-text header lines
#[derive(Debug, Clone, Default)]
pub struct Vector1D {
    pub meta: CommonMetadata,
    values: Vec<f64>,
}

impl Vector1D {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: Vec<f64>) -> Self {
        let mut vector = Self::new();
        vector.set_values(values);
        vector
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `index`, zero past the end
    pub fn get(&self, index: usize) -> f64 {
        self.values.get(index).copied().unwrap_or(0.0)
    }

    /// Store at `index`; writes past the end are ignored.
    pub fn set(&mut self, index: usize, value: f64) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    pub fn push(&mut self, value: f64) {
        self.values.push(value);
        self.meta.dimx = self.values.len();
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn set_values(&mut self, values: Vec<f64>) {
        self.meta.dimx = values.len();
        self.values = values;
        self.meta.data_valid = true;
    }

    pub fn header(&self) -> &[String] {
        &self.meta.header
    }
}

impl Index<usize> for Vector1D {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.values[index]
    }
}

impl fmt::Display for Vector1D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .meta
            .filename
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        writeln!(f, "+- vector {} ({} values)", name, self.values.len())?;
        write!(f, "+- {} header lines", self.meta.header.len())
    }
}
