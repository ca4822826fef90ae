//! Vocabulary / bucketization preprocessing for sequence models.
//!
//! Converts an initial sample pulled from the environment into a finite
//! symbol table. Continuous-valued samples are bucketized over the
//! observed span with a fixed bucket count; discrete byte samples map to a
//! direct index table in first-seen order.
//!
//! A cancelled build returns `None` ("preprocessing aborted"), which is
//! distinct from an empty-but-valid table. Every value later observed
//! must resolve to an existing bucket; unknown values fail fast.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::cancel::CancelToken;

/// Default bucket count for continuous-valued samples.
pub const DEFAULT_BUCKET_COUNT: usize = 128;

// Cancellation is polled between chunks of this many values.
const SCAN_CHUNK: usize = 1024;

/// Error raised when resolving values against the table.
#[derive(Debug, Clone, PartialEq)]
pub enum VocabError {
    /// The value does not fall into any bucket.
    UnknownValue(f64),
    /// The table is empty and cannot resolve anything.
    EmptyTable,
}

impl fmt::Display for VocabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VocabError::UnknownValue(v) => write!(f, "value {} not present in vocabulary", v),
            VocabError::EmptyTable => write!(f, "vocabulary table is empty"),
        }
    }
}

impl std::error::Error for VocabError {}

/// One bucket of the table: a half-open `[minimum, maximum)` range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Inclusive lower edge.
    pub minimum: f64,
    /// Exclusive upper edge.
    pub maximum: f64,
    /// Values from the build sample that landed here.
    pub count: usize,
}

impl Bucket {
    /// Whether a value falls into this bucket.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.minimum && value < self.maximum
    }

    /// Representative value of the bucket.
    pub fn midpoint(&self) -> f64 {
        (self.minimum + self.maximum) / 2.0
    }
}

/// Finite mapping from raw symbol/value to bucket index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketCollection {
    buckets: Vec<Bucket>,
    symbolic: bool,
}

impl BucketCollection {
    /// Bucketize a continuous-valued sample into `bucket_count` equal-width
    /// ranges over the observed span.
    ///
    /// Returns `None` if cancellation is signaled mid-scan; the caller must
    /// treat that as "preprocessing aborted", not as an empty vocabulary.
    pub fn bucketize(
        values: &[f64],
        bucket_count: usize,
        cancel: &CancelToken,
    ) -> Option<BucketCollection> {
        if values.is_empty() || bucket_count == 0 {
            return Some(Self {
                buckets: Vec::new(),
                symbolic: false,
            });
        }

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for chunk in values.chunks(SCAN_CHUNK) {
            if cancel.is_cancelled() {
                return None;
            }
            for &v in chunk {
                if v < min {
                    min = v;
                }
                if v > max {
                    max = v;
                }
            }
        }

        // Degenerate span still gets a usable single-value range.
        let span = if max > min { max - min } else { 1.0 };
        let width = span / bucket_count as f64;
        let mut buckets: Vec<Bucket> = (0..bucket_count)
            .map(|i| Bucket {
                minimum: min + i as f64 * width,
                maximum: min + (i + 1) as f64 * width,
                count: 0,
            })
            .collect();
        // Widen the top edge so the sample maximum resolves.
        if let Some(last) = buckets.last_mut() {
            last.maximum = (min + span).max(max) + width * 1e-9;
        }

        for chunk in values.chunks(SCAN_CHUNK) {
            if cancel.is_cancelled() {
                return None;
            }
            for &v in chunk {
                let idx = (((v - min) / width) as usize).min(bucket_count - 1);
                buckets[idx].count += 1;
            }
        }

        Some(Self {
            buckets,
            symbolic: false,
        })
    }

    /// Build a direct index table from the distinct byte values of a
    /// sample, in first-seen order. No bucketing: the domain is already
    /// finite.
    pub fn from_symbols(bytes: &[u8]) -> BucketCollection {
        let mut seen = [false; 256];
        let mut buckets = Vec::new();
        for &b in bytes {
            if !seen[b as usize] {
                seen[b as usize] = true;
                buckets.push(Bucket {
                    minimum: b as f64,
                    maximum: b as f64 + 1.0,
                    count: 0,
                });
            }
        }
        for &b in bytes {
            if let Some(idx) = buckets.iter().position(|bucket| bucket.contains(b as f64)) {
                buckets[idx].count += 1;
            }
        }
        Self {
            buckets,
            symbolic: true,
        }
    }

    /// Resolve a value to its bucket index. Unknown values fail fast.
    pub fn find_index(&self, value: f64) -> Result<usize, VocabError> {
        if self.buckets.is_empty() {
            return Err(VocabError::EmptyTable);
        }
        self.buckets
            .iter()
            .position(|b| b.contains(value))
            .ok_or(VocabError::UnknownValue(value))
    }

    /// Representative value of a bucket, for output conversion.
    pub fn value_at(&self, index: usize) -> Option<f64> {
        self.buckets.get(index).map(Bucket::midpoint)
    }

    /// Translate a whole sequence of values into bucket indices.
    pub fn translate(&self, values: &[f64]) -> Result<Vec<usize>, VocabError> {
        values.iter().map(|&v| self.find_index(v)).collect()
    }

    /// Access the buckets in table order.
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Whether this is a symbolic (direct-index) table.
    pub fn is_symbolic(&self) -> bool {
        self.symbolic
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
