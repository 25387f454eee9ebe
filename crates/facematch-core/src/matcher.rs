//! Gallery matching.
//!
//! A probe face is reported against *every* reference entry that passes the
//! threshold test, not only the closest one.

use crate::types::{Embedding, MatchResult, ReferenceEntry};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum cosine similarity for a positive match.
pub const DEFAULT_COSINE_THRESHOLD: f32 = 0.40;
/// Maximum Euclidean distance between unit embeddings for a positive match.
/// sqrt(2 - 2 * 0.40), the distance equivalent of the cosine default.
pub const DEFAULT_EUCLIDEAN_THRESHOLD: f32 = 1.10;

/// How two embeddings are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Match when cosine similarity >= threshold.
    Cosine,
    /// Match when Euclidean distance <= threshold.
    Euclidean,
}

impl Metric {
    pub fn default_threshold(self) -> f32 {
        match self {
            Metric::Cosine => DEFAULT_COSINE_THRESHOLD,
            Metric::Euclidean => DEFAULT_EUCLIDEAN_THRESHOLD,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Cosine => f.write_str("cosine"),
            Metric::Euclidean => f.write_str("euclidean"),
        }
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            other => Err(format!("unknown metric {other:?} (expected cosine or euclidean)")),
        }
    }
}

/// Strategy for comparing a probe embedding against the reference gallery.
pub trait Matcher {
    fn is_match(&self, probe: &Embedding, reference: &Embedding) -> bool;

    /// Collect the names of all passing entries, in gallery order.
    fn compare(&self, probe: &Embedding, gallery: &[ReferenceEntry]) -> MatchResult {
        let names = gallery
            .iter()
            .filter(|entry| self.is_match(probe, &entry.embedding))
            .map(|entry| entry.name.clone())
            .collect();
        MatchResult::from_names(names)
    }
}

/// Fixed-threshold matcher over a single metric.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdMatcher {
    pub metric: Metric,
    pub threshold: f32,
}

impl ThresholdMatcher {
    pub fn new(metric: Metric, threshold: f32) -> Self {
        Self { metric, threshold }
    }
}

impl Default for ThresholdMatcher {
    fn default() -> Self {
        Self::new(Metric::Cosine, DEFAULT_COSINE_THRESHOLD)
    }
}

impl Matcher for ThresholdMatcher {
    fn is_match(&self, probe: &Embedding, reference: &Embedding) -> bool {
        match self.metric {
            Metric::Cosine => probe.similarity(reference) >= self.threshold,
            Metric::Euclidean => probe.euclidean_distance(reference) <= self.threshold,
        }
    }
}
