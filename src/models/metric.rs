//! Distance metrics and their conversion to [`Similarity`].

use serde::{Deserialize, Serialize};

use super::search::Similarity;

/// Native scoring function of a collection.
///
/// Every store ranks on raw scores in the metric's own range and converts them
/// here, once, before anything leaves the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Cosine similarity in `[-1, 1]`, higher is closer.
    #[default]
    Cosine,
    /// L2 distance in `[0, inf)`, lower is closer.
    Euclidean,
    /// Dot product in `(-inf, inf)`, higher is closer.
    Dot,
}

impl DistanceMetric {
    /// Map a raw score onto `[0, 1]`. Monotonic in closeness for every metric,
    /// but not strictly: large dot products all land on 1.0, so hits are
    /// ranked with [`DistanceMetric::closeness`] instead.
    pub fn similarity(self, raw: f32) -> Similarity {
        if raw.is_nan() {
            return Similarity::MIN;
        }
        let raw = f64::from(raw);
        let value = match self {
            DistanceMetric::Cosine => (1.0 + raw) / 2.0,
            DistanceMetric::Euclidean => 1.0 / (1.0 + raw.max(0.0)),
            DistanceMetric::Dot => 1.0 / (1.0 + (-raw).exp()),
        };
        Similarity::new(value as f32)
    }

    /// Ranking key for a raw score: larger is closer, for every metric.
    /// NaN ranks last.
    pub fn closeness(self, raw: f32) -> f64 {
        if raw.is_nan() {
            return f64::NEG_INFINITY;
        }
        let raw = f64::from(raw);
        match self {
            DistanceMetric::Cosine | DistanceMetric::Dot => raw,
            DistanceMetric::Euclidean => -raw,
        }
    }

    /// Order two raw scores so the closer one comes first.
    pub fn rank(self, a: f32, b: f32) -> std::cmp::Ordering {
        self.closeness(b).total_cmp(&self.closeness(a))
    }

    /// Raw score between two vectors of equal length.
    ///
    /// Cosine of a zero vector is undefined and reported as `-1` (least similar).
    pub fn raw_score(self, a: &[f32], b: &[f32]) -> f32 {
        let mut dot = 0.0f64;
        let mut norm_a = 0.0f64;
        let mut norm_b = 0.0f64;
        let mut dist = 0.0f64;
        for (&x, &y) in a.iter().zip(b.iter()) {
            let (x, y) = (f64::from(x), f64::from(y));
            dot += x * y;
            norm_a += x * x;
            norm_b += y * y;
            dist += (x - y) * (x - y);
        }

        match self {
            DistanceMetric::Cosine => {
                if norm_a == 0.0 || norm_b == 0.0 {
                    return -1.0;
                }
                (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
            }
            DistanceMetric::Euclidean => dist.sqrt() as f32,
            DistanceMetric::Dot => dot as f32,
        }
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" | "euclid" | "l2" => Ok(DistanceMetric::Euclidean),
            "dot" => Ok(DistanceMetric::Dot),
            _ => Err(format!("unknown distance metric: {s}")),
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistanceMetric::Cosine => write!(f, "cosine"),
            DistanceMetric::Euclidean => write!(f, "euclidean"),
            DistanceMetric::Dot => write!(f, "dot"),
        }
    }
}
