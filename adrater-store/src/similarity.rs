//! Vector similarity search types (pgvector)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::criteria::Criteria;
use crate::error::StoreError;
use crate::value::Record;

/// Distance function used to rank rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Euclidean distance
    #[default]
    L2,
    /// Negative inner product, so ascending order still means "closest first"
    InnerProduct,
    Cosine,
}

impl DistanceMetric {
    /// pgvector operator for this metric.
    pub fn operator(self) -> &'static str {
        match self {
            DistanceMetric::L2 => "<->",
            DistanceMetric::InnerProduct => "<#>",
            DistanceMetric::Cosine => "<=>",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DistanceMetric::L2 => "l2",
            DistanceMetric::InnerProduct => "inner_product",
            DistanceMetric::Cosine => "cosine",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "l2" | "euclidean" => Ok(DistanceMetric::L2),
            "inner_product" | "dot" | "dot_product" => Ok(DistanceMetric::InnerProduct),
            "cosine" => Ok(DistanceMetric::Cosine),
            _ => Err(StoreError::configuration(format!(
                "unknown distance metric '{s}' (expected l2, inner_product or cosine)"
            ))),
        }
    }
}

/// Parameters for [`crate::Transaction::similarity_search`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityQuery {
    pub column: String,
    pub vector: Vec<f32>,
    pub k: u32,
    pub metric: DistanceMetric,
    /// Pre-filter applied before ranking
    pub filter: Criteria,
}

impl SimilarityQuery {
    pub fn new(column: &str, vector: Vec<f32>, k: u32) -> Self {
        Self {
            column: column.to_owned(),
            vector,
            k,
            metric: DistanceMetric::default(),
            filter: Criteria::new(),
        }
    }

    pub fn metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn filter(mut self, filter: Criteria) -> Self {
        self.filter = filter;
        self
    }
}

/// A matching row and its distance to the query vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub record: Record,
    pub distance: f64,
}
