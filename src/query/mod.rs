pub mod aggregates;
pub mod cache;
pub mod parser;
pub mod range;
pub mod transform;

pub use aggregates::AggregateFunction;
pub use cache::{CacheStats, TransformCache};
pub use parser::{parse_transform, CompareOp, ParseError, Stage};
pub use range::{index_range, time_range, time_to_index};
pub use transform::{Pipeline, TransformError};

use crate::data::Datapoint;

/// Apply an optional transform to query results. An empty spec returns the
/// input unchanged.
pub fn apply_transform(
    datapoints: Vec<Datapoint>,
    spec: &str,
) -> Result<Vec<Datapoint>, TransformError> {
    if spec.trim().is_empty() {
        return Ok(datapoints);
    }
    Pipeline::parse(spec)?.apply(datapoints)
}
