//! Read-only post-processing of query results
//!
//! A pipeline is evaluated as a chain of iterator adapters, so stages pull
//! datapoints one at a time from whatever produced them.

use super::aggregates::{numeric, Accumulator, AggregateFunction};
use super::parser::{parse_transform, ParseError, Stage};
use crate::data::{Datapoint, Value};

type DatapointIter<'a> = Box<dyn Iterator<Item = Result<Datapoint, TransformError>> + Send + 'a>;

/// A parsed transform
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn parse(spec: &str) -> Result<Self, TransformError> {
        let spec = spec.trim();
        let stages = if spec.is_empty() {
            Vec::new()
        } else {
            parse_transform(spec)?
        };
        Ok(Self { stages })
    }

    pub fn is_identity(&self) -> bool {
        self.stages.iter().all(|s| *s == Stage::Identity)
    }

    /// Lazily evaluate the pipeline over `input`
    pub fn evaluate<'a, I>(&'a self, input: I) -> impl Iterator<Item = Result<Datapoint, TransformError>> + 'a
    where
        I: IntoIterator<Item = Datapoint>,
        I::IntoIter: Send + 'a,
    {
        let mut iter: DatapointIter<'a> = Box::new(input.into_iter().map(Ok));
        for stage in &self.stages {
            iter = apply_stage(stage, iter);
        }
        iter
    }

    /// Evaluate and collect, failing on the first evaluation error
    pub fn apply(&self, input: Vec<Datapoint>) -> Result<Vec<Datapoint>, TransformError> {
        if self.is_identity() {
            return Ok(input);
        }
        self.evaluate(input).collect()
    }
}

fn apply_stage<'a>(stage: &'a Stage, iter: DatapointIter<'a>) -> DatapointIter<'a> {
    match stage {
        Stage::Identity => iter,
        Stage::Filter { op, operand } => Box::new(iter.filter(move |item| match item {
            Ok(dp) => op.holds(&dp.value, operand),
            Err(_) => true,
        })),
        Stage::Scale(factor) => Box::new(iter.map(move |item| {
            let mut dp = item?;
            dp.value = arithmetic("scale", &dp.value, |v| v * factor)?;
            Ok(dp)
        })),
        Stage::Offset(delta) => Box::new(iter.map(move |item| {
            let mut dp = item?;
            dp.value = arithmetic("offset", &dp.value, |v| v + delta)?;
            Ok(dp)
        })),
        Stage::Aggregate(function) => Box::new(AggregateIter::new(*function, iter)),
        Stage::Limit(n) => {
            let n = *n;
            let mut taken = 0usize;
            Box::new(iter.take_while(move |item| {
                if item.is_ok() {
                    taken += 1;
                    taken <= n
                } else {
                    true
                }
            }))
        }
        Stage::Skip(n) => {
            let mut remaining = *n;
            Box::new(iter.filter(move |item| match item {
                Ok(_) if remaining > 0 => {
                    remaining -= 1;
                    false
                }
                _ => true,
            }))
        }
        Stage::Changed => {
            let mut previous: Option<Value> = None;
            Box::new(iter.filter(move |item| match item {
                Ok(dp) => {
                    if previous.as_ref() == Some(&dp.value) {
                        false
                    } else {
                        previous = Some(dp.value.clone());
                        true
                    }
                }
                Err(_) => true,
            }))
        }
    }
}

/// Integers stay integers when the result is integral and in range
fn arithmetic(stage: &'static str, value: &Value, f: impl Fn(f64) -> f64) -> Result<Value, TransformError> {
    let result = f(numeric(stage, value)?);
    if matches!(value, Value::Int64(_))
        && result.fract() == 0.0
        && result >= i64::MIN as f64
        && result < i64::MAX as f64
    {
        return Ok(Value::Int64(result as i64));
    }
    Ok(Value::Float64(result))
}

/// Drains its input on the first `next` and yields at most one datapoint.
/// `first` keeps the first input's timestamp; everything else is stamped
/// with the last input's timestamp. Empty input yields nothing.
struct AggregateIter<'a> {
    function: AggregateFunction,
    inner: Option<DatapointIter<'a>>,
}

impl<'a> AggregateIter<'a> {
    fn new(function: AggregateFunction, inner: DatapointIter<'a>) -> Self {
        Self {
            function,
            inner: Some(inner),
        }
    }
}

impl Iterator for AggregateIter<'_> {
    type Item = Result<Datapoint, TransformError>;

    fn next(&mut self) -> Option<Self::Item> {
        let inner = self.inner.take()?;
        let mut acc: Box<dyn Accumulator> = self.function.accumulator();
        let mut first_ts = None;
        let mut last_ts = None;

        for item in inner {
            let dp = match item {
                Ok(dp) => dp,
                Err(e) => return Some(Err(e)),
            };
            if let Err(e) = acc.accumulate(&dp.value) {
                return Some(Err(e));
            }
            first_ts.get_or_insert(dp.timestamp);
            last_ts = Some(dp.timestamp);
        }

        let timestamp = match self.function {
            AggregateFunction::First => first_ts?,
            _ => last_ts?,
        };
        Some(Ok(Datapoint {
            timestamp,
            value: acc.result(),
        }))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransformError {
    #[error("Invalid transform: {0}")]
    Parse(#[from] ParseError),

    #[error("Stage '{stage}' needs numeric values, got {found}")]
    NotNumeric {
        stage: &'static str,
        found: &'static str,
    },

    #[error("Cannot compare {left} with {right}")]
    Incomparable {
        left: &'static str,
        right: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(values: &[i64]) -> Vec<Datapoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Datapoint::new(i as f64 + 1.0, *v))
            .collect()
    }

    fn run(spec: &str, input: Vec<Datapoint>) -> Result<Vec<Datapoint>, TransformError> {
        Pipeline::parse(spec)?.apply(input)
    }

    #[test]
    fn test_empty_spec_is_identity() {
        let input = points(&[1, 2, 3]);
        assert_eq!(run("", input.clone()).unwrap(), input);
        assert_eq!(run("  ", input.clone()).unwrap(), input);
        assert_eq!(run("$", input.clone()).unwrap(), input);
    }

    #[test]
    fn test_filter_and_scale() {
        let output = run("if > 2 | scale 10", points(&[1, 2, 3, 4])).unwrap();
        assert_eq!(
            output,
            vec![Datapoint::new(3.0, 30i64), Datapoint::new(4.0, 40i64)]
        );
    }

    #[test]
    fn test_offset_keeps_float_precision() {
        let output = run("offset 0.5", points(&[1])).unwrap();
        assert_eq!(output, vec![Datapoint::new(1.0, 1.5f64)]);
    }

    #[test]
    fn test_aggregates() {
        let output = run("sum", points(&[1, 2, 3])).unwrap();
        assert_eq!(output, vec![Datapoint::new(3.0, 6i64)]);

        let output = run("first", points(&[7, 8, 9])).unwrap();
        assert_eq!(output, vec![Datapoint::new(1.0, 7i64)]);

        let output = run("if >= 8 | count", points(&[7, 8, 9])).unwrap();
        assert_eq!(output, vec![Datapoint::new(3.0, 2i64)]);

        assert!(run("mean", Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_limit_skip_changed() {
        let output = run("changed | skip 1 | limit 2", points(&[1, 1, 2, 2, 3, 4])).unwrap();
        let values: Vec<Value> = output.into_iter().map(|dp| dp.value).collect();
        assert_eq!(values, vec![Value::Int64(2), Value::Int64(3)]);
    }

    #[test]
    fn test_evaluation_errors() {
        let input = vec![
            Datapoint::new(1.0, 1i64),
            Datapoint::new(2.0, Value::String("x".into())),
        ];
        assert!(matches!(
            run("scale 2", input.clone()),
            Err(TransformError::NotNumeric { stage: "scale", .. })
        ));
        assert!(matches!(
            run("max", input),
            Err(TransformError::Incomparable { .. })
        ));
    }

    #[test]
    fn test_parse_error_surfaces() {
        assert!(matches!(
            Pipeline::parse("bogus"),
            Err(TransformError::Parse(ParseError::UnknownStage(_)))
        ));
    }

    #[test]
    fn test_evaluation_is_lazy() {
        let pipeline = Pipeline::parse("limit 3").unwrap();
        let unbounded = (0..).map(|i| Datapoint::new(i as f64, i as i64));
        let taken: Vec<Datapoint> = pipeline
            .evaluate(unbounded)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(taken.len(), 3);
    }
}
