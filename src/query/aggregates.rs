use super::transform::TransformError;
use crate::data::Value;
use std::cmp::Ordering;

/// Aggregation stages of a transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Mean,
    Min,
    Max,
    First,
    Last,
}

impl AggregateFunction {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Mean => "mean",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::First => "first",
            AggregateFunction::Last => "last",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "count" => Some(AggregateFunction::Count),
            "sum" => Some(AggregateFunction::Sum),
            "mean" | "avg" => Some(AggregateFunction::Mean),
            "min" => Some(AggregateFunction::Min),
            "max" => Some(AggregateFunction::Max),
            "first" => Some(AggregateFunction::First),
            "last" => Some(AggregateFunction::Last),
            _ => None,
        }
    }

    /// Fresh accumulator for this function
    pub fn accumulator(&self) -> Box<dyn Accumulator> {
        match self {
            AggregateFunction::Count => Box::new(CountAccumulator::default()),
            AggregateFunction::Sum => Box::new(SumAccumulator::default()),
            AggregateFunction::Mean => Box::new(MeanAccumulator::default()),
            AggregateFunction::Min => Box::new(ExtremumAccumulator::new(Ordering::Less)),
            AggregateFunction::Max => Box::new(ExtremumAccumulator::new(Ordering::Greater)),
            AggregateFunction::First => Box::new(FirstAccumulator::default()),
            AggregateFunction::Last => Box::new(LastAccumulator::default()),
        }
    }
}

/// Accumulator trait for aggregation functions
pub trait Accumulator: Send {
    /// Add a value to the accumulator
    fn accumulate(&mut self, value: &Value) -> Result<(), TransformError>;

    /// Get the final result
    fn result(&self) -> Value;
}

#[derive(Debug, Clone, Default)]
pub struct CountAccumulator {
    count: i64,
}

impl Accumulator for CountAccumulator {
    fn accumulate(&mut self, _value: &Value) -> Result<(), TransformError> {
        self.count += 1;
        Ok(())
    }

    fn result(&self) -> Value {
        Value::Int64(self.count)
    }
}

/// Integer sums stay integers until a float arrives or the sum overflows
#[derive(Debug, Clone)]
pub struct SumAccumulator {
    int_sum: Option<i64>,
    float_sum: f64,
}

impl Default for SumAccumulator {
    fn default() -> Self {
        Self {
            int_sum: Some(0),
            float_sum: 0.0,
        }
    }
}

impl Accumulator for SumAccumulator {
    fn accumulate(&mut self, value: &Value) -> Result<(), TransformError> {
        let v = numeric("sum", value)?;
        self.float_sum += v;
        self.int_sum = match (self.int_sum, value) {
            (Some(sum), Value::Int64(i)) => sum.checked_add(*i),
            _ => None,
        };
        Ok(())
    }

    fn result(&self) -> Value {
        match self.int_sum {
            Some(sum) => Value::Int64(sum),
            None => Value::Float64(self.float_sum),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeanAccumulator {
    sum: f64,
    count: i64,
}

impl Accumulator for MeanAccumulator {
    fn accumulate(&mut self, value: &Value) -> Result<(), TransformError> {
        self.sum += numeric("mean", value)?;
        self.count += 1;
        Ok(())
    }

    fn result(&self) -> Value {
        if self.count > 0 {
            Value::Float64(self.sum / self.count as f64)
        } else {
            Value::Null
        }
    }
}

/// MIN or MAX depending on `keep`: a new value replaces the current one when
/// it compares as `keep` against it.
#[derive(Debug, Clone)]
pub struct ExtremumAccumulator {
    keep: Ordering,
    current: Option<Value>,
}

impl ExtremumAccumulator {
    pub fn new(keep: Ordering) -> Self {
        Self { keep, current: None }
    }
}

impl Accumulator for ExtremumAccumulator {
    fn accumulate(&mut self, value: &Value) -> Result<(), TransformError> {
        let replace = match &self.current {
            None => true,
            Some(current) => {
                let ordering = value.compare(current).ok_or(TransformError::Incomparable {
                    left: value.type_name(),
                    right: current.type_name(),
                })?;
                ordering == self.keep
            }
        };
        if replace {
            self.current = Some(value.clone());
        }
        Ok(())
    }

    fn result(&self) -> Value {
        self.current.clone().unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FirstAccumulator {
    first: Option<Value>,
}

impl Accumulator for FirstAccumulator {
    fn accumulate(&mut self, value: &Value) -> Result<(), TransformError> {
        if self.first.is_none() {
            self.first = Some(value.clone());
        }
        Ok(())
    }

    fn result(&self) -> Value {
        self.first.clone().unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LastAccumulator {
    last: Option<Value>,
}

impl Accumulator for LastAccumulator {
    fn accumulate(&mut self, value: &Value) -> Result<(), TransformError> {
        self.last = Some(value.clone());
        Ok(())
    }

    fn result(&self) -> Value {
        self.last.clone().unwrap_or(Value::Null)
    }
}

pub(crate) fn numeric(stage: &'static str, value: &Value) -> Result<f64, TransformError> {
    value.as_f64().ok_or(TransformError::NotNumeric {
        stage,
        found: value.type_name(),
    })
}
