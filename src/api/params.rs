//! Query-string parsing for range and time-to-index requests

use std::collections::HashMap;

/// The two accepted range request shapes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeQuery {
    Index { i1: i64, i2: i64 },
    Time { t1: f64, t2: f64, limit: i64 },
}

impl std::fmt::Display for RangeQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RangeQuery::Index { i1, i2 } => write!(f, "irange [{},{})", i1, i2),
            RangeQuery::Time { t1, t2, limit } => {
                write!(f, "trange [{:.1},{:.1}) limit={}", t1, t2, limit)
            }
        }
    }
}

/// Index range if both `i1` and `i2` are given, otherwise time range from
/// `t1` with `t2` and/or `limit`. `t2` defaults to unbounded.
pub fn parse_range(params: &HashMap<String, String>) -> Result<RangeQuery, ParamError> {
    if params.contains_key("i1") && params.contains_key("i2") {
        let i1 = required_int(params, "i1")?;
        let i2 = required_int(params, "i2")?;
        return Ok(RangeQuery::Index { i1, i2 });
    }

    if params.contains_key("t1") {
        if !params.contains_key("t2") && !params.contains_key("limit") {
            return Err(ParamError::RangeArgs);
        }
        let t1 = decimal(params, "t1")?.ok_or(ParamError::RangeArgs)?;
        let t2 = decimal(params, "t2")?.unwrap_or(f64::INFINITY);
        let limit = match params.get("limit") {
            Some(raw) => raw.trim().parse::<i64>().map_err(|_| invalid("limit", raw))?,
            None => 0,
        };
        return Ok(RangeQuery::Time { t1, t2, limit });
    }

    Err(ParamError::RangeArgs)
}

/// The `t` argument of a time-to-index request
pub fn parse_time(params: &HashMap<String, String>) -> Result<f64, ParamError> {
    match decimal(params, "t") {
        Ok(Some(t)) => Ok(t),
        Ok(None) | Err(_) => Err(ParamError::TimeToIndexArgs),
    }
}

fn required_int(params: &HashMap<String, String>, name: &'static str) -> Result<i64, ParamError> {
    let raw = params.get(name).ok_or(ParamError::RangeArgs)?;
    raw.trim().parse::<i64>().map_err(|_| invalid(name, raw))
}

fn decimal(params: &HashMap<String, String>, name: &'static str) -> Result<Option<f64>, ParamError> {
    let Some(raw) = params.get(name) else {
        return Ok(None);
    };
    match raw.trim().parse::<f64>() {
        Ok(v) if !v.is_nan() => Ok(Some(v)),
        _ => Err(invalid(name, raw)),
    }
}

fn invalid(name: &'static str, value: &str) -> ParamError {
    ParamError::Invalid {
        name,
        value: value.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error(r#"A range needs [both "i1" and "i2" int] or ["t1" and ["t2" decimal and/or "limit" int]]"#)]
    RangeArgs,

    #[error(r#"time2index requires an argument of "t" which is a decimal timestamp"#)]
    TimeToIndexArgs,

    #[error("Invalid value '{value}' for parameter '{name}'")]
    Invalid { name: &'static str, value: String },
}
