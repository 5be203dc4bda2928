use super::aggregates::AggregateFunction;
use crate::data::Value;

/// One stage of a parsed transform
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// `identity` or `$`
    Identity,
    /// `if <op> <literal>`
    Filter { op: CompareOp, operand: Value },
    /// `scale <n>`
    Scale(f64),
    /// `offset <n>`
    Offset(f64),
    /// `count`, `sum`, `mean`, `min`, `max`, `first`, `last`
    Aggregate(AggregateFunction),
    /// `limit <n>`
    Limit(usize),
    /// `skip <n>`
    Skip(usize),
    /// `changed`
    Changed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "==" | "=" => Some(CompareOp::Eq),
            "!=" | "<>" => Some(CompareOp::NotEq),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::LtEq),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::GtEq),
            _ => None,
        }
    }

    /// Whether `left <op> right` holds. Values of different kinds are never
    /// ordered, so only `!=` holds between them.
    pub fn holds(&self, left: &Value, right: &Value) -> bool {
        match (self, left.compare(right)) {
            (CompareOp::Eq, _) => left == right,
            (CompareOp::NotEq, _) => left != right,
            (_, None) => false,
            (CompareOp::Lt, Some(ordering)) => ordering.is_lt(),
            (CompareOp::LtEq, Some(ordering)) => ordering.is_le(),
            (CompareOp::Gt, Some(ordering)) => ordering.is_gt(),
            (CompareOp::GtEq, Some(ordering)) => ordering.is_ge(),
        }
    }
}

/// Parse a `|`-separated transform into its stages
pub fn parse_transform(spec: &str) -> Result<Vec<Stage>, ParseError> {
    let mut stages = Vec::new();
    for raw in split_stages(spec)? {
        stages.push(parse_stage(raw.trim())?);
    }
    Ok(stages)
}

/// Split on `|` outside double-quoted string literals
fn split_stages(spec: &str) -> Result<Vec<&str>, ParseError> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (pos, c) in spec.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '|' => {
                parts.push(&spec[start..pos]);
                start = pos + 1;
            }
            _ => {}
        }
    }

    if in_string {
        return Err(ParseError::UnterminatedString);
    }
    parts.push(&spec[start..]);
    Ok(parts)
}

fn parse_stage(stage: &str) -> Result<Stage, ParseError> {
    if stage.is_empty() {
        return Err(ParseError::EmptyStage);
    }

    let (keyword, rest) = match stage.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (stage, ""),
    };

    match keyword {
        "identity" | "$" => {
            no_argument(keyword, rest)?;
            Ok(Stage::Identity)
        }
        "changed" => {
            no_argument(keyword, rest)?;
            Ok(Stage::Changed)
        }
        "if" => parse_filter(rest),
        "scale" => Ok(Stage::Scale(number_argument("scale", rest)?)),
        "offset" => Ok(Stage::Offset(number_argument("offset", rest)?)),
        "limit" => Ok(Stage::Limit(count_argument("limit", rest)?)),
        "skip" => Ok(Stage::Skip(count_argument("skip", rest)?)),
        other => match AggregateFunction::from_name(other) {
            Some(function) => {
                no_argument(keyword, rest)?;
                Ok(Stage::Aggregate(function))
            }
            None => Err(ParseError::UnknownStage(other.to_string())),
        },
    }
}

/// `if [$] <op> <literal>`
fn parse_filter(rest: &str) -> Result<Stage, ParseError> {
    let rest = rest.strip_prefix('$').map(str::trim_start).unwrap_or(rest);

    let (op_token, literal) = match rest.split_once(char::is_whitespace) {
        Some((op, literal)) => (op, literal.trim()),
        None => (rest, ""),
    };

    if op_token.is_empty() {
        return Err(ParseError::MissingArgument("if"));
    }
    let op = CompareOp::from_token(op_token)
        .ok_or_else(|| ParseError::UnknownOperator(op_token.to_string()))?;

    if literal.is_empty() {
        return Err(ParseError::MissingArgument("if"));
    }
    let operand: Value = serde_json::from_str(literal).map_err(|_| ParseError::InvalidArgument {
        stage: "if",
        argument: literal.to_string(),
    })?;

    Ok(Stage::Filter { op, operand })
}

fn no_argument(stage: &str, rest: &str) -> Result<(), ParseError> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(ParseError::UnexpectedArgument {
            stage: stage.to_string(),
            argument: rest.to_string(),
        })
    }
}

fn number_argument(stage: &'static str, rest: &str) -> Result<f64, ParseError> {
    if rest.is_empty() {
        return Err(ParseError::MissingArgument(stage));
    }
    match rest.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(ParseError::InvalidArgument {
            stage,
            argument: rest.to_string(),
        }),
    }
}

fn count_argument(stage: &'static str, rest: &str) -> Result<usize, ParseError> {
    if rest.is_empty() {
        return Err(ParseError::MissingArgument(stage));
    }
    rest.parse::<usize>().map_err(|_| ParseError::InvalidArgument {
        stage,
        argument: rest.to_string(),
    })
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Empty transform stage")]
    EmptyStage,

    #[error("Unknown transform stage '{0}'")]
    UnknownStage(String),

    #[error("Unknown comparison operator '{0}'")]
    UnknownOperator(String),

    #[error("Stage '{0}' requires an argument")]
    MissingArgument(&'static str),

    #[error("Invalid argument '{argument}' for stage '{stage}'")]
    InvalidArgument {
        stage: &'static str,
        argument: String,
    },

    #[error("Stage '{stage}' takes no argument, got '{argument}'")]
    UnexpectedArgument { stage: String, argument: String },

    #[error("Unterminated string literal")]
    UnterminatedString,
}
