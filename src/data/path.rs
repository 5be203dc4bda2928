use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("valid segment regex"))
}

/// Hierarchical `owner/device/stream` address of a stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamPath {
    pub owner: String,
    pub device: String,
    pub stream: String,
}

impl StreamPath {
    pub fn new(
        owner: impl Into<String>,
        device: impl Into<String>,
        stream: impl Into<String>,
    ) -> Result<Self, PathError> {
        let path = Self {
            owner: owner.into(),
            device: device.into(),
            stream: stream.into(),
        };
        for segment in [&path.owner, &path.device, &path.stream] {
            if !segment_pattern().is_match(segment) {
                return Err(PathError::InvalidSegment(segment.clone()));
            }
        }
        Ok(path)
    }

    pub fn parse(path: &str) -> Result<Self, PathError> {
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        match parts.as_slice() {
            [owner, device, stream] => Self::new(*owner, *device, *stream),
            _ => Err(PathError::WrongShape(path.to_string())),
        }
    }

    /// Flat key used by persistence backends. Segments never contain '.'.
    pub fn storage_key(&self) -> String {
        format!("{}.{}.{}", self.owner, self.device, self.stream)
    }

    pub fn from_storage_key(key: &str) -> Result<Self, PathError> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            [owner, device, stream] => Self::new(*owner, *device, *stream),
            _ => Err(PathError::WrongShape(key.to_string())),
        }
    }
}

impl std::fmt::Display for StreamPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.owner, self.device, self.stream)
    }
}

impl std::str::FromStr for StreamPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StreamPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StreamPath> for String {
    fn from(path: StreamPath) -> Self {
        path.to_string()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PathError {
    #[error("Stream path '{0}' must have the form owner/device/stream")]
    WrongShape(String),

    #[error("Invalid path segment '{0}'")]
    InvalidSegment(String),
}
