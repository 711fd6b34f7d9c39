//! Pipeline request types.
//!
//! Object names double as local staging filenames, so they are validated once at
//! the edge and carried as [`ObjectName`] from then on.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Longest single path component local filesystems accept
const MAX_NAME_BYTES: usize = 255;

/// A bucket object key that is also safe to use as a single filename
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectName(String);

impl ObjectName {
    pub fn parse(name: impl Into<String>) -> Result<Self, PipelineError> {
        let name = name.into();
        match check_name(&name) {
            Ok(()) => Ok(Self(name)),
            Err(reason) => Err(PipelineError::InvalidName { name, reason }),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn check_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("must not be empty");
    }
    if name.len() > MAX_NAME_BYTES {
        return Err("longer than 255 bytes");
    }
    if name == "." || name == ".." {
        return Err("reserved path component");
    }
    if name.contains('/') || name.contains('\\') {
        return Err("contains a path separator");
    }
    if name.chars().any(char::is_control) {
        return Err("contains control characters");
    }
    Ok(())
}

impl TryFrom<String> for ObjectName {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ObjectName> for String {
    fn from(name: ObjectName) -> Self {
        name.0
    }
}

impl AsRef<str> for ObjectName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One pipeline run: which raw object to fetch and what to publish it as
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    /// Correlates log lines and metrics for a single run
    pub request_id: Uuid,
    /// Key in the raw bucket and filename in raw staging
    pub raw: ObjectName,
    /// Key in the processed bucket and filename in processed staging
    pub processed: ObjectName,
}

impl ProcessRequest {
    pub fn new(raw: ObjectName, processed: ObjectName) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            raw,
            processed,
        }
    }

    /// Publish under the same name the raw object was uploaded with
    pub fn same_name(name: ObjectName) -> Self {
        Self::new(name.clone(), name)
    }
}
