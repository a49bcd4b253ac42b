use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::SpecError;

/// Lifecycle status shared by experiment and preparation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Created,
    Success,
    Running,
    Error,
    Destroyed,
    Revoked,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Created => "Created",
            Status::Success => "Success",
            Status::Running => "Running",
            Status::Error => "Error",
            Status::Destroyed => "Destroyed",
            Status::Revoked => "Revoked",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = SpecError;

    /// Accepts any casing of the first letter, so `running` parses.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match upper_first(s).as_str() {
            "Created" => Ok(Status::Created),
            "Success" => Ok(Status::Success),
            "Running" => Ok(Status::Running),
            "Error" => Ok(Status::Error),
            "Destroyed" => Ok(Status::Destroyed),
            "Revoked" => Ok(Status::Revoked),
            _ => Err(SpecError::UnknownStatus(s.to_string())),
        }
    }
}

/// Upper-cases the first character, leaving the rest untouched.
pub fn upper_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
