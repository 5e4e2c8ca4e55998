//! Status rules
//!
//! A status rule decides which generators influence the aggregate HTTP
//! status of a service and how their statuses are combined.

use crate::error::{Result, RouterError};
use crate::service::GeneratorBinding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// What the selector set is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Selector {
    /// Effective generator name
    #[default]
    Name,
    /// Generator target label
    Target,
}

/// How relevant statuses are folded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    First,
    #[default]
    Highest,
    Lowest,
}

impl FromStr for Aggregation {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(Aggregation::First),
            "highest" => Ok(Aggregation::Highest),
            "lowest" => Ok(Aggregation::Lowest),
            other => Err(RouterError::ConfigError(format!(
                "unknown status aggregation '{}'",
                other
            ))),
        }
    }
}

impl FromStr for Selector {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "name" => Ok(Selector::Name),
            "target" => Ok(Selector::Target),
            other => Err(RouterError::ConfigError(format!(
                "unknown status selector '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Aggregation::First => "first",
            Aggregation::Highest => "highest",
            Aggregation::Lowest => "lowest",
        };
        f.write_str(s)
    }
}

/// Per-service status policy
///
/// The default rule considers every generator and keeps the highest status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusRule {
    pub selector: Selector,
    /// Names or targets that count; empty means every generator
    pub selected: BTreeSet<String>,
    pub aggregation: Aggregation,
}

impl StatusRule {
    pub fn new(selector: Selector, aggregation: Aggregation) -> Self {
        StatusRule {
            selector,
            selected: BTreeSet::new(),
            aggregation,
        }
    }

    /// Rule that applies to every generator
    pub fn all(aggregation: Aggregation) -> Self {
        Self::new(Selector::Name, aggregation)
    }

    pub fn select(mut self, key: impl Into<String>) -> Self {
        self.selected.insert(key.into());
        self
    }

    /// Whether `binding` takes part in the status fold
    pub fn applies_to(&self, binding: &GeneratorBinding) -> bool {
        if self.selected.is_empty() {
            return true;
        }
        match self.selector {
            Selector::Name => self.selected.contains(binding.effective_name()),
            Selector::Target => binding
                .target
                .as_ref()
                .is_some_and(|t| self.selected.contains(t)),
        }
    }
}

/// Fold one candidate status into the current aggregate
///
/// Returns the new aggregate and whether the candidate won.
pub fn aggregate(current: Option<u16>, candidate: u16, mode: Aggregation) -> (u16, bool) {
    match current {
        None => (candidate, true),
        Some(current) => {
            let wins = match mode {
                Aggregation::First => false,
                Aggregation::Highest => candidate > current,
                Aggregation::Lowest => candidate < current,
            };
            if wins {
                (candidate, true)
            } else {
                (current, false)
            }
        }
    }
}

/// Running status fold for one request
#[derive(Debug, Clone)]
pub struct StatusFold {
    mode: Aggregation,
    status: Option<u16>,
    location: Option<String>,
}

impl StatusFold {
    pub fn new(mode: Aggregation) -> Self {
        StatusFold {
            mode,
            status: None,
            location: None,
        }
    }

    /// Observe a relevant generator's status and redirect target
    pub fn observe(&mut self, status: u16, location: Option<&str>) -> bool {
        let (status, updated) = aggregate(self.status, status, self.mode);
        self.status = Some(status);
        if updated {
            self.location = if (300..400).contains(&status) {
                location.map(str::to_string)
            } else {
                None
            };
        }
        updated
    }

    /// Final status (200 when nothing was observed) and redirect target
    pub fn finish(self) -> (u16, Option<String>) {
        (self.status.unwrap_or(200), self.location)
    }
}
