use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Boxed future returned by the collaborator traits (fleet provider, remote
/// session) so they stay object-safe and `Send` across worker tasks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How a step's work is distributed across the fleet.
///
/// - `Horizontal`: the primary input is split, each machine gets one chunk.
/// - `Vertical`: a named split-variable's file is split; the primary input
///   (if any) is shared whole with every machine.
/// - `Local`: no split; the step works on the previous step's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    Horizontal,
    Vertical,
    Local,
}

impl Default for ScaleMode {
    fn default() -> Self {
        ScaleMode::Horizontal
    }
}

impl FromStr for ScaleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "horizontal" => Ok(ScaleMode::Horizontal),
            "vertical" => Ok(ScaleMode::Vertical),
            "local" => Ok(ScaleMode::Local),
            other => Err(format!(
                "invalid scale mode: {other} (expected \"horizontal\", \"vertical\" or \"local\")"
            )),
        }
    }
}

impl fmt::Display for ScaleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScaleMode::Horizontal => "horizontal",
            ScaleMode::Vertical => "vertical",
            ScaleMode::Local => "local",
        };
        f.write_str(s)
    }
}

/// Strategy used to merge per-machine output files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregateStrategy {
    /// Machine-index order, duplicates kept unless deduplication is requested.
    Concat,
    /// Lexicographically sorted union with duplicates removed.
    SortUnique,
}

impl Default for AggregateStrategy {
    fn default() -> Self {
        AggregateStrategy::Concat
    }
}

impl FromStr for AggregateStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "concat" => Ok(AggregateStrategy::Concat),
            "sort-unique" | "sort_unique" => Ok(AggregateStrategy::SortUnique),
            other => Err(format!(
                "invalid aggregate strategy: {other} (expected \"concat\" or \"sort-unique\")"
            )),
        }
    }
}

/// A duration as written in pipeline files: either a bare number of seconds
/// (`300`) or a string with a unit suffix (`"5m"`, `"250ms"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationSpec(pub Duration);

impl DurationSpec {
    pub fn as_duration(self) -> Duration {
        self.0
    }
}

impl FromStr for DurationSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s).map(DurationSpec)
    }
}

impl<'de> Deserialize<'de> for DurationSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => Ok(DurationSpec(Duration::from_secs(secs))),
            Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Parse `"250ms"`, `"30s"`, `"5m"`, `"2h"`, or a bare number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s.chars().position(|c| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "" | "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        unit => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
