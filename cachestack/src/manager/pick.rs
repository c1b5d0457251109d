use crate::core::CacheError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Read/selection algorithm of a manager
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PickMode {
    /// Head of the stack
    #[default]
    First,
    /// Tail of the stack
    Last,
    /// Uniformly random healthy provider
    Random,
    /// Healthy provider with the highest weight
    ByWeight,
    /// Query every provider and require agreement
    All,
    /// First hit in stack order
    Traverse,
}

impl PickMode {
    /// Modes that read from exactly one selected provider
    pub fn is_single_target(&self) -> bool {
        matches!(self, Self::First | Self::Last | Self::Random | Self::ByWeight)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Last => "last",
            Self::Random => "random",
            Self::ByWeight => "byweight",
            Self::All => "all",
            Self::Traverse => "traverse",
        }
    }
}

impl fmt::Display for PickMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PickMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            "random" => Ok(Self::Random),
            "byweight" | "by_weight" | "weight" => Ok(Self::ByWeight),
            "all" => Ok(Self::All),
            "traverse" => Ok(Self::Traverse),
            other => Err(CacheError::Config(format!("unknown pick mode: {}", other))),
        }
    }
}
