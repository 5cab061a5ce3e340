// Types module for the durability node
//
// Shared value types used across the health, replication, availability and
// API layers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DurabilityError;

/// Identifier of a storage node, as given in configuration
pub type NodeId = String;

/// Current wall-clock time in unix milliseconds
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Kind of operation a node is being selected for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Reading content back from a node
    Read,
    /// Writing or pinning content on a node
    Write,
}

/// Importance of a piece of content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl ContentPriority {
    /// Numeric weight used to order replication work (higher runs first)
    pub fn weight(self) -> u8 {
        match self {
            ContentPriority::Low => 1,
            ContentPriority::Medium => 2,
            ContentPriority::High => 3,
            ContentPriority::Critical => 4,
        }
    }
}

impl Default for ContentPriority {
    fn default() -> Self {
        ContentPriority::Medium
    }
}

impl fmt::Display for ContentPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentPriority::Low => "low",
            ContentPriority::Medium => "medium",
            ContentPriority::High => "high",
            ContentPriority::Critical => "critical",
        };
        f.write_str(name)
    }
}

impl FromStr for ContentPriority {
    type Err = DurabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(ContentPriority::Low),
            "medium" => Ok(ContentPriority::Medium),
            "high" => Ok(ContentPriority::High),
            "critical" => Ok(ContentPriority::Critical),
            other => Err(DurabilityError::InvalidRequest(format!(
                "Unknown content priority: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_weights_are_ordered() {
        assert!(ContentPriority::Critical.weight() > ContentPriority::High.weight());
        assert!(ContentPriority::High.weight() > ContentPriority::Medium.weight());
        assert!(ContentPriority::Medium.weight() > ContentPriority::Low.weight());
        assert_eq!(ContentPriority::default(), ContentPriority::Medium);
    }

    #[test]
    fn test_priority_parse() {
        assert_eq!("HIGH".parse::<ContentPriority>().unwrap(), ContentPriority::High);
        assert!("urgent".parse::<ContentPriority>().is_err());
    }
}
