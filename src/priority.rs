use serde::{Deserialize, Serialize};
use std::fmt;

/// Task priority in the switchboard queue.
/// Lower values = picked up first (1 is the highest priority).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Priority(u8);

/// Coarse grouping used by the queue depth view
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityBucket {
    /// priorities 1-3
    High,
    /// priorities 4-7
    Normal,
    /// priorities 8-10
    Low,
}

impl Priority {
    pub const HIGHEST: Priority = Priority(1);
    pub const DEFAULT: Priority = Priority(5);
    pub const LOWEST: Priority = Priority(10);

    /// Build a priority from a raw integer, rejecting values outside 1..=10
    pub fn new(value: i64) -> Option<Self> {
        if (Self::HIGHEST.0 as i64..=Self::LOWEST.0 as i64).contains(&value) {
            Some(Priority(value as u8))
        } else {
            None
        }
    }

    /// Get the numeric priority value
    pub fn value(self) -> u8 {
        self.0
    }

    pub fn bucket(self) -> PriorityBucket {
        match self.0 {
            1..=3 => PriorityBucket::High,
            4..=7 => PriorityBucket::Normal,
            _ => PriorityBucket::Low,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

impl TryFrom<i64> for Priority {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Priority::new(value).ok_or_else(|| format!("priority {value} is outside 1..=10"))
    }
}

impl From<Priority> for i64 {
    fn from(priority: Priority) -> Self {
        priority.0 as i64
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl PriorityBucket {
    pub fn as_str(self) -> &'static str {
        match self {
            PriorityBucket::High => "high",
            PriorityBucket::Normal => "normal",
            PriorityBucket::Low => "low",
        }
    }

    /// Inverse of [`PriorityBucket::as_str`], used when reading grouped rows back
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "high" => Some(PriorityBucket::High),
            "normal" => Some(PriorityBucket::Normal),
            "low" => Some(PriorityBucket::Low),
            _ => None,
        }
    }
}

impl fmt::Display for PriorityBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_bounds() {
        assert_eq!(Priority::new(1), Some(Priority::HIGHEST));
        assert_eq!(Priority::new(10), Some(Priority::LOWEST));
        assert_eq!(Priority::new(0), None);
        assert_eq!(Priority::new(11), None);
        assert_eq!(Priority::new(-3), None);
    }

    #[test]
    fn test_priority_ordering() {
        // Smaller number sorts first, which is the pickup order
        assert!(Priority::HIGHEST < Priority::DEFAULT);
        assert!(Priority::DEFAULT < Priority::LOWEST);
    }

    #[test]
    fn test_priority_buckets() {
        assert_eq!(Priority::new(2).unwrap().bucket(), PriorityBucket::High);
        assert_eq!(Priority::new(5).unwrap().bucket(), PriorityBucket::Normal);
        assert_eq!(Priority::new(8).unwrap().bucket(), PriorityBucket::Low);
        assert_eq!(PriorityBucket::parse("normal"), Some(PriorityBucket::Normal));
        assert_eq!(PriorityBucket::parse("urgent"), None);
    }

    #[test]
    fn test_priority_serde() {
        let p: Priority = serde_json::from_str("3").unwrap();
        assert_eq!(p.value(), 3);
        assert!(serde_json::from_str::<Priority>("42").is_err());
        assert_eq!(serde_json::to_string(&p).unwrap(), "3");
        assert_eq!(p.to_string(), "P3");
    }
}
