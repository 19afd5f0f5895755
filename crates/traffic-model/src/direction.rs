//! Compass approaches and location identifiers

use crate::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the four compass approaches to an intersection.
///
/// Declaration order is the tie-break order used when two directions carry
/// the same vehicle count (north wins over south, and so on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    /// All directions in ordinal order
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "north" | "n" => Ok(Direction::North),
            "south" | "s" => Ok(Direction::South),
            "east" | "e" => Ok(Direction::East),
            "west" | "w" => Ok(Direction::West),
            _ => Err(ModelError::UnknownDirection(s.to_string())),
        }
    }
}

/// Intersection identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocationId(String);

impl LocationId {
    /// Create a location id, rejecting blank identifiers
    pub fn new(id: impl Into<String>) -> Result<Self, ModelError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ModelError::InvalidLocationId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for LocationId {
    type Error = ModelError;

    fn try_from(id: String) -> Result<Self, Self::Error> {
        LocationId::new(id)
    }
}

impl From<LocationId> for String {
    fn from(id: LocationId) -> Self {
        id.0
    }
}

impl FromStr for LocationId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LocationId::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parsing() {
        assert_eq!("North".parse::<Direction>().unwrap(), Direction::North);
        assert_eq!(" w ".parse::<Direction>().unwrap(), Direction::West);
        assert!("northeast".parse::<Direction>().is_err());
    }

    #[test]
    fn test_direction_ordering() {
        assert!(Direction::North < Direction::South);
        assert!(Direction::East < Direction::West);
        assert_eq!(Direction::ALL.iter().max(), Some(&Direction::West));
    }

    #[test]
    fn test_blank_location_rejected() {
        assert!(LocationId::new("  ").is_err());
        assert_eq!(LocationId::new("junction-7").unwrap().as_str(), "junction-7");
    }

    #[test]
    fn test_location_serde_checks_blank() {
        let id: LocationId = serde_json::from_str("\"junction-7\"").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"junction-7\"");
        assert!(serde_json::from_str::<LocationId>("\"\"").is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Direction::East).unwrap();
        assert_eq!(json, "\"east\"");
    }
}
