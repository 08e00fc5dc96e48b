use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Compass direction a camera was looking when an image was taken.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewDirection {
    North,
    East,
    South,
    West,
    Nadir,
}

impl ViewDirection {
    pub const ALL: [ViewDirection; 5] = [
        ViewDirection::North,
        ViewDirection::East,
        ViewDirection::South,
        ViewDirection::West,
        ViewDirection::Nadir,
    ];

    /// Numeric code used by metadata documents (1 = north … 5 = nadir).
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(ViewDirection::North),
            2 => Some(ViewDirection::East),
            3 => Some(ViewDirection::South),
            4 => Some(ViewDirection::West),
            5 => Some(ViewDirection::Nadir),
            _ => None,
        }
    }

    pub fn code(self) -> u64 {
        match self {
            ViewDirection::North => 1,
            ViewDirection::East => 2,
            ViewDirection::South => 3,
            ViewDirection::West => 4,
            ViewDirection::Nadir => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ViewDirection::North => "north",
            ViewDirection::East => "east",
            ViewDirection::South => "south",
            ViewDirection::West => "west",
            ViewDirection::Nadir => "nadir",
        }
    }
}

impl fmt::Display for ViewDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ViewDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ViewDirection::ALL
            .into_iter()
            .find(|d| d.name() == lower)
            .ok_or_else(|| format!("unknown view direction: {s}"))
    }
}
