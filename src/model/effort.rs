//! Effort tokens - the fixed card deck

use crate::error::PokerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One card of the estimation deck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Effort {
    Unknown,
    Half,
    One,
    Two,
    Three,
    Five,
    Eight,
    Thirteen,
    Twenty,
    Forty,
    Hundred,
    Coffee,
}

impl Effort {
    /// Every token in deck order
    pub const ALL: [Effort; 12] = [
        Effort::Unknown,
        Effort::Half,
        Effort::One,
        Effort::Two,
        Effort::Three,
        Effort::Five,
        Effort::Eight,
        Effort::Thirteen,
        Effort::Twenty,
        Effort::Forty,
        Effort::Hundred,
        Effort::Coffee,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Effort::Unknown => "?",
            Effort::Half => "0.5",
            Effort::One => "1",
            Effort::Two => "2",
            Effort::Three => "3",
            Effort::Five => "5",
            Effort::Eight => "8",
            Effort::Thirteen => "13",
            Effort::Twenty => "20",
            Effort::Forty => "40",
            Effort::Hundred => "100",
            Effort::Coffee => "☕️",
        }
    }
}

impl fmt::Display for Effort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Effort {
    type Err = PokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        // The pass card is often typed without the emoji variation selector
        if token == "☕" || token.eq_ignore_ascii_case("coffee") {
            return Ok(Effort::Coffee);
        }
        Effort::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == token)
            .ok_or_else(|| PokerError::Invalid(format!("unknown effort token '{}'", token)))
    }
}

impl TryFrom<String> for Effort {
    type Error = PokerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Effort> for String {
    fn from(effort: Effort) -> Self {
        effort.as_str().to_string()
    }
}
