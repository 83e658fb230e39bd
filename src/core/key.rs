//! Variable keys: a character tag naming the namespace plus an integer index.

use crate::error::{FactorGraphError, FactorGraphResult};
use std::fmt;
use std::str::FromStr;

/// Identifier of one unknown, e.g. `x1` for a pose or `l4` for a landmark.
///
/// Keys order by tag first, then index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    tag: char,
    index: u64,
}

impl Key {
    pub const fn new(tag: char, index: u64) -> Self {
        Key { tag, index }
    }

    pub fn tag(&self) -> char {
        self.tag
    }

    pub fn index(&self) -> u64 {
        self.index
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.tag, self.index)
    }
}

impl FromStr for Key {
    type Err = FactorGraphError;

    fn from_str(s: &str) -> FactorGraphResult<Self> {
        let mut chars = s.chars();
        let tag = chars
            .next()
            .filter(|c| !c.is_ascii_digit())
            .ok_or_else(|| FactorGraphError::InvalidInput(format!("invalid key '{s}'")))?;
        let index = chars
            .as_str()
            .parse::<u64>()
            .map_err(|_| FactorGraphError::InvalidInput(format!("invalid key index in '{s}'")))?;
        Ok(Key::new(tag, index))
    }
}

/// Shorthand for a pose key `x<index>`.
pub fn pose_key(index: u64) -> Key {
    Key::new('x', index)
}

/// Shorthand for a landmark key `l<index>`.
pub fn landmark_key(index: u64) -> Key {
    Key::new('l', index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display_parse() {
        let key = Key::new('l', 4);
        assert_eq!(key.to_string(), "l4");
        assert_eq!("l4".parse::<Key>().unwrap(), key);
        assert_eq!("x12".parse::<Key>().unwrap(), pose_key(12));
    }

    #[test]
    fn test_key_parse_rejects_garbage() {
        assert!("".parse::<Key>().is_err());
        assert!("x".parse::<Key>().is_err());
        assert!("12".parse::<Key>().is_err());
        assert!("x1a".parse::<Key>().is_err());
    }

    #[test]
    fn test_key_ordering() {
        assert!(landmark_key(9) < pose_key(1));
        assert!(pose_key(1) < pose_key(2));
    }
}
