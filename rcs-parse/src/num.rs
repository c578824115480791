use std::{fmt::Display, num::ParseIntError, str::FromStr};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// An RCS revision or branch number.
///
/// An even number of components denotes a revision (`1.2`, `1.2.2.1`); an odd
/// number denotes a branch (`1.2.2`). The magic-branch form `1.2.0.2` that CVS
/// writes into the symbol table is normalized by dropping the zero component,
/// so it compares equal to `1.2.2`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RevNum(Vec<u32>);

impl RevNum {
    pub fn components(&self) -> &[u32] {
        &self.0
    }

    pub fn is_branch(&self) -> bool {
        self.0.len() % 2 == 1
    }

    pub fn is_trunk_revision(&self) -> bool {
        self.0.len() == 2
    }

    /// The branch a non-trunk revision lives on: `1.2.2.1` → `1.2.2`.
    pub fn branch_prefix(&self) -> Option<RevNum> {
        if !self.is_branch() && self.0.len() > 2 {
            Some(RevNum(self.0[..self.0.len() - 1].to_vec()))
        } else {
            None
        }
    }

    /// The revision a branch sprouts from: `1.2.2` → `1.2`.
    pub fn base_revision(&self) -> Option<RevNum> {
        if self.is_branch() && self.0.len() >= 3 {
            Some(RevNum(self.0[..self.0.len() - 1].to_vec()))
        } else {
            None
        }
    }

    /// The first revision committed to a branch: `1.2.2` → `1.2.2.1`.
    pub fn first_on_branch(&self) -> Option<RevNum> {
        if self.is_branch() {
            let mut parts = self.0.clone();
            parts.push(1);
            Some(RevNum(parts))
        } else {
            None
        }
    }

    /// Whether this is the conventional `1.1.1` vendor branch.
    pub fn is_vendor_branch(&self) -> bool {
        self.0 == [1, 1, 1]
    }

    /// Whether this revision lives on the `1.1.1` vendor branch.
    pub fn is_vendor_revision(&self) -> bool {
        self.0.len() == 4 && self.0[..3] == [1, 1, 1]
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Option<RevNum> {
        std::str::from_utf8(bytes).ok()?.parse().ok()
    }
}

impl FromStr for RevNum {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split('.')
            .filter_map(|part| match part.parse::<u32>() {
                // Zero components mark magic branches; the plain branch form
                // is all the conversion needs.
                Ok(0) => None,
                Ok(v) => Some(Ok(v)),
                Err(e) => Some(Err(e)),
            })
            .collect::<Result<Vec<u32>, ParseIntError>>()
            .map(RevNum)
    }
}

#[allow(unstable_name_collisions)]
impl Display for RevNum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            self.0
                .iter()
                .map(|part| part.to_string())
                .intersperse(String::from("."))
                .collect::<String>()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(num("1.1").components(), &[1, 1]);
        assert_eq!(num("1.2.3.4").components(), &[1, 2, 3, 4]);
        assert_eq!(num("1.2.3"), num("1.2.0.3"));
    }

    #[test]
    fn test_kind() {
        assert!(!num("1.2").is_branch());
        assert!(num("1.2").is_trunk_revision());
        assert!(num("1.2.2").is_branch());
        assert!(!num("1.2.2.1").is_trunk_revision());
    }

    #[test]
    fn test_navigation() {
        assert_eq!(num("1.2.2.1").branch_prefix(), Some(num("1.2.2")));
        assert_eq!(num("1.2").branch_prefix(), None);
        assert_eq!(num("1.2.2").base_revision(), Some(num("1.2")));
        assert_eq!(num("1.2.2").first_on_branch(), Some(num("1.2.2.1")));
        assert_eq!(num("1.2").first_on_branch(), None);
    }

    #[test]
    fn test_vendor() {
        assert!(num("1.1.1").is_vendor_branch());
        assert!(num("1.1.1.1").is_vendor_revision());
        assert!(!num("1.1.2.1").is_vendor_revision());
        assert!(!num("1.1").is_vendor_revision());
    }

    #[test]
    fn test_ordering() {
        assert!(num("1.10") > num("1.2"));
        assert!(num("1.2.2.1") > num("1.2"));
    }

    fn num(s: &str) -> RevNum {
        s.parse().unwrap()
    }
}
