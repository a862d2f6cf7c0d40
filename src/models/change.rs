//! Change levels and reconciliation actions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Destructiveness ceiling granted to a reconciliation run
///
/// Ordered so that `None < Update < Reindex < Drop`. An operation needing
/// level `L` is only executed when the granted level is at least `L`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Change {
    /// Read-only verification
    #[default]
    None,
    /// Additive or compatible changes
    Update,
    /// Index rebuilds
    Reindex,
    /// Removals and narrowing type changes
    Drop,
}

impl Change {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Change::None => "none",
            Change::Update => "update",
            Change::Reindex => "reindex",
            Change::Drop => "drop",
        }
    }

    /// Whether an operation at `required` is allowed under this ceiling
    pub fn allows(self, required: Change) -> bool {
        required <= self
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Change {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(Change::None),
            "update" => Ok(Change::Update),
            "reindex" => Ok(Change::Reindex),
            "drop" => Ok(Change::Drop),
            _ => Err(format!(
                "Invalid change level: {}. Expected: none, update, reindex, drop",
                s
            )),
        }
    }
}

/// What a reconciliation run should do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Serialize the configuration as-is, without contacting the database
    #[default]
    Current,
    /// Diff against the database and execute the approved changes
    Apply,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Current => f.write_str("current"),
            Action::Apply => f.write_str("apply"),
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "current" => Ok(Action::Current),
            "apply" => Ok(Action::Apply),
            _ => Err(format!("Invalid action: {}. Expected: current, apply", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_ordering() {
        assert!(Change::None < Change::Update);
        assert!(Change::Update < Change::Reindex);
        assert!(Change::Reindex < Change::Drop);
        assert!(Change::Drop.allows(Change::Reindex));
        assert!(!Change::Update.allows(Change::Reindex));
        assert!(Change::None.allows(Change::None));
    }

    #[test]
    fn test_change_parsing() {
        assert_eq!("DROP".parse::<Change>().unwrap(), Change::Drop);
        assert_eq!("reindex".parse::<Change>().unwrap(), Change::Reindex);
        assert!("everything".parse::<Change>().is_err());
        assert_eq!(Change::Update.to_string(), "update");
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!("apply".parse::<Action>().unwrap(), Action::Apply);
        assert_eq!("Current".parse::<Action>().unwrap(), Action::Current);
        assert!("dry-run".parse::<Action>().is_err());
    }
}
