use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IslandReason {
    UnreachableFromSource,
    CannotReachSink,
    Detached,
}

impl fmt::Display for IslandReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IslandReason::UnreachableFromSource => "is unreachable from every source",
            IslandReason::CannotReachSink => "cannot reach any sink",
            IslandReason::Detached => "is unreachable from every source and cannot reach any sink",
        };
        f.write_str(s)
    }
}

/// One connectivity defect. Ordering is class first, then type name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Error)]
pub enum Violation {
    #[error("dead letter: type `{kind}` produced by [{}] has no route or terminal", join(.producers))]
    DeadLetter {
        kind: String,
        producers: BTreeSet<String>,
    },

    #[error("ambiguous disposition: type `{kind}` has {} dispositions ({})", .dispositions.len(), .dispositions.join(", "))]
    AmbiguousDisposition {
        kind: String,
        dispositions: Vec<String>,
    },

    #[error("orphaned consumer: type `{kind}` consumed by [{}] is never produced", join(.consumers))]
    OrphanedConsumer {
        kind: String,
        consumers: BTreeSet<String>,
    },

    #[error("island: type `{kind}` {reason}")]
    Island { kind: String, reason: IslandReason },
}

impl Violation {
    pub fn kind(&self) -> &str {
        match self {
            Violation::DeadLetter { kind, .. }
            | Violation::AmbiguousDisposition { kind, .. }
            | Violation::OrphanedConsumer { kind, .. }
            | Violation::Island { kind, .. } => kind,
        }
    }

    pub fn is_dead_letter(&self) -> bool {
        matches!(self, Violation::DeadLetter { .. })
    }

    pub fn is_orphan(&self) -> bool {
        matches!(self, Violation::OrphanedConsumer { .. })
    }

    pub fn is_island(&self) -> bool {
        matches!(self, Violation::Island { .. })
    }
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

/// Every violation found in one validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CovenantError {
    pub covenant: String,
    pub violations: Vec<Violation>,
}

impl CovenantError {
    pub fn new(covenant: impl Into<String>, mut violations: Vec<Violation>) -> Self {
        violations.sort();
        Self {
            covenant: covenant.into(),
            violations,
        }
    }

    pub fn violations_for<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Violation> {
        self.violations.iter().filter(move |v| v.kind() == kind)
    }
}

impl fmt::Display for CovenantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "covenant `{}` failed validation with {} violation(s)",
            self.covenant,
            self.violations.len()
        )?;
        for v in &self.violations {
            write!(f, "\n  - {v}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CovenantError {}
