//! Token scopes. Orthogonal to RBAC: roles gate which resource, scopes gate
//! which capability the presented credential may exercise on it.

use std::collections::BTreeSet;

pub const SCOPE_READ: &str = "read";
pub const SCOPE_WRITE: &str = "write";

/// Every scope this server understands.
pub const KNOWN_SCOPES: &[&str] = &[SCOPE_READ, SCOPE_WRITE];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSet {
    scopes: BTreeSet<String>,
}

impl ScopeSet {
    pub fn from_space_separated(value: &str) -> Self {
        Self {
            scopes: value.split_whitespace().map(str::to_string).collect(),
        }
    }

    /// The scope set a first-party session holds: everything.
    pub fn all() -> Self {
        Self {
            scopes: KNOWN_SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn has(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    pub fn has_any(&self, scopes: &[&str]) -> bool {
        scopes.iter().any(|s| self.has(s))
    }

    pub fn has_all(&self, scopes: &[&str]) -> bool {
        scopes.iter().all(|s| self.has(s))
    }

    pub fn as_space_separated(&self) -> String {
        self.scopes.iter().cloned().collect::<Vec<_>>().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_queries() {
        let scopes = ScopeSet::from_space_separated("read  write");
        assert!(scopes.has(SCOPE_READ));
        assert!(scopes.has_all(&[SCOPE_READ, SCOPE_WRITE]));
        assert!(scopes.has_any(&["admin", SCOPE_READ]));
        assert!(!scopes.has("admin"));

        let read_only = ScopeSet::from_space_separated("read");
        assert!(!read_only.has_all(&[SCOPE_READ, SCOPE_WRITE]));
        assert_eq!(read_only.as_space_separated(), "read");
    }
}
