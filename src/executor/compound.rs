use crate::sql_scan::{split_statements, trim_terminators};

/// Name of the savepoint wrapped around a single submission.
pub(crate) const PER_QUERY_SAVEPOINT: &str = "_per_query_svp_";

/// Who asked for a statement in a compound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Begin,
    Savepoint,
    Caller,
    Release,
    Commit,
}

impl Role {
    /// Acknowledgements of driver-injected statements are never shown to the caller.
    pub(crate) fn is_injected(self) -> bool {
        !matches!(self, Role::Caller)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Wrapping {
    pub begin: bool,
    pub savepoint: bool,
    pub commit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Part {
    pub role: Role,
    pub sql: String,
}

/// `[BEGIN;] [SAVEPOINT s;] query [; companion] [; RELEASE s] [; COMMIT]`, sent as one command.
///
/// Every statement yields exactly one completion, empty-query or error unit, so the n-th such unit
/// in the response belongs to the n-th part.
#[derive(Debug, Clone)]
pub(crate) struct Compound {
    parts: Vec<Part>,
}

impl Compound {
    pub(crate) fn build(text: &str, companion: Option<&str>, wrap: Wrapping) -> Self {
        let mut caller: Vec<&str> = split_statements(text);
        if let Some(extra) = companion {
            caller.extend(split_statements(extra));
        }
        if caller.is_empty() {
            // only an empty query; nothing to wrap
            return Self {
                parts: vec![Part {
                    role: Role::Caller,
                    sql: trim_terminators(text).to_string(),
                }],
            };
        }
        let mut parts = Vec::with_capacity(caller.len() + 4);
        if wrap.begin {
            parts.push(Part {
                role: Role::Begin,
                sql: "BEGIN".to_string(),
            });
        }
        if wrap.savepoint {
            parts.push(Part {
                role: Role::Savepoint,
                sql: format!("SAVEPOINT {PER_QUERY_SAVEPOINT}"),
            });
        }
        parts.extend(caller.into_iter().map(|sql| Part {
            role: Role::Caller,
            sql: sql.to_string(),
        }));
        if wrap.savepoint {
            parts.push(Part {
                role: Role::Release,
                sql: format!("RELEASE {PER_QUERY_SAVEPOINT}"),
            });
        }
        if wrap.commit {
            parts.push(Part {
                role: Role::Commit,
                sql: "COMMIT".to_string(),
            });
        }
        Self { parts }
    }

    /// The command text sent to the server.
    pub(crate) fn text(&self) -> String {
        self.parts
            .iter()
            .map(|p| p.sql.as_str())
            .collect::<Vec<_>>()
            .join(";")
    }

    /// The part answered by the `ordinal`-th terminal unit.
    pub(crate) fn part(&self, ordinal: usize) -> Option<&Part> {
        self.parts.get(ordinal)
    }

    #[cfg(test)]
    pub(crate) fn has(&self, role: Role) -> bool {
        self.parts.iter().any(|p| p.role == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_in_order() {
        let compound = Compound::build(
            "insert into t values (1) -- trailing",
            Some("select 1;"),
            Wrapping {
                begin: true,
                savepoint: true,
                commit: false,
            },
        );
        assert_eq!(
            compound.text(),
            "BEGIN;SAVEPOINT _per_query_svp_;insert into t values (1);select 1;\
             RELEASE _per_query_svp_"
        );
        assert_eq!(compound.part(0).map(|p| p.role), Some(Role::Begin));
        assert_eq!(compound.part(3).map(|p| p.role), Some(Role::Caller));
        assert_eq!(compound.part(4).map(|p| p.role), Some(Role::Release));
        assert!(compound.part(5).is_none());
    }

    #[test]
    fn empty_text_is_never_wrapped() {
        let compound = Compound::build(
            " ; -- nothing",
            None,
            Wrapping {
                begin: true,
                savepoint: true,
                commit: true,
            },
        );
        assert_eq!(compound.text(), "");
        assert!(!compound.has(Role::Begin));
    }

    #[test]
    fn commit_goes_last() {
        let compound = Compound::build(
            "update t set a = 1",
            None,
            Wrapping {
                begin: false,
                savepoint: false,
                commit: true,
            },
        );
        assert_eq!(compound.text(), "update t set a = 1;COMMIT");
        assert!(Role::Commit.is_injected());
    }
}
