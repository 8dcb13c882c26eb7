use crate::sql_scan::is_rollback_to;
use crate::transaction::TxEvent;
use crate::types::CommandTag;

use super::compound::Role;

/// Session-level consequence of one completion tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TagEffect {
    Tx(TxEvent),
    /// Every open cursor may have been destroyed.
    CursorsRolledBack,
    /// Cursors without hold were destroyed.
    CursorsCommitted,
    /// Cached table metadata may be stale.
    SchemaChanged,
}

const SCHEMA_COMMANDS: [&str; 4] = ["CREATE", "ALTER", "DROP", "COMMENT"];

/// Effects of the completion tag for the statement `sql`.
pub(crate) fn interpret(tag: &CommandTag, role: Role, sql: &str) -> Vec<TagEffect> {
    let command = tag.command().to_ascii_uppercase();
    match command.as_str() {
        "BEGIN" | "START TRANSACTION" => vec![TagEffect::Tx(TxEvent::Began {
            implicit: role == Role::Begin,
        })],
        "COMMIT" | "END" | "PREPARE TRANSACTION" => vec![
            TagEffect::Tx(TxEvent::Committed),
            TagEffect::CursorsCommitted,
        ],
        // also the tag of a COMMIT that ended a failed block
        "ROLLBACK" if role == Role::Caller && is_rollback_to(sql) => vec![
            TagEffect::Tx(TxEvent::RolledBackToSavepoint),
            TagEffect::CursorsRolledBack,
        ],
        "ROLLBACK" => vec![
            TagEffect::Tx(TxEvent::RolledBack),
            TagEffect::CursorsRolledBack,
        ],
        _ => {
            let first = command.split_whitespace().next().unwrap_or_default();
            if SCHEMA_COMMANDS.contains(&first) {
                vec![TagEffect::SchemaChanged]
            } else {
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_begin_is_implicit() {
        let effects = interpret(&CommandTag::new("BEGIN"), Role::Begin, "BEGIN");
        assert_eq!(
            effects,
            vec![TagEffect::Tx(TxEvent::Began { implicit: true })]
        );
        let effects = interpret(&CommandTag::new("BEGIN"), Role::Caller, "begin");
        assert_eq!(
            effects,
            vec![TagEffect::Tx(TxEvent::Began { implicit: false })]
        );
    }

    #[test]
    fn rollback_to_keeps_the_block() {
        let effects = interpret(
            &CommandTag::new("ROLLBACK"),
            Role::Caller,
            "ROLLBACK TO SAVEPOINT a",
        );
        assert_eq!(effects[0], TagEffect::Tx(TxEvent::RolledBackToSavepoint));
        let effects = interpret(&CommandTag::new("ROLLBACK"), Role::Commit, "COMMIT");
        assert_eq!(effects[0], TagEffect::Tx(TxEvent::RolledBack));
        assert!(effects.contains(&TagEffect::CursorsRolledBack));
    }

    #[test]
    fn ddl_invalidates_metadata() {
        for tag in ["CREATE TABLE", "ALTER TABLE", "DROP INDEX", "COMMENT"] {
            assert_eq!(
                interpret(&CommandTag::new(tag), Role::Caller, ""),
                vec![TagEffect::SchemaChanged]
            );
        }
        assert!(interpret(&CommandTag::new("INSERT 0 1"), Role::Caller, "").is_empty());
    }
}
