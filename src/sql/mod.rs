//! SQL synthesis and the checks a generated statement passes before it runs.

pub mod readonly;
pub mod synthesizer;
pub mod validator;

use tracing::warn;

use crate::error::{EngineError, EngineResult};

pub use readonly::{StatementKind, classify_statement, ensure_read_only};
pub use synthesizer::{SqlSynthesizer, build_prompt, clean_response};
pub use validator::{QuoteState, SqlCheck, scan_quotes, validate_sql};

/// Statement cleared for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedSql {
    pub sql: String,
    /// Set when closing quotes were appended.
    pub repaired: bool,
}

/// Run the lexical check, apply any repair, then the read-only gate.
pub fn prepare_statement(candidate: &str) -> EngineResult<PreparedSql> {
    let check = validate_sql(candidate);
    let Some(sql) = check.executable(candidate) else {
        let error = check.error().unwrap_or("Empty or invalid SQL query");
        return Err(EngineError::validation(error));
    };
    if let SqlCheck::Repairable { error, repaired } = &check {
        warn!(error = %error, repaired = %repaired, "Using repaired SQL");
    }
    ensure_read_only(sql)?;
    Ok(PreparedSql {
        repaired: !check.is_valid(),
        sql: sql.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repaired_statement_is_prepared() {
        let prepared =
            prepare_statement(r#"SELECT * FROM "orders" WHERE "status" ILIKE '%shipped"#).unwrap();
        assert!(prepared.repaired);
        assert!(prepared.sql.ends_with("'%shipped'"));
    }

    #[test]
    fn test_clean_statement_is_untouched() {
        let prepared = prepare_statement("SELECT 1").unwrap();
        assert_eq!(
            prepared,
            PreparedSql {
                sql: "SELECT 1".into(),
                repaired: false
            }
        );
    }

    #[test]
    fn test_write_hidden_behind_select_is_rejected() {
        let err = prepare_statement("SELECT 1; DROP TABLE users").unwrap_err();
        assert!(matches!(err, EngineError::Permission { .. }));
    }

    #[test]
    fn test_missing_select_is_a_validation_error() {
        let err = prepare_statement("VACUUM").unwrap_err();
        assert_eq!(err.to_string(), "Invalid SQL: Query must include a SELECT statement");
    }
}
