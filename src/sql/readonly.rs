//! Grammar-aware read-only gate for generated SQL.
//!
//! Uses [sqlparser](https://docs.rs/sqlparser/) with the PostgreSQL dialect.
//! Exactly one statement is accepted: a query, or `EXPLAIN` of a query.
//! Queries that write (`SELECT ... INTO`, data-modifying CTEs) or take row
//! locks are rejected.

use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::{EngineError, EngineResult};

/// Broad category of a parsed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    DmlWrite,
    Ddl,
    Transaction,
    ProcedureCall,
    Administrative,
    Unknown,
}

mod reasons {
    pub const DML_WRITE: &str = "Generated SQL must not modify data.";
    pub const DDL: &str = "Generated SQL must not change the schema.";
    pub const TRANSACTION: &str = "Generated SQL must not control transactions.";
    pub const PROCEDURE: &str = "Generated SQL must not call procedures.";
    pub const ADMINISTRATIVE: &str = "Administrative statements are not allowed.";
    pub const UNKNOWN: &str = "Only read-only queries are allowed.";
    pub const SELECT_INTO: &str = "SELECT INTO creates a table and is not allowed.";
    pub const LOCKING: &str = "Row-locking clauses are not allowed.";
    pub const MULTIPLE: &str = "Exactly one statement is allowed.";
}

/// Check that `sql` is a single read-only statement.
pub fn ensure_read_only(sql: &str) -> EngineResult<()> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| EngineError::validation(format!("Failed to parse SQL statement: {}", e)))?;

    let statement = match statements.as_slice() {
        [] => return Err(EngineError::validation("Empty SQL statement")),
        [single] => single,
        _ => return Err(EngineError::permission("MULTIPLE", reasons::MULTIPLE)),
    };

    let (kind, operation) = classify_statement(statement);
    let reason = match kind {
        StatementKind::Query => {
            return match statement {
                Statement::Query(query) => check_query(query),
                Statement::Explain { statement, .. } => match statement.as_ref() {
                    Statement::Query(query) => check_query(query),
                    _ => Err(EngineError::permission(operation, reasons::UNKNOWN)),
                },
                _ => Ok(()),
            };
        }
        StatementKind::DmlWrite => reasons::DML_WRITE,
        StatementKind::Ddl => reasons::DDL,
        StatementKind::Transaction => reasons::TRANSACTION,
        StatementKind::ProcedureCall => reasons::PROCEDURE,
        StatementKind::Administrative => reasons::ADMINISTRATIVE,
        StatementKind::Unknown => reasons::UNKNOWN,
    };
    Err(EngineError::permission(operation, reason))
}

/// Classify a parsed statement.
pub fn classify_statement(stmt: &Statement) -> (StatementKind, &'static str) {
    match stmt {
        Statement::Query(_) => (StatementKind::Query, "SELECT"),
        Statement::Explain { statement, .. } => match classify_statement(statement) {
            (StatementKind::Query, _) => (StatementKind::Query, "EXPLAIN"),
            other => other,
        },

        Statement::Insert(_) => (StatementKind::DmlWrite, "INSERT"),
        Statement::Update { .. } => (StatementKind::DmlWrite, "UPDATE"),
        Statement::Delete(_) => (StatementKind::DmlWrite, "DELETE"),
        Statement::Merge { .. } => (StatementKind::DmlWrite, "MERGE"),
        Statement::Copy { .. } => (StatementKind::DmlWrite, "COPY"),

        Statement::CreateTable { .. } => (StatementKind::Ddl, "CREATE TABLE"),
        Statement::CreateView { .. } => (StatementKind::Ddl, "CREATE VIEW"),
        Statement::CreateIndex(_) => (StatementKind::Ddl, "CREATE INDEX"),
        Statement::CreateSchema { .. } => (StatementKind::Ddl, "CREATE SCHEMA"),
        Statement::CreateFunction { .. } => (StatementKind::Ddl, "CREATE FUNCTION"),
        Statement::AlterTable { .. } => (StatementKind::Ddl, "ALTER TABLE"),
        Statement::Drop { .. } => (StatementKind::Ddl, "DROP"),
        Statement::Truncate { .. } => (StatementKind::Ddl, "TRUNCATE"),

        Statement::StartTransaction { .. } => (StatementKind::Transaction, "BEGIN"),
        Statement::Commit { .. } => (StatementKind::Transaction, "COMMIT"),
        Statement::Rollback { .. } => (StatementKind::Transaction, "ROLLBACK"),

        Statement::Call { .. } => (StatementKind::ProcedureCall, "CALL"),
        Statement::Execute { .. } => (StatementKind::ProcedureCall, "EXECUTE"),
        Statement::Prepare { .. } => (StatementKind::ProcedureCall, "PREPARE"),

        Statement::Grant { .. } => (StatementKind::Administrative, "GRANT"),
        Statement::Revoke { .. } => (StatementKind::Administrative, "REVOKE"),
        Statement::Set(_) => (StatementKind::Administrative, "SET"),
        Statement::Vacuum { .. } => (StatementKind::Administrative, "VACUUM"),
        Statement::NOTIFY { .. } => (StatementKind::Administrative, "NOTIFY"),

        _ => (StatementKind::Unknown, "Unknown"),
    }
}

fn check_query(query: &Query) -> EngineResult<()> {
    if !query.locks.is_empty() {
        return Err(EngineError::permission("SELECT FOR UPDATE", reasons::LOCKING));
    }
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            check_query(&cte.query)?;
        }
    }
    check_set_expr(&query.body)
}

fn check_set_expr(body: &SetExpr) -> EngineResult<()> {
    match body {
        SetExpr::Select(select) => match &select.into {
            Some(_) => Err(EngineError::permission("SELECT INTO", reasons::SELECT_INTO)),
            None => Ok(()),
        },
        SetExpr::Query(query) => check_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            check_set_expr(left)?;
            check_set_expr(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => Ok(()),
        // INSERT/UPDATE/DELETE nested in a CTE
        _ => Err(EngineError::permission("WITH", reasons::DML_WRITE)),
    }
}
