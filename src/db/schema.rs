//! Schema introspection.
//!
//! Reads the `public` schema of a target PostgreSQL database into a
//! [`SchemaSnapshot`].
//!
//! # Architecture
//!
//! SQL queries live in the `queries` submodule; the `postgres` submodule runs
//! them, one table at a time. Identifier columns are cast to `text` because
//! `information_schema` reports them as domain types.
//!
//! A failed metadata query for any table aborts the whole snapshot.

use sqlx::PgPool;
use tracing::{debug, info};

use crate::db::pool::{connect_error, is_connection_error};
use crate::error::{EngineError, EngineResult};
use crate::models::{ConnectionProfile, SchemaSnapshot};

/// Reads catalog metadata from a target database.
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Snapshot every table and view of the `public` schema.
    pub async fn introspect(
        pool: &PgPool,
        profile: &ConnectionProfile,
    ) -> EngineResult<SchemaSnapshot> {
        let tables = postgres::list_tables(pool)
            .await
            .map_err(|e| map_error(profile, e))?;
        debug!(connection_id = %profile.id, tables = tables.len(), "Listed tables");

        let mut snapshot = Vec::with_capacity(tables.len());
        for (name, table_type) in tables {
            let table = postgres::describe_table(pool, &name, &table_type)
                .await
                .map_err(|e| match e {
                    e if is_connection_error(&e) => connect_error(profile, &e),
                    e => EngineError::schema(
                        format!("Failed to read metadata for table '{}': {}", name, e),
                        name.clone(),
                    ),
                })?;
            snapshot.push(table);
        }

        let snapshot = SchemaSnapshot::new(snapshot);
        info!(
            connection_id = %profile.id,
            tables = snapshot.tables.len(),
            columns = snapshot.column_count(),
            "Introspected schema"
        );
        Ok(snapshot)
    }
}

fn map_error(profile: &ConnectionProfile, error: sqlx::Error) -> EngineError {
    match &error {
        sqlx::Error::Database(db_err) => {
            // 28xxx: invalid authorization, 3D000: unknown database
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            if code.starts_with("28") || code == "3D000" {
                connect_error(profile, &error)
            } else {
                error.into()
            }
        }
        e if is_connection_error(e) => connect_error(profile, e),
        sqlx::Error::Configuration(_) => connect_error(profile, &error),
        _ => error.into(),
    }
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const LIST_TABLES: &str = r#"
            SELECT
                table_name::text AS table_name,
                table_type::text AS table_type
            FROM information_schema.tables
            WHERE table_schema = 'public'
            AND table_type IN ('BASE TABLE', 'VIEW')
            ORDER BY table_name
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
            SELECT
                column_name::text AS column_name,
                data_type::text AS data_type,
                character_maximum_length::int4 AS character_maximum_length,
                is_nullable::text AS is_nullable,
                column_default::text AS column_default,
                ordinal_position::int4 AS ordinal_position
            FROM information_schema.columns
            WHERE table_schema = 'public' AND table_name = $1
            ORDER BY ordinal_position
            "#;

        pub const CONSTRAINT_COLUMNS: &str = r#"
            SELECT kcu.column_name::text AS column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            WHERE tc.constraint_type = $2
            AND tc.table_schema = 'public'
            AND tc.table_name = $1
            ORDER BY kcu.ordinal_position
            "#;

        pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
            SELECT
                kcu.column_name::text AS column_name,
                ccu.table_name::text AS foreign_table_name,
                ccu.column_name::text AS foreign_column_name
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
                ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
                ON ccu.constraint_name = tc.constraint_name
                AND ccu.table_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
            AND tc.table_schema = 'public'
            AND tc.table_name = $1
            ORDER BY kcu.ordinal_position
            "#;

        pub const DESCRIBE_INDEXES: &str = r#"
            SELECT
                indexname::text AS index_name,
                indexdef AS index_definition
            FROM pg_indexes
            WHERE schemaname = 'public' AND tablename = $1
            ORDER BY indexname
            "#;
    }
}

// =============================================================================
// PostgreSQL Implementation
// =============================================================================

mod postgres {
    use super::queries;
    use crate::models::{ColumnSchema, TableKind, TableSchema};
    use sqlx::{PgPool, Row};

    pub async fn list_tables(pool: &PgPool) -> Result<Vec<(String, String)>, sqlx::Error> {
        let rows = sqlx::query(queries::postgres::LIST_TABLES)
            .fetch_all(pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("table_name"), row.get("table_type")))
            .collect())
    }

    pub async fn describe_table(
        pool: &PgPool,
        table_name: &str,
        table_type: &str,
    ) -> Result<TableSchema, sqlx::Error> {
        let mut table = TableSchema::new(table_name).with_kind(TableKind::parse(table_type));

        for column in fetch_columns(pool, table_name).await? {
            table = table.with_column(column);
        }
        for column in fetch_constraint_columns(pool, table_name, "PRIMARY KEY").await? {
            table = table.with_primary_key(column);
        }
        for (column, target_table, target_column) in fetch_foreign_keys(pool, table_name).await? {
            table = table.with_foreign_key(column, target_table, target_column);
        }
        for column in fetch_constraint_columns(pool, table_name, "UNIQUE").await? {
            table = table.with_unique(column);
        }
        for (name, definition) in fetch_indexes(pool, table_name).await? {
            table = table.with_index(name, definition);
        }
        Ok(table)
    }

    async fn fetch_columns(
        pool: &PgPool,
        table_name: &str,
    ) -> Result<Vec<ColumnSchema>, sqlx::Error> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_COLUMNS)
            .bind(table_name)
            .fetch_all(pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let name: String = row.get("column_name");
                let data_type: String = row.get("data_type");
                let max_length: Option<i32> = row.get("character_maximum_length");
                let nullable: String = row.get("is_nullable");
                let default_value: Option<String> = row.get("column_default");
                let position: i32 = row.get("ordinal_position");

                let mut col = ColumnSchema::new(name, data_type).with_position(position);
                if nullable != "YES" {
                    col = col.not_null();
                }
                if let Some(def) = default_value {
                    col = col.with_default(def);
                }
                if let Some(len) = max_length {
                    col = col.with_max_length(len);
                }
                col
            })
            .collect())
    }

    async fn fetch_constraint_columns(
        pool: &PgPool,
        table_name: &str,
        constraint_type: &str,
    ) -> Result<Vec<String>, sqlx::Error> {
        let rows = sqlx::query(queries::postgres::CONSTRAINT_COLUMNS)
            .bind(table_name)
            .bind(constraint_type)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("column_name")).collect())
    }

    async fn fetch_foreign_keys(
        pool: &PgPool,
        table_name: &str,
    ) -> Result<Vec<(String, String, String)>, sqlx::Error> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_FOREIGN_KEYS)
            .bind(table_name)
            .fetch_all(pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get("column_name"),
                    row.get("foreign_table_name"),
                    row.get("foreign_column_name"),
                )
            })
            .collect())
    }

    async fn fetch_indexes(
        pool: &PgPool,
        table_name: &str,
    ) -> Result<Vec<(String, String)>, sqlx::Error> {
        let rows = sqlx::query(queries::postgres::DESCRIBE_INDEXES)
            .bind(table_name)
            .fetch_all(pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("index_name"), row.get("index_definition")))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewConnection;

    fn profile() -> ConnectionProfile {
        ConnectionProfile::new(
            "shop",
            NewConnection {
                owner_id: "u".into(),
                name: "Shop".into(),
                host: "localhost".into(),
                port: None,
                database: "shop".into(),
                username: "app".into(),
                password: "secret".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_unreachable_host_maps_to_connection_error() {
        let io = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "Connection refused",
        ));
        let err = map_error(&profile(), io);
        assert!(matches!(err, EngineError::Connection { .. }));
        assert!(err.suggestion().unwrap().contains("running"));
    }

    #[test]
    fn test_other_errors_keep_their_category() {
        let err = map_error(&profile(), sqlx::Error::RowNotFound);
        assert!(matches!(err, EngineError::Database { .. }));
    }

    #[test]
    fn test_queries_are_scoped_to_public_schema() {
        for query in [
            queries::postgres::LIST_TABLES,
            queries::postgres::DESCRIBE_COLUMNS,
            queries::postgres::CONSTRAINT_COLUMNS,
            queries::postgres::DESCRIBE_FOREIGN_KEYS,
        ] {
            assert!(query.contains("table_schema = 'public'"));
        }
        assert!(queries::postgres::DESCRIBE_INDEXES.contains("schemaname = 'public'"));
    }
}
