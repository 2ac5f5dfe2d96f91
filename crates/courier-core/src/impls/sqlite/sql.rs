//! SQL templates keyed by table identity.
//!
//! テーブル名だけは識別子として文字列に埋め込みます（プレフィックスは起動時に検証済み）。
//! 値はすべて `?` のバインドパラメータです。テンプレートは構築時に一度だけ作ります。

use crate::domain::MessageType;

/// Resolved table names (unquoted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub published: String,
    pub received: String,
    pub locks: String,
}

impl TableNames {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            published: format!("{prefix}.Published"),
            received: format!("{prefix}.Received"),
            locks: format!("{prefix}.Locks"),
        }
    }
}

/// Quote an identifier for SQLite (`"name"`, embedded quotes doubled).
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

const PUBLISHED_COLUMNS: &str =
    r#""Id", "Version", "Name", "Content", "Retries", "Added", "ExpiresAt", "StatusName""#;

const RECEIVED_COLUMNS: &str = r#""Id", "Version", "Name", "Group", "Content", "Retries", "Added", "ExpiresAt", "StatusName""#;

/// Statements for one message table.
#[derive(Debug, Clone)]
pub(crate) struct MessageTableSql {
    /// Quoted table name, for the dynamic monitoring queries.
    pub table: String,
    pub columns: &'static str,
    pub insert: String,
    pub update_state: String,
    pub select_retry: String,
    pub delete_expired: String,
    pub select_by_id: String,
    pub count_by_status: String,
    pub hourly_counts: String,
}

impl MessageTableSql {
    fn new(name: &str, columns: &'static str) -> Self {
        let table = quote_ident(name);
        let placeholders = vec!["?"; columns.split(',').count()].join(", ");
        Self {
            insert: format!("INSERT INTO {table} ({columns}) VALUES ({placeholders})"),
            update_state: format!(
                r#"UPDATE {table} SET "Content" = ?, "Retries" = ?, "ExpiresAt" = ?, "StatusName" = ? WHERE "Id" = ?"#
            ),
            select_retry: format!(
                r#"SELECT {columns} FROM {table} WHERE "Retries" < ? AND "Version" = ? AND "Added" < ? AND "StatusName" IN (?, ?) LIMIT ?"#
            ),
            // SQLite は DELETE ... LIMIT を既定でサポートしないのでサブクエリで絞る
            delete_expired: format!(
                r#"DELETE FROM {table} WHERE "Id" IN (SELECT "Id" FROM {table} WHERE "ExpiresAt" < ? AND "StatusName" IN (?, ?) LIMIT ?)"#
            ),
            select_by_id: format!(r#"SELECT {columns} FROM {table} WHERE "Id" = ?"#),
            count_by_status: format!(r#"SELECT COUNT("Id") FROM {table} WHERE "StatusName" = ?"#),
            hourly_counts: format!(
                r#"SELECT "Added" / 3600000 AS "Hour", COUNT("Id") AS "Count" FROM {table} WHERE "StatusName" = ? AND "Added" >= ? GROUP BY "Hour""#
            ),
            table,
            columns,
        }
    }
}

/// Statements for the lock table.
#[derive(Debug, Clone)]
pub(crate) struct LockSql {
    pub acquire: String,
    pub release: String,
    pub renew: String,
    pub seed: String,
}

impl LockSql {
    fn new(name: &str) -> Self {
        let table = quote_ident(name);
        Self {
            acquire: format!(
                r#"UPDATE {table} SET "Instance" = ?, "LastLockTime" = ? WHERE "Key" = ? AND "LastLockTime" <= ?"#
            ),
            release: format!(
                r#"UPDATE {table} SET "Instance" = '', "LastLockTime" = ? WHERE "Key" = ? AND "Instance" = ?"#
            ),
            renew: format!(
                r#"UPDATE {table} SET "LastLockTime" = "LastLockTime" + ? WHERE "Key" = ? AND "Instance" = ? AND "LastLockTime" > ?"#
            ),
            seed: format!(
                r#"INSERT OR IGNORE INTO {table} ("Key", "Instance", "LastLockTime") VALUES (?, '', ?)"#
            ),
        }
    }
}

/// All statements, built once per storage instance.
#[derive(Debug, Clone)]
pub(crate) struct SqlTemplates {
    pub published: MessageTableSql,
    pub received: MessageTableSql,
    pub select_delayed: String,
    pub statistics: String,
    pub locks: LockSql,
}

impl SqlTemplates {
    pub fn new(tables: &TableNames) -> Self {
        let published = MessageTableSql::new(&tables.published, PUBLISHED_COLUMNS);
        let received = MessageTableSql::new(&tables.received, RECEIVED_COLUMNS);

        let select_delayed = format!(
            r#"SELECT {columns} FROM {table} WHERE "Version" = ? AND (("StatusName" = ? AND "ExpiresAt" < ?) OR ("StatusName" = ? AND "ExpiresAt" < ?))"#,
            columns = published.columns,
            table = published.table,
        );
        let statistics = format!(
            r#"SELECT
                (SELECT COUNT("Id") FROM {p} WHERE "StatusName" = ?),
                (SELECT COUNT("Id") FROM {r} WHERE "StatusName" = ?),
                (SELECT COUNT("Id") FROM {p} WHERE "StatusName" = ?),
                (SELECT COUNT("Id") FROM {r} WHERE "StatusName" = ?)"#,
            p = published.table,
            r = received.table,
        );

        Self {
            published,
            received,
            select_delayed,
            statistics,
            locks: LockSql::new(&tables.locks),
        }
    }

    pub fn for_table(&self, message_type: MessageType) -> &MessageTableSql {
        match message_type {
            MessageType::Publish => &self.published,
            MessageType::Subscribe => &self.received,
        }
    }
}
