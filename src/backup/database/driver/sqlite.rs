use crate::backup::database::driver::{backquote, ColumnMeta, DatabaseDriver};
use crate::backup::database::sql_writer::SqlValue;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};

use std::path::Path;

pub struct SqliteDriver {
    conn: Connection,
}

impl SqliteDriver {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(Error::from)
        .with_msg(format!("Opening SQLite database {:?} failed", path.as_ref()))?;
        tracing::debug!("Opened SQLite database {:?}", path.as_ref());
        Ok(Self { conn })
    }
}

fn to_sql_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Text(f.to_string()),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => SqlValue::Blob(bytes.to_vec()),
    }
}

impl DatabaseDriver for SqliteDriver {
    fn list_tables(&mut self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tables)
    }

    fn create_table_statement(&mut self, table: &str) -> Result<String> {
        let sql = self.conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get::<_, String>(0),
        )?;
        Ok(sql)
    }

    /// Integer affinity follows SQLite's rule: the declared type contains `INT`.
    fn columns(&mut self, table: &str) -> Result<Vec<ColumnMeta>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", backquote(table)))?;
        let columns = stmt
            .query_map([], |row| {
                let name = row.get::<_, String>(1)?;
                let declared = row.get::<_, String>(2)?;
                Ok(ColumnMeta::new(
                    name,
                    declared.to_ascii_uppercase().contains("INT"),
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    fn for_each_row(
        &mut self,
        table: &str,
        row: &mut dyn FnMut(Vec<SqlValue>) -> Result<()>,
    ) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {}", backquote(table)))?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query([])?;

        let mut count = 0;
        while let Some(r) = rows.next()? {
            let values = (0..column_count)
                .map(|i| r.get_ref(i).map(to_sql_value))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            row(values)?;
            count += 1;
        }
        Ok(count)
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.conn.close().map_err(|(_, e)| Error::from(e))
    }
}
