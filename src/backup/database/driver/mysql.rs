//! MySQL connection for the fallback dumper, built with the `mysql` feature.

#[cfg(feature = "mysql")]
pub use enabled::MysqlDriver;

#[cfg(feature = "mysql")]
mod enabled {
    use crate::backup::database::driver::{backquote, ColumnMeta, DatabaseDriver};
    use crate::backup::database::sql_writer::SqlValue;
    use crate::backup::database::MysqlConfig;
    use crate::backup::result_error::error::Error;
    use crate::backup::result_error::result::Result;
    use crate::backup::result_error::WithMsg;

    use mysql::consts::ColumnType;
    use mysql::prelude::Queryable;
    use mysql::{Conn, OptsBuilder, Value};

    /// Views have no rows of their own to dump, so only base tables are listed.
    pub(crate) const LIST_TABLES: &str = "SHOW FULL TABLES WHERE Table_type = 'BASE TABLE'";

    pub struct MysqlDriver {
        conn: Conn,
    }

    impl MysqlDriver {
        pub fn open(config: &MysqlConfig) -> Result<Self> {
            let mut opts = OptsBuilder::new()
                .ip_or_hostname(Some(config.host().as_str()))
                .user(Some(config.user().as_str()))
                .db_name(Some(config.name().as_str()))
                .init(vec![format!("SET NAMES {}", config.charset())]);
            if !config.password().is_empty() {
                opts = opts.pass(Some(config.password().inner().as_str()));
            }
            if let Some(port) = config.port() {
                opts = opts.tcp_port(*port);
            }

            let conn = Conn::new(opts)
                .map_err(Error::from)
                .with_msg(format!(
                    "Connecting to {} on {} failed",
                    config.name(),
                    config.host()
                ))?;
            tracing::debug!("Connected to {} on {}", config.name(), config.host());
            Ok(Self { conn })
        }
    }

    fn is_integer_type(column_type: ColumnType) -> bool {
        matches!(
            column_type,
            ColumnType::MYSQL_TYPE_TINY
                | ColumnType::MYSQL_TYPE_SHORT
                | ColumnType::MYSQL_TYPE_INT24
                | ColumnType::MYSQL_TYPE_LONG
                | ColumnType::MYSQL_TYPE_LONGLONG
        )
    }

    fn to_sql_value(value: Value) -> SqlValue {
        match value {
            Value::NULL => SqlValue::Null,
            Value::Bytes(bytes) => match String::from_utf8(bytes) {
                Ok(text) => SqlValue::Text(text),
                Err(e) => SqlValue::Blob(e.into_bytes()),
            },
            Value::Int(i) => SqlValue::Integer(i),
            other => SqlValue::Text(other.as_sql(true).trim_matches('\'').to_owned()),
        }
    }

    impl DatabaseDriver for MysqlDriver {
        fn list_tables(&mut self) -> Result<Vec<String>> {
            let tables = self
                .conn
                .query::<(String, String), _>(LIST_TABLES)?
                .into_iter()
                .map(|(name, _)| name)
                .collect();
            Ok(tables)
        }

        fn create_table_statement(&mut self, table: &str) -> Result<String> {
            let statement = self
                .conn
                .query_first::<(String, String), _>(format!("SHOW CREATE TABLE {}", backquote(table)))?
                .map(|(_, create)| create)
                .unwrap_or_default();
            Ok(statement)
        }

        fn columns(&mut self, table: &str) -> Result<Vec<ColumnMeta>> {
            let result = self
                .conn
                .query_iter(format!("SELECT * FROM {} LIMIT 0", backquote(table)))?;
            let columns = result
                .columns()
                .as_ref()
                .iter()
                .map(|c| ColumnMeta::new(c.name_str(), is_integer_type(c.column_type())))
                .collect();
            Ok(columns)
        }

        fn for_each_row(
            &mut self,
            table: &str,
            row: &mut dyn FnMut(Vec<SqlValue>) -> Result<()>,
        ) -> Result<usize> {
            let result = self
                .conn
                .query_iter(format!("SELECT * FROM {}", backquote(table)))?;
            let mut count = 0;
            for r in result {
                let values = r?
                    .unwrap_raw()
                    .into_iter()
                    .map(|v| to_sql_value(v.unwrap_or(Value::NULL)))
                    .collect();
                row(values)?;
                count += 1;
            }
            Ok(count)
        }

        fn close(self: Box<Self>) -> Result<()> {
            drop(self.conn);
            Ok(())
        }
    }

}
