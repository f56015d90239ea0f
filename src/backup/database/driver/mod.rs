pub mod mysql;
pub mod sqlite;

use crate::backup::database::sql_writer::SqlValue;
use crate::backup::result_error::result::Result;

/// Name and affinity of one result column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnMeta {
    name: String,
    integer: bool,
}

impl ColumnMeta {
    pub fn new<S: Into<String>>(name: S, integer: bool) -> Self {
        Self {
            name: name.into(),
            integer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Values of this column are written unquoted.
    pub fn integer(&self) -> bool {
        self.integer
    }
}

/// A single open database connection used by the fallback dumper.
pub trait DatabaseDriver {
    fn list_tables(&mut self) -> Result<Vec<String>>;

    /// The statement that recreates `table`, without a trailing `;`.
    fn create_table_statement(&mut self, table: &str) -> Result<String>;

    fn columns(&mut self, table: &str) -> Result<Vec<ColumnMeta>>;

    /// Streams every row of `table` into `row`, returning the row count.
    fn for_each_row(
        &mut self,
        table: &str,
        row: &mut dyn FnMut(Vec<SqlValue>) -> Result<()>,
    ) -> Result<usize>;

    /// Releases the connection.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Quotes an identifier with backticks.
pub fn backquote(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
