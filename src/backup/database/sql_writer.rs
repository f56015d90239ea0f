//! Plain SQL dump written row by row through a [`DatabaseDriver`].

use crate::backup::database::driver::{backquote, ColumnMeta, DatabaseDriver};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;

use bon::Builder;
use getset::Getters;
use itertools::Itertools;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Buffered rows are appended to the file in batches of this size.
pub const ROWS_PER_WRITE: usize = 100;

const RULE: &str = "# --------------------------------------------------------\n";

/// One column value as read from a driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Renders the value as a literal for an `INSERT` statement.
    ///
    /// Values of integer columns are written bare when they are integers.
    pub fn render(&self, integer_column: bool) -> String {
        match self {
            SqlValue::Null => "NULL".to_owned(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Text(s) if s.is_empty() => "''".to_owned(),
            SqlValue::Text(s) if integer_column && s.trim().parse::<i64>().is_ok() => {
                s.trim().to_owned()
            }
            SqlValue::Text(s) => format!("'{}'", escape(s)),
            SqlValue::Blob(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => SqlValue::Text(s.to_owned()).render(integer_column),
                Err(_) => format!("X'{}'", bytes.iter().map(|b| format!("{b:02X}")).join("")),
            },
        }
    }
}

/// Escapes a string literal body: backslashes and quotes first, then the
/// control characters MySQL has escapes for.
pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '\x00' => escaped.push_str("\\0"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\x1a' => escaped.push_str("\\Z"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Comment block written once at the top of a dump.
#[derive(Clone, Debug, Builder, Getters)]
#[getset(get = "pub")]
pub struct DumpHeader {
    #[builder(into)]
    site: String,
    #[builder(into)]
    host: String,
    #[builder(into)]
    database: String,
}

pub struct SqlDumpWriter {
    file: File,
    buffer: String,
}

impl SqlDumpWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .map_err(Error::from)
            .with_msg(format!("Opening dump file {:?} failed", path.as_ref()))?;
        Ok(Self {
            file,
            buffer: String::new(),
        })
    }

    pub fn header(&mut self, header: &DumpHeader) -> Result<()> {
        let generated = chrono::Local::now().format("%A %-d. %B %Y %H:%M %Z");
        self.buffer.push_str(&format!(
            "# {} : database backup\n#\n# Generated: {generated}\n# Hostname: {}\n# Database: {}\n{RULE}",
            header.site,
            header.host,
            backquote(&header.database),
        ));
        self.flush()
    }

    /// Writes `DROP TABLE`, the create statement and one `INSERT` per row of
    /// `table`. Returns the number of rows written.
    pub fn dump_table(&mut self, driver: &mut dyn DatabaseDriver, table: &str) -> Result<usize> {
        let quoted = backquote(table);
        tracing::debug!("Dumping table {quoted}");

        let create = driver.create_table_statement(table)?;
        let columns = driver.columns(table)?;

        tracing::trace!(
            "Columns of {quoted}: {}",
            columns.iter().map(ColumnMeta::name).join(", ")
        );

        self.buffer.push_str(&format!(
            "{RULE}# Table: {quoted}\n{RULE}\n\n#\n# Delete any existing table {quoted}\n#\n\n\
             DROP TABLE IF EXISTS {quoted};\n\n\n#\n# Table structure of table {quoted}\n#\n\n\
             {create} ;\n\n#\n# Data contents of table {quoted}\n#\n"
        ));

        let insert = format!("INSERT INTO {quoted} VALUES (");
        let mut rows = 0usize;
        driver.for_each_row(table, &mut |values| {
            self.push_row(&insert, &columns, &values);
            rows += 1;
            if rows % ROWS_PER_WRITE == 0 {
                self.flush()?;
            }
            Ok(())
        })?;

        self.buffer.push_str(&format!(
            "\n#\n# End of data contents of table {quoted} ({rows} records)\n{RULE}\n"
        ));
        self.flush()?;
        tracing::debug!("Dumped {rows} rows of {quoted}");
        Ok(rows)
    }

    fn push_row(&mut self, insert: &str, columns: &[ColumnMeta], values: &[SqlValue]) {
        let rendered = values
            .iter()
            .enumerate()
            .map(|(i, v)| v.render(columns.get(i).is_some_and(ColumnMeta::integer)))
            .join(", ");
        self.buffer.push_str(&format!(" \n{insert}{rendered}) ;"));
    }

    fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.file.write_all(self.buffer.as_bytes())?;
            self.buffer.clear();
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape(r"C:\path"), r"C:\\path");
        assert_eq!(escape("it's"), r"it\'s");
        assert_eq!(escape("a\nb\rc\x00d\x1a"), r"a\nb\rc\0d\Z");
        assert_eq!(escape(r"\'"), r"\\\'");
    }

    #[test]
    fn test_render_values() {
        assert_eq!(SqlValue::Null.render(true), "NULL");
        assert_eq!(SqlValue::Integer(-4).render(false), "-4");
        assert_eq!(SqlValue::Text("42".into()).render(true), "42");
        assert_eq!(SqlValue::Text("42".into()).render(false), "'42'");
        assert_eq!(SqlValue::Text("n/a".into()).render(true), "'n/a'");
        assert_eq!(SqlValue::Text(String::new()).render(true), "''");
        assert_eq!(SqlValue::Blob(b"text".to_vec()).render(false), "'text'");
        assert_eq!(SqlValue::Blob(vec![0xff, 0x00]).render(false), "X'FF00'");
    }
}
