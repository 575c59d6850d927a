//! In-memory tabular dataset backed by a CSV file.
//!
//! The whole file is read at pipeline start and rewritten once at the end.
//! Null cells are empty strings; columns are looked up by exact name.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use thiserror::Error;

/// Errors that can occur while reading or writing a table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line {line} has {found} fields, header has {expected}")]
    RaggedRow {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("Row {row} out of range (table has {len} rows)")]
    RowOutOfRange { row: usize, len: usize },
}

/// A CSV table held entirely in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    columns: HashMap<String, usize>,
}

impl Table {
    /// Build a table from headers and rows. Short rows are padded with nulls;
    /// cells past the last header get generated `column_N` headers.
    pub fn new(mut headers: Vec<String>, mut rows: Vec<Vec<String>>) -> Self {
        let width = rows.iter().map(Vec::len).fold(headers.len(), usize::max);
        while headers.len() < width {
            headers.push(format!("column_{}", headers.len()));
        }
        for row in &mut rows {
            row.resize(width, String::new());
        }
        let columns = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), i))
            .collect();
        Self {
            headers,
            rows,
            columns,
        }
    }

    /// Read a CSV file with a header row.
    ///
    /// Short rows are accepted and padded. A row with more fields than the
    /// header is an error, since rewriting the file would drop its extra cells.
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)?;

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.len() > headers.len() {
                return Err(TableError::RaggedRow {
                    line: record.position().map_or(0, |p| p.line()),
                    expected: headers.len(),
                    found: record.len(),
                });
            }
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self::new(headers, rows))
    }

    /// Serialize the table as CSV to any writer.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), TableError> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(&self.headers)?;
        for row in &self.rows {
            out.write_record(row)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Atomically replace `path` with the table contents.
    ///
    /// Writes to a temporary file in the same directory and renames it over
    /// the target, so a crash never leaves a truncated CSV behind.
    pub fn save(&self, path: &Path) -> Result<(), TableError> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        self.write_to(tmp.as_file_mut())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| TableError::Io(e.error))?;
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Add a column filled with nulls if it does not already exist.
    pub fn ensure_column(&mut self, name: &str) {
        if self.columns.contains_key(name) {
            return;
        }
        self.columns.insert(name.to_string(), self.headers.len());
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
    }

    /// Raw cell value; `None` if the column does not exist.
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let col = *self.columns.get(column)?;
        self.rows.get(row).map(|r| r[col].as_str())
    }

    /// Set a cell, creating the column if needed.
    pub fn set(&mut self, row: usize, column: &str, value: impl Into<String>) -> Result<(), TableError> {
        let len = self.rows.len();
        if row >= len {
            return Err(TableError::RowOutOfRange { row, len });
        }
        self.ensure_column(column);
        let col = self.columns[column];
        self.rows[row][col] = value.into();
        Ok(())
    }

    /// Write several cells of one row.
    pub fn set_many(&mut self, row: usize, values: &[(String, String)]) -> Result<(), TableError> {
        for (column, value) in values {
            self.set(row, column, value.as_str())?;
        }
        Ok(())
    }

    /// Null out the given columns of one row.
    pub fn clear(&mut self, row: usize, columns: &[String]) -> Result<(), TableError> {
        for column in columns {
            if self.has_column(column) {
                self.set(row, column, "")?;
            }
        }
        Ok(())
    }

    /// Borrowed view of one row.
    pub fn record(&self, row: usize) -> Option<Record<'_>> {
        self.rows.get(row).map(|values| Record {
            index: row,
            table: self,
            values,
        })
    }
}

/// Read-only view of one table row.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    index: usize,
    table: &'a Table,
    values: &'a [String],
}

impl<'a> Record<'a> {
    /// Stable row index (0-based, in file order).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw cell value, empty string for null. `None` if the column is absent.
    pub fn raw(&self, column: &str) -> Option<&'a str> {
        let col = *self.table.columns.get(column)?;
        Some(self.values[col].as_str())
    }

    /// Trimmed text value, or `None` for nulls and "nan"-style sentinels.
    pub fn text(&self, column: &str) -> Option<&'a str> {
        self.raw(column).and_then(present_text)
    }

    /// Whether the cell holds a truthy boolean.
    pub fn is_truthy(&self, column: &str) -> bool {
        self.raw(column).is_some_and(is_truthy)
    }
}

/// Values pandas and friends write for missing data.
const NULL_SENTINELS: &[&str] = &["nan", "none", "null", "n/a"];

/// Trim a cell and drop it if it is empty or a null sentinel.
pub fn present_text(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || NULL_SENTINELS
            .iter()
            .any(|s| trimmed.eq_ignore_ascii_case(s))
    {
        None
    } else {
        Some(trimmed)
    }
}

/// Lenient boolean check matching what CSV writers emit for `True`.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "1.0" | "yes" | "y"
    )
}

/// Canonical cell encoding for booleans.
pub fn bool_cell(value: bool) -> String {
    if value { "True" } else { "False" }.to_string()
}
