//! Column-aligned table output.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Writes the header and one line per tick, left-justified in fixed-width
/// columns. Values wider than their column are written in full.
pub struct OutputSink {
    out: Box<dyn Write + Send>,
    widths: Vec<usize>,
    rows_written: u64,
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink")
            .field("widths", &self.widths)
            .field("rows_written", &self.rows_written)
            .finish()
    }
}

impl OutputSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            widths: Vec::new(),
            rows_written: 0,
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Creates (truncating) `path`.
    pub fn file(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }

    /// Writes the header line and fixes the column widths for later rows.
    pub fn write_header(&mut self, headers: &[String], widths: &[usize]) -> io::Result<()> {
        self.widths = widths.to_vec();
        let line = format_line(headers, &self.widths);
        self.out.write_all(line.as_bytes())?;
        self.out.flush()
    }

    /// Writes one data row and flushes, so the table can be followed live.
    pub fn write_row(&mut self, row: &[String]) -> io::Result<()> {
        let line = format_line(row, &self.widths);
        self.out.write_all(line.as_bytes())?;
        self.out.flush()?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

fn format_line(cells: &[String], widths: &[usize]) -> String {
    let mut line = String::new();
    for (idx, cell) in cells.iter().enumerate() {
        let width = widths.get(idx).copied().unwrap_or(0);
        line.push_str(&format!("{:<width$}", cell, width = width));
    }
    line.push('\n');
    line
}
