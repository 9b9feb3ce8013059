//! Header-plus-rows spreadsheet table, read from and written to `.xlsx`
//! workbooks or CSV files.

use std::io::Cursor;
use std::path::Path;

use calamine::{Data, Reader, Xlsx};
use csv::{ReaderBuilder, WriterBuilder};
use rust_xlsxwriter::Workbook;

use crate::error::{AppResult, LabError};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// File format of an exchanged spreadsheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpreadsheetFormat {
    /// Excel workbook; the first worksheet holds the table.
    #[default]
    Xlsx,
    Csv,
}

impl SpreadsheetFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SpreadsheetFormat::Xlsx => "xlsx",
            SpreadsheetFormat::Csv => "csv",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            SpreadsheetFormat::Xlsx => "application/vnd.ms-excel",
            SpreadsheetFormat::Csv => "text/csv",
        }
    }

    /// Format named by a file's extension, if it is one we read.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let extension = Path::new(filename).extension()?.to_str()?;
        [SpreadsheetFormat::Xlsx, SpreadsheetFormat::Csv]
            .into_iter()
            .find(|f| extension.eq_ignore_ascii_case(f.extension()))
    }
}

/// Text of a workbook cell. Numbers print without a trailing `.0`.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string().trim().to_string(),
    }
}

/// A cell is written as a number only when its text survives the trip back.
fn as_number(cell: &str) -> Option<f64> {
    cell.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite() && f.to_string() == cell)
}

/// A parsed spreadsheet: one header row, then one row per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn parse(format: SpreadsheetFormat, bytes: &[u8]) -> AppResult<Self> {
        match format {
            SpreadsheetFormat::Xlsx => Self::from_xlsx(bytes),
            SpreadsheetFormat::Csv => Self::from_csv(bytes),
        }
    }

    pub fn encode(&self, format: SpreadsheetFormat) -> AppResult<Vec<u8>> {
        match format {
            SpreadsheetFormat::Xlsx => self.to_xlsx(),
            SpreadsheetFormat::Csv => self.to_csv(),
        }
    }

    /// Read the first worksheet of a workbook. The first used row is the
    /// header; blank rows are skipped.
    pub fn from_xlsx(bytes: &[u8]) -> AppResult<Self> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| LabError::validation("The workbook has no worksheet."))??;

        let mut rows = range.rows();
        let headers: Vec<String> = rows
            .next()
            .map(|row| row.iter().map(cell_text).collect())
            .unwrap_or_default();
        if headers.iter().all(String::is_empty) {
            return Err(LabError::validation("The dataset has no header row."));
        }

        let rows = rows
            .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
            .filter(|row| !row.iter().all(String::is_empty))
            .collect();
        Ok(Self { headers, rows })
    }

    /// Write the table to the first worksheet of a new workbook.
    pub fn to_xlsx(&self) -> AppResult<Vec<u8>> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (r, cells) in std::iter::once(&self.headers).chain(&self.rows).enumerate() {
            let r = u32::try_from(r)
                .map_err(|_| LabError::validation("Too many rows for a worksheet."))?;
            for (c, cell) in cells.iter().enumerate() {
                let c = u16::try_from(c)
                    .map_err(|_| LabError::validation("Too many columns for a worksheet."))?;
                match as_number(cell) {
                    Some(number) if r > 0 => sheet.write_number(r, c, number)?,
                    _ => sheet.write_string(r, c, cell.as_str())?,
                };
            }
        }
        Ok(workbook.save_to_buffer()?)
    }

    /// Parse CSV bytes. Short rows are padded with empty cells; rows longer
    /// than the header are rejected.
    pub fn from_csv(bytes: &[u8]) -> AppResult<Self> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        if headers.iter().all(String::is_empty) {
            return Err(LabError::validation("The dataset has no header row."));
        }

        let mut rows = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() > headers.len() {
                return Err(LabError::validation(format!(
                    "Row {} has {} cells but the header has {} columns.",
                    index + 2,
                    record.len(),
                    headers.len()
                )));
            }
            let mut row: Vec<String> = record.iter().map(|c| c.trim().to_string()).collect();
            if row.iter().all(String::is_empty) {
                continue;
            }
            row.resize(headers.len(), String::new());
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }

    pub fn to_csv(&self) -> AppResult<Vec<u8>> {
        let mut writer = WriterBuilder::new().from_writer(Vec::new());
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| LabError::Io(e.into_error()))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Append a column with the same value in every row.
    pub fn push_column(&mut self, name: &str, fill: &str) {
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(fill.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pads_short_rows_and_skips_blank_lines() {
        let table = Table::from_csv(b"\xEF\xBB\xBFrun_id,temp,note\n,7\n\n3, 8 ,x\n").unwrap();
        assert_eq!(table.headers, vec!["run_id", "temp", "note"]);
        assert_eq!(
            table.rows,
            vec![
                vec!["".to_string(), "7".to_string(), "".to_string()],
                vec!["3".to_string(), "8".to_string(), "x".to_string()],
            ]
        );
    }

    #[test]
    fn test_long_row_rejected() {
        let err = Table::from_csv(b"temp\n1,2\n").unwrap_err();
        assert!(err.to_string().contains("Row 2"));
    }

    #[test]
    fn test_xlsx_keeps_text_and_numbers() {
        let mut table = Table::new(vec!["run_id".into(), "temp".into(), "code".into()]);
        table.rows.push(vec!["".into(), "7,5".into(), "007".into()]);
        table.rows.push(vec!["12".into(), "-3.25".into(), "NaOH".into()]);

        let bytes = table.to_xlsx().unwrap();
        assert_eq!(&bytes[..2], b"PK");
        assert_eq!(Table::from_xlsx(&bytes).unwrap(), table);
    }

    #[test]
    fn test_garbage_is_not_a_workbook() {
        let err = Table::from_xlsx(b"run_id,temp\n,1\n").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_format_from_filename() {
        assert_eq!(
            SpreadsheetFormat::from_filename("runs.XLSX"),
            Some(SpreadsheetFormat::Xlsx)
        );
        assert_eq!(
            SpreadsheetFormat::from_filename("runs.csv"),
            Some(SpreadsheetFormat::Csv)
        );
        assert_eq!(SpreadsheetFormat::from_filename("runs.xls"), None);
        assert_eq!(SpreadsheetFormat::from_filename("xlsx"), None);
    }

    #[test]
    fn test_quoted_comma_survives_write() {
        let mut table = Table::new(vec!["run_id".into(), "temp".into()]);
        table.rows.push(vec!["1".into(), "7,5".into()]);
        let bytes = table.to_csv().unwrap();
        assert_eq!(String::from_utf8(bytes.clone()).unwrap(), "run_id,temp\n1,\"7,5\"\n");
        assert_eq!(Table::from_csv(&bytes).unwrap(), table);
    }
}
