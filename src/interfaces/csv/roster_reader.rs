use crate::application::import::RosterRow;
use crate::domain::event::RowRejection;
use crate::error::{Result, StationError};
use std::io::Read;

/// Reads roster rows from a CSV source.
///
/// Headers are matched case-insensitively and cells are trimmed. Rows may be shorter
/// than the header; missing cells are simply absent from the row.
pub struct RosterReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> RosterReader<R> {
    /// Creates a new `RosterReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads rows, keeping the source line of each.
    pub fn rows(mut self) -> Result<impl Iterator<Item = Result<RosterRow>>> {
        let headers = self.reader.headers()?.clone();
        if headers.is_empty() {
            return Err(StationError::Validation("roster file has no header".to_string()));
        }
        Ok(self.reader.into_records().map(move |record| {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            Ok(RosterRow::new(
                line,
                headers
                    .iter()
                    .zip(record.iter())
                    .filter(|(header, _)| !header.is_empty()),
            ))
        }))
    }

    /// Reads every row. Records the CSV layer cannot decode become rejections, so the
    /// import report accounts for them; I/O failures still abort.
    pub fn read_all(self) -> Result<(Vec<RosterRow>, Vec<RowRejection>)> {
        let mut rows = Vec::new();
        let mut unreadable = Vec::new();
        for row in self.rows()? {
            match row {
                Ok(row) => rows.push(row),
                Err(StationError::Csv(err)) if !err.is_io_error() => {
                    let line = err.position().map_or(0, |p| p.line());
                    tracing::warn!(line, error = %err, "Unreadable roster record");
                    unreadable.push(RowRejection {
                        line,
                        student_id: None,
                        reason: format!("unreadable record: {err}"),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        Ok((rows, unreadable))
    }
}
