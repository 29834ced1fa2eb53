use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::parser::listing::ListingRecord;

pub const HEADER: [&str; 6] = ["Price", "Land Size", "Building Size", "Year Built", "Rooms", "County"];

/// Collects records for one run, in the order they arrive, and writes them
/// out once at the end.
#[derive(Default)]
pub struct AggregationSink {
    records: Mutex<Vec<ListingRecord>>,
}

impl AggregationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: ListingRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn into_records(self) -> Vec<ListingRecord> {
        self.records.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    /// Overwrite `path` with every collected record. Returns the row count.
    pub fn flush(self, path: &Path) -> Result<usize> {
        let records = self.into_records();
        let file = File::create(path)
            .with_context(|| format!("Failed to create output file {}", path.display()))?;
        write_csv(file, &records)
            .with_context(|| format!("Failed to write dataset to {}", path.display()))?;
        Ok(records.len())
    }
}

/// Header row first, even when there are no records; absent fields are
/// empty cells.
pub fn write_csv<W: Write>(out: W, records: &[ListingRecord]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record(HEADER)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Data rows in an existing dataset file.
pub fn count_rows(path: &Path) -> Result<usize> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open dataset {}", path.display()))?;
    let mut rows = 0;
    for record in reader.records() {
        record?;
        rows += 1;
    }
    Ok(rows)
}
