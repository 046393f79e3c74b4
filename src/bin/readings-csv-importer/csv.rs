use std::{fs::File, io::Read};

use anyhow::{Context as _, Result};
use csv::{Reader, StringRecord};
use maison_energie::telemetry::Field;
use serde_json::{Map, Number, Value};

/// Rows of a reading export as untyped payloads keyed by the CSV header.
///
/// Columns that are not reading fields are skipped. Empty cells are absent.
#[derive(Debug)]
pub struct CsvPayloadIter<R> {
    reader: Reader<R>,
    headers: Vec<Option<String>>,
}

impl CsvPayloadIter<File> {
    pub fn new(file: File) -> Result<Self> {
        Self::from_reader(file)
    }
}

impl<R: Read> CsvPayloadIter<R> {
    pub fn from_reader(rdr: R) -> Result<Self> {
        let mut reader = Reader::from_reader(rdr);
        let headers = reader
            .headers()
            .context("failed to read CSV header")?
            .iter()
            .map(|h| {
                let h = h.trim();
                h.parse::<Field>().is_ok().then(|| h.to_owned())
            })
            .collect();

        Ok(Self { reader, headers })
    }

    /// 1-based line of the next record, header included.
    pub fn line(&self) -> u64 {
        self.reader.position().line()
    }
}

impl<R: Read> Iterator for CsvPayloadIter<R> {
    type Item = Result<Map<String, Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.reader.records().next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(e.into())),
        };

        Some(Ok(to_payload(&self.headers, &row)))
    }
}

fn to_payload(headers: &[Option<String>], row: &StringRecord) -> Map<String, Value> {
    headers
        .iter()
        .zip(row.iter())
        .filter_map(|(header, cell)| {
            let header = header.as_ref()?;
            let cell = cell.trim();
            if cell.is_empty() {
                return None;
            }
            Some((header.clone(), cell_value(cell)))
        })
        .collect()
}

fn cell_value(cell: &str) -> Value {
    if let Ok(n) = cell.parse::<Number>() {
        return Value::Number(n);
    }

    match cell {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(cell.to_owned()),
    }
}
