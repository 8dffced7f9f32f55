// Copyright 2022 Paolo Galeone <nessuno@nerdz.eu>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use log::info;

/// date, title, description
const FIELDS: usize = 3;

#[derive(Debug)]
pub enum Error {
    NotInWorkingDirectory(String),
    NotCsv(String),
    Csv(csv::Error),
    MissingFields(u64),
}

impl From<csv::Error> for Error {
    fn from(error: csv::Error) -> Self {
        Error::Csv(error)
    }
}

impl std::error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotInWorkingDirectory(file) => write!(
                f,
                "Input file must be in same directory as the program: {}",
                file
            ),
            Error::NotCsv(file) => write!(f, "Input file must be in .csv format: {}", file),
            Error::Csv(error) => write!(f, "Unable to read metadata: {}", error),
            Error::MissingFields(line) => write!(
                f,
                "Metadata line {} needs a key followed by date, title and description",
                line
            ),
        }
    }
}

/// Keys can't contain dots: a dot in the stem would be confused with the
/// extension separator when looking files up.
pub fn normalize(key: &str) -> String {
    key.replace('.', "_")
}

/// Descriptive fields of the uploaded files, keyed by file stem.
#[derive(Debug, Default, Clone)]
pub struct Metadata {
    entries: HashMap<String, Vec<String>>,
}

impl Metadata {
    pub fn new() -> Metadata {
        Metadata::default()
    }

    /// `rows[i][0]` is the key, the rest its values. Later rows overwrite
    /// earlier ones.
    pub fn load<I, R>(&mut self, rows: I)
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = String>,
    {
        for row in rows {
            let mut row = row.into_iter();
            if let Some(key) = row.next() {
                self.entries.insert(normalize(&key), row.collect());
            }
        }
    }

    /// Reads the metadata spreadsheet. The file must sit in the working
    /// directory and carry the `.csv` extension.
    pub fn from_csv(file: &str) -> Result<Metadata, Error> {
        if file.contains('/') || file.contains(std::path::MAIN_SEPARATOR) {
            return Err(Error::NotInWorkingDirectory(String::from(file)));
        }
        if !file.ends_with(".csv") {
            return Err(Error::NotCsv(String::from(file)));
        }

        let metadata = Metadata::read(File::open(file).map_err(csv::Error::from)?)?;
        info!("Loaded metadata for {} files from {}", metadata.len(), file);
        Ok(metadata)
    }

    pub fn read<R: io::Read>(source: R) -> Result<Metadata, Error> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(source);
        let mut rows = vec![];
        for record in reader.records() {
            let record = record?;
            if record.len() < FIELDS + 1 {
                let line = record.position().map(|p| p.line()).unwrap_or_default();
                return Err(Error::MissingFields(line));
            }
            rows.push(record.iter().map(String::from).collect::<Vec<String>>());
        }

        let mut metadata = Metadata::new();
        metadata.load(rows);
        Ok(metadata)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lookup by normalized key.
    pub fn lookup(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Lookup by file name: the extension is stripped and the stem
    /// normalized like the keys were.
    pub fn lookup_file(&self, file_name: &str) -> Option<&[String]> {
        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(file_name);
        self.lookup(&normalize(stem))
    }

    /// Text attached to the remote object built from the first three values.
    /// `None` when the file has no metadata.
    pub fn description(&self, file_name: &str) -> Option<String> {
        let values = self.lookup_file(file_name)?;
        if values.len() < FIELDS {
            return None;
        }
        Some(format!(
            "Date: {}\n\nTitle: {}\n\nDescription: {}",
            values[0], values[1], values[2]
        ))
    }
}
