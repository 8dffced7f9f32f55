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

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use log::debug;

use crate::remotes::remote::RemoteId;

#[derive(Debug)]
pub enum Error {
    Csv(csv::Error),
    MalformedLine(u64),
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
            Error::Csv(error) => write!(f, "Directory registry error: {}", error),
            Error::MalformedLine(line) => write!(
                f,
                "Directory registry line {} is not a path,id pair",
                line
            ),
        }
    }
}

/// Local directory path (relative, `/`-separated, rooted at the mirrored
/// directory's name) to the id of the remote container mirroring it.
///
/// Entries are kept sorted by path, so a saved registry lists every parent
/// before its children.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Registry {
    entries: BTreeMap<String, RemoteId>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn resolve(&self, path: &str) -> Option<&RemoteId> {
        self.entries.get(path)
    }

    /// Last write wins.
    pub fn register(&mut self, path: &str, id: RemoteId) {
        debug!("Registering {} -> {}", path, id);
        self.entries.insert(String::from(path), id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RemoteId)> {
        self.entries.iter().map(|(path, id)| (path.as_str(), id))
    }

    /// Loads a previously saved registry. A missing file is a first run.
    pub fn load(path: &Path) -> Result<Registry, Error> {
        let mut registry = Registry::new();
        if !path.exists() {
            return Ok(registry);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;
        for record in reader.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or_default();
            match (record.get(0), record.get(1), record.len()) {
                (Some(dir), Some(id), 2) => registry.register(dir, RemoteId::new(id)),
                _ => return Err(Error::MalformedLine(line)),
            }
        }
        Ok(registry)
    }

    /// Overwrites `path` with the current content, one `path,id` per line.
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        for (dir, id) in self.iter() {
            writer.write_record(&[dir, id.as_str()])?;
        }
        writer.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}
