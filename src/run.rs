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

use crate::config::RunConfig;
use crate::journal::Journal;
use crate::metadata;
use crate::metadata::Metadata;
use crate::mirror;
use crate::mirror::{Mirror, Summary};
use crate::registry;
use crate::registry::Registry;
use crate::remotes::remote::Remote;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use log::{error, info};

#[derive(Debug)]
pub enum Error {
    InvalidRoot(PathBuf),
    Metadata(metadata::Error),
    Registry(registry::Error),
    Journal(io::Error),
    Mirror(mirror::Error),
}

impl From<metadata::Error> for Error {
    fn from(error: metadata::Error) -> Self {
        Error::Metadata(error)
    }
}

impl From<registry::Error> for Error {
    fn from(error: registry::Error) -> Self {
        Error::Registry(error)
    }
}

impl From<mirror::Error> for Error {
    fn from(error: mirror::Error) -> Self {
        Error::Mirror(error)
    }
}

impl std::error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidRoot(path) => write!(
                f,
                "Root directory {} does not exist or has no name",
                path.display()
            ),
            Error::Metadata(error) => write!(f, "{}", error),
            Error::Registry(error) => write!(f, "{}", error),
            Error::Journal(error) => write!(f, "Unable to open the journal: {}", error),
            Error::Mirror(error) => write!(f, "{}", error),
        }
    }
}

/// A single mirroring run: local state is loaded by `prepare`, the remote is
/// only touched by `execute`.
pub struct Run {
    config: RunConfig,
    root: PathBuf,
    journal: Journal,
    registry: Registry,
    metadata: Metadata,
}

impl Run {
    /// Validates the inputs and loads the journal, the directory registry and
    /// the optional metadata spreadsheet. Nothing here talks to the remote.
    pub fn prepare(config: &RunConfig, root: &Path, metadata: Option<&str>) -> Result<Run, Error> {
        let has_name = root.to_str().and_then(mirror::root_name).is_some();
        if !has_name || !root.is_dir() {
            return Err(Error::InvalidRoot(root.to_path_buf()));
        }

        let metadata = match metadata {
            Some(file) => Metadata::from_csv(file)?,
            None => Metadata::new(),
        };
        let registry = Registry::load(&config.registry)?;
        info!(
            "Loaded {} directories from {}",
            registry.len(),
            config.registry.display()
        );
        let journal = Journal::open(&config.journal).map_err(Error::Journal)?;

        Ok(Run {
            config: config.clone(),
            root: root.to_path_buf(),
            journal,
            registry,
            metadata,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Mirrors the tree, then writes the registry back whatever the outcome,
    /// so that a rerun reuses every container created so far.
    pub async fn execute(mut self, remote: &dyn Remote) -> Result<Summary, Error> {
        let result = Mirror::new(remote, &self.metadata, &self.journal)
            .listing_policy(self.config.listing_failure)
            .upload_workers(self.config.upload_workers)
            .run(&self.root, &mut self.registry)
            .await;

        let saved = self.registry.save(&self.config.registry);
        if let Err(error) = &saved {
            error!("Unable to save the directory registry: {}", error);
            self.journal
                .record(&format!("Unable to save the directory registry: {}", error));
        }
        match (result, saved) {
            (Ok(summary), Ok(())) => {
                info!(
                    "Saved {} directories to {}",
                    self.registry.len(),
                    self.config.registry.display()
                );
                Ok(summary)
            }
            (Ok(_), Err(error)) => Err(error.into()),
            (Err(error), _) => {
                self.journal.record(&format!("Run aborted: {}", error));
                Err(error.into())
            }
        }
    }
}
