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

use crate::config::ListingPolicy;
use crate::journal::Journal;
use crate::metadata::Metadata;
use crate::registry::Registry;
use crate::remotes::remote;
use crate::remotes::remote::{Remote, RemoteId};

use std::fmt;
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt, TryStreamExt};
use walkdir::WalkDir;

use log::{debug, error, info, warn};

#[derive(Debug)]
pub enum Error {
    InvalidRoot(PathBuf),
    Walk(walkdir::Error),
    UnregisteredParent(String),
    Listing { name: String, error: remote::Error },
    Container { path: String, error: remote::Error },
    Upload { path: PathBuf, error: remote::Error },
}

impl From<walkdir::Error> for Error {
    fn from(error: walkdir::Error) -> Self {
        Error::Walk(error)
    }
}

impl std::error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidRoot(path) => write!(
                f,
                "Root {} must be an existing directory with a name",
                path.display()
            ),
            Error::Walk(error) => write!(f, "Unable to walk the local tree: {}", error),
            Error::UnregisteredParent(path) => write!(
                f,
                "The parent of {} has no remote container. Parents must be mirrored first",
                path
            ),
            Error::Listing { name, error } => {
                write!(f, "Unable to check whether {} exists: {}", name, error)
            }
            Error::Container { path, error } => {
                write!(f, "Unable to create the directory {}: {}", path, error)
            }
            Error::Upload { path, error } => {
                write!(f, "Unable to upload {}: {}", path.display(), error)
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Summary {
    pub containers_created: usize,
    pub containers_reused: usize,
    pub files_uploaded: usize,
    pub files_skipped: usize,
}

enum Outcome {
    Uploaded,
    Skipped,
}

/// Name of the top level remote container: the last segment of the root path
/// once a single trailing separator is removed.
pub fn root_name(root: &str) -> Option<String> {
    let trimmed = root.strip_suffix('/').unwrap_or(root);
    Path::new(trimmed)
        .file_name()
        .and_then(|name| name.to_str())
        .map(String::from)
}

/// Registry key of `dir`: the root name followed by the `/`-joined components
/// of `dir` relative to `root`.
fn registry_key(root_name: &str, root: &Path, dir: &Path) -> String {
    let mut key = String::from(root_name);
    if let Ok(relative) = dir.strip_prefix(root) {
        for component in relative.components() {
            key.push('/');
            key.push_str(&component.as_os_str().to_string_lossy());
        }
    }
    key
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Mirrors a local tree on a remote.
///
/// Directories are visited top-down, so every container is created and
/// registered before anything inside it is looked at. Files of a single
/// directory may be uploaded concurrently (`upload_workers`); directories never
/// are.
pub struct Mirror<'a> {
    remote: &'a dyn Remote,
    metadata: &'a Metadata,
    journal: &'a Journal,
    policy: ListingPolicy,
    workers: usize,
}

impl<'a> Mirror<'a> {
    pub fn new(remote: &'a dyn Remote, metadata: &'a Metadata, journal: &'a Journal) -> Mirror<'a> {
        Mirror {
            remote,
            metadata,
            journal,
            policy: ListingPolicy::default(),
            workers: 1,
        }
    }

    pub fn listing_policy(mut self, policy: ListingPolicy) -> Mirror<'a> {
        self.policy = policy;
        self
    }

    pub fn upload_workers(mut self, workers: usize) -> Mirror<'a> {
        self.workers = workers.max(1);
        self
    }

    pub async fn run(&self, root: &Path, registry: &mut Registry) -> Result<Summary, Error> {
        let name = match root.to_str().and_then(root_name) {
            Some(name) if root.is_dir() => name,
            _ => return Err(Error::InvalidRoot(root.to_path_buf())),
        };
        info!(
            "Mirroring {} on [{}] as {}",
            root.display(),
            self.remote.name(),
            name
        );

        let mut summary = Summary::default();
        // Files sort before subdirectories, so the entries following a
        // directory up to the next directory are exactly its files.
        let walker = WalkDir::new(root).sort_by(|a, b| {
            a.file_type()
                .is_dir()
                .cmp(&b.file_type().is_dir())
                .then_with(|| a.file_name().cmp(b.file_name()))
        });
        let mut current: Option<RemoteId> = None;
        let mut files: Vec<PathBuf> = vec![];
        for entry in walker {
            let entry = entry?;
            if entry.file_type().is_dir() {
                if let Some(id) = current.take() {
                    self.files(&files, &id, &mut summary).await?;
                    files.clear();
                }
                let key = registry_key(&name, root, entry.path());
                current = Some(self.container(&key, registry, &mut summary).await?);
            } else if !is_hidden(entry.file_name()) && entry.path().is_file() {
                files.push(entry.into_path());
            }
        }
        if let Some(id) = current {
            self.files(&files, &id, &mut summary).await?;
        }

        info!(
            "[{}] {} directories created, {} reused. {} files uploaded, {} already present",
            name,
            summary.containers_created,
            summary.containers_reused,
            summary.files_uploaded,
            summary.files_skipped
        );
        Ok(summary)
    }

    /// Uploads the files of one directory, at most `workers` at a time.
    async fn files(
        &self,
        files: &[PathBuf],
        parent: &RemoteId,
        summary: &mut Summary,
    ) -> Result<(), Error> {
        let outcomes: Vec<Outcome> = stream::iter(files.iter().map(|file| self.file(file, parent)))
            .buffer_unordered(self.workers)
            .try_collect()
            .await?;
        for outcome in outcomes {
            match outcome {
                Outcome::Uploaded => summary.files_uploaded += 1,
                Outcome::Skipped => summary.files_skipped += 1,
            }
        }
        Ok(())
    }

    /// Remote container of the directory `key`, from the registry, found under
    /// the parent container or freshly created. Newly known containers are
    /// registered right away.
    async fn container(
        &self,
        key: &str,
        registry: &mut Registry,
        summary: &mut Summary,
    ) -> Result<RemoteId, Error> {
        if let Some(id) = registry.resolve(key) {
            debug!("Directory {} already mirrored as {}", key, id);
            summary.containers_reused += 1;
            return Ok(id.clone());
        }

        let (parent, leaf) = match key.rsplit_once('/') {
            Some((parent, leaf)) => (Some(parent), leaf),
            None => (None, key),
        };
        let parent = match parent {
            Some(parent) => match registry.resolve(parent) {
                Some(id) => Some(id.clone()),
                None => return Err(Error::UnregisteredParent(String::from(key))),
            },
            None => None,
        };

        // The store root can't be listed: only nested containers can be
        // found remotely.
        if let Some(parent) = &parent {
            if let Some(id) = self.exists(parent, leaf).await? {
                self.journal
                    .record(&format!("Found existing directory: {}", leaf));
                registry.register(key, id.clone());
                summary.containers_reused += 1;
                return Ok(id);
            }
        }

        match self.remote.create_container(leaf, parent.as_ref()).await {
            Ok(id) => {
                self.journal
                    .record(&format!("Success: created a directory {}", leaf));
                info!("Created directory {} ({})", key, id);
                registry.register(key, id.clone());
                summary.containers_created += 1;
                Ok(id)
            }
            Err(error) => {
                self.journal
                    .record(&format!("Directory Creation failed: {}", error));
                error!("Directory creation of {} failed: {}", key, error);
                Err(Error::Container {
                    path: String::from(key),
                    error,
                })
            }
        }
    }

    async fn file(&self, path: &Path, parent: &RemoteId) -> Result<Outcome, Error> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if self.exists(parent, &name).await?.is_some() {
            self.journal
                .record(&format!("Found existing file: {}", name));
            debug!("Skipping {}: already uploaded", path.display());
            return Ok(Outcome::Skipped);
        }

        let description = self.metadata.description(&name);
        match self
            .remote
            .create_object(path, &name, Some(parent), description.as_deref())
            .await
        {
            Ok(id) => {
                self.journal
                    .record(&format!("Success: uploaded file {}", name));
                info!("Uploaded file {} ({})", path.display(), id);
                Ok(Outcome::Uploaded)
            }
            Err(error) => {
                self.journal.record(&format!("Upload failed: {}", error));
                error!("Upload of {} failed: {}", path.display(), error);
                Err(Error::Upload {
                    path: path.to_path_buf(),
                    error,
                })
            }
        }
    }

    /// Existence check honouring the listing policy.
    async fn exists(&self, parent: &RemoteId, name: &str) -> Result<Option<RemoteId>, Error> {
        match self.remote.find_child_by_name(parent, name).await {
            Ok(found) => Ok(found),
            Err(error) => {
                self.journal
                    .record(&format!("An error occurred: {}", error));
                match self.policy {
                    ListingPolicy::AssumeMissing => {
                        warn!("Listing of {} failed, assuming {} is missing: {}", parent, name, error);
                        Ok(None)
                    }
                    ListingPolicy::Abort => Err(Error::Listing {
                        name: String::from(name),
                        error,
                    }),
                }
            }
        }
    }
}
