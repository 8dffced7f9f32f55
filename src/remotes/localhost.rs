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

use crate::config::LocalhostConfig;
use crate::remotes::remote;
use crate::remotes::remote::{Child, Page, RemoteId};

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use tokio::fs;

use std::fmt;

const DESCRIPTION_SUFFIX: &str = ".description";

#[derive(Debug, PartialEq)]
pub enum Error {
    IsNotAbsolute(PathBuf),
    DoesNotExist(PathBuf),
    IsNotAFolder(PathBuf),
}

impl std::error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IsNotAbsolute(path) => write!(f, "Path {} is not absolute", path.display()),
            Error::DoesNotExist(path) => write!(f, "Path {} does not exist", path.display()),
            Error::IsNotAFolder(path) => write!(f, "Path {} is not a folder", path.display()),
        }
    }
}

/// A local folder used as the remote store. Containers are directories and
/// identifiers are paths relative to the store root.
#[derive(Clone)]
pub struct Localhost {
    name: String,
    path: PathBuf,
}

impl Localhost {
    pub fn new(config: LocalhostConfig, name: &str) -> Result<Localhost, Error> {
        let path = PathBuf::from(config.path);

        if path.is_relative() {
            return Err(Error::IsNotAbsolute(path));
        }
        if !path.exists() {
            return Err(Error::DoesNotExist(path));
        }
        if !path.is_dir() {
            return Err(Error::IsNotAFolder(path));
        }

        Ok(Localhost {
            name: String::from(name),
            path,
        })
    }

    fn resolve(&self, id: Option<&RemoteId>) -> PathBuf {
        match id {
            Some(id) if !id.as_str().is_empty() => self.path.join(id.as_str()),
            _ => self.path.clone(),
        }
    }

    fn child_id(parent: Option<&RemoteId>, name: &str) -> RemoteId {
        match parent {
            Some(parent) if !parent.as_str().is_empty() => {
                RemoteId::new(format!("{}/{}", parent, name))
            }
            _ => RemoteId::new(name),
        }
    }

    fn description_path(dest: &Path, name: &str) -> PathBuf {
        dest.join(format!(".{}{}", name, DESCRIPTION_SUFFIX))
    }

    fn is_description(name: &str) -> bool {
        name.starts_with('.') && name.ends_with(DESCRIPTION_SUFFIX)
    }
}

#[async_trait]
impl remote::Remote for Localhost {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn list_page(
        &self,
        parent: &RemoteId,
        _page_token: Option<&str>,
    ) -> Result<Page, remote::Error> {
        let mut entries = fs::read_dir(self.resolve(Some(parent))).await?;
        let mut children = vec![];
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if Localhost::is_description(&name) && entry.file_type().await?.is_file() {
                continue;
            }
            children.push(Child {
                id: Localhost::child_id(Some(parent), &name),
                name,
            });
        }
        Ok(Page {
            children,
            next_page_token: None,
        })
    }

    async fn create_container(
        &self,
        name: &str,
        parent: Option<&RemoteId>,
    ) -> Result<RemoteId, remote::Error> {
        fs::create_dir(self.resolve(parent).join(name)).await?;
        Ok(Localhost::child_id(parent, name))
    }

    async fn create_object(
        &self,
        path: &Path,
        name: &str,
        parent: Option<&RemoteId>,
        description: Option<&str>,
    ) -> Result<RemoteId, remote::Error> {
        let dest = self.resolve(parent);
        fs::copy(path, dest.join(name)).await?;
        if let Some(description) = description {
            fs::write(Localhost::description_path(&dest, name), description).await?;
        }
        Ok(Localhost::child_id(parent, name))
    }
}
