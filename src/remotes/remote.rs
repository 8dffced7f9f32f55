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

use async_trait::async_trait;

use std::fmt;
use std::path::Path;
use std::string::String;

use crate::remotes::drive::Error as DriveError;

use log::debug;

#[derive(Debug)]
pub enum Error {
    LocalError(std::io::Error),
    RemoteError(DriveError),
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::LocalError(error)
    }
}

impl From<DriveError> for Error {
    fn from(error: DriveError) -> Self {
        Error::RemoteError(error)
    }
}

impl std::error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LocalError(error) => write!(f, "Local (IO) error: {}", error),
            Error::RemoteError(error) => write!(f, "Remote error: {}", error),
        }
    }
}

/// Opaque identifier the store assigns to containers and objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> RemoteId {
        RemoteId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RemoteId {
    fn from(id: &str) -> Self {
        RemoteId::new(id)
    }
}

impl From<String> for RemoteId {
    fn from(id: String) -> Self {
        RemoteId(id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Child {
    pub id: RemoteId,
    pub name: String,
}

/// One page of a container listing. `next_page_token` is `None` on the last page.
#[derive(Debug, Default)]
pub struct Page {
    pub children: Vec<Child>,
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait Remote: Send + Sync {
    async fn list_page(
        &self,
        parent: &RemoteId,
        page_token: Option<&str>,
    ) -> Result<Page, Error>;
    async fn create_container(
        &self,
        name: &str,
        parent: Option<&RemoteId>,
    ) -> Result<RemoteId, Error>;
    async fn create_object(
        &self,
        path: &Path,
        name: &str,
        parent: Option<&RemoteId>,
        description: Option<&str>,
    ) -> Result<RemoteId, Error>;

    fn name(&self) -> String;

    /// Pages through every child of `parent` and returns the first one whose
    /// display name is exactly `name`.
    async fn find_child_by_name(
        &self,
        parent: &RemoteId,
        name: &str,
    ) -> Result<Option<RemoteId>, Error> {
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_page(parent, page_token.as_deref()).await?;
            if let Some(child) = page.children.into_iter().find(|c| c.name == name) {
                debug!("Found {} ({}) under {}", name, child.id, parent);
                return Ok(Some(child.id));
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(None),
            }
        }
    }
}
