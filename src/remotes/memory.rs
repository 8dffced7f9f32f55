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

//! Recording in-memory store used by the engine and coordinator tests.

use crate::remotes::remote;
use crate::remotes::remote::{Child, Page, RemoteId};

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateContainer {
        name: String,
        parent: Option<RemoteId>,
    },
    CreateObject {
        name: String,
        parent: Option<RemoteId>,
        description: Option<String>,
    },
}

#[derive(Default)]
struct State {
    next_id: usize,
    children: HashMap<Option<RemoteId>, Vec<Child>>,
    calls: Vec<(Call, RemoteId)>,
}

#[derive(Default)]
pub struct Memory {
    state: Mutex<State>,
    page_size: usize,
    pub fail_listing: bool,
    pub fail_object: Option<String>,
}

impl Memory {
    pub fn new() -> Memory {
        Memory {
            page_size: 2,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.history().into_iter().map(|(call, _)| call).collect()
    }

    /// Calls in order, each with the id the store returned.
    pub fn history(&self) -> Vec<(Call, RemoteId)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn creations(&self) -> usize {
        self.calls().len()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn children_of(&self, parent: Option<&RemoteId>) -> Vec<Child> {
        self.state
            .lock()
            .unwrap()
            .children
            .get(&parent.cloned())
            .cloned()
            .unwrap_or_default()
    }

    fn insert(&self, name: &str, parent: Option<&RemoteId>, call: Call) -> RemoteId {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = RemoteId::new(format!("id{}", state.next_id));
        state
            .children
            .entry(parent.cloned())
            .or_default()
            .push(Child {
                id: id.clone(),
                name: String::from(name),
            });
        state.calls.push((call, id.clone()));
        id
    }
}

#[async_trait]
impl remote::Remote for Memory {
    fn name(&self) -> String {
        String::from("memory")
    }

    async fn list_page(
        &self,
        parent: &RemoteId,
        page_token: Option<&str>,
    ) -> Result<Page, remote::Error> {
        if self.fail_listing {
            return Err(io::Error::new(io::ErrorKind::Other, "listing unavailable").into());
        }
        let children = self.children_of(Some(parent));
        let start: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = usize::min(start + self.page_size, children.len());
        Ok(Page {
            children: children[start..end].to_vec(),
            next_page_token: if end < children.len() {
                Some(end.to_string())
            } else {
                None
            },
        })
    }

    async fn create_container(
        &self,
        name: &str,
        parent: Option<&RemoteId>,
    ) -> Result<RemoteId, remote::Error> {
        let call = Call::CreateContainer {
            name: String::from(name),
            parent: parent.cloned(),
        };
        Ok(self.insert(name, parent, call))
    }

    async fn create_object(
        &self,
        path: &Path,
        name: &str,
        parent: Option<&RemoteId>,
        description: Option<&str>,
    ) -> Result<RemoteId, remote::Error> {
        if self.fail_object.as_deref() == Some(name) {
            return Err(io::Error::new(io::ErrorKind::Other, "upload rejected").into());
        }
        // Unreadable local files fail like a real upload would.
        tokio::fs::metadata(path).await?;
        let call = Call::CreateObject {
            name: String::from(name),
            parent: parent.cloned(),
            description: description.map(String::from),
        };
        Ok(self.insert(name, parent, call))
    }
}
