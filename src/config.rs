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

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::string::String;
use url::Url;

use std::fmt;
use std::fs;

use toml;

fn default_credentials() -> String {
    String::from("~/.credentials/katapult.json")
}

fn default_api_url() -> Url {
    // Constant, always valid.
    Url::parse("https://www.googleapis.com/drive/v3/").unwrap()
}

fn default_upload_url() -> Url {
    Url::parse("https://www.googleapis.com/upload/drive/v3/").unwrap()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DriveConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    #[serde(default = "default_credentials")]
    pub credentials: String,
    #[serde(default = "default_api_url")]
    pub api_url: Url,
    #[serde(default = "default_upload_url")]
    pub upload_url: Url,
}

impl Default for DriveConfig {
    fn default() -> Self {
        DriveConfig {
            client_id: None,
            client_secret: None,
            credentials: default_credentials(),
            api_url: default_api_url(),
            upload_url: default_upload_url(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LocalhostConfig {
    pub path: String,
}

/// What to do when listing a container fails while checking whether a name
/// already exists.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ListingPolicy {
    /// Treat the name as absent and create it (may produce a duplicate).
    AssumeMissing,
    /// Stop the run.
    Abort,
}

impl Default for ListingPolicy {
    fn default() -> Self {
        ListingPolicy::AssumeMissing
    }
}

fn default_registry() -> PathBuf {
    PathBuf::from("dir_ids.csv")
}

fn default_journal() -> PathBuf {
    PathBuf::from("upload_logs.dat")
}

fn default_upload_workers() -> usize {
    1
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RunConfig {
    #[serde(default = "default_registry")]
    pub registry: PathBuf,
    #[serde(default = "default_journal")]
    pub journal: PathBuf,
    #[serde(default)]
    pub listing_failure: ListingPolicy,
    #[serde(default = "default_upload_workers")]
    pub upload_workers: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            registry: default_registry(),
            journal: default_journal(),
            listing_failure: ListingPolicy::default(),
            upload_workers: default_upload_workers(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    // remotes
    #[serde(default)]
    pub drive: DriveConfig,
    pub localhost: Option<LocalhostConfig>,
    // mirroring
    #[serde(default)]
    pub run: RunConfig,
}

#[derive(Debug)]
pub enum Error {
    Open(std::io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl std::error::Error for Error {}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Open(error) => write!(f, "Could not open/read config: {}", error),
            Error::Parse(error) => write!(f, "Failed to parse config: {}", error),
            Error::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Open(error)
    }
}

impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::Parse(error)
    }
}

impl Config {
    pub fn new(path: &Path) -> Result<Config, Error> {
        let txt = fs::read_to_string(path)?;
        Config::parse(&txt)
    }

    pub fn parse(txt: &str) -> Result<Config, Error> {
        let config: Config = toml::from_str(txt)?;
        if config.run.upload_workers == 0 {
            return Err(Error::Invalid(String::from(
                "run.upload_workers must be at least 1",
            )));
        }
        Ok(config)
    }
}
