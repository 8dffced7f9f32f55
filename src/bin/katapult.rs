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

use std::env;
use std::path::{Path, PathBuf};

use katapult::auth::{Authenticator, Flow};
use katapult::config::Config;
use katapult::run::Run;

use katapult::remotes::drive::Drive;
use katapult::remotes::localhost::Localhost;
use katapult::remotes::remote::Remote;

use log::*;
use structopt::StructOpt;

/// Upload files to a Google Drive archive.
#[derive(StructOpt, Debug)]
#[structopt()]
struct Opt {
    /// Root directory containing all files to be uploaded
    #[structopt(short = "r", long = "root-dir", parse(from_os_str))]
    root_dir: PathBuf,
    /// Comma-separated file of metadata to apply to uploaded files
    #[structopt(short = "m", long = "metadata")]
    metadata: Option<String>,
    /// Paste the authorization code instead of receiving it on a local web server
    #[structopt(long = "noauth-local-webserver")]
    noauth_local_webserver: bool,
    /// Port of the local web server receiving the authorization code
    #[structopt(long = "auth-host-port", default_value = "8080")]
    auth_host_port: u16,
    /// Silence all output
    #[structopt(short = "q", long = "quiet")]
    quiet: bool,
    /// Verbose mode (-v, -vv, -vvv, etc)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: usize,
}

#[tokio::main]
async fn main() -> Result<(), i32> {
    let opt = Opt::from_args();
    stderrlog::new()
        .module(module_path!())
        .quiet(opt.quiet)
        .verbosity(opt.verbose)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
        .unwrap();

    let path = match env::var("CONF_FILE") {
        Ok(x) => x,
        Err(_) => "katapult.toml".to_string(),
    };

    let path = Path::new(&path);

    let config = if path.exists() {
        match Config::new(path) {
            Ok(config) => config,
            Err(error) => {
                error!("Config error: {}", error);
                return Err(-1);
            }
        }
    } else {
        info!("No configuration file {:?}, using defaults.", path);
        Config::default()
    };

    // Local inputs are validated before talking to any remote.
    let run = match Run::prepare(&config.run, &opt.root_dir, opt.metadata.as_deref()) {
        Ok(run) => run,
        Err(error) => {
            error!("{}", error);
            return Err(-1);
        }
    };

    let remote: Box<dyn Remote> = match config.localhost {
        Some(localhost) => match Localhost::new(localhost, "localhost") {
            Ok(remote) => Box::new(remote),
            Err(error) => {
                error!("Localhost remote error: {}", error);
                return Err(-1);
            }
        },
        None => {
            let flow = if opt.noauth_local_webserver {
                Flow::Paste {
                    port: opt.auth_host_port,
                }
            } else {
                Flow::LocalWebserver {
                    port: opt.auth_host_port,
                }
            };
            let session = match Authenticator::new(&config.drive, flow) {
                Ok(authenticator) => authenticator.session().await,
                Err(error) => Err(error),
            };
            match session {
                Ok(session) => Box::new(Drive::new(&config.drive, session)),
                Err(error) => {
                    error!("Authorization error: {}", error);
                    return Err(-1);
                }
            }
        }
    };
    info!("Remote {} configured", remote.name());

    match run.execute(remote.as_ref()).await {
        Ok(summary) => {
            info!(
                "Done. {} directories created, {} files uploaded, {} files already present.",
                summary.containers_created, summary.files_uploaded, summary.files_skipped
            );
            Ok(())
        }
        Err(error) => {
            error!("Error: {}", error);
            Err(-1)
        }
    }
}
