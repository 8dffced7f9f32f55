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

use std::fs::{File, OpenOptions};
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Local;

use log::error;

/// Append-only log of what a run did, one `<timestamp>: <message>` per line.
/// It outlives the process output and is what to look at after a failed run.
pub struct Journal {
    file: Mutex<File>,
}

impl Journal {
    pub fn open(path: &Path) -> io::Result<Journal> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Journal {
            file: Mutex::new(file),
        })
    }

    /// Write failures go to the logger and are otherwise ignored.
    pub fn record(&self, msg: &str) {
        let line = format!("{}: {}\n", Local::now().format("%Y-%m-%d %H:%M:%S%.6f"), msg);
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = file.write_all(line.as_bytes()) {
            error!("Unable to write to the journal: {}. Lost: {}", err, msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_appends() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("upload_logs.dat");
        std::fs::write(&path, "2020-01-01 00:00:00.000000: previous run\n").unwrap();

        let journal = Journal::open(&path).unwrap();
        journal.record("Success: created a directory archive");
        journal.record("Found existing file: readme.txt");

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "2020-01-01 00:00:00.000000: previous run");
        assert!(lines[1].ends_with(": Success: created a directory archive"));
        assert!(lines[2].ends_with(": Found existing file: readme.txt"));

        // YYYY-MM-DD HH:MM:SS.ffffff
        let (stamp, _) = lines[1].split_once(": ").unwrap();
        assert_eq!(stamp.len(), 26);
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S%.6f").is_ok());
    }
}
