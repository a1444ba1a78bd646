// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Destinations for formatted log lines

use log::info;
use module_utils::error::{Error, ErrorType};
use std::fmt::Debug;
use std::path::{Path, PathBuf};

use crate::writer::{send, WriterMessage};

/// A destination for access log lines
///
/// Writing is best-effort: a sink must not fail or block the request, errors are reported
/// via the `log` crate instead.
pub trait LineSink: Debug + Send + Sync {
    /// Emits a single log line, without trailing newline.
    fn write_line(&self, line: &str);
}

/// Sink passing log lines to the application’s logger, `access_log` target at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggerSink;

impl LineSink for LoggerSink {
    fn write_line(&self, line: &str) {
        info!(target: "access_log", "{line}");
    }
}

/// Resolves the directory of a log file, so that different spellings of the same file end up
/// with the same writer.
fn normalize_path(path: PathBuf) -> Result<PathBuf, Box<Error>> {
    if path.as_os_str() == "-" {
        return Ok(path);
    }

    let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
        return Ok(path);
    };
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    let dir = dir.canonicalize().map_err(|err| {
        Error::because(
            ErrorType::FileOpenError,
            "failed resolving log file directory",
            err,
        )
    })?;
    Ok(dir.join(name))
}

/// Sink appending log lines to a file, `-` meaning standard output
///
/// Writing happens on a separate thread shared by all file sinks. On Unix-based systems, a
/// `HUP` or `USR1` signal makes that thread reopen all log files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSink {
    log_file: PathBuf,
    preamble: Option<&'static str>,
}

impl FileSink {
    /// Creates a sink for the given file. The preamble is written before the first line of a
    /// new or empty file.
    pub fn new(log_file: PathBuf, preamble: Option<&'static str>) -> Result<Self, Box<Error>> {
        // Normalize parent directory in case the same file is specified with different paths
        let log_file = normalize_path(log_file)?;
        Ok(Self { log_file, preamble })
    }

    /// Returns the normalized log file path.
    pub fn log_file(&self) -> &PathBuf {
        &self.log_file
    }
}

impl LineSink for FileSink {
    fn write_line(&self, line: &str) {
        send(WriterMessage::line(&self.log_file, self.preamble, line));
    }
}
