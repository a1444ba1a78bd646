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

//! Handles writing logs on a separate thread

use log::error;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fs::File;
use std::io::{stdout, Write};
use std::path::{Path, PathBuf};
use std::thread;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug)]
pub(crate) struct LogLine {
    log_file: PathBuf,
    preamble: Option<&'static str>,
    line: String,
}

#[derive(Debug)]
pub(crate) enum WriterMessage {
    Reopen,
    Line(LogLine),
}

impl WriterMessage {
    pub(crate) fn line(log_file: &Path, preamble: Option<&'static str>, line: &str) -> Self {
        Self::Line(LogLine {
            log_file: log_file.to_owned(),
            preamble,
            line: line.to_owned(),
        })
    }
}

fn open_file(path: &PathBuf, preamble: Option<&str>) -> Box<dyn Write + Send> {
    if path.as_os_str() != "-" {
        match File::options().append(true).create(true).open(path) {
            Ok(mut file) => {
                if let Some(preamble) = preamble {
                    let is_empty = file.metadata().map(|meta| meta.len() == 0).unwrap_or(false);
                    if is_empty {
                        if let Err(err) = writeln!(file, "{preamble}") {
                            error!(
                                "Failed writing directives to log file {}: {err}",
                                path.as_os_str().to_string_lossy()
                            );
                        }
                    }
                }
                return Box::new(file);
            }
            Err(err) => {
                error!(
                    "Failed opening log file {} (cause: {err}), falling back to stdout",
                    path.as_os_str().to_string_lossy()
                );
            }
        }
    }
    Box::new(stdout())
}

pub(crate) fn log_writer(mut receiver: UnboundedReceiver<WriterMessage>) {
    let mut files = HashMap::new();

    let mut buf = String::with_capacity(4096);

    while let Some(data) = receiver.blocking_recv() {
        match data {
            WriterMessage::Reopen => {
                files = HashMap::new();
            }
            WriterMessage::Line(data) => {
                buf.truncate(0);
                buf.push_str(&data.line);
                buf.push('\n');

                let preamble = data.preamble;
                let writer = files
                    .entry(data.log_file)
                    .or_insert_with_key(|path| open_file(path, preamble));
                if let Err(err) = writer.write_all(buf.as_bytes()) {
                    error!("Failed writing access log: {err}");
                }
            }
        }
    }
}

fn spawn_writer() -> Option<UnboundedSender<WriterMessage>> {
    let (sender, receiver) = unbounded_channel();

    if let Err(err) = thread::Builder::new()
        .name("access-log-writer".to_owned())
        .spawn(move || log_writer(receiver))
    {
        error!("Failed starting log writer thread: {err}");
        return None;
    }

    #[cfg(unix)]
    crate::signal::listen(&sender);

    Some(sender)
}

static LOG_SENDER: Lazy<Option<UnboundedSender<WriterMessage>>> = Lazy::new(spawn_writer);

/// Passes a message to the writer thread, starting it if necessary.
pub(crate) fn send(message: WriterMessage) {
    if let Some(sender) = &*LOG_SENDER {
        if let Err(err) = sender.send(message) {
            error!("Failed logging request, thread crashed? {err}");
        }
    }
}
