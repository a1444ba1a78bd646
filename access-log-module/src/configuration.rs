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

//! Structures handling command line options and YAML deserialization for the Access Log Module

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// Command line options of the access log module
#[derive(Debug, Default, Parser)]
pub struct AccessLogOpt {
    /// Access log file path
    ///
    /// Special values are an empty string (disable logging) and - (write to standard output).
    #[clap(long)]
    pub log_file: Option<PathBuf>,

    /// Access log format, either common or extended
    #[clap(long)]
    pub log_format: Option<LogFormat>,
}

/// Format of the access log lines
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Common Log Format, `common` in config file
    #[default]
    Common,
    /// W3C Extended Log File Format, `extended` in config file
    Extended,
}

/// Configuration settings of the access log module
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AccessLogConf {
    /// Access log file path
    ///
    /// If omitted, log lines go to the `access_log` target of the application’s logger. Special
    /// values are an empty string (disable logging) and - (write to standard output).
    pub log_file: Option<PathBuf>,

    /// Format of the log lines, `common` by default
    pub log_format: LogFormat,

    /// Site name logged in the extended format (`s-sitename` field)
    pub site_name: Option<String>,

    /// Server name logged in the extended format (`s-computername` field)
    ///
    /// If omitted, the `HOSTNAME` or `COMPUTERNAME` environment variable is used.
    pub server_name: Option<String>,

    /// Status code logged for requests where the handler failed before sending a response
    pub server_error_status: u16,
}

impl Default for AccessLogConf {
    fn default() -> Self {
        Self {
            log_file: None,
            log_format: LogFormat::default(),
            site_name: None,
            server_name: None,
            server_error_status: 500,
        }
    }
}

impl AccessLogConf {
    /// Merges the command line options into the current configuration. Any command line options
    /// present overwrite existing settings.
    pub fn merge_with_opt(&mut self, opt: AccessLogOpt) {
        if let Some(log_file) = opt.log_file {
            self.log_file = Some(log_file);
        }

        if let Some(log_format) = opt.log_format {
            self.log_format = log_format;
        }
    }
}
