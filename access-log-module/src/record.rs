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

//! Per-request log records and the lifecycle transitions populating them

use http::StatusCode;
use module_utils::session::{ResponseHeader, SessionWrapper};
use std::fmt::Display;

use crate::configuration::AccessLogConf;

/// Server identity shared by all requests, resolved once when the handler is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    /// Name of the site (`s-sitename`)
    pub site_name: String,
    /// Name of the machine (`s-computername`)
    pub computer_name: String,
}

impl ServerIdentity {
    /// Determines the server identity from configuration, falling back to the environment for
    /// the machine name.
    pub fn from_conf(conf: &AccessLogConf) -> Self {
        let computer_name = conf
            .server_name
            .clone()
            .or_else(|| {
                ["HOSTNAME", "COMPUTERNAME"]
                    .into_iter()
                    .filter_map(|name| std::env::var(name).ok())
                    .find(|value| !value.is_empty())
            })
            .unwrap_or_else(|| "-".to_owned());

        Self {
            site_name: conf.site_name.clone().unwrap_or_else(|| "-".to_owned()),
            computer_name,
        }
    }
}

/// A log record, created when a request is dispatched and filled in as the response progresses
///
/// Each transition is called at most once per record, in the order the methods are listed.
/// Either `headers_committed` or `headers_missing` is called before `completed`. Formatting
/// the record via [`Display`] produces the log line.
pub trait LogRecord: Display + Send {
    /// `#`-directives to be written at the top of new log files
    const PREAMBLE: Option<&'static str> = None;

    /// Captures the data available before the request is passed on.
    fn dispatched(session: &impl SessionWrapper, server: &ServerIdentity) -> Self
    where
        Self: Sized;

    /// Captures the response status and authenticated user once the response header is
    /// committed.
    fn headers_committed(&mut self, header: &ResponseHeader, remote_user: Option<&str>);

    /// Records the given server error status if the response header was never committed.
    fn headers_missing(&mut self, status: StatusCode);

    /// Stamps completion time and the number of body bytes sent.
    fn completed(&mut self, bytes_sent: u64);
}
