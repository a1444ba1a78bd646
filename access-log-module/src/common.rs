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

//! Log record in the Common Log Format

use chrono::{DateTime, FixedOffset, Local};
use http::{Method, StatusCode};
use module_utils::session::{ResponseHeader, SessionWrapper};
use std::fmt::{Display, Formatter};
use std::net::IpAddr;

use crate::format::{OrDash, Quoted, Token};
use crate::record::{LogRecord, ServerIdentity};

/// Placeholder for the RFC 931 identity, no ident lookup is performed
const RFC931: &str = "Rfc931";

/// User name logged for requests without an authenticated user
const ANONYMOUS: &str = "Anonymous";

/// Log record producing lines like
/// `10.0.0.5 2024-05-29 GET Rfc931 Anonymous [29/May/2024:09:53:19 -0100] "GET / HTTP/1.1" 200 1337`
///
/// The fields are: client address, completion date, method, RFC 931 identity, authenticated
/// user, request start time, request line, status code and response body size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonLogRecord {
    remote_host: Option<IpAddr>,
    start: DateTime<FixedOffset>,
    method: Method,
    request_line: String,
    auth_user: Option<String>,
    status: Option<StatusCode>,
    bytes_sent: u64,
    completed: Option<DateTime<FixedOffset>>,
}

impl LogRecord for CommonLogRecord {
    fn dispatched(session: &impl SessionWrapper, _server: &ServerIdentity) -> Self {
        let req_header = session.req_header();

        Self {
            remote_host: session.client_addr().map(|addr| addr.ip()),
            start: Local::now().into(),
            method: req_header.method.clone(),
            request_line: format!(
                "{} {} {:?}",
                req_header.method, req_header.uri, req_header.version
            ),
            auth_user: None,
            status: None,
            bytes_sent: 0,
            completed: None,
        }
    }

    fn headers_committed(&mut self, header: &ResponseHeader, remote_user: Option<&str>) {
        self.status = Some(header.status);
        self.auth_user = remote_user.map(ToOwned::to_owned);
    }

    fn headers_missing(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    fn completed(&mut self, bytes_sent: u64) {
        self.bytes_sent = bytes_sent;
        self.completed = Some(Local::now().into());
    }
}

impl Display for CommonLogRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let auth_user = self
            .auth_user
            .as_deref()
            .filter(|user| !user.is_empty())
            .unwrap_or(ANONYMOUS);
        write!(
            f,
            "{} {} {} {RFC931} {} [{}] {} {} {}",
            OrDash(self.remote_host),
            OrDash(self.completed.map(|time| time.format("%Y-%m-%d"))),
            self.method,
            Token(Some(auth_user.as_bytes())),
            self.start.format("%d/%b/%Y:%H:%M:%S %z"),
            Quoted(self.request_line.as_bytes()),
            OrDash(self.status.map(|status| status.as_u16())),
            self.bytes_sent,
        )
    }
}
