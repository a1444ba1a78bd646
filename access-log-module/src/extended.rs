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

//! Log record in the W3C Extended Log File Format

use chrono::{DateTime, Utc};
use http::header::{self, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use module_utils::session::{ResponseHeader, SessionWrapper};
use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::format::{OrDash, Seconds, Token};
use crate::record::{LogRecord, ServerIdentity};

/// Win32 status, never determined
const WIN32_STATUS: &str = "0";

/// Protocol version, never determined
const PROTOCOL_VERSION: &str = "-";

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Log record producing lines in the W3C Extended Log File Format
///
/// The fields are listed in the `#Fields` directive of [`LogRecord::PREAMBLE`]. Date and time
/// are in UTC, the time taken is measured in seconds with millisecond precision. Missing values
/// are logged as `-`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedLogRecord {
    start: Instant,
    completed: Option<DateTime<Utc>>,
    client_ip: Option<IpAddr>,
    username: Option<String>,
    site_name: String,
    computer_name: String,
    server_ip: Option<IpAddr>,
    server_port: Option<u16>,
    method: Method,
    uri_stem: String,
    uri_query: Option<String>,
    status: Option<StatusCode>,
    bytes_sent: u64,
    bytes_received: u64,
    time_taken: Option<Duration>,
    host: Option<String>,
    user_agent: Option<HeaderValue>,
    cookie: Option<HeaderValue>,
    referer: Option<HeaderValue>,
    forwarded_for: Option<HeaderValue>,
}

fn value_bytes(value: &Option<HeaderValue>) -> Option<&[u8]> {
    value.as_ref().map(HeaderValue::as_bytes)
}

fn str_bytes(value: &Option<String>) -> Option<&[u8]> {
    value.as_deref().map(str::as_bytes)
}

impl LogRecord for ExtendedLogRecord {
    const PREAMBLE: Option<&'static str> = Some(concat!(
        "#Version: 1.0\n",
        "#Fields: date time c-ip cs-username s-sitename s-computername s-ip s-port cs-method ",
        "cs-uri-stem cs-uri-query sc-status sc-win32-status sc-bytes cs-bytes time-taken ",
        "cs-version cs-host cs(User-Agent) cs(Cookie) cs(Referer) x-forwarded-for",
    ));

    fn dispatched(session: &impl SessionWrapper, server: &ServerIdentity) -> Self {
        let req_header = session.req_header();
        let get_header = |name: &HeaderName| req_header.headers.get(name).cloned();
        let bytes_received = req_header
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);

        Self {
            start: Instant::now(),
            completed: None,
            client_ip: session.client_addr().map(|addr| addr.ip()),
            username: None,
            site_name: server.site_name.clone(),
            computer_name: server.computer_name.clone(),
            server_ip: session.server_addr().map(|addr| addr.ip()),
            server_port: session.server_addr().map(|addr| addr.port()),
            method: req_header.method.clone(),
            uri_stem: req_header.uri.path().to_owned(),
            uri_query: req_header.uri.query().map(ToOwned::to_owned),
            status: None,
            bytes_sent: 0,
            bytes_received,
            time_taken: None,
            host: session.host().map(Cow::into_owned),
            user_agent: get_header(&header::USER_AGENT),
            cookie: get_header(&header::COOKIE),
            referer: get_header(&header::REFERER),
            forwarded_for: get_header(&X_FORWARDED_FOR),
        }
    }

    fn headers_committed(&mut self, header: &ResponseHeader, remote_user: Option<&str>) {
        self.status = Some(header.status);
        self.username = remote_user.map(ToOwned::to_owned);
    }

    fn headers_missing(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    fn completed(&mut self, bytes_sent: u64) {
        self.bytes_sent = bytes_sent;
        self.time_taken = Some(self.start.elapsed());
        self.completed = Some(Utc::now());
    }
}

impl Display for ExtendedLogRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {} {} {} {} {} {} {WIN32_STATUS} {} {} {} {PROTOCOL_VERSION} ",
            OrDash(self.completed.map(|time| time.format("%Y-%m-%d"))),
            OrDash(self.completed.map(|time| time.format("%H:%M:%S"))),
            OrDash(self.client_ip),
            Token(str_bytes(&self.username)),
            Token(Some(self.site_name.as_bytes())),
            Token(Some(self.computer_name.as_bytes())),
            OrDash(self.server_ip),
            OrDash(self.server_port),
            self.method,
            Token(Some(self.uri_stem.as_bytes())),
            Token(str_bytes(&self.uri_query)),
            OrDash(self.status.map(|status| status.as_u16())),
            self.bytes_sent,
            self.bytes_received,
            OrDash(self.time_taken.map(Seconds)),
        )?;
        write!(
            f,
            "{} {} {} {} {}",
            Token(str_bytes(&self.host)),
            Token(value_bytes(&self.user_agent)),
            Token(value_bytes(&self.cookie)),
            Token(value_bytes(&self.referer)),
            Token(value_bytes(&self.forwarded_for)),
        )
    }
}
