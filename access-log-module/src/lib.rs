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

//! # Access Log Module
//!
//! This crate implements a request filter writing one access log line per request, either in the
//! [Common Log Format](https://en.wikipedia.org/wiki/Common_Log_Format) or in the
//! [W3C Extended Log File Format](https://www.w3.org/TR/WD-logfile.html). A configuration could
//! look like this:
//!
//! ```yaml
//! log_file: access.log
//! log_format: extended
//! site_name: W3SVC1
//! server_name: web01
//! server_error_status: 500
//! ```
//!
//! The `log_file` and `log_format` fields are also available as `--log-file` and `--log-format`
//! command line options.
//!
//! The settings are:
//!
//! * `log_file`: file to append log lines to. If omitted, log lines go to the `access_log`
//!   target of the application’s logger. An empty value disables logging, `-` writes to standard
//!   output.
//! * `log_format`: `common` (default) or `extended`
//! * `site_name`: value of the `s-sitename` field in the extended format
//! * `server_name`: value of the `s-computername` field in the extended format, defaults to the
//!   `HOSTNAME` or `COMPUTERNAME` environment variable
//! * `server_error_status`: status code logged if the request handler fails before sending a
//!   response, 500 by default
//!
//! A common format line looks like this:
//!
//! ```text
//! 192.0.2.1 2024-05-29 GET Rfc931 alice [29/May/2024:10:53:19 +0200] "GET /index.html HTTP/1.1" 200 1337
//! ```
//!
//! Extended format log files start with the `#Version` and `#Fields` directives, each line then
//! lists the fields `date time c-ip cs-username s-sitename s-computername s-ip s-port cs-method
//! cs-uri-stem cs-uri-query sc-status sc-win32-status sc-bytes cs-bytes time-taken cs-version
//! cs-host cs(User-Agent) cs(Cookie) cs(Referer) x-forwarded-for`. Missing values are logged as
//! `-`.
//!
//! The number of bytes sent is measured by wrapping the response body writer, so the wrapped
//! handler doesn’t need to cooperate. A line is written even if the handler fails or the request
//! is aborted.
//!
//! On Unix-based systems, the process can be sent a `HUP` or `USR1` signal to make it re-open log
//! files. This is useful after the logs have been rotated for example.
//!
//! ## Code example
//!
//! `AccessLogHandler` wraps another request filter:
//!
//! ```rust
//! use access_log_module::{AccessLogConf, AccessLogHandler, AccessLogOpt};
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use clap::Parser;
//! use http::StatusCode;
//! use module_utils::error::Error;
//! use module_utils::session::{ResponseHeader, SessionWrapper};
//! use module_utils::{FromYaml, RequestFilter, RequestFilterResult};
//!
//! #[derive(Debug)]
//! struct HelloHandler;
//!
//! #[async_trait]
//! impl RequestFilter for HelloHandler {
//!     type CTX = ();
//!
//!     fn new_ctx() -> Self::CTX {}
//!
//!     async fn request_filter(
//!         &self,
//!         session: &mut impl SessionWrapper,
//!         _ctx: &mut Self::CTX,
//!     ) -> Result<RequestFilterResult, Box<Error>> {
//!         let header = ResponseHeader::new(StatusCode::OK);
//!         session.write_response_header(Box::new(header)).await?;
//!         session.write_response_body(Bytes::from_static(b"Hello!")).await?;
//!         Ok(RequestFilterResult::ResponseSent)
//!     }
//! }
//!
//! let opt = AccessLogOpt::parse_from(["server", "--log-format", "extended"]);
//! let mut conf = AccessLogConf::from_yaml("site_name: W3SVC1").unwrap();
//! conf.merge_with_opt(opt);
//!
//! let handler = AccessLogHandler::new(conf, HelloHandler).unwrap();
//!
//! // Pass handler.request_filter() the sessions of incoming requests here
//! # let _ = handler;
//! ```

pub mod configuration;
mod common;
mod counting;
mod extended;
mod format;
mod handler;
mod record;
#[cfg(unix)]
mod signal;
mod sink;
mod writer;

pub use common::CommonLogRecord;
pub use configuration::{AccessLogConf, AccessLogOpt, LogFormat};
pub use counting::CountingWriter;
pub use extended::ExtendedLogRecord;
pub use handler::AccessLogHandler;
pub use record::{LogRecord, ServerIdentity};
pub use sink::{FileSink, LineSink, LoggerSink};
