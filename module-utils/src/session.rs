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

//! Session abstraction implemented by hosts of request filters
//!
//! A session gives access to the request header and connection data, allows committing the
//! response header and writing the response body. The body goes into a replaceable sink, so
//! that wrappers can install their own writer in place of the original one.

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{Extensions, HeaderMap, Method, StatusCode, Uri};
use std::borrow::Cow;
use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Error, ErrorType};

/// Request data of a session: method, URI, version, headers and extensions
pub type RequestHeader = http::request::Parts;

/// Sink receiving the response body
pub type BodyWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Builds a request header for the given method and URI, HTTP/1.1 by default.
pub fn build_request_header(method: &str, uri: &str) -> Result<RequestHeader, Box<Error>> {
    let method = Method::from_bytes(method.as_bytes()).map_err(|err| {
        Error::because(ErrorType::InvalidHTTPHeader, "invalid request method", err)
    })?;
    let request = http::Request::builder()
        .method(method)
        .uri(uri)
        .body(())
        .map_err(|err| {
            Error::because(ErrorType::InvalidHTTPHeader, "invalid request URI", err)
        })?;
    Ok(request.into_parts().0)
}

/// Status and headers of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Response status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
}

impl ResponseHeader {
    /// Creates a response header with the given status and no headers.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }
}

/// Type used to store remote user’s name in `SessionWrapper::extensions`
#[derive(Debug, Clone)]
struct RemoteUser(String);

/// A trait implemented by sessions and wrappers around them
///
/// Wrappers are expected to delegate to the wrapped session, overriding only the methods they
/// need to observe.
#[async_trait]
pub trait SessionWrapper: Send {
    /// Returns the request header.
    fn req_header(&self) -> &RequestHeader;

    /// Returns a mutable reference to the request header.
    fn req_header_mut(&mut self) -> &mut RequestHeader;

    /// Return the client (peer) address of the connection.
    fn client_addr(&self) -> Option<&SocketAddr>;

    /// Return the local address of the connection.
    fn server_addr(&self) -> Option<&SocketAddr>;

    /// Returns a reference to the associated extensions.
    fn extensions(&self) -> &Extensions {
        &self.req_header().extensions
    }

    /// Returns a mutable reference to the associated extensions.
    fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.req_header_mut().extensions
    }

    /// Returns the request URI.
    fn uri(&self) -> &Uri {
        &self.req_header().uri
    }

    /// Returns a request header value if present.
    fn get_header(&self, name: HeaderName) -> Option<&HeaderValue> {
        self.req_header().headers.get(name)
    }

    /// Attempts to determine the request host if one was specified.
    fn host(&self) -> Option<Cow<'_, str>> {
        if let Some(host) = self
            .get_header(header::HOST)
            .and_then(|host| host.to_str().ok())
        {
            return Some(host.into());
        }

        let uri = self.uri();
        let host = uri.host()?;
        if let Some(port) = uri.port() {
            Some(format!("{host}:{port}").into())
        } else {
            Some(host.into())
        }
    }

    /// Returns the name of the authorized user if any
    ///
    /// Authentication usually runs late in the handler chain, so the result of this method can
    /// change while the request is being processed.
    fn remote_user(&self) -> Option<&str> {
        if let Some(RemoteUser(remote_user)) = self.extensions().get() {
            Some(remote_user)
        } else {
            None
        }
    }

    /// Sets the name of the authorized user
    fn set_remote_user(&mut self, remote_user: String) {
        self.extensions_mut().insert(RemoteUser(remote_user));
    }

    /// Returns the response header if it has been written already.
    fn response_written(&self) -> Option<&ResponseHeader>;

    /// Commits the response header. Status and headers cannot change afterwards.
    async fn write_response_header(&mut self, resp: Box<ResponseHeader>) -> Result<(), Box<Error>>;

    /// Returns the sink receiving the response body.
    fn body_writer(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin);

    /// Installs a new response body sink, returning the previous one.
    fn replace_body_writer(&mut self, writer: BodyWriter) -> BodyWriter;

    /// Writes a chunk of the response body, committing a `200 OK` response header first if no
    /// header has been written yet.
    async fn write_response_body(&mut self, data: Bytes) -> Result<(), Box<Error>> {
        if self.response_written().is_none() {
            self.write_response_header(Box::new(ResponseHeader::new(StatusCode::OK)))
                .await?;
        }

        self.body_writer()
            .write_all(&data)
            .await
            .map_err(|err| {
                Error::because(ErrorType::WriteError, "failed writing response body", err)
            })
    }
}

/// An in-memory session
///
/// This session holds the request data it was created with and sends the response body into
/// the body writer, e.g. one half of [`tokio::io::duplex`]. The response header is kept in
/// memory only.
pub struct TestSession {
    req_header: RequestHeader,
    client_addr: Option<SocketAddr>,
    server_addr: Option<SocketAddr>,
    response_header: Option<ResponseHeader>,
    body_writer: BodyWriter,
}

impl TestSession {
    /// Creates a new session sending the response body to the given writer.
    pub fn new(req_header: RequestHeader, body_writer: BodyWriter) -> Self {
        Self {
            req_header,
            client_addr: None,
            server_addr: None,
            response_header: None,
            body_writer,
        }
    }

    /// Sets the client address of the connection.
    pub fn set_client_addr(&mut self, addr: SocketAddr) {
        self.client_addr = Some(addr);
    }

    /// Sets the local address of the connection.
    pub fn set_server_addr(&mut self, addr: SocketAddr) {
        self.server_addr = Some(addr);
    }
}

impl From<RequestHeader> for TestSession {
    fn from(req_header: RequestHeader) -> Self {
        Self::new(req_header, Box::new(tokio::io::sink()))
    }
}

impl Debug for TestSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSession")
            .field("req_header", &self.req_header)
            .field("client_addr", &self.client_addr)
            .field("server_addr", &self.server_addr)
            .field("response_header", &self.response_header)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionWrapper for TestSession {
    fn req_header(&self) -> &RequestHeader {
        &self.req_header
    }

    fn req_header_mut(&mut self) -> &mut RequestHeader {
        &mut self.req_header
    }

    fn client_addr(&self) -> Option<&SocketAddr> {
        self.client_addr.as_ref()
    }

    fn server_addr(&self) -> Option<&SocketAddr> {
        self.server_addr.as_ref()
    }

    fn response_written(&self) -> Option<&ResponseHeader> {
        self.response_header.as_ref()
    }

    async fn write_response_header(&mut self, resp: Box<ResponseHeader>) -> Result<(), Box<Error>> {
        if self.response_header.is_some() {
            return Err(Error::explain(
                ErrorType::InternalError,
                "response header already written",
            ));
        }
        self.response_header = Some(*resp);
        Ok(())
    }

    fn body_writer(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin) {
        &mut self.body_writer
    }

    fn replace_body_writer(&mut self, writer: BodyWriter) -> BodyWriter {
        std::mem::replace(&mut self.body_writer, writer)
    }
}
