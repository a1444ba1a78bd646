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

//! Handler wrapping the request filter chain and logging each request

use async_trait::async_trait;
use http::StatusCode;
use log::{debug, trace};
use module_utils::error::{Error, ErrorType};
use module_utils::session::{BodyWriter, RequestHeader, ResponseHeader, SessionWrapper};
use module_utils::{RequestFilter, RequestFilterResult};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWrite;

use crate::common::CommonLogRecord;
use crate::configuration::{AccessLogConf, LogFormat};
use crate::counting::CountingWriter;
use crate::extended::ExtendedLogRecord;
use crate::record::{LogRecord, ServerIdentity};
use crate::sink::{FileSink, LineSink, LoggerSink};

/// Handler logging every request processed by the wrapped request filter
///
/// The wrapped filter sees a session that counts the response body bytes and notices when the
/// response header is committed. Once the wrapped filter returns, fails or is dropped, one log
/// line is produced.
#[derive(Debug)]
pub struct AccessLogHandler<H> {
    log_format: LogFormat,
    server_error_status: StatusCode,
    server: ServerIdentity,
    sink: Option<Arc<dyn LineSink>>,
    next: H,
}

impl<H> AccessLogHandler<H> {
    /// Creates a handler wrapping `next`, with the log destination determined by
    /// configuration.
    pub fn new(conf: AccessLogConf, next: H) -> Result<Self, Box<Error>> {
        let sink: Option<Arc<dyn LineSink>> = match &conf.log_file {
            None => Some(Arc::new(LoggerSink)),
            Some(log_file) if log_file.as_os_str().is_empty() => None,
            Some(log_file) => {
                let preamble = match conf.log_format {
                    LogFormat::Common => CommonLogRecord::PREAMBLE,
                    LogFormat::Extended => ExtendedLogRecord::PREAMBLE,
                };
                Some(Arc::new(FileSink::new(log_file.clone(), preamble)?))
            }
        };
        Self::build(conf, next, sink)
    }

    /// Creates a handler wrapping `next` and passing log lines to the given sink. The
    /// `log_file` setting is ignored.
    pub fn with_sink(
        conf: AccessLogConf,
        next: H,
        sink: Arc<dyn LineSink>,
    ) -> Result<Self, Box<Error>> {
        Self::build(conf, next, Some(sink))
    }

    fn build(
        conf: AccessLogConf,
        next: H,
        sink: Option<Arc<dyn LineSink>>,
    ) -> Result<Self, Box<Error>> {
        let server_error_status =
            StatusCode::from_u16(conf.server_error_status).map_err(|err| {
                Error::because(ErrorType::InvalidConfig, "invalid server_error_status", err)
            })?;

        Ok(Self {
            log_format: conf.log_format,
            server_error_status,
            server: ServerIdentity::from_conf(&conf),
            sink,
            next,
        })
    }
}

impl<H> AccessLogHandler<H>
where
    H: RequestFilter + Send + Sync,
    H::CTX: Send,
{
    async fn intercept<R, S>(
        &self,
        session: &mut S,
        ctx: &mut H::CTX,
        sink: &Arc<dyn LineSink>,
    ) -> Result<RequestFilterResult, Box<Error>>
    where
        R: LogRecord,
        S: SessionWrapper,
    {
        let record = R::dispatched(&*session, &self.server);
        let mut session = LoggingSession::new(
            session,
            record,
            self.server_error_status,
            Arc::clone(sink),
        );

        let result = self.next.request_filter(&mut session, ctx).await;
        if let Err(err) = &result {
            debug!("Request filter failed, logging request anyway: {err}");
        }
        session.complete();
        drop(session);

        result
    }
}

#[async_trait]
impl<H> RequestFilter for AccessLogHandler<H>
where
    H: RequestFilter + Send + Sync,
    H::CTX: Send,
{
    type CTX = H::CTX;

    fn new_ctx() -> Self::CTX {
        H::new_ctx()
    }

    async fn request_filter(
        &self,
        session: &mut impl SessionWrapper,
        ctx: &mut Self::CTX,
    ) -> Result<RequestFilterResult, Box<Error>> {
        let Some(sink) = &self.sink else {
            // Logging disabled
            return self.next.request_filter(session, ctx).await;
        };

        match self.log_format {
            LogFormat::Common => {
                self.intercept::<CommonLogRecord, _>(session, ctx, sink)
                    .await
            }
            LogFormat::Extended => {
                self.intercept::<ExtendedLogRecord, _>(session, ctx, sink)
                    .await
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Dispatched,
    HeadersCommitted,
    Completed,
}

/// Session wrapper seen by the wrapped request filter, owning the log record of the request
///
/// The original body writer is moved into a [`CountingWriter`] for the lifetime of the
/// wrapper and put back into the session when the wrapper is dropped.
struct LoggingSession<'a, S: SessionWrapper, R: LogRecord> {
    inner: &'a mut S,
    body: CountingWriter<BodyWriter>,
    record: R,
    phase: Phase,
    server_error_status: StatusCode,
    sink: Arc<dyn LineSink>,
}

impl<'a, S: SessionWrapper, R: LogRecord> LoggingSession<'a, S, R> {
    fn new(
        inner: &'a mut S,
        record: R,
        server_error_status: StatusCode,
        sink: Arc<dyn LineSink>,
    ) -> Self {
        let body = CountingWriter::new(inner.replace_body_writer(Box::new(tokio::io::sink())));
        Self {
            inner,
            body,
            record,
            phase: Phase::Dispatched,
            server_error_status,
            sink,
        }
    }

    fn commit(&mut self) {
        if self.phase != Phase::Dispatched {
            return;
        }

        if let Some(header) = self.inner.response_written() {
            self.record
                .headers_committed(header, self.inner.remote_user());
            self.phase = Phase::HeadersCommitted;
        }
    }

    fn complete(&mut self) {
        match self.phase {
            Phase::Completed => return,
            Phase::Dispatched => {
                trace!("Response header never committed, logging server error status");
                self.record.headers_missing(self.server_error_status);
            }
            Phase::HeadersCommitted => {}
        }

        self.record.completed(self.body.bytes_written());
        self.phase = Phase::Completed;
        self.sink.write_line(&self.record.to_string());
    }
}

impl<S: SessionWrapper, R: LogRecord> Drop for LoggingSession<'_, S, R> {
    fn drop(&mut self) {
        if self.phase != Phase::Completed {
            debug!("Request processing cancelled, logging partial response");
            self.complete();
        }

        let body = std::mem::replace(
            &mut self.body,
            CountingWriter::new(Box::new(tokio::io::sink())),
        );
        self.inner.replace_body_writer(body.into_inner());
    }
}

#[async_trait]
impl<S: SessionWrapper, R: LogRecord> SessionWrapper for LoggingSession<'_, S, R> {
    fn req_header(&self) -> &RequestHeader {
        self.inner.req_header()
    }

    fn req_header_mut(&mut self) -> &mut RequestHeader {
        self.inner.req_header_mut()
    }

    fn client_addr(&self) -> Option<&SocketAddr> {
        self.inner.client_addr()
    }

    fn server_addr(&self) -> Option<&SocketAddr> {
        self.inner.server_addr()
    }

    fn extensions(&self) -> &http::Extensions {
        self.inner.extensions()
    }

    fn extensions_mut(&mut self) -> &mut http::Extensions {
        self.inner.extensions_mut()
    }

    fn host(&self) -> Option<Cow<'_, str>> {
        self.inner.host()
    }

    fn remote_user(&self) -> Option<&str> {
        self.inner.remote_user()
    }

    fn set_remote_user(&mut self, remote_user: String) {
        self.inner.set_remote_user(remote_user);
    }

    fn response_written(&self) -> Option<&ResponseHeader> {
        self.inner.response_written()
    }

    async fn write_response_header(&mut self, resp: Box<ResponseHeader>) -> Result<(), Box<Error>> {
        self.inner.write_response_header(resp).await?;
        self.commit();
        Ok(())
    }

    fn body_writer(&mut self) -> &mut (dyn AsyncWrite + Send + Unpin) {
        &mut self.body
    }

    fn replace_body_writer(&mut self, writer: BodyWriter) -> BodyWriter {
        std::mem::replace(self.body.get_mut(), writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use module_utils::session::{build_request_header, TestSession};
    use module_utils::FromYaml;
    use std::sync::Mutex;
    use std::time::Duration;
    use test_log::test;
    use tokio::io::{AsyncReadExt, DuplexStream};

    static BODY: [u8; 1337] = [b'x'; 1337];

    #[derive(Debug, Default, Clone)]
    struct MemorySink(Arc<Mutex<Vec<String>>>);

    impl MemorySink {
        fn lines(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl LineSink for MemorySink {
        fn write_line(&self, line: &str) {
            self.0.lock().unwrap().push(line.to_owned());
        }
    }

    /// Request filter doing whatever the test needs, in the order of its fields
    #[derive(Debug, Default)]
    struct TestHandler {
        user: Option<&'static str>,
        delay: Option<Duration>,
        status: Option<StatusCode>,
        late_user: Option<&'static str>,
        chunks: Vec<&'static [u8]>,
        stall: bool,
        fail: bool,
    }

    #[async_trait]
    impl RequestFilter for TestHandler {
        type CTX = ();

        fn new_ctx() -> Self::CTX {}

        async fn request_filter(
            &self,
            session: &mut impl SessionWrapper,
            _ctx: &mut Self::CTX,
        ) -> Result<RequestFilterResult, Box<Error>> {
            if let Some(user) = self.user {
                session.set_remote_user(user.to_owned());
            }

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            if let Some(status) = self.status {
                session
                    .write_response_header(Box::new(ResponseHeader::new(status)))
                    .await?;
            }

            if let Some(user) = self.late_user {
                session.set_remote_user(user.to_owned());
            }

            for chunk in &self.chunks {
                session.write_response_body(Bytes::from_static(chunk)).await?;
            }

            if self.stall {
                std::future::pending::<()>().await;
            }

            if self.fail {
                return Err(Error::explain(ErrorType::InternalError, "handler failed"));
            }

            Ok(RequestFilterResult::ResponseSent)
        }
    }

    fn make_handler(conf: &str, next: TestHandler) -> (AccessLogHandler<TestHandler>, MemorySink) {
        let sink = MemorySink::default();
        let handler = AccessLogHandler::with_sink(
            AccessLogConf::from_yaml(conf).unwrap(),
            next,
            Arc::new(sink.clone()),
        )
        .unwrap();
        (handler, sink)
    }

    fn make_session(uri: &str) -> (TestSession, DuplexStream) {
        let (writer, reader) = tokio::io::duplex(64 * 1024);
        let req_header = build_request_header("GET", uri).unwrap();
        let mut session = TestSession::new(req_header, Box::new(writer));
        session.set_client_addr(([10, 0, 0, 5], 51234).into());
        (session, reader)
    }

    async fn read_body(session: TestSession, mut reader: DuplexStream) -> Vec<u8> {
        drop(session);
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await.unwrap();
        body
    }

    fn fields(line: &str) -> Vec<&str> {
        line.split(' ').collect()
    }

    #[test(tokio::test)]
    async fn common_success() -> Result<(), Box<Error>> {
        let (handler, sink) = make_handler(
            "{}",
            TestHandler {
                status: Some(StatusCode::OK),
                chunks: vec![&BODY[..1000], &BODY[..0], &BODY[1000..]],
                ..Default::default()
            },
        );

        let (mut session, reader) = make_session("/index.html");
        assert_eq!(
            handler.request_filter(&mut session, &mut ()).await?,
            RequestFilterResult::ResponseSent
        );

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert!(line.starts_with("10.0.0.5 "), "{line}");
        assert!(line.contains(" GET Rfc931 Anonymous ["), "{line}");
        assert!(line.ends_with("] \"GET /index.html HTTP/1.1\" 200 1337"), "{line}");

        // Original body writer is back in place
        session.write_response_body(Bytes::from_static(b"!")).await?;
        assert_eq!(sink.lines().len(), 1);

        let body = read_body(session, reader).await;
        assert_eq!(body.len(), 1338);
        assert_eq!(&body[..1337], &BODY[..]);
        assert_eq!(body[1337], b'!');

        Ok(())
    }

    #[test(tokio::test)]
    async fn common_failure_before_response() {
        let (handler, sink) = make_handler(
            "{}",
            TestHandler {
                fail: true,
                ..Default::default()
            },
        );

        let (mut session, reader) = make_session("/index.html");
        let err = handler
            .request_filter(&mut session, &mut ())
            .await
            .unwrap_err();
        assert_eq!(err.etype, ErrorType::InternalError);
        assert_eq!(err.context.as_deref(), Some("handler failed"));
        assert!(session.response_written().is_none());

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(
            lines[0].ends_with("\"GET /index.html HTTP/1.1\" 500 0"),
            "{}",
            lines[0]
        );

        assert!(read_body(session, reader).await.is_empty());
    }

    #[test(tokio::test)]
    async fn configured_server_error_status() {
        let (handler, sink) = make_handler(
            "server_error_status: 503",
            TestHandler {
                fail: true,
                ..Default::default()
            },
        );

        let (mut session, _reader) = make_session("/");
        assert!(handler.request_filter(&mut session, &mut ()).await.is_err());
        assert!(sink.lines()[0].ends_with(" 503 0"));

        let conf = AccessLogConf::from_yaml("server_error_status: 1000").unwrap();
        let result = AccessLogHandler::with_sink(conf, TestHandler::default(), Arc::new(sink));
        assert_eq!(
            result.map_err(|err| err.etype).err(),
            Some(ErrorType::InvalidConfig)
        );
    }

    #[test(tokio::test)]
    async fn failure_after_response() {
        let (handler, sink) = make_handler(
            "{}",
            TestHandler {
                status: Some(StatusCode::NOT_FOUND),
                chunks: vec![&b"Not found!"[..]],
                fail: true,
                ..Default::default()
            },
        );

        let (mut session, _reader) = make_session("/missing");
        assert!(handler.request_filter(&mut session, &mut ()).await.is_err());

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(" 404 10"), "{}", lines[0]);
    }

    #[test(tokio::test)]
    async fn no_response() -> Result<(), Box<Error>> {
        let (handler, sink) = make_handler("{}", TestHandler::default());

        let (mut session, _reader) = make_session("/");
        assert_eq!(
            handler.request_filter(&mut session, &mut ()).await?,
            RequestFilterResult::ResponseSent
        );

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("\"GET / HTTP/1.1\" 500 0"), "{}", lines[0]);

        Ok(())
    }

    #[test(tokio::test)]
    async fn implicit_header_commit() -> Result<(), Box<Error>> {
        let (handler, sink) = make_handler(
            "{}",
            TestHandler {
                user: Some("bob"),
                chunks: vec![&b"hello"[..]],
                ..Default::default()
            },
        );

        let (mut session, _reader) = make_session("/");
        handler.request_filter(&mut session, &mut ()).await?;
        assert_eq!(
            session.response_written().map(|header| header.status),
            Some(StatusCode::OK)
        );

        let line = &sink.lines()[0];
        assert!(line.contains(" Rfc931 bob "), "{line}");
        assert!(line.ends_with(" 200 5"), "{line}");

        Ok(())
    }

    #[test(tokio::test)]
    async fn user_resolved_at_commit() -> Result<(), Box<Error>> {
        let formats = [("log_format: common", "Anonymous"), ("log_format: extended", "-")];
        for (conf, expected) in formats {
            let (handler, sink) = make_handler(
                conf,
                TestHandler {
                    status: Some(StatusCode::OK),
                    late_user: Some("mallory"),
                    chunks: vec![&BODY[..10]],
                    ..Default::default()
                },
            );

            let (mut session, _reader) = make_session("/");
            handler.request_filter(&mut session, &mut ()).await?;
            assert_eq!(session.remote_user(), Some("mallory"));

            let lines = sink.lines();
            assert_eq!(lines.len(), 1);
            assert!(!lines[0].contains("mallory"), "{}", lines[0]);
            let fields = fields(&lines[0]);
            let user = if conf.ends_with("common") {
                fields[4]
            } else {
                fields[3]
            };
            assert_eq!(user, expected, "{}", lines[0]);
        }

        Ok(())
    }

    #[test(tokio::test)]
    async fn extended_success() -> Result<(), Box<Error>> {
        let (handler, sink) = make_handler(
            r#"
                log_format: extended
                site_name: W3SVC1
                server_name: web01
            "#,
            TestHandler {
                user: Some("alice"),
                delay: Some(Duration::from_millis(50)),
                status: Some(StatusCode::OK),
                chunks: vec![&BODY[..42]],
                ..Default::default()
            },
        );

        let (mut session, reader) = make_session("http://example.com/search?q=rust");
        session.set_server_addr(([192, 168, 1, 1], 8080).into());
        let headers = &mut session.req_header_mut().headers;
        headers.insert(http::header::USER_AGENT, "TestAgent/1.0".parse().unwrap());
        headers.insert(http::header::REFERER, "http://example.com".parse().unwrap());
        headers.insert(http::header::CONTENT_LENGTH, "0".parse().unwrap());

        handler.request_filter(&mut session, &mut ()).await?;

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        let fields = fields(&lines[0]);
        assert_eq!(fields.len(), 22, "{}", lines[0]);
        assert_eq!(fields[2], "10.0.0.5");
        assert_eq!(fields[3], "alice");
        assert_eq!(fields[4], "W3SVC1");
        assert_eq!(fields[5], "web01");
        assert_eq!(fields[6], "192.168.1.1");
        assert_eq!(fields[7], "8080");
        assert_eq!(fields[8], "GET");
        assert_eq!(fields[9], "/search");
        assert_eq!(fields[10], "q=rust");
        assert_eq!(fields[11], "200");
        assert_eq!(fields[12], "0");
        assert_eq!(fields[13], "42");
        assert_eq!(fields[14], "0");
        assert_eq!(fields[16], "-");
        assert_eq!(fields[17], "example.com");
        assert_eq!(fields[18], "TestAgent/1.0");
        assert_eq!(fields[19], "-");
        assert_eq!(fields[20], "http://example.com");
        assert_eq!(fields[21], "-");

        let (seconds, millis) = fields[15].split_once('.').unwrap();
        assert_eq!(millis.len(), 3);
        let elapsed: f64 = fields[15].parse().unwrap();
        assert!(elapsed >= 0.05, "{elapsed}");
        assert!(seconds.parse::<u64>().is_ok());

        assert_eq!(read_body(session, reader).await, &BODY[..42]);

        Ok(())
    }

    #[test(tokio::test)]
    async fn cancellation() -> Result<(), Box<Error>> {
        let (handler, sink) = make_handler(
            "{}",
            TestHandler {
                status: Some(StatusCode::OK),
                chunks: vec![&BODY[..100]],
                stall: true,
                ..Default::default()
            },
        );

        let (mut session, reader) = make_session("/stream");
        let result = tokio::time::timeout(
            Duration::from_millis(50),
            handler.request_filter(&mut session, &mut ()),
        )
        .await;
        assert!(result.is_err());

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("\"GET /stream HTTP/1.1\" 200 100"), "{}", lines[0]);

        // Original body writer is back in place
        session.write_response_body(Bytes::from_static(b"!")).await?;
        assert_eq!(read_body(session, reader).await.len(), 101);
        assert_eq!(sink.lines().len(), 1);

        Ok(())
    }

    #[test(tokio::test)]
    async fn client_disconnect() {
        let (handler, sink) = make_handler(
            "log_format: extended",
            TestHandler {
                chunks: vec![&BODY[..100]],
                ..Default::default()
            },
        );

        let (mut session, reader) = make_session("/");
        drop(reader);
        let err = handler
            .request_filter(&mut session, &mut ())
            .await
            .unwrap_err();
        assert_eq!(err.etype, ErrorType::WriteError);

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        let fields = fields(&lines[0]);
        assert_eq!(fields[11], "200");
        assert_eq!(fields[13], "0");
    }

    #[test(tokio::test)]
    async fn one_line_per_request() -> Result<(), Box<Error>> {
        let (handler, sink) = make_handler(
            "log_format: extended",
            TestHandler {
                status: Some(StatusCode::NO_CONTENT),
                ..Default::default()
            },
        );

        for path in ["/a", "/b", "/c"] {
            let (mut session, _reader) = make_session(path);
            handler.request_filter(&mut session, &mut ()).await?;
        }

        let lines = sink.lines();
        assert_eq!(lines.len(), 3);
        for (line, path) in lines.iter().zip(["/a", "/b", "/c"]) {
            let fields = fields(line);
            assert_eq!(fields.len(), 22);
            assert_eq!(fields[9], path);
            assert_eq!(fields[11], "204");
            assert_eq!(fields[13], "0");
            assert!(fields.iter().all(|field| !field.is_empty()));
        }

        Ok(())
    }

    #[test(tokio::test)]
    async fn disabled() -> Result<(), Box<Error>> {
        let handler = AccessLogHandler::new(
            AccessLogConf::from_yaml("log_file: ''").unwrap(),
            TestHandler {
                chunks: vec![&b"data"[..]],
                ..Default::default()
            },
        )?;

        let (mut session, reader) = make_session("/");
        handler.request_filter(&mut session, &mut ()).await?;
        assert_eq!(read_body(session, reader).await, b"data");

        Ok(())
    }

    #[test(tokio::test)]
    async fn file_log() -> Result<(), Box<Error>> {
        let mut path = std::env::temp_dir();
        path.push(format!("access-log-handler-{}.log", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut conf = AccessLogConf::from_yaml("log_format: extended").unwrap();
        conf.log_file = Some(path.clone());
        let handler = AccessLogHandler::new(
            conf,
            TestHandler {
                status: Some(StatusCode::OK),
                chunks: vec![&b"data"[..]],
                ..Default::default()
            },
        )?;

        let (mut session, _reader) = make_session("/file");
        handler.request_filter(&mut session, &mut ()).await?;

        let mut contents = String::new();
        for _ in 0..100 {
            contents = std::fs::read_to_string(&path).unwrap_or_default();
            if contents.ends_with('\n') {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let _ = std::fs::remove_file(&path);

        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3, "{contents}");
        assert_eq!(lines[0], "#Version: 1.0");
        assert!(lines[1].starts_with("#Fields: date time c-ip "));
        assert_eq!(fields(lines[2])[9], "/file");
        assert_eq!(fields(lines[2])[13], "4");

        Ok(())
    }
}
