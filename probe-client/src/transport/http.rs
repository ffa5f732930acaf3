//! HTTP/1.1 transport over a connection it owns.
//!
//! The cluster answers some operations with a status line no HTTP parser
//! accepts, e.g. `HTTP/1.1 32805 (Doc force deleted)`. Each request is sent
//! exactly once through a hyper client connection whose socket records the
//! first bytes of the response, so when hyper rejects the head the raw status
//! line is read back from what actually arrived.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::{CONNECTION, HOST};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use super::{is_valid_status_line, RawResponse, Request, Transport, TransportError};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Response bytes kept for status line recovery.
const MAX_STATUS_LINE: usize = 1024;

/// HTTP transport for one cluster instance.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    host: String,
    port: u16,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for `http://host:port/`.
    pub fn new(host: &str, port: u16) -> Result<Self, TransportError> {
        Self::with_timeout(host, port, DEFAULT_TIMEOUT)
    }

    /// Create a transport with a custom request timeout.
    pub fn with_timeout(host: &str, port: u16, timeout: Duration) -> Result<Self, TransportError> {
        if host.is_empty() {
            return Err(TransportError::RequestFailed("empty host".into()));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            timeout,
        })
    }

    /// Origin-form request target: `/endpoint?k=v&...`, percent-encoded.
    fn target_for(request: &Request) -> String {
        let mut target = format!("/{}", request.endpoint.trim_start_matches('/'));
        for (i, (key, value)) in request.params.iter().enumerate() {
            target.push(if i == 0 { '?' } else { '&' });
            target.push_str(&urlencoding::encode(key));
            target.push('=');
            target.push_str(&urlencoding::encode(value));
        }
        target
    }

    async fn exchange(&self, target: &str) -> Result<RawResponse, TransportError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let (stream, head) = HeadRecorder::new(stream);

        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "admin connection closed with error");
            }
        });

        let request = hyper::Request::get(target)
            .header(HOST, format!("{}:{}", self.host, self.port))
            .header(CONNECTION, "close")
            .body(Empty::<Bytes>::new())
            .map_err(|e| TransportError::RequestFailed(e.to_string()))?;

        let response = match sender.send_request(request).await {
            Ok(response) => response,
            Err(e) => {
                if let Some(line) = head.status_line() {
                    if !is_valid_status_line(&line) {
                        tracing::debug!(request_target = target, %line, "response carried a non-standard status line");
                        return Err(TransportError::MalformedStatusLine { line });
                    }
                }
                return Err(TransportError::RequestFailed(e.to_string()));
            }
        };

        let status = response.status().as_u16();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::RequestFailed(e.to_string()))?
            .to_bytes();

        Ok(RawResponse {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, request: &Request) -> Result<RawResponse, TransportError> {
        let target = Self::target_for(request);
        match tokio::time::timeout(self.timeout, self.exchange(&target)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn address(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

/// Socket wrapper that keeps a copy of the first response bytes it reads.
#[derive(Debug)]
struct HeadRecorder<S> {
    inner: S,
    head: RecordedHead,
}

/// Shared view of the bytes a [`HeadRecorder`] has read.
#[derive(Debug, Clone, Default)]
struct RecordedHead(Arc<Mutex<Vec<u8>>>);

impl RecordedHead {
    /// First line received, without its terminator. `None` until one is complete.
    fn status_line(&self) -> Option<String> {
        let bytes = self.0.lock().ok()?;
        let end = bytes.iter().position(|b| *b == b'\n')?;
        let line = String::from_utf8_lossy(&bytes[..end]);
        Some(line.trim_end_matches('\r').to_string())
    }

    fn extend(&self, fresh: &[u8]) {
        if let Ok(mut bytes) = self.0.lock() {
            let room = MAX_STATUS_LINE.saturating_sub(bytes.len());
            bytes.extend_from_slice(&fresh[..fresh.len().min(room)]);
        }
    }
}

impl<S> HeadRecorder<S> {
    fn new(inner: S) -> (Self, RecordedHead) {
        let head = RecordedHead::default();
        (
            Self {
                inner,
                head: head.clone(),
            },
            head,
        )
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for HeadRecorder<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            this.head.extend(&buf.filled()[before..]);
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for HeadRecorder<S> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `reply` verbatim to every connection, counting requests received.
    async fn raw_server(reply: &'static str) -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut seen = Vec::new();
                    while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => seen.extend_from_slice(&buf[..n]),
                        }
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = socket.write_all(reply.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        (port, requests)
    }

    fn request(endpoint: &str) -> Request {
        Request {
            endpoint: endpoint.into(),
            params: vec![("c".into(), "main".into()), ("q".into(), "a b&c".into())],
        }
    }

    #[tokio::test]
    async fn well_formed_response() {
        let (port, requests) = raw_server(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}",
        )
        .await;
        let transport = HttpTransport::new("127.0.0.1", port).unwrap();

        let response = transport.get(&request("admin/status")).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "{}");
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chunked_body_is_decoded() {
        let (port, _) = raw_server(
            "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n3\r\n{\"a\r\n4\r\n\":1}\r\n0\r\n\r\n",
        )
        .await;
        let transport = HttpTransport::new("127.0.0.1", port).unwrap();

        let response = transport.get(&request("admin/status")).await.unwrap();
        assert_eq!(response.body, "{\"a\":1}");
    }

    #[tokio::test]
    async fn malformed_status_line_is_structured() {
        let (port, _) = raw_server("HTTP/1.1 32805 (Doc force deleted)\r\n\r\n").await;
        let transport = HttpTransport::new("127.0.0.1", port).unwrap();

        let err = transport.get(&request("admin/inject")).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::MalformedStatusLine {
                line: "HTTP/1.1 32805 (Doc force deleted)".into()
            }
        );
        assert_eq!(err.status_text(), Some("Doc force deleted"));
    }

    #[tokio::test]
    async fn sentinel_reply_is_not_resent() {
        let (port, requests) = raw_server("HTTP/1.1 32805 (Doc force deleted)\r\n\r\n").await;
        let transport = HttpTransport::new("127.0.0.1", port).unwrap();
        let delete = Request {
            endpoint: "admin/inject".into(),
            params: vec![("url".into(), "http://a.case1.privacore.test/".into()), ("deleteurl".into(), "1".into())],
        };

        let err = transport.get(&delete).await.unwrap_err();
        assert!(matches!(err, TransportError::MalformedStatusLine { .. }));
        // Give a stray second connection time to show up.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn truncated_response_is_a_request_failure() {
        let (port, _) = raw_server("HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n{}").await;
        let transport = HttpTransport::new("127.0.0.1", port).unwrap();

        let err = transport.get(&request("admin/status")).await.unwrap_err();
        assert!(matches!(err, TransportError::RequestFailed(_)));
    }

    #[tokio::test]
    async fn refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = HttpTransport::new("127.0.0.1", port).unwrap();
        let err = transport.get(&request("admin/status")).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let transport = HttpTransport::with_timeout("127.0.0.1", port, Duration::from_millis(100)).unwrap();
        let err = transport.get(&request("admin/status")).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout);
    }

    #[test]
    fn target_encodes_params() {
        assert_eq!(
            HttpTransport::target_for(&request("admin/status")),
            "/admin/status?c=main&q=a%20b%26c"
        );
        assert_eq!(
            HttpTransport::target_for(&Request {
                endpoint: "/search".into(),
                params: Vec::new(),
            }),
            "/search"
        );

        let transport = HttpTransport::new("127.0.0.1", 28000).unwrap();
        assert_eq!(transport.address(), "http://127.0.0.1:28000/");
    }

    #[test]
    fn recorded_head_yields_first_line() {
        let head = RecordedHead::default();
        assert_eq!(head.status_line(), None);
        head.extend(b"HTTP/1.1 32771 (Record");
        assert_eq!(head.status_line(), None);
        head.extend(b" not found)\r\nX: y\r\n");
        assert_eq!(head.status_line().as_deref(), Some("HTTP/1.1 32771 (Record not found)"));
    }
}
