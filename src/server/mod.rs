//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a [`Router`].
//! Connections are persistent (keep-alive) unless the client asks otherwise.
//! Serving stops accepting new connections once the shutdown future resolves.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};
use crate::router::Router;

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// A bound HTTP/1.1 listener.
///
/// # Examples
///
/// ```rust,no_run
/// use cachet::{Router, Response, StatusCode, context::Context, server::Server};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.get("/", |_ctx: Context| async { Response::new(StatusCode::Ok).body("Hello!") });
///
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server
///         .serve(router, async {
///             let _ = tokio::signal::ctrl_c().await;
///         })
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The local address the server is bound to. Useful after binding port `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections and routes their requests through `router` until
    /// `shutdown` resolves.
    ///
    /// Connections already being served when `shutdown` resolves run to
    /// completion on their own tasks.
    ///
    /// # Errors
    ///
    /// Individual accept and connection failures are logged, not returned;
    /// this currently always returns `Ok` once `shutdown` resolves.
    pub async fn serve<S>(self, router: Router, shutdown: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()>,
    {
        let router = Arc::new(router);
        tokio::pin!(shutdown);
        info!(address = %self.local_addr, routes = router.len(), "listening");

        loop {
            let (stream, peer_addr) = tokio::select! {
                () = &mut shutdown => {
                    info!(address = %self.local_addr, "shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            debug!(peer = %peer_addr, "connection accepted");
            let router = Arc::clone(&router);

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, router).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }
}

/// Serves one TCP connection, one request per loop iteration, until the peer
/// closes it or either side asks for `Connection: close`.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    router: Arc<Router>,
) -> Result<(), std::io::Error> {
    let mut conn = Connection::new(stream, peer_addr);

    loop {
        let request = match conn.read_request().await? {
            Inbound::Request(request) => request,
            Inbound::Closed => {
                debug!(peer = %peer_addr, "connection closed by peer");
                return Ok(());
            }
            Inbound::Rejected(response) => {
                conn.write_response(response.keep_alive(false)).await?;
                return Ok(());
            }
        };

        let request_keep_alive = request.is_keep_alive();
        debug!(
            peer = %peer_addr,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = router.route(request).await;
        let keep_alive = request_keep_alive && response.is_keep_alive();
        conn.write_response(response.keep_alive(keep_alive)).await?;

        if !keep_alive {
            debug!(peer = %peer_addr, "closing connection after response");
            return Ok(());
        }
    }
}

// Outcome of reading from a connection.
enum Inbound {
    Request(Request),
    Closed,
    // Answer with this response, then close.
    Rejected(Response),
}

struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    buf: BytesMut,
}

impl Connection {
    fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            stream,
            peer_addr,
            buf: BytesMut::with_capacity(INITIAL_BUF_SIZE),
        }
    }

    /// Reads until one complete request (head and `Content-Length` body) is
    /// buffered, then consumes exactly that request. Pipelined bytes stay
    /// buffered for the next call.
    async fn read_request(&mut self) -> Result<Inbound, std::io::Error> {
        loop {
            if !self.buf.is_empty() {
                match Request::parse(&self.buf) {
                    Ok((mut request, head_len)) => {
                        let body_len = request.content_length().unwrap_or(0);
                        let frame_len = match head_len.checked_add(body_len) {
                            Some(len) if len <= MAX_REQUEST_SIZE => len,
                            _ => {
                                warn!(peer = %self.peer_addr, body_len, "declared body too large, sending 413");
                                return Ok(Inbound::Rejected(payload_too_large()));
                            }
                        };
                        if self.buf.len() >= frame_len {
                            request.truncate_body(body_len);
                            let _ = self.buf.split_to(frame_len);
                            return Ok(Inbound::Request(request));
                        }
                    }
                    Err(RequestError::Incomplete) => {}
                    Err(e) => {
                        warn!(peer = %self.peer_addr, error = %e, "bad request, sending 400");
                        let response =
                            Response::new(StatusCode::BadRequest).body(format!("Bad Request: {e}"));
                        return Ok(Inbound::Rejected(response));
                    }
                }
            }

            if self.buf.len() > MAX_REQUEST_SIZE {
                warn!(peer = %self.peer_addr, "request too large, sending 413");
                return Ok(Inbound::Rejected(payload_too_large()));
            }

            if self.stream.read_buf(&mut self.buf).await? == 0 {
                if !self.buf.is_empty() {
                    debug!(peer = %self.peer_addr, pending = self.buf.len(), "peer closed mid-request");
                }
                return Ok(Inbound::Closed);
            }
        }
    }

    async fn write_response(&mut self, response: Response) -> Result<(), std::io::Error> {
        self.stream.write_all(&response.into_bytes()).await?;
        self.stream.flush().await
    }
}

fn payload_too_large() -> Response {
    Response::new(StatusCode::PayloadTooLarge).body("Request entity too large")
}
