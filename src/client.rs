//! HTTP client implementations for making outbound requests with TLS support.
//!
//! This module provides HTTP clients for making requests to external services. It includes
//! `TakoClient` for plain HTTP connections and `TakoTlsClient` for secure HTTPS connections
//! using rustls. Both clients support HTTP/1.1 protocol and handle connection management
//! automatically. The clients are generic over body types to support different request
//! payload formats while maintaining type safety and performance.
//!
//! # Examples
//!
//! ```rust,no_run
//! use topocache::client::{TakoClient, TakoTlsClient};
//! use http_body_util::Empty;
//! use bytes::Bytes;
//! use http::Request;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Plain HTTP client
//! let mut client = TakoClient::<Empty<Bytes>>::new("httpbin.org", Some(80)).await?;
//! let request = Request::builder()
//!     .uri("/get")
//!     .body(Empty::new())?;
//! let response = client.request(request).await?;
//!
//! // HTTPS client with TLS
//! let mut tls_client = TakoTlsClient::<Empty<Bytes>>::new("httpbin.org", None).await?;
//! let tls_request = Request::builder()
//!     .uri("/get")
//!     .body(Empty::new())?;
//! let tls_response = tls_client.request(tls_request).await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, doc(cfg(feature = "client")))]

use std::error::Error;
use std::sync::Arc;

use http::Request;
use http::Response;
use http_body::Body;
use http_body_util::BodyExt;
use hyper::client::conn::http1::SendRequest;
use hyper::client::{self};
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use webpki_roots::TLS_SERVER_ROOTS;

/// HTTPS client with TLS encryption support using rustls.
///
/// `TakoTlsClient` provides a secure HTTP client that establishes TLS-encrypted
/// connections to remote servers. It uses rustls for TLS implementation and includes
/// built-in root certificate validation. The client maintains a persistent connection
/// and handles the TLS handshake automatically during initialization.
///
/// # Type Parameters
///
/// * `B` - Body type for HTTP requests, must implement `Body + Send + 'static`
///
/// # Examples
///
/// ```rust,no_run
/// use topocache::client::TakoTlsClient;
/// use http_body_util::Empty;
/// use bytes::Bytes;
/// use http::Request;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// // Create HTTPS client for api.example.com on port 443
/// let mut client = TakoTlsClient::<Empty<Bytes>>::new("api.example.com", None).await?;
///
/// // Make authenticated API request
/// let request = Request::builder()
///     .method("GET")
///     .uri("/v1/users")
///     .header("authorization", "Bearer token123")
///     .body(Empty::new())?;
///
/// let response = client.request(request).await?;
/// println!("Status: {}", response.status());
/// # Ok(())
/// # }
/// ```
pub struct TakoTlsClient<B: Body>
where
  B: Body + Send + 'static,
  B::Data: Send + 'static,
  B::Error: Into<Box<dyn Error + Send + Sync>>,
{
  /// HTTP/1.1 request sender for the established TLS connection.
  sender: SendRequest<B>,
  /// Background task handle managing the connection lifecycle.
  _conn_handle: JoinHandle<Result<(), hyper::Error>>,
}

impl<B> TakoTlsClient<B>
where
  B: Body + Send + 'static,
  B::Data: Send + 'static,
  B::Error: Into<Box<dyn Error + Send + Sync>>,
{
  /// Creates a new HTTPS client with TLS encryption.
  pub async fn new<'a>(host: &'a str, port: Option<u16>) -> Result<Self, Box<dyn Error>>
  where
    'a: 'static,
  {
    let port = port.unwrap_or(443);
    let addr = format!("{host}:{port}");
    let tcp_stream = TcpStream::connect(addr).await?;

    let mut root_cert_store = RootCertStore::empty();
    root_cert_store.extend(TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
      .with_root_certificates(root_cert_store)
      .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));
    let server_name = ServerName::try_from(host)?;
    let tls_stream = connector.connect(server_name, tcp_stream).await?;
    let io = TokioIo::new(tls_stream);

    // Example for HTTP/2 handshake
    // let (mut sender, conn) = client::conn::http2::handshake::<TokioExecutor, _, Empty<Bytes>>(TokioExecutor::new(), io).await?;

    // HTTP/1 handshake
    let (sender, conn) = client::conn::http1::handshake::<_, B>(io).await?;
    let conn_handle = tokio::spawn(async move {
      if let Err(err) = conn.await {
        tracing::error!("Connection error: {}", err);
      }

      Ok(())
    });

    Ok(Self {
      sender,
      _conn_handle: conn_handle,
    })
  }

  /// Sends an HTTP request and returns the response with body as bytes.
  ///
  /// This method sends the request over the established TLS connection and reads
  /// the complete response body into memory as a byte vector. The response headers
  /// and status are preserved while the body is collected into a `Vec<u8>`.
  ///
  /// # Errors
  ///
  /// Returns an error if the request fails to send, the response cannot be read,
  /// or connection issues occur during the request/response cycle.
  ///
  /// # Examples
  ///
  /// ```rust,no_run
  /// use topocache::client::TakoTlsClient;
  /// use http_body_util::Empty;
  /// use bytes::Bytes;
  /// use http::{Request, Method};
  ///
  /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
  /// let mut client = TakoTlsClient::<Empty<Bytes>>::new("httpbin.org", None).await?;
  ///
  /// let request = Request::builder()
  ///     .method(Method::GET)
  ///     .uri("/json")
  ///     .header("accept", "application/json")
  ///     .body(Empty::new())?;
  ///
  /// let response = client.request(request).await?;
  /// println!("Status: {}", response.status());
  /// println!("Body length: {} bytes", response.body().len());
  /// # Ok(())
  /// # }
  /// ```
  pub async fn request(&mut self, req: Request<B>) -> Result<Response<Vec<u8>>, Box<dyn Error>> {
    let mut response = self.sender.send_request(req).await?;
    let mut body_bytes = Vec::new();

    while let Some(frame) = response.frame().await {
      let frame = frame?;
      if let Some(chunk) = frame.data_ref() {
        body_bytes.extend_from_slice(chunk);
      }
    }

    let parts = response.into_parts();
    let resp = Response::from_parts(parts.0, body_bytes);
    Ok(resp)
  }
}

/// Plain HTTP client for unencrypted connections.
///
/// `TakoClient` provides a standard HTTP client that establishes plain TCP connections
/// to remote servers without encryption. It's suitable for internal services, development
/// environments, or when TLS termination is handled by a proxy. The client maintains
/// a persistent connection and uses HTTP/1.1 protocol.
///
/// # Type Parameters
///
/// * `B` - Body type for HTTP requests, must implement `Body + Send + 'static`
///
/// # Examples
///
/// ```rust,no_run
/// use topocache::client::TakoClient;
/// use http_body_util::Empty;
/// use bytes::Bytes;
/// use http::Request;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// // Create HTTP client for local development server
/// let mut client = TakoClient::<Empty<Bytes>>::new("localhost", Some(3000)).await?;
///
/// // Make request to health check endpoint
/// let request = Request::builder()
///     .method("GET")
///     .uri("/health")
///     .body(Empty::new())?;
///
/// let response = client.request(request).await?;
/// println!("Health check: {}", response.status());
/// # Ok(())
/// # }
/// ```
pub struct TakoClient<B: Body>
where
  B: Body + Send + 'static,
  B::Data: Send + 'static,
  B::Error: Into<Box<dyn Error + Send + Sync>>,
{
  /// HTTP/1.1 request sender for the established TCP connection.
  sender: SendRequest<B>,
  /// Background task handle managing the connection lifecycle.
  _conn_handle: JoinHandle<Result<(), hyper::Error>>,
}

impl<B> TakoClient<B>
where
  B: Body + Send + 'static,
  B::Data: Send + 'static,
  B::Error: Into<Box<dyn Error + Send + Sync>>,
{
  /// Creates a new HTTP client for plain TCP connections.
  pub async fn new<'a>(host: &'a str, port: Option<u16>) -> Result<Self, Box<dyn Error>>
  where
    'a: 'static,
  {
    let port = port.unwrap_or(80);
    let addr = format!("{host}:{port}");
    let tcp_stream = TcpStream::connect(addr).await?;
    let io = TokioIo::new(tcp_stream);

    // HTTP/1 handshake
    let (sender, conn) = client::conn::http1::handshake::<_, B>(io).await?;
    let conn_handle = tokio::spawn(async move {
      if let Err(err) = conn.await {
        tracing::error!("Connection error: {}", err);
      }

      Ok(())
    });

    Ok(Self {
      sender,
      _conn_handle: conn_handle,
    })
  }

  /// Sends an HTTP request and returns the response with body as bytes.
  ///
  /// This method sends the request over the established TCP connection and reads
  /// the complete response body into memory as a byte vector. The response headers
  /// and status are preserved while the body is collected into a `Vec<u8>`.
  ///
  /// # Errors
  ///
  /// Returns an error if the request fails to send, the response cannot be read,
  /// or connection issues occur during the request/response cycle.
  ///
  /// # Examples
  ///
  /// ```rust,no_run
  /// use topocache::client::TakoClient;
  /// use http_body_util::Empty;
  /// use bytes::Bytes;
  /// use http::{Request, Method};
  ///
  /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
  /// let mut client = TakoClient::<Empty<Bytes>>::new("httpbin.org", Some(80)).await?;
  ///
  /// let request = Request::builder()
  ///     .method(Method::POST)
  ///     .uri("/post")
  ///     .header("content-type", "application/json")
  ///     .body(Empty::new())?;
  ///
  /// let response = client.request(request).await?;
  /// println!("Status: {}", response.status());
  /// let body_text = String::from_utf8_lossy(response.body());
  /// println!("Response: {}", body_text);
  /// # Ok(())
  /// # }
  /// ```
  pub async fn request(&mut self, req: Request<B>) -> Result<Response<Vec<u8>>, Box<dyn Error>> {
    let mut response = self.sender.send_request(req).await?;
    let mut body_bytes = Vec::new();

    while let Some(frame) = response.frame().await {
      let frame = frame?;
      if let Some(chunk) = frame.data_ref() {
        body_bytes.extend_from_slice(chunk);
      }
    }

    let parts = response.into_parts();
    let resp = Response::from_parts(parts.0, body_bytes);
    Ok(resp)
  }
}

mod caching_session {
  //! Outbound HTTP client session that reuses cached entries (component D).
  //!
  //! Grounded in the pattern of a per-request client session that injects ambient
  //! identity headers, stores/reuses ETags, and converts an upstream error status
  //! into the same JSON envelope the rest of the request pipeline uses. Unlike
  //! [`super::TakoClient`]/[`super::TakoTlsClient`], which speak to exactly one
  //! already-connected host, `CachingSession` is meant to be held for the lifetime
  //! of one inbound request and used for every outbound call it needs to make.

  use bytes::Bytes;
  use http::{Method, StatusCode, header::IF_NONE_MATCH};
  use http_body_util::Full;

  use super::{TakoClient, TakoTlsClient};
  use crate::{
    cache::{CacheEntry, CacheStore},
    context::RequestContext,
    error::CacheError,
  };

  const MAX_REDIRECTS: u8 = 5;

  enum Transport {
    Plain(TakoClient<Full<Bytes>>),
    Tls(TakoTlsClient<Full<Bytes>>),
  }

  /// A single outbound HTTP session reusing cache entries and ambient identity.
  pub struct CachingSession {
    transport: Transport,
    host: String,
    cache: CacheStore,
  }

  impl CachingSession {
    /// Opens a plain-TCP session to `host:port`, backed by `cache` for ETag reuse.
    pub async fn connect(host: &str, port: Option<u16>, cache: CacheStore) -> Result<Self, CacheError> {
      let client = TakoClient::<Full<Bytes>>::new(host, port)
        .await
        .map_err(|e| CacheError::Protocol(e.to_string().into()))?;
      Ok(Self {
        transport: Transport::Plain(client),
        host: host.to_string(),
        cache,
      })
    }

    /// Opens a TLS session to `host:port`, backed by `cache` for ETag reuse.
    pub async fn connect_tls(host: &str, port: Option<u16>, cache: CacheStore) -> Result<Self, CacheError> {
      let client = TakoTlsClient::<Full<Bytes>>::new(host, port)
        .await
        .map_err(|e| CacheError::Protocol(e.to_string().into()))?;
      Ok(Self {
        transport: Transport::Tls(client),
        host: host.to_string(),
        cache,
      })
    }

    async fn send(&mut self, req: http::Request<Full<Bytes>>) -> Result<http::Response<Vec<u8>>, CacheError> {
      match &mut self.transport {
        Transport::Plain(client) => client.request(req).await,
        Transport::Tls(client) => client.request(req).await,
      }
      .map_err(|e| CacheError::Protocol(e.to_string().into()))
    }

    fn build_request(&self, method: Method, path: &str, if_none_match: Option<&str>) -> http::Request<Full<Bytes>> {
      let mut builder = http::Request::builder()
        .method(method)
        .uri(path)
        .header(http::header::HOST, self.host.as_str());
      if let Some(etag) = if_none_match {
        builder = builder.header(IF_NONE_MATCH, etag);
      }
      RequestContext::current().apply_to(builder.headers_mut().unwrap());
      builder.body(Full::from(Bytes::new())).unwrap()
    }

    /// Performs a `GET`, serving a cached body on a `304`, following up to
    /// [`MAX_REDIRECTS`] `303 See Other` redirects, and converting any other
    /// non-success status into [`CacheError::Upstream`].
    pub async fn get(&mut self, path: &str) -> Result<Bytes, CacheError> {
      let mut path = path.to_string();
      let mut req_headers = http::HeaderMap::new();
      RequestContext::current().apply_to(&mut req_headers);

      for _ in 0..=MAX_REDIRECTS {
        let key = self.cache.key_for(&path, &req_headers);
        let cached = self.cache.get(&key);
        let if_none_match = cached.as_ref().map(|e| e.etag.as_str());

        let req = self.build_request(Method::GET, &path, if_none_match);
        let resp = self.send(req).await?;

        match resp.status() {
          StatusCode::NOT_MODIFIED => {
            if let Some(entry) = cached {
              return Ok(entry.body);
            }
            return Err(CacheError::Protocol("304 with no cached entry".into()));
          }
          StatusCode::SEE_OTHER => {
            let location = resp
              .headers()
              .get(http::header::LOCATION)
              .and_then(|v| v.to_str().ok())
              .ok_or_else(|| CacheError::Protocol("303 with no Location header".into()))?
              .to_string();
            path = location;
            continue;
          }
          status if status.is_success() => {
            let (parts, body) = resp.into_parts();
            let body = Bytes::from(body);
            if let Some(etag) = parts.headers.get(http::header::ETAG).and_then(|v| v.to_str().ok()) {
              let mut resp_headers = parts.headers.clone();
              if let Some((key, _scope)) = self.cache.vary(&path, &req_headers, &mut resp_headers) {
                self.cache.store(
                  key,
                  CacheEntry {
                    etag: etag.to_string(),
                    headers: resp_headers,
                    body: body.clone(),
                  },
                );
              }
            }
            return Ok(body);
          }
          status => {
            return Err(CacheError::Upstream {
              status,
              reason: String::from_utf8_lossy(resp.body()).to_string(),
            });
          }
        }
      }

      Err(CacheError::Protocol("too many redirects".into()))
    }
  }

  #[cfg(test)]
  mod tests {
    use std::net::SocketAddr;

    use http::header::{ETAG, IF_NONE_MATCH, LOCATION};

    use super::*;
    use crate::{body::TakoBody, router::Router, signals::SignalArbiter, types::Request};

    const KNOWN_ETAG: &str = "1f3870be274f6c49b3e31a0c6728957f";

    /// Upstream handler serving a conditional response the way a real origin would:
    /// a `304` with no body when the caller's `If-None-Match` already matches, a
    /// fresh `200` with an `ETag` otherwise.
    async fn conditional_handler(req: Request) -> crate::types::Response {
      let if_none_match = req.headers().get(IF_NONE_MATCH).and_then(|v| v.to_str().ok());
      if if_none_match == Some(KNOWN_ETAG) {
        return hyper::Response::builder()
          .status(StatusCode::NOT_MODIFIED)
          .header(ETAG, KNOWN_ETAG)
          .body(TakoBody::empty())
          .unwrap();
      }
      hyper::Response::builder()
        .status(StatusCode::OK)
        .header(ETAG, KNOWN_ETAG)
        .body(TakoBody::from(Bytes::from_static(b"payload")))
        .unwrap()
    }

    async fn redirect_handler() -> crate::types::Response {
      hyper::Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header(LOCATION, "/target")
        .body(TakoBody::empty())
        .unwrap()
    }

    async fn redirect_target_handler() -> crate::types::Response {
      hyper::Response::builder()
        .status(StatusCode::OK)
        .header(ETAG, "target-etag")
        .body(TakoBody::from(Bytes::from_static(b"final")))
        .unwrap()
    }

    async fn spawn_upstream() -> SocketAddr {
      let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
      let addr = listener.local_addr().unwrap();

      let mut router = Router::new();
      router.route(Method::GET, "/data", conditional_handler);
      router.route(Method::GET, "/redirect", redirect_handler);
      router.route(Method::GET, "/target", redirect_target_handler);

      tokio::spawn(crate::serve(listener, router));
      addr
    }

    /// Scenario 5: a second `get` for the same path reuses the entry cached from
    /// the first call once the upstream answers `304`, instead of erroring or
    /// returning an empty body.
    #[tokio::test]
    async fn get_reuses_cached_body_on_304() {
      let addr = spawn_upstream().await;
      let cache = CacheStore::with_broker(SignalArbiter::new());
      let mut session = CachingSession::connect("127.0.0.1", Some(addr.port()), cache)
        .await
        .unwrap();

      let first = session.get("/data").await.unwrap();
      assert_eq!(&first[..], b"payload");

      let second = session.get("/data").await.unwrap();
      assert_eq!(&second[..], b"payload");
    }

    /// Scenario 7: a `303 See Other` is followed transparently, and the body
    /// returned to the caller is the redirect target's, not the redirect itself.
    #[tokio::test]
    async fn get_follows_a_303_redirect_to_its_target() {
      let addr = spawn_upstream().await;
      let cache = CacheStore::with_broker(SignalArbiter::new());
      let mut session = CachingSession::connect("127.0.0.1", Some(addr.port()), cache)
        .await
        .unwrap();

      let body = session.get("/redirect").await.unwrap();
      assert_eq!(&body[..], b"final");
    }
  }
}

pub use caching_session::CachingSession;
