//! GET-only ETag caching middleware (the cache core's component C).
//!
//! Wraps a handler chain with a SHA-1 ETag computed over the buffered response body.
//! A client that already holds the current ETag (via `If-None-Match`) gets a bare
//! `304 Not Modified`; everyone else gets the full response, with the entry stored
//! in the backing [`CacheStore`] for next time. Only `GET` responses with status
//! `200 OK` are cached; everything else passes through untouched.

use bytes::{Bytes, BytesMut};
use http::{HeaderValue, Method, StatusCode, header::{ETAG, IF_NONE_MATCH}};
use http_body_util::BodyExt;
use sha1::{Digest, Sha1};

use crate::{
  body::TakoBody,
  cache::{CacheEntry, CacheStore},
  middleware::Next,
  types::{BoxError, Request, Response},
};

/// Buffers a response body frame by frame, tracking how far along the collection
/// has gotten.
///
/// The states mirror the lifecycle of a streamed response as it is drained into
/// memory: nothing has been read yet (`Idle`), the first frame has arrived
/// (`Started`), more than one frame has arrived (`Streaming`), and the body is
/// fully collected (`Complete`). Only a `Complete` sink yields its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
  Idle,
  Started,
  Streaming,
  Complete,
}

struct ResponseSink {
  state: SinkState,
  buffer: BytesMut,
}

impl ResponseSink {
  fn new() -> Self {
    Self {
      state: SinkState::Idle,
      buffer: BytesMut::new(),
    }
  }

  fn push(&mut self, chunk: Bytes) {
    self.buffer.extend_from_slice(&chunk);
    self.state = match self.state {
      SinkState::Idle => SinkState::Started,
      SinkState::Started | SinkState::Streaming => SinkState::Streaming,
      SinkState::Complete => SinkState::Complete,
    };
  }

  fn finish(mut self) -> Bytes {
    self.state = SinkState::Complete;
    self.buffer.freeze()
  }
}

async fn buffer_body(mut body: TakoBody) -> Result<Bytes, BoxError> {
  let mut sink = ResponseSink::new();
  while let Some(frame) = body.frame().await {
    let frame = frame?;
    if let Ok(data) = frame.into_data() {
      sink.push(data);
    }
  }
  Ok(sink.finish())
}

fn sha1_etag(body: &[u8]) -> String {
  let digest = Sha1::digest(body);
  let mut hex = String::with_capacity(digest.len() * 2);
  for byte in digest {
    hex.push_str(&format!("{byte:02x}"));
  }
  hex
}

fn not_modified(entry: &CacheEntry) -> Response {
  let mut resp = hyper::Response::builder().status(StatusCode::NOT_MODIFIED);
  *resp.headers_mut().unwrap() = entry.headers.clone();
  resp.body(TakoBody::empty()).unwrap()
}

/// Wires a [`CacheStore`] into a handler chain as ETag caching middleware.
///
/// `GET` requests carrying a matching `If-None-Match` are short-circuited to a
/// `304`; all other `GET` responses with status `200` are buffered, given an ETag,
/// and stored. Non-`GET` requests and non-`200` responses pass through untouched.
#[derive(Clone)]
pub struct EtagCache {
  store: CacheStore,
}

impl EtagCache {
  /// Creates ETag caching middleware backed by `store`.
  pub fn new(store: CacheStore) -> Self {
    Self { store }
  }

  /// Runs the caching logic around `next`.
  pub async fn handle(&self, req: Request, next: Next) -> Response {
    if req.method() != Method::GET {
      return next.run(req).await;
    }

    let path = req.uri().path().to_string();
    let if_none_match = req
      .headers()
      .get(IF_NONE_MATCH)
      .and_then(|v| v.to_str().ok())
      .map(str::to_string);

    let lookup_key = self.store.key_for(&path, req.headers());
    if let Some(inm) = if_none_match.as_deref() {
      if let Some(entry) = self.store.get(&lookup_key) {
        if inm == entry.etag || inm == "*" {
          return not_modified(&entry);
        }
      }
    }

    let req_headers = req.headers().clone();
    let resp = next.run(req).await;
    if resp.status() != StatusCode::OK {
      return resp;
    }

    let (mut parts, body) = resp.into_parts();
    let body_bytes = match buffer_body(body).await {
      Ok(bytes) => bytes,
      Err(_) => return hyper::Response::from_parts(parts, TakoBody::empty()),
    };

    let etag = sha1_etag(&body_bytes);
    parts
      .headers
      .insert(ETAG, HeaderValue::from_str(&etag).unwrap_or_else(|_| HeaderValue::from_static("")));

    // `vary()` also hands back an `InvalidationScope`; this generic middleware has no
    // domain knowledge of which events should evict this entry, so it drops the scope
    // unused. Handlers that need targeted invalidation call `CacheStore::vary` themselves
    // and chain `.on(filter)` before returning, which registers against the same key.
    if let Some((key, _scope)) = self.store.vary(&path, &req_headers, &mut parts.headers) {
      self.store.store(
        key,
        CacheEntry {
          etag,
          headers: parts.headers.clone(),
          body: body_bytes.clone(),
        },
      );
    }

    hyper::Response::from_parts(parts, TakoBody::from(body_bytes))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sink_reaches_complete_only_through_finish() {
    let mut sink = ResponseSink::new();
    assert_eq!(sink.state, SinkState::Idle);
    sink.push(Bytes::from_static(b"a"));
    assert_eq!(sink.state, SinkState::Started);
    sink.push(Bytes::from_static(b"b"));
    assert_eq!(sink.state, SinkState::Streaming);
    let bytes = sink.finish();
    assert_eq!(&bytes[..], b"ab");
  }

  #[test]
  fn sha1_etag_is_stable_for_same_body() {
    let a = sha1_etag(b"hello");
    let b = sha1_etag(b"hello");
    assert_eq!(a, b);
    assert_ne!(a, sha1_etag(b"world"));
  }

  async fn empty_body_handler() -> &'static str {
    "[]"
  }

  /// Drives a request through `EtagCache::handle` the only way a real `Request`
  /// (`hyper::Request<Incoming>`) can be produced: over an actual loopback
  /// connection, with the router dispatching through `serve`.
  async fn send(addr: std::net::SocketAddr, if_none_match: Option<&str>) -> (StatusCode, Option<String>, Vec<u8>) {
    use http_body_util::{BodyExt, Empty};
    use hyper::client::conn::http1 as client_http1;
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpStream;

    let stream = TcpStream::connect(addr).await.unwrap();
    let io = TokioIo::new(stream);
    let (mut sender, conn) = client_http1::handshake(io).await.unwrap();
    tokio::spawn(async move {
      let _ = conn.await;
    });

    let mut builder = hyper::Request::builder().method(Method::GET).uri("/projects").header("host", "localhost");
    if let Some(inm) = if_none_match {
      builder = builder.header(IF_NONE_MATCH, inm);
    }
    let req = builder.body(Empty::<Bytes>::new()).unwrap();

    let resp = sender.send_request(req).await.unwrap();
    let status = resp.status();
    let etag = resp.headers().get(ETAG).and_then(|v| v.to_str().ok()).map(str::to_string);
    let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, etag, body)
  }

  #[tokio::test]
  async fn warm_get_then_refresh() {
    use crate::router::Router;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut router = Router::new();
    router.route(Method::GET, "/projects", empty_body_handler);
    let etag_cache = EtagCache::new(CacheStore::with_broker(crate::signals::SignalArbiter::new()));
    router.middleware(move |req, next| {
      let etag_cache = etag_cache.clone();
      async move { etag_cache.handle(req, next).await }
    });

    tokio::spawn(crate::serve(listener, router));

    let (status, etag, body) = send(addr, None).await;
    assert_eq!(status, StatusCode::OK);
    let etag = etag.expect("ETag header on a fresh 200");
    assert_eq!(etag, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    assert_eq!(&body[..], b"[]");

    let (status, _, body) = send(addr, Some(&etag)).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);
    assert!(body.is_empty());
  }
}
