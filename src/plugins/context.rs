//! Plugin installing ambient identity context from an inbound request's headers.
//!
//! Without this, [`RequestContext::current`](crate::context::RequestContext::current)
//! is always the empty default — nothing in the request pipeline ever builds one from
//! a live request. Registering [`ContextPlugin`] wraps every dispatch in
//! `RequestContext::from_headers_tracking(...).scope(...)`, so handlers and the
//! [`crate::client::CachingSession`] outbound client see whichever `x-user`/`x-role`
//! the edge set, for the lifetime of that request's task.

use anyhow::Result;

use crate::{config::CacheConfig, context::RequestContext, plugins::TakoPlugin, router::Router};

/// Installs [`RequestContext`] as global middleware, scoped per request.
#[derive(Clone)]
pub struct ContextPlugin {
  tracked_headers: Vec<String>,
}

impl ContextPlugin {
  /// Tracks the default header names ([`crate::context::TRACKED_HEADERS`]).
  pub fn new() -> Self {
    Self::from_config(&CacheConfig::default())
  }

  /// Tracks whichever header names `config.tracked_headers` lists, letting a
  /// deployment widen or narrow the default allow-list via `TAKO_CACHE_TRACKED_HEADERS`.
  pub fn from_config(config: &CacheConfig) -> Self {
    Self {
      tracked_headers: config.tracked_headers.clone(),
    }
  }
}

impl Default for ContextPlugin {
  fn default() -> Self {
    Self::new()
  }
}

impl TakoPlugin for ContextPlugin {
  fn name(&self) -> &'static str {
    "ContextPlugin"
  }

  fn setup(&self, router: &Router) -> Result<()> {
    let tracked_headers = self.tracked_headers.clone();
    router.middleware(move |req, next| {
      let ctx = RequestContext::from_headers_tracking(&tracked_headers, req.headers());
      async move { ctx.scope(next.run(req)).await }
    });
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn setup_registers_middleware_without_error() {
    let mut router = Router::new();
    let plugin = ContextPlugin::new();
    assert!(plugin.setup(&router).is_ok());
    router.plugin(plugin);
  }

  /// `router.dispatch` takes a `hyper::Request<hyper::body::Incoming>`, which has no
  /// public constructor outside a real connection — so this drives the assertion over
  /// an actual loopback connection rather than a hand-built request.
  #[tokio::test]
  async fn dispatch_exposes_tracked_headers_to_the_handler() {
    use http_body_util::{BodyExt, Empty};
    use hyper::client::conn::http1 as client_http1;
    use hyper_util::rt::TokioIo;
    use tokio::net::{TcpListener, TcpStream};

    async fn whoami() -> &'static str {
      assert_eq!(RequestContext::current().get("x-user"), Some("alice"));
      "ok"
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut router = Router::new();
    router.route(hyper::Method::GET, "/", whoami);
    let plugin = ContextPlugin::new();
    plugin.setup(&router).unwrap();

    tokio::spawn(crate::serve(listener, router));

    let stream = TcpStream::connect(addr).await.unwrap();
    let io = TokioIo::new(stream);
    let (mut sender, conn) = client_http1::handshake(io).await.unwrap();
    tokio::spawn(async move {
      let _ = conn.await;
    });

    let req = hyper::Request::builder()
      .method(hyper::Method::GET)
      .uri("/")
      .header("host", "localhost")
      .header("x-user", "alice")
      .body(Empty::<bytes::Bytes>::new())
      .unwrap();

    let resp = sender.send_request(req).await.unwrap();
    assert_eq!(resp.status(), http::StatusCode::OK);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ok");
  }
}
