//! HTTP interception: `Cookie` header rewrite and `Set-Cookie` capture.
//!
//! Two synchronous chokepoints serve from in-memory state only. Before the
//! engine is `Ready`, both pass requests through untouched: injecting stale
//! cookies during startup would be worse than injecting none. Interception
//! failures never fail the underlying request: malformed URLs pass through
//! with a warning, malformed cookies are skipped.

use std::task::{Context, Poll};

use futures::{future::BoxFuture, FutureExt};
use http::{header, HeaderMap, HeaderValue, Request, Response};
use tower::{Layer, Service};
use url::Url;

use seshmux_core::{
    cookie::{parse_set_cookie, serialize_cookie_header},
    time as clock,
};

use crate::{binding::TabId, engine::Engine, util, util::ErrorExt};

impl Engine {
    /// Request-phase chokepoint: replaces the `Cookie` header with the bound
    /// identity's matching cookies. Unbound tabs and non-http(s) URLs pass
    /// through.
    pub fn rewrite_request(&self, tab: TabId, url: &str, headers: &mut HeaderMap) {
        if !self.is_ready() {
            return;
        }
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(url, error = %err, "malformed request URL; passing through");
                return;
            }
        };
        let Some((host, path)) = util::http_host_path(&parsed) else {
            return;
        };

        let now = clock::now();
        let header_value = {
            let mut state = self.inner.state.lock();
            let Some(identity) = state.bindings.get(tab) else {
                return;
            };
            state
                .trail
                .record(&host, identity, now, self.inner.config.trail_freshness);
            state.registry.touch(identity, now);
            let Some(ident) = state.registry.get(identity) else {
                return;
            };
            serialize_cookie_header(ident.jar.match_cookies(&host, &path, now))
        };

        headers.remove(header::COOKIE);
        if header_value.is_empty() {
            return;
        }
        match HeaderValue::try_from(header_value) {
            Ok(value) => {
                headers.insert(header::COOKIE, value);
            }
            Err(err) => {
                error!(error = %err.display_chain(), "cookie header rejected; sending none");
            }
        }
    }

    /// Response-phase chokepoint: captures every `Set-Cookie` into the bound
    /// identity's jar and strips them from the delivered headers, so the
    /// host's global cookie store never sees them.
    pub fn capture_response(&self, tab: TabId, url: &str, headers: &mut HeaderMap) {
        if !self.is_ready() {
            return;
        }
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(url, error = %err, "malformed response URL; passing through");
                return;
            }
        };
        if util::http_host_path(&parsed).is_none() {
            return;
        }

        let set_cookies: Vec<String> = headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_owned)
            .collect();
        if set_cookies.is_empty() {
            return;
        }

        let now = clock::now();
        let mut state = self.inner.state.lock();
        let Some(identity) = state.bindings.get(tab) else {
            return;
        };
        let Some(ident) = state.registry.get_mut(identity) else {
            return;
        };

        let mut stored_any = false;
        for value in &set_cookies {
            match parse_set_cookie(value, Some(&parsed), now) {
                Ok(cookie) => {
                    stored_any |= ident.jar.insert(cookie, now);
                }
                Err(err) if err.is_security_block() => {
                    warn!(
                        identity = %identity,
                        value,
                        error = %err,
                        "cross-domain set-cookie rejected"
                    );
                }
                Err(err) => {
                    debug!(value, error = %err, "set-cookie skipped");
                }
            }
        }
        ident.last_accessed_at = now;
        drop(state);

        headers.remove(header::SET_COOKIE);
        if stored_any {
            self.inner.persist.debounced();
        }
    }
}

/// Request extension identifying the originating tab. The host's integration
/// inserts it before the interceptor runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TabHandle(pub TabId);

/// A layer applying the engine's interception around an inner service.
///
/// Requests are expected in absolute form (as a proxy sees them) and carry a
/// [`TabHandle`] extension; requests without one pass through untouched.
#[derive(Clone)]
pub struct InterceptLayer {
    engine: Engine,
}

impl InterceptLayer {
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        InterceptLayer { engine }
    }
}

impl<S> Layer<S> for InterceptLayer {
    type Service = Intercept<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Intercept {
            inner,
            engine: self.engine.clone(),
        }
    }
}

/// The service produced by [`InterceptLayer`].
#[derive(Clone)]
pub struct Intercept<S> {
    inner: S,
    engine: Engine,
}

impl<ReqBody, ResBody, S> Service<Request<ReqBody>> for Intercept<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let tab = req.extensions().get::<TabHandle>().copied();
        let url = req.uri().to_string();

        if let Some(TabHandle(tab)) = tab {
            self.engine.rewrite_request(tab, &url, req.headers_mut());
        }

        let fut = self.inner.call(req);
        let engine = self.engine.clone();

        async move {
            let mut response = fut.await?;
            if let Some(TabHandle(tab)) = tab {
                engine.capture_response(tab, &url, response.headers_mut());
            }
            Ok(response)
        }
        .boxed()
    }
}
