use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::ready;

use http::HeaderValue;
use http::Request;
use http::Response;
use http::header::SET_COOKIE;
use pin_project_lite::pin_project;
use tower::Service;

use visitor_limit::Reason;
use visitor_limit::RequestGate;

use crate::cookie::HeaderJar;
use crate::error::GateError;

/// Gates every request through a [`RequestGate`].
///
/// Admitted requests reach the inner service with their
/// [`Identity`](visitor_limit::Identity) in the request extensions. Denied
/// requests never reach it; they are answered with a 429 built by
/// [`GateError::to_response`]. A newly issued identity cookie is attached to
/// either response.
#[derive(Debug)]
pub struct VisitorLimitService<S> {
    inner: S,
    gate: Arc<RequestGate>,
}

impl<S> VisitorLimitService<S> {
    pub fn new(inner: S, gate: Arc<RequestGate>) -> Self {
        Self { inner, gate }
    }

    pub fn gate(&self) -> &Arc<RequestGate> {
        &self.gate
    }
}

impl<S> Clone for VisitorLimitService<S>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            gate: Arc::clone(&self.gate),
        }
    }
}

pin_project! {
    /// Response future of [`VisitorLimitService`].
    pub struct ResponseFuture<F, B> {
        #[pin]
        kind: Kind<F, B>,
        set_cookie: Option<HeaderValue>,
    }
}

pin_project! {
    #[project = KindProj]
    enum Kind<F, B> {
        Admitted {
            #[pin]
            future: F,
        },
        Denied {
            response: Option<Response<B>>,
        },
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<B>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let mut response = match this.kind.project() {
            KindProj::Admitted { future } => ready!(future.poll(cx))?,
            KindProj::Denied { response } => response
                .take()
                .expect("ResponseFuture polled after completion"),
        };

        if let Some(cookie) = this.set_cookie.take() {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
        Poll::Ready(Ok(response))
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for VisitorLimitService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: From<String>,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Gating happens per request in `call`; readiness is the inner service's.
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let mut jar = HeaderJar::new(req.headers());
        let outcome = self.gate.check(&mut jar);
        let set_cookie = jar.into_set_cookie();

        let kind = match outcome.decision {
            ControlFlow::Continue(()) => {
                req.extensions_mut().insert(outcome.identity);
                Kind::Admitted {
                    future: self.inner.call(req),
                }
            }
            ControlFlow::Break(Reason::RateLimited { retry_after }) => Kind::Denied {
                response: Some(GateError::RateLimited { retry_after }.to_response()),
            },
        };

        ResponseFuture { kind, set_cookie }
    }
}
