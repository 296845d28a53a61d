use std::convert::Infallible;
use std::sync::Arc;
use std::sync::Mutex;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use http::Request;
use http::Response;
use http::StatusCode;
use http::header::COOKIE;
use http::header::RETRY_AFTER;
use http::header::SET_COOKIE;
use quanta::Clock;
use tower::Layer;
use tower::Service;
use tower::ServiceExt;
use visitor_limit::DenyPolicy;
use visitor_limit::Identity;
use visitor_limit::LimiterConfig;
use visitor_limit::RequestGate;

use super::*;

use futures::future::Ready;
use futures::future::ready;

#[derive(Clone, Default)]
struct MockService {
    pub seen: Arc<Mutex<Vec<Option<Identity>>>>,
}

impl MockService {
    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl Service<Request<()>> for MockService {
    type Response = Response<String>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<()>) -> Self::Future {
        self.seen
            .lock()
            .unwrap()
            .push(req.extensions().get::<Identity>().cloned());
        ready(Ok(Response::new("ok".to_string())))
    }
}

fn mocked_gate(config: LimiterConfig) -> (Arc<RequestGate>, Arc<quanta::Mock>) {
    let (clock, mock) = Clock::mock();
    (Arc::new(RequestGate::with_clock(config, clock).unwrap()), mock)
}

fn request(cookie: Option<&str>) -> Request<()> {
    let mut builder = Request::builder().uri("/api/message");
    if let Some(token) = cookie {
        builder = builder.header(COOKIE, format!("rate_limit_id={token}"));
    }
    builder.body(()).unwrap()
}

// The token from a `Set-Cookie: rate_limit_id=<token>; ...` header.
fn issued_token(response: &Response<String>) -> Option<String> {
    let value = response.headers().get(SET_COOKIE)?.to_str().ok()?;
    let (pair, _) = value.split_once(';')?;
    pair.strip_prefix("rate_limit_id=").map(str::to_string)
}

#[tokio::test]
async fn new_visitor_is_admitted_and_issued_one_cookie() {
    let (gate, _mock) = mocked_gate(LimiterConfig::default());
    let inner = MockService::default();
    let mut svc = VisitorLimitLayer::new(gate).layer(inner.clone());

    let response = svc.ready().await.unwrap().call(request(None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get_all(SET_COOKIE).iter().count(), 1);

    let token = issued_token(&response).expect("identity cookie");
    let seen = inner.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].as_ref().map(Identity::as_str), Some(token.as_str()));
}

#[tokio::test]
async fn returning_visitor_gets_no_cookie() {
    let (gate, mock) = mocked_gate(LimiterConfig::default());
    let mut svc = VisitorLimitLayer::new(gate).layer(MockService::default());

    let first = svc.ready().await.unwrap().call(request(None)).await.unwrap();
    let token = issued_token(&first).unwrap();

    mock.increment(Duration::from_secs(2));
    let second = svc
        .ready()
        .await
        .unwrap()
        .call(request(Some(&token)))
        .await
        .unwrap();

    assert_eq!(second.status(), StatusCode::OK);
    assert!(second.headers().get(SET_COOKIE).is_none());
}

#[tokio::test]
async fn over_limit_visitor_is_short_circuited() {
    let (gate, _mock) = mocked_gate(LimiterConfig::default());
    let inner = MockService::default();
    let mut svc = VisitorLimitLayer::new(gate).layer(inner.clone());

    let first = svc.ready().await.unwrap().call(request(None)).await.unwrap();
    let token = issued_token(&first).unwrap();

    for k in 1..=3u64 {
        let denied = svc
            .ready()
            .await
            .unwrap()
            .call(request(Some(&token)))
            .await
            .unwrap();

        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(denied.headers().get(SET_COOKIE).is_none());
        // Each denial keeps its reserved slot, so the wait grows by one interval.
        assert_eq!(
            denied.headers()[RETRY_AFTER],
            (2 * (k + 1)).to_string().as_str()
        );

        let body: RateLimitBody = serde_json::from_str(denied.body()).unwrap();
        assert_eq!(body.retry_after_ms, 2000 * (k + 1));
    }

    assert_eq!(inner.calls(), 1, "denied requests must not reach the inner service");
}

#[tokio::test]
async fn refund_policy_follows_the_refill_clock() {
    let config = LimiterConfig::default().with_deny_policy(DenyPolicy::Refund);
    let (gate, mock) = mocked_gate(config);
    let mut svc = VisitorLimitLayer::new(gate).layer(MockService::default());

    let first = svc.ready().await.unwrap().call(request(None)).await.unwrap();
    let token = issued_token(&first).unwrap();

    let mut retry_ms = Vec::new();
    for _ in 0..2 {
        mock.increment(Duration::from_millis(500));
        let denied = svc
            .ready()
            .await
            .unwrap()
            .call(request(Some(&token)))
            .await
            .unwrap();
        let body: RateLimitBody = serde_json::from_str(denied.body()).unwrap();
        retry_ms.push(body.retry_after_ms);
    }
    assert_eq!(retry_ms, vec![1500, 1000]);

    mock.increment(Duration::from_secs(1));
    let admitted = svc
        .ready()
        .await
        .unwrap()
        .call(request(Some(&token)))
        .await
        .unwrap();
    assert_eq!(admitted.status(), StatusCode::OK);
}

#[tokio::test]
async fn waiting_out_retry_after_is_admitted() {
    for policy in [DenyPolicy::Reserve, DenyPolicy::Refund] {
        let config = LimiterConfig::default().with_deny_policy(policy);
        let (gate, mock) = mocked_gate(config);
        let mut svc = VisitorLimitLayer::new(gate).layer(MockService::default());

        let first = svc.ready().await.unwrap().call(request(None)).await.unwrap();
        let token = issued_token(&first).unwrap();

        mock.increment(Duration::from_millis(300));
        let denied = svc
            .ready()
            .await
            .unwrap()
            .call(request(Some(&token)))
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        let body: RateLimitBody = serde_json::from_str(denied.body()).unwrap();

        mock.increment(Duration::from_millis(body.retry_after_ms));
        let retried = svc
            .ready()
            .await
            .unwrap()
            .call(request(Some(&token)))
            .await
            .unwrap();
        assert_eq!(retried.status(), StatusCode::OK, "{policy:?}");
    }
}

#[tokio::test]
async fn malformed_cookie_is_replaced() {
    let (gate, _mock) = mocked_gate(LimiterConfig::default());
    let mut svc = VisitorLimitLayer::new(gate).layer(MockService::default());

    let req = Request::builder()
        .header(COOKIE, "rate_limit_id=%%%")
        .body(())
        .unwrap();
    let response = svc.ready().await.unwrap().call(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(issued_token(&response).is_some());
}

#[tokio::test]
async fn test_shared_state_across_clones() {
    let (gate, _mock) = mocked_gate(LimiterConfig::default());
    let layer = VisitorLimitLayer::new(gate);

    let mut svc1 = layer.layer(MockService::default());
    let mut svc2 = layer.layer(MockService::default());

    let first = svc1.ready().await.unwrap().call(request(None)).await.unwrap();
    let token = issued_token(&first).unwrap();

    // svc2 must see the unit svc1 consumed.
    let second = svc2
        .ready()
        .await
        .unwrap()
        .call(request(Some(&token)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(layer.gate().store().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_hammer_same_visitor() {
    let (gate, _mock) = mocked_gate(LimiterConfig::default());
    let inner = MockService::default();
    let svc = VisitorLimitLayer::new(gate.clone()).layer(inner.clone());

    let token = Identity::generate().to_string();

    let mut handles = vec![];
    for _ in 0..100 {
        let mut svc = svc.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            svc.ready()
                .await
                .unwrap()
                .call(request(Some(&token)))
                .await
                .unwrap()
                .status()
        }));
    }

    let mut admitted = 0;
    let mut denied = 0;
    for h in handles {
        match h.await.expect("Task panicked") {
            StatusCode::OK => admitted += 1,
            StatusCode::TOO_MANY_REQUESTS => denied += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(admitted, 1, "one visitor, one unit, frozen clock");
    assert_eq!(denied, 99);
    assert_eq!(inner.calls(), 1);
    assert_eq!(gate.store().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_new_visitors() {
    let (gate, _mock) = mocked_gate(LimiterConfig::default());
    let svc = VisitorLimitLayer::new(gate.clone()).layer(MockService::default());

    let mut handles = vec![];
    for _ in 0..50 {
        let mut svc = svc.clone();
        handles.push(tokio::spawn(async move {
            svc.ready().await.unwrap().call(request(None)).await.unwrap()
        }));
    }

    let mut tokens = std::collections::HashSet::new();
    for h in handles {
        let response = h.await.expect("Task panicked");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(tokens.insert(issued_token(&response).unwrap()));
    }

    assert_eq!(tokens.len(), 50);
    assert_eq!(gate.store().len(), 50);
}

#[tokio::test]
async fn test_poll_ready_passes_through_backpressure() {
    let (gate, _mock) = mocked_gate(LimiterConfig::default());
    let layer = VisitorLimitLayer::new(gate);

    let (mut svc, mut handle) =
        tower_test::mock::spawn_with::<Request<()>, Response<String>, _, _>(|mock| {
            layer.layer(mock)
        });

    handle.allow(0);
    assert!(svc.poll_ready().is_pending());

    handle.allow(1);
    assert!(matches!(svc.poll_ready(), Poll::Ready(Ok(()))));

    let response = svc.call(request(None));
    let (forwarded, send) = handle.next_request().await.expect("request forwarded");
    assert!(forwarded.extensions().get::<Identity>().is_some());
    send.send_response(Response::new("ok".to_string()));

    let response = response.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(SET_COOKIE).is_some());
}
