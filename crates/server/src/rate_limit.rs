//! Rate limiting middleware for HTTP requests.
//!
//! Classifies each inbound request into an identifier and asks the limiter
//! for an admission decision. A request carrying a non-empty `API_KEY`
//! header is limited by that token; token-based limiting always takes
//! precedence, so a caller never draws from both the token and the IP
//! allowance on one request. Everything else is limited by client IP.

use std::{
    fmt::Display,
    future::Future,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{body::Body, extract::ConnectInfo};
use http::{Request, Response, StatusCode, header::CONTENT_TYPE};
use rate_limit::RateLimiter;
use tower::Layer;

/// Header selecting token-based limiting when present and non-empty.
const TOKEN_HEADER: &str = "API_KEY";

/// Body sent with every 429 response.
const DENY_BODY: &str = concat!(
    r#"{"error": "Rate limit exceeded", "#,
    r#""message": "you have reached the maximum number of requests or actions allowed within a certain time frame"}"#,
);

#[derive(Clone)]
pub struct RateLimitLayer(Arc<RateLimiter>);

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self(limiter)
    }
}

impl<Service> Layer<Service> for RateLimitLayer
where
    Service: Send + Clone,
{
    type Service = RateLimitService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        RateLimitService {
            next,
            limiter: self.0.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<Service> {
    next: Service,
    limiter: Arc<RateLimiter>,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for RateLimitService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = http::Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let limiter = self.limiter.clone();

        Box::pin(async move {
            let decision = match access_token(&req) {
                Some(token) => limiter.check_token(&token).await,
                None => limiter.check_ip(&client_ip(&req)).await,
            };

            match decision {
                Ok(true) => next.call(req).await,
                Ok(false) => Ok(deny_response()),
                Err(err) => {
                    // A storage failure is never an implicit allow or deny.
                    log::error!("Rate limit storage failure: {err}");
                    Ok(storage_failure_response())
                }
            }
        })
    }
}

/// Extract a non-empty access token from the request, if one is present.
fn access_token<B>(req: &Request<B>) -> Option<String> {
    let token = req.headers().get(TOKEN_HEADER)?.to_str().ok()?;

    if token.is_empty() {
        return None;
    }

    Some(token.to_string())
}

/// Derive the client IP identifier for a request.
///
/// The first entry of X-Forwarded-For wins and is trusted verbatim; there is
/// no validation that the upstream is a trusted proxy. Without the header the
/// transport-level peer address is used.
fn client_ip<B>(req: &Request<B>) -> String {
    if let Some(forwarded_for) = req.headers().get("x-forwarded-for")
        && let Ok(value) = forwarded_for.to_str()
        && let Some(first) = value.split(',').next()
        && !first.trim().is_empty()
    {
        return first.trim().to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|connect_info| connect_info.0.ip().to_string())
        .unwrap_or_default()
}

fn deny_response() -> Response<Body> {
    http::Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(DENY_BODY))
        .unwrap()
}

fn storage_failure_response() -> Response<Body> {
    http::Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(CONTENT_TYPE, "text/plain")
        .body(Body::from("Internal server error"))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{Router, routing::get};
    use config::{RateLimitConfig, RateLimitQuota, RedisConfig, StorageBackend, StorageConfig};
    use rate_limit::{MemoryStorage, RedisStorage, Storage};
    use tower::ServiceExt;

    use super::*;

    fn test_app(ip_limit: u32, token_limit: u32) -> Router {
        app_with_storage(ip_limit, token_limit, Storage::Memory(MemoryStorage::new()))
    }

    fn app_with_storage(ip_limit: u32, token_limit: u32, storage: Storage) -> Router {
        let config = RateLimitConfig {
            ip: RateLimitQuota {
                limit: ip_limit,
                window: Duration::from_secs(300),
            },
            token: RateLimitQuota {
                limit: token_limit,
                window: Duration::from_secs(300),
            },
            block_duration: Duration::from_secs(300),
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                ..StorageConfig::default()
            },
        };

        let limiter = RateLimiter::with_storage(&config, storage);

        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(RateLimitLayer::new(Arc::new(limiter)))
    }

    fn request(headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/");

        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let mut req = builder.body(Body::empty()).unwrap();

        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));

        req
    }

    #[tokio::test]
    async fn ip_limit_allows_then_denies() {
        let app = test_app(3, 100);

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(request(&[("x-forwarded-for", "192.168.1.1")]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(request(&[("x-forwarded-for", "192.168.1.1")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["error"], "Rate limit exceeded");
        assert_eq!(
            json["message"],
            "you have reached the maximum number of requests or actions allowed within a certain time frame"
        );
    }

    #[tokio::test]
    async fn token_limit_allows_then_denies() {
        let app = test_app(100, 5);

        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(request(&[("API_KEY", "test-token")]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.oneshot(request(&[("API_KEY", "test-token")])).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn token_takes_precedence_over_ip() {
        // The IP allowance is exhausted; the token path must be unaffected.
        let app = test_app(1, 100);

        let response = app
            .clone()
            .oneshot(request(&[("x-forwarded-for", "10.1.1.1")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request(&[("x-forwarded-for", "10.1.1.1")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        for _ in 0..10 {
            let response = app
                .clone()
                .oneshot(request(&[("x-forwarded-for", "10.1.1.1"), ("API_KEY", "abc")]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn empty_token_header_falls_back_to_ip() {
        let app = test_app(1, 100);

        let response = app
            .clone()
            .oneshot(request(&[("API_KEY", ""), ("x-forwarded-for", "10.2.2.2")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request(&[("API_KEY", ""), ("x-forwarded-for", "10.2.2.2")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn forwarded_for_uses_first_entry() {
        let app = test_app(1, 100);

        let response = app
            .clone()
            .oneshot(request(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Same leading entry, different chain tail: same identifier.
        let response = app
            .oneshot(request(&[("x-forwarded-for", "203.0.113.7, 172.16.0.9")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn peer_address_used_without_forwarded_for() {
        let app = test_app(1, 100);

        let response = app.clone().oneshot(request(&[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(request(&[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn storage_failure_returns_500_without_forwarding() {
        // Nothing listens on port 1, so every storage call fails.
        let redis_config = RedisConfig {
            url: "redis://127.0.0.1:1/0".to_string(),
            ..RedisConfig::default()
        };
        let storage = Storage::Redis(RedisStorage::connect_lazy(&redis_config).unwrap());

        let app = app_with_storage(100, 100, storage);

        let response = app
            .oneshot(request(&[("x-forwarded-for", "10.4.4.4")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "text/plain");

        // The handler never ran; the body is the failure text, not "ok".
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"Internal server error");
    }

    #[tokio::test]
    async fn different_ips_are_limited_separately() {
        let app = test_app(1, 100);

        let response = app
            .clone()
            .oneshot(request(&[("x-forwarded-for", "10.3.3.3")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request(&[("x-forwarded-for", "10.3.3.4")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
