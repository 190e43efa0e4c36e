//! HTTP surface tests driven through the router with `oneshot`

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use pulse::api::{create_api_router, AppState};
use pulse::config::{ClientIpConfig, TrackingConfig};
use pulse::realtime::{ClientConfig, ClientHandle, Hub, MemoryPubSub, Publisher};
use pulse::storage::{CachedStorage, SqliteStorage, Storage};
use pulse::tracking::{ClientIpExtractor, Ingestor};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::{Layer, ServiceExt};
use uuid::Uuid;

/// Helper layer to inject ConnectInfo for tests
#[derive(Clone)]
struct TestConnectInfoLayer;

impl<S> Layer<S> for TestConnectInfoLayer {
    type Service = TestConnectInfoMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TestConnectInfoMiddleware { inner }
    }
}

#[derive(Clone)]
struct TestConnectInfoMiddleware<S> {
    inner: S,
}

impl<S, B> tower::Service<Request<B>> for TestConnectInfoMiddleware<S>
where
    S: tower::Service<Request<B>> + Clone,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let addr = SocketAddr::from(([203, 0, 113, 50], 40000));
        req.extensions_mut()
            .insert(axum::extract::connect_info::ConnectInfo(addr));
        self.inner.call(req)
    }
}

struct TestApp {
    router: Router,
    storage: Arc<dyn Storage>,
    hub: Hub,
    website_id: Uuid,
}

async fn setup() -> TestApp {
    let sqlite = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    sqlite.init().await.unwrap();
    let storage: Arc<dyn Storage> = Arc::new(sqlite);

    let website_id = Uuid::new_v4();
    storage
        .create_website(&website_id, "Blog", Some("blog.example"))
        .await
        .unwrap();

    let cached = Arc::new(CachedStorage::new(Arc::clone(&storage), 100, 60));
    let ingestor = Ingestor::new(
        Arc::clone(&storage),
        cached,
        Publisher::new(Arc::new(MemoryPubSub::new())),
        &TrackingConfig::default(),
    );

    let (hub, _task) = Hub::spawn(16);
    let state = Arc::new(AppState {
        ingestor: Arc::new(ingestor),
        hub: hub.clone(),
        client_ip: ClientIpExtractor::new(&ClientIpConfig::default()),
        realtime: ClientConfig {
            buffer: 8,
            heartbeat: Duration::from_secs(30),
        },
    });

    TestApp {
        router: create_api_router(state).layer(TestConnectInfoLayer),
        storage,
        hub,
        website_id,
    }
}

fn send_request(body: serde_json::Value, origin: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/send")
        .header("content-type", "application/json")
        .header(
            "user-agent",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
        );
    if let Some(origin) = origin {
        builder = builder.header("origin", origin);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = setup().await;
    let response = app
        .router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_send_pageview() {
    let app = setup().await;
    let body = serde_json::json!({
        "type": "event",
        "payload": {
            "website": app.website_id,
            "hostname": "blog.example",
            "url": "/posts/hello",
            "referrer": "https://news.example.org/front",
            "screen": "1920x1080",
            "language": "en-US"
        }
    });

    let response = app
        .router
        .oneshot(send_request(body, Some("https://blog.example")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["accepted"], true);
    assert!(json["session_id"].is_string());
    assert!(json["visit_id"].is_string());
    assert!(json.get("dropped").is_none());

    assert_eq!(app.storage.count_events(&app.website_id).await.unwrap(), 1);
    let session_id: Uuid = json["session_id"].as_str().unwrap().parse().unwrap();
    let session = app.storage.get_session(&session_id).await.unwrap().unwrap();
    assert_eq!(session.language.as_deref(), Some("en-US"));
    assert_eq!(session.device.as_deref(), Some("desktop"));
}

#[tokio::test]
async fn test_send_spam_referrer_is_acknowledged() {
    let app = setup().await;
    let body = serde_json::json!({
        "payload": {
            "website": app.website_id,
            "url": "/",
            "referrer": "http://darodar.com/"
        }
    });

    let response = app
        .router
        .oneshot(send_request(body, Some("https://blog.example")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["accepted"], true);
    assert_eq!(json["dropped"], "spam_referrer");
    assert_eq!(app.storage.count_events(&app.website_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_send_rejections() {
    let app = setup().await;

    let cases = vec![
        (
            serde_json::json!({ "payload": { "website": "nope" } }),
            Some("https://blog.example"),
            StatusCode::BAD_REQUEST,
        ),
        (
            serde_json::json!({ "payload": { "website": app.website_id } }),
            Some("https://elsewhere.example"),
            StatusCode::FORBIDDEN,
        ),
        (
            serde_json::json!({ "payload": { "website": Uuid::new_v4() } }),
            None,
            StatusCode::FORBIDDEN,
        ),
        (
            serde_json::json!({ "payload": { "website": app.website_id, "url": format!("/{}", "x".repeat(2001)) } }),
            None,
            StatusCode::PAYLOAD_TOO_LARGE,
        ),
        (
            serde_json::json!({ "payload": { "url": "/" } }),
            None,
            StatusCode::BAD_REQUEST,
        ),
    ];

    for (body, origin, expected) in cases {
        let response = app
            .router
            .clone()
            .oneshot(send_request(body.clone(), origin))
            .await
            .unwrap();
        assert_eq!(response.status(), expected, "body: {body}");
        let json = json_body(response).await;
        assert!(json["error"].is_string(), "body: {body}");
    }

    assert_eq!(app.storage.count_events(&app.website_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_send_idempotent_retry() {
    let app = setup().await;
    let body = serde_json::json!({
        "payload": {
            "website": app.website_id,
            "url": "/checkout",
            "id": Uuid::new_v4()
        }
    });

    let first = app
        .router
        .clone()
        .oneshot(send_request(body.clone(), None))
        .await
        .unwrap();
    assert!(json_body(first).await.get("idempotent").is_none());

    let retry = app.router.oneshot(send_request(body, None)).await.unwrap();
    assert_eq!(retry.status(), StatusCode::OK);
    assert_eq!(json_body(retry).await["idempotent"], true);

    assert_eq!(app.storage.count_events(&app.website_id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_realtime_stats_reports_hub_clients() {
    let app = setup().await;
    let (client, _rx) = ClientHandle::channel(4);
    app.hub.register(client).await;

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/realtime/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["clients"], 1);
}
