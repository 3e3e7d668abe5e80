use std::io::Cursor;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use foundation::math::Vec3;
use image::{ImageFormat, RgbaImage};
use parking_lot::Mutex;
use runtime::metrics::{
    DECODE_NS, LIGHT_REBUILD_NS, OBSERVATION_SWAP_NS, RENDER_NS, REQUESTS, REQUEST_ERRORS,
};
use runtime::Metrics;
use scene::{
    parse_tile_pair, parse_vec3, render_pooled, LightKind, RenderingRequest, RequestError,
    SceneError, ScenePool, TileSpec, DEFAULT_HOUR,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Notify;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub pool: ScenePool,
    pub config: Arc<Config>,
    pub metrics: Arc<Mutex<Metrics>>,
    /// Signalled when the engine fails; the server stops accepting requests.
    pub fatal: Arc<Notify>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::OPTIONS]);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/view/", get(view))
        .route("/api/v1/config/", get(client_config))
        .route("/api/v1/metrics/", get(metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}

/// Raw query of `/api/v1/view/`; every value is parsed by hand so malformed
/// input turns into a descriptive 400.
#[derive(Debug, Default, Deserialize)]
pub struct ViewQuery {
    pub tile: Option<String>,
    pub position: Option<String>,
    pub direction: Option<String>,
    pub up: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub samples: Option<String>,
    pub hour: Option<String>,
    pub light: Option<String>,
    pub observation: Option<String>,
}

fn number<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, RequestError> {
    raw.trim().parse().map_err(|_| RequestError::Number {
        name,
        value: raw.to_string(),
    })
}

fn vector(name: &'static str, raw: Option<&str>) -> Result<Vec3, RequestError> {
    parse_vec3(name, raw.ok_or(RequestError::Missing(name))?)
}

impl ViewQuery {
    pub fn into_request(self, default_observation: &str) -> Result<RenderingRequest, RequestError> {
        let (row, col) = match self.tile.as_deref() {
            Some(tile) => parse_tile_pair(tile)?,
            None => (TileSpec::whole(), TileSpec::whole()),
        };
        let width = self.width.as_deref().ok_or(RequestError::Missing("width"))?;
        let width = number::<u32>("width", width)?;
        let height = match self.height.as_deref() {
            Some(raw) => number::<u32>("height", raw)?,
            None => width,
        };
        let samples = self
            .samples
            .as_deref()
            .map(|raw| number::<u32>("samples", raw))
            .transpose()?;
        let hour = match self.hour.as_deref() {
            Some(raw) => number::<f64>("hour", raw)?,
            None => DEFAULT_HOUR,
        };
        let light = match self.light.as_deref() {
            Some(raw) => raw.parse::<LightKind>()?,
            None => LightKind::Distant,
        };

        let request = RenderingRequest {
            width,
            height,
            row,
            col,
            position: vector("position", self.position.as_deref())?,
            direction: vector("direction", self.direction.as_deref())?,
            up: vector("up", self.up.as_deref())?,
            observation: self
                .observation
                .unwrap_or_else(|| default_observation.to_string()),
            hour,
            light,
            samples,
        };
        request.validate()?;
        Ok(request)
    }
}

async fn view(State(state): State<AppState>, Query(query): Query<ViewQuery>) -> Response {
    state.metrics.lock().inc_counter(REQUESTS, 1);
    let default_observation = state.config.default_observation().unwrap_or_default().to_string();
    let request = match query.into_request(&default_observation) {
        Ok(request) => request,
        Err(err) => return reject(&state, StatusCode::BAD_REQUEST, err.to_string()),
    };

    let response = match render_pooled(&state.pool, request).await {
        Ok(response) => response,
        Err(err) if err.is_client_error() => {
            return reject(&state, StatusCode::BAD_REQUEST, err.to_string());
        }
        Err(SceneError::PoolClosed) => {
            return reject(&state, StatusCode::SERVICE_UNAVAILABLE, "shutting down".to_string());
        }
        Err(err) => {
            error!("render failed: {err}");
            state.fatal.notify_one();
            return reject(&state, StatusCode::INTERNAL_SERVER_ERROR, "render failed".to_string());
        }
    };

    {
        let timings = response.timings;
        let mut metrics = state.metrics.lock();
        metrics.record_duration(OBSERVATION_SWAP_NS, timings.observation);
        metrics.record_duration(LIGHT_REBUILD_NS, timings.lights);
        metrics.record_duration(RENDER_NS, timings.render);
        metrics.record_duration(DECODE_NS, timings.decode);
    }

    match encode_png(&response.image) {
        Ok(png) => {
            let mut headers = HeaderMap::new();
            headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
            (StatusCode::OK, headers, Body::from(png)).into_response()
        }
        Err(err) => {
            error!("png encoding failed: {err}");
            reject(&state, StatusCode::INTERNAL_SERVER_ERROR, "encoding failed".to_string())
        }
    }
}

fn reject(state: &AppState, status: StatusCode, message: String) -> Response {
    state.metrics.lock().inc_counter(REQUEST_ERRORS, 1);
    if status.is_client_error() {
        warn!(%status, "{message}");
    }
    (status, message).into_response()
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

async fn client_config(State(state): State<AppState>) -> Response {
    json_response(json!({ "map-data": state.config.client.map }))
}

async fn metrics(State(state): State<AppState>) -> Response {
    let snapshot = state.metrics.lock().snapshot();
    match serde_json::to_value(&snapshot) {
        Ok(value) => json_response(value),
        Err(err) => {
            error!("metrics serialization failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics error").into_response()
        }
    }
}

fn json_response(value: serde_json::Value) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    (StatusCode::OK, headers, Body::from(value.to_string())).into_response()
}

#[cfg(test)]
mod tests {
    use super::{client_config, metrics, view, AppState, ViewQuery};
    use crate::config::Config;
    use axum::body::to_bytes;
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::response::Response;
    use engine::{Device, Engine, HeadlessDevice};
    use formats::demo::write_demo_dataset;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use runtime::metrics::{RENDER_NS, REQUESTS, REQUEST_ERRORS};
    use runtime::Metrics;
    use scene::{
        teardown, warm_up, LightKind, Park, RequestError, SharedPark, SolarEphemeris, TileSpec,
    };
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::sync::Notify;

    fn temp_dir(label: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("sunrise_routes_{label}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    fn query(pairs: &[(&str, &str)]) -> ViewQuery {
        let mut q = ViewQuery::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "tile" => q.tile = value,
                "position" => q.position = value,
                "direction" => q.direction = value,
                "up" => q.up = value,
                "width" => q.width = value,
                "height" => q.height = value,
                "samples" => q.samples = value,
                "hour" => q.hour = value,
                "light" => q.light = value,
                "observation" => q.observation = value,
                other => panic!("unknown key {other}"),
            }
        }
        q
    }

    fn camera() -> Vec<(&'static str, &'static str)> {
        vec![
            ("position", "10,0,0"),
            ("direction", "-1,0,0"),
            ("up", "0,1,0"),
        ]
    }

    #[test]
    fn missing_values_take_their_defaults() {
        let mut pairs = camera();
        pairs.push(("width", "256"));
        let request = query(&pairs).into_request("0000172").unwrap();
        assert_eq!((request.width, request.height), (256, 256));
        assert_eq!((request.row, request.col), (TileSpec::whole(), TileSpec::whole()));
        assert_eq!(request.hour, 12.0);
        assert_eq!(request.light, LightKind::Distant);
        assert_eq!(request.observation, "0000172");
        assert_eq!(request.samples, None);
    }

    #[test]
    fn explicit_values_are_parsed() {
        let mut pairs = camera();
        pairs.extend([
            ("tile", "1 of 3,2 of 4"),
            ("width", "128"),
            ("height", "64"),
            ("samples", "8"),
            ("hour", "6.5"),
            ("light", "sunSky"),
            ("observation", "0000341"),
        ]);
        let request = query(&pairs).into_request("0000172").unwrap();
        assert_eq!(request.row, TileSpec::new(1, 3).unwrap());
        assert_eq!(request.col, TileSpec::new(2, 4).unwrap());
        assert_eq!((request.width, request.height), (128, 64));
        assert_eq!(request.samples, Some(8));
        assert_eq!(request.hour, 6.5);
        assert_eq!(request.light, LightKind::SunSky);
        assert_eq!(request.observation, "0000341");
    }

    #[test]
    fn malformed_values_are_request_errors() {
        assert_eq!(
            query(&camera()).into_request("a").unwrap_err(),
            RequestError::Missing("width")
        );

        let mut pairs = camera();
        pairs.extend([("width", "4"), ("tile", "3 of 2,0 of 1")]);
        assert!(matches!(
            query(&pairs).into_request("a"),
            Err(RequestError::Tile(_))
        ));

        let mut pairs = camera();
        pairs.extend([("width", "4"), ("light", "flash")]);
        assert!(matches!(
            query(&pairs).into_request("a"),
            Err(RequestError::Light(_))
        ));

        let pairs = [("width", "4"), ("position", "1,2"), ("direction", "1,0,0"), ("up", "0,1,0")];
        assert!(matches!(
            query(&pairs).into_request("a"),
            Err(RequestError::Vector { name: "position", .. })
        ));

        let mut pairs = camera();
        pairs.push(("width", "0"));
        assert_eq!(
            query(&pairs).into_request("a").unwrap_err(),
            RequestError::EmptyImage
        );

        let mut pairs = camera();
        pairs.extend([("width", "100000"), ("height", "4")]);
        assert_eq!(
            query(&pairs).into_request("a").unwrap_err(),
            RequestError::Oversized {
                width: 100_000,
                height: 4
            }
        );

        let mut pairs = camera();
        pairs.extend([("width", "4"), ("hour", "1e12")]);
        assert!(matches!(
            query(&pairs).into_request("a"),
            Err(RequestError::Number { name: "hour", .. })
        ));
    }

    struct Harness {
        headless: Arc<HeadlessDevice>,
        engine: Engine,
        park: SharedPark,
        state: AppState,
        root: PathBuf,
    }

    fn harness(label: &str) -> Harness {
        let root = temp_dir(label);
        write_demo_dataset(&root, 4, &["a", "b"]).expect("write dataset");

        let mut config = Config::default();
        config.scene.root = root.clone();
        config.server.observations = vec!["a".to_string(), "b".to_string()];
        config.server.pool_size = 1;
        config.client.map = serde_json::json!({ "center": [40.0, -111.0] });
        config.validate().unwrap();

        let headless = Arc::new(HeadlessDevice::new());
        let device: Arc<dyn Device> = headless.clone();
        let engine = Engine::init(device, &config.renderer.modules).unwrap();
        let mut park = Park::new(engine.device(), config.park_layout());
        park.make().unwrap();
        let park = park.shared();
        let pool = warm_up(
            &engine,
            &park,
            Arc::new(SolarEphemeris),
            &config.scene_settings(),
            config.server.pool_size,
        )
        .unwrap();

        let state = AppState {
            pool,
            config: Arc::new(config),
            metrics: Arc::new(Mutex::new(Metrics::new())),
            fatal: Arc::new(Notify::new()),
        };
        Harness {
            headless,
            engine,
            park,
            state,
            root,
        }
    }

    async fn finish(h: Harness) {
        teardown(&h.state.pool, &h.park).await;
        h.engine.shutdown();
        assert_eq!(h.headless.live_objects(), 0);
        let _ = fs::remove_dir_all(&h.root);
    }

    async fn body(response: Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    fn tile_query(extra: &[(&'static str, &'static str)]) -> ViewQuery {
        let mut pairs = camera();
        pairs.extend([("tile", "0 of 1,1 of 2"), ("width", "4"), ("height", "2")]);
        pairs.extend_from_slice(extra);
        query(&pairs)
    }

    #[tokio::test]
    async fn view_returns_the_cropped_tile_as_png() {
        let h = harness("view");
        let response = view(State(h.state.clone()), Query(tile_query(&[]))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[http::header::CONTENT_TYPE],
            "image/png"
        );

        let png = body(response).await;
        let image = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(image.dimensions(), (4, 2));
        assert_eq!(image.get_pixel(0, 0).0, [143, 64, 10, 255]);

        let metrics = h.state.metrics.lock().clone();
        assert_eq!(metrics.counter(REQUESTS), 1);
        assert_eq!(metrics.counter(REQUEST_ERRORS), 0);
        assert_eq!(metrics.histogram(RENDER_NS).map(|h| h.count), Some(1));
        finish(h).await;
    }

    #[tokio::test]
    async fn view_swaps_to_the_requested_observation() {
        let h = harness("swap");
        assert_eq!(h.park.read().bound_id(), Some("a"));
        let response = view(
            State(h.state.clone()),
            Query(tile_query(&[("observation", "b")])),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.park.read().bound_id(), Some("b"));
        finish(h).await;
    }

    #[tokio::test]
    async fn client_mistakes_are_bad_requests() {
        let h = harness("bad");
        let response = view(State(h.state.clone()), Query(tile_query(&[("hour", "noon")]))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let message = String::from_utf8(body(response).await).unwrap();
        assert!(message.contains("hour"), "{message}");

        let response = view(
            State(h.state.clone()),
            Query(tile_query(&[("observation", "zzz")])),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let metrics = h.state.metrics.lock().clone();
        assert_eq!(metrics.counter(REQUESTS), 2);
        assert_eq!(metrics.counter(REQUEST_ERRORS), 2);
        assert_eq!(h.park.read().bound_id(), Some("a"));
        finish(h).await;
    }

    /// Whether `fatal` holds a pending notification.
    async fn fatal_pending(fatal: &Notify) -> bool {
        tokio::select! {
            biased;
            _ = fatal.notified() => true,
            _ = std::future::ready(()) => false,
        }
    }

    #[tokio::test]
    async fn unrenderable_sizes_and_hours_do_not_stop_the_server() {
        let h = harness("limits");
        for extra in [
            [("hour", "1000000000000"), ("samples", "1")],
            [("width", "100000"), ("samples", "1")],
            [("width", "4294967295"), ("height", "1")],
        ] {
            let response = view(State(h.state.clone()), Query(tile_query(&extra))).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
        assert!(!fatal_pending(&h.state.fatal).await);

        let response = view(State(h.state.clone()), Query(tile_query(&[]))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let metrics = h.state.metrics.lock().clone();
        assert_eq!(metrics.counter(REQUESTS), 4);
        assert_eq!(metrics.counter(REQUEST_ERRORS), 3);
        finish(h).await;
    }

    #[tokio::test]
    async fn closed_pool_is_unavailable() {
        let h = harness("closed");
        let scenes = h.state.pool.close().await;
        let response = view(State(h.state.clone()), Query(tile_query(&[]))).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        for mut scene in scenes {
            scene.close();
        }
        finish(h).await;
    }

    #[tokio::test]
    async fn config_and_metrics_are_json() {
        let h = harness("json");
        let response = client_config(State(h.state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(value, serde_json::json!({ "map-data": { "center": [40.0, -111.0] } }));

        h.state.metrics.lock().inc_counter(REQUESTS, 3);
        let response = metrics(State(h.state.clone())).await;
        let value: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(value["counters"]["requests"], 3);
        finish(h).await;
    }
}
