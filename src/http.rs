//! axum `Router` and handlers, bit-exact to the HTTP surface table.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::TraceLayer,
};

use crate::cache_control::tile_cache_headers;
use crate::cachekey::full_tile_key;
use crate::error::{Result, TileServerError};
use crate::mvt::MvtBuilder;
use crate::pgpool::PostgresPool;
use crate::schema::{Config, Layer, View};
use crate::tilecache::TileCache;
use crate::write::{ChangeType, ImpactedTiles, WritePath};

pub struct AppState {
    pub config: Config,
    pub pool: PostgresPool,
    pub cache: TileCache,
    pub root_url: String,
    pub max_zoom: u8,
}

pub type SharedState = Arc<AppState>;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .route("/layer/{layer}/mvt/{view}/", get(layer_mvt))
        .route("/tile/{layer}/{view}/{z}/{x}/{y}/", get(get_tile))
        .route("/push/{layer}/{change}/", post(push))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_headers([header::ACCEPT, header::CONTENT_TYPE])
                .allow_origin(tower_http::cors::Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS]),
        )
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

fn layer_or_404<'a>(config: &'a Config, layer: &str) -> Result<&'a Layer> {
    config
        .layers
        .get(layer)
        .ok_or_else(|| TileServerError::NotFoundError(format!("unknown layer {layer:?}")))
}

fn view_or_404<'a>(layer: &'a Layer, view: &str) -> Result<&'a View> {
    layer
        .views
        .get(view)
        .ok_or_else(|| TileServerError::NotFoundError(format!("unknown view {view:?}")))
}

async fn health(State(state): State<SharedState>) -> Result<StatusCode> {
    let conn = state.pool.get().await?;
    conn.query_one("SELECT 1", &[]).await?;
    state.cache.ping().await?;
    Ok(StatusCode::OK)
}

#[derive(Serialize)]
struct LayerInfo {
    name: String,
    description: String,
    versioned: bool,
    views: Vec<String>,
}

#[derive(Serialize)]
struct InfoResponse {
    #[serde(flatten)]
    named: HashMap<String, InfoBody>,
}

#[derive(Serialize)]
struct InfoBody {
    layers: Vec<LayerInfo>,
}

async fn info(State(state): State<SharedState>) -> Json<InfoResponse> {
    let layers = state
        .config
        .layers
        .values()
        .map(|layer| LayerInfo {
            name: layer.name.clone(),
            description: layer.description.clone().unwrap_or_default(),
            versioned: true,
            views: layer.views.keys().cloned().collect(),
        })
        .collect();

    let mut named = HashMap::new();
    named.insert(state.config.name.clone(), InfoBody { layers });
    Json(InfoResponse { named })
}

#[derive(serde::Deserialize)]
struct VersionQuery {
    #[serde(default)]
    version: String,
}

#[derive(Serialize)]
struct TileJson {
    #[serde(rename = "type")]
    kind: &'static str,
    name: String,
    #[serde(rename = "promoteId")]
    promote_id: HashMap<String, String>,
    scheme: &'static str,
    tiles: Vec<String>,
    attribution: String,
    minzoom: u8,
    maxzoom: u8,
}

async fn layer_mvt(
    State(state): State<SharedState>,
    Path((layer_name, view_name)): Path<(String, String)>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<TileJson>> {
    let layer = layer_or_404(&state.config, &layer_name)?;
    view_or_404(layer, &view_name)?;

    let tile_url = format!(
        "{}/tile/{}/{}/{{z}}/{{x}}/{{y}}/?version={}",
        state.root_url,
        layer_name,
        view_name,
        urlencoding::encode(&query.version)
    );

    let mut promote_id = HashMap::new();
    promote_id.insert(layer_name.clone(), layer.id_field.clone());

    Ok(Json(TileJson {
        kind: "vector",
        name: layer_name,
        promote_id,
        scheme: "xyz",
        tiles: vec![tile_url],
        attribution: layer.attribution.clone().unwrap_or_default(),
        minzoom: 0,
        maxzoom: state.max_zoom,
    }))
}

struct ProtobufResponse(Vec<u8>);

impl IntoResponse for ProtobufResponse {
    fn into_response(self) -> Response {
        (
            [(header::CONTENT_TYPE, "application/x-protobuf")],
            [(header::CACHE_CONTROL, tile_cache_headers())],
            self.0,
        )
            .into_response()
    }
}

async fn get_tile(
    State(state): State<SharedState>,
    Path((layer_name, view_name, z, x, y)): Path<(String, String, u8, u32, u32)>,
    Query(query): Query<VersionQuery>,
) -> Result<ProtobufResponse> {
    let layer = layer_or_404(&state.config, &layer_name)?;
    let view = view_or_404(layer, &view_name)?;

    let key = full_tile_key(
        &layer_name,
        &view_name,
        &query.version,
        crate::tilemath::AffectedTile { z, x, y },
    );

    if let Some(cached) = state.cache.get(&key).await? {
        return Ok(ProtobufResponse(cached));
    }

    let conn = state.pool.get().await?;
    let bytes = MvtBuilder::render_tile(&conn, layer, view, z, x, y, &query.version).await?;
    state
        .cache
        .put(&key, &bytes, view.cache_duration_seconds)
        .await?;

    Ok(ProtobufResponse(bytes))
}

#[derive(Serialize)]
struct PushResponse {
    impacted_tiles: HashMap<String, Vec<Value>>,
}

async fn push(
    State(state): State<SharedState>,
    Path((layer_name, change)): Path<(String, String)>,
    Query(query): Query<VersionQuery>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<PushResponse>)> {
    let layer = layer_or_404(&state.config, &layer_name)?;
    let conn = state.pool.get().await?;

    let impacted = if change == "truncate" {
        WritePath::truncate(&conn, &state.cache, layer, &query.version).await?
    } else {
        let change_type = match change.as_str() {
            "insert" => ChangeType::Insert,
            "update" => ChangeType::Update,
            "delete" => ChangeType::Delete,
            other => {
                return Err(TileServerError::validation(format!(
                    "unknown change type {other:?}, expected insert, update, delete, or truncate"
                )))
            }
        };
        let rows = body
            .as_array()
            .ok_or_else(|| TileServerError::validation("push body must be a JSON array"))?
            .clone();
        WritePath::apply(
            &conn,
            &state.cache,
            layer,
            &query.version,
            change_type,
            rows,
            state.max_zoom,
        )
        .await?
    };

    let impacted_tiles = match impacted {
        ImpactedTiles::Tiles(per_view) => per_view
            .into_iter()
            .map(|(view, tiles)| {
                let json_tiles = tiles
                    .into_iter()
                    .map(|t| serde_json::json!({ "z": t.z, "x": t.x, "y": t.y }))
                    .collect();
                (view, json_tiles)
            })
            .collect(),
        ImpactedTiles::Wildcard(views) => views
            .into_iter()
            .map(|view| (view, vec![Value::String("*".to_string())]))
            .collect(),
    };

    Ok((
        StatusCode::CREATED,
        Json(PushResponse { impacted_tiles }),
    ))
}
