mod metrics;
mod models;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{FixedOffset, Utc};
use common::db::{self, AsyncDb};
use common::types::FundId;
use metrics_exporter_prometheus::PrometheusHandle;
use models::{CompareQuery, ErrorBody, FreshnessView, WatchlistChange};
use pipeline::cache::ResultCache;
use pipeline::compare;
use pipeline::compose::ComposeParams;
use pipeline::freshness;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub db: AsyncDb,
    pub cache: ResultCache,
    pub params: ComposeParams,
    pub offset: FixedOffset,
    pub prometheus: PrometheusHandle,
}

enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Internal(e) => {
                tracing::error!(error = %e, "api request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
            }
        };
        ::metrics::counter!(
            "fundtrend_web_api_errors_total",
            "status" => status.as_u16().to_string(),
        )
        .increment(1);
        (status, Json(ErrorBody { error })).into_response()
    }
}

type ApiResult = std::result::Result<Response, ApiError>;

// --- Handlers ---

async fn healthz() -> impl IntoResponse {
    "ok"
}

async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.prometheus.run_upkeep();
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus.render(),
    )
}

async fn trends(State(state): State<Arc<AppState>>) -> ApiResult {
    let table = state.cache.trend_table(&state.db, &state.params).await?;
    Ok(Json(table.as_ref()).into_response())
}

async fn significant_dates(State(state): State<Arc<AppState>>) -> ApiResult {
    let changes = state
        .cache
        .significant_dates(&state.db, &state.params.index_name)
        .await?;
    Ok(Json(changes.as_slice()).into_response())
}

async fn freshness_view(State(state): State<Arc<AppState>>) -> ApiResult {
    let today = freshness::today_in(Utc::now(), state.offset);
    let (latest, last_fetch) = state
        .db
        .call_named("web.freshness", |conn| {
            Ok((db::latest_report_date(conn)?, db::last_fetch_date(conn)?))
        })
        .await?;
    let gate = freshness::check(latest, today);
    Ok(Json(FreshnessView {
        today,
        latest_report_date: latest,
        last_fetch_date: last_fetch,
        fetch_needed: gate.fetch_needed,
    })
    .into_response())
}

async fn compare_dates(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CompareQuery>,
) -> ApiResult {
    let dates = query.parse_dates().map_err(ApiError::BadRequest)?;
    let limit = query.limit.unwrap_or(state.params.top_k);
    let cmp = state
        .db
        .call_named("web.compare", move |conn| {
            compare::compare_by_dates(conn, &dates, limit)
        })
        .await?;
    Ok(Json(cmp).into_response())
}

async fn list_watchlist(State(state): State<Arc<AppState>>) -> ApiResult {
    let entries = state
        .db
        .call_named("web.watchlist", |conn| Ok(db::watchlist(conn)?))
        .await?;
    Ok(Json(entries).into_response())
}

async fn pin_fund(State(state): State<Arc<AppState>>, Path(fund_id): Path<FundId>) -> ApiResult {
    let changed = state
        .db
        .call_named("web.watchlist_add", move |conn| {
            if db::fund_by_id(conn, fund_id)?.is_none() {
                return Ok(None);
            }
            Ok(Some(db::add_to_watchlist(conn, fund_id)?))
        })
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no fund with id {fund_id}")))?;
    state.cache.invalidate();
    tracing::info!(fund_id, changed, "fund pinned to watchlist");
    Ok(Json(WatchlistChange { fund_id, changed }).into_response())
}

async fn unpin_fund(State(state): State<Arc<AppState>>, Path(fund_id): Path<FundId>) -> ApiResult {
    let changed = state
        .db
        .call_named("web.watchlist_remove", move |conn| {
            Ok(db::remove_from_watchlist(conn, fund_id)?)
        })
        .await?;
    state.cache.invalidate();
    tracing::info!(fund_id, changed, "fund removed from watchlist");
    Ok(Json(WatchlistChange { fund_id, changed }).into_response())
}

// --- Router ---

pub fn create_router_with_state(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/trends", get(trends))
        .route("/significant-dates", get(significant_dates))
        .route("/freshness", get(freshness_view))
        .route("/compare", get(compare_dates))
        .route("/watchlist", get(list_watchlist))
        .route("/watchlist/{fund_id}", put(pin_fund).delete(unpin_fund));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = common::config::Config::load()?;

    let (dispatch, _otel_guard) =
        common::observability::build_dispatch("fundtrend-web", &config.general.log_level);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    let web_port = config.web.as_ref().map_or(8080, |w| w.port);
    let web_host = config
        .web
        .as_ref()
        .map_or("0.0.0.0".to_string(), |w| w.host.clone());

    let state = Arc::new(AppState {
        db: AsyncDb::open(&config.database.path).await?,
        cache: ResultCache::from_config(&config.cache),
        params: ComposeParams::from_config(&config),
        offset: config.fetch.offset(),
        prometheus: metrics::init_global()?,
    });

    let app = create_router_with_state(state);
    let addr: SocketAddr = format!("{web_host}:{web_port}").parse()?;
    tracing::info!(%addr, "fundtrend api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
