use crate::error::{map_store_error, AppError, AppResult};
use crate::pipeline::{IngestStats, StatsSnapshot};
use crate::rollup::{median, CascadeAggregator, Granularity};
use crate::store::AggregateStore;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const API_MESSAGE: &str =
    "Weather rollup API. Please provide placeId and type as query string.";
const INVALID_QUERY: &str = "Invalid placeId or type";

#[derive(Clone)]
pub struct HttpState<S> {
    pub store: S,
    pub stats: Arc<IngestStats>,
    pub cascade: Arc<CascadeAggregator>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RollupQuery {
    #[serde(default, rename = "placeId", alias = "locationId")]
    place_id: Option<String>,
    #[serde(default, rename = "type", alias = "granularity")]
    granularity: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationsResponse {
    message: &'static str,
    version: &'static str,
    available_place_id: Vec<String>,
}

#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupResponse {
    place_id: String,
    #[serde(rename = "type")]
    granularity: Granularity,
    temperature: Option<f64>,
    humidity: Option<f64>,
    samples: usize,
    no_data: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum QueryResponse {
    Locations(LocationsResponse),
    Rollup(RollupResponse),
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    stats: StatsSnapshot,
    tracked_locations: usize,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_status<S: AggregateStore>(State(state): State<HttpState<S>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        stats: state.stats.snapshot(),
        tracked_locations: state.cascade.location_count(),
    })
}

/// Median of every stored row for a place at one granularity, recomputed on each call.
/// Without both parameters it lists the places that have minute data.
async fn query_rollup<S: AggregateStore>(
    State(state): State<HttpState<S>>,
    Query(query): Query<RollupQuery>,
) -> AppResult<Json<QueryResponse>> {
    let place_id = query
        .place_id
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let granularity = query.granularity.as_deref().filter(|v| !v.is_empty());

    let (Some(place_id), Some(granularity)) = (place_id, granularity) else {
        let ids = state
            .store
            .distinct_location_ids(Granularity::Minute)
            .await
            .map_err(|err| map_store_error(err, Granularity::Minute))?;
        return Ok(Json(QueryResponse::Locations(LocationsResponse {
            message: API_MESSAGE,
            version: env!("CARGO_PKG_VERSION"),
            available_place_id: ids.into_iter().collect(),
        })));
    };

    let granularity: Granularity = granularity
        .parse()
        .map_err(|_| AppError::bad_request(INVALID_QUERY))?;

    let rows = state
        .store
        .query(granularity, place_id)
        .await
        .map_err(|err| map_store_error(err, granularity))?;

    let temperatures: Vec<f64> = rows.iter().map(|row| row.temperature).collect();
    let humidities: Vec<f64> = rows.iter().map(|row| row.humidity).collect();

    Ok(Json(QueryResponse::Rollup(RollupResponse {
        place_id: place_id.to_string(),
        granularity,
        temperature: median(&temperatures).ok(),
        humidity: median(&humidities).ok(),
        samples: rows.len(),
        no_data: rows.is_empty(),
    })))
}

pub fn router<S: AggregateStore>(state: HttpState<S>) -> Router {
    Router::new()
        .route("/", get(query_rollup::<S>))
        .route("/healthz", get(healthz))
        .route("/v1/status", get(get_status::<S>))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollup::Aggregate;
    use crate::store::MemoryAggregateStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn seeded_store() -> MemoryAggregateStore {
        let store = MemoryAggregateStore::new();
        for (place, t, h) in [("roof", 10.0, 40.0), ("roof", 20.0, 60.0), ("roof", 30.0, 50.0), ("cellar", 5.0, 90.0)] {
            store
                .persist(&Aggregate {
                    location_id: place.to_string(),
                    granularity: Granularity::Minute,
                    median_temperature: t,
                    median_humidity: h,
                    computed_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        store
    }

    fn app(store: MemoryAggregateStore) -> Router {
        router(HttpState {
            store,
            stats: Arc::new(IngestStats::new()),
            cascade: Arc::new(CascadeAggregator::new()),
        })
    }

    #[tokio::test]
    async fn lists_places_when_parameters_are_missing() {
        let store = seeded_store().await;
        for uri in ["/", "/?placeId=roof", "/?type=hour", "/?placeId=&type=hour"] {
            let (status, body) = get_json(app(store.clone()), uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["availablePlaceId"], serde_json::json!(["cellar", "roof"]));
            assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        }
    }

    #[tokio::test]
    async fn unknown_granularity_is_a_client_error() {
        let (status, body) = get_json(app(seeded_store().await), "/?placeId=roof&type=week").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], INVALID_QUERY);
    }

    #[tokio::test]
    async fn granularity_must_match_exactly() {
        let store = seeded_store().await;
        for uri in [
            "/?placeId=roof&type=HOUR",
            "/?placeId=roof&type=Minute",
            "/?placeId=roof&type=%20hour%20",
        ] {
            let (status, body) = get_json(app(store.clone()), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["error"], INVALID_QUERY);
        }
    }

    #[tokio::test]
    async fn returns_median_of_stored_rows_and_is_repeatable() {
        let store = seeded_store().await;
        let (status, first) = get_json(app(store.clone()), "/?placeId=roof&type=minute").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["placeId"], "roof");
        assert_eq!(first["type"], "minute");
        assert_eq!(first["temperature"], 20.0);
        assert_eq!(first["humidity"], 50.0);
        assert_eq!(first["samples"], 3);
        assert_eq!(first["noData"], false);

        let (_, second) = get_json(app(store), "/?locationId=roof&granularity=minute").await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_granularity_reports_no_data() {
        let (status, body) = get_json(app(seeded_store().await), "/?placeId=roof&type=year").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["noData"], true);
        assert_eq!(body["samples"], 0);
        assert!(body["temperature"].is_null());
        assert!(body["humidity"].is_null());
    }

    #[tokio::test]
    async fn status_reports_counters() {
        let (status, body) = get_json(app(MemoryAggregateStore::new()), "/v1/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["readings_accepted"], 0);
        assert_eq!(body["tracked_locations"], 0);
        assert_eq!(body["mqtt_connected"], false);
    }
}
