use crate::enrich::enrich;
use crate::feed;
use crate::realtime::{FeedKind, FetchError};
use crate::state::AppState;
use serde::Serialize;
use std::convert::Infallible;
use std::str::FromStr;
use std::string::FromUtf8Error;
use std::sync::Arc;
use thiserror::Error;
use warp::http::StatusCode;
use warp::reply::{Reply, Response};
use warp::ws::Ws;
use warp::{Filter, Rejection};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("static data not ready")]
    NotReady,
    #[error("Error fetching GTFS-RT: {0}")]
    Fetch(#[from] FetchError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Fetch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Reply for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        warp::reply::with_status(warp::reply::json(&body), self.status()).into_response()
    }
}

fn reply(result: Result<Response, ApiError>) -> Response {
    result.unwrap_or_else(Reply::into_response)
}

fn json<T: Serialize + ?Sized>(value: &T) -> Response {
    warp::reply::json(&value).into_response()
}

fn ensure_ready(state: &AppState) -> Result<(), ApiError> {
    if state.store.is_ready() {
        Ok(())
    } else {
        Err(ApiError::NotReady)
    }
}

fn list_routes(state: &AppState) -> Result<Response, ApiError> {
    ensure_ready(state)?;
    Ok(json(state.store.routes().all()))
}

fn route_by_id(state: &AppState, id: &str) -> Result<Response, ApiError> {
    ensure_ready(state)?;
    let routes = state.store.routes();
    routes.get(id).map(json).ok_or(ApiError::NotFound("route"))
}

fn list_stops(state: &AppState) -> Result<Response, ApiError> {
    ensure_ready(state)?;
    Ok(json(state.store.stops().all()))
}

fn stop_by_id(state: &AppState, id: &str) -> Result<Response, ApiError> {
    ensure_ready(state)?;
    let stops = state.store.stops();
    stops.get(id).map(json).ok_or(ApiError::NotFound("stop"))
}

fn list_trips(state: &AppState) -> Result<Response, ApiError> {
    ensure_ready(state)?;
    Ok(json(state.store.trips().all()))
}

fn trip_by_id(state: &AppState, id: &str) -> Result<Response, ApiError> {
    ensure_ready(state)?;
    let trips = state.store.trips();
    trips.get(id).map(json).ok_or(ApiError::NotFound("trip"))
}

fn shape_by_id(state: &AppState, id: &str) -> Result<Response, ApiError> {
    ensure_ready(state)?;
    let shapes = state.store.shapes();
    shapes.points(id).map(json).ok_or(ApiError::NotFound("shape"))
}

fn stop_times_for_trip(state: &AppState, trip_id: &str) -> Result<Response, ApiError> {
    ensure_ready(state)?;
    let stop_times = state.store.stop_times();
    stop_times
        .for_trip(trip_id)
        .map(json)
        .ok_or(ApiError::NotFound("stop times"))
}

fn stop_time_at_stop(state: &AppState, trip_id: &str, stop_id: &str) -> Result<Response, ApiError> {
    ensure_ready(state)?;
    let stop_times = state.store.stop_times();
    stop_times
        .at_stop(trip_id, stop_id)
        .map(json)
        .ok_or(ApiError::NotFound("stop time"))
}

async fn realtime(state: &AppState, kind: FeedKind) -> Result<Response, ApiError> {
    let feed = state.fetcher.fetch(kind).await?;
    Ok(match kind {
        FeedKind::Alerts => json(&feed::alerts(&feed)),
        FeedKind::TripUpdates => json(&feed::trip_updates(&feed)),
        FeedKind::VehiclePositions => json(&feed::vehicle_positions(&feed)),
    })
}

async fn vehicle_position_detail(state: &AppState) -> Result<Response, ApiError> {
    ensure_ready(state)?;
    let feed = state.fetcher.fetch(FeedKind::VehiclePositions).await?;
    Ok(json(&enrich(&feed, &state.store.view())))
}

fn status(state: &AppState) -> Response {
    json(&serde_json::json!({
        "ready": state.store.is_ready(),
        "tables": state.store.outcomes(),
    }))
}

/// A path parameter with its percent-escapes decoded.
struct Segment(String);

impl FromStr for Segment {
    type Err = FromUtf8Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        urlencoding::decode(raw).map(|decoded| Segment(decoded.into_owned()))
    }
}

fn with_state(
    state: Arc<AppState>,
) -> impl Filter<Extract = (Arc<AppState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Every HTTP and websocket route the service exposes.
pub fn routes(
    state: Arc<AppState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let s = with_state(state);

    let routes_all = warp::path!("gtfs" / "routes")
        .and(s.clone())
        .map(|st: Arc<AppState>| reply(list_routes(&st)));
    let route_one = warp::path!("gtfs" / "routes" / Segment)
        .and(s.clone())
        .map(|Segment(id): Segment, st: Arc<AppState>| reply(route_by_id(&st, &id)));
    let stops_all = warp::path!("gtfs" / "stops")
        .and(s.clone())
        .map(|st: Arc<AppState>| reply(list_stops(&st)));
    let stop_one = warp::path!("gtfs" / "stops" / Segment)
        .and(s.clone())
        .map(|Segment(id): Segment, st: Arc<AppState>| reply(stop_by_id(&st, &id)));
    let trips_all = warp::path!("gtfs" / "trips")
        .and(s.clone())
        .map(|st: Arc<AppState>| reply(list_trips(&st)));
    let trip_one = warp::path!("gtfs" / "trips" / Segment)
        .and(s.clone())
        .map(|Segment(id): Segment, st: Arc<AppState>| reply(trip_by_id(&st, &id)));
    let shape = warp::path!("gtfs" / "shapes" / Segment)
        .and(s.clone())
        .map(|Segment(id): Segment, st: Arc<AppState>| reply(shape_by_id(&st, &id)));
    let trip_stop_times = warp::path!("gtfs" / "stoptimes" / "trip" / Segment)
        .and(s.clone())
        .map(|Segment(trip_id): Segment, st: Arc<AppState>| {
            reply(stop_times_for_trip(&st, &trip_id))
        });
    let trip_stop_time = warp::path!("gtfs" / "stoptimes" / "trip" / Segment / "stop" / Segment)
        .and(s.clone())
        .map(|Segment(trip_id): Segment, Segment(stop_id): Segment, st: Arc<AppState>| {
            reply(stop_time_at_stop(&st, &trip_id, &stop_id))
        });
    let gtfs_status = warp::path!("gtfs" / "status")
        .and(s.clone())
        .map(|st: Arc<AppState>| status(&st));

    let alerts = warp::path!("gtfs" / "alerts")
        .and(s.clone())
        .then(|st: Arc<AppState>| async move { reply(realtime(&st, FeedKind::Alerts).await) });
    let trip_updates = warp::path!("gtfs" / "tripupdates")
        .and(s.clone())
        .then(|st: Arc<AppState>| async move {
            reply(realtime(&st, FeedKind::TripUpdates).await)
        });
    let vehicle_positions = warp::path!("gtfs" / "vehiclepositions")
        .and(s.clone())
        .then(|st: Arc<AppState>| async move {
            reply(realtime(&st, FeedKind::VehiclePositions).await)
        });
    let vehicle_detail = warp::path!("gtfs" / "vehicleposition" / "detail")
        .and(s.clone())
        .then(|st: Arc<AppState>| async move { reply(vehicle_position_detail(&st).await) });

    let ws = warp::path!("ws")
        .and(warp::ws())
        .and(s.clone())
        .map(|upgrade: Ws, st: Arc<AppState>| {
            let hub = st.hub.clone();
            upgrade
                .on_upgrade(move |socket| hub.serve_socket(socket))
                .into_response()
        });
    let ws_clients = warp::path!("ws" / "clients")
        .and(s)
        .map(|st: Arc<AppState>| {
            json(&serde_json::json!({ "connected_clients": st.hub.connection_count() }))
        });

    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["Origin", "Content-Length", "Content-Type", "Authorization"])
        .allow_methods(vec!["GET"]);

    warp::get()
        .and(
            routes_all
                .or(route_one)
                .unify()
                .or(stops_all)
                .unify()
                .or(stop_one)
                .unify()
                .or(trips_all)
                .unify()
                .or(trip_one)
                .unify()
                .or(shape)
                .unify()
                .or(trip_stop_times)
                .unify()
                .or(trip_stop_time)
                .unify()
                .or(gtfs_status)
                .unify()
                .or(alerts)
                .unify()
                .or(trip_updates)
                .unify()
                .or(vehicle_positions)
                .unify()
                .or(vehicle_detail)
                .unify()
                .or(ws)
                .unify()
                .or(ws_clients)
                .unify(),
        )
        .with(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs_types::NumericPolicy;
    use crate::hub::{Hub, LogObserver, WsEvent};
    use crate::ingest::Ingestor;
    use crate::realtime::{FeedUrls, RealtimeFetcher};
    use crate::static_data::IndexStore;
    use crate::test_support::{Recorder, write_tables};
    use gtfs_realtime as rt;
    use prost::Message as _;
    use serde_json::Value;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn vehicle_feed() -> Vec<u8> {
        rt::FeedMessage {
            header: rt::FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                ..Default::default()
            },
            entity: vec![rt::FeedEntity {
                id: "6505".to_string(),
                vehicle: Some(rt::VehiclePosition {
                    trip: Some(rt::TripDescriptor {
                        trip_id: Some("113279870".to_string()),
                        ..Default::default()
                    }),
                    stop_id: Some("S2".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }],
        }
        .encode_to_vec()
    }

    async fn upstream() -> SocketAddr {
        let vehicles = warp::path!("rt" / "VehiclePosition.pb").map(vehicle_feed);
        let alerts = warp::path!("rt" / "Alerts.pb").then(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Vec::<u8>::new()
        });
        let (addr, server) =
            warp::serve(vehicles.or(alerts)).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        addr
    }

    async fn state(ingest: bool) -> Arc<AppState> {
        let addr = upstream().await;
        let store = Arc::new(IndexStore::new());
        if ingest {
            let dir = tempfile::tempdir().unwrap();
            write_tables(dir.path());
            Ingestor::new(dir.path().to_path_buf(), NumericPolicy::Lenient, store.clone())
                .run()
                .await;
        }
        let fetcher = RealtimeFetcher::with_timeout(
            FeedUrls::from_base(&format!("http://{}/rt", addr)),
            Duration::from_millis(200),
        );
        Arc::new(AppState::new(store, fetcher, Hub::start(Arc::new(LogObserver))))
    }

    async fn get(state: &Arc<AppState>, path: &str) -> (StatusCode, Value) {
        let res = warp::test::request()
            .method("GET")
            .path(path)
            .reply(&routes(state.clone()))
            .await;
        let body = serde_json::from_slice(res.body()).unwrap_or(Value::Null);
        (res.status(), body)
    }

    #[tokio::test]
    async fn test_stop_lookup_and_not_found() {
        let st = state(true).await;

        let (code, body) = get(&st, "/gtfs/stops/S2").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["stop_id"], "S2");
        assert_eq!(body["stop_lat"], 40.1);

        let (code, body) = get(&st, "/gtfs/stops/S9").await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(body, serde_json::json!({ "error": "stop not found" }));

        let (code, body) = get(&st, "/gtfs/stops").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_path_parameters_are_percent_decoded() {
        let st = state(true).await;

        let (code, body) = get(&st, "/gtfs/stops/S%32").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["stop_id"], "S2");

        let (code, body) = get(&st, "/gtfs/stoptimes/trip/11327987%30/stop/S%31").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["stop_sequence"], 1);

        assert_eq!("A%20B".parse::<Segment>().unwrap().0, "A B");
    }

    #[tokio::test]
    async fn test_index_endpoints_before_ready() {
        let st = state(false).await;
        let (code, body) = get(&st, "/gtfs/routes").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "static data not ready");

        let (_, body) = get(&st, "/gtfs/status").await;
        assert_eq!(body["ready"], false);
    }

    #[tokio::test]
    async fn test_routes_trips_and_shapes() {
        let st = state(true).await;

        let (code, body) = get(&st, "/gtfs/routes/101E").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["route_type"], 0);

        let (code, body) = get(&st, "/gtfs/trips/113279870").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["shape_id"], "1339658");

        let (code, body) = get(&st, "/gtfs/shapes/1339658").await;
        assert_eq!(code, StatusCode::OK);
        let seqs: Vec<u64> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["shape_pt_sequence"].as_u64().unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2]);

        let (code, body) = get(&st, "/gtfs/shapes/nope").await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "shape not found");
    }

    #[tokio::test]
    async fn test_stop_time_endpoints() {
        let st = state(true).await;

        let (code, body) = get(&st, "/gtfs/stoptimes/trip/113279870").await;
        assert_eq!(code, StatusCode::OK);
        let stops: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["stop_id"].as_str().unwrap())
            .collect();
        assert_eq!(stops, vec!["S1", "S2"]);

        let (code, body) = get(&st, "/gtfs/stoptimes/trip/113279870/stop/S2").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["arrival_time"], "05:02:00");

        let (code, _) = get(&st, "/gtfs/stoptimes/trip/113279870/stop/S9").await;
        assert_eq!(code, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_vehicle_detail_is_enriched() {
        let st = state(true).await;
        let (code, body) = get(&st, "/gtfs/vehicleposition/detail").await;
        assert_eq!(code, StatusCode::OK);

        let pos = &body[0];
        assert_eq!(pos["route_id"], "0");
        assert_eq!(pos["trip_details"]["trip_headsign"], "Union Station");
        assert_eq!(pos["stop_details"]["stop_name"], "Broadway & 3rd Ave");
        assert!(pos["route_details"].is_null());

        let (code, body) = get(&st, "/gtfs/vehiclepositions").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body[0]["vehicle"]["trip"]["trip_id"], "113279870");
    }

    #[tokio::test]
    async fn test_realtime_timeout_is_500() {
        let st = state(true).await;
        let (code, body) = get(&st, "/gtfs/alerts").await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            body["error"]
                .as_str()
                .unwrap()
                .starts_with("Error fetching GTFS-RT: GTFS-RT feed timed out")
        );
    }

    #[tokio::test]
    async fn test_upstream_missing_feed_is_500() {
        let st = state(true).await;
        let (code, body) = get(&st, "/gtfs/tripupdates").await;
        assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["error"],
            "Error fetching GTFS-RT: failed to fetch GTFS-RT feed: bad response status: 404"
        );
    }

    #[tokio::test]
    async fn test_status_reports_tables() {
        let st = state(true).await;
        let (code, body) = get(&st, "/gtfs/status").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["ready"], true);
        assert_eq!(body["tables"].as_array().unwrap().len(), 5);
    }

    async fn next_event(client: &mut warp::test::WsClient) -> WsEvent {
        let msg = client.recv().await.unwrap();
        serde_json::from_str(msg.to_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_websocket_announcement_broadcast() {
        let st = state(false).await;
        let filter = routes(st.clone());

        let mut a = warp::test::ws().path("/ws").handshake(filter.clone()).await.unwrap();
        let mut b = warp::test::ws().path("/ws").handshake(filter.clone()).await.unwrap();
        assert_eq!(next_event(&mut a).await, WsEvent::welcome());
        assert_eq!(next_event(&mut b).await, WsEvent::welcome());

        let (_, body) = get(&st, "/ws/clients").await;
        assert_eq!(body["connected_clients"], 2);

        a.send_text(r#"{"event":"ANNOUNCEMENT","data":"delay","sender":"a"}"#)
            .await;
        assert_eq!(next_event(&mut a).await.data, "delay");
        assert_eq!(next_event(&mut b).await.data, "delay");

        drop(a);
        st.hub.send(WsEvent::new("ANNOUNCEMENT", "second", "ops"));
        assert_eq!(next_event(&mut b).await.data, "second");
    }

    async fn eventually(what: &str, check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    fn disconnects(recorder: &Recorder) -> usize {
        recorder
            .calls()
            .iter()
            .filter(|c| c.0 == "disconnect")
            .count()
    }

    #[tokio::test]
    async fn test_websocket_close_and_malformed_frame() {
        let recorder = Arc::new(Recorder::default());
        let st = Arc::new(AppState::new(
            Arc::new(IndexStore::new()),
            RealtimeFetcher::new(FeedUrls::from_base("http://127.0.0.1:1/rt")),
            Hub::start(recorder.clone()),
        ));
        let filter = routes(st.clone());

        let mut a = warp::test::ws().path("/ws").handshake(filter.clone()).await.unwrap();
        let mut b = warp::test::ws().path("/ws").handshake(filter.clone()).await.unwrap();
        assert_eq!(next_event(&mut a).await, WsEvent::welcome());
        assert_eq!(next_event(&mut b).await, WsEvent::welcome());
        let (_, body) = get(&st, "/ws/clients").await;
        assert_eq!(body["connected_clients"], 2);

        drop(a);
        eventually("first client to leave", || disconnects(&recorder) == 1).await;
        let (_, body) = get(&st, "/ws/clients").await;
        assert_eq!(body["connected_clients"], 1);

        b.send_text("not json").await;
        b.recv_closed().await.unwrap();
        eventually("second client to leave", || disconnects(&recorder) == 2).await;
        assert_eq!(st.hub.connection_count(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(disconnects(&recorder), 2);
        assert!(
            recorder
                .calls()
                .iter()
                .all(|c| c.1 == "Unknown/System" && c.2 == "Connection lost")
        );
    }
}
