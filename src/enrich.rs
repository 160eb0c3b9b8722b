use crate::gtfs_types::{Route, Stop, Trip};
use crate::static_data::StaticView;
use gtfs_realtime as rt;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EnrichedPosition {
    pub vehicle_id: String,
    pub vehicle_label: String,
    pub trip_id: String,
    pub route_id: String,
    pub stop_id: String,
    pub direction_id: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub bearing: f64,
    pub timestamp: u64,
    pub current_status: String,
    pub occupancy_status: String,
    pub schedule_relationship: String,
    pub trip_details: Option<Trip>,
    pub route_details: Option<Route>,
    pub stop_details: Option<Stop>,
}

pub fn enrich(feed: &rt::FeedMessage, view: &StaticView) -> Vec<EnrichedPosition> {
    feed.entity
        .iter()
        .filter_map(|entity| entity.vehicle.as_ref())
        .map(|vp| enrich_position(vp, view))
        .collect()
}

fn enrich_position(vp: &rt::VehiclePosition, view: &StaticView) -> EnrichedPosition {
    let trip = vp.trip.clone().unwrap_or_default();
    let vehicle = vp.vehicle.clone().unwrap_or_default();
    let position = vp.position.clone().unwrap_or_default();

    let trip_id = trip.trip_id();
    let route_id = trip.route_id();
    let stop_id = vp.stop_id();

    // Lookups are independent and keyed by the ids exactly as the feed sent them
    let trip_details = view.trips.get(trip_id).cloned();
    let route_details = view.routes.get(route_id).cloned();
    let stop_details = view.stops.get(stop_id).cloned();

    let resolved_route_id = match (&trip_details, route_id.is_empty()) {
        (Some(t), true) => t.route_id.to_string(),
        _ => route_id.to_string(),
    };

    EnrichedPosition {
        vehicle_id: vehicle.id().to_string(),
        vehicle_label: vehicle.label().to_string(),
        trip_id: trip_id.to_string(),
        route_id: resolved_route_id,
        stop_id: stop_id.to_string(),
        direction_id: trip.direction_id(),
        latitude: position.latitude as f64,
        longitude: position.longitude as f64,
        bearing: position.bearing() as f64,
        timestamp: vp.timestamp(),
        current_status: vp.current_status().as_str_name().to_string(),
        occupancy_status: vp.occupancy_status().as_str_name().to_string(),
        schedule_relationship: trip.schedule_relationship().as_str_name().to_string(),
        trip_details,
        route_details,
        stop_details,
    }
}
