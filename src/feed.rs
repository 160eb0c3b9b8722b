use gtfs_realtime as rt;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertEntity {
    pub id: String,
    pub alert: Alert,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Alert {
    pub active_period: Vec<ActivePeriod>,
    pub informed_entity: Vec<InformedEntity>,
    pub cause: i32,
    pub effect: i32,
    pub header_text: TranslatedString,
    pub description_text: TranslatedString,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActivePeriod {
    pub start: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InformedEntity {
    pub agency_id: String,
    pub route_id: String,
    pub route_type: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stop_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TranslatedString {
    pub translation: Vec<Translation>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Translation {
    pub text: String,
    pub language: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TripUpdateEntity {
    pub id: String,
    pub trip_update: TripUpdate,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TripUpdate {
    pub trip: TripDescriptor,
    pub vehicle: VehicleDescriptor,
    pub stop_time_update: Vec<StopTimeUpdate>,
    pub timestamp: u64,
    pub delay: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TripDescriptor {
    pub trip_id: String,
    pub route_id: String,
    pub direction_id: u32,
    pub start_time: String,
    pub start_date: String,
    pub schedule_relationship: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct VehicleDescriptor {
    pub id: String,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StopTimeUpdate {
    pub stop_sequence: u32,
    pub stop_id: String,
    pub arrival: StopTimeEvent,
    pub departure: StopTimeEvent,
    pub schedule_relationship: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StopTimeEvent {
    pub time: i64,
    pub delay: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VehiclePositionEntity {
    pub id: String,
    pub vehicle: VehiclePosition,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VehiclePosition {
    pub trip: TripDescriptor,
    pub vehicle: VehicleDescriptor,
    pub position: GeoPosition,
    pub stop_id: String,
    pub current_stop_sequence: u32,
    pub current_status: i32,
    pub timestamp: u64,
    pub occupancy_status: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GeoPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub bearing: f64,
}

impl From<&rt::TripDescriptor> for TripDescriptor {
    fn from(td: &rt::TripDescriptor) -> Self {
        Self {
            trip_id: td.trip_id().to_string(),
            route_id: td.route_id().to_string(),
            direction_id: td.direction_id(),
            start_time: td.start_time().to_string(),
            start_date: td.start_date().to_string(),
            schedule_relationship: td.schedule_relationship() as i32,
        }
    }
}

impl From<&rt::VehicleDescriptor> for VehicleDescriptor {
    fn from(vd: &rt::VehicleDescriptor) -> Self {
        Self {
            id: vd.id().to_string(),
            label: vd.label().to_string(),
        }
    }
}

impl From<&rt::Position> for GeoPosition {
    fn from(p: &rt::Position) -> Self {
        Self {
            latitude: p.latitude as f64,
            longitude: p.longitude as f64,
            bearing: p.bearing() as f64,
        }
    }
}

impl From<&rt::trip_update::StopTimeEvent> for StopTimeEvent {
    fn from(e: &rt::trip_update::StopTimeEvent) -> Self {
        Self {
            time: e.time(),
            delay: e.delay(),
        }
    }
}

impl From<&rt::TranslatedString> for TranslatedString {
    fn from(ts: &rt::TranslatedString) -> Self {
        Self {
            translation: ts
                .translation
                .iter()
                .map(|t| Translation {
                    text: t.text.clone(),
                    language: t.language().to_string(),
                })
                .collect(),
        }
    }
}

fn translated(ts: &Option<rt::TranslatedString>) -> TranslatedString {
    ts.as_ref().map(TranslatedString::from).unwrap_or_default()
}

fn stop_time_event(e: &Option<rt::trip_update::StopTimeEvent>) -> StopTimeEvent {
    e.as_ref().map(StopTimeEvent::from).unwrap_or_default()
}

impl From<&rt::Alert> for Alert {
    fn from(a: &rt::Alert) -> Self {
        Self {
            active_period: a
                .active_period
                .iter()
                .map(|p| ActivePeriod {
                    start: p.start(),
                    end: p.end,
                })
                .collect(),
            informed_entity: a
                .informed_entity
                .iter()
                .map(|e| InformedEntity {
                    agency_id: e.agency_id().to_string(),
                    route_id: e.route_id().to_string(),
                    route_type: e.route_type(),
                    stop_id: e.stop_id().to_string(),
                })
                .collect(),
            cause: a.cause() as i32,
            effect: a.effect() as i32,
            header_text: translated(&a.header_text),
            description_text: translated(&a.description_text),
        }
    }
}

impl From<&rt::TripUpdate> for TripUpdate {
    fn from(tu: &rt::TripUpdate) -> Self {
        Self {
            trip: TripDescriptor::from(&tu.trip),
            vehicle: tu
                .vehicle
                .as_ref()
                .map(VehicleDescriptor::from)
                .unwrap_or_default(),
            stop_time_update: tu
                .stop_time_update
                .iter()
                .map(|stu| StopTimeUpdate {
                    stop_sequence: stu.stop_sequence(),
                    stop_id: stu.stop_id().to_string(),
                    arrival: stop_time_event(&stu.arrival),
                    departure: stop_time_event(&stu.departure),
                    schedule_relationship: stu.schedule_relationship() as i32,
                })
                .collect(),
            timestamp: tu.timestamp(),
            delay: tu.delay(),
        }
    }
}

impl From<&rt::VehiclePosition> for VehiclePosition {
    fn from(vp: &rt::VehiclePosition) -> Self {
        Self {
            trip: vp.trip.as_ref().map(TripDescriptor::from).unwrap_or_default(),
            vehicle: vp
                .vehicle
                .as_ref()
                .map(VehicleDescriptor::from)
                .unwrap_or_default(),
            position: vp.position.as_ref().map(GeoPosition::from).unwrap_or_default(),
            stop_id: vp.stop_id().to_string(),
            current_stop_sequence: vp.current_stop_sequence(),
            current_status: vp.current_status() as i32,
            timestamp: vp.timestamp(),
            occupancy_status: vp.occupancy_status() as i32,
        }
    }
}

pub fn alerts(feed: &rt::FeedMessage) -> Vec<AlertEntity> {
    feed.entity
        .iter()
        .filter_map(|e| {
            e.alert.as_ref().map(|a| AlertEntity {
                id: e.id.clone(),
                alert: Alert::from(a),
            })
        })
        .collect()
}

pub fn trip_updates(feed: &rt::FeedMessage) -> Vec<TripUpdateEntity> {
    feed.entity
        .iter()
        .filter_map(|e| {
            e.trip_update.as_ref().map(|tu| TripUpdateEntity {
                id: e.id.clone(),
                trip_update: TripUpdate::from(tu),
            })
        })
        .collect()
}

pub fn vehicle_positions(feed: &rt::FeedMessage) -> Vec<VehiclePositionEntity> {
    feed.entity
        .iter()
        .filter_map(|e| {
            e.vehicle.as_ref().map(|vp| VehiclePositionEntity {
                id: e.id.clone(),
                vehicle: VehiclePosition::from(vp),
            })
        })
        .collect()
}
