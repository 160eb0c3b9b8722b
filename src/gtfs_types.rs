use compact_str::CompactString;
use csv::StringRecord;
use serde::{Serialize, Serializer};
use std::str::FromStr;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NumericPolicy {
    #[default]
    Lenient,
    Strict,
}

#[derive(Debug, Error, PartialEq)]
pub enum RowError {
    #[error("column {column} ({name}): invalid number {value:?}")]
    InvalidNumber {
        column: usize,
        name: &'static str,
        value: String,
    },
}

/// A record type backed by one flat GTFS table.
pub trait GtfsRecord: Sized + Send + 'static {
    const TABLE: &'static str;
    const FILE: &'static str;
    /// Rows shorter than this are a shape error for the whole table.
    const REQUIRED_COLUMNS: usize;

    fn from_row(row: &StringRecord, policy: NumericPolicy) -> Result<Self, RowError>;
}

fn text(row: &StringRecord, column: usize) -> CompactString {
    CompactString::from(row.get(column).unwrap_or("").trim())
}

fn number<T: FromStr + Default>(
    row: &StringRecord,
    column: usize,
    name: &'static str,
    policy: NumericPolicy,
) -> Result<T, RowError> {
    Ok(optional_number(row, column, name, policy)?.unwrap_or_default())
}

fn optional_number<T: FromStr + Default>(
    row: &StringRecord,
    column: usize,
    name: &'static str,
    policy: NumericPolicy,
) -> Result<Option<T>, RowError> {
    let raw = row.get(column).unwrap_or("").trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<T>() {
        Ok(value) => Ok(Some(value)),
        Err(_) => match policy {
            NumericPolicy::Lenient => Ok(Some(T::default())),
            NumericPolicy::Strict => Err(RowError::InvalidNumber {
                column,
                name,
                value: raw.to_string(),
            }),
        },
    }
}

/// GTFS `route_type`. Serialized as its integer code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RouteType {
    #[default]
    Tram,
    Subway,
    Rail,
    Bus,
    Ferry,
    CableTram,
    AerialLift,
    Funicular,
    Trolleybus,
    Monorail,
    Other(i32),
}

impl RouteType {
    pub fn code(self) -> i32 {
        match self {
            RouteType::Tram => 0,
            RouteType::Subway => 1,
            RouteType::Rail => 2,
            RouteType::Bus => 3,
            RouteType::Ferry => 4,
            RouteType::CableTram => 5,
            RouteType::AerialLift => 6,
            RouteType::Funicular => 7,
            RouteType::Trolleybus => 11,
            RouteType::Monorail => 12,
            RouteType::Other(code) => code,
        }
    }
}

impl From<i32> for RouteType {
    fn from(code: i32) -> Self {
        match code {
            0 => RouteType::Tram,
            1 => RouteType::Subway,
            2 => RouteType::Rail,
            3 => RouteType::Bus,
            4 => RouteType::Ferry,
            5 => RouteType::CableTram,
            6 => RouteType::AerialLift,
            7 => RouteType::Funicular,
            11 => RouteType::Trolleybus,
            12 => RouteType::Monorail,
            other => RouteType::Other(other),
        }
    }
}

impl Serialize for RouteType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Route {
    pub route_id: CompactString,
    pub agency_id: CompactString,
    pub route_short_name: CompactString,
    pub route_long_name: CompactString,
    pub route_desc: CompactString,
    pub route_type: RouteType,
    pub route_url: CompactString,
    pub route_color: CompactString,
    pub route_text_color: CompactString,
}

impl GtfsRecord for Route {
    const TABLE: &'static str = "routes";
    const FILE: &'static str = "routes.txt";
    const REQUIRED_COLUMNS: usize = 9;

    fn from_row(row: &StringRecord, policy: NumericPolicy) -> Result<Self, RowError> {
        Ok(Route {
            route_id: text(row, 0),
            agency_id: text(row, 1),
            route_short_name: text(row, 2),
            route_long_name: text(row, 3),
            route_desc: text(row, 4),
            route_type: RouteType::from(number::<i32>(row, 5, "route_type", policy)?),
            route_url: text(row, 6),
            route_color: text(row, 7),
            route_text_color: text(row, 8),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Trip {
    pub route_id: CompactString,
    pub service_id: CompactString,
    pub trip_id: CompactString,
    pub trip_headsign: CompactString,
    pub direction_id: u8,
    pub block_id: CompactString,
    pub shape_id: CompactString,
}

impl GtfsRecord for Trip {
    const TABLE: &'static str = "trips";
    const FILE: &'static str = "trips.txt";
    const REQUIRED_COLUMNS: usize = 7;

    fn from_row(row: &StringRecord, policy: NumericPolicy) -> Result<Self, RowError> {
        Ok(Trip {
            route_id: text(row, 0),
            service_id: text(row, 1),
            trip_id: text(row, 2),
            trip_headsign: text(row, 3),
            direction_id: number(row, 4, "direction_id", policy)?,
            block_id: text(row, 5),
            shape_id: text(row, 6),
        })
    }
}

/// One point of a shape. A shape id groups many points.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShapePoint {
    pub shape_id: CompactString,
    pub shape_pt_lat: f64,
    pub shape_pt_lon: f64,
    pub shape_pt_sequence: u32,
    pub shape_dist_traveled: f64,
}

impl GtfsRecord for ShapePoint {
    const TABLE: &'static str = "shapes";
    const FILE: &'static str = "shapes.txt";
    const REQUIRED_COLUMNS: usize = 5;

    fn from_row(row: &StringRecord, policy: NumericPolicy) -> Result<Self, RowError> {
        Ok(ShapePoint {
            shape_id: text(row, 0),
            shape_pt_lat: number(row, 1, "shape_pt_lat", policy)?,
            shape_pt_lon: number(row, 2, "shape_pt_lon", policy)?,
            shape_pt_sequence: number(row, 3, "shape_pt_sequence", policy)?,
            shape_dist_traveled: number(row, 4, "shape_dist_traveled", policy)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Stop {
    pub stop_id: CompactString,
    pub stop_code: CompactString,
    pub stop_name: CompactString,
    pub stop_desc: CompactString,
    pub stop_lat: f64,
    pub stop_lon: f64,
    pub zone_id: CompactString,
    pub stop_url: CompactString,
    pub location_type: i32,
    pub parent_station: CompactString,
    pub stop_timezone: CompactString,
    pub wheelchair_boarding: i32,
}

impl GtfsRecord for Stop {
    const TABLE: &'static str = "stops";
    const FILE: &'static str = "stops.txt";
    // zone_id onwards is optional and may be cut off entirely
    const REQUIRED_COLUMNS: usize = 6;

    fn from_row(row: &StringRecord, policy: NumericPolicy) -> Result<Self, RowError> {
        Ok(Stop {
            stop_id: text(row, 0),
            stop_code: text(row, 1),
            stop_name: text(row, 2),
            stop_desc: text(row, 3),
            stop_lat: number(row, 4, "stop_lat", policy)?,
            stop_lon: number(row, 5, "stop_lon", policy)?,
            zone_id: text(row, 6),
            stop_url: text(row, 7),
            location_type: number(row, 8, "location_type", policy)?,
            parent_station: text(row, 9),
            stop_timezone: text(row, 10),
            wheelchair_boarding: number(row, 11, "wheelchair_boarding", policy)?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StopTime {
    pub trip_id: CompactString,
    pub arrival_time: CompactString,
    pub departure_time: CompactString,
    pub stop_id: CompactString,
    pub stop_sequence: u32,
    pub stop_headsign: CompactString,
    pub pickup_type: i32,
    pub drop_off_type: i32,
    pub shape_dist_traveled: Option<f64>,
    pub timepoint: i32,
}

impl GtfsRecord for StopTime {
    const TABLE: &'static str = "stop_times";
    const FILE: &'static str = "stop_times.txt";
    const REQUIRED_COLUMNS: usize = 8;

    fn from_row(row: &StringRecord, policy: NumericPolicy) -> Result<Self, RowError> {
        Ok(StopTime {
            trip_id: text(row, 0),
            arrival_time: text(row, 1),
            departure_time: text(row, 2),
            stop_id: text(row, 3),
            stop_sequence: number(row, 4, "stop_sequence", policy)?,
            stop_headsign: text(row, 5),
            pickup_type: number(row, 6, "pickup_type", policy)?,
            drop_off_type: number(row, 7, "drop_off_type", policy)?,
            shape_dist_traveled: optional_number(row, 8, "shape_dist_traveled", policy)?,
            timepoint: number(row, 9, "timepoint", policy)?,
        })
    }
}
