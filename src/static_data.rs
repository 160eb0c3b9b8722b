use crate::gtfs_types::{GtfsRecord, NumericPolicy, Route, ShapePoint, Stop, StopTime, Trip};
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{table}: cannot open {}: {source}", path.display())]
    Io {
        table: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{table}: malformed csv: {source}")]
    Csv {
        table: &'static str,
        #[source]
        source: csv::Error,
    },
    #[error("{table}: line {line} has {found} columns, {required} required")]
    ShortRow {
        table: &'static str,
        line: u64,
        found: usize,
        required: usize,
    },
}

/// Parsed rows of one table plus the rows dropped under strict numeric mode.
#[derive(Debug)]
pub struct Loaded<R> {
    pub records: Vec<R>,
    pub rejected: usize,
}

pub fn load_table<R: GtfsRecord>(
    dir: &Path,
    policy: NumericPolicy,
) -> Result<Loaded<R>, LoadError> {
    let path = dir.join(R::FILE);
    let file = File::open(&path).map_err(|source| LoadError::Io {
        table: R::TABLE,
        path: path.clone(),
        source,
    })?;
    read_table(file, policy)
}

/// Parses every row after the header. Any short row fails the whole table so
/// that a partial table is never published.
pub fn read_table<R: GtfsRecord, T: Read>(
    reader: T,
    policy: NumericPolicy,
) -> Result<Loaded<R>, LoadError> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut records = Vec::new();
    let mut rejected = 0;

    for result in csv.records() {
        let row = result.map_err(|source| LoadError::Csv {
            table: R::TABLE,
            source,
        })?;

        if row.len() < R::REQUIRED_COLUMNS {
            return Err(LoadError::ShortRow {
                table: R::TABLE,
                line: row.position().map(|p| p.line()).unwrap_or(0),
                found: row.len(),
                required: R::REQUIRED_COLUMNS,
            });
        }

        match R::from_row(&row, policy) {
            Ok(record) => records.push(record),
            Err(e) => {
                rejected += 1;
                debug!(table = R::TABLE, error = %e, "Rejected row");
            }
        }
    }

    Ok(Loaded { records, rejected })
}

/// Primary-key index. Records keep file order for listings; a duplicated id
/// resolves to its last occurrence.
#[derive(Debug)]
pub struct TableIndex<R> {
    records: Vec<R>,
    by_id: HashMap<CompactString, usize>,
}

impl<R> Default for TableIndex<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            by_id: HashMap::new(),
        }
    }
}

impl<R> TableIndex<R> {
    pub fn build(records: Vec<R>, key: impl Fn(&R) -> &CompactString) -> Self {
        let mut by_id = HashMap::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            by_id.insert(key(record).clone(), idx);
        }
        Self { records, by_id }
    }

    pub fn get(&self, id: &str) -> Option<&R> {
        self.by_id.get(id).map(|&idx| &self.records[idx])
    }

    pub fn all(&self) -> &[R] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

pub fn route_index(records: Vec<Route>) -> TableIndex<Route> {
    TableIndex::build(records, |r| &r.route_id)
}

pub fn trip_index(records: Vec<Trip>) -> TableIndex<Trip> {
    TableIndex::build(records, |t| &t.trip_id)
}

pub fn stop_index(records: Vec<Stop>) -> TableIndex<Stop> {
    TableIndex::build(records, |s| &s.stop_id)
}

/// Shape id -> points ordered by `shape_pt_sequence`.
#[derive(Debug, Default)]
pub struct ShapeIndex {
    by_shape: HashMap<CompactString, Vec<ShapePoint>>,
    points: usize,
}

impl ShapeIndex {
    pub fn build(records: Vec<ShapePoint>) -> Self {
        let points = records.len();
        let mut by_shape: HashMap<CompactString, Vec<ShapePoint>> = HashMap::new();
        for point in records {
            by_shape.entry(point.shape_id.clone()).or_default().push(point);
        }
        for shape in by_shape.values_mut() {
            shape.sort_by_key(|p| p.shape_pt_sequence);
        }
        Self { by_shape, points }
    }

    pub fn points(&self, shape_id: &str) -> Option<&[ShapePoint]> {
        self.by_shape.get(shape_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.points
    }
}

/// Trip id -> stop-times ordered by `stop_sequence`, plus the composite
/// (trip id, stop id) lookup. When a trip visits a stop twice the earliest
/// visit answers the composite lookup.
#[derive(Debug, Default)]
pub struct StopTimeIndex {
    by_trip: HashMap<CompactString, Vec<StopTime>>,
    by_trip_stop: HashMap<CompactString, HashMap<CompactString, usize>>,
    rows: usize,
}

impl StopTimeIndex {
    pub fn build(records: Vec<StopTime>) -> Self {
        let rows = records.len();
        let mut by_trip: HashMap<CompactString, Vec<StopTime>> = HashMap::new();
        for st in records {
            by_trip.entry(st.trip_id.clone()).or_default().push(st);
        }

        let mut by_trip_stop = HashMap::with_capacity(by_trip.len());
        for (trip_id, stop_times) in by_trip.iter_mut() {
            stop_times.sort_by_key(|st| st.stop_sequence);

            let mut stops: HashMap<CompactString, usize> = HashMap::new();
            for (idx, st) in stop_times.iter().enumerate() {
                stops.entry(st.stop_id.clone()).or_insert(idx);
            }
            by_trip_stop.insert(trip_id.clone(), stops);
        }

        Self {
            by_trip,
            by_trip_stop,
            rows,
        }
    }

    pub fn for_trip(&self, trip_id: &str) -> Option<&[StopTime]> {
        self.by_trip.get(trip_id).map(Vec::as_slice)
    }

    pub fn at_stop(&self, trip_id: &str, stop_id: &str) -> Option<&StopTime> {
        let idx = *self.by_trip_stop.get(trip_id)?.get(stop_id)?;
        self.by_trip.get(trip_id).map(|sts| &sts[idx])
    }

    pub fn len(&self) -> usize {
        self.rows
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TableOutcome {
    pub table: &'static str,
    pub records: usize,
    pub rejected: usize,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// A published index. Readers clone the inner `Arc` and keep a consistent
/// snapshot even if a refresh swaps the slot mid-request.
struct Slot<T> {
    current: RwLock<Arc<T>>,
}

impl<T: Default> Slot<T> {
    fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(T::default())),
        }
    }

    fn snapshot(&self) -> Arc<T> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, next: T) {
        let next = Arc::new(next);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

/// Trip, route and stop snapshots used to enrich realtime data.
#[derive(Clone)]
pub struct StaticView {
    pub trips: Arc<TableIndex<Trip>>,
    pub routes: Arc<TableIndex<Route>>,
    pub stops: Arc<TableIndex<Stop>>,
}

pub struct IndexStore {
    routes: Slot<TableIndex<Route>>,
    trips: Slot<TableIndex<Trip>>,
    stops: Slot<TableIndex<Stop>>,
    shapes: Slot<ShapeIndex>,
    stop_times: Slot<StopTimeIndex>,
    // Written by the loaders as each finishes
    outcomes: DashMap<&'static str, TableOutcome>,
    ready: AtomicBool,
}

impl Default for IndexStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexStore {
    pub fn new() -> Self {
        Self {
            routes: Slot::new(),
            trips: Slot::new(),
            stops: Slot::new(),
            shapes: Slot::new(),
            stop_times: Slot::new(),
            outcomes: DashMap::new(),
            ready: AtomicBool::new(false),
        }
    }

    pub fn routes(&self) -> Arc<TableIndex<Route>> {
        self.routes.snapshot()
    }

    pub fn trips(&self) -> Arc<TableIndex<Trip>> {
        self.trips.snapshot()
    }

    pub fn stops(&self) -> Arc<TableIndex<Stop>> {
        self.stops.snapshot()
    }

    pub fn shapes(&self) -> Arc<ShapeIndex> {
        self.shapes.snapshot()
    }

    pub fn stop_times(&self) -> Arc<StopTimeIndex> {
        self.stop_times.snapshot()
    }

    pub fn view(&self) -> StaticView {
        StaticView {
            trips: self.trips(),
            routes: self.routes(),
            stops: self.stops(),
        }
    }

    pub fn publish_routes(&self, index: TableIndex<Route>) {
        self.routes.publish(index);
    }

    pub fn publish_trips(&self, index: TableIndex<Trip>) {
        self.trips.publish(index);
    }

    pub fn publish_stops(&self, index: TableIndex<Stop>) {
        self.stops.publish(index);
    }

    pub fn publish_shapes(&self, index: ShapeIndex) {
        self.shapes.publish(index);
    }

    pub fn publish_stop_times(&self, index: StopTimeIndex) {
        self.stop_times.publish(index);
    }

    pub fn record_outcome(&self, outcome: TableOutcome) {
        self.outcomes.insert(outcome.table, outcome);
    }

    pub fn outcomes(&self) -> Vec<TableOutcome> {
        let mut out: Vec<TableOutcome> = self.outcomes.iter().map(|r| r.value().clone()).collect();
        out.sort_by_key(|o| o.table);
        out
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }
}
