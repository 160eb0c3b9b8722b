use crate::gtfs_types::{GtfsRecord, NumericPolicy};
use crate::static_data::{
    IndexStore, ShapeIndex, StopTimeIndex, TableOutcome, load_table, route_index, stop_index,
    trip_index,
};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};

pub struct Ingestor {
    data_dir: PathBuf,
    policy: NumericPolicy,
    store: Arc<IndexStore>,
}

impl Ingestor {
    pub fn new(data_dir: PathBuf, policy: NumericPolicy, store: Arc<IndexStore>) -> Self {
        Self {
            data_dir,
            policy,
            store,
        }
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    /// Loads every table and returns the names of the ones that failed. A
    /// failed table keeps whatever snapshot it had before.
    pub async fn run(&self) -> Vec<&'static str> {
        let started = Instant::now();
        info!(dir = %self.data_dir.display(), "Starting GTFS ingestion");

        let (routes, trips, shapes, stops, stop_times) = tokio::join!(
            self.spawn_load(route_index),
            self.spawn_load(trip_index),
            self.spawn_load(ShapeIndex::build),
            self.spawn_load(stop_index),
            self.spawn_load(StopTimeIndex::build),
        );

        let mut failed = Vec::new();
        self.settle("routes", routes, &mut failed, IndexStore::publish_routes);
        self.settle("trips", trips, &mut failed, IndexStore::publish_trips);
        self.settle("shapes", shapes, &mut failed, IndexStore::publish_shapes);
        self.settle("stops", stops, &mut failed, IndexStore::publish_stops);
        self.settle("stop_times", stop_times, &mut failed, IndexStore::publish_stop_times);

        self.store.mark_ready();
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            failed = failed.len(),
            "All ingestion tasks completed"
        );
        failed
    }

    fn spawn_load<R, I>(&self, build: fn(Vec<R>) -> I) -> JoinHandle<Option<I>>
    where
        R: GtfsRecord,
        I: Send + 'static,
    {
        let dir = self.data_dir.clone();
        let policy = self.policy;
        let store = self.store.clone();

        tokio::task::spawn_blocking(move || match load_table::<R>(&dir, policy) {
            Ok(loaded) => {
                let records = loaded.records.len();
                let index = build(loaded.records);
                info!(table = R::TABLE, records, rejected = loaded.rejected, "Loaded table");
                store.record_outcome(TableOutcome {
                    table: R::TABLE,
                    records,
                    rejected: loaded.rejected,
                    error: None,
                    finished_at: Utc::now(),
                });
                Some(index)
            }
            Err(e) => {
                error!(table = R::TABLE, error = %e, "Failed to load table");
                store.record_outcome(TableOutcome {
                    table: R::TABLE,
                    records: 0,
                    rejected: 0,
                    error: Some(e.to_string()),
                    finished_at: Utc::now(),
                });
                None
            }
        })
    }

    fn settle<I>(
        &self,
        table: &'static str,
        joined: Result<Option<I>, JoinError>,
        failed: &mut Vec<&'static str>,
        publish: fn(&IndexStore, I),
    ) {
        match joined {
            Ok(Some(index)) => publish(&self.store, index),
            Ok(None) => failed.push(table),
            Err(e) => {
                error!(table, error = %e, "Ingestion task aborted");
                self.store.record_outcome(TableOutcome {
                    table,
                    records: 0,
                    rejected: 0,
                    error: Some(e.to_string()),
                    finished_at: Utc::now(),
                });
                failed.push(table);
            }
        }
    }

    /// Re-runs ingestion every `interval`, swapping in fresh snapshots.
    pub fn spawn_refresh(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                info!("Refreshing GTFS data...");
                let failed = self.run().await;
                if failed.is_empty() {
                    info!("GTFS data refreshed successfully.");
                } else {
                    error!(?failed, "GTFS refresh kept previous data for failed tables");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_tables;
    use std::fs;

    fn ingestor(dir: &std::path::Path) -> Ingestor {
        Ingestor::new(
            dir.to_path_buf(),
            NumericPolicy::Lenient,
            Arc::new(IndexStore::new()),
        )
    }

    #[tokio::test]
    async fn test_run_publishes_all_tables() {
        let dir = tempfile::tempdir().unwrap();
        write_tables(dir.path());
        let ingestor = ingestor(dir.path());
        assert!(!ingestor.store().is_ready());

        let failed = ingestor.run().await;
        assert!(failed.is_empty());

        let store = ingestor.store();
        assert!(store.is_ready());
        assert_eq!(store.routes().len(), 2);
        assert_eq!(store.trips().len(), 2);
        assert_eq!(store.stops().len(), 2);
        assert_eq!(store.shapes().len(), 3);
        assert_eq!(store.stop_times().len(), 3);
        assert_eq!(store.trips().get("113279870").unwrap().block_id, "0  5");

        let outcomes = store.outcomes();
        assert_eq!(outcomes.len(), 5);
        assert!(outcomes.iter().all(|o| o.error.is_none()));
    }

    #[tokio::test]
    async fn test_failed_table_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        write_tables(dir.path());
        fs::remove_file(dir.path().join("shapes.txt")).unwrap();

        let ingestor = ingestor(dir.path());
        let failed = ingestor.run().await;
        assert_eq!(failed, vec!["shapes"]);

        let store = ingestor.store();
        assert!(store.is_ready());
        assert_eq!(store.shapes().len(), 0);
        assert_eq!(store.stops().len(), 2);

        let shapes = store
            .outcomes()
            .into_iter()
            .find(|o| o.table == "shapes")
            .unwrap();
        assert!(shapes.error.is_some());
    }

    #[tokio::test]
    async fn test_refresh_keeps_previous_snapshot_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_tables(dir.path());
        let ingestor = ingestor(dir.path());
        ingestor.run().await;

        fs::write(dir.path().join("routes.txt"), "route_id,agency_id\nR9,RTD\n").unwrap();
        fs::write(
            dir.path().join("stops.txt"),
            "stop_id,stop_code,stop_name,stop_desc,stop_lat,stop_lon\nS9,9,New,,1.0,2.0\n",
        )
        .unwrap();

        let failed = ingestor.run().await;
        assert_eq!(failed, vec!["routes"]);

        let store = ingestor.store();
        assert_eq!(store.routes().len(), 2);
        assert!(store.routes().get("101E").is_some());
        assert_eq!(store.stops().len(), 1);
        assert!(store.stops().get("S9").is_some());
        assert!(store.stops().get("S1").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ready_implies_every_table_published() {
        let dir = tempfile::tempdir().unwrap();
        write_tables(dir.path());
        let ingestor = Arc::new(ingestor(dir.path()));
        let store = ingestor.store().clone();

        let running = {
            let ingestor = ingestor.clone();
            tokio::spawn(async move { ingestor.run().await })
        };

        loop {
            if store.is_ready() {
                assert_eq!(store.routes().len(), 2);
                assert_eq!(store.trips().len(), 2);
                assert_eq!(store.shapes().len(), 3);
                assert_eq!(store.stops().len(), 2);
                assert_eq!(store.stop_times().len(), 3);
                break;
            }
            tokio::task::yield_now().await;
        }

        running.await.unwrap();
    }
}
