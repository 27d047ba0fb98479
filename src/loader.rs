use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;

use crate::config::LoaderConfig;
use crate::error::{GeometryError, LoadError, LookupError, SourceError};
use crate::geometry::{PointLookup, road_edges};
use crate::normalize::normalize;
use crate::osm_source::{OsmSource, RecordFilter};
use crate::store::GraphStore;
use crate::writer::{GraphWriter, RecordOutcome, WriterStats};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Rebuild indexes, then load points and roads into an empty store.
    Load,
    LoadPoints,
    LoadRoads,
    /// Drop and recreate the indexes.
    CreateIndexes,
    /// Drop the indexes and delete all edges and nodes.
    Reset,
}

impl Action {
    pub fn needs_source(self) -> bool {
        matches!(self, Action::Load | Action::LoadPoints | Action::LoadRoads)
    }
}

impl FromStr for Action {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "load" => Ok(Action::Load),
            "load-points" => Ok(Action::LoadPoints),
            "load-roads" => Ok(Action::LoadRoads),
            "create-indexes" => Ok(Action::CreateIndexes),
            "reset" => Ok(Action::Reset),
            _ => Err(LoadError::UnsupportedAction(s.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Load => "load",
            Action::LoadPoints => "load-points",
            Action::LoadRoads => "load-roads",
            Action::CreateIndexes => "create-indexes",
            Action::Reset => "reset",
        })
    }
}

/// What a run did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadReport {
    pub points_seen: u64,
    pub points_written: u64,
    pub points_skipped: u64,
    pub roads_seen: u64,
    /// Roads with fewer than two members.
    pub roads_dropped: u64,
    pub edges_written: u64,
    pub edges_skipped: u64,
    /// Records that could not be normalized.
    pub malformed_records: u64,
    pub writer: WriterStats,
    pub nodes_in_store: u64,
    pub edges_in_store: u64,
    pub elapsed: Duration,
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "points {}/{} written ({} skipped), roads {} ({} dropped), edges {} written ({} skipped), \
             {} malformed records, {} commits; store holds {} nodes and {} edges; took {:?}",
            self.points_written,
            self.points_seen,
            self.points_skipped,
            self.roads_seen,
            self.roads_dropped,
            self.edges_written,
            self.edges_skipped,
            self.malformed_records,
            self.writer.commits,
            self.nodes_in_store,
            self.edges_in_store,
            self.elapsed
        )
    }
}

/// Runs one action end to end.
///
/// The source is opened before the store is touched, so a bad path fails without side
/// effects. Any fatal error rolls back the in-flight batch; batches committed before it
/// are kept.
pub async fn run_action(action: Action, config: &LoaderConfig) -> Result<LoadReport, LoadError> {
    let start_time = Instant::now();
    config.validate()?;

    let source = if action.needs_source() {
        Some(OsmSource::open(config.require_osm_file()?)?)
    } else {
        None
    };

    info!("Running action {}", action);
    let store = GraphStore::connect(&config.store).await?;
    let mut writer = GraphWriter::new(store.clone(), config.batch).await?;
    let mut report = LoadReport::default();

    if let Err(e) = execute(action, config, source.as_ref(), &store, &mut writer, &mut report).await
    {
        error!("Action {} failed: {}", action, e);
        if let Err(abort_err) = writer.abort().await {
            error!("Rollback failed: {}", abort_err);
        }
        if let Err(close_err) = store.close().await {
            debug!("Closing store after failure: {}", close_err);
        }
        return Err(e);
    }

    report.writer = writer.shutdown().await?;
    report.nodes_in_store = store.count_nodes().await?;
    report.edges_in_store = store.count_edges().await?;
    report.elapsed = start_time.elapsed();
    store.close().await?;

    info!("{}", report);
    info!("task complete");
    Ok(report)
}

async fn execute(
    action: Action,
    config: &LoaderConfig,
    source: Option<&OsmSource>,
    store: &GraphStore,
    writer: &mut GraphWriter,
    report: &mut LoadReport,
) -> Result<(), LoadError> {
    let source = || {
        source.ok_or_else(|| LoadError::Config(format!("action {} needs an OSM file", action)))
    };

    match action {
        Action::Load => {
            ensure_empty(store).await?;
            writer.drop_indexes().await?;
            writer.create_indexes(config.spatial_index).await?;
            load_points(source()?, config, writer, report).await?;
            load_roads(source()?, config, writer, &store.point_lookup(), report).await?;
        }
        Action::LoadPoints => load_points(source()?, config, writer, report).await?,
        Action::LoadRoads => {
            load_roads(source()?, config, writer, &store.point_lookup(), report).await?
        }
        Action::CreateIndexes => {
            writer.drop_indexes().await?;
            writer.create_indexes(config.spatial_index).await?;
        }
        Action::Reset => {
            writer.drop_indexes().await?;
            writer.truncate_edges().await?;
            writer.truncate_nodes().await?;
        }
    }
    Ok(())
}

/// A full load assumes an empty graph. Points would be refused by the unique index while
/// every road was written again.
async fn ensure_empty(store: &GraphStore) -> Result<(), LoadError> {
    let nodes = store.count_nodes().await?;
    let edges = store.count_edges().await?;
    if nodes > 0 || edges > 0 {
        return Err(LoadError::Config(format!(
            "graph store already holds {} nodes and {} edges; run the reset action first",
            nodes, edges
        )));
    }
    Ok(())
}

/// Streams every point into the writer and commits, so the road phase can look them up.
pub async fn load_points(
    source: &OsmSource,
    config: &LoaderConfig,
    writer: &mut GraphWriter,
    report: &mut LoadReport,
) -> Result<(), LoadError> {
    info!("Loading points from {}", source.path().display());
    let (mut records, scan) = source.scan(RecordFilter::Points, config.queue_capacity);
    let progress = Progress::new(config.show_progress, "points", config.progress.point_interval);

    while let Some(raw) = records.recv().await {
        report.points_seen += 1;
        match normalize(&raw) {
            Ok(point) => match writer.create_point(&point.properties).await? {
                RecordOutcome::Written => report.points_written += 1,
                RecordOutcome::Skipped(_) => report.points_skipped += 1,
            },
            Err(e) => {
                warn!("Skipping point record: {}", e);
                report.malformed_records += 1;
                report.points_skipped += 1;
            }
        }
        progress.tick(report.points_seen);
    }

    join_scan(scan).await?;
    writer.commit().await?;
    progress.finish(report.points_written);
    Ok(())
}

/// Streams every classified road, assembling one edge per direction of each adjacent
/// member pair. Failures stay local to the edge or road they concern.
pub async fn load_roads<L: PointLookup + ?Sized>(
    source: &OsmSource,
    config: &LoaderConfig,
    writer: &mut GraphWriter,
    lookup: &L,
    report: &mut LoadReport,
) -> Result<(), LoadError> {
    info!("Loading roads from {}", source.path().display());
    let filter = RecordFilter::Roads {
        classification_key: config.road_classification_key.clone(),
    };
    let (mut records, scan) = source.scan(filter, config.queue_capacity);
    let progress = Progress::new(config.show_progress, "roads", config.progress.road_interval);

    while let Some(raw) = records.recv().await {
        report.roads_seen += 1;
        progress.tick(report.roads_seen);

        let road = match normalize(&raw) {
            Ok(road) => road,
            Err(e) => {
                warn!("Skipping road record: {}", e);
                report.malformed_records += 1;
                continue;
            }
        };
        if road.members.len() < 2 {
            warn!(
                "Road {} has {} member(s), dropping",
                road.osm_id,
                road.members.len()
            );
            report.roads_dropped += 1;
            continue;
        }

        for draft in road_edges(&road, lookup).await {
            match draft {
                Ok(draft) => match writer.create_edge(&draft).await? {
                    RecordOutcome::Written => report.edges_written += 1,
                    RecordOutcome::Skipped(_) => report.edges_skipped += 1,
                },
                Err(GeometryError::Lookup(LookupError::Ambiguous(osm_id))) => {
                    error!(
                        "Road {}: point {} is stored more than once, edge skipped",
                        road.osm_id, osm_id
                    );
                    report.edges_skipped += 1;
                }
                Err(e) => {
                    warn!("Road {}: edge skipped: {}", road.osm_id, e);
                    report.edges_skipped += 1;
                }
            }
        }
    }

    join_scan(scan).await?;
    progress.finish(report.edges_written);
    Ok(())
}

async fn join_scan(scan: JoinHandle<Result<u64, SourceError>>) -> Result<u64, SourceError> {
    scan.await.map_err(|e| SourceError::Task(e.to_string()))?
}

/// Periodic log lines plus an optional spinner.
struct Progress {
    bar: Option<ProgressBar>,
    label: &'static str,
    interval: u64,
}

impl Progress {
    fn new(enabled: bool, label: &'static str, interval: u64) -> Self {
        let bar = enabled.then(|| {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner} [{elapsed_precise}] {pos} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.set_message(label);
            bar.enable_steady_tick(Duration::from_millis(200));
            bar
        });
        Self {
            bar,
            label,
            interval,
        }
    }

    fn tick(&self, seen: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
        if self.interval > 0 && seen % self.interval == 0 {
            info!("{} {} processed", seen, self.label);
        }
    }

    fn finish(&self, written: u64) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(format!("{} done", self.label));
        }
        info!("Finished {}: {} written", self.label, written);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_parse_from_their_cli_names() {
        assert_eq!("load".parse::<Action>().unwrap(), Action::Load);
        assert_eq!("load-points".parse::<Action>().unwrap(), Action::LoadPoints);
        assert_eq!("load_roads".parse::<Action>().unwrap(), Action::LoadRoads);
        assert_eq!("CREATE-INDEXES".parse::<Action>().unwrap(), Action::CreateIndexes);
        assert_eq!("reset".parse::<Action>().unwrap(), Action::Reset);

        for action in [Action::Load, Action::LoadPoints, Action::Reset] {
            assert_eq!(action.to_string().parse::<Action>().unwrap(), action);
        }
    }

    #[test]
    fn unknown_actions_are_rejected() {
        assert!(matches!(
            "loadroads".parse::<Action>(),
            Err(LoadError::UnsupportedAction(name)) if name == "loadroads"
        ));
    }

    #[test]
    fn only_load_actions_read_the_source() {
        assert!(Action::Load.needs_source());
        assert!(Action::LoadRoads.needs_source());
        assert!(!Action::CreateIndexes.needs_source());
        assert!(!Action::Reset.needs_source());
    }
}
