use log::{debug, error, info, warn};
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseTransaction, DbErr, EntityTrait, QueryFilter,
    QuerySelect, TransactionTrait,
};

use crate::config::BatchConfig;
use crate::entity::{graph_edges, graph_nodes};
use crate::error::WriterError;
use crate::geometry::{EdgeDraft, WGS84_SRID, point_wkt};
use crate::properties::PropertySet;
use crate::store::{CONNECTS_TYPE, GraphIndex, GraphStore, INTERSECTION_LABEL};

/// Result of a single create call. Skips are per-record and never end the batch.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordOutcome {
    Written,
    Skipped(SkipReason),
}

impl RecordOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, RecordOutcome::Written)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    MissingCoordinate,
    MissingEndpoint(i64),
    /// The store refused the row, e.g. a duplicate `osm_id` under the unique index.
    Rejected(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub points_written: u64,
    pub points_skipped: u64,
    pub edges_written: u64,
    pub edges_skipped: u64,
    pub commits: u64,
}

/// Sole writer of the graph store during a run.
///
/// Creates are grouped into one long transaction and committed once the accumulated
/// cost passes `commit_threshold`. Every create call is charged, whether it writes or
/// skips. Each create runs in its own savepoint, so a refused row rolls back alone.
/// Truncation and index maintenance commit immediately.
pub struct GraphWriter {
    store: GraphStore,
    txn: Option<DatabaseTransaction>,
    pending_cost: u64,
    config: BatchConfig,
    stats: WriterStats,
}

impl GraphWriter {
    pub async fn new(store: GraphStore, config: BatchConfig) -> Result<Self, WriterError> {
        let txn = store.connection().begin().await?;
        Ok(Self {
            store,
            txn: Some(txn),
            pending_cost: 0,
            config,
            stats: WriterStats::default(),
        })
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    pub fn pending_cost(&self) -> u64 {
        self.pending_cost
    }

    fn txn(&self) -> Result<&DatabaseTransaction, WriterError> {
        self.txn.as_ref().ok_or(WriterError::Closed)
    }

    pub async fn create_point(
        &mut self,
        properties: &PropertySet,
    ) -> Result<RecordOutcome, WriterError> {
        let Some(coord) = properties.coordinate() else {
            warn!(
                "Point {:?} has no coordinate, skipping",
                properties.osm_id()
            );
            self.stats.points_skipped += 1;
            self.charge(self.config.node_cost).await?;
            return Ok(RecordOutcome::Skipped(SkipReason::MissingCoordinate));
        };

        let model = graph_nodes::ActiveModel {
            node_id: NotSet,
            label: Set(INTERSECTION_LABEL.to_string()),
            osm_id: Set(properties.osm_id()),
            lon: Set(coord.x),
            lat: Set(coord.y),
            srid: Set(WGS84_SRID),
            geom_wkt: Set(point_wkt(coord)),
            properties: Set(properties.to_json()),
        };

        let outcome = {
            let txn = self.txn()?;
            let savepoint = txn.begin().await?;
            match graph_nodes::Entity::insert(model).exec(&savepoint).await {
                Ok(_) => {
                    savepoint.commit().await?;
                    RecordOutcome::Written
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    error!("Point {:?} rejected by the store: {}", properties.osm_id(), e);
                    RecordOutcome::Skipped(SkipReason::Rejected(e.to_string()))
                }
            }
        };

        if outcome.is_written() {
            self.stats.points_written += 1;
        } else {
            self.stats.points_skipped += 1;
        }
        self.charge(self.config.node_cost).await?;
        Ok(outcome)
    }

    pub async fn create_edge(&mut self, draft: &EdgeDraft) -> Result<RecordOutcome, WriterError> {
        let outcome = {
            let txn = self.txn()?;
            let start_node = resolve_node(txn, draft.start_id).await?;
            let end_node = resolve_node(txn, draft.end_id).await?;

            match (start_node, end_node) {
                (None, _) => RecordOutcome::Skipped(SkipReason::MissingEndpoint(draft.start_id)),
                (_, None) => RecordOutcome::Skipped(SkipReason::MissingEndpoint(draft.end_id)),
                (Some(start_node), Some(end_node)) => {
                    let geom = serde_json::to_value(&draft.geometry.line)
                        .map_err(|e| DbErr::Json(e.to_string()))?;
                    let model = graph_edges::ActiveModel {
                        edge_id: NotSet,
                        rel_type: Set(CONNECTS_TYPE.to_string()),
                        start_node: Set(start_node),
                        end_node: Set(end_node),
                        osm_id: Set(Some(draft.osm_id)),
                        start_id: Set(draft.start_id),
                        end_id: Set(draft.end_id),
                        geom: Set(geom),
                        way: Set(draft.geometry.wkt.clone()),
                        length: Set(draft.geometry.length),
                        ref_osm_nodes: Set(serde_json::json!(draft.geometry.ref_osm_nodes)),
                        properties: Set(draft.properties.to_json()),
                    };

                    let savepoint = txn.begin().await?;
                    match graph_edges::Entity::insert(model).exec(&savepoint).await {
                        Ok(_) => {
                            savepoint.commit().await?;
                            RecordOutcome::Written
                        }
                        Err(e) => {
                            savepoint.rollback().await?;
                            RecordOutcome::Skipped(SkipReason::Rejected(e.to_string()))
                        }
                    }
                }
            }
        };

        match &outcome {
            RecordOutcome::Written => self.stats.edges_written += 1,
            RecordOutcome::Skipped(reason) => {
                warn!(
                    "Edge {} -> {} of road {} skipped: {:?}",
                    draft.start_id, draft.end_id, draft.osm_id, reason
                );
                self.stats.edges_skipped += 1;
            }
        }
        self.charge(self.config.edge_cost).await?;
        Ok(outcome)
    }

    async fn charge(&mut self, cost: u64) -> Result<(), WriterError> {
        self.pending_cost += cost;
        if self.pending_cost > self.config.commit_threshold {
            debug!("Batch reached {} cost units, committing", self.pending_cost);
            self.commit().await?;
        }
        Ok(())
    }

    /// Commits the open batch and starts a new one.
    pub async fn commit(&mut self) -> Result<(), WriterError> {
        let txn = self.txn.take().ok_or(WriterError::Closed)?;
        txn.commit().await?;
        self.stats.commits += 1;
        self.pending_cost = 0;
        self.txn = Some(self.store.connection().begin().await?);
        Ok(())
    }

    /// Deletes every node and the edges attached to them.
    pub async fn truncate_nodes(&mut self) -> Result<u64, WriterError> {
        let (edges, nodes) = {
            let txn = self.txn()?;
            let edges = graph_edges::Entity::delete_many().exec(txn).await?;
            let nodes = graph_nodes::Entity::delete_many().exec(txn).await?;
            (edges.rows_affected, nodes.rows_affected)
        };
        self.commit().await?;
        info!("Truncated {} nodes ({} attached edges)", nodes, edges);
        Ok(nodes)
    }

    pub async fn truncate_edges(&mut self) -> Result<u64, WriterError> {
        let edges = graph_edges::Entity::delete_many()
            .exec(self.txn()?)
            .await?
            .rows_affected;
        self.commit().await?;
        info!("Truncated {} edges", edges);
        Ok(edges)
    }

    /// Builds the maintained indexes. A placeholder node and edge exist while the
    /// indexes are created and are gone again when this returns.
    pub async fn create_indexes(&mut self, spatial: bool) -> Result<(), WriterError> {
        {
            let txn = self.txn()?;
            let backend = txn.get_database_backend();

            let node_id = graph_nodes::Entity::insert(graph_nodes::ActiveModel {
                node_id: NotSet,
                label: Set(INTERSECTION_LABEL.to_string()),
                osm_id: Set(None),
                lon: Set(0.0),
                lat: Set(0.0),
                srid: Set(WGS84_SRID),
                geom_wkt: Set("POINT(0 0)".to_string()),
                properties: Set(serde_json::json!({})),
            })
            .exec(txn)
            .await?
            .last_insert_id;

            let edge_id = graph_edges::Entity::insert(graph_edges::ActiveModel {
                edge_id: NotSet,
                rel_type: Set(CONNECTS_TYPE.to_string()),
                start_node: Set(node_id),
                end_node: Set(node_id),
                osm_id: Set(None),
                start_id: Set(0),
                end_id: Set(0),
                geom: Set(serde_json::json!([])),
                way: Set(String::new()),
                length: Set(0.0),
                ref_osm_nodes: Set(serde_json::json!([])),
                properties: Set(serde_json::json!({})),
            })
            .exec(txn)
            .await?
            .last_insert_id;

            for index in GraphIndex::enabled(spatial) {
                txn.execute(backend.build(&index.create_statement())).await?;
                info!("Created index {}", index);
            }

            graph_edges::Entity::delete_by_id(edge_id).exec(txn).await?;
            graph_nodes::Entity::delete_by_id(node_id).exec(txn).await?;
        }
        self.commit().await
    }

    /// Drops every maintained index. An index that is not there is reported and skipped.
    pub async fn drop_indexes(&mut self) -> Result<(), WriterError> {
        {
            let txn = self.txn()?;
            let backend = txn.get_database_backend();
            for index in GraphIndex::ALL {
                let savepoint = txn.begin().await?;
                match savepoint.execute(backend.build(&index.drop_statement())).await {
                    Ok(_) => {
                        savepoint.commit().await?;
                        info!("Dropped index {}", index);
                    }
                    Err(e) => {
                        savepoint.rollback().await?;
                        warn!("Index {} not dropped: {}", index, e);
                    }
                }
            }
        }
        self.commit().await
    }

    /// Commits pending work and releases the writer's store handle.
    pub async fn shutdown(mut self) -> Result<WriterStats, WriterError> {
        if let Some(txn) = self.txn.take() {
            txn.commit().await?;
            self.stats.commits += 1;
        }
        info!(
            "Graph writer closed: {} points, {} edges written, {} commits",
            self.stats.points_written, self.stats.edges_written, self.stats.commits
        );
        Ok(self.stats)
    }

    /// Rolls back the open batch. Already committed batches stay.
    pub async fn abort(mut self) -> Result<WriterStats, WriterError> {
        if let Some(txn) = self.txn.take() {
            warn!(
                "Rolling back pending batch of {} cost units",
                self.pending_cost
            );
            txn.rollback().await?;
        }
        Ok(self.stats)
    }
}

async fn resolve_node(txn: &DatabaseTransaction, osm_id: i64) -> Result<Option<i32>, DbErr> {
    graph_nodes::Entity::find()
        .select_only()
        .column(graph_nodes::Column::NodeId)
        .filter(graph_nodes::Column::Label.eq(INTERSECTION_LABEL))
        .filter(graph_nodes::Column::OsmId.eq(osm_id))
        .limit(1u64)
        .into_tuple()
        .one(txn)
        .await
}
