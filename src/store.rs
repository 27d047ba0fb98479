use async_trait::async_trait;
use geo_types::{Coord, LineString};
use log::{debug, info};
use migration::{Migrator, MigratorTrait};
use sea_orm::sea_query::{Index, IndexCreateStatement, IndexDropStatement};
use sea_orm::{
    ColumnTrait, Condition, ConnectOptions, ConnectionTrait, Database, DatabaseBackend,
    DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};

use crate::config::StoreConfig;
use crate::entity::{graph_edges, graph_nodes};
use crate::error::LookupError;
use crate::geometry::PointLookup;
use crate::properties::PropertySet;

/// Label carried by every point node.
pub const INTERSECTION_LABEL: &str = "INTERSECTION";
/// Relationship type carried by every road edge.
pub const CONNECTS_TYPE: &str = "CONNECTS";

/// Handle to the property graph. Cloning shares the connection pool.
#[derive(Clone, Debug)]
pub struct GraphStore {
    db: DatabaseConnection,
}

impl GraphStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self, DbErr> {
        if config.database_url.is_none() {
            let path = config.sqlite_path();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DbErr::Custom(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        let url = config.connection_url();
        let mut options = ConnectOptions::new(url);
        options
            .max_connections(config.max_connections)
            .sqlx_logging(false);
        let db = Database::connect(options).await?;

        if db.get_database_backend() == DatabaseBackend::Sqlite {
            // Lets point lookups read committed rows while the writer holds its transaction.
            db.execute_unprepared("PRAGMA journal_mode=WAL").await?;
        }

        Migrator::up(&db, None).await?;
        info!(
            "Connected to graph store ({:?})",
            db.get_database_backend()
        );
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.db.get_database_backend()
    }

    pub fn point_lookup(&self) -> StorePointLookup {
        StorePointLookup {
            db: self.db.clone(),
        }
    }

    pub async fn count_nodes(&self) -> Result<u64, DbErr> {
        graph_nodes::Entity::find().count(&self.db).await
    }

    pub async fn count_edges(&self) -> Result<u64, DbErr> {
        graph_edges::Entity::find().count(&self.db).await
    }

    pub async fn find_point(&self, osm_id: i64) -> Result<Option<GraphPoint>, DbErr> {
        graph_nodes::Entity::find()
            .filter(graph_nodes::Column::Label.eq(INTERSECTION_LABEL))
            .filter(graph_nodes::Column::OsmId.eq(osm_id))
            .one(&self.db)
            .await?
            .map(GraphPoint::try_from)
            .transpose()
    }

    /// Directed edges from `start_id` to `end_id`, in insertion order.
    pub async fn find_edges(&self, start_id: i64, end_id: i64) -> Result<Vec<GraphEdge>, DbErr> {
        graph_edges::Entity::find()
            .filter(graph_edges::Column::StartId.eq(start_id))
            .filter(graph_edges::Column::EndId.eq(end_id))
            .order_by_asc(graph_edges::Column::EdgeId)
            .all(&self.db)
            .await?
            .into_iter()
            .map(GraphEdge::try_from)
            .collect()
    }

    /// Edges that start or end at the given point.
    pub async fn edges_touching(&self, osm_id: i64) -> Result<Vec<GraphEdge>, DbErr> {
        graph_edges::Entity::find()
            .filter(
                Condition::any()
                    .add(graph_edges::Column::StartId.eq(osm_id))
                    .add(graph_edges::Column::EndId.eq(osm_id)),
            )
            .order_by_asc(graph_edges::Column::EdgeId)
            .all(&self.db)
            .await?
            .into_iter()
            .map(GraphEdge::try_from)
            .collect()
    }

    pub async fn close(self) -> Result<(), DbErr> {
        debug!("Closing graph store");
        self.db.close().await
    }
}

/// Point lookup backed by the store. Each call is one short read on a pooled connection,
/// so it only sees committed points.
#[derive(Clone, Debug)]
pub struct StorePointLookup {
    db: DatabaseConnection,
}

#[async_trait]
impl PointLookup for StorePointLookup {
    async fn lookup(&self, osm_id: i64) -> Result<Coord<f64>, LookupError> {
        // two rows are enough to tell a unique match from a duplicate
        let rows: Vec<(f64, f64)> = graph_nodes::Entity::find()
            .select_only()
            .column(graph_nodes::Column::Lon)
            .column(graph_nodes::Column::Lat)
            .filter(graph_nodes::Column::Label.eq(INTERSECTION_LABEL))
            .filter(graph_nodes::Column::OsmId.eq(osm_id))
            .limit(2u64)
            .into_tuple()
            .all(&self.db)
            .await?;

        match rows.as_slice() {
            [] => Err(LookupError::NotFound(osm_id)),
            [(lon, lat)] => Ok(Coord { x: *lon, y: *lat }),
            _ => Err(LookupError::Ambiguous(osm_id)),
        }
    }
}

/// A stored point node.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphPoint {
    pub node_id: i32,
    pub osm_id: i64,
    pub coord: Coord<f64>,
    pub srid: i32,
    pub wkt: String,
    pub properties: PropertySet,
}

impl TryFrom<graph_nodes::Model> for GraphPoint {
    type Error = DbErr;

    fn try_from(model: graph_nodes::Model) -> Result<Self, Self::Error> {
        let osm_id = model
            .osm_id
            .ok_or_else(|| DbErr::Custom(format!("node {} has no osm_id", model.node_id)))?;
        let properties = serde_json::from_value(model.properties)
            .map_err(|e| DbErr::Json(e.to_string()))?;
        Ok(Self {
            node_id: model.node_id,
            osm_id,
            coord: Coord {
                x: model.lon,
                y: model.lat,
            },
            srid: model.srid,
            wkt: model.geom_wkt,
            properties,
        })
    }
}

/// A stored directed road edge.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphEdge {
    pub edge_id: i32,
    pub osm_id: Option<i64>,
    pub start_node: i32,
    pub end_node: i32,
    pub start_id: i64,
    pub end_id: i64,
    pub line: LineString<f64>,
    pub way: String,
    pub length: f64,
    pub ref_osm_nodes: Vec<i64>,
    pub properties: PropertySet,
}

impl TryFrom<graph_edges::Model> for GraphEdge {
    type Error = DbErr;

    fn try_from(model: graph_edges::Model) -> Result<Self, Self::Error> {
        let json_err = |e: serde_json::Error| DbErr::Json(e.to_string());
        Ok(Self {
            edge_id: model.edge_id,
            osm_id: model.osm_id,
            start_node: model.start_node,
            end_node: model.end_node,
            start_id: model.start_id,
            end_id: model.end_id,
            line: serde_json::from_value(model.geom).map_err(json_err)?,
            way: model.way,
            length: model.length,
            ref_osm_nodes: serde_json::from_value(model.ref_osm_nodes).map_err(json_err)?,
            properties: serde_json::from_value(model.properties).map_err(json_err)?,
        })
    }
}

/// Secondary indexes managed by the maintenance actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphIndex {
    /// Unique `osm_id` on point nodes; backs point lookups.
    PointId,
    /// `(lon, lat)` on point nodes.
    PointGeometry,
    /// `(start_id, end_id)` on edges.
    EdgeDirection,
}

impl GraphIndex {
    pub const ALL: [GraphIndex; 3] = [
        GraphIndex::PointId,
        GraphIndex::PointGeometry,
        GraphIndex::EdgeDirection,
    ];

    pub fn enabled(spatial: bool) -> Vec<GraphIndex> {
        Self::ALL
            .into_iter()
            .filter(|index| spatial || *index != GraphIndex::PointGeometry)
            .collect()
    }

    pub fn name(self) -> &'static str {
        match self {
            GraphIndex::PointId => "idx_intersection_osm_id",
            GraphIndex::PointGeometry => "idx_intersection_geom",
            GraphIndex::EdgeDirection => "idx_connects_direction",
        }
    }

    pub fn create_statement(self) -> IndexCreateStatement {
        let mut stmt = Index::create();
        stmt.name(self.name()).if_not_exists();
        match self {
            GraphIndex::PointId => stmt
                .table(graph_nodes::Entity)
                .col(graph_nodes::Column::OsmId)
                .unique(),
            GraphIndex::PointGeometry => stmt
                .table(graph_nodes::Entity)
                .col(graph_nodes::Column::Lon)
                .col(graph_nodes::Column::Lat),
            GraphIndex::EdgeDirection => stmt
                .table(graph_edges::Entity)
                .col(graph_edges::Column::StartId)
                .col(graph_edges::Column::EndId),
        };
        stmt
    }

    pub fn drop_statement(self) -> IndexDropStatement {
        let mut stmt = Index::drop();
        stmt.name(self.name());
        match self {
            GraphIndex::PointId | GraphIndex::PointGeometry => stmt.table(graph_nodes::Entity),
            GraphIndex::EdgeDirection => stmt.table(graph_edges::Entity),
        };
        stmt
    }
}

impl std::fmt::Display for GraphIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
