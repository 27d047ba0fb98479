//! Loads OpenStreetMap points and roads into a property graph.
//!
//! Points become `INTERSECTION` nodes and every adjacent pair of road members becomes two
//! directed `CONNECTS` edges carrying the segment geometry. Loading runs as two streaming
//! passes over the source (points, then roads) feeding a single batched writer.

pub mod config;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod loader;
pub mod normalize;
pub mod osm_source;
pub mod properties;
pub mod store;
pub mod writer;

pub use config::{BatchConfig, LoaderConfig, StoreConfig};
pub use error::{GeometryError, LoadError, LookupError, NormalizeError, SourceError, WriterError};
pub use geometry::{EdgeDraft, MemoryPointLookup, PointLookup};
pub use loader::{Action, LoadReport, run_action};
pub use properties::{PropertySet, Scalar};
pub use store::{GraphEdge, GraphPoint, GraphStore};
pub use writer::{GraphWriter, RecordOutcome, SkipReason, WriterStats};
