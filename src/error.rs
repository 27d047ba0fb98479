use std::path::PathBuf;

use sea_orm::DbErr;
use thiserror::Error;

/// Failures while opening or scanning the OSM source. All of them abort the run.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot open OSM source {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed OSM document at byte {position}: {message}")]
    Malformed { position: u64, message: String },
    #[error("unreadable PBF data: {0}")]
    Pbf(#[from] osmpbf::Error),
    #[error("source scan task failed: {0}")]
    Task(String),
}

/// A single raw record that could not be turned into a property set.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("<{0}> is neither a point nor a road record")]
    UnexpectedElement(String),
    #[error("<{element}> record has no id")]
    MissingId { element: String },
    #[error("record {osm_id} is missing required field `{field}`")]
    MissingField { osm_id: i64, field: &'static str },
    #[error("field `{field}` has invalid value `{value}`")]
    InvalidField { field: String, value: String },
    #[error("record {osm_id} has a malformed tag: {reason}")]
    MalformedTag { osm_id: i64, reason: String },
    #[error("record {osm_id} has a member reference without a numeric ref")]
    MalformedMember { osm_id: i64 },
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("point {0} not found")]
    NotFound(i64),
    #[error("point {0} matches more than one stored node")]
    Ambiguous(i64),
    #[error("point lookup failed: {0}")]
    Store(#[from] DbErr),
}

/// Per-edge geometry failure; never fatal for the load.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("span {start}..{end} is outside a road of {len} members")]
    SpanOutOfRange { start: usize, end: usize, len: usize },
    #[error("span starts and ends at member {0}")]
    DegenerateSpan(usize),
}

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("graph store error: {0}")]
    Store(#[from] DbErr),
    #[error("graph writer has no open transaction")]
    Closed,
}

/// Errors that end a run. Everything per-record is handled below this level.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("graph store error: {0}")]
    Store(#[from] DbErr),
    #[error(transparent)]
    Writer(#[from] WriterError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("unsupported action `{0}` (expected one of: load, load-points, load-roads, create-indexes, reset)")]
    UnsupportedAction(String),
}
