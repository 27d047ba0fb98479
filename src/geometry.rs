use std::collections::HashMap;

use async_trait::async_trait;
use geo::{Coord, Distance, Euclidean, LineString, Point};

use crate::error::{GeometryError, LookupError};
use crate::normalize::NormalizedItem;
use crate::properties::{PropertySet, Scalar};

/// Equatorial radius used to turn angular lengths into meters.
pub const EARTH_RADIUS_METERS: f64 = 6_378_137.0;
pub const WGS84_SRID: i32 = 4326;

/// Resolves a point's source id to its stored coordinate.
#[async_trait]
pub trait PointLookup: Send + Sync {
    async fn lookup(&self, osm_id: i64) -> Result<Coord<f64>, LookupError>;
}

/// In-memory lookup, for tests and small extracts.
#[derive(Clone, Debug, Default)]
pub struct MemoryPointLookup {
    points: HashMap<i64, Coord<f64>>,
}

impl MemoryPointLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, osm_id: i64, lon: f64, lat: f64) {
        self.points.insert(osm_id, Coord { x: lon, y: lat });
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl FromIterator<(i64, Coord<f64>)> for MemoryPointLookup {
    fn from_iter<T: IntoIterator<Item = (i64, Coord<f64>)>>(iter: T) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl PointLookup for MemoryPointLookup {
    async fn lookup(&self, osm_id: i64) -> Result<Coord<f64>, LookupError> {
        self.points
            .get(&osm_id)
            .copied()
            .ok_or(LookupError::NotFound(osm_id))
    }
}

/// Geometry of one directed slice of a road.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentGeometry {
    pub line: LineString<f64>,
    pub wkt: String,
    /// Member ids covered by the slice, in traversal order.
    pub ref_osm_nodes: Vec<i64>,
    pub length: f64,
}

/// Resolves `members[start..=end]` (walked backwards when `start > end`) into a line.
pub async fn assemble_segment<L: PointLookup + ?Sized>(
    members: &[i64],
    start: usize,
    end: usize,
    lookup: &L,
) -> Result<SegmentGeometry, GeometryError> {
    if start >= members.len() || end >= members.len() {
        return Err(GeometryError::SpanOutOfRange {
            start,
            end,
            len: members.len(),
        });
    }
    if start == end {
        return Err(GeometryError::DegenerateSpan(start));
    }

    let ref_osm_nodes: Vec<i64> = if start < end {
        members[start..=end].to_vec()
    } else {
        members[end..=start].iter().rev().copied().collect()
    };

    let mut coords = Vec::with_capacity(ref_osm_nodes.len());
    for osm_id in &ref_osm_nodes {
        coords.push(lookup.lookup(*osm_id).await?);
    }

    let line = LineString::from(coords);
    Ok(SegmentGeometry {
        wkt: line_wkt(&line),
        length: metric_length(&line),
        line,
        ref_osm_nodes,
    })
}

/// Planar length in degrees scaled by the Earth radius. Close to the great-circle
/// distance for short segments.
pub fn metric_length(line: &LineString<f64>) -> f64 {
    let degrees: f64 = line
        .lines()
        .map(|segment| Euclidean.distance(Point::from(segment.start), Point::from(segment.end)))
        .sum();
    degrees.to_radians() * EARTH_RADIUS_METERS
}

pub fn point_wkt(coord: Coord<f64>) -> String {
    format!("POINT({} {})", coord.x, coord.y)
}

pub fn line_wkt(line: &LineString<f64>) -> String {
    let coords: Vec<String> = line
        .coords()
        .map(|coord| format!("{} {}", coord.x, coord.y))
        .collect();
    format!("LINESTRING({})", coords.join(","))
}

/// Index pairs for every adjacent member pair: forward first, then backward.
pub fn directed_pairs(len: usize) -> impl Iterator<Item = (usize, usize)> {
    (1..len).flat_map(|i| [(i - 1, i), (i, i - 1)])
}

/// Everything needed to write one directed edge.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeDraft {
    pub osm_id: i64,
    pub start_id: i64,
    pub end_id: i64,
    pub properties: PropertySet,
    pub geometry: SegmentGeometry,
}

pub async fn edge_draft<L: PointLookup + ?Sized>(
    road: &NormalizedItem,
    start: usize,
    end: usize,
    lookup: &L,
) -> Result<EdgeDraft, GeometryError> {
    let geometry = assemble_segment(&road.members, start, end, lookup).await?;
    let start_id = road.members[start];
    let end_id = road.members[end];

    let mut properties = road.properties.clone();
    properties.insert("way", Scalar::String(geometry.wkt.clone()));
    properties.insert("length", geometry.length);
    properties.insert("start_id", start_id);
    properties.insert("end_id", end_id);

    Ok(EdgeDraft {
        osm_id: road.osm_id,
        start_id,
        end_id,
        properties,
        geometry,
    })
}

/// One draft (or the reason it could not be built) per directed pair of the road.
pub async fn road_edges<L: PointLookup + ?Sized>(
    road: &NormalizedItem,
    lookup: &L,
) -> Vec<Result<EdgeDraft, GeometryError>> {
    let mut drafts = Vec::with_capacity(road.members.len().saturating_sub(1) * 2);
    for (start, end) in directed_pairs(road.members.len()) {
        drafts.push(edge_draft(road, start, end, lookup).await);
    }
    drafts
}
