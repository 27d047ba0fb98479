use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{debug, info};
use osmpbf::{DenseNodeInfo, Element, ElementReader, Info};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SourceError;

pub const ROOT_ELEMENT: &str = "osm";
pub const NODE_ELEMENT: &str = "node";
pub const WAY_ELEMENT: &str = "way";
pub const TAG_ELEMENT: &str = "tag";
pub const MEMBER_ELEMENT: &str = "nd";

/// Timestamp layout of the XML export.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Default tag key that marks a way as a road.
pub const DEFAULT_CLASSIFICATION_KEY: &str = "highway";

/// One record's subtree as it appears in the source, before normalization.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<RawElement>,
}

impl RawElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: RawElement) -> Self {
        self.children.push(child);
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a RawElement> {
        self.children.iter().filter(move |child| child.name == name)
    }

    pub fn has_tag(&self, key: &str) -> bool {
        self.children_named(TAG_ELEMENT)
            .any(|tag| tag.attribute("k") == Some(key))
    }

    fn tag(key: &str, value: &str) -> Self {
        RawElement::new(TAG_ELEMENT)
            .with_attribute("k", key)
            .with_attribute("v", value)
    }
}

/// Which top-level records a scan yields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordFilter {
    /// `/osm/node`
    Points,
    /// `/osm/way[tag/@k = classification_key]`
    Roads { classification_key: String },
}

impl RecordFilter {
    pub fn roads() -> Self {
        RecordFilter::Roads {
            classification_key: DEFAULT_CLASSIFICATION_KEY.to_string(),
        }
    }

    pub fn element_name(&self) -> &'static str {
        match self {
            RecordFilter::Points => NODE_ELEMENT,
            RecordFilter::Roads { .. } => WAY_ELEMENT,
        }
    }

    pub fn matches(&self, element: &RawElement) -> bool {
        if element.name != self.element_name() {
            return false;
        }
        match self {
            RecordFilter::Points => true,
            RecordFilter::Roads { classification_key } => element.has_tag(classification_key),
        }
    }
}

impl std::fmt::Display for RecordFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordFilter::Points => write!(f, "/{}/{}", ROOT_ELEMENT, NODE_ELEMENT),
            RecordFilter::Roads { classification_key } => write!(
                f,
                "/{}/{}[{}/@k='{}']",
                ROOT_ELEMENT, WAY_ELEMENT, TAG_ELEMENT, classification_key
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    Xml,
    Pbf,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("pbf") => SourceFormat::Pbf,
            _ => SourceFormat::Xml,
        }
    }
}

/// A re-readable OSM export on disk. Each scan is an independent forward pass.
#[derive(Clone, Debug)]
pub struct OsmSource {
    path: PathBuf,
    format: SourceFormat,
}

impl OsmSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|source| SourceError::Open {
            path: path.clone(),
            source,
        })?;
        if !metadata.is_file() {
            return Err(SourceError::Open {
                path,
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            });
        }

        let format = SourceFormat::from_path(&path);
        info!(
            "Opened OSM source {} ({:?}, {} bytes)",
            path.display(),
            format,
            metadata.len()
        );
        Ok(Self { path, format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    /// Lazy record stream over an XML export.
    pub fn xml_records(
        &self,
        filter: RecordFilter,
    ) -> Result<XmlRecordStream<BufReader<File>>, SourceError> {
        let file = File::open(&self.path).map_err(|source| SourceError::Open {
            path: self.path.clone(),
            source,
        })?;
        Ok(XmlRecordStream::new(BufReader::new(file), filter))
    }

    /// Scans the source on a blocking task and hands matching records over a bounded
    /// channel. The join handle yields the number of records sent, or the fatal error
    /// that stopped the scan.
    pub fn scan(
        &self,
        filter: RecordFilter,
        capacity: usize,
    ) -> (
        mpsc::Receiver<RawElement>,
        JoinHandle<Result<u64, SourceError>>,
    ) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let source = self.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let start_time = Instant::now();
            let emitted = match source.format {
                SourceFormat::Xml => source.scan_xml(&filter, &tx),
                SourceFormat::Pbf => source.scan_pbf(&filter, &tx),
            }?;
            debug!(
                "Scan {} over {} emitted {} records in {:?}",
                filter,
                source.path.display(),
                emitted,
                start_time.elapsed()
            );
            Ok(emitted)
        });
        (rx, handle)
    }

    fn scan_xml(
        &self,
        filter: &RecordFilter,
        tx: &mpsc::Sender<RawElement>,
    ) -> Result<u64, SourceError> {
        let mut emitted = 0;
        for record in self.xml_records(filter.clone())? {
            if tx.blocking_send(record?).is_err() {
                debug!("Record consumer went away, stopping scan");
                break;
            }
            emitted += 1;
        }
        Ok(emitted)
    }

    fn scan_pbf(
        &self,
        filter: &RecordFilter,
        tx: &mpsc::Sender<RawElement>,
    ) -> Result<u64, SourceError> {
        let reader = ElementReader::from_path(&self.path)?;
        let mut emitted = 0;
        let mut consumer_gone = false;

        // for_each has no early exit; once the consumer is gone the remaining blobs are skipped.
        reader.for_each(|element| {
            if consumer_gone {
                return;
            }

            let record = match (filter, element) {
                (RecordFilter::Points, Element::Node(node)) => Some(point_element(
                    node.id(),
                    node.lon(),
                    node.lat(),
                    &Metadata::from_info(&node.info()),
                    node.tags(),
                )),
                (RecordFilter::Points, Element::DenseNode(node)) => {
                    let metadata = node.info().map(Metadata::from_dense).unwrap_or_default();
                    Some(point_element(
                        node.id(),
                        node.lon(),
                        node.lat(),
                        &metadata,
                        node.tags(),
                    ))
                }
                (RecordFilter::Roads { classification_key }, Element::Way(way)) => {
                    if way.tags().any(|(key, _)| key == classification_key) {
                        Some(way_element(
                            way.id(),
                            &Metadata::from_info(&way.info()),
                            way.refs(),
                            way.tags(),
                        ))
                    } else {
                        None
                    }
                }
                _ => None,
            };

            if let Some(record) = record {
                if tx.blocking_send(record).is_err() {
                    debug!("Record consumer went away, stopping scan");
                    consumer_gone = true;
                } else {
                    emitted += 1;
                }
            }
        })?;

        Ok(emitted)
    }
}

/// Object metadata of a PBF record, spelled as the XML export spells it.
#[derive(Clone, Debug, PartialEq)]
struct Metadata {
    version: Option<i32>,
    timestamp_ms: Option<i64>,
    changeset: Option<i64>,
    uid: Option<i32>,
    user: Option<String>,
    visible: bool,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            version: None,
            timestamp_ms: None,
            changeset: None,
            uid: None,
            user: None,
            visible: true,
        }
    }
}

impl Metadata {
    fn from_info(info: &Info<'_>) -> Self {
        Self {
            version: info.version(),
            timestamp_ms: info.milli_timestamp(),
            changeset: info.changeset(),
            uid: info.uid(),
            user: info.user().and_then(|user| user.ok()).map(str::to_string),
            visible: info.visible(),
        }
    }

    fn from_dense(info: &DenseNodeInfo<'_>) -> Self {
        Self {
            version: Some(info.version()),
            timestamp_ms: Some(info.milli_timestamp()),
            changeset: Some(info.changeset()),
            uid: Some(info.uid()),
            user: info.user().ok().map(str::to_string),
            visible: info.visible(),
        }
    }

    /// Appends the known fields in XML attribute order. Zero ids mean unset in PBF and
    /// are left out. `visible` only appears for deleted objects, which only history
    /// files carry.
    fn apply(&self, mut element: RawElement) -> RawElement {
        if let Some(version) = self.version.filter(|v| *v != 0) {
            element = element.with_attribute("version", version.to_string());
        }
        if let Some(timestamp) = self
            .timestamp_ms
            .and_then(DateTime::<Utc>::from_timestamp_millis)
        {
            let timestamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
            element = element.with_attribute("timestamp", timestamp);
        }
        if let Some(changeset) = self.changeset.filter(|c| *c != 0) {
            element = element.with_attribute("changeset", changeset.to_string());
        }
        if let Some(uid) = self.uid.filter(|u| *u != 0) {
            element = element.with_attribute("uid", uid.to_string());
        }
        if let Some(user) = self.user.as_deref().filter(|user| !user.is_empty()) {
            element = element.with_attribute("user", user);
        }
        if !self.visible {
            element = element.with_attribute("visible", "false");
        }
        element
    }
}

fn point_element<'a>(
    id: i64,
    lon: f64,
    lat: f64,
    metadata: &Metadata,
    tags: impl Iterator<Item = (&'a str, &'a str)>,
) -> RawElement {
    let mut element = metadata
        .apply(RawElement::new(NODE_ELEMENT).with_attribute("id", id.to_string()))
        .with_attribute("lat", lat.to_string())
        .with_attribute("lon", lon.to_string());
    element
        .children
        .extend(tags.map(|(key, value)| RawElement::tag(key, value)));
    element
}

fn way_element<'a>(
    id: i64,
    metadata: &Metadata,
    refs: impl Iterator<Item = i64>,
    tags: impl Iterator<Item = (&'a str, &'a str)>,
) -> RawElement {
    let mut element =
        metadata.apply(RawElement::new(WAY_ELEMENT).with_attribute("id", id.to_string()));
    element.children.extend(
        refs.map(|node_ref| RawElement::new(MEMBER_ELEMENT).with_attribute("ref", node_ref.to_string())),
    );
    element
        .children
        .extend(tags.map(|(key, value)| RawElement::tag(key, value)));
    element
}

/// Forward-only iterator over the top-level records of an OSM XML document that match a
/// [`RecordFilter`]. Only one record subtree is held in memory at a time; subtrees that
/// cannot match are skipped without being built.
pub struct XmlRecordStream<R: BufRead> {
    reader: Reader<R>,
    filter: RecordFilter,
    buf: Vec<u8>,
    skip_buf: Vec<u8>,
    seen_root: bool,
    root_closed: bool,
    finished: bool,
}

impl<R: BufRead> XmlRecordStream<R> {
    pub fn new(input: R, filter: RecordFilter) -> Self {
        let mut reader = Reader::from_reader(input);
        reader.trim_text(true);
        Self {
            reader,
            filter,
            buf: Vec::new(),
            skip_buf: Vec::new(),
            seen_root: false,
            root_closed: false,
            finished: false,
        }
    }

    fn malformed(&self, message: impl Into<String>) -> SourceError {
        SourceError::Malformed {
            position: self.reader.buffer_position() as u64,
            message: message.into(),
        }
    }

    fn next_event(&mut self) -> Result<Event<'static>, SourceError> {
        let event = self
            .reader
            .read_event_into(&mut self.buf)
            .map(|event| event.into_owned());
        self.buf.clear();
        event.map_err(|e| self.malformed(e.to_string()))
    }

    fn open_root(&mut self, start: &BytesStart<'_>) -> Result<(), SourceError> {
        let name = element_name(start);
        if name != ROOT_ELEMENT {
            return Err(self.malformed(format!(
                "expected <{}> root element, found <{}>",
                ROOT_ELEMENT, name
            )));
        }
        self.seen_root = true;
        Ok(())
    }

    fn build_element(&self, start: &BytesStart<'_>) -> Result<RawElement, SourceError> {
        let mut element = RawElement::new(element_name(start));
        for attr in start.attributes() {
            let attr = attr.map_err(|e| self.malformed(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| self.malformed(e.to_string()))?
                .into_owned();
            element.attributes.push((key, value));
        }
        Ok(element)
    }

    fn read_children(&mut self, element: &mut RawElement) -> Result<(), SourceError> {
        loop {
            match self.next_event()? {
                Event::Start(start) => {
                    let mut child = self.build_element(&start)?;
                    self.read_children(&mut child)?;
                    element.children.push(child);
                }
                Event::Empty(start) => {
                    let child = self.build_element(&start)?;
                    element.children.push(child);
                }
                Event::End(_) => return Ok(()),
                Event::Eof => {
                    return Err(self.malformed(format!(
                        "unexpected end of document inside <{}>",
                        element.name
                    )));
                }
                _ => {}
            }
        }
    }

    fn skip_subtree(&mut self, name: &[u8]) -> Result<(), SourceError> {
        let result = self.reader.read_to_end_into(QName(name), &mut self.skip_buf);
        self.skip_buf.clear();
        result.map(|_| ()).map_err(|e| self.malformed(e.to_string()))
    }

    fn advance(&mut self) -> Result<Option<RawElement>, SourceError> {
        loop {
            match self.next_event()? {
                Event::Start(start) => {
                    if !self.seen_root {
                        self.open_root(&start)?;
                        continue;
                    }
                    if self.root_closed {
                        return Err(self.malformed("content after the root element"));
                    }
                    if element_name(&start) == self.filter.element_name() {
                        let mut element = self.build_element(&start)?;
                        self.read_children(&mut element)?;
                        if self.filter.matches(&element) {
                            return Ok(Some(element));
                        }
                    } else {
                        let name = start.name().as_ref().to_vec();
                        self.skip_subtree(&name)?;
                    }
                }
                Event::Empty(start) => {
                    if !self.seen_root {
                        // <osm/>: a valid document without records
                        self.open_root(&start)?;
                        self.root_closed = true;
                        continue;
                    }
                    if self.root_closed {
                        return Err(self.malformed("content after the root element"));
                    }
                    if element_name(&start) == self.filter.element_name() {
                        let element = self.build_element(&start)?;
                        if self.filter.matches(&element) {
                            return Ok(Some(element));
                        }
                    }
                }
                Event::End(_) => {
                    self.root_closed = true;
                }
                Event::Eof => {
                    if !self.seen_root {
                        return Err(self.malformed("document has no <osm> root element"));
                    }
                    if !self.root_closed {
                        return Err(self.malformed("unexpected end of document inside <osm>"));
                    }
                    return Ok(None);
                }
                _ => {}
            }
        }
    }
}

impl<R: BufRead> Iterator for XmlRecordStream<R> {
    type Item = Result<RawElement, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.advance() {
            Ok(Some(element)) => Some(Ok(element)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

fn element_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}
