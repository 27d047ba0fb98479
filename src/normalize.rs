use log::debug;

use crate::error::NormalizeError;
use crate::osm_source::{MEMBER_ELEMENT, NODE_ELEMENT, RawElement, TAG_ELEMENT, WAY_ELEMENT};
use crate::properties::{FieldKind, LAT, LON, OSM_ID, PropertySet, Scalar, is_structural};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemKind {
    Point,
    Road,
}

/// A source record flattened into typed properties.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedItem {
    pub kind: ItemKind,
    pub osm_id: i64,
    pub properties: PropertySet,
    /// Ordered point references. Always empty for points.
    pub members: Vec<i64>,
}

/// Flattens a raw point or road record.
///
/// Attributes are converted by name (`id` becomes `osm_id`, coordinates become floats,
/// `version`/`changeset`/`uid` integers, `visible` a boolean, anything else a string).
/// Each `<tag k v>` child adds a string property. A tag whose key collides with a
/// structural attribute is dropped so it cannot overwrite the typed value.
pub fn normalize(element: &RawElement) -> Result<NormalizedItem, NormalizeError> {
    let kind = match element.name.as_str() {
        NODE_ELEMENT => ItemKind::Point,
        WAY_ELEMENT => ItemKind::Road,
        other => return Err(NormalizeError::UnexpectedElement(other.to_string())),
    };

    let mut properties = PropertySet::new();
    for (key, raw) in &element.attributes {
        let value = FieldKind::of(key)
            .parse(raw)
            .ok_or_else(|| NormalizeError::InvalidField {
                field: key.clone(),
                value: raw.clone(),
            })?;
        let key = if key == "id" { OSM_ID } else { key.as_str() };
        properties.insert(key, value);
    }

    let osm_id = properties
        .osm_id()
        .ok_or_else(|| NormalizeError::MissingId {
            element: element.name.clone(),
        })?;

    if kind == ItemKind::Point {
        for field in [LON, LAT] {
            if properties.get_f64(field).is_none() {
                return Err(NormalizeError::MissingField { osm_id, field });
            }
        }
    }

    for tag in element.children_named(TAG_ELEMENT) {
        let (Some(key), Some(value)) = (tag.attribute("k"), tag.attribute("v")) else {
            return Err(NormalizeError::MalformedTag {
                osm_id,
                reason: "tag needs both k and v".to_string(),
            });
        };
        if is_structural(key) {
            debug!("Dropping tag `{}` on {}: collides with a structural field", key, osm_id);
            continue;
        }
        properties.insert(key, Scalar::from(value));
    }

    let members = match kind {
        ItemKind::Point => Vec::new(),
        ItemKind::Road => element
            .children_named(MEMBER_ELEMENT)
            .map(|nd| {
                nd.attribute("ref")
                    .and_then(|raw| FieldKind::Identifier.parse(raw))
                    .and_then(|scalar| scalar.as_i64())
                    .ok_or(NormalizeError::MalformedMember { osm_id })
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    Ok(NormalizedItem {
        kind,
        osm_id,
        properties,
        members,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> RawElement {
        RawElement::new("node")
            .with_attribute("id", "65354557")
            .with_attribute("version", "1")
            .with_attribute("timestamp", "2019-09-26T05:29:41Z")
            .with_attribute("lat", "37.7511897")
            .with_attribute("lon", "-122.3964163")
    }

    fn tag(k: &str, v: &str) -> RawElement {
        RawElement::new("tag").with_attribute("k", k).with_attribute("v", v)
    }

    fn nd(r: &str) -> RawElement {
        RawElement::new("nd").with_attribute("ref", r)
    }

    #[test]
    fn point_attributes_become_typed_properties() {
        let item = normalize(&point().with_child(tag("highway", "crossing"))).unwrap();

        assert_eq!(item.kind, ItemKind::Point);
        assert_eq!(item.osm_id, 65354557);
        assert_eq!(item.properties.osm_id(), Some(65354557));
        assert!(!item.properties.contains_key("id"));
        assert_eq!(item.properties.get_f64("lat"), Some(37.7511897));
        assert_eq!(item.properties.get_f64("lon"), Some(-122.3964163));
        assert_eq!(item.properties.get_i64("version"), Some(1));
        assert_eq!(item.properties.get_str("timestamp"), Some("2019-09-26T05:29:41Z"));
        assert_eq!(item.properties.get_str("highway"), Some("crossing"));
        assert!(item.members.is_empty());
    }

    #[test]
    fn road_keeps_member_order_and_tags() {
        let road = RawElement::new("way")
            .with_attribute("id", "8920510")
            .with_child(nd("65354557"))
            .with_child(nd("6916235511"))
            .with_child(nd("65354557"))
            .with_child(tag("highway", "residential"))
            .with_child(tag("maxspeed", "25"));
        let item = normalize(&road).unwrap();

        assert_eq!(item.kind, ItemKind::Road);
        assert_eq!(item.members, vec![65354557, 6916235511, 65354557]);
        assert_eq!(item.properties.get_str("highway"), Some("residential"));
        assert_eq!(item.properties.get_str("maxspeed"), Some("25"));
        assert!(!item.properties.contains_key("nd"));
    }

    #[test]
    fn single_tag_and_tag_among_many_normalize_alike() {
        let single = normalize(&point().with_child(tag("highway", "crossing"))).unwrap();
        let many = normalize(
            &point()
                .with_child(tag("name", "Texas Street"))
                .with_child(tag("highway", "crossing"))
                .with_child(tag("ref", "1")),
        )
        .unwrap();

        assert_eq!(single.properties.get("highway"), many.properties.get("highway"));
        assert_eq!(single.properties.get_str("highway"), Some("crossing"));
        assert_eq!(many.properties.len(), single.properties.len() + 2);
        for (key, value) in single.properties.iter() {
            assert_eq!(many.properties.get(key), Some(value), "{key}");
        }
    }

    #[test]
    fn tags_cannot_override_structural_fields() {
        let item = normalize(&point().with_child(tag("lat", "0")).with_child(tag("osm_id", "1")))
            .unwrap();
        assert_eq!(item.properties.get_f64("lat"), Some(37.7511897));
        assert_eq!(item.properties.osm_id(), Some(65354557));
    }

    #[test]
    fn point_without_coordinates_is_rejected() {
        let raw = RawElement::new("node").with_attribute("id", "5").with_attribute("lat", "1.0");
        assert_eq!(
            normalize(&raw),
            Err(NormalizeError::MissingField { osm_id: 5, field: "lon" })
        );
    }

    #[test]
    fn malformed_records_are_rejected() {
        assert!(matches!(
            normalize(&RawElement::new("way")),
            Err(NormalizeError::MissingId { .. })
        ));
        assert!(matches!(
            normalize(&RawElement::new("relation").with_attribute("id", "1")),
            Err(NormalizeError::UnexpectedElement(_))
        ));
        assert!(matches!(
            normalize(&point().with_attribute("version", "x")),
            Err(NormalizeError::InvalidField { .. })
        ));
        assert!(matches!(
            normalize(&point().with_child(RawElement::new("tag").with_attribute("k", "name"))),
            Err(NormalizeError::MalformedTag { osm_id: 65354557, .. })
        ));
        assert!(matches!(
            normalize(&RawElement::new("way").with_attribute("id", "2").with_child(nd("x"))),
            Err(NormalizeError::MalformedMember { osm_id: 2 })
        ));
    }
}
