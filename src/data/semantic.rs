use std::collections::HashSet;

use super::object::{NodeId, ObjectRef, RelationId, WayId};
use super::tags::TagList;
use super::Osm;

/// Keys naming an object, by priority.
const NAME_KEYS: &[&str] = &["name", "ref", "note", "fixme", "sport"];

/// Keys telling what an object is, by priority.
const TYPE_KEYS: &[&str] = &[
    "amenity", "place", "historic", "leisure", "tourism", "landuse", "waterway", "railway", "natural",
];

const ROAD_CLASSES: &[&str] = &["primary", "secondary", "tertiary", "unclassified", "residential", "service"];

fn first_value<'a>(tags: &'a TagList, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| tags.get_value(key))
}

/// Type part of the name. The flag tells whether the type was composed from
/// several tags, in which case highway tags don't override it.
fn object_type(tags: &TagList, name: &mut Option<String>) -> Option<(String, bool)> {
    if let Some(kind) = first_value(tags, TYPE_KEYS) {
        return Some((kind.to_string(), false));
    }

    if tags.get_value("building").is_some() {
        let street = tags.get_value("addr:street");
        let number = tags.get_value("addr:housenumber");
        return Some(match (street, number) {
            (Some(street), Some(number)) => (format!("building {} {}", street, number), true),
            (None, Some(number)) => (format!("building housenumber {}", number), true),
            _ => {
                if name.is_none() {
                    *name = tags.get_value("addr:housename").map(str::to_string);
                }
                ("building".to_string(), false)
            }
        });
    }

    tags.get_value("emergency").map(|e| (e.to_string(), false))
}

fn highway_type(highway: &str) -> String {
    if ROAD_CLASSES.contains(&highway) {
        format!("{} road", highway)
    } else if highway == "pedestrian" {
        "pedestrian way/area".to_string()
    } else if highway == "construction" {
        "road/street under construction".to_string()
    } else {
        highway.to_string()
    }
}

/// Human readable description of an object with the given tags, e.g.
/// `residential road: "Main Street"`.
pub fn describe(tags: &TagList, type_string: &str) -> String {
    let mut name = first_value(tags, NAME_KEYS).map(str::to_string);
    let mut kind = object_type(tags, &mut name);

    if let Some(highway) = tags.get_value("highway") {
        if !kind.as_ref().map_or(false, |(_, composed)| *composed) {
            kind = Some((highway_type(highway), false));
        }
    }

    let description = match (kind, name) {
        (Some((kind, _)), Some(name)) => format!("{}: \"{}\"", kind, name),
        (Some((kind, _)), None) => kind,
        (None, Some(name)) => format!("{}: \"{}\"", type_string, name),
        (None, None) => format!("unspecified {}", type_string),
    };
    description.replace('_', " ")
}

impl Osm {
    pub fn object_name(&self, object: ObjectRef) -> String {
        match self.tags(object) {
            Some(tags) => describe(tags, object.type_string()),
            None => format!("unspecified {}", object.type_string()),
        }
    }

    /// Join the way members of a multipolygon into rings. Ways are connected
    /// at shared end nodes, reversing them where needed. A ring that cannot
    /// be closed is returned open.
    pub fn multipolygon_rings(&self, relation: RelationId) -> Vec<Vec<NodeId>> {
        let ways: Vec<WayId> = self
            .relation(relation)
            .members
            .iter()
            .filter_map(|m| m.object.as_way())
            .filter(|w| self.contains_way(*w) && self.way(*w).min_length(2))
            .collect();

        let mut seen: HashSet<WayId> = HashSet::new();
        let mut rings = Vec::new();
        for start in &ways {
            if !seen.insert(*start) {
                continue;
            }
            let mut ring = self.way(*start).node_chain().to_vec();

            while ring.first() != ring.last() {
                let end = ring[ring.len() - 1];
                let next = ways.iter().find(|w| !seen.contains(*w) && self.way(**w).ends_with_node(end));
                let Some(next) = next else {
                    break;
                };
                seen.insert(*next);
                let chain = self.way(*next).node_chain();
                if chain[0] == end {
                    ring.extend_from_slice(&chain[1..]);
                } else {
                    ring.extend(chain.iter().rev().skip(1));
                }
            }
            rings.push(ring);
        }
        rings
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::object::Member;
    use crate::data::osm::{Base, Relation};
    use crate::data::tags::Tag;
    use crate::data::test::{server_node, server_way, test_osm};

    fn tags(pairs: &[(&str, &str)]) -> TagList {
        pairs.iter().map(|(k, v)| Tag::new(*k, *v)).collect()
    }

    #[test]
    fn test_describe() {
        let cases: &[(&[(&str, &str)], &str)] = &[
            (&[], "unspecified way/area"),
            (&[("created_by", "x")], "unspecified way/area"),
            (&[("name", "Main Street")], "way/area: \"Main Street\""),
            (&[("highway", "residential"), ("name", "Main Street")], "residential road: \"Main Street\""),
            (&[("highway", "living_street")], "living street"),
            (&[("highway", "pedestrian")], "pedestrian way/area"),
            (&[("highway", "construction")], "road/street under construction"),
            (&[("amenity", "parking"), ("fixme", "check")], "parking: \"check\""),
            (&[("building", "yes"), ("addr:street", "Elm"), ("addr:housenumber", "3")], "building Elm 3"),
            (&[("building", "yes"), ("addr:housenumber", "3")], "building housenumber 3"),
            (&[("building", "yes"), ("addr:housename", "Rose Cottage")], "building: \"Rose Cottage\""),
            (&[("emergency", "fire_hydrant")], "fire hydrant"),
        ];
        for (input, expected) in cases {
            assert_eq!(describe(&tags(input), "way/area"), *expected);
        }
    }

    #[test]
    fn test_object_name() {
        let mut osm = test_osm();
        let n = server_node(&mut osm, 1);
        osm.node_mut(n).base.tags.push(Tag::new("sport", "soccer"));
        assert_eq!(osm.object_name(n.into()), "node: \"soccer\"");
        assert_eq!(
            osm.object_name(ObjectRef::Unresolved(crate::data::object::ObjectKind::Way, 5)),
            "unspecified way/area id"
        );
    }

    #[test]
    fn test_multipolygon_rings() {
        let mut osm = test_osm();
        let n: Vec<NodeId> = (1..=7).map(|id| server_node(&mut osm, id)).collect();
        let a = server_way(&mut osm, 10, &[n[0], n[1], n[2]]);
        // reversed on purpose
        let b = server_way(&mut osm, 11, &[n[0], n[3], n[2]]);
        let inner = server_way(&mut osm, 12, &[n[4], n[5], n[6], n[4]]);
        let mut relation = Relation::new(Base::new(1, 1));
        relation.base.tags.push(Tag::new("type", "multipolygon"));
        relation.members.push(Member::new(a, Some("outer")));
        relation.members.push(Member::new(inner, Some("inner")));
        relation.members.push(Member::new(b, Some("outer")));
        relation.members.push(Member::new(n[0], None));
        let r = osm.insert_relation(relation);

        let rings = osm.multipolygon_rings(r);
        assert_eq!(rings.len(), 2);
        assert_eq!(rings[0], vec![n[0], n[1], n[2], n[3], n[0]]);
        assert_eq!(rings[1], vec![n[4], n[5], n[6], n[4]]);
    }
}
