use log::{debug, warn};

use super::object::{ObjectRef, WayId};
use super::tags::Tag;
use super::Osm;

const ONEWAY_FORWARD: &str = "yes";
const ONEWAY_REVERSE: &str = "-1";

const SUFFIXES: &[(&str, &str)] = &[
    (":left", ":right"),
    (":right", ":left"),
    (":forward", ":backward"),
    (":backward", ":forward"),
];

const ROLE_FORWARD: &str = "forward";
const ROLE_BACKWARD: &str = "backward";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reversal {
    pub tags_flipped: usize,
    pub roles_flipped: usize,
}

/// Flip the direction encoded in a single tag. Returns whether it changed.
fn flip_tag(tag: &mut Tag) -> bool {
    let key = tag.key.to_ascii_lowercase();
    if key == "oneway" {
        let value = tag.value.to_ascii_lowercase();
        match value.as_str() {
            "yes" | "true" | "1" => tag.value = ONEWAY_REVERSE.to_string(),
            ONEWAY_REVERSE => tag.value = ONEWAY_FORWARD.to_string(),
            _ => {
                warn!(key = tag.key.as_str(), value = tag.value.as_str(); "Unknown oneway value");
                return false;
            }
        }
        return true;
    }

    if key == "sidewalk" {
        if tag.value.eq_ignore_ascii_case("left") {
            tag.value = "right".to_string();
        } else if tag.value.eq_ignore_ascii_case("right") {
            tag.value = "left".to_string();
        } else {
            return false;
        }
        return true;
    }

    match SUFFIXES.iter().find(|(from, _)| key.ends_with(from)) {
        Some((from, to)) => {
            let keep = tag.key.len() - from.len();
            tag.key.truncate(keep);
            tag.key.push_str(to);
            true
        }
        None => false,
    }
}

impl Osm {
    /// Reverse the node order of `way` together with the tags and route
    /// roles that depend on its direction.
    pub fn reverse_way(&mut self, way: WayId) -> Reversal {
        let mut result = Reversal::default();

        let w = self.way_mut(way);
        w.node_chain_mut().reverse();
        for tag in w.base.tags.tags_mut() {
            if flip_tag(tag) {
                result.tags_flipped += 1;
            }
        }
        self.mark_dirty(way.into());

        let object = ObjectRef::from(way);
        for relation in self.to_relations(object) {
            let r = self.relation_mut(relation);
            if !r.is_route() {
                continue;
            }
            let mut flipped = false;
            for member in r.members.iter_mut().filter(|m| m.object == object) {
                let role = match member.role() {
                    Some(role) if role.eq_ignore_ascii_case(ROLE_FORWARD) => ROLE_BACKWARD,
                    Some(role) if role.eq_ignore_ascii_case(ROLE_BACKWARD) => ROLE_FORWARD,
                    _ => continue,
                };
                member.role = Some(role.to_string());
                flipped = true;
                result.roles_flipped += 1;
            }
            if flipped {
                self.mark_dirty(relation.into());
            }
        }

        debug!(way = way.0, tags = result.tags_flipped, roles = result.roles_flipped; "Reversed way");
        result
    }
}
