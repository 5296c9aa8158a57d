use log::debug;

use super::delete::{NodeDeleteMode, OrphanNodes, WayRefs};
use super::object::{NodeId, ObjectRef, WayId};
use super::osm::Base;
use super::{MapView, Osm};

/// Result of merging two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeMerge {
    pub survivor: NodeId,
    /// Both nodes had the same tag key with different values.
    pub conflict: bool,
    /// Each node was the end of exactly one open way before the merge, so
    /// these two ways could be joined now.
    pub ways_to_join: Option<[WayId; 2]>,
}

impl Osm {
    fn base_of(&self, object: ObjectRef) -> &Base {
        self.base(object)
            .unwrap_or_else(|| panic!("{} is not part of the graph", object))
    }

    /// Whether `a` should be kept over `b`. The rules are applied in order:
    /// not new, member of more relations, larger `size`, higher version,
    /// older id.
    fn more_persistent(&self, a: ObjectRef, b: ObjectRef, size: impl Fn(ObjectRef) -> usize) -> bool {
        let (base_a, base_b) = (self.base_of(a), self.base_of(b));
        if base_a.is_new() != base_b.is_new() {
            return !base_a.is_new();
        }

        let (rels_a, rels_b) = (self.to_relations(a).len(), self.to_relations(b).len());
        if rels_a != rels_b {
            return rels_a > rels_b;
        }

        let (size_a, size_b) = (size(a), size(b));
        if size_a != size_b {
            return size_a > size_b;
        }

        if base_a.version != base_b.version {
            return base_a.version > base_b.version;
        }

        // new ids count downwards, so the one closer to zero is older
        if base_a.id > 0 {
            base_a.id < base_b.id
        } else {
            base_a.id > base_b.id
        }
    }

    /// The open way `node` ends, if it is used by exactly one way at all.
    fn single_open_end(&self, node: NodeId) -> Option<WayId> {
        if self.node(node).ways() != 1 {
            return None;
        }
        self.ways()
            .find(|(_, w)| w.contains_node(node))
            .filter(|(_, w)| !w.is_closed() && w.ends_with_node(node))
            .map(|(id, _)| id)
    }

    /// Unify two nodes into one. The more persistent node survives and is
    /// moved to the position of the other one.
    pub fn merge_nodes(&mut self, a: NodeId, b: NodeId, view: &mut dyn MapView) -> NodeMerge {
        assert!(a != b, "node #{} merged with itself", a.0);
        assert!(!self.node(a).base.is_deleted() && !self.node(b).base.is_deleted());

        let (survivor, removed) = if self.more_persistent(a.into(), b.into(), |o| {
            o.as_node().map_or(0, |n| self.node(n).ways() as usize)
        }) {
            (a, b)
        } else {
            (b, a)
        };
        debug!(survivor = survivor.0, removed = removed.0; "Merging nodes");

        let join_candidates = (self.single_open_end(survivor), self.single_open_end(removed));

        let (pos, lpos) = {
            let gone = self.node(removed);
            (gone.pos, gone.lpos)
        };
        let target = self.node_mut(survivor);
        target.pos = pos;
        target.lpos = lpos;

        let mut too_short = Vec::new();
        for way in self.node_to_ways(removed) {
            let mut replaced = 0;
            let mut collapsed = Vec::new();
            {
                let chain = self.way_mut(way).node_chain_mut();
                for entry in chain.iter_mut().filter(|n| **n == removed) {
                    *entry = survivor;
                    replaced += 1;
                }
                let mut idx = 1;
                while idx < chain.len() {
                    if chain[idx] == chain[idx - 1] {
                        collapsed.push(chain.remove(idx));
                    } else {
                        idx += 1;
                    }
                }
                if chain.len() < 2 {
                    too_short.push(way);
                }
            }
            for _ in 0..replaced {
                self.node_mut(removed).remove_way_ref();
                self.node_mut(survivor).add_way_ref();
            }
            for node in collapsed {
                self.node_mut(node).remove_way_ref();
            }
            self.mark_dirty(way.into());
            view.item_changed(way.into());
        }
        for way in too_short {
            debug!(way = way.0; "Way collapsed by node merge");
            self.way_delete(way, OrphanNodes::Keep, view);
        }

        self.replace_in_relations(removed.into(), survivor.into());

        let mut tags = std::mem::take(&mut self.node_mut(removed).base.tags);
        let conflict = self.node_mut(survivor).base.tags.merge(&mut tags);

        self.mark_dirty(survivor.into());
        view.item_changed(survivor.into());

        self.node_delete(
            removed,
            NodeDeleteMode {
                way_refs: WayRefs::Keep,
                relations: true,
                short_ways: false,
            },
            view,
        );

        let ways_to_join = match join_candidates {
            (Some(first), Some(second))
                if first != second
                    && self.contains_way(first)
                    && self.contains_way(second)
                    && !self.way(first).base.is_deleted()
                    && !self.way(second).base.is_deleted() =>
            {
                Some([first, second])
            }
            _ => None,
        };

        NodeMerge {
            survivor,
            conflict,
            ways_to_join,
        }
    }

    /// Append the node chain of `other` to `this` and delete `other`. The
    /// ways have to share an end node. Returns whether merging the tags
    /// produced a conflict.
    pub fn way_merge(&mut self, this: WayId, other: WayId, view: &mut dyn MapView) -> bool {
        assert!(this != other, "way #{} merged with itself", this.0);

        let mut incoming = std::mem::take(self.way_mut(other).node_chain_mut());
        let chain = self.way(this).node_chain();
        assert!(chain.len() >= 2 && incoming.len() >= 2);
        let (first, last) = (chain[0], chain[chain.len() - 1]);
        let (other_first, other_last) = (incoming[0], incoming[incoming.len() - 1]);

        let mut merged = chain.to_vec();
        let shared = if last == other_first {
            merged.extend(incoming.drain(1..));
            other_first
        } else if last == other_last {
            incoming.pop();
            merged.extend(incoming.drain(..).rev());
            other_last
        } else if first == other_last {
            incoming.pop();
            incoming.append(&mut merged);
            merged = incoming;
            other_last
        } else if first == other_first {
            incoming.reverse();
            incoming.pop();
            incoming.append(&mut merged);
            merged = incoming;
            other_first
        } else {
            panic!("ways #{} and #{} do not share an end node", this.0, other.0);
        };
        debug!(this = this.0, other = other.0, shared = shared.0; "Merging ways");

        // one of the two occurrences of the shared node is gone
        self.node_mut(shared).remove_way_ref();
        *self.way_mut(this).node_chain_mut() = merged;

        let mut tags = std::mem::take(&mut self.way_mut(other).base.tags);
        let conflict = self.way_mut(this).base.tags.merge(&mut tags);

        self.replace_in_relations(other.into(), this.into());
        self.mark_dirty(this.into());
        view.item_changed(this.into());

        self.way_delete(other, OrphanNodes::Keep, view);
        conflict
    }

    /// Merge two ways keeping the more persistent one. Returns the surviving
    /// way and whether the tags conflicted.
    pub fn merge_ways(&mut self, a: WayId, b: WayId, view: &mut dyn MapView) -> (WayId, bool) {
        let (survivor, removed) = if self.more_persistent(a.into(), b.into(), |o| {
            o.as_way().map_or(0, |w| self.way(w).node_count())
        }) {
            (a, b)
        } else {
            (b, a)
        };
        let conflict = self.way_merge(survivor, removed, view);
        (survivor, conflict)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::bounds::Pos;
    use crate::data::object::Member;
    use crate::data::osm::{Relation, Way};
    use crate::data::tags::Tag;
    use crate::data::test::{assert_way_counters, server_node, server_way, test_osm};

    fn versioned_node(osm: &mut Osm, id: i64, version: u32) -> NodeId {
        let node = server_node(osm, id);
        osm.node_mut(node).base.version = version;
        node
    }

    #[test]
    fn test_higher_version_survives() {
        let mut osm = test_osm();
        let a = versioned_node(&mut osm, 1, 1);
        let b = versioned_node(&mut osm, 2, 2);
        let a2 = server_node(&mut osm, 3);
        let b2 = server_node(&mut osm, 4);
        server_way(&mut osm, 10, &[a, a2]);
        server_way(&mut osm, 11, &[b, b2]);
        let a_pos = osm.node(a).pos;

        let result = osm.merge_nodes(a, b, &mut ());
        assert_eq!(result.survivor, b);
        assert!(!result.conflict);
        // survivor moved to the position of the removed node
        assert_eq!(osm.node(b).pos, a_pos);
        assert_eq!(osm.node(b).ways(), 2);
        assert!(osm.node(a).base.is_deleted());
        assert_way_counters(&osm);
    }

    #[test]
    fn test_equal_history_keeps_older_id() {
        let mut osm = test_osm();
        let a = versioned_node(&mut osm, 1, 1);
        let b = versioned_node(&mut osm, 2, 1);
        let a2 = server_node(&mut osm, 3);
        let b2 = server_node(&mut osm, 4);
        server_way(&mut osm, 10, &[a, a2]);
        server_way(&mut osm, 11, &[b, b2]);

        assert_eq!(osm.merge_nodes(b, a, &mut ()).survivor, a);
    }

    #[test]
    fn test_persistence_order() {
        let mut osm = test_osm();
        let old = versioned_node(&mut osm, 7, 1);
        let fresh = osm.attach_node(osm.node_new(Pos::new(52.2693, 9.5752)));
        osm.node_mut(fresh).base.version = 9;
        // not new beats everything
        assert!(osm.more_persistent(old.into(), fresh.into(), |_| 0));

        let in_relation = versioned_node(&mut osm, 8, 1);
        let in_ways = versioned_node(&mut osm, 9, 5);
        let mut relation = Relation::new(Base::new(1, 1));
        relation.members.push(Member::new(in_relation, None));
        osm.insert_relation(relation);
        // relations beat way count and version
        assert!(osm.more_persistent(in_relation.into(), in_ways.into(), |o| if o == ObjectRef::from(in_ways) { 3 } else { 0 }));
        // way count beats version
        assert!(osm.more_persistent(old.into(), in_ways.into(), |o| if o == ObjectRef::from(old) { 1 } else { 0 }));
        // version beats id
        assert!(osm.more_persistent(in_ways.into(), old.into(), |_| 0));

        let newer = osm.attach_node(osm.node_new(Pos::new(52.2693, 9.5753)));
        osm.node_mut(newer).base.version = 9;
        assert!(osm.more_persistent(fresh.into(), newer.into(), |_| 0));
    }

    #[test]
    fn test_merge_neighbours_collapses_segment() {
        let mut osm = test_osm();
        let nodes: Vec<NodeId> = (1..=3).map(|id| server_node(&mut osm, id)).collect();
        let w = server_way(&mut osm, 10, &nodes);

        let result = osm.merge_nodes(nodes[0], nodes[1], &mut ());
        assert_eq!(osm.way(w).node_chain(), &[result.survivor, nodes[2]]);
        assert_eq!(osm.node(result.survivor).ways(), 1);
        assert!(osm.way(w).base.is_dirty());
        assert_way_counters(&osm);
    }

    #[test]
    fn test_merge_deletes_degenerated_way() {
        let mut osm = test_osm();
        let n1 = server_node(&mut osm, 1);
        let n2 = server_node(&mut osm, 2);
        let n3 = server_node(&mut osm, 3);
        let short = server_way(&mut osm, 10, &[n1, n2]);
        let long = server_way(&mut osm, 11, &[n2, n3]);

        let result = osm.merge_nodes(n1, n2, &mut ());
        assert_eq!(result.survivor, n2);
        assert!(osm.way(short).base.is_deleted());
        assert_eq!(osm.way(long).node_chain(), &[n2, n3]);
        assert_eq!(osm.node(n2).ways(), 1);
        assert_eq!(result.ways_to_join, None);
        assert_way_counters(&osm);
    }

    #[test]
    fn test_merge_offers_way_join() {
        let mut osm = test_osm();
        let nodes: Vec<NodeId> = (1..=4).map(|id| server_node(&mut osm, id)).collect();
        let w1 = server_way(&mut osm, 10, &nodes[..2]);
        let w2 = server_way(&mut osm, 11, &nodes[2..]);

        let result = osm.merge_nodes(nodes[1], nodes[2], &mut ());
        let mut offered = result.ways_to_join.expect("ways should be joinable").to_vec();
        offered.sort();
        assert_eq!(offered, vec![w1, w2]);
    }

    #[test]
    fn test_merge_tags_and_relations() {
        let mut osm = test_osm();
        let a = server_node(&mut osm, 1);
        let b = server_node(&mut osm, 2);
        osm.node_mut(a).base.tags.push(Tag::new("name", "A"));
        osm.node_mut(b).base.tags.push(Tag::new("name", "B"));
        osm.node_mut(b).base.tags.push(Tag::new("ref", "2"));
        let mut relation = Relation::new(Base::new(5, 1));
        relation.members.push(Member::new(a, Some("stop")));
        relation.members.push(Member::new(b, Some("stop")));
        let r = osm.insert_relation(relation);

        let result = osm.merge_nodes(a, b, &mut ());
        assert!(result.conflict);
        let survivor = osm.node(result.survivor);
        assert!(survivor.base.tags.has_tag_collisions());
        assert_eq!(survivor.base.tags.get_value("ref"), Some("2"));
        assert_eq!(osm.relation(r).members, vec![Member::new(result.survivor, Some("stop"))]);
        assert!(osm.relation(r).base.is_dirty());
    }

    fn chain_ids(osm: &Osm, way: WayId) -> Vec<i64> {
        osm.way(way).node_chain().iter().map(|n| n.id()).collect()
    }

    #[test]
    fn test_way_merge_end_cases() {
        let cases: [(&[i64], &[i64], &[i64]); 4] = [
            (&[1, 2, 3], &[3, 4, 5], &[1, 2, 3, 4, 5]),
            (&[1, 2, 3], &[5, 4, 3], &[1, 2, 3, 4, 5]),
            (&[3, 4, 5], &[1, 2, 3], &[1, 2, 3, 4, 5]),
            (&[3, 4, 5], &[3, 2, 1], &[1, 2, 3, 4, 5]),
        ];
        for (this_ids, other_ids, expected) in cases {
            let mut osm = test_osm();
            for id in 1..=5 {
                server_node(&mut osm, id);
            }
            let nodes = |ids: &[i64]| ids.iter().map(|id| NodeId(*id)).collect::<Vec<_>>();
            let this = server_way(&mut osm, 10, &nodes(this_ids));
            let other = server_way(&mut osm, 11, &nodes(other_ids));

            assert!(!osm.way_merge(this, other, &mut ()));
            assert_eq!(chain_ids(&osm, this), expected);
            assert!(osm.way(other).base.is_deleted());
            assert_eq!(osm.node(NodeId(3)).ways(), 1);
            assert_way_counters(&osm);
        }
    }

    #[test]
    fn test_way_merge_moves_memberships() {
        let mut osm = test_osm();
        let nodes: Vec<NodeId> = (1..=3).map(|id| server_node(&mut osm, id)).collect();
        let this = server_way(&mut osm, 10, &nodes[..2]);
        let other = server_way(&mut osm, 11, &nodes[1..]);
        osm.way_mut(this).base.tags.push(Tag::new("highway", "service"));
        osm.way_mut(other).base.tags.push(Tag::new("highway", "track"));
        let mut relation = Relation::new(Base::new(5, 1));
        relation.members.push(Member::new(this, None));
        relation.members.push(Member::new(other, None));
        let r = osm.insert_relation(relation);

        assert!(osm.way_merge(this, other, &mut ()));
        assert_eq!(osm.relation(r).members, vec![Member::new(this, None)]);
    }

    #[test]
    fn test_merge_ways_keeps_persistent_way() {
        let mut osm = test_osm();
        let nodes: Vec<NodeId> = (1..=4).map(|id| server_node(&mut osm, id)).collect();
        let server = server_way(&mut osm, 10, &nodes[..2]);
        let mut local = Way::new_local();
        for node in &nodes[1..] {
            local.append_node(*node);
        }
        let local = osm.attach_way(local);

        let (survivor, conflict) = osm.merge_ways(local, server, &mut ());
        assert_eq!(survivor, server);
        assert!(!conflict);
        assert_eq!(osm.way(server).node_count(), 4);
        // the new way was never uploaded
        assert!(!osm.contains_way(local));
        assert_way_counters(&osm);
    }
}
