use log::debug;

use super::object::{Member, ObjectRef, WayId};
use super::osm::Way;
use super::{MapView, Osm};

impl Osm {
    /// Split `way` at chain index `cut`.
    ///
    /// With `cut_at_node` the node at `cut` ends the first part and starts the
    /// second one, otherwise the segment between `cut - 1` and `cut` is
    /// removed. A closed way is only opened at the cut and `None` is returned.
    /// Otherwise the new way is returned, unless one of the parts would be
    /// shorter than 2 nodes, then that part is dropped.
    ///
    /// The longer part stays in `way` so it keeps its history.
    pub fn split_way(&mut self, way: WayId, cut: usize, cut_at_node: bool, view: &mut dyn MapView) -> Option<WayId> {
        let len = self.way(way).node_count();
        assert!(len > 2, "way #{} is too short to be split ({} nodes)", way.0, len);
        assert!(cut > 0 && cut < len, "cut index {} out of range for way #{}", cut, way.0);

        self.mark_dirty(way.into());
        view.item_changed(way.into());

        if self.way(way).is_closed() {
            let chain = self.way_mut(way).node_chain_mut();
            let closing = chain.pop();
            let rotate = cut % chain.len();
            chain.rotate_left(rotate);
            if let Some(node) = closing {
                self.node_mut(node).remove_way_ref();
            }
            debug!(way = way.0, cut = cut; "Opened closed way");
            return None;
        }

        let mut head = std::mem::take(self.way_mut(way).node_chain_mut());
        if cut_at_node {
            // the cut node is used by both parts
            self.node_mut(head[cut]).add_way_ref();
        }
        let tail = head[cut..].to_vec();
        head.truncate(if cut_at_node { cut + 1 } else { cut });

        if tail.len() < 2 || head.len() < 2 {
            let (kept, dropped) = if tail.len() < 2 { (head, tail) } else { (tail, head) };
            debug!(way = way.0, dropped = dropped.len(); "Degenerated split");
            for node in dropped {
                self.node_mut(node).remove_way_ref();
            }
            *self.way_mut(way).node_chain_mut() = kept;
            return None;
        }

        let (mut kept, mut moved) = (head, tail);
        if kept.len() < moved.len() {
            std::mem::swap(&mut kept, &mut moved);
        }
        *self.way_mut(way).node_chain_mut() = kept;

        let mut new_way = Way::new_local();
        new_way.base.tags = self.way(way).base.tags.real_copy();
        *new_way.node_chain_mut() = moved;
        let new_id = self.attach_way_counted(new_way);
        if self.way_is_hidden(way) {
            self.way_set_hidden(new_id);
        }
        debug!(way = way.0, new_way = new_id.0, cut = cut; "Split way");

        self.split_relation_members(way, new_id);
        view.item_changed(new_id.into());
        Some(new_id)
    }

    /// Add `new_way` next to every membership of `way`, on the side where it
    /// connects to the neighbouring members. Roles are copied.
    fn split_relation_members(&mut self, way: WayId, new_way: WayId) {
        for relation in self.to_relations(way.into()) {
            let positions: Vec<usize> = self
                .relation(relation)
                .members
                .iter()
                .enumerate()
                .filter(|(_, m)| m.object == ObjectRef::from(way))
                .map(|(idx, _)| idx)
                .collect();

            // back to front so earlier indexes stay valid
            for idx in positions.into_iter().rev() {
                let members = &self.relation(relation).members;
                let prev = idx.checked_sub(1).and_then(|i| members.get(i)).map(|m| m.object);
                let next = members.get(idx + 1).map(|m| m.object);
                let before = if self.member_touches(prev, new_way) {
                    true
                } else {
                    self.member_touches(next, way) && !self.member_touches(next, new_way)
                };
                let member = Member::new(new_way, members[idx].role());
                let at = if before { idx } else { idx + 1 };
                self.relation_mut(relation).members.insert(at, member);
            }
            self.mark_dirty(relation.into());
        }
    }

    /// Whether `member` is a live way sharing an end node with `way`.
    fn member_touches(&self, member: Option<ObjectRef>, way: WayId) -> bool {
        let Some(other) = member.and_then(|m| m.as_way()).filter(|w| self.contains_way(*w)) else {
            return false;
        };
        let other = self.way(other);
        let way = self.way(way);
        [way.first_node(), way.last_node()]
            .into_iter()
            .flatten()
            .any(|n| other.ends_with_node(n))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::object::NodeId;
    use crate::data::osm::{Base, Relation};
    use crate::data::tags::Tag;
    use crate::data::test::{assert_way_counters, server_node, server_way, test_osm};

    fn route(osm: &mut Osm, ways: &[WayId]) -> crate::data::object::RelationId {
        let mut relation = Relation::new(Base::new(1, 1));
        relation.base.tags.push(Tag::new("type", "route"));
        for way in ways {
            relation.members.push(Member::new(*way, Some("forward")));
        }
        osm.insert_relation(relation)
    }

    fn member_ways(osm: &Osm, relation: crate::data::object::RelationId) -> Vec<ObjectRef> {
        osm.relation(relation).members.iter().map(|m| m.object).collect()
    }

    #[test]
    fn test_split_keeps_route_contiguous() {
        let mut osm = test_osm();
        let n: Vec<NodeId> = (1..=5).map(|id| server_node(&mut osm, id)).collect();
        let w1 = server_way(&mut osm, 11, &[n[0], n[1]]);
        let w2 = server_way(&mut osm, 12, &[n[1], n[2], n[3]]);
        let w3 = server_way(&mut osm, 13, &[n[3], n[4]]);
        let r = route(&mut osm, &[w1, w2, w3]);

        let new_way = osm.split_way(w2, 1, true, &mut ()).unwrap();
        assert_eq!(osm.way(w2).node_chain(), &[n[1], n[2]]);
        assert_eq!(osm.way(new_way).node_chain(), &[n[2], n[3]]);
        assert_eq!(
            member_ways(&osm, r),
            vec![ObjectRef::from(w1), w2.into(), new_way.into(), w3.into()]
        );
        assert_eq!(osm.relation(r).members[2].role(), Some("forward"));
        assert!(osm.relation(r).base.is_dirty());
        assert_eq!(osm.node(n[2]).ways(), 2);
        assert_way_counters(&osm);
    }

    #[test]
    fn test_longer_part_keeps_history() {
        let mut osm = test_osm();
        let n: Vec<NodeId> = (1..=6).map(|id| server_node(&mut osm, id)).collect();
        let w1 = server_way(&mut osm, 11, &[n[0], n[1]]);
        let w2 = server_way(&mut osm, 12, &[n[1], n[2], n[3], n[4]]);
        let w3 = server_way(&mut osm, 13, &[n[4], n[5]]);
        osm.way_mut(w2).base.version = 4;
        osm.way_mut(w2).base.tags.push(Tag::new("highway", "primary"));
        osm.way_mut(w2).base.tags.push(Tag::new("created_by", "someone"));
        let r = route(&mut osm, &[w1, w2, w3]);

        let new_way = osm.split_way(w2, 1, true, &mut ()).unwrap();
        assert_eq!(osm.way(w2).node_chain(), &[n[2], n[3], n[4]]);
        assert_eq!(osm.way(w2).base.version, 4);
        assert_eq!(osm.way(new_way).node_chain(), &[n[1], n[2]]);
        assert!(osm.way(new_way).base.is_new());
        assert_eq!(osm.way(new_way).base.tags.len(), 1);
        assert_eq!(osm.way(new_way).base.tags.get_value("highway"), Some("primary"));
        assert_eq!(
            member_ways(&osm, r),
            vec![ObjectRef::from(w1), new_way.into(), w2.into(), w3.into()]
        );
        assert_way_counters(&osm);
    }

    #[test]
    fn test_split_of_first_route_member() {
        let mut osm = test_osm();
        let n: Vec<NodeId> = (1..=5).map(|id| server_node(&mut osm, id)).collect();
        let w2 = server_way(&mut osm, 12, &[n[0], n[1], n[2], n[3]]);
        let w3 = server_way(&mut osm, 13, &[n[3], n[4]]);
        let r = route(&mut osm, &[w2, w3]);

        let new_way = osm.split_way(w2, 1, true, &mut ()).unwrap();
        assert_eq!(osm.way(w2).node_chain(), &[n[1], n[2], n[3]]);
        assert_eq!(osm.way(new_way).node_chain(), &[n[0], n[1]]);
        assert_eq!(member_ways(&osm, r), vec![ObjectRef::from(new_way), w2.into(), w3.into()]);
        assert_way_counters(&osm);
    }

    #[test]
    fn test_split_after_node_member() {
        let mut osm = test_osm();
        let n: Vec<NodeId> = (1..=4).map(|id| server_node(&mut osm, id)).collect();
        let w = server_way(&mut osm, 12, &n);
        let mut relation = Relation::new(Base::new(1, 1));
        relation.base.tags.push(Tag::new("type", "route"));
        relation.members.push(Member::new(n[0], Some("stop")));
        relation.members.push(Member::new(w, None));
        let r = osm.insert_relation(relation);

        // no way neighbours, the new way goes after
        let new_way = osm.split_way(w, 2, true, &mut ()).unwrap();
        assert_eq!(
            member_ways(&osm, r),
            vec![ObjectRef::from(n[0]), w.into(), new_way.into()]
        );
    }

    #[test]
    fn test_split_at_segment() {
        let mut osm = test_osm();
        let n: Vec<NodeId> = (1..=4).map(|id| server_node(&mut osm, id)).collect();
        let w = server_way(&mut osm, 10, &n);

        let new_way = osm.split_way(w, 2, false, &mut ()).unwrap();
        assert_eq!(osm.way(w).node_chain(), &n[..2]);
        assert_eq!(osm.way(new_way).node_chain(), &n[2..]);
        assert_way_counters(&osm);
    }

    #[test]
    fn test_closed_way_is_opened() {
        let mut osm = test_osm();
        let n: Vec<NodeId> = (1..=4).map(|id| server_node(&mut osm, id)).collect();
        let w = server_way(&mut osm, 10, &[n[0], n[1], n[2], n[3], n[0]]);

        assert_eq!(osm.split_way(w, 2, true, &mut ()), None);
        assert_eq!(osm.way(w).node_chain(), &[n[2], n[3], n[0], n[1]]);
        assert!(!osm.way(w).is_closed());
        assert_eq!(osm.way_count(), 1);
        assert_eq!(osm.node(n[0]).ways(), 1);
        assert_way_counters(&osm);
    }

    #[test]
    fn test_degenerated_tail_is_dropped() {
        let mut osm = test_osm();
        let n: Vec<NodeId> = (1..=3).map(|id| server_node(&mut osm, id)).collect();
        let w = server_way(&mut osm, 10, &n);

        assert_eq!(osm.split_way(w, 2, false, &mut ()), None);
        assert_eq!(osm.way(w).node_chain(), &n[..2]);
        assert_eq!(osm.node(n[2]).ways(), 0);
        assert_eq!(osm.way_count(), 1);
        assert_way_counters(&osm);
    }

    #[test]
    fn test_degenerated_head_is_dropped() {
        let mut osm = test_osm();
        let n: Vec<NodeId> = (1..=3).map(|id| server_node(&mut osm, id)).collect();
        let w = server_way(&mut osm, 10, &n);

        assert_eq!(osm.split_way(w, 1, false, &mut ()), None);
        assert_eq!(osm.way(w).node_chain(), &n[1..]);
        assert_eq!(osm.node(n[0]).ways(), 0);
        assert_way_counters(&osm);
    }

    #[test]
    #[should_panic(expected = "too short")]
    fn test_two_node_way_cannot_be_split() {
        let mut osm = test_osm();
        let n1 = server_node(&mut osm, 1);
        let n2 = server_node(&mut osm, 2);
        let w = server_way(&mut osm, 10, &[n1, n2]);
        osm.split_way(w, 1, true, &mut ());
    }
}
