use std::collections::VecDeque;

use log::debug;

use super::object::{NodeId, ObjectRef, RelationId, WayId};
use super::{MapView, Osm};

/// What to do with way chains still referring to a node being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WayRefs {
    /// Erase every occurrence from all ways.
    Remove,
    /// Only report the affected ways, the graph is left untouched.
    CheckOnly,
    /// The caller already took care of the ways, the node must be unused.
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeDeleteMode {
    pub way_refs: WayRefs,
    /// Remove the node from all relations.
    pub relations: bool,
    /// Delete ways that end up with less than 2 nodes.
    pub short_ways: bool,
}

impl NodeDeleteMode {
    /// Deletion requested by the user.
    pub const FULL: NodeDeleteMode = NodeDeleteMode {
        way_refs: WayRefs::Remove,
        relations: true,
        short_ways: true,
    };

    pub const CHECK_ONLY: NodeDeleteMode = NodeDeleteMode {
        way_refs: WayRefs::CheckOnly,
        relations: false,
        short_ways: false,
    };

    /// The node is not referenced by anything anymore.
    pub const UNREFERENCED: NodeDeleteMode = NodeDeleteMode {
        way_refs: WayRefs::Keep,
        relations: false,
        short_ways: false,
    };
}

/// Handling of nodes that lose their last way when a way is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanNodes {
    /// Delete them if they carry no real tags and are in no relation.
    Delete,
    Keep,
}

enum Pending {
    Node(NodeId, NodeDeleteMode),
    Way(WayId, OrphanNodes),
}

impl Osm {
    /// Delete a node. Returns the ways that contained it.
    ///
    /// In [`WayRefs::CheckOnly`] mode nothing is changed, the result tells the
    /// caller which ways would be affected.
    pub fn node_delete(&mut self, node: NodeId, mode: NodeDeleteMode, view: &mut dyn MapView) -> Vec<WayId> {
        if mode.way_refs == WayRefs::CheckOnly {
            return self.node_to_ways(node);
        }

        let mut queue = VecDeque::new();
        let affected = self.node_delete_step(node, mode, view, &mut queue);
        self.process_deletions(queue, view);
        affected
    }

    /// Delete a way. Depending on `orphans` nodes that are not used anymore
    /// are deleted as well.
    pub fn way_delete(&mut self, way: WayId, orphans: OrphanNodes, view: &mut dyn MapView) {
        let mut queue = VecDeque::new();
        queue.push_back(Pending::Way(way, orphans));
        self.process_deletions(queue, view);
    }

    /// Delete a relation. Its members are not affected.
    pub fn relation_delete(&mut self, relation: RelationId, view: &mut dyn MapView) {
        assert!(
            !self.relation(relation).base.is_deleted(),
            "relation #{} is already deleted",
            relation.0
        );
        self.remove_from_relations(relation.into());
        view.item_removed(relation.into());
        self.relation_mut(relation).members.clear();

        if self.relation(relation).base.is_new() {
            debug!(id = relation.0; "Freeing new relation");
            self.remove_relation(relation);
        } else {
            debug!(id = relation.0; "Marking relation deleted");
            self.mark_deleted(relation.into());
        }
    }

    fn is_gone(&self, object: ObjectRef) -> bool {
        self.base(object).map_or(true, |b| b.is_deleted())
    }

    fn process_deletions(&mut self, mut queue: VecDeque<Pending>, view: &mut dyn MapView) {
        while let Some(pending) = queue.pop_front() {
            match pending {
                Pending::Node(node, mode) => {
                    if !self.is_gone(node.into()) {
                        self.node_delete_step(node, mode, view, &mut queue);
                    }
                }
                Pending::Way(way, orphans) => {
                    if !self.is_gone(way.into()) {
                        self.way_delete_step(way, orphans, view, &mut queue);
                    }
                }
            }
        }
    }

    fn node_delete_step(
        &mut self,
        node: NodeId,
        mode: NodeDeleteMode,
        view: &mut dyn MapView,
        queue: &mut VecDeque<Pending>,
    ) -> Vec<WayId> {
        assert!(!self.node(node).base.is_deleted(), "node #{} is already deleted", node.0);

        let mut affected = Vec::new();
        if self.node(node).ways() > 0 {
            assert!(
                mode.way_refs == WayRefs::Remove,
                "node #{} is still used by {} ways",
                node.0,
                self.node(node).ways()
            );
            affected = self.node_to_ways(node);
            for way in &affected {
                let chain = self.way_mut(*way).node_chain_mut();
                let before = chain.len();
                chain.retain(|n| *n != node);
                let removed = before - chain.len();
                let remaining = chain.len();
                for _ in 0..removed {
                    self.node_mut(node).remove_way_ref();
                }
                self.mark_dirty((*way).into());
                view.item_changed((*way).into());
                if mode.short_ways && remaining < 2 {
                    debug!(way = way.0, nodes = remaining; "Way became too short");
                    queue.push_back(Pending::Way(*way, OrphanNodes::Delete));
                }
            }
        }

        if mode.relations {
            self.remove_from_relations(node.into());
        } else {
            let relations = self.to_relations(node.into());
            assert!(
                relations.is_empty(),
                "node #{} is still a member of {} relations",
                node.0,
                relations.len()
            );
        }

        view.item_removed(node.into());

        if self.node(node).base.is_new() {
            debug!(id = node.0; "Freeing new node");
            self.remove_node(node);
        } else {
            debug!(id = node.0; "Marking node deleted");
            self.mark_deleted(node.into());
        }
        affected
    }

    fn way_delete_step(&mut self, way: WayId, orphans: OrphanNodes, view: &mut dyn MapView, queue: &mut VecDeque<Pending>) {
        self.remove_from_relations(way.into());
        view.item_removed(way.into());

        let chain = std::mem::take(self.way_mut(way).node_chain_mut());
        for node in chain {
            let n = self.node_mut(node);
            n.remove_way_ref();
            if orphans == OrphanNodes::Delete
                && n.ways() == 0
                && !n.base.tags.has_real_tags()
                && self.to_relations(node.into()).is_empty()
            {
                debug!(way = way.0, node = node.0; "Node became orphaned");
                queue.push_back(Pending::Node(node, NodeDeleteMode::UNREFERENCED));
            }
        }

        if self.way(way).base.is_new() {
            debug!(id = way.0; "Freeing new way");
            self.remove_way(way);
        } else {
            debug!(id = way.0; "Marking way deleted");
            self.hidden_ways.remove(&way);
            self.mark_deleted(way.into());
        }
    }
}
