use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};

use self::bounds::{Bounds, LPos, Pos};
use self::object::{ItemId, Member, NodeId, ObjectKind, ObjectRef, RelationId, WayId};
use self::osm::{Base, Flags, Node, Relation, Way};
use self::tags::{TagList, TagMap};

pub mod bounds;
pub mod delete;
pub mod merge;
pub mod object;
pub mod osm;
pub mod reverse;
pub mod semantic;
pub mod split;
pub mod tags;

/// Notifications for the view layer. The graph calls these while editing but
/// does not depend on what the view does with them.
pub trait MapView {
    /// The visual representation of `object` has to go away.
    fn item_removed(&mut self, _object: ObjectRef) {}
    /// `object` changed and needs to be redrawn.
    fn item_changed(&mut self, _object: ObjectRef) {}
}

impl MapView for () {}

/// How an object has to be synchronized with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Unmodified,
    Dirty,
    New,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet<T> {
    pub created: Vec<T>,
    pub modified: Vec<T>,
    pub deleted: Vec<T>,
}

impl<T> Default for ChangeSet<T> {
    fn default() -> Self {
        ChangeSet {
            created: Vec::new(),
            modified: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<T> ChangeSet<T> {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    fn classify(&mut self, handle: T, base: &Base) {
        if base.is_deleted() {
            self.deleted.push(handle);
        } else if base.is_new() {
            self.created.push(handle);
        } else if base.is_dirty() {
            self.modified.push(handle);
        }
    }
}

/// The objects that have to be uploaded, partitioned by kind and state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modified {
    pub nodes: ChangeSet<NodeId>,
    pub ways: ChangeSet<WayId>,
    pub relations: ChangeSet<RelationId>,
}

impl Modified {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.ways.is_empty() && self.relations.is_empty()
    }
}

/// In-memory map data of an editing session. Owns all objects; everything
/// else refers to them through handles.
#[derive(Debug, Clone, Default)]
pub struct Osm {
    pub bounds: Bounds,
    nodes: BTreeMap<ItemId, Node>,
    ways: BTreeMap<ItemId, Way>,
    relations: BTreeMap<ItemId, Relation>,
    hidden_ways: BTreeSet<WayId>,
    users: BTreeMap<i32, String>,
}

/// Next free local id: one below the lowest negative id in use, or -1.
fn new_id<T>(map: &BTreeMap<ItemId, T>) -> ItemId {
    match map.keys().next() {
        Some(&lowest) if lowest < 0 => lowest - 1,
        _ => -1,
    }
}

impl Osm {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_bounds(bounds: Bounds) -> Self {
        Osm {
            bounds,
            ..Default::default()
        }
    }

    // ------------------------------------------------------------ lookup

    pub fn node(&self, node: NodeId) -> &Node {
        self.nodes
            .get(&node.0)
            .unwrap_or_else(|| panic!("node #{} is not part of the graph", node.0))
    }

    pub(crate) fn node_mut(&mut self, node: NodeId) -> &mut Node {
        self.nodes
            .get_mut(&node.0)
            .unwrap_or_else(|| panic!("node #{} is not part of the graph", node.0))
    }

    pub fn way(&self, way: WayId) -> &Way {
        self.ways
            .get(&way.0)
            .unwrap_or_else(|| panic!("way #{} is not part of the graph", way.0))
    }

    pub(crate) fn way_mut(&mut self, way: WayId) -> &mut Way {
        self.ways
            .get_mut(&way.0)
            .unwrap_or_else(|| panic!("way #{} is not part of the graph", way.0))
    }

    pub fn relation(&self, relation: RelationId) -> &Relation {
        self.relations
            .get(&relation.0)
            .unwrap_or_else(|| panic!("relation #{} is not part of the graph", relation.0))
    }

    pub(crate) fn relation_mut(&mut self, relation: RelationId) -> &mut Relation {
        self.relations
            .get_mut(&relation.0)
            .unwrap_or_else(|| panic!("relation #{} is not part of the graph", relation.0))
    }

    pub fn find_node(&self, id: ItemId) -> Option<NodeId> {
        self.nodes.contains_key(&id).then_some(NodeId(id))
    }

    pub fn find_way(&self, id: ItemId) -> Option<WayId> {
        self.ways.contains_key(&id).then_some(WayId(id))
    }

    pub fn find_relation(&self, id: ItemId) -> Option<RelationId> {
        self.relations.contains_key(&id).then_some(RelationId(id))
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node.0)
    }

    pub fn contains_way(&self, way: WayId) -> bool {
        self.ways.contains_key(&way.0)
    }

    pub fn contains_relation(&self, relation: RelationId) -> bool {
        self.relations.contains_key(&relation.0)
    }

    /// Turn a by-id reference into a handle if the object is present.
    pub fn resolve(&self, object: ObjectRef) -> ObjectRef {
        match object {
            ObjectRef::Unresolved(ObjectKind::Node, id) => self.find_node(id).map_or(object, ObjectRef::Node),
            ObjectRef::Unresolved(ObjectKind::Way, id) => self.find_way(id).map_or(object, ObjectRef::Way),
            ObjectRef::Unresolved(ObjectKind::Relation, id) => {
                self.find_relation(id).map_or(object, ObjectRef::Relation)
            }
            _ => object,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter().map(|(id, n)| (NodeId(*id), n))
    }

    pub fn ways(&self) -> impl Iterator<Item = (WayId, &Way)> {
        self.ways.iter().map(|(id, w)| (WayId(*id), w))
    }

    pub fn relations(&self) -> impl Iterator<Item = (RelationId, &Relation)> {
        self.relations.iter().map(|(id, r)| (RelationId(*id), r))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn way_count(&self) -> usize {
        self.ways.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn base(&self, object: ObjectRef) -> Option<&Base> {
        match object {
            ObjectRef::Node(n) => self.nodes.get(&n.0).map(|n| &n.base),
            ObjectRef::Way(w) => self.ways.get(&w.0).map(|w| &w.base),
            ObjectRef::Relation(r) => self.relations.get(&r.0).map(|r| &r.base),
            _ => None,
        }
    }

    fn base_mut(&mut self, object: ObjectRef) -> &mut Base {
        match object {
            ObjectRef::Node(n) => &mut self.node_mut(n).base,
            ObjectRef::Way(w) => &mut self.way_mut(w).base,
            ObjectRef::Relation(r) => &mut self.relation_mut(r).base,
            _ => panic!("{} is not a real object", object),
        }
    }

    pub fn tags(&self, object: ObjectRef) -> Option<&TagList> {
        self.base(object).map(|b| &b.tags)
    }

    // ------------------------------------------------------------ users

    pub fn user(&self, uid: i32) -> Option<&str> {
        self.users.get(&uid).map(String::as_str)
    }

    pub fn users(&self) -> impl Iterator<Item = (i32, &str)> {
        self.users.iter().map(|(uid, name)| (*uid, name.as_str()))
    }

    /// Register a user and return the key to store in `Base::user`. Users
    /// without uid get a negative key per distinct name.
    pub fn intern_user(&mut self, name: &str, uid: Option<i32>) -> i32 {
        if let Some(uid) = uid.filter(|uid| *uid > 0) {
            self.users.entry(uid).or_insert_with(|| name.to_string());
            return uid;
        }
        if let Some((&key, _)) = self
            .users
            .iter()
            .find(|(key, existing)| **key < 0 && existing.eq_ignore_ascii_case(name))
        {
            return key;
        }
        let key = match self.users.keys().next() {
            Some(&lowest) if lowest < 0 => lowest - 1,
            _ => -1,
        };
        self.users.insert(key, name.to_string());
        key
    }

    // ------------------------------------------------------------ creation

    /// Create a node at a geographic position. The node is not attached.
    pub fn node_new(&self, pos: Pos) -> Node {
        debug!(lat = pos.lat, lon = pos.lon; "Creating new node");
        Node::new(Base::new_local(), pos, self.bounds.pos2lpos(pos))
    }

    /// Create a node at a projected position. The node is not attached.
    pub fn node_new_lpos(&self, lpos: LPos) -> Node {
        debug!(x = lpos.x, y = lpos.y; "Creating new node");
        Node::new(Base::new_local(), self.bounds.lpos2pos(lpos), lpos)
    }

    pub fn attach_node(&mut self, mut node: Node) -> NodeId {
        node.base.id = new_id(&self.nodes);
        node.base.set_flags(Flags::NEW);
        debug!(id = node.base.id; "Attaching node");
        self.insert_node(node)
    }

    /// Attach a way built locally. Its node chain must only refer to nodes of
    /// this graph.
    pub fn attach_way(&mut self, mut way: Way) -> WayId {
        way.base.id = new_id(&self.ways);
        way.base.set_flags(Flags::NEW);
        debug!(id = way.base.id, nodes = way.node_count(); "Attaching way");
        self.insert_way(way)
    }

    pub fn attach_relation(&mut self, mut relation: Relation) -> RelationId {
        relation.base.id = new_id(&self.relations);
        relation.base.set_flags(Flags::NEW);
        debug!(id = relation.base.id, members = relation.members.len(); "Attaching relation");
        self.insert_relation(relation)
    }

    /// Attach a way whose chain is already accounted for in the node counters.
    pub(crate) fn attach_way_counted(&mut self, mut way: Way) -> WayId {
        way.base.id = new_id(&self.ways);
        way.base.set_flags(Flags::NEW);
        self.insert_way_counted(way)
    }

    /// Insert a node keeping its id, e.g. one read from a file.
    pub fn insert_node(&mut self, node: Node) -> NodeId {
        let id = node.base.id;
        assert!(id != 0, "node without id");
        assert!(node.ways() == 0, "node #{} inserted with way references", id);
        let previous = self.nodes.insert(id, node);
        assert!(previous.is_none(), "node #{} inserted twice", id);
        NodeId(id)
    }

    /// Insert a way keeping its id. Takes a reference on every node of its chain.
    pub fn insert_way(&mut self, way: Way) -> WayId {
        for node in way.node_chain() {
            self.node_mut(*node).add_way_ref();
        }
        self.insert_way_counted(way)
    }

    /// Insert a way whose chain is already accounted for in the node counters.
    pub(crate) fn insert_way_counted(&mut self, way: Way) -> WayId {
        let id = way.base.id;
        assert!(id != 0, "way without id");
        let previous = self.ways.insert(id, way);
        assert!(previous.is_none(), "way #{} inserted twice", id);
        WayId(id)
    }

    pub fn insert_relation(&mut self, relation: Relation) -> RelationId {
        let id = relation.base.id;
        assert!(id != 0, "relation without id");
        let previous = self.relations.insert(id, relation);
        assert!(previous.is_none(), "relation #{} inserted twice", id);
        RelationId(id)
    }

    pub(crate) fn remove_node(&mut self, node: NodeId) -> Node {
        let removed = self
            .nodes
            .remove(&node.0)
            .unwrap_or_else(|| panic!("node #{} is not part of the graph", node.0));
        assert!(removed.ways() == 0, "node #{} freed while still used by ways", node.0);
        removed
    }

    pub(crate) fn remove_way(&mut self, way: WayId) -> Way {
        self.hidden_ways.remove(&way);
        self.ways
            .remove(&way.0)
            .unwrap_or_else(|| panic!("way #{} is not part of the graph", way.0))
    }

    pub(crate) fn remove_relation(&mut self, relation: RelationId) -> Relation {
        self.relations
            .remove(&relation.0)
            .unwrap_or_else(|| panic!("relation #{} is not part of the graph", relation.0))
    }

    // ------------------------------------------------------------ flags

    pub fn flags(&self, object: ObjectRef) -> Flags {
        self.base(object).map(Base::flags).unwrap_or_default()
    }

    /// Remember that `object` has to be uploaded. Deleted objects stay deleted
    /// and new objects are uploaded as a whole anyway.
    pub fn mark_dirty(&mut self, object: ObjectRef) {
        let base = self.base_mut(object);
        if base.flags().intersects(Flags::DELETED | Flags::NEW) {
            return;
        }
        let mut flags = base.flags();
        flags.insert(Flags::DIRTY);
        base.set_flags(flags);
    }

    pub(crate) fn mark_deleted(&mut self, object: ObjectRef) {
        let base = self.base_mut(object);
        assert!(!base.is_new(), "{} was never uploaded and cannot be marked deleted", object);
        base.set_flags(Flags::DELETED);
    }

    pub(crate) fn set_flags(&mut self, object: ObjectRef, flags: Flags) {
        self.base_mut(object).set_flags(flags);
    }

    pub fn upload_state(&self, object: ObjectRef) -> UploadState {
        let flags = self.flags(object);
        if flags.contains(Flags::DELETED) {
            UploadState::Deleted
        } else if flags.contains(Flags::NEW) {
            UploadState::New
        } else if flags.contains(Flags::DIRTY) {
            UploadState::Dirty
        } else {
            UploadState::Unmodified
        }
    }

    /// Whether nothing at all would be stored in a diff.
    pub fn is_clean(&self) -> bool {
        fn clean<T>(map: &BTreeMap<ItemId, T>, base: impl Fn(&T) -> &Base) -> bool {
            map.keys().next().map_or(true, |lowest| *lowest > 0)
                && map.values().all(|obj| base(obj).flags().is_empty())
        }

        self.hidden_ways.is_empty()
            && clean(&self.nodes, |n| &n.base)
            && clean(&self.ways, |w| &w.base)
            && clean(&self.relations, |r| &r.base)
    }

    pub fn modified(&self) -> Modified {
        let mut modified = Modified::default();
        for (id, node) in self.nodes() {
            modified.nodes.classify(id, &node.base);
        }
        for (id, way) in self.ways() {
            modified.ways.classify(id, &way.base);
        }
        for (id, relation) in self.relations() {
            modified.relations.classify(id, &relation.base);
        }
        modified
    }

    // ------------------------------------------------------------ editing

    pub fn node_move(&mut self, node: NodeId, pos: Pos) {
        let lpos = self.bounds.pos2lpos(pos);
        let n = self.node_mut(node);
        n.pos = pos;
        n.lpos = lpos;
        self.mark_dirty(node.into());
    }

    /// Replace all tags of `object`. The object is only marked dirty if the
    /// tags really differ.
    pub fn update_tags(&mut self, object: ObjectRef, tags: TagList) -> bool {
        let base = self.base_mut(object);
        let changed = base.tags != tags;
        base.tags = tags;
        if changed {
            debug!(object = object.to_string(); "Tags changed");
            self.mark_dirty(object);
        }
        changed
    }

    pub fn update_tags_map(&mut self, object: ObjectRef, tags: &TagMap) -> bool {
        let base = self.base_mut(object);
        if base.tags == *tags {
            return false;
        }
        base.tags.replace_map(tags);
        self.mark_dirty(object);
        true
    }

    pub fn way_append_node(&mut self, way: WayId, node: NodeId) {
        self.node_mut(node).add_way_ref();
        self.way_mut(way).node_chain_mut().push(node);
        self.mark_dirty(way.into());
    }

    pub fn way_insert_node(&mut self, way: WayId, index: usize, node: NodeId) {
        self.node_mut(node).add_way_ref();
        self.way_mut(way).node_chain_mut().insert(index, node);
        self.mark_dirty(way.into());
    }

    pub fn relation_add_member(&mut self, relation: RelationId, member: Member) {
        assert!(member.object.kind().is_some(), "illegal member for relation #{}", relation.0);
        self.relation_mut(relation).members.push(member);
        self.mark_dirty(relation.into());
    }

    pub fn relation_remove_member(&mut self, relation: RelationId, index: usize) -> Member {
        let member = self.relation_mut(relation).members.remove(index);
        self.mark_dirty(relation.into());
        member
    }

    // ------------------------------------------------------------ hidden ways

    pub fn way_set_hidden(&mut self, way: WayId) {
        assert!(self.contains_way(way));
        self.hidden_ways.insert(way);
    }

    pub fn way_is_hidden(&self, way: WayId) -> bool {
        self.hidden_ways.contains(&way)
    }

    pub fn way_unhide_all(&mut self) -> usize {
        let count = self.hidden_ways.len();
        self.hidden_ways.clear();
        count
    }

    pub fn hidden_ways(&self) -> impl Iterator<Item = WayId> + '_ {
        self.hidden_ways.iter().copied()
    }

    // ------------------------------------------------------------ queries

    pub fn node_to_ways(&self, node: NodeId) -> Vec<WayId> {
        self.ways()
            .filter(|(_, w)| w.contains_node(node))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn node_in_other_way(&self, way: WayId, node: NodeId) -> bool {
        self.ways().any(|(id, w)| id != way && w.contains_node(node))
    }

    /// All relations having `object` as member.
    pub fn to_relations(&self, object: ObjectRef) -> Vec<RelationId> {
        self.relations()
            .filter(|(_, r)| r.has_member(&object))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn position_within_bounds(&self, lpos: LPos) -> bool {
        self.bounds.contains(lpos)
    }

    /// Erase every membership of `object`, whether referenced by handle or
    /// by id. Returns the number of removed members.
    pub fn remove_from_relations(&mut self, object: ObjectRef) -> usize {
        let mut removed = 0;
        let mut touched = Vec::new();
        for (id, relation) in self.relations.iter_mut() {
            let before = relation.members.len();
            relation.members.retain(|m| m.object != object);
            if relation.members.len() != before {
                removed += before - relation.members.len();
                touched.push(RelationId(*id));
            }
        }
        for relation in touched {
            debug!(object = object.to_string(), relation = relation.0; "Removed from relation");
            self.mark_dirty(relation.into());
        }
        removed
    }

    /// Substitute `old` by `new` in all relations. A substituted member that
    /// ends up identical (same object and role) to its neighbour is collapsed
    /// into it, other duplicates are left alone.
    pub fn replace_in_relations(&mut self, old: ObjectRef, new: ObjectRef) -> usize {
        let mut replaced = 0;
        let mut touched = Vec::new();
        for (id, relation) in self.relations.iter_mut() {
            if !relation.has_member(&old) {
                continue;
            }
            let mut members: Vec<Member> = Vec::with_capacity(relation.members.len());
            // whether the last kept member was substituted
            let mut last_replaced = false;
            for mut member in std::mem::take(&mut relation.members) {
                let replacing = member.object == old;
                if replacing {
                    member.object = new;
                    replaced += 1;
                }
                if (replacing || last_replaced) && members.last() == Some(&member) {
                    last_replaced = true;
                    continue;
                }
                last_replaced = replacing;
                members.push(member);
            }
            relation.members = members;
            touched.push(RelationId(*id));
        }
        for relation in touched {
            self.mark_dirty(relation.into());
        }
        replaced
    }

    /// Resolve by-id members whose objects are present now. Returns the number
    /// of members that were patched.
    pub fn fixup_relation_members(&mut self) -> usize {
        let nodes = &self.nodes;
        let ways = &self.ways;
        let relations: BTreeSet<ItemId> = self.relations.keys().copied().collect();
        let mut fixed = 0;
        for relation in self.relations.values_mut() {
            for member in relation.members.iter_mut() {
                let resolved = match member.object {
                    ObjectRef::Unresolved(ObjectKind::Node, id) if nodes.contains_key(&id) => ObjectRef::Node(NodeId(id)),
                    ObjectRef::Unresolved(ObjectKind::Way, id) if ways.contains_key(&id) => ObjectRef::Way(WayId(id)),
                    ObjectRef::Unresolved(ObjectKind::Relation, id) if relations.contains(&id) => {
                        ObjectRef::Relation(RelationId(id))
                    }
                    _ => continue,
                };
                member.object = resolved;
                fixed += 1;
            }
        }
        if fixed > 0 {
            info!(members = fixed; "Resolved forward member references");
        }
        fixed
    }

    /// Check that the data is usable for editing.
    pub fn sanity_check(&self) -> Option<&'static str> {
        if !self.bounds.is_valid() {
            return Some("Invalid data in OSM file:\nBoundary box missing!");
        }
        if self.nodes.is_empty() {
            return Some("Invalid data in OSM file:\nNo drawable content found!");
        }
        None
    }
}
