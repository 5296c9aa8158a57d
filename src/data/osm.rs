use std::ops::BitOr;

use super::bounds::{LPos, Pos};
use super::object::{ItemId, Member, NodeId, ObjectKind, ObjectRef, ID_ILLEGAL};
use super::tags::TagList;

/// Upload state bits of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u8);

impl Flags {
    pub const DIRTY: Flags = Flags(1 << 0);
    pub const DELETED: Flags = Flags(1 << 1);
    pub const NEW: Flags = Flags(1 << 2);

    pub const fn empty() -> Self {
        Flags(0)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(&self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(&self, other: Flags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// Attributes shared by nodes, ways and relations.
#[derive(Debug, Clone)]
pub struct Base {
    pub id: ItemId,
    pub version: u32,
    /// Unix seconds, 0 if unknown.
    pub time: i64,
    /// Key into the user table of the graph, 0 if unknown.
    pub user: i32,
    pub visible: bool,
    pub tags: TagList,
    flags: Flags,
}

impl Base {
    /// Attributes of an object as delivered by the server.
    pub fn new(id: ItemId, version: u32) -> Self {
        Base {
            id,
            version,
            time: 0,
            user: 0,
            visible: true,
            tags: TagList::new(),
            flags: Flags::empty(),
        }
    }

    /// Attributes of an object created in this session. The id is assigned
    /// once the object is attached to the graph.
    pub fn new_local() -> Self {
        Base {
            time: chrono::Utc::now().timestamp(),
            ..Base::new(ID_ILLEGAL, 0)
        }
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub(crate) fn set_flags(&mut self, flags: Flags) {
        self.flags = flags;
    }

    pub fn is_new(&self) -> bool {
        self.flags.contains(Flags::NEW)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.contains(Flags::DIRTY)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags.contains(Flags::DELETED)
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub base: Base,
    pub pos: Pos,
    pub lpos: LPos,
    ways: u32,
}

impl Node {
    pub fn new(base: Base, pos: Pos, lpos: LPos) -> Self {
        Node {
            base,
            pos,
            lpos,
            ways: 0,
        }
    }

    pub fn id(&self) -> ItemId {
        self.base.id
    }

    pub fn tags(&self) -> &TagList {
        &self.base.tags
    }

    /// Number of way node chain entries referring to this node.
    pub fn ways(&self) -> u32 {
        self.ways
    }

    pub(crate) fn add_way_ref(&mut self) {
        self.ways += 1;
    }

    pub(crate) fn remove_way_ref(&mut self) {
        assert!(self.ways > 0, "node #{} has no way references left", self.base.id);
        self.ways -= 1;
    }
}

/// Keys that make a closed way an area unless their value is "no".
const IMPLICIT_AREA_KEYS: &[&str] = &["building", "landuse", "leisure", "natural", "aeroway", "amenity", "area:highway"];

#[derive(Debug, Clone)]
pub struct Way {
    pub base: Base,
    node_chain: Vec<NodeId>,
}

impl Way {
    pub fn new(base: Base) -> Self {
        Way {
            base,
            node_chain: Vec::new(),
        }
    }

    /// A way that is not yet part of the graph.
    pub fn new_local() -> Self {
        Way::new(Base::new_local())
    }

    pub fn id(&self) -> ItemId {
        self.base.id
    }

    pub fn tags(&self) -> &TagList {
        &self.base.tags
    }

    pub fn node_chain(&self) -> &[NodeId] {
        &self.node_chain
    }

    pub(crate) fn node_chain_mut(&mut self) -> &mut Vec<NodeId> {
        &mut self.node_chain
    }

    /// Append a node to a way that is not attached to the graph yet. The
    /// reference counters are updated when the way is attached.
    pub fn append_node(&mut self, node: NodeId) {
        self.node_chain.push(node);
    }

    pub fn node_count(&self) -> usize {
        self.node_chain.len()
    }

    pub fn min_length(&self, len: usize) -> bool {
        self.node_chain.len() >= len
    }

    pub fn first_node(&self) -> Option<NodeId> {
        self.node_chain.first().copied()
    }

    pub fn last_node(&self) -> Option<NodeId> {
        self.node_chain.last().copied()
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.node_chain.contains(&node)
    }

    pub fn is_closed(&self) -> bool {
        match (self.node_chain.first(), self.node_chain.last()) {
            (Some(first), Some(last)) => first == last,
            _ => false,
        }
    }

    /// Whether `node` is the first or last node. Deleted ways end nowhere.
    pub fn ends_with_node(&self, node: NodeId) -> bool {
        if self.base.is_deleted() {
            return false;
        }
        self.first_node() == Some(node) || self.last_node() == Some(node)
    }

    pub fn is_area(&self) -> bool {
        if !self.is_closed() {
            return false;
        }
        let tags = &self.base.tags;
        match tags.get_value("area") {
            Some("yes") => return true,
            Some("no") => return false,
            _ => {}
        }
        IMPLICIT_AREA_KEYS
            .iter()
            .any(|key| tags.get_value(key).map_or(false, |v| v != "no"))
    }
}

#[derive(Debug, Clone)]
pub struct Relation {
    pub base: Base,
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemberCount {
    pub nodes: usize,
    pub ways: usize,
    pub relations: usize,
}

impl Relation {
    pub fn new(base: Base) -> Self {
        Relation {
            base,
            members: Vec::new(),
        }
    }

    pub fn new_local() -> Self {
        Relation::new(Base::new_local())
    }

    pub fn id(&self) -> ItemId {
        self.base.id
    }

    pub fn tags(&self) -> &TagList {
        &self.base.tags
    }

    pub fn find_member(&self, object: &ObjectRef) -> Option<usize> {
        self.members.iter().position(|m| m.object == *object)
    }

    pub fn has_member(&self, object: &ObjectRef) -> bool {
        self.find_member(object).is_some()
    }

    pub fn members_by_type(&self) -> MemberCount {
        let mut count = MemberCount::default();
        for member in &self.members {
            match member.object.kind() {
                Some(ObjectKind::Node) => count.nodes += 1,
                Some(ObjectKind::Way) => count.ways += 1,
                Some(ObjectKind::Relation) => count.relations += 1,
                None => panic!("relation #{} has an illegal member", self.base.id),
            }
        }
        count
    }

    pub fn is_route(&self) -> bool {
        self.base
            .tags
            .get_value("type")
            .map_or(false, |t| t.eq_ignore_ascii_case("route"))
    }

    pub fn is_multipolygon(&self) -> bool {
        self.base.tags.get_value("type") == Some("multipolygon")
    }

    /// The first of ref, name, description, note or fixme, or the id.
    pub fn descriptive_name(&self) -> String {
        ["ref", "name", "description", "note", "fixme", "FIXME"]
            .iter()
            .find_map(|key| self.base.tags.get_value(key))
            .map(str::to_string)
            .unwrap_or_else(|| format!("<ID #{}>", self.base.id))
    }
}
