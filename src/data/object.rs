use std::fmt;
use std::hash::{Hash, Hasher};

/// Object identifier. Positive ids come from the server, negative ids are
/// assigned locally to objects that were never uploaded.
pub type ItemId = i64;

pub const ID_ILLEGAL: ItemId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Node,
    Way,
    Relation,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Node => "node",
            ObjectKind::Way => "way",
            ObjectKind::Relation => "relation",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "node" => Some(ObjectKind::Node),
            "way" => Some(ObjectKind::Way),
            "relation" => Some(ObjectKind::Relation),
            _ => None,
        }
    }
}

macro_rules! handle {
    ($name:ident, $kind:expr) => {
        /// Handle to an object owned by the graph. Only the graph hands these out.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) ItemId);

        impl $name {
            pub fn id(self) -> ItemId {
                self.0
            }
        }

        impl From<$name> for ObjectRef {
            fn from(value: $name) -> Self {
                ObjectRef::from_handle($kind, value.0)
            }
        }
    };
}

handle!(NodeId, ObjectKind::Node);
handle!(WayId, ObjectKind::Way);
handle!(RelationId, ObjectKind::Relation);

/// Reference to any object, either through a live handle or by bare id for
/// objects that are not (yet) part of the graph.
#[derive(Debug, Clone, Copy)]
pub enum ObjectRef {
    Node(NodeId),
    Way(WayId),
    Relation(RelationId),
    Unresolved(ObjectKind, ItemId),
    Illegal,
}

impl ObjectRef {
    fn from_handle(kind: ObjectKind, id: ItemId) -> Self {
        match kind {
            ObjectKind::Node => ObjectRef::Node(NodeId(id)),
            ObjectKind::Way => ObjectRef::Way(WayId(id)),
            ObjectKind::Relation => ObjectRef::Relation(RelationId(id)),
        }
    }

    pub fn is_real(&self) -> bool {
        matches!(self, ObjectRef::Node(_) | ObjectRef::Way(_) | ObjectRef::Relation(_))
    }

    pub fn kind(&self) -> Option<ObjectKind> {
        match self {
            ObjectRef::Node(_) => Some(ObjectKind::Node),
            ObjectRef::Way(_) => Some(ObjectKind::Way),
            ObjectRef::Relation(_) => Some(ObjectKind::Relation),
            ObjectRef::Unresolved(kind, _) => Some(*kind),
            ObjectRef::Illegal => None,
        }
    }

    pub fn id(&self) -> ItemId {
        match self {
            ObjectRef::Node(n) => n.0,
            ObjectRef::Way(w) => w.0,
            ObjectRef::Relation(r) => r.0,
            ObjectRef::Unresolved(_, id) => *id,
            ObjectRef::Illegal => ID_ILLEGAL,
        }
    }

    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            ObjectRef::Node(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_way(&self) -> Option<WayId> {
        match self {
            ObjectRef::Way(w) => Some(*w),
            _ => None,
        }
    }

    pub fn as_relation(&self) -> Option<RelationId> {
        match self {
            ObjectRef::Relation(r) => Some(*r),
            _ => None,
        }
    }

    /// Human readable type, e.g. "way/area" or "node id".
    pub fn type_string(&self) -> &'static str {
        match self {
            ObjectRef::Node(_) => "node",
            ObjectRef::Way(_) => "way/area",
            ObjectRef::Relation(_) => "relation",
            ObjectRef::Unresolved(ObjectKind::Node, _) => "node id",
            ObjectRef::Unresolved(ObjectKind::Way, _) => "way/area id",
            ObjectRef::Unresolved(ObjectKind::Relation, _) => "relation id",
            ObjectRef::Illegal => "illegal",
        }
    }

    /// "#1234", or `None` for illegal references.
    pub fn id_string(&self) -> Option<String> {
        match self {
            ObjectRef::Illegal => None,
            _ => Some(format!("#{}", self.id())),
        }
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &ObjectRef) -> bool {
        match (self.kind(), other.kind()) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b && self.id() == other.id(),
            _ => false,
        }
    }
}

impl Eq for ObjectRef {}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        self.id().hash(state);
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectRef::Illegal => write!(f, "{} #<unspec>", self.type_string()),
            _ => write!(f, "{} #{}", self.type_string(), self.id()),
        }
    }
}

/// Relation member: referenced object plus optional role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub object: ObjectRef,
    pub role: Option<String>,
}

impl Member {
    pub fn new(object: impl Into<ObjectRef>, role: Option<&str>) -> Self {
        Member {
            object: object.into(),
            role: role.filter(|r| !r.is_empty()).map(str::to_string),
        }
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }
}
