use std::fs;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

use log::{debug, info, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::data::bounds::Pos;
use crate::data::delete::{NodeDeleteMode, OrphanNodes, WayRefs};
use crate::data::object::{ItemId, Member, NodeId, ObjectKind, ObjectRef};
use crate::data::osm::{Base, Flags, Node, Relation, Way};
use crate::data::{Osm, UploadState};
use crate::errors::Result;

use super::generate_xml::{node_element, relation_element, way_element, Element, Flavor, XmlDocument};
use super::parse_osm::{attr, element_name, parse_attr, parse_base, parse_member, parse_tag};

const DIFF_ROOT: &str = "diff";

/// Nodes deleted in a diff may still be used by ways that were not part of it.
const RESTORE_NODE_DELETE: NodeDeleteMode = NodeDeleteMode {
    way_refs: WayRefs::Remove,
    relations: true,
    short_ways: false,
};

/// Outcome of re-applying a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffRestore {
    /// Number of entries applied to the graph.
    pub restored: usize,
    /// Some ways were hidden when the diff was saved.
    pub has_hidden: bool,
    /// Entries referring to unknown objects or otherwise unusable.
    pub ignored: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    New,
    Modified,
    Deleted,
    /// Unmodified way that was hidden.
    HiddenOnly,
}

impl State {
    fn from_upload(state: UploadState) -> Option<State> {
        match state {
            UploadState::Unmodified => None,
            UploadState::Dirty => Some(State::Modified),
            UploadState::New => Some(State::New),
            UploadState::Deleted => Some(State::Deleted),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            State::New => "new",
            State::Modified => "modified",
            State::Deleted => "deleted",
            State::HiddenOnly => "hidden",
        }
    }
}

fn identity(kind: ObjectKind, id: ItemId) -> BytesStart<'static> {
    let mut el = BytesStart::new(kind.as_str());
    el.push_attribute(("id", id.to_string().as_str()));
    el
}

fn diff_element(kind: ObjectKind, id: ItemId, state: State, hidden: bool, full: impl FnOnce() -> Element) -> Element {
    let (mut start, children) = match state {
        State::New | State::Modified => full(),
        State::Deleted | State::HiddenOnly => (identity(kind, id), Vec::new()),
    };
    if state != State::HiddenOnly {
        start.push_attribute(("state", state.as_str()));
    }
    if hidden {
        start.push_attribute(("hidden", "true"));
    }
    (start, children)
}

/// Document with everything that differs from the data as it was loaded:
/// new, modified and deleted objects plus hidden ways.
pub fn generate_diff(osm: &Osm, name: &str) -> Result<String> {
    let flavor = Flavor::Full(osm);
    let mut elements = Vec::new();

    for (id, node) in osm.nodes() {
        if let Some(state) = State::from_upload(osm.upload_state(id.into())) {
            elements.push(diff_element(ObjectKind::Node, id.id(), state, false, || node_element(node, flavor)));
        }
    }
    for (id, way) in osm.ways() {
        let hidden = osm.way_is_hidden(id);
        let state = match State::from_upload(osm.upload_state(id.into())) {
            Some(state) => state,
            None if hidden => State::HiddenOnly,
            None => continue,
        };
        elements.push(diff_element(ObjectKind::Way, id.id(), state, hidden, || way_element(way, flavor)));
    }
    for (id, relation) in osm.relations() {
        if let Some(state) = State::from_upload(osm.upload_state(id.into())) {
            elements.push(diff_element(ObjectKind::Relation, id.id(), state, false, || {
                relation_element(relation, flavor)
            }));
        }
    }

    let mut doc = XmlDocument::new()?;
    let mut root = BytesStart::new(DIFF_ROOT);
    root.push_attribute(("name", name));
    doc.start(root)?;
    let count = elements.len();
    for element in elements {
        doc.element(element)?;
    }
    doc.end(DIFF_ROOT)?;
    info!(name = name, objects = count; "Generated diff");
    doc.finish()
}

/// Write the diff of `osm` to `path`. A clean graph needs no diff, an
/// existing file is removed then. Returns whether a file was written.
pub fn save_diff(osm: &Osm, path: &Path, name: &str) -> Result<bool> {
    if osm.is_clean() {
        match fs::remove_file(path) {
            Ok(()) => info!(path = path.display().to_string(); "Removed obsolete diff"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        return Ok(false);
    }
    fs::write(path, generate_diff(osm, name)?)?;
    info!(path = path.display().to_string(); "Saved diff");
    Ok(true)
}

/// Object of the diff whose child elements are being read.
struct Entry {
    kind: ObjectKind,
    base: Base,
    state: State,
    hidden: bool,
    pos: Option<Pos>,
    nodes: Vec<NodeId>,
    members: Vec<Member>,
}

struct DiffRestorer<'a> {
    osm: &'a mut Osm,
    root_seen: bool,
    current: Option<Entry>,
    deleted: Vec<ObjectRef>,
    result: DiffRestore,
}

impl<'a> DiffRestorer<'a> {
    fn new(osm: &'a mut Osm) -> Self {
        DiffRestorer {
            osm,
            root_seen: false,
            current: None,
            deleted: Vec::new(),
            result: DiffRestore::default(),
        }
    }

    fn ignore(&mut self) -> Result<Option<Entry>> {
        self.result.ignored += 1;
        Ok(None)
    }

    fn parse_entry(&mut self, kind: ObjectKind, el: &BytesStart) -> Result<Option<Entry>> {
        let hidden = attr(el, "hidden")?.map_or(false, |v| v == "true");
        let state = match attr(el, "state")?.as_deref() {
            Some("new") => State::New,
            Some("modified") => State::Modified,
            Some("deleted") => State::Deleted,
            None if hidden && kind == ObjectKind::Way => State::HiddenOnly,
            other => {
                warn!(element = element_name(el), state = other.unwrap_or(""); "Invalid diff state, ignoring entry");
                return self.ignore();
            }
        };
        let Some(base) = parse_base(self.osm, el)? else {
            return self.ignore();
        };

        let mut pos = None;
        if kind == ObjectKind::Node && matches!(state, State::New | State::Modified) {
            let (Some(lat), Some(lon)) = (parse_attr::<f64>(el, "lat")?, parse_attr::<f64>(el, "lon")?) else {
                warn!(id = base.id; "Node without position in diff, ignoring it");
                return self.ignore();
            };
            pos = Some(Pos::new(lat, lon));
        }

        Ok(Some(Entry {
            kind,
            base,
            state,
            hidden,
            pos,
            nodes: Vec::new(),
            members: Vec::new(),
        }))
    }

    fn open(&mut self, el: &BytesStart) -> Result<()> {
        if !self.root_seen {
            if el.name().as_ref() != DIFF_ROOT.as_bytes() {
                return Err(format!("<{}> is not a diff document", element_name(el)).into());
            }
            self.root_seen = true;
            return Ok(());
        }

        match el.name().as_ref() {
            b"node" => self.current = self.parse_entry(ObjectKind::Node, el)?,
            b"way" => self.current = self.parse_entry(ObjectKind::Way, el)?,
            b"relation" => self.current = self.parse_entry(ObjectKind::Relation, el)?,
            b"tag" => {
                if let (Some(entry), Some(tag)) = (&mut self.current, parse_tag(el)?) {
                    entry.base.tags.push(tag);
                }
            }
            b"nd" => {
                let Some(entry) = &mut self.current else {
                    return Ok(());
                };
                match parse_attr::<ItemId>(el, "ref")?.and_then(|id| self.osm.find_node(id)) {
                    Some(node) => entry.nodes.push(node),
                    None => warn!(way = entry.base.id; "Way in diff refers to unknown node, dropping reference"),
                }
            }
            b"member" => {
                let member = parse_member(self.osm, el)?;
                if let (Some(entry), Some(member)) = (&mut self.current, member) {
                    entry.members.push(member);
                }
            }
            _ => debug!(element = element_name(el); "Ignoring element"),
        }
        Ok(())
    }

    fn close(&mut self, name: &[u8]) {
        if !matches!(name, b"node" | b"way" | b"relation") {
            return;
        }
        if let Some(entry) = self.current.take() {
            self.apply(entry);
        }
    }

    fn apply(&mut self, entry: Entry) {
        let (kind, id, hidden) = (entry.kind, entry.base.id, entry.hidden);
        let existing = self.osm.resolve(ObjectRef::Unresolved(kind, id));

        let object = match entry.state {
            State::New => {
                if id > 0 || existing.is_real() {
                    warn!(kind = kind.as_str(), id = id; "New object in diff collides with loaded data, ignoring it");
                    self.result.ignored += 1;
                    return;
                }
                self.insert_new(entry)
            }
            _ if !existing.is_real() => {
                warn!(kind = kind.as_str(), id = id; "Diff refers to unknown object, ignoring it");
                self.result.ignored += 1;
                return;
            }
            State::Deleted => {
                self.deleted.push(existing);
                existing
            }
            State::Modified => {
                self.update(existing, entry);
                existing
            }
            State::HiddenOnly => existing,
        };

        if let (true, Some(way)) = (hidden, object.as_way()) {
            self.osm.way_set_hidden(way);
            self.result.has_hidden = true;
        }
        self.result.restored += 1;
    }

    fn insert_new(&mut self, entry: Entry) -> ObjectRef {
        let Entry {
            kind,
            base,
            pos,
            nodes,
            members,
            ..
        } = entry;
        let object: ObjectRef = match kind {
            ObjectKind::Node => {
                let pos = pos.unwrap_or_default();
                let lpos = self.osm.bounds.pos2lpos(pos);
                self.osm.insert_node(Node::new(base, pos, lpos)).into()
            }
            ObjectKind::Way => {
                let mut way = Way::new(base);
                for node in nodes {
                    way.append_node(node);
                }
                self.osm.insert_way(way).into()
            }
            ObjectKind::Relation => {
                let mut relation = Relation::new(base);
                relation.members = members;
                self.osm.insert_relation(relation).into()
            }
        };
        self.osm.set_flags(object, Flags::NEW);
        debug!(object = object.to_string(); "Restored new object");
        object
    }

    /// Take over the saved content. The object only becomes dirty if the
    /// content really differs from the loaded one.
    fn update(&mut self, object: ObjectRef, entry: Entry) {
        let loaded = self.osm.base(object).map_or(0, |b| b.version);
        if loaded != entry.base.version {
            warn!(object = object.to_string(), saved = entry.base.version, loaded = loaded; "Object changed on the server since the diff was saved");
        }

        match object {
            ObjectRef::Node(node) => {
                if let Some(pos) = entry.pos.filter(|pos| *pos != self.osm.node(node).pos) {
                    self.osm.node_move(node, pos);
                }
            }
            ObjectRef::Way(way) => {
                if self.osm.way(way).node_chain() != entry.nodes.as_slice() {
                    for node in &entry.nodes {
                        self.osm.node_mut(*node).add_way_ref();
                    }
                    let old = std::mem::replace(self.osm.way_mut(way).node_chain_mut(), entry.nodes);
                    for node in old {
                        self.osm.node_mut(node).remove_way_ref();
                    }
                    self.osm.mark_dirty(object);
                }
            }
            ObjectRef::Relation(relation) => {
                if self.osm.relation(relation).members != entry.members {
                    self.osm.relation_mut(relation).members = entry.members;
                    self.osm.mark_dirty(object);
                }
            }
            ObjectRef::Unresolved(..) | ObjectRef::Illegal => {}
        }
        self.osm.update_tags(object, entry.base.tags);
    }

    fn finish(self) -> Result<DiffRestore> {
        if !self.root_seen {
            return Err("empty diff document".into());
        }
        self.osm.fixup_relation_members();

        // parents first so nothing is deleted while still in use
        for relation in self.deleted.iter().filter_map(ObjectRef::as_relation) {
            if !self.osm.relation(relation).base.is_deleted() {
                self.osm.relation_delete(relation, &mut ());
            }
        }
        for way in self.deleted.iter().filter_map(ObjectRef::as_way) {
            self.osm.way_delete(way, OrphanNodes::Keep, &mut ());
        }
        for node in self.deleted.iter().filter_map(ObjectRef::as_node) {
            if self.osm.contains_node(node) && !self.osm.node(node).base.is_deleted() {
                self.osm.node_delete(node, RESTORE_NODE_DELETE, &mut ());
            }
        }

        let result = self.result;
        info!(restored = result.restored, ignored = result.ignored, hidden = result.has_hidden; "Restored diff");
        Ok(result)
    }
}

/// Re-apply a diff onto freshly loaded data.
pub fn restore_diff<R: BufRead>(osm: &mut Osm, input: R) -> Result<DiffRestore> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut restorer = DiffRestorer::new(osm);

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => restorer.open(&e)?,
            Event::Empty(e) => {
                restorer.open(&e)?;
                restorer.close(e.name().as_ref());
            }
            Event::End(e) => restorer.close(e.name().as_ref()),
            _ => (),
        }
        buf.clear();
    }
    restorer.finish()
}

pub fn restore_diff_str(osm: &mut Osm, data: &str) -> Result<DiffRestore> {
    restore_diff(osm, data.as_bytes())
}

/// Re-apply the diff stored at `path`. `None` if there is no such file.
pub fn restore_diff_file(osm: &mut Osm, path: &Path) -> Result<Option<DiffRestore>> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = path.display().to_string(); "No diff present");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    info!(path = path.display().to_string(); "Restoring diff");
    restore_diff(osm, BufReader::new(file)).map(Some)
}
