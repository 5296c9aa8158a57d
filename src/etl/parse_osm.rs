use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use log::{debug, info, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use xz::bufread::XzDecoder;

use crate::data::bounds::{Pos, PosArea};
use crate::data::object::{ItemId, Member, ObjectKind, ObjectRef};
use crate::data::osm::{Base, Node, Relation, Way};
use crate::data::tags::Tag;
use crate::data::Osm;
use crate::errors::Result;

/// Blocks of an .osm document. They have to appear in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Section {
    Start,
    Bounds,
    Nodes,
    Ways,
    Relations,
}

/// Object whose child elements are being read.
enum Current {
    Node(Node),
    Way(Way),
    Relation(Relation),
    /// Invalid or misplaced object, children are ignored.
    Skipped,
}

pub(crate) fn element_name(el: &BytesStart) -> String {
    String::from_utf8_lossy(el.name().as_ref()).into_owned()
}

/// Unescaped value of an attribute.
pub(crate) fn attr(el: &BytesStart, name: &str) -> Result<Option<String>> {
    match el.try_get_attribute(name)? {
        Some(attribute) => Ok(Some(attribute.unescape_value()?.into_owned())),
        None => Ok(None),
    }
}

/// Parsed value of an attribute. Values that don't parse are reported and
/// treated as missing.
pub(crate) fn parse_attr<T: FromStr>(el: &BytesStart, name: &str) -> Result<Option<T>> {
    let Some(value) = attr(el, name)? else {
        return Ok(None);
    };
    match value.parse() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => {
            warn!(element = element_name(el), attribute = name, value = value; "Unparsable attribute value");
            Ok(None)
        }
    }
}

/// Unix seconds of an ISO 8601 timestamp like `2011-02-15T09:06:52Z`.
pub fn parse_timestamp(value: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|time| time.timestamp())
}

pub(crate) fn parse_tag(el: &BytesStart) -> Result<Option<Tag>> {
    match (attr(el, "k")?, attr(el, "v")?) {
        (Some(key), Some(value)) => Ok(Some(Tag::new(key, value))),
        _ => {
            warn!(element = "tag"; "Tag without key or value, dropping it");
            Ok(None)
        }
    }
}

pub(crate) fn parse_kind(el: &BytesStart) -> Result<Option<ObjectKind>> {
    Ok(attr(el, "type")?.and_then(|name| ObjectKind::from_name(&name)))
}

/// Read the member element of a relation. Members referring to objects that
/// are not loaded are kept by id.
pub(crate) fn parse_member(osm: &Osm, el: &BytesStart) -> Result<Option<Member>> {
    let kind = parse_kind(el)?;
    let id: Option<ItemId> = parse_attr(el, "ref")?;
    let (Some(kind), Some(id)) = (kind, id) else {
        warn!(element = "member"; "Member without valid type or ref, dropping it");
        return Ok(None);
    };
    let object = osm.resolve(ObjectRef::Unresolved(kind, id));
    if !object.is_real() {
        debug!(kind = kind.as_str(), id = id; "Member refers to object not loaded");
    }
    let role = attr(el, "role")?;
    Ok(Some(Member::new(object, role.as_deref())))
}

/// Identity and metadata of an object. Users are entered into the user
/// table of `osm`.
pub(crate) fn parse_base(osm: &mut Osm, el: &BytesStart) -> Result<Option<Base>> {
    let Some(id) = parse_attr::<ItemId>(el, "id")?.filter(|id| *id != 0) else {
        warn!(element = element_name(el); "Object without id, ignoring it");
        return Ok(None);
    };

    let mut base = Base::new(id, parse_attr(el, "version")?.unwrap_or(0));
    base.visible = attr(el, "visible")?.map_or(true, |v| v != "false");
    if let Some(time) = attr(el, "timestamp")? {
        match parse_timestamp(&time) {
            Some(time) => base.time = time,
            None => warn!(id = id, timestamp = time; "Invalid timestamp"),
        }
    }
    let uid: Option<i32> = parse_attr(el, "uid")?;
    if let Some(user) = attr(el, "user")? {
        base.user = osm.intern_user(&user, uid);
    }
    Ok(Some(base))
}

struct OsmParser {
    osm: Osm,
    section: Section,
    current: Option<Current>,
}

impl OsmParser {
    fn new() -> Self {
        OsmParser {
            osm: Osm::new(),
            section: Section::Start,
            current: None,
        }
    }

    /// Switch to `section` unless a later one was already seen.
    fn enter(&mut self, section: Section, el: &BytesStart) -> bool {
        if section < self.section {
            warn!(element = element_name(el), section = format!("{:?}", self.section); "Element out of order, ignoring it");
            return false;
        }
        self.section = section;
        true
    }

    fn parse_bounds(&mut self, el: &BytesStart) -> Result<()> {
        if !self.enter(Section::Bounds, el) {
            return Ok(());
        }
        let coords = (
            parse_attr::<f64>(el, "minlat")?,
            parse_attr::<f64>(el, "minlon")?,
            parse_attr::<f64>(el, "maxlat")?,
            parse_attr::<f64>(el, "maxlon")?,
        );
        let (Some(minlat), Some(minlon), Some(maxlat), Some(maxlon)) = coords else {
            warn!(element = "bounds"; "Incomplete bounds");
            return Ok(());
        };
        let area = PosArea::new(Pos::new(minlat, minlon), Pos::new(maxlat, maxlon));
        if !self.osm.bounds.init(area) {
            warn!(minlat = minlat, minlon = minlon, maxlat = maxlat, maxlon = maxlon; "Invalid bounds");
        }
        Ok(())
    }

    fn parse_node(&mut self, el: &BytesStart) -> Result<Current> {
        if !self.enter(Section::Nodes, el) {
            return Ok(Current::Skipped);
        }
        let Some(base) = parse_base(&mut self.osm, el)? else {
            return Ok(Current::Skipped);
        };
        let (Some(lat), Some(lon)) = (parse_attr::<f64>(el, "lat")?, parse_attr::<f64>(el, "lon")?) else {
            warn!(id = base.id; "Node without position, ignoring it");
            return Ok(Current::Skipped);
        };
        let pos = Pos::new(lat, lon);
        Ok(Current::Node(Node::new(base, pos, self.osm.bounds.pos2lpos(pos))))
    }

    fn parse_way(&mut self, el: &BytesStart) -> Result<Current> {
        if !self.enter(Section::Ways, el) {
            return Ok(Current::Skipped);
        }
        Ok(parse_base(&mut self.osm, el)?.map_or(Current::Skipped, |base| Current::Way(Way::new(base))))
    }

    fn parse_relation(&mut self, el: &BytesStart) -> Result<Current> {
        if !self.enter(Section::Relations, el) {
            return Ok(Current::Skipped);
        }
        Ok(parse_base(&mut self.osm, el)?.map_or(Current::Skipped, |base| Current::Relation(Relation::new(base))))
    }

    fn parse_nd(&mut self, el: &BytesStart) -> Result<()> {
        let Some(Current::Way(way)) = &mut self.current else {
            warn!(element = "nd"; "Node reference outside of a way");
            return Ok(());
        };
        let Some(id) = parse_attr::<ItemId>(el, "ref")? else {
            warn!(way = way.id(); "Node reference without ref");
            return Ok(());
        };
        match self.osm.find_node(id) {
            Some(node) => way.append_node(node),
            None => warn!(way = way.id(), node = id; "Way refers to unknown node, dropping reference"),
        }
        Ok(())
    }

    fn open(&mut self, el: &BytesStart) -> Result<()> {
        match el.name().as_ref() {
            b"osm" => {}
            b"bounds" => self.parse_bounds(el)?,
            b"node" => self.current = Some(self.parse_node(el)?),
            b"way" => self.current = Some(self.parse_way(el)?),
            b"relation" => self.current = Some(self.parse_relation(el)?),
            b"tag" => {
                let tag = parse_tag(el)?;
                match (&mut self.current, tag) {
                    (Some(Current::Node(node)), Some(tag)) => node.base.tags.push(tag),
                    (Some(Current::Way(way)), Some(tag)) => way.base.tags.push(tag),
                    (Some(Current::Relation(relation)), Some(tag)) => relation.base.tags.push(tag),
                    (Some(Current::Skipped), _) | (_, None) => {}
                    (None, Some(_)) => warn!(element = "tag"; "Tag outside of an object"),
                }
            }
            b"nd" => self.parse_nd(el)?,
            b"member" => {
                let member = parse_member(&self.osm, el)?;
                match (&mut self.current, member) {
                    (Some(Current::Relation(relation)), Some(member)) => relation.members.push(member),
                    (Some(Current::Relation(_)), None) | (Some(Current::Skipped), _) => {}
                    _ => warn!(element = "member"; "Member outside of a relation"),
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
        match self.current.take() {
            Some(Current::Node(node)) => {
                if self.osm.find_node(node.id()).is_some() {
                    warn!(id = node.id(); "Duplicate node, ignoring it");
                } else {
                    self.osm.insert_node(node);
                }
            }
            Some(Current::Way(way)) => {
                if self.osm.find_way(way.id()).is_some() {
                    warn!(id = way.id(); "Duplicate way, ignoring it");
                } else {
                    self.osm.insert_way(way);
                }
            }
            Some(Current::Relation(relation)) => {
                if self.osm.find_relation(relation.id()).is_some() {
                    warn!(id = relation.id(); "Duplicate relation, ignoring it");
                } else {
                    self.osm.insert_relation(relation);
                }
            }
            Some(Current::Skipped) | None => {}
        }
    }

    fn finish(mut self) -> Osm {
        self.osm.fixup_relation_members();
        info!(
            nodes = self.osm.node_count(),
            ways = self.osm.way_count(),
            relations = self.osm.relation_count(),
            users = self.osm.users().count();
            "Loaded OSM data"
        );
        self.osm
    }
}

/// Read an .osm document. Broken XML is an error, invalid objects are
/// reported and skipped.
pub fn parse_osm<R: BufRead>(input: R) -> Result<Osm> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut parser = OsmParser::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => parser.open(&e)?,
            Event::Empty(e) => {
                parser.open(&e)?;
                parser.close(e.name().as_ref());
            }
            Event::End(e) => parser.close(e.name().as_ref()),
            _ => (),
        }
        buf.clear();
    }
    Ok(parser.finish())
}

pub fn parse_osm_str(data: &str) -> Result<Osm> {
    parse_osm(data.as_bytes())
}

/// Read an .osm file, xz compressed if the name ends in `.xz`.
pub fn parse_osm_file(path: &Path) -> Result<Osm> {
    info!(path = path.display().to_string(); "Reading OSM file");
    let file_reader = BufReader::new(fs::File::open(path)?);
    if path.extension().map_or(false, |ext| ext == "xz") {
        parse_osm(BufReader::new(XzDecoder::new(file_reader)))
    } else {
        parse_osm(file_reader)
    }
}
