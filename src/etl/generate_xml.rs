use chrono::{SecondsFormat, TimeZone, Utc};
use log::info;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::writer::Writer;

use crate::data::object::{Member, ObjectRef};
use crate::data::osm::{Base, Node, Relation, Way};
use crate::data::tags::TagList;
use crate::data::Osm;
use crate::errors::Result;

pub const API_VERSION: &str = "0.6";
pub const GENERATOR: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

/// RFC 3339 form of a Unix timestamp, e.g. `2011-02-15T09:06:52Z`.
pub fn format_timestamp(time: i64) -> Option<String> {
    Utc.timestamp_opt(time, 0)
        .single()
        .map(|time| time.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Attributes written for an object.
#[derive(Clone, Copy)]
pub(crate) enum Flavor<'a> {
    /// Upload of a single object, new objects have no id yet.
    Upload(&'a str),
    /// Part of an osmChange document.
    Change(&'a str),
    /// Complete attributes and all tags, for files kept locally.
    Full(&'a Osm),
}

/// Start tag plus the (always empty) child elements of an object.
pub(crate) type Element = (BytesStart<'static>, Vec<BytesStart<'static>>);

pub(crate) struct XmlDocument {
    writer: Writer<Vec<u8>>,
}

impl XmlDocument {
    pub(crate) fn new() -> Result<Self> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        Ok(XmlDocument { writer })
    }

    pub(crate) fn start(&mut self, el: BytesStart) -> Result<()> {
        self.writer.write_event(Event::Start(el))?;
        Ok(())
    }

    pub(crate) fn end(&mut self, name: &str) -> Result<()> {
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    pub(crate) fn empty(&mut self, el: BytesStart) -> Result<()> {
        self.writer.write_event(Event::Empty(el))?;
        Ok(())
    }

    pub(crate) fn element(&mut self, (start, children): Element) -> Result<()> {
        if children.is_empty() {
            return self.empty(start);
        }
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        self.start(start)?;
        for child in children {
            self.empty(child)?;
        }
        self.end(&name)
    }

    pub(crate) fn finish(self) -> Result<String> {
        Ok(String::from_utf8(self.writer.into_inner())?)
    }
}

fn osm_root() -> BytesStart<'static> {
    let mut el = BytesStart::new("osm");
    el.push_attribute(("version", API_VERSION));
    el.push_attribute(("generator", GENERATOR));
    el
}

fn base_start(name: &'static str, base: &Base, flavor: Flavor) -> BytesStart<'static> {
    let mut el = BytesStart::new(name);
    match flavor {
        Flavor::Upload(changeset) => {
            if !base.is_new() {
                el.push_attribute(("id", base.id.to_string().as_str()));
            }
            el.push_attribute(("version", base.version.to_string().as_str()));
            el.push_attribute(("changeset", changeset));
        }
        Flavor::Change(changeset) => {
            el.push_attribute(("id", base.id.to_string().as_str()));
            el.push_attribute(("version", base.version.to_string().as_str()));
            el.push_attribute(("changeset", changeset));
        }
        Flavor::Full(osm) => {
            el.push_attribute(("id", base.id.to_string().as_str()));
            el.push_attribute(("version", base.version.to_string().as_str()));
            if base.time > 0 {
                if let Some(time) = format_timestamp(base.time) {
                    el.push_attribute(("timestamp", time.as_str()));
                }
            }
            if let Some(user) = osm.user(base.user) {
                el.push_attribute(("user", user));
                if base.user > 0 {
                    el.push_attribute(("uid", base.user.to_string().as_str()));
                }
            }
            el.push_attribute(("visible", if base.visible { "true" } else { "false" }));
        }
    }
    el
}

fn tag_elements(tags: &TagList, flavor: Flavor) -> Vec<BytesStart<'static>> {
    let all = matches!(flavor, Flavor::Full(_));
    tags.iter()
        .filter(|tag| all || !tag.is_discardable())
        .map(|tag| {
            let mut el = BytesStart::new("tag");
            el.push_attribute(("k", tag.key.as_str()));
            el.push_attribute(("v", tag.value.as_str()));
            el
        })
        .collect()
}

pub(crate) fn node_element(node: &Node, flavor: Flavor) -> Element {
    let mut start = base_start("node", &node.base, flavor);
    start.push_attribute(("lat", node.pos.lat.to_string().as_str()));
    start.push_attribute(("lon", node.pos.lon.to_string().as_str()));
    (start, tag_elements(&node.base.tags, flavor))
}

pub(crate) fn way_element(way: &Way, flavor: Flavor) -> Element {
    let mut children: Vec<BytesStart<'static>> = way
        .node_chain()
        .iter()
        .map(|node| {
            let mut el = BytesStart::new("nd");
            el.push_attribute(("ref", node.id().to_string().as_str()));
            el
        })
        .collect();
    children.extend(tag_elements(&way.base.tags, flavor));
    (base_start("way", &way.base, flavor), children)
}

pub(crate) fn member_element(member: &Member) -> Option<BytesStart<'static>> {
    let kind = member.object.kind()?;
    let mut el = BytesStart::new("member");
    el.push_attribute(("type", kind.as_str()));
    el.push_attribute(("ref", member.object.id().to_string().as_str()));
    el.push_attribute(("role", member.role().unwrap_or("")));
    Some(el)
}

pub(crate) fn relation_element(relation: &Relation, flavor: Flavor) -> Element {
    let mut children: Vec<BytesStart<'static>> = relation.members.iter().filter_map(member_element).collect();
    children.extend(tag_elements(&relation.base.tags, flavor));
    (base_start("relation", &relation.base, flavor), children)
}

fn single_object(element: Element) -> Result<String> {
    let mut doc = XmlDocument::new()?;
    doc.start(osm_root())?;
    doc.element(element)?;
    doc.end("osm")?;
    doc.finish()
}

/// Upload document of a single node.
pub fn generate_xml_node(changeset: &str, node: &Node) -> Result<String> {
    single_object(node_element(node, Flavor::Upload(changeset)))
}

pub fn generate_xml_way(changeset: &str, way: &Way) -> Result<String> {
    single_object(way_element(way, Flavor::Upload(changeset)))
}

pub fn generate_xml_relation(changeset: &str, relation: &Relation) -> Result<String> {
    single_object(relation_element(relation, Flavor::Upload(changeset)))
}

/// Upload document of any real object, `None` for references.
pub fn generate_xml_object(osm: &Osm, changeset: &str, object: ObjectRef) -> Result<Option<String>> {
    match object {
        ObjectRef::Node(node) => generate_xml_node(changeset, osm.node(node)).map(Some),
        ObjectRef::Way(way) => generate_xml_way(changeset, osm.way(way)).map(Some),
        ObjectRef::Relation(relation) => generate_xml_relation(changeset, osm.relation(relation)).map(Some),
        _ => Ok(None),
    }
}

/// Document to open a changeset.
pub fn generate_xml_changeset(comment: &str, source: Option<&str>) -> Result<String> {
    let mut doc = XmlDocument::new()?;
    doc.start(osm_root())?;
    doc.start(BytesStart::new("changeset"))?;
    let mut tags = vec![("created_by", GENERATOR), ("comment", comment)];
    if let Some(source) = source.filter(|s| !s.is_empty()) {
        tags.push(("source", source));
    }
    for (key, value) in tags {
        let mut el = BytesStart::new("tag");
        el.push_attribute(("k", key));
        el.push_attribute(("v", value));
        doc.empty(el)?;
    }
    doc.end("changeset")?;
    doc.end("osm")?;
    doc.finish()
}

fn write_section(doc: &mut XmlDocument, name: &str, elements: Vec<Element>) -> Result<usize> {
    let count = elements.len();
    if count == 0 {
        return Ok(0);
    }
    doc.start(BytesStart::new(name))?;
    for element in elements {
        doc.element(element)?;
    }
    doc.end(name)?;
    Ok(count)
}

/// osmChange document with all modifications of `osm`. Deletions are
/// ordered relations, ways, nodes so nothing is deleted while still used.
pub fn generate_osm_change(osm: &Osm, changeset: &str) -> Result<String> {
    let modified = osm.modified();
    let flavor = Flavor::Change(changeset);
    let created: Vec<Element> = modified
        .nodes
        .created
        .iter()
        .map(|n| node_element(osm.node(*n), flavor))
        .chain(modified.ways.created.iter().map(|w| way_element(osm.way(*w), flavor)))
        .chain(modified.relations.created.iter().map(|r| relation_element(osm.relation(*r), flavor)))
        .collect();
    let changed: Vec<Element> = modified
        .nodes
        .modified
        .iter()
        .map(|n| node_element(osm.node(*n), flavor))
        .chain(modified.ways.modified.iter().map(|w| way_element(osm.way(*w), flavor)))
        .chain(modified.relations.modified.iter().map(|r| relation_element(osm.relation(*r), flavor)))
        .collect();
    // deletions only carry the identity
    let deleted: Vec<Element> = modified
        .relations
        .deleted
        .iter()
        .map(|r| (base_start("relation", &osm.relation(*r).base, flavor), Vec::new()))
        .chain(modified.ways.deleted.iter().map(|w| (base_start("way", &osm.way(*w).base, flavor), Vec::new())))
        .chain(modified.nodes.deleted.iter().map(|n| (base_start("node", &osm.node(*n).base, flavor), Vec::new())))
        .collect();

    let mut doc = XmlDocument::new()?;
    let mut root = BytesStart::new("osmChange");
    root.push_attribute(("version", API_VERSION));
    root.push_attribute(("generator", GENERATOR));
    doc.start(root)?;
    let created = write_section(&mut doc, "create", created)?;
    let modified = write_section(&mut doc, "modify", changed)?;
    let deleted = write_section(&mut doc, "delete", deleted)?;
    doc.end("osmChange")?;
    info!(created = created, modified = modified, deleted = deleted; "Generated osmChange");
    doc.finish()
}

/// Complete document of all objects that are not deleted, e.g. to save an
/// edited data set.
pub fn generate_osm_document(osm: &Osm) -> Result<String> {
    let flavor = Flavor::Full(osm);
    let mut doc = XmlDocument::new()?;
    doc.start(osm_root())?;

    if osm.bounds.is_valid() {
        let ll = osm.bounds.ll;
        let mut bounds = BytesStart::new("bounds");
        bounds.push_attribute(("minlat", ll.min.lat.to_string().as_str()));
        bounds.push_attribute(("minlon", ll.min.lon.to_string().as_str()));
        bounds.push_attribute(("maxlat", ll.max.lat.to_string().as_str()));
        bounds.push_attribute(("maxlon", ll.max.lon.to_string().as_str()));
        doc.empty(bounds)?;
    }

    for (_, node) in osm.nodes().filter(|(_, n)| !n.base.is_deleted()) {
        doc.element(node_element(node, flavor))?;
    }
    for (_, way) in osm.ways().filter(|(_, w)| !w.base.is_deleted()) {
        doc.element(way_element(way, flavor))?;
    }
    for (_, relation) in osm.relations().filter(|(_, r)| !r.base.is_deleted()) {
        doc.element(relation_element(relation, flavor))?;
    }

    doc.end("osm")?;
    doc.finish()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::bounds::Pos;
    use crate::data::delete::NodeDeleteMode;
    use crate::data::tags::Tag;
    use crate::data::test::{server_node, server_way, test_osm};

    #[test]
    fn test_upload_of_new_node_has_no_id() {
        let mut osm = test_osm();
        let mut node = osm.node_new(Pos::new(52.25, 9.58));
        node.base.tags.push(Tag::new("amenity", "bench"));
        node.base.tags.push(Tag::new("created_by", "test"));
        let id = osm.attach_node(node);

        let xml = generate_xml_node("42", osm.node(id)).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<node version=\"0\" changeset=\"42\" lat=\"52.25\" lon=\"9.58\">"));
        assert!(xml.contains("<tag k=\"amenity\" v=\"bench\"/>"));
        assert!(!xml.contains("created_by"));
        assert!(!xml.contains(" id="));
    }

    #[test]
    fn test_upload_of_way_and_relation() {
        let mut osm = test_osm();
        let n1 = server_node(&mut osm, 1);
        let n2 = server_node(&mut osm, 2);
        let w = server_way(&mut osm, 7, &[n1, n2]);
        let mut relation = Relation::new(Base::new(9, 3));
        relation.members.push(Member::new(w, Some("outer")));
        relation.members.push(Member::new(ObjectRef::Unresolved(crate::data::object::ObjectKind::Node, 5), None));
        relation.members.push(Member::new(ObjectRef::Illegal, None));
        let r = osm.insert_relation(relation);

        let xml = generate_xml_object(&osm, "1", w.into()).unwrap().unwrap();
        assert!(xml.contains("<way id=\"7\" version=\"1\" changeset=\"1\">"));
        assert!(xml.contains("<nd ref=\"1\"/>"));
        assert!(xml.contains("<nd ref=\"2\"/>"));

        let xml = generate_xml_relation("1", osm.relation(r)).unwrap();
        assert!(xml.contains("<member type=\"way\" ref=\"7\" role=\"outer\"/>"));
        assert!(xml.contains("<member type=\"node\" ref=\"5\" role=\"\"/>"));
        assert_eq!(xml.matches("<member").count(), 2);

        assert_eq!(generate_xml_object(&osm, "1", ObjectRef::Illegal).unwrap(), None);
    }

    #[test]
    fn test_changeset_document() {
        let xml = generate_xml_changeset("fix <names> & more", Some("survey")).unwrap();
        assert!(xml.contains("<tag k=\"created_by\" v=\"osm-edit "));
        assert!(xml.contains("<tag k=\"comment\" v=\"fix &lt;names&gt; &amp; more\"/>"));
        assert!(xml.contains("<tag k=\"source\" v=\"survey\"/>"));

        let xml = generate_xml_changeset("x", Some("")).unwrap();
        assert!(!xml.contains("source"));
    }

    #[test]
    fn test_osm_change_sections() {
        let mut osm = test_osm();
        let n: Vec<_> = (1..=4).map(|id| server_node(&mut osm, id)).collect();
        let w = server_way(&mut osm, 10, &n[..3]);
        let gone = server_way(&mut osm, 11, &[n[2], n[3]]);
        osm.node_move(n[0], Pos::new(52.2694, 9.5752));
        osm.way_delete(gone, crate::data::delete::OrphanNodes::Delete, &mut ());
        osm.node_delete(n[1], NodeDeleteMode::FULL, &mut ());
        let fresh = osm.attach_node(osm.node_new(Pos::new(52.2694, 9.5753)));

        let xml = generate_osm_change(&osm, "77").unwrap();
        let create = xml.find("<create>").unwrap();
        let modify = xml.find("<modify>").unwrap();
        let delete = xml.find("<delete>").unwrap();
        assert!(create < modify && modify < delete);
        assert!(xml.contains(&format!("<node id=\"{}\" version=\"0\" changeset=\"77\"", fresh.id())));
        assert!(xml.contains(&format!("<way id=\"{}\" version=\"1\" changeset=\"77\">", w.id())));

        // ways are deleted before the nodes they used
        let deleted = &xml[delete..];
        let way_pos = deleted.find("<way id=\"11\"").unwrap();
        let node_pos = deleted.find("<node id=\"2\"").unwrap();
        assert!(way_pos < node_pos);
        assert!(deleted.contains("<node id=\"4\""));
    }

    #[test]
    fn test_unmodified_data_gives_empty_change() {
        let osm = test_osm();
        let xml = generate_osm_change(&osm, "1").unwrap();
        assert!(!xml.contains("<create>"));
        assert!(!xml.contains("<modify>"));
        assert!(!xml.contains("<delete>"));
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(format_timestamp(1297760812).as_deref(), Some("2011-02-15T09:06:52Z"));
        assert_eq!(format_timestamp(0).as_deref(), Some("1970-01-01T00:00:00Z"));
    }
}
