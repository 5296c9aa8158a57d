use std::fs;

use osm_edit::data::bounds::Pos;
use osm_edit::data::delete::NodeDeleteMode;
use osm_edit::data::object::{ItemId, NodeId, ObjectRef, WayId};
use osm_edit::data::Osm;
use osm_edit::etl::changeset::{ChangesetEtl, ProjectFiles};
use osm_edit::etl::diff::{generate_diff, restore_diff_str, save_diff};
use osm_edit::etl::generate_xml::{generate_osm_change, generate_osm_document};
use osm_edit::etl::parse_osm::parse_osm_str;
use osm_edit::etl::Etl;

const FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="test">
  <bounds minlat="52.2692786" minlon="9.5750497" maxlat="52.2695463" maxlon="9.5755"/>
  <node id="1" version="1" timestamp="2011-02-15T09:06:52Z" user="Dakon" uid="53064" lat="52.2693" lon="9.5751"/>
  <node id="2" version="1" lat="52.2693" lon="9.5752"/>
  <node id="3" version="1" lat="52.2694" lon="9.5753"/>
  <node id="4" version="2" lat="52.2694" lon="9.5754"/>
  <node id="5" version="1" lat="52.2695" lon="9.5754">
    <tag k="created_by" v="JOSM"/>
    <tag k="crossing" v="zebra"/>
  </node>
  <node id="6" version="3" lat="52.26951" lon="9.57541">
    <tag k="highway" v="bus_stop"/>
    <tag k="name" v="Market &amp; Square"/>
  </node>
  <way id="10" version="4" user="Dakon" uid="53064">
    <nd ref="1"/>
    <nd ref="2"/>
    <nd ref="3"/>
    <nd ref="4"/>
    <nd ref="999"/>
    <tag k="highway" v="residential"/>
    <tag k="name" v="Main Street"/>
  </way>
  <way id="11" version="1">
    <nd ref="4"/>
    <nd ref="5"/>
    <tag k="highway" v="service"/>
    <tag k="oneway" v="yes"/>
  </way>
  <relation id="31" version="1">
    <member type="relation" ref="30" role=""/>
    <member type="way" ref="12345" role="outer"/>
    <tag k="type" v="route_master"/>
  </relation>
  <relation id="30" version="2">
    <member type="way" ref="10" role="forward"/>
    <member type="way" ref="11" role="forward"/>
    <member type="node" ref="6" role="stop"/>
    <tag k="type" v="route"/>
    <tag k="route" v="bus"/>
  </relation>
</osm>
"#;

fn node(osm: &Osm, id: ItemId) -> NodeId {
    osm.find_node(id).unwrap()
}

fn way(osm: &Osm, id: ItemId) -> WayId {
    osm.find_way(id).unwrap()
}

fn chain_ids(osm: &Osm, way: WayId) -> Vec<ItemId> {
    osm.way(way).node_chain().iter().map(|n| n.id()).collect()
}

fn assert_counters(osm: &Osm) {
    for (id, node) in osm.nodes() {
        let refs: usize = osm
            .ways()
            .map(|(_, w)| w.node_chain().iter().filter(|n| **n == id).count())
            .sum();
        assert_eq!(node.ways() as usize, refs, "node #{}", id.id());
    }
}

/// Load the fixture and apply a typical set of edits.
fn edited() -> Osm {
    let mut osm = parse_osm_str(FIXTURE).unwrap();

    let main_street = way(&osm, 10);
    let new_way = osm.split_way(main_street, 2, true, &mut ()).unwrap();
    assert_eq!(chain_ids(&osm, main_street), vec![1, 2, 3]);
    assert_eq!(chain_ids(&osm, new_way), vec![3, 4]);

    let service = way(&osm, 11);
    osm.reverse_way(service);

    let merge = osm.merge_nodes(node(&osm, 5), node(&osm, 6), &mut ());
    assert_eq!(merge.survivor, node(&osm, 6));
    assert!(!merge.conflict);

    osm.node_delete(node(&osm, 2), NodeDeleteMode::FULL, &mut ());

    let fresh = osm.attach_node(osm.node_new(Pos::new(52.26945, 9.57545)));
    osm.way_append_node(new_way, fresh);
    osm.way_set_hidden(service);
    assert_counters(&osm);
    osm
}

#[test]
fn test_import() {
    let osm = parse_osm_str(FIXTURE).unwrap();
    assert_eq!(osm.node_count(), 6);
    assert_eq!(osm.way_count(), 2);
    assert_eq!(osm.relation_count(), 2);
    assert!(osm.sanity_check().is_none());
    assert!(osm.is_clean());

    // the reference to the missing node is gone
    assert_eq!(chain_ids(&osm, way(&osm, 10)), vec![1, 2, 3, 4]);
    let master = osm.relation(osm.find_relation(31).unwrap());
    assert!(master.members[0].object.is_real());
    assert!(!master.members[1].object.is_real());
    assert_eq!(osm.node(node(&osm, 6)).tags().get_value("name"), Some("Market & Square"));
    assert_eq!(osm.user(53064), Some("Dakon"));
    assert_counters(&osm);
}

#[test]
fn test_edits() {
    let osm = edited();
    let route = osm.relation(osm.find_relation(30).unwrap());
    let members: Vec<ObjectRef> = route.members.iter().map(|m| m.object).collect();
    assert_eq!(
        members,
        vec![
            ObjectRef::from(way(&osm, 10)),
            ObjectRef::from(way(&osm, -1)),
            ObjectRef::from(way(&osm, 11)),
            ObjectRef::from(node(&osm, 6)),
        ]
    );
    assert_eq!(route.members[2].role(), Some("backward"));

    let service = way(&osm, 11);
    assert_eq!(chain_ids(&osm, service), vec![6, 4]);
    assert_eq!(osm.way(service).tags().get_value("oneway"), Some("-1"));

    let stop = osm.node(node(&osm, 6));
    assert_eq!(stop.pos, Pos::new(52.2695, 9.5754));
    assert_eq!(stop.tags().get_value("crossing"), Some("zebra"));
    assert_eq!(stop.tags().get_value("created_by"), None);
    assert!(osm.node(node(&osm, 5)).base.is_deleted());
    assert!(osm.node(node(&osm, 2)).base.is_deleted());

    let modified = osm.modified();
    assert_eq!(modified.nodes.created.len(), 1);
    assert_eq!(modified.ways.created, vec![way(&osm, -1)]);
    assert_eq!(modified.nodes.deleted, vec![node(&osm, 2), node(&osm, 5)]);
}

#[test]
fn test_snapshot_round_trip() {
    let osm = edited();
    let snapshot = generate_osm_document(&osm).unwrap();
    let reloaded = parse_osm_str(&snapshot).unwrap();

    let live_nodes = osm.nodes().filter(|(_, n)| !n.base.is_deleted()).count();
    assert_eq!(reloaded.node_count(), live_nodes);
    assert_eq!(reloaded.way_count(), osm.way_count());
    assert_eq!(reloaded.relation_count(), osm.relation_count());

    for (id, w) in osm.ways() {
        let other = reloaded.way(way(&reloaded, id.id()));
        assert_eq!(chain_ids(&reloaded, way(&reloaded, id.id())), chain_ids(&osm, id));
        assert_eq!(other.tags(), w.tags());
        assert_eq!(other.base.version, w.base.version);
    }
    for (id, n) in osm.nodes().filter(|(_, n)| !n.base.is_deleted()) {
        let other = reloaded.node(node(&reloaded, id.id()));
        assert_eq!(other.pos, n.pos);
        assert_eq!(other.tags(), n.tags());
    }
    for (id, r) in osm.relations() {
        let other = reloaded.relation(reloaded.find_relation(id.id()).unwrap());
        assert_eq!(other.members, r.members);
    }
    let first = reloaded.node(node(&reloaded, 1));
    assert_eq!(first.base.time, 1297760812);
    assert_eq!(reloaded.user(first.base.user), Some("Dakon"));
    assert_counters(&reloaded);
}

#[test]
fn test_diff_restore_reproduces_upload() {
    let osm = edited();
    let diff = generate_diff(&osm, "test").unwrap();

    let mut restored = parse_osm_str(FIXTURE).unwrap();
    let result = restore_diff_str(&mut restored, &diff).unwrap();
    assert!(result.has_hidden);
    assert_eq!(result.ignored, 0);
    assert!(restored.way_is_hidden(way(&restored, 11)));
    assert_eq!(restored.modified(), osm.modified());
    assert_eq!(
        generate_osm_change(&restored, "42").unwrap(),
        generate_osm_change(&osm, "42").unwrap()
    );
    assert_counters(&restored);
}

#[test]
fn test_changeset_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("test.osm"), FIXTURE).unwrap();
    let osm = edited();
    assert!(save_diff(&osm, &dir.path().join("test.diff"), "test").unwrap());

    let mut etl = ChangesetEtl::new("test", "42", "split Main Street", None);
    etl.process(dir.path(), false).unwrap();

    let files = ProjectFiles::new(dir.path(), "test");
    let change = fs::read_to_string(files.osm_change()).unwrap();
    assert_eq!(change, generate_osm_change(&osm, "42").unwrap());
    let changeset = fs::read_to_string(files.changeset()).unwrap();
    assert!(changeset.contains("split Main Street"));
    assert!(!changeset.contains("source"));
}
