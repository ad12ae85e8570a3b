use super::{ElementSink, SinkWriter, cleaned_meta, format_coordinate};
use crate::metadata::{MetaAttribute, Metadata};
use crate::osm::{OsmElement, Tags};
use anyhow::Result;
use geo_types::Rect;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use std::io::Write;

const GENERATOR: &str = concat!("carve/", env!("CARGO_PKG_VERSION"));

/// Writes OSM XML (API 0.6 flavour).
pub struct XmlSink {
    writer: Writer<SinkWriter>,
    clean: Vec<MetaAttribute>,
    finished: bool,
}

impl XmlSink {
    pub fn new(
        inner: SinkWriter,
        bounds: Option<Rect<f64>>,
        clean: Vec<MetaAttribute>,
    ) -> Result<Self> {
        let mut writer = Writer::new_with_indent(inner, b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        let mut osm = BytesStart::new("osm");
        osm.push_attribute(("version", "0.6"));
        osm.push_attribute(("generator", GENERATOR));
        writer.write_event(Event::Start(osm))?;

        if let Some(rect) = bounds {
            let mut element = BytesStart::new("bounds");
            element.push_attribute(("minlat", format_coordinate(rect.min().y).as_str()));
            element.push_attribute(("minlon", format_coordinate(rect.min().x).as_str()));
            element.push_attribute(("maxlat", format_coordinate(rect.max().y).as_str()));
            element.push_attribute(("maxlon", format_coordinate(rect.max().x).as_str()));
            writer.write_event(Event::Empty(element))?;
        }

        Ok(Self {
            writer,
            clean,
            finished: false,
        })
    }

    fn write_tags(&mut self, tags: &Tags) -> Result<()> {
        for (key, value) in tags.iter() {
            let mut tag = BytesStart::new("tag");
            tag.push_attribute(("k", key));
            tag.push_attribute(("v", value));
            self.writer.write_event(Event::Empty(tag))?;
        }
        Ok(())
    }
}

fn push_meta(start: &mut BytesStart<'_>, meta: &Metadata) {
    if let Some(version) = meta.version {
        start.push_attribute(("version", version.to_string().as_str()));
    }
    if let Some(timestamp) = &meta.timestamp {
        start.push_attribute(("timestamp", timestamp.as_str()));
    }
    if let Some(uid) = meta.uid {
        start.push_attribute(("uid", uid.to_string().as_str()));
    }
    if let Some(user) = &meta.user {
        start.push_attribute(("user", user.as_str()));
    }
    if let Some(changeset) = meta.changeset {
        start.push_attribute(("changeset", changeset.to_string().as_str()));
    }
    if !meta.visible {
        start.push_attribute(("visible", "false"));
    }
}

impl ElementSink for XmlSink {
    fn write(&mut self, element: &OsmElement) -> Result<()> {
        let name = element.kind().label();
        let mut start = BytesStart::new(name);
        start.push_attribute(("id", element.id().to_string().as_str()));
        if let Some(meta) = cleaned_meta(element, &self.clean) {
            push_meta(&mut start, &meta);
        }

        match element {
            OsmElement::Node(node) => {
                start.push_attribute(("lat", format_coordinate(node.location.lat()).as_str()));
                start.push_attribute(("lon", format_coordinate(node.location.lon()).as_str()));
                if node.tags.is_empty() {
                    self.writer.write_event(Event::Empty(start))?;
                    return Ok(());
                }
                self.writer.write_event(Event::Start(start))?;
            }
            OsmElement::Way(way) => {
                self.writer.write_event(Event::Start(start))?;
                for node_ref in &way.refs {
                    let mut nd = BytesStart::new("nd");
                    nd.push_attribute(("ref", node_ref.to_string().as_str()));
                    self.writer.write_event(Event::Empty(nd))?;
                }
            }
            OsmElement::Relation(relation) => {
                self.writer.write_event(Event::Start(start))?;
                for member in &relation.members {
                    let mut tag = BytesStart::new("member");
                    tag.push_attribute(("type", member.kind.label()));
                    tag.push_attribute(("ref", member.id.to_string().as_str()));
                    tag.push_attribute(("role", member.role.as_str()));
                    self.writer.write_event(Event::Empty(tag))?;
                }
            }
        }

        self.write_tags(element.tags())?;
        self.writer.write_event(Event::End(BytesEnd::new(name)))?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.writer.write_event(Event::End(BytesEnd::new("osm")))?;
        let inner = self.writer.get_mut();
        writeln!(inner)?;
        inner.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osm::{ElementKind, Location, Member, Node, Relation, Way};
    use geo_types::coord;
    use std::io::BufWriter;

    fn sink_for(path: &std::path::Path, bounds: Option<Rect<f64>>) -> XmlSink {
        let file = std::fs::File::create(path).unwrap();
        let inner: SinkWriter = BufWriter::new(Box::new(file));
        XmlSink::new(inner, bounds, Vec::new()).unwrap()
    }

    #[test]
    fn writes_nodes_ways_and_relations() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let bounds = Rect::new(coord! { x: 13.0, y: 52.0 }, coord! { x: 14.0, y: 53.0 });
        let mut sink = sink_for(file.path(), Some(bounds));

        sink.write(&OsmElement::Node(Node {
            id: 1,
            location: Location::new(13.5, 52.5),
            tags: Tags::new(),
            meta: Some(Metadata {
                version: Some(2),
                user: Some("a&b".to_string()),
                visible: true,
                ..Metadata::default()
            }),
        }))
        .unwrap();
        sink.write(&OsmElement::Way(Way {
            id: 10,
            refs: vec![1, 2],
            tags: [("highway", "residential")].into_iter().collect(),
            meta: None,
        }))
        .unwrap();
        sink.write(&OsmElement::Relation(Relation {
            id: 100,
            members: vec![Member {
                kind: ElementKind::Way,
                id: 10,
                role: "outer".to_string(),
            }],
            tags: [("type", "multipolygon")].into_iter().collect(),
            meta: None,
        }))
        .unwrap();
        sink.finish().unwrap();

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(content.contains(r#"<bounds minlat="52" minlon="13" maxlat="53" maxlon="14"/>"#));
        assert!(content.contains(r#"<node id="1" version="2" user="a&amp;b" lat="52.5" lon="13.5"/>"#));
        assert!(content.contains(r#"<nd ref="2"/>"#));
        assert!(content.contains(r#"<tag k="highway" v="residential"/>"#));
        assert!(content.contains(r#"<member type="way" ref="10" role="outer"/>"#));
        assert!(content.trim_end().ends_with("</osm>"));
    }

    #[test]
    fn finish_is_idempotent() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut sink = sink_for(file.path(), None);
        sink.finish().unwrap();
        sink.finish().unwrap();
        let content = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(content.matches("</osm>").count(), 1);
    }
}
