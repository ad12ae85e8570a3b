use super::{ElementSink, SinkWriter, cleaned_meta};
use crate::metadata::MetaAttribute;
use crate::osm::OsmElement;
use anyhow::Result;
use serde_json::{Map, Value, json};
use std::io::Write;

/// One JSON object per line, shaped like Overpass JSON elements.
pub struct JsonlSink {
    writer: SinkWriter,
    clean: Vec<MetaAttribute>,
}

impl JsonlSink {
    pub fn new(writer: SinkWriter, clean: Vec<MetaAttribute>) -> Self {
        Self { writer, clean }
    }
}

pub fn element_to_json(element: &OsmElement, clean: &[MetaAttribute]) -> Value {
    let mut object = Map::new();
    object.insert("type".to_string(), json!(element.kind().label()));
    object.insert("id".to_string(), json!(element.id()));

    match element {
        OsmElement::Node(node) => {
            object.insert("lat".to_string(), json!(node.location.lat()));
            object.insert("lon".to_string(), json!(node.location.lon()));
        }
        OsmElement::Way(way) => {
            object.insert("nodes".to_string(), json!(way.refs));
        }
        OsmElement::Relation(relation) => {
            let members: Vec<Value> = relation
                .members
                .iter()
                .map(|member| {
                    json!({
                        "type": member.kind.label(),
                        "ref": member.id,
                        "role": member.role,
                    })
                })
                .collect();
            object.insert("members".to_string(), Value::Array(members));
        }
    }

    if !element.tags().is_empty() {
        let tags: Map<String, Value> = element
            .tags()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        object.insert("tags".to_string(), Value::Object(tags));
    }

    if let Some(meta) = cleaned_meta(element, clean) {
        if let Some(version) = meta.version {
            object.insert("version".to_string(), json!(version));
        }
        if let Some(timestamp) = meta.timestamp {
            object.insert("timestamp".to_string(), json!(timestamp));
        }
        if let Some(changeset) = meta.changeset {
            object.insert("changeset".to_string(), json!(changeset));
        }
        if let Some(uid) = meta.uid {
            object.insert("uid".to_string(), json!(uid));
        }
        if let Some(user) = meta.user {
            object.insert("user".to_string(), json!(user));
        }
    }

    Value::Object(object)
}

impl ElementSink for JsonlSink {
    fn write(&mut self, element: &OsmElement) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &element_to_json(element, &self.clean))?;
        writeln!(self.writer)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
