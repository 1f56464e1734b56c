//! Flattened field layout of a compiled descriptor set.
//!
//! This is a plain, serializable view of each message: field name to numeric
//! id, wire type and repetition rule. Used for dynamic type construction and
//! by the CLI's `--layout` output.

use std::collections::BTreeMap;

use prost_types::field_descriptor_proto::{Label, Type as ProtoType};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorSet};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldRule {
    Optional,
    Required,
    Repeated,
}

impl From<Label> for FieldRule {
    fn from(label: Label) -> Self {
        match label {
            Label::Optional => FieldRule::Optional,
            Label::Required => FieldRule::Required,
            Label::Repeated => FieldRule::Repeated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldLayout {
    pub id: i32,
    /// Scalar type name (`int64`, `string`, ...) or the referenced message name.
    #[serde(rename = "type")]
    pub type_name: String,
    pub rule: FieldRule,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageLayout {
    pub fields: BTreeMap<String, FieldLayout>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Namespace {
    pub messages: BTreeMap<String, MessageLayout>,
}

impl Namespace {
    pub fn message(&self, name: &str) -> Option<&MessageLayout> {
        self.messages.get(name)
    }
}

/// Walk every message in the set once, nested definitions included.
pub fn namespace(fds: &FileDescriptorSet) -> Namespace {
    let mut ns = Namespace::default();
    for file in &fds.file {
        let prefix = file.package().to_string();
        for message in &file.message_type {
            add_message(&mut ns, &prefix, message);
        }
    }
    ns
}

fn add_message(ns: &mut Namespace, prefix: &str, message: &DescriptorProto) {
    let name = if prefix.is_empty() {
        message.name().to_string()
    } else {
        format!("{prefix}.{}", message.name())
    };

    let fields = message
        .field
        .iter()
        .map(|f| (f.name().to_string(), field_layout(f)))
        .collect();
    for nested in &message.nested_type {
        add_message(ns, &name, nested);
    }
    ns.messages.insert(name, MessageLayout { fields });
}

fn field_layout(field: &FieldDescriptorProto) -> FieldLayout {
    let type_name = match field.r#type() {
        ProtoType::Message | ProtoType::Enum | ProtoType::Group => {
            field.type_name().trim_start_matches('.').to_string()
        }
        scalar => scalar
            .as_str_name()
            .trim_start_matches("TYPE_")
            .to_ascii_lowercase(),
    };
    FieldLayout {
        id: field.number(),
        type_name,
        rule: field.label().into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::table_field_schema::{Mode, Type};
    use crate::proto::{TableFieldSchema, TableSchema};
    use crate::schema::adapt::{compile, Syntax};

    fn field(name: &str, ty: Type, mode: Mode) -> TableFieldSchema {
        TableFieldSchema {
            name: name.to_string(),
            r#type: ty as i32,
            mode: mode as i32,
            ..Default::default()
        }
    }

    fn schema() -> TableSchema {
        let mut pico = field("ts_pico", Type::Timestamp, Mode::Nullable);
        pico.timestamp_precision = Some(12);
        TableSchema {
            fields: vec![
                field("id", Type::Int64, Mode::Required),
                field("tags", Type::String, Mode::Repeated),
                TableFieldSchema {
                    fields: vec![field("city", Type::String, Mode::Nullable)],
                    ..field("address", Type::Struct, Mode::Nullable)
                },
                pico,
                field("ts", Type::Timestamp, Mode::Nullable),
            ],
        }
    }

    #[test]
    fn test_struct_round_trip_reflects_modes() {
        let ns = namespace(&compile(&schema(), "root", Syntax::Proto2).unwrap());

        let root = ns.message("root").unwrap();
        assert_eq!(
            root.fields["id"],
            FieldLayout {
                id: 1,
                type_name: "int64".to_string(),
                rule: FieldRule::Required,
            }
        );
        assert_eq!(root.fields["tags"].rule, FieldRule::Repeated);
        assert_eq!(root.fields["address"].type_name, "root_address");
        assert_eq!(root.fields["address"].rule, FieldRule::Optional);

        let address = ns.message("root_address").unwrap();
        assert_eq!(address.fields["city"].id, 1);
        assert_eq!(address.fields["city"].rule, FieldRule::Optional);
    }

    #[test]
    fn test_timestamp_wire_types() {
        let ns = namespace(&compile(&schema(), "root", Syntax::Proto2).unwrap());
        let root = ns.message("root").unwrap();
        assert_eq!(root.fields["ts_pico"].type_name, "string");
        assert_eq!(root.fields["ts"].type_name, "int64");
    }

    #[test]
    fn test_proto3_required_becomes_optional() {
        let ns = namespace(&compile(&schema(), "root", Syntax::Proto3).unwrap());
        assert_eq!(ns.message("root").unwrap().fields["id"].rule, FieldRule::Optional);
    }

    #[test]
    fn test_layout_serializes() {
        let ns = namespace(&compile(&schema(), "root", Syntax::Proto2).unwrap());
        let json = serde_json::to_value(&ns).unwrap();
        assert_eq!(json["messages"]["root"]["fields"]["id"]["type"], "int64");
        assert_eq!(json["messages"]["root"]["fields"]["tags"]["rule"], "repeated");
    }
}
