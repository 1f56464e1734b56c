//! Self-contained descriptors for the request writer schema.
//!
//! The write API decodes rows using only the single `DescriptorProto` sent with
//! the request, so every referenced message and enum has to be inlined as a
//! nested type of the root. Nested types are named after their fully-qualified
//! name with `.` replaced by `_`, and references are rewritten to point at the
//! inlined copies. proto3 presence markers are dropped since the result is
//! interpreted as proto2.

use prost_reflect::{
    DescriptorPool, EnumDescriptor, FieldDescriptor, Kind, MessageDescriptor, OneofDescriptor,
};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FieldOptions, FileDescriptorProto,
    FileDescriptorSet,
};

use crate::schema::adapt::AdaptError;

/// `OneofDescriptor::is_synthetic` is not available in prost-reflect 0.14.
trait OneofExt {
    fn is_synthetic(&self) -> bool;
}

impl OneofExt for OneofDescriptor {
    /// A synthetic oneof wraps exactly one proto3 `optional` field.
    fn is_synthetic(&self) -> bool {
        let mut fields = self.fields();
        matches!(
            (fields.next(), fields.next()),
            (Some(field), None) if field.field_descriptor_proto().proto3_optional()
        )
    }
}

/// Inline every dependency of `message` into one self-contained proto2 descriptor.
pub fn normalize_descriptor(message: &MessageDescriptor) -> Result<DescriptorProto, AdaptError> {
    let mut collected = Collected::default();
    let mut path = vec![message.full_name().to_string()];
    collect_dependencies(message, &mut path, &mut collected)?;

    let root_name = message.name().to_string();
    let mut root = rewrite_message(message, &root_name);
    root.nested_type = collected
        .messages
        .iter()
        .map(|nested| {
            let mut proto = rewrite_message(nested, &root_name);
            proto.name = Some(flat_name(nested.full_name()));
            proto
        })
        .collect();
    root.enum_type = collected
        .enums
        .iter()
        .map(|e| EnumDescriptorProto {
            name: Some(flat_name(e.full_name())),
            ..e.enum_descriptor_proto().clone()
        })
        .collect();

    Ok(root)
}

/// Build a message descriptor from a standalone, self-contained descriptor.
pub fn message_descriptor(proto: &DescriptorProto) -> Result<MessageDescriptor, AdaptError> {
    let name = proto.name().to_string();
    let file = FileDescriptorProto {
        name: Some(format!("{name}.proto")),
        message_type: vec![proto.clone()],
        syntax: Some("proto2".to_string()),
        ..Default::default()
    };
    let pool = DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: vec![file] })
        .map_err(|e| AdaptError::DescriptorPool(e.to_string()))?;
    pool.get_message_by_name(&name)
        .ok_or(AdaptError::MessageNotFound(name))
}

#[derive(Default)]
struct Collected {
    messages: Vec<MessageDescriptor>,
    enums: Vec<EnumDescriptor>,
}

impl Collected {
    fn has_message(&self, full_name: &str) -> bool {
        self.messages.iter().any(|m| m.full_name() == full_name)
    }

    fn has_enum(&self, full_name: &str) -> bool {
        self.enums.iter().any(|e| e.full_name() == full_name)
    }
}

fn collect_dependencies(
    message: &MessageDescriptor,
    path: &mut Vec<String>,
    collected: &mut Collected,
) -> Result<(), AdaptError> {
    for field in message.fields() {
        match field.kind() {
            Kind::Message(child) => {
                let name = child.full_name().to_string();
                if path.contains(&name) {
                    return Err(AdaptError::RecursiveType(name));
                }
                if collected.has_message(&name) {
                    continue;
                }
                collected.messages.push(child.clone());
                path.push(name);
                collect_dependencies(&child, path, collected)?;
                path.pop();
            }
            Kind::Enum(e) => {
                if !collected.has_enum(e.full_name()) {
                    collected.enums.push(e);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Copy a message with nested definitions stripped and its fields rewritten.
fn rewrite_message(message: &MessageDescriptor, root_name: &str) -> DescriptorProto {
    let mut proto = message.descriptor_proto().clone();
    proto.nested_type.clear();
    proto.enum_type.clear();

    // Real oneofs keep their relative order; synthetic ones disappear.
    let real_oneofs: Vec<_> = message.oneofs().filter(|o| !o.is_synthetic()).collect();
    proto.oneof_decl = real_oneofs
        .iter()
        .map(|o| o.oneof_descriptor_proto().clone())
        .collect();

    proto.field = message
        .fields()
        .map(|field| {
            let oneof_index = field
                .containing_oneof()
                .and_then(|o| real_oneofs.iter().position(|r| r.name() == o.name()))
                .map(|i| i as i32);
            rewrite_field(&field, root_name, oneof_index)
        })
        .collect();
    proto
}

fn rewrite_field(
    field: &FieldDescriptor,
    root_name: &str,
    oneof_index: Option<i32>,
) -> FieldDescriptorProto {
    let mut proto = field.field_descriptor_proto().clone();
    proto.proto3_optional = None;
    proto.oneof_index = oneof_index;

    match field.kind() {
        Kind::Message(child) => {
            proto.type_name = Some(format!(".{root_name}.{}", flat_name(child.full_name())));
        }
        Kind::Enum(e) => {
            proto.type_name = Some(format!(".{root_name}.{}", flat_name(e.full_name())));
        }
        _ => {}
    }

    // proto3 repeated scalars are packed implicitly; proto2 needs it spelled out.
    if field.is_packed() {
        let mut options = proto.options.take().unwrap_or_else(FieldOptions::default);
        options.packed = Some(true);
        proto.options = Some(options);
    }
    proto
}

fn flat_name(full_name: &str) -> String {
    full_name.replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::table_field_schema::{Mode, Type};
    use crate::proto::{TableFieldSchema, TableSchema};
    use crate::schema::adapt::{compile_message, Syntax};
    use prost_reflect::Cardinality;

    fn field(name: &str, ty: Type, mode: Mode) -> TableFieldSchema {
        TableFieldSchema {
            name: name.to_string(),
            r#type: ty as i32,
            mode: mode as i32,
            ..Default::default()
        }
    }

    fn nested_schema() -> TableSchema {
        TableSchema {
            fields: vec![
                field("id", Type::Int64, Mode::Required),
                TableFieldSchema {
                    fields: vec![
                        field("city", Type::String, Mode::Nullable),
                        field("zips", Type::Int64, Mode::Repeated),
                    ],
                    ..field("address", Type::Struct, Mode::Nullable)
                },
            ],
        }
    }

    #[test]
    fn test_inlines_nested_messages() {
        let message = compile_message(&nested_schema(), "root", Syntax::Proto2).unwrap();
        let proto = normalize_descriptor(&message).unwrap();

        assert_eq!(proto.name(), "root");
        assert_eq!(proto.nested_type.len(), 1);
        assert_eq!(proto.nested_type[0].name(), "root_address");
        assert_eq!(proto.field[1].type_name(), ".root.root_address");
    }

    #[test]
    fn test_normalized_descriptor_is_self_contained() {
        let message = compile_message(&nested_schema(), "root", Syntax::Proto2).unwrap();
        let proto = normalize_descriptor(&message).unwrap();
        let rebuilt = message_descriptor(&proto).unwrap();

        let id = rebuilt.get_field_by_name("id").unwrap();
        assert_eq!(id.cardinality(), Cardinality::Required);
        let address = rebuilt.get_field_by_name("address").unwrap();
        match address.kind() {
            Kind::Message(nested) => {
                assert_eq!(nested.full_name(), "root.root_address");
                let zips = nested.get_field_by_name("zips").unwrap();
                assert!(zips.is_packed());
            }
            other => panic!("expected message kind, got {other:?}"),
        }
    }

    #[test]
    fn test_strips_proto3_presence() {
        let message = compile_message(&nested_schema(), "root", Syntax::Proto3).unwrap();
        assert!(!message.descriptor_proto().oneof_decl.is_empty());

        let proto = normalize_descriptor(&message).unwrap();
        assert!(proto.oneof_decl.is_empty());
        assert!(proto.field.iter().all(|f| f.proto3_optional.is_none()));
        assert!(proto.field.iter().all(|f| f.oneof_index.is_none()));

        // Repeated scalars from proto3 stay packed once interpreted as proto2.
        let rebuilt = message_descriptor(&proto).unwrap();
        let address = rebuilt.get_field_by_name("address").unwrap();
        let Kind::Message(nested) = address.kind() else {
            panic!("expected message kind");
        };
        assert!(nested.get_field_by_name("zips").unwrap().is_packed());
    }

    #[test]
    fn test_recursive_type_is_rejected() {
        let node = DescriptorProto {
            name: Some("Node".to_string()),
            field: vec![FieldDescriptorProto {
                name: Some("child".to_string()),
                number: Some(1),
                label: Some(prost_types::field_descriptor_proto::Label::Optional as i32),
                r#type: Some(prost_types::field_descriptor_proto::Type::Message as i32),
                type_name: Some(".Node".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let message = message_descriptor(&node).unwrap();
        assert!(matches!(
            normalize_descriptor(&message),
            Err(AdaptError::RecursiveType(name)) if name == "Node"
        ));
    }
}
