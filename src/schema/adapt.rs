//! Table schema to protobuf descriptor compilation.
//!
//! A `TableSchema` becomes a `FileDescriptorSet` with one file per message:
//! the root message lives in `{scope}.proto` and every STRUCT column gets its
//! own message `{scope}_{column}` in `{scope}_{column}.proto`. Files are listed
//! dependencies first, so the root is always the last entry.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use prost_reflect::{DescriptorPool, MessageDescriptor};
use prost_types::field_descriptor_proto::{Label, Type as ProtoType};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FieldOptions, FileDescriptorProto, FileDescriptorSet,
    OneofDescriptorProto,
};
use thiserror::Error;

use crate::proto::table_field_schema::{Mode, Type};
use crate::proto::{TableFieldSchema, TableSchema};
use crate::schema::normalize::normalize_descriptor;

/// Timestamp precision above which values no longer fit in int64 microseconds.
const MICROSECOND_PRECISION: i64 = 6;

/// Errors that can occur while compiling or normalizing a schema.
#[derive(Debug, Error)]
pub enum AdaptError {
    #[error("unsupported type {type_name} for field {field}")]
    UnsupportedType { field: String, type_name: String },

    #[error("unsupported mode {mode} for field {field}")]
    UnsupportedMode { field: String, mode: String },

    #[error("failed to create descriptor pool: {0}")]
    DescriptorPool(String),

    #[error("message type not found: {0}")]
    MessageNotFound(String),

    #[error("recursive message type cannot be inlined: {0}")]
    RecursiveType(String),

    #[error("invalid table schema json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Protobuf syntax of the compiled files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Syntax {
    #[default]
    Proto2,
    Proto3,
}

impl Syntax {
    pub fn as_str(self) -> &'static str {
        match self {
            Syntax::Proto2 => "proto2",
            Syntax::Proto3 => "proto3",
        }
    }
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Syntax {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proto2" => Ok(Syntax::Proto2),
            "proto3" => Ok(Syntax::Proto3),
            other => Err(format!("unknown syntax: {other} (expected proto2 or proto3)")),
        }
    }
}

/// Compile a table schema into a descriptor set rooted at `scope`.
pub fn compile(
    schema: &TableSchema,
    scope: &str,
    syntax: Syntax,
) -> Result<FileDescriptorSet, AdaptError> {
    let mut compiler = Compiler {
        syntax,
        files: Vec::new(),
        registered: HashSet::new(),
    };
    compiler.compile_scope(&schema.fields, scope)?;
    Ok(FileDescriptorSet {
        file: compiler.files,
    })
}

/// Compile a table schema and resolve the root message descriptor.
pub fn compile_message(
    schema: &TableSchema,
    scope: &str,
    syntax: Syntax,
) -> Result<MessageDescriptor, AdaptError> {
    let fds = compile(schema, scope, syntax)?;
    let pool = DescriptorPool::from_file_descriptor_set(fds)
        .map_err(|e| AdaptError::DescriptorPool(e.to_string()))?;
    pool.get_message_by_name(scope)
        .ok_or_else(|| AdaptError::MessageNotFound(scope.to_string()))
}

/// Compile to a self-contained proto2 descriptor, ready to send as a writer schema.
pub fn to_proto2_descriptor(schema: &TableSchema, scope: &str) -> Result<DescriptorProto, AdaptError> {
    normalize_descriptor(&compile_message(schema, scope, Syntax::Proto2)?)
}

/// Compile with proto3 semantics, then normalize into a self-contained descriptor.
pub fn to_proto3_descriptor(schema: &TableSchema, scope: &str) -> Result<DescriptorProto, AdaptError> {
    normalize_descriptor(&compile_message(schema, scope, Syntax::Proto3)?)
}

struct Compiler {
    syntax: Syntax,
    files: Vec<FileDescriptorProto>,
    /// File names already emitted. The first registration of a name wins.
    registered: HashSet<String>,
}

impl Compiler {
    fn compile_scope(&mut self, fields: &[TableFieldSchema], scope: &str) -> Result<(), AdaptError> {
        let mut message = DescriptorProto {
            name: Some(scope.to_string()),
            ..Default::default()
        };
        let mut dependencies: Vec<String> = Vec::new();

        for (index, field) in fields.iter().enumerate() {
            let number = index as i32 + 1;
            let mut proto_field = self.compile_field(field, scope, number, &mut dependencies)?;

            if self.syntax == Syntax::Proto3
                && proto_field.label() == Label::Optional
                && proto_field.r#type() != ProtoType::Message
            {
                proto_field.proto3_optional = Some(true);
                proto_field.oneof_index = Some(message.oneof_decl.len() as i32);
                message.oneof_decl.push(OneofDescriptorProto {
                    name: Some(format!("_{}", field.name)),
                    options: None,
                });
            }
            message.field.push(proto_field);
        }

        let file_name = format!("{scope}.proto");
        if self.registered.insert(file_name.clone()) {
            self.files.push(FileDescriptorProto {
                name: Some(file_name),
                dependency: dependencies,
                message_type: vec![message],
                syntax: Some(self.syntax.as_str().to_string()),
                ..Default::default()
            });
        }
        Ok(())
    }

    fn compile_field(
        &mut self,
        field: &TableFieldSchema,
        scope: &str,
        number: i32,
        dependencies: &mut Vec<String>,
    ) -> Result<FieldDescriptorProto, AdaptError> {
        let wire_type = wire_type(field)?;
        let label = self.label(field)?;

        let mut proto_field = FieldDescriptorProto {
            name: Some(field.name.clone()),
            number: Some(number),
            ..Default::default()
        };
        proto_field.set_label(label);
        proto_field.set_type(wire_type);

        if wire_type == ProtoType::Message {
            let nested = format!("{scope}_{}", field.name);
            let nested_file = format!("{nested}.proto");
            if !self.registered.contains(&nested_file) {
                self.compile_scope(&field.fields, &nested)?;
            }
            if !dependencies.contains(&nested_file) {
                dependencies.push(nested_file);
            }
            proto_field.type_name = Some(format!(".{nested}"));
        }

        if self.syntax == Syntax::Proto2 && label == Label::Repeated && is_packable(wire_type) {
            proto_field.options = Some(FieldOptions {
                packed: Some(true),
                ..Default::default()
            });
        }

        Ok(proto_field)
    }

    fn label(&self, field: &TableFieldSchema) -> Result<Label, AdaptError> {
        match Mode::try_from(field.mode) {
            Ok(Mode::Repeated) => Ok(Label::Repeated),
            Ok(Mode::Required) if self.syntax == Syntax::Proto2 => Ok(Label::Required),
            Ok(Mode::Required | Mode::Nullable | Mode::Unspecified) => Ok(Label::Optional),
            Err(_) => Err(AdaptError::UnsupportedMode {
                field: field.name.clone(),
                mode: field.mode.to_string(),
            }),
        }
    }
}

/// The wire type a column is encoded with.
pub fn wire_type(field: &TableFieldSchema) -> Result<ProtoType, AdaptError> {
    let unsupported = |type_name: &str| AdaptError::UnsupportedType {
        field: field.name.clone(),
        type_name: type_name.to_string(),
    };

    let ty = Type::try_from(field.r#type).map_err(|_| unsupported(&field.r#type.to_string()))?;
    match ty {
        Type::Bool => Ok(ProtoType::Bool),
        Type::Bytes | Type::Numeric | Type::Bignumeric => Ok(ProtoType::Bytes),
        Type::Date => Ok(ProtoType::Int32),
        Type::Timestamp if is_picosecond(field) => Ok(ProtoType::String),
        Type::Datetime | Type::Time | Type::Timestamp => Ok(ProtoType::Int64),
        Type::Double => Ok(ProtoType::Double),
        Type::Geography | Type::String | Type::Json => Ok(ProtoType::String),
        Type::Int64 => Ok(ProtoType::Int64),
        Type::Struct => Ok(ProtoType::Message),
        Type::Unspecified | Type::Interval | Type::Range => Err(unsupported(ty.as_str_name())),
    }
}

fn is_picosecond(field: &TableFieldSchema) -> bool {
    field
        .timestamp_precision
        .is_some_and(|precision| precision > MICROSECOND_PRECISION)
}

fn is_packable(ty: ProtoType) -> bool {
    matches!(
        ty,
        ProtoType::Int32 | ProtoType::Int64 | ProtoType::Double | ProtoType::Bool
    )
}
