//! The emitted schema model.
//!
//! Schema nodes are what the translator produces: owned, self-contained
//! descriptions of one declaration each, linked to other nodes by 64-bit
//! ids. They outlive the translator that built them and are consumed by
//! code generators and by the compiler itself when bootstrapping.

use crate::StringId;

/// A translated schema node.
#[derive(Debug, Clone)]
pub struct Node {
    /// Stable 64-bit id. Group nodes get theirs from
    /// [`generate_group_id`](crate::translate::generate_group_id).
    pub id: u64,
    /// Fully qualified name, e.g. `addressbook.strata:Person.employment`.
    pub display_name: String,
    /// Length of the prefix of `display_name` that names the scope; the
    /// remainder is the node's local name.
    pub display_name_prefix_length: u32,
    /// Id of the lexically enclosing node.
    pub scope_id: u64,
    pub annotations: Vec<Annotation>,
    pub body: NodeBody,
}

impl Node {
    /// The local part of the display name.
    pub fn local_name(&self) -> &str {
        &self.display_name[self.display_name_prefix_length as usize..]
    }
}

#[derive(Debug, Clone)]
pub enum NodeBody {
    File,
    Struct(StructNode),
    Enum(EnumNode),
    Interface(InterfaceNode),
    Const(ConstNode),
    Annotation(AnnotationNode),
}

#[derive(Debug, Clone, Default)]
pub struct StructNode {
    /// Size of the data section in 64-bit words.
    pub data_word_count: u16,
    /// Size of the pointer section in pointers.
    pub pointer_count: u16,
    pub preferred_list_encoding: ElementSize,
    /// True for group nodes, which share their containing struct's storage.
    pub is_group: bool,
    /// Number of fields in this scope's union, or zero if there is none.
    pub discriminant_count: u16,
    /// Offset of the discriminant, in 16-bit units from the start of the
    /// data section. Meaningful only when `discriminant_count != 0`.
    pub discriminant_offset: u32,
    /// Fields in the order their schemas were initialized (ordinal order).
    pub fields: Vec<Field>,
}

/// The `discriminant_value` of a field that is not a union member.
pub const NO_DISCRIMINANT: u16 = 0xffff;

#[derive(Debug, Clone)]
pub struct Field {
    pub name: StringId,
    /// Position of this field in its scope's declaration order.
    pub code_order: u16,
    /// This field's value of the enclosing union's discriminant, or
    /// [`NO_DISCRIMINANT`] if the field is not a union member.
    pub discriminant_value: u16,
    /// The explicit ordinal, if the declaration carried one. Groups don't.
    pub ordinal: Option<u32>,
    pub kind: FieldKind,
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    Regular {
        ty: Type,
        /// For data fields, the offset in units of the field's size from
        /// the start of the data section. For pointer fields, the index
        /// into the pointer section.
        offset: u32,
        default_value: Value,
    },
    Group {
        /// Id of the group's own struct node.
        type_id: u64,
    },
}

#[derive(Debug, Clone, Default)]
pub struct EnumNode {
    /// Enumerants in ordinal order; an enumerant's value is its index here.
    pub enumerants: Vec<Enumerant>,
}

#[derive(Debug, Clone)]
pub struct Enumerant {
    pub name: StringId,
    pub code_order: u16,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Default)]
pub struct InterfaceNode {
    /// Methods in ordinal order; a method's id is its index here.
    pub methods: Vec<Method>,
}

#[derive(Debug, Clone)]
pub struct Method {
    pub name: StringId,
    pub code_order: u16,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone)]
pub struct ConstNode {
    pub ty: Type,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct AnnotationNode {
    pub ty: Type,
    pub targets: AnnotationTargets,
}

/// An annotation application attached to a node.
#[derive(Debug, Clone)]
pub struct Annotation {
    /// Id of the annotation declaration's node.
    pub id: u64,
    pub value: Value,
}

/// A schema type.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Void,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Text,
    Data,
    List(Box<Type>),
    Enum(u64),
    Struct(u64),
    Interface(u64),
    AnyPointer,
}

impl Type {
    /// Whether values of this type live in the pointer section.
    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            Type::Text
                | Type::Data
                | Type::List(_)
                | Type::Struct(_)
                | Type::Interface(_)
                | Type::AnyPointer
        )
    }
}

/// A schema value, one case per type kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Void,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Text(String),
    Data(Vec<u8>),
    List(Vec<Value>),
    /// An enumerant, identified by its position in the enum's list.
    Enum(u16),
    /// Field assignments of a struct literal, in source order.
    Struct(Vec<(StringId, Value)>),
    Interface,
    /// An untyped pointer value; `None` is the null pointer.
    AnyPointer(Option<Box<Value>>),
}

/// The densest wire encoding usable when a struct is a list element.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ElementSize {
    Empty,
    Bit,
    Byte,
    TwoBytes,
    FourBytes,
    EightBytes,
    Pointer,
    InlineComposite,
}

impl Default for ElementSize {
    fn default() -> ElementSize {
        ElementSize::InlineComposite
    }
}

/// The declaration kinds an annotation may be applied to.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct AnnotationTargets {
    pub file: bool,
    pub const_: bool,
    pub enum_: bool,
    pub enumerant: bool,
    pub struct_: bool,
    pub field: bool,
    pub union: bool,
    pub group: bool,
    pub interface: bool,
    pub method: bool,
    pub annotation: bool,
}

impl AnnotationTargets {
    /// Targets nothing. The parser emits this for a declaration that lists
    /// no targets.
    pub fn none() -> AnnotationTargets {
        AnnotationTargets::default()
    }

    /// Targets everything (`targets *`).
    pub fn all() -> AnnotationTargets {
        AnnotationTargets {
            file: true,
            const_: true,
            enum_: true,
            enumerant: true,
            struct_: true,
            field: true,
            union: true,
            group: true,
            interface: true,
            method: true,
            annotation: true,
        }
    }

    pub fn allows(&self, target: AnnotationTarget) -> bool {
        match target {
            AnnotationTarget::File => self.file,
            AnnotationTarget::Const => self.const_,
            AnnotationTarget::Enum => self.enum_,
            AnnotationTarget::Enumerant => self.enumerant,
            AnnotationTarget::Struct => self.struct_,
            AnnotationTarget::Field => self.field,
            AnnotationTarget::Union => self.union,
            AnnotationTarget::Group => self.group,
            AnnotationTarget::Interface => self.interface,
            AnnotationTarget::Method => self.method,
            AnnotationTarget::Annotation => self.annotation,
        }
    }
}

/// One position an annotation can be applied at.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AnnotationTarget {
    File,
    Const,
    Enum,
    Enumerant,
    Struct,
    Field,
    Union,
    Group,
    Interface,
    Method,
    Annotation,
}

impl AnnotationTarget {
    /// The name used in diagnostics.
    pub fn description(&self) -> &'static str {
        match self {
            AnnotationTarget::File => "files",
            AnnotationTarget::Const => "constants",
            AnnotationTarget::Enum => "enums",
            AnnotationTarget::Enumerant => "enumerants",
            AnnotationTarget::Struct => "structs",
            AnnotationTarget::Field => "fields",
            AnnotationTarget::Union => "unions",
            AnnotationTarget::Group => "groups",
            AnnotationTarget::Interface => "interfaces",
            AnnotationTarget::Method => "methods",
            AnnotationTarget::Annotation => "annotations",
        }
    }
}
