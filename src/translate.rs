//! Translation of declaration trees into schema nodes.
//!
//! A [`NodeTranslator`] is created per top-level declaration and compiles it
//! synchronously, producing the node plus a sub-node for every group nested
//! in a struct. Compilation is a two-step affair: the constructor produces
//! *bootstrap* nodes, complete except for composite constant values, which
//! need other nodes' final schemas and are filled in by [`finish`].
//!
//! Semantic errors never abort translation. Each one produces a located
//! [`Message`] and a safe default (type becomes `Void`, value becomes the
//! type's zero, offsets become 0), so a broken schema still comes out
//! well-formed. Panics are reserved for internal invariant violations.
//!
//! [`finish`]: NodeTranslator::finish

use std::cell::RefCell;
use std::collections::BTreeMap;

use fxhash::FxHashMap;

use crate::ast::{
    AnnotationApplication, DeclKind, DeclName, Declaration, TypeExpression, ValueExpression,
};
use crate::schema::{
    self, AnnotationNode, AnnotationTarget, ConstNode, EnumNode, Enumerant, InterfaceNode, Method,
    NodeBody, Type,
};
use crate::source::{FileRange, Spanned};
use crate::translate::structs::StructTranslator;
use crate::translate::values::{default_value, UnfinishedValue};
use crate::{StringId, StringInterner};

pub mod layout;
pub mod reporting;

mod structs;
mod values;

pub use reporting::Message;

/// What a qualified name resolves to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResolvedName {
    /// A builtin type name.
    Builtin(BuiltinType),
    /// A user-defined node.
    Node { kind: NodeKind, id: u64 },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BuiltinType {
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
    List,
    AnyPointer,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Const,
    Annotation,
    Enum,
    Struct,
    Interface,
}

/// Cross-file name resolution, supplied by the caller.
///
/// `resolve` reports its own lookup failures; the translator treats `None`
/// as already-diagnosed and substitutes defaults silently. Wrong-kind uses
/// (a struct name where a constant is needed) are the translator's to
/// report.
pub trait Resolver {
    fn resolve(&self, name: &DeclName<'_>) -> Option<ResolvedName>;

    /// The schema for `id` as known during the current translation pass.
    /// Sufficient for layout and primitive defaults, but composite constant
    /// values may still be placeholders.
    fn resolve_bootstrap_schema(&self, id: u64) -> Option<&schema::Node>;

    /// The schema for `id` after every translator has finished.
    fn resolve_final_schema(&self, id: u64) -> Option<&schema::Node>;
}

/// Derive the node id for a group from its parent's id and the group's
/// position in the parent's child-initialization order.
pub fn generate_group_id(parent_id: u64, group_index: u32) -> u64 {
    // A splitmix64-style finalizer. The high bit is forced set: ids of
    // nodes that are not files live in the upper half of the id space.
    let mut x = parent_id ^ u64::from(group_index).wrapping_mul(0x9e37_79b9_7f4a_7c15);
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^= x >> 31;
    x | 1 << 63
}

/// The translated node together with the group nodes it spawned.
#[derive(Debug, Copy, Clone)]
pub struct NodeSet<'a> {
    pub root: &'a schema::Node,
    pub groups: &'a [schema::Node],
}

/// Handle to a node owned by the translator.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum NodeRef {
    Root,
    Group(u32),
}

/// Handle to an annotation list within the translator's nodes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum AnnotationListRef {
    Node(NodeRef),
    Enumerant(u32),
    Method(u32),
}

/// Handle to a value within the translator's nodes. Slots stay valid for
/// the translator's whole lifetime, which lets composite values be
/// compiled long after the node structure is in place.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ValueSlot {
    /// The root node's constant value.
    ConstValue,
    /// A field's default value.
    FieldDefault { node: NodeRef, field: u32 },
    /// An applied annotation's value.
    Annotation { list: AnnotationListRef, index: u32 },
}

pub struct NodeTranslator<'arena, 'env> {
    resolver: &'env dyn Resolver,
    interner: &'env RefCell<StringInterner>,
    compile_annotations: bool,
    wip_node: schema::Node,
    /// Nodes generated for groups nested in a struct declaration.
    groups: Vec<schema::Node>,
    /// Composite values awaiting final schemas; drained by [`finish`].
    ///
    /// [`finish`]: NodeTranslator::finish
    unfinished_values: Vec<UnfinishedValue<'arena>>,
    /// Diagnostic messages encountered during translation.
    messages: Vec<Message>,
}

impl<'arena, 'env> NodeTranslator<'arena, 'env> {
    /// Translate `decl` into `wip_node`, which arrives with its id, display
    /// name, prefix length, and scope id already populated. Runs the whole
    /// bootstrap translation synchronously.
    pub fn new(
        resolver: &'env dyn Resolver,
        interner: &'env RefCell<StringInterner>,
        decl: &'arena Declaration<'arena>,
        wip_node: schema::Node,
        compile_annotations: bool,
    ) -> NodeTranslator<'arena, 'env> {
        let mut translator = NodeTranslator {
            resolver,
            interner,
            compile_annotations,
            wip_node,
            groups: Vec::new(),
            unfinished_values: Vec::new(),
            messages: Vec::new(),
        };
        translator.compile_node(decl);
        translator
    }

    /// The root node and group nodes, usable as bootstrap schemas.
    pub fn bootstrap_node_set(&self) -> NodeSet<'_> {
        NodeSet {
            root: &self.wip_node,
            groups: &self.groups,
        }
    }

    /// Compile the deferred composite values against final schemas and
    /// return the fully-populated node set.
    pub fn finish(&mut self) -> NodeSet<'_> {
        // Compiling a value may enqueue further unfinished values (a
        // constant's default may itself be composite), so iterate by index
        // rather than holding an iterator.
        let mut index = 0;
        while index < self.unfinished_values.len() {
            let UnfinishedValue { source, ty, slot } = self.unfinished_values[index].clone();
            self.compile_value_into(source, &ty, slot, false);
            index += 1;
        }

        self.bootstrap_node_set()
    }

    /// Drain accumulated diagnostics.
    pub fn handle_messages(&mut self, on_message: &mut dyn FnMut(Message)) {
        for message in self.messages.drain(..) {
            on_message(message);
        }
    }

    pub(crate) fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    fn compile_node(&mut self, decl: &'arena Declaration<'arena>) {
        DuplicateNameDetector::new().check(&mut self.messages, decl.nested, &decl.kind);

        let target = match decl.kind {
            DeclKind::File => AnnotationTarget::File,
            DeclKind::Const { ty, value } => {
                self.compile_const(ty, value);
                AnnotationTarget::Const
            }
            DeclKind::Annotation { ty, targets } => {
                let (ty, _) = self.compile_type(&ty);
                self.wip_node.body = NodeBody::Annotation(AnnotationNode { ty, targets });
                AnnotationTarget::Annotation
            }
            DeclKind::Enum => {
                self.compile_enum(decl.nested);
                AnnotationTarget::Enum
            }
            DeclKind::Struct => {
                StructTranslator::new(self).translate(decl.nested);
                AnnotationTarget::Struct
            }
            DeclKind::Interface => {
                self.compile_interface(decl.nested);
                AnnotationTarget::Interface
            }
            _ => panic!("this declaration is not a node"),
        };

        self.compile_annotation_applications(
            decl.annotations,
            target,
            AnnotationListRef::Node(NodeRef::Root),
        );
    }

    fn compile_const(&mut self, ty: TypeExpression<'arena>, value: ValueExpression<'arena>) {
        let (ty, ok) = self.compile_type(&ty);
        self.wip_node.body = NodeBody::Const(ConstNode {
            ty: ty.clone(),
            value: default_value(&ty),
        });
        if ok {
            self.compile_bootstrap_value(value, ty, ValueSlot::ConstValue);
        }
    }

    fn compile_enum(&mut self, members: &'arena [Declaration<'arena>]) {
        // ordinal -> (code order, declaration), ordered and duplicate-keyed
        let mut enumerants: BTreeMap<u32, Vec<(u32, &'arena Declaration<'arena>)>> = BTreeMap::new();

        let mut code_order = 0;
        for member in members {
            if let DeclKind::Enumerant = member.kind {
                if let (Some(_), Some(ordinal)) = (member.name, member.ordinal) {
                    enumerants.entry(*ordinal).or_default().push((code_order, member));
                }
                code_order += 1;
            }
        }

        self.wip_node.body = NodeBody::Enum(EnumNode::default());
        let mut dup_detector = DuplicateOrdinalDetector::new();

        for (_, entries) in enumerants {
            for (code_order, decl) in entries {
                dup_detector.check(decl.ordinal.unwrap(), &mut self.messages);

                let index = match &mut self.wip_node.body {
                    NodeBody::Enum(enum_node) => {
                        enum_node.enumerants.push(Enumerant {
                            name: *decl.name.unwrap(),
                            code_order: code_order as u16,
                            annotations: Vec::new(),
                        });
                        enum_node.enumerants.len() as u32 - 1
                    }
                    _ => unreachable!("enum body was just initialized"),
                };
                self.compile_annotation_applications(
                    decl.annotations,
                    AnnotationTarget::Enumerant,
                    AnnotationListRef::Enumerant(index),
                );
            }
        }
    }

    fn compile_interface(&mut self, members: &'arena [Declaration<'arena>]) {
        let mut methods: BTreeMap<u32, Vec<(u32, &'arena Declaration<'arena>)>> = BTreeMap::new();

        let mut code_order = 0;
        for member in members {
            if let DeclKind::Method = member.kind {
                if let (Some(_), Some(ordinal)) = (member.name, member.ordinal) {
                    methods.entry(*ordinal).or_default().push((code_order, member));
                }
                code_order += 1;
            }
        }

        self.wip_node.body = NodeBody::Interface(InterfaceNode::default());
        let mut dup_detector = DuplicateOrdinalDetector::new();

        for (_, entries) in methods {
            for (code_order, decl) in entries {
                dup_detector.check(decl.ordinal.unwrap(), &mut self.messages);

                let index = match &mut self.wip_node.body {
                    NodeBody::Interface(interface_node) => {
                        interface_node.methods.push(Method {
                            name: *decl.name.unwrap(),
                            code_order: code_order as u16,
                            annotations: Vec::new(),
                        });
                        interface_node.methods.len() as u32 - 1
                    }
                    _ => unreachable!("interface body was just initialized"),
                };
                self.compile_annotation_applications(
                    decl.annotations,
                    AnnotationTarget::Method,
                    AnnotationListRef::Method(index),
                );
            }
        }
    }

    /// Resolve a type expression. On failure the result is `(Void, false)`;
    /// callers still compile a defaulted value so the field occupies a
    /// layout slot.
    pub(crate) fn compile_type(&mut self, source: &TypeExpression<'arena>) -> (Type, bool) {
        let resolved = match self.resolver.resolve(&source.name) {
            Some(resolved) => resolved,
            // Lookup reported its own error.
            None => return (Type::Void, false),
        };

        let ty = match resolved {
            ResolvedName::Node { kind, id } => match kind {
                NodeKind::Enum => Type::Enum(id),
                NodeKind::Struct => Type::Struct(id),
                NodeKind::Interface => Type::Interface(id),
                _ => {
                    self.push_message(Message::NotAType {
                        range: source.range,
                        name: self.display_name(&source.name),
                    });
                    return (Type::Void, false);
                }
            },
            ResolvedName::Builtin(BuiltinType::List) => {
                if source.params.len() != 1 {
                    self.push_message(Message::ListParameterCount { range: source.range });
                    return (Type::Void, false);
                }

                let (element, ok) = self.compile_type(&source.params[0]);
                if !ok {
                    return (Type::List(Box::new(element)), false);
                }
                if element == Type::AnyPointer {
                    // Seeing this later can mess things up, so coerce the
                    // element type to Void.
                    self.push_message(Message::ListOfAnyPointer { range: source.range });
                    return (Type::List(Box::new(Type::Void)), false);
                }
                return (Type::List(Box::new(element)), true);
            }
            ResolvedName::Builtin(builtin) => match builtin {
                BuiltinType::Void => Type::Void,
                BuiltinType::Bool => Type::Bool,
                BuiltinType::Int8 => Type::Int8,
                BuiltinType::Int16 => Type::Int16,
                BuiltinType::Int32 => Type::Int32,
                BuiltinType::Int64 => Type::Int64,
                BuiltinType::UInt8 => Type::UInt8,
                BuiltinType::UInt16 => Type::UInt16,
                BuiltinType::UInt32 => Type::UInt32,
                BuiltinType::UInt64 => Type::UInt64,
                BuiltinType::Float32 => Type::Float32,
                BuiltinType::Float64 => Type::Float64,
                BuiltinType::Text => Type::Text,
                BuiltinType::Data => Type::Data,
                BuiltinType::AnyPointer => Type::AnyPointer,
                BuiltinType::List => unreachable!("handled above"),
            },
        };

        if !source.params.is_empty() {
            self.push_message(Message::NoParametersExpected {
                range: source.range,
                name: self.display_name(&source.name),
            });
            return (ty, false);
        }

        (ty, true)
    }

    /// Compile annotation applications into the given list, typing each
    /// value against the annotation's declared type. With
    /// `compile_annotations` off, the list is left null.
    fn compile_annotation_applications(
        &mut self,
        annotations: &'arena [AnnotationApplication<'arena>],
        target: AnnotationTarget,
        list: AnnotationListRef,
    ) {
        if annotations.is_empty() || !self.compile_annotations {
            return;
        }

        for annotation in annotations {
            // The value defaults to void in case we fail to produce
            // something better below.
            let index = {
                let list = self.annotation_list_mut(list);
                list.push(schema::Annotation {
                    id: 0,
                    value: schema::Value::Void,
                });
                list.len() as u32 - 1
            };

            let resolved = match self.resolver.resolve(&annotation.name) {
                Some(resolved) => resolved,
                // Lookup reported its own error.
                None => continue,
            };
            let id = match resolved {
                ResolvedName::Node {
                    kind: NodeKind::Annotation,
                    id,
                } => id,
                _ => {
                    self.push_message(Message::NotAnAnnotation {
                        range: annotation.name.range,
                        name: self.display_name(&annotation.name),
                    });
                    continue;
                }
            };
            self.annotation_list_mut(list)[index as usize].id = id;

            let resolver = self.resolver;
            let annotation_node = match resolver.resolve_bootstrap_schema(id) {
                Some(node) => match &node.body {
                    NodeBody::Annotation(annotation_node) => annotation_node,
                    // The annotation's schema is broken for reasons
                    // already reported.
                    _ => continue,
                },
                None => continue,
            };
            let ty = annotation_node.ty.clone();

            if !annotation_node.targets.allows(target) {
                self.push_message(Message::AnnotationTargetNotAllowed {
                    range: annotation.name.range,
                    name: self.display_name(&annotation.name),
                    target,
                });
            }

            match annotation.value {
                Some(value) => {
                    self.compile_bootstrap_value(value, ty, ValueSlot::Annotation { list, index });
                }
                // No value, i.e. void.
                None => {
                    if ty != Type::Void {
                        self.push_message(Message::AnnotationRequiresValue {
                            range: annotation.name.range,
                            name: self.display_name(&annotation.name),
                        });
                        *self.slot_mut(ValueSlot::Annotation { list, index }) = default_value(&ty);
                    }
                }
            }
        }
    }

    pub(crate) fn display_name(&self, name: &DeclName<'_>) -> String {
        name.display(&self.interner.borrow())
    }

    pub(crate) fn interner(&self) -> &'env RefCell<StringInterner> {
        self.interner
    }

    pub(crate) fn node(&self, node: NodeRef) -> &schema::Node {
        match node {
            NodeRef::Root => &self.wip_node,
            NodeRef::Group(index) => &self.groups[index as usize],
        }
    }

    pub(crate) fn node_mut(&mut self, node: NodeRef) -> &mut schema::Node {
        match node {
            NodeRef::Root => &mut self.wip_node,
            NodeRef::Group(index) => &mut self.groups[index as usize],
        }
    }

    /// Add a group node and return its handle.
    pub(crate) fn add_group_node(&mut self, node: schema::Node) -> NodeRef {
        self.groups.push(node);
        NodeRef::Group(self.groups.len() as u32 - 1)
    }

    pub(crate) fn group_node_count(&self) -> u32 {
        self.groups.len() as u32
    }

    pub(crate) fn struct_body_mut(&mut self, node: NodeRef) -> &mut schema::StructNode {
        match &mut self.node_mut(node).body {
            NodeBody::Struct(struct_node) => struct_node,
            _ => panic!("node is not a struct"),
        }
    }

    pub(crate) fn field_mut(&mut self, node: NodeRef, field: u32) -> &mut schema::Field {
        &mut self.struct_body_mut(node).fields[field as usize]
    }

    pub(crate) fn annotation_list_mut(
        &mut self,
        list: AnnotationListRef,
    ) -> &mut Vec<schema::Annotation> {
        match list {
            AnnotationListRef::Node(node) => &mut self.node_mut(node).annotations,
            AnnotationListRef::Enumerant(index) => match &mut self.wip_node.body {
                NodeBody::Enum(enum_node) => {
                    &mut enum_node.enumerants[index as usize].annotations
                }
                _ => panic!("node is not an enum"),
            },
            AnnotationListRef::Method(index) => match &mut self.wip_node.body {
                NodeBody::Interface(interface_node) => {
                    &mut interface_node.methods[index as usize].annotations
                }
                _ => panic!("node is not an interface"),
            },
        }
    }
}

/// Checks that names within one declaration scope are unique and that each
/// nested declaration kind is legal under its parent kind. Unnamed unions
/// forward their member names into the enclosing scope.
struct DuplicateNameDetector {
    names: FxHashMap<Option<StringId>, FileRange>,
}

impl DuplicateNameDetector {
    fn new() -> DuplicateNameDetector {
        DuplicateNameDetector {
            names: FxHashMap::default(),
        }
    }

    fn check(
        &mut self,
        messages: &mut Vec<Message>,
        decls: &[Declaration<'_>],
        parent: &DeclKind<'_>,
    ) {
        for decl in decls {
            let key = decl.name.map(|name| *name);
            let range = decl.name.map(|name| name.range()).unwrap_or(decl.range);
            match self.names.get(&key) {
                Some(&previous) => {
                    if key.is_none() {
                        messages.push(Message::UnnamedUnionAlreadyDefined { range });
                        messages.push(Message::UnnamedUnionPreviouslyDefined { range: previous });
                    } else {
                        let name = key.unwrap();
                        messages.push(Message::NameAlreadyDefined { range, name });
                        messages.push(Message::NamePreviouslyDefined {
                            range: previous,
                            name,
                        });
                    }
                }
                None => {
                    self.names.insert(key, range);
                }
            }

            match decl.kind {
                DeclKind::Using
                | DeclKind::Const { .. }
                | DeclKind::Enum
                | DeclKind::Struct
                | DeclKind::Interface
                | DeclKind::Annotation { .. } => {
                    if !matches!(parent, DeclKind::File | DeclKind::Struct | DeclKind::Interface) {
                        messages.push(Message::DeclarationNotAllowedHere { range: decl.range });
                    }
                }
                DeclKind::Enumerant => {
                    if !matches!(parent, DeclKind::Enum) {
                        messages.push(Message::EnumerantOutsideEnum { range: decl.range });
                    }
                }
                DeclKind::Method => {
                    if !matches!(parent, DeclKind::Interface) {
                        messages.push(Message::MethodOutsideInterface { range: decl.range });
                    }
                }
                DeclKind::Field { .. } | DeclKind::Union | DeclKind::Group => {
                    if !matches!(parent, DeclKind::Struct | DeclKind::Union | DeclKind::Group) {
                        messages.push(Message::MemberOutsideStruct { range: decl.range });
                    }

                    // Struct members may themselves have nested decls,
                    // which no one else is going to check.
                    if decl.name.is_none() {
                        // Unnamed union: members live in this same scope.
                        self.check(messages, decl.nested, &decl.kind);
                    } else {
                        DuplicateNameDetector::new().check(messages, decl.nested, &decl.kind);
                    }
                }
                DeclKind::File => {
                    messages.push(Message::DeclarationNotAllowedHere { range: decl.range });
                }
            }
        }
    }
}

/// Checks that ordinals form a dense sequence starting at zero.
pub(crate) struct DuplicateOrdinalDetector {
    expected_ordinal: u32,
    last_ordinal: Option<Spanned<u32>>,
}

impl DuplicateOrdinalDetector {
    pub(crate) fn new() -> DuplicateOrdinalDetector {
        DuplicateOrdinalDetector {
            expected_ordinal: 0,
            last_ordinal: None,
        }
    }

    pub(crate) fn check(&mut self, ordinal: Spanned<u32>, messages: &mut Vec<Message>) {
        if *ordinal < self.expected_ordinal {
            messages.push(Message::DuplicateOrdinal {
                range: ordinal.range(),
            });
            // Report the original occurrence too, but only once.
            if let Some(last) = self.last_ordinal.take() {
                messages.push(Message::OrdinalOriginallyUsed {
                    range: last.range(),
                    ordinal: *last,
                });
            }
        } else if *ordinal > self.expected_ordinal {
            messages.push(Message::SkippedOrdinal {
                range: ordinal.range(),
                expected: self.expected_ordinal,
            });
            self.expected_ordinal = *ordinal + 1;
        } else {
            self.expected_ordinal += 1;
            self.last_ordinal = Some(ordinal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_ids_are_deterministic_and_high() {
        let id = generate_group_id(0xdead_beef, 0);
        assert_eq!(id, generate_group_id(0xdead_beef, 0));
        assert_ne!(id, generate_group_id(0xdead_beef, 1));
        assert_ne!(id, generate_group_id(0xdead_bef0, 0));
        assert!(id & 1 << 63 != 0);
    }
}
