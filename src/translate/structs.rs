//! Translation of struct declarations.
//!
//! Struct translation runs in three passes over a scratch tree of
//! [`MemberInfo`] nodes:
//!
//! 1. A pre-order traversal builds the tree, binds every member to a layout
//!    scope, records declaration order, and collects an ordinal → member
//!    multimap. Group and named-union members get fresh schema nodes here.
//! 2. The ordinal pass walks members in ascending ordinal order, compiling
//!    each field's type and default and asking the layout for its offset.
//!    Visiting in ordinal order is what keeps binary compatibility: a field
//!    added later can never displace one that was already placed.
//! 3. A finalization pass copies discriminant offsets into group bodies and
//!    derives group node ids.
//!
//! The member tree is parent-linked and cross-referenced, so members live
//! in a vector owned by the translator and refer to each other by
//! [`MemberId`]. Everything here is scratch state for one struct.

use std::collections::BTreeMap;

use crate::ast::{DeclKind, Declaration, TypeExpression, ValueExpression};
use crate::schema::{
    AnnotationTarget, ElementSize, Field, FieldKind, Node, NodeBody, StructNode, Type, Value,
};
use crate::translate::layout::{ScopeId, StructLayout, UnionId};
use crate::translate::values::default_value;
use crate::translate::{
    generate_group_id, AnnotationListRef, DuplicateOrdinalDetector, Message, NodeRef,
    NodeTranslator, ValueSlot,
};
use crate::StringId;

/// Handle to a member in the [`StructTranslator`]'s scratch tree.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct MemberId(u32);

const ROOT: MemberId = MemberId(0);

/// The layout binding of one member.
#[derive(Debug, Copy, Clone)]
enum MemberScope {
    /// Not yet known (groups and the root, until an unnamed union shows up).
    None,
    /// A field: the scope its data and pointers are allocated in.
    Field(ScopeId),
    /// A union, or a scope that contains an unnamed union: used to assign
    /// the discriminant offset and finally copy it into the schema.
    Union(UnionId),
}

struct MemberInfo<'arena> {
    parent: Option<MemberId>,
    /// Declaration order within the parent scope.
    code_order: u32,
    /// Position in the parent's child-initialization order; set when the
    /// field schema is created. Group ids are derived from this.
    index: u32,
    child_count: u32,
    child_initialized_count: u32,
    /// How many children of this scope's union have had their discriminant
    /// value decided.
    union_discriminant_count: u32,
    is_in_union: bool,
    decl: Option<&'arena Declaration<'arena>>,
    /// Where this member's field schema lives, once initialized.
    field: Option<(NodeRef, u32)>,
    /// The node this member owns: the root, or a group node.
    node: Option<NodeRef>,
    scope: MemberScope,
}

pub(crate) struct StructTranslator<'nt, 'arena, 'env> {
    translator: &'nt mut NodeTranslator<'arena, 'env>,
    layout: StructLayout,
    members: Vec<MemberInfo<'arena>>,
    /// Every member with an explicit ordinal, keyed by it. The declaration
    /// stored alongside is the one that carried the ordinal, which for an
    /// unnamed union is not the member's own declaration.
    members_by_ordinal: BTreeMap<u32, Vec<(MemberId, &'arena Declaration<'arena>)>>,
    /// All members, in traversal (pre-)order. Parents precede children,
    /// which finalization relies on for group id derivation.
    all_members: Vec<MemberId>,
}

impl<'nt, 'arena, 'env> StructTranslator<'nt, 'arena, 'env> {
    pub(crate) fn new(
        translator: &'nt mut NodeTranslator<'arena, 'env>,
    ) -> StructTranslator<'nt, 'arena, 'env> {
        StructTranslator {
            translator,
            layout: StructLayout::new(),
            members: Vec::new(),
            members_by_ordinal: BTreeMap::new(),
            all_members: Vec::new(),
        }
    }

    pub(crate) fn translate(mut self, members: &'arena [Declaration<'arena>]) {
        self.translator.node_mut(NodeRef::Root).body = NodeBody::Struct(StructNode::default());

        self.members.push(MemberInfo {
            parent: None,
            code_order: 0,
            index: 0,
            child_count: 0,
            child_initialized_count: 0,
            union_discriminant_count: 0,
            is_in_union: false,
            decl: None,
            field: None,
            node: Some(NodeRef::Root),
            scope: MemberScope::None,
        });

        let mut code_order = 0;
        self.traverse_top_or_group(members, ROOT, ScopeId::Top, &mut code_order);
        self.ordinal_pass();
        self.finish_members();
        self.set_sizes();
    }

    // ------------------------------------------------------------------
    // Pass 1: traversal

    fn add_member(&mut self, member: MemberInfo<'arena>) -> MemberId {
        self.members.push(member);
        let id = MemberId(self.members.len() as u32 - 1);
        self.all_members.push(id);
        id
    }

    fn traverse_top_or_group(
        &mut self,
        members: &'arena [Declaration<'arena>],
        parent: MemberId,
        layout_scope: ScopeId,
        code_order: &mut u32,
    ) {
        for member in members {
            match member.kind {
                DeclKind::Field { .. } => {
                    self.members[parent.0 as usize].child_count += 1;
                    let id = self.add_member(MemberInfo {
                        parent: Some(parent),
                        code_order: next(code_order),
                        index: 0,
                        child_count: 0,
                        child_initialized_count: 0,
                        union_discriminant_count: 0,
                        is_in_union: false,
                        decl: Some(member),
                        field: None,
                        node: None,
                        scope: MemberScope::Field(layout_scope),
                    });
                    if let Some(ordinal) = member.ordinal {
                        self.members_by_ordinal.entry(*ordinal).or_default().push((id, member));
                    }
                }

                DeclKind::Union => {
                    let union_layout = self.layout.add_union(layout_scope);

                    let id = match member.name {
                        // An unnamed union becomes part of the enclosing
                        // scope: no group node, and its members continue
                        // the enclosing declaration-order counter.
                        None => parent,
                        Some(name) => {
                            self.members[parent.0 as usize].child_count += 1;
                            let node = self.new_group_node(parent, *name);
                            self.add_member(MemberInfo {
                                parent: Some(parent),
                                code_order: next(code_order),
                                index: 0,
                                child_count: 0,
                                child_initialized_count: 0,
                                union_discriminant_count: 0,
                                is_in_union: false,
                                decl: Some(member),
                                field: None,
                                node: Some(node),
                                scope: MemberScope::None,
                            })
                        }
                    };
                    self.members[id.0 as usize].scope = MemberScope::Union(union_layout);

                    if member.name.is_none() {
                        self.traverse_union(member, member.nested, id, union_layout, code_order);
                    } else {
                        let mut sub_code_order = 0;
                        self.traverse_union(
                            member,
                            member.nested,
                            id,
                            union_layout,
                            &mut sub_code_order,
                        );
                    }
                    if let Some(ordinal) = member.ordinal {
                        self.members_by_ordinal.entry(*ordinal).or_default().push((id, member));
                    }
                }

                DeclKind::Group => {
                    let name = match member.name {
                        Some(name) => *name,
                        None => continue,
                    };
                    self.members[parent.0 as usize].child_count += 1;
                    let node = self.new_group_node(parent, name);
                    let id = self.add_member(MemberInfo {
                        parent: Some(parent),
                        code_order: next(code_order),
                        index: 0,
                        child_count: 0,
                        child_initialized_count: 0,
                        union_discriminant_count: 0,
                        is_in_union: false,
                        decl: Some(member),
                        field: None,
                        node: Some(node),
                        scope: MemberScope::None,
                    });

                    // Group members are laid out as if they were members
                    // of the parent, so the parent's layout scope is
                    // passed straight through. Groups have no ordinal.
                    self.traverse_group(member, member.nested, id, layout_scope);
                }

                // Nested types are translated as their own nodes; ignore.
                _ => {}
            }
        }
    }

    fn traverse_union(
        &mut self,
        union_decl: &'arena Declaration<'arena>,
        members: &'arena [Declaration<'arena>],
        parent: MemberId,
        union_layout: UnionId,
        code_order: &mut u32,
    ) {
        if members.len() < 2 {
            self.translator.push_message(Message::UnionMissingVariants {
                range: union_decl.range,
            });
        }

        for member in members {
            match member.kind {
                DeclKind::Field { .. } => {
                    self.members[parent.0 as usize].child_count += 1;
                    // For layout purposes the field is its own one-member
                    // group: every union variant is a group.
                    let singleton_group = self.layout.add_group(union_layout);
                    let id = self.add_member(MemberInfo {
                        parent: Some(parent),
                        code_order: next(code_order),
                        index: 0,
                        child_count: 0,
                        child_initialized_count: 0,
                        union_discriminant_count: 0,
                        is_in_union: true,
                        decl: Some(member),
                        field: None,
                        node: None,
                        scope: MemberScope::Field(ScopeId::Group(singleton_group)),
                    });
                    if let Some(ordinal) = member.ordinal {
                        self.members_by_ordinal.entry(*ordinal).or_default().push((id, member));
                    }
                }

                DeclKind::Union => {
                    self.translator
                        .push_message(Message::NestedUnion { range: member.range });
                }

                DeclKind::Group => {
                    let name = match member.name {
                        Some(name) => *name,
                        None => continue,
                    };
                    self.members[parent.0 as usize].child_count += 1;
                    let group_layout = self.layout.add_group(union_layout);
                    let node = self.new_group_node(parent, name);
                    let id = self.add_member(MemberInfo {
                        parent: Some(parent),
                        code_order: next(code_order),
                        index: 0,
                        child_count: 0,
                        child_initialized_count: 0,
                        union_discriminant_count: 0,
                        is_in_union: true,
                        decl: Some(member),
                        field: None,
                        node: Some(node),
                        scope: MemberScope::None,
                    });
                    self.traverse_group(member, member.nested, id, ScopeId::Group(group_layout));
                }

                _ => {}
            }
        }
    }

    fn traverse_group(
        &mut self,
        group_decl: &'arena Declaration<'arena>,
        members: &'arena [Declaration<'arena>],
        parent: MemberId,
        layout_scope: ScopeId,
    ) {
        if members.is_empty() {
            self.translator.push_message(Message::GroupMissingMembers {
                range: group_decl.range,
            });
        }

        let mut code_order = 0;
        self.traverse_top_or_group(members, parent, layout_scope, &mut code_order);
    }

    /// Create the schema node for a group, named after its position under
    /// the parent's display name. The id is derived during finalization.
    fn new_group_node(&mut self, parent: MemberId, name: StringId) -> NodeRef {
        let parent_node = self.members[parent.0 as usize]
            .node
            .expect("group parents own a node");
        let (display_name, prefix_length, scope_id) = {
            let parent_node = self.translator.node(parent_node);
            let interner = self.translator.interner().borrow();
            let local = interner.resolve(name).unwrap_or("<unknown>");
            let display_name = format!("{}.{}", parent_node.display_name, local);
            let prefix_length = (display_name.len() - local.len()) as u32;
            (display_name, prefix_length, parent_node.id)
        };

        self.translator.add_group_node(Node {
            id: 0, // derived in finish_member
            display_name,
            display_name_prefix_length: prefix_length,
            scope_id,
            annotations: Vec::new(),
            body: NodeBody::Struct(StructNode {
                is_group: true,
                ..StructNode::default()
            }),
        })
    }

    // ------------------------------------------------------------------
    // Pass 2: ordinal order

    fn ordinal_pass(&mut self) {
        let entries: Vec<(u32, MemberId, &'arena Declaration<'arena>)> = self
            .members_by_ordinal
            .iter()
            .flat_map(|(&ordinal, members)| {
                members.iter().map(move |&(id, decl)| (ordinal, id, decl))
            })
            .collect();

        let mut dup_detector = DuplicateOrdinalDetector::new();
        for (ordinal, member, decl) in entries {
            if let Some(located) = decl.ordinal {
                dup_detector.check(located, &mut self.translator.messages);
            }

            if self.members[member.0 as usize].parent.is_some() {
                let (node, field) = self.member_field(member);
                self.translator.field_mut(node, field).ordinal = Some(ordinal);
            }

            match decl.kind {
                DeclKind::Field { ty, default } => self.compile_field(member, ty, default),

                DeclKind::Union => {
                    // A union's explicit ordinal allocates the
                    // discriminant. If it is already allocated, more than
                    // one member ordinal precedes the union's: only one
                    // field may be retroactively unionized.
                    let union_layout = match self.members[member.0 as usize].scope {
                        MemberScope::Union(union_layout) => union_layout,
                        _ => unreachable!("union members carry a union scope"),
                    };
                    if !self.layout.add_discriminant(union_layout) {
                        self.translator.push_message(Message::RetroactiveUnion {
                            range: decl.ordinal.map(|o| o.range()).unwrap_or(decl.range),
                        });
                    }
                }

                DeclKind::Group => unreachable!("groups don't have ordinals"),

                _ => unreachable!("unexpected member kind in ordinal map"),
            }
        }
    }

    fn compile_field(
        &mut self,
        member: MemberId,
        ty: TypeExpression<'arena>,
        default: Option<ValueExpression<'arena>>,
    ) {
        let (node, field) = self.member_field(member);

        let (compiled_ty, ok) = self.translator.compile_type(&ty);
        if let FieldKind::Regular { ty: field_ty, .. } =
            &mut self.translator.field_mut(node, field).kind
        {
            *field_ty = compiled_ty.clone();
        }

        let slot = ValueSlot::FieldDefault { node, field };
        match default {
            Some(value) if ok => {
                self.translator
                    .compile_bootstrap_value(value, compiled_ty.clone(), slot);
            }
            _ => *self.translator.slot_mut(slot) = default_value(&compiled_ty),
        }

        let scope = match self.members[member.0 as usize].scope {
            MemberScope::Field(scope) => scope,
            _ => unreachable!("fields carry a layout scope"),
        };
        let offset = match field_size(&compiled_ty) {
            FieldSize::Pointer => self.layout.add_pointer(scope),
            FieldSize::Data(lg_size) => self.layout.add_data(scope, lg_size),
            FieldSize::Void => {
                // Even a void field marks the scope as occupied, so an
                // all-void group still becomes a union variant.
                self.layout.add_void(scope);
                0
            }
        };
        if let FieldKind::Regular {
            offset: field_offset,
            ..
        } = &mut self.translator.field_mut(node, field).kind
        {
            *field_offset = offset;
        }
    }

    /// The member's field schema, created on first use. Creation assigns
    /// the member's initialization index, its discriminant value if it is
    /// a union variant, and recursively materializes the parent's own
    /// field schema when this is the parent's first initialized child.
    fn member_field(&mut self, member: MemberId) -> (NodeRef, u32) {
        if let Some(slot) = self.members[member.0 as usize].field {
            return slot;
        }

        let parent = self.members[member.0 as usize]
            .parent
            .expect("the root has no field schema");
        self.members[member.0 as usize].index =
            self.members[parent.0 as usize].child_initialized_count;

        debug_assert!(
            self.members[parent.0 as usize].child_initialized_count
                < self.members[parent.0 as usize].child_count
        );
        if self.members[parent.0 as usize].child_initialized_count == 0
            && self.members[parent.0 as usize].parent.is_some()
        {
            // Make sure the parent's own field exists once its first
            // child is added.
            self.member_field(parent);
        }
        self.members[parent.0 as usize].child_initialized_count += 1;

        let decl = self.members[member.0 as usize]
            .decl
            .expect("non-root members have declarations");
        let discriminant_value = if self.members[member.0 as usize].is_in_union {
            let value = self.members[parent.0 as usize].union_discriminant_count;
            self.members[parent.0 as usize].union_discriminant_count += 1;
            value as u16
        } else {
            crate::schema::NO_DISCRIMINANT
        };

        let node = self.members[parent.0 as usize]
            .node
            .expect("field parents own a node");
        let body = self.translator.struct_body_mut(node);
        let field = body.fields.len() as u32;
        body.fields.push(Field {
            name: *decl.name.expect("members with field schemas are named"),
            code_order: self.members[member.0 as usize].code_order as u16,
            discriminant_value,
            ordinal: None,
            kind: FieldKind::Regular {
                ty: Type::Void,
                offset: 0,
                default_value: Value::Void,
            },
        });

        self.members[member.0 as usize].field = Some((node, field));
        (node, field)
    }

    // ------------------------------------------------------------------
    // Pass 3: finalization

    fn finish_members(&mut self) {
        self.finish_member(ROOT);

        for position in 0..self.all_members.len() {
            let member = self.all_members[position];
            let decl = self.members[member.0 as usize].decl.unwrap();
            let target = match decl.kind {
                DeclKind::Field { .. } => AnnotationTarget::Field,
                DeclKind::Union => {
                    self.finish_member(member);
                    AnnotationTarget::Union
                }
                DeclKind::Group => {
                    self.finish_member(member);
                    AnnotationTarget::Group
                }
                _ => unreachable!("unexpected member kind"),
            };

            self.translator.compile_annotation_applications(
                decl.annotations,
                target,
                AnnotationListRef::Node(NodeRef::Root),
            );
        }
    }

    fn finish_member(&mut self, member: MemberId) {
        if let MemberScope::Union(union_layout) = self.members[member.0 as usize].scope {
            // Allocate the discriminant if that hasn't happened already.
            self.layout.add_discriminant(union_layout);

            let node = self.members[member.0 as usize]
                .node
                .expect("union scopes own a node");
            let discriminant_count = self.members[member.0 as usize].union_discriminant_count;
            let discriminant_offset = self
                .layout
                .discriminant_offset(union_layout)
                .expect("discriminant was just ensured");
            let body = self.translator.struct_body_mut(node);
            body.discriminant_count = discriminant_count as u16;
            body.discriminant_offset = discriminant_offset;
        }

        if let Some(parent) = self.members[member.0 as usize].parent {
            let parent_node = self.members[parent.0 as usize]
                .node
                .expect("group parents own a node");
            let parent_id = self.translator.node(parent_node).id;
            let group_id = generate_group_id(parent_id, self.members[member.0 as usize].index);

            let node = self.members[member.0 as usize]
                .node
                .expect("finished members own a node");
            {
                let node = self.translator.node_mut(node);
                node.id = group_id;
                // Parents finish before children, so the parent's own id
                // is final by now.
                node.scope_id = parent_id;
            }

            let (field_node, field) = self.member_field(member);
            self.translator.field_mut(field_node, field).kind =
                FieldKind::Group { type_id: group_id };
        }
    }

    fn set_sizes(&mut self) {
        let top = self.layout.top();
        let data_word_count = top.data_word_count as u16;
        let pointer_count = top.pointer_count as u16;

        let preferred_list_encoding = if top.pointer_count == 0 {
            match top.data_word_count {
                0 => ElementSize::Empty,
                1 => match top.holes.first_word_used() {
                    0 => ElementSize::Bit,
                    1..=3 => ElementSize::Byte,
                    4 => ElementSize::TwoBytes,
                    5 => ElementSize::FourBytes,
                    6 => ElementSize::EightBytes,
                    _ => unreachable!("first_word_used is at most the word size"),
                },
                _ => ElementSize::InlineComposite,
            }
        } else if top.pointer_count == 1 && top.data_word_count == 0 {
            ElementSize::Pointer
        } else {
            ElementSize::InlineComposite
        };

        let body = self.translator.struct_body_mut(NodeRef::Root);
        body.data_word_count = data_word_count;
        body.pointer_count = pointer_count;
        body.preferred_list_encoding = preferred_list_encoding;

        // Group nodes share their containing struct's sizes and encoding.
        for group in 0..self.translator.group_node_count() {
            let body = self.translator.struct_body_mut(NodeRef::Group(group));
            body.data_word_count = data_word_count;
            body.pointer_count = pointer_count;
            body.preferred_list_encoding = preferred_list_encoding;
        }
    }
}

fn next(code_order: &mut u32) -> u32 {
    let result = *code_order;
    *code_order += 1;
    result
}

/// How much space a field of the given type occupies.
enum FieldSize {
    Void,
    /// A data field of `2^n` bits.
    Data(u32),
    Pointer,
}

fn field_size(ty: &Type) -> FieldSize {
    match ty {
        Type::Void => FieldSize::Void,
        Type::Bool => FieldSize::Data(0),
        Type::Int8 | Type::UInt8 => FieldSize::Data(3),
        Type::Int16 | Type::UInt16 | Type::Enum(_) => FieldSize::Data(4),
        Type::Int32 | Type::UInt32 | Type::Float32 => FieldSize::Data(5),
        Type::Int64 | Type::UInt64 | Type::Float64 => FieldSize::Data(6),
        Type::Text
        | Type::Data
        | Type::List(_)
        | Type::Struct(_)
        | Type::Interface(_)
        | Type::AnyPointer => FieldSize::Pointer,
    }
}
