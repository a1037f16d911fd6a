//! Property-based tests for the struct layout invariants.
//!
//! These generate random struct shapes (fields, named unions, groups, with
//! shuffled ordinals) and verify the layout invariants hold for all of
//! them: regions only overlap across union variants, packing is tight, and
//! the emitted schema preserves both orderings.

mod support;

use std::cell::RefCell;
use std::collections::HashMap;

use proptest::prelude::*;
use scoped_arena::Scope;

use strata::ast::Declaration;
use strata::schema::{
    ElementSize, FieldKind, Node, NodeBody, StructNode, Type, NO_DISCRIMINANT,
};
use strata::StringInterner;

use support::{translate, AstBuilder, TestResolver, Translation};

// ============================================================================
// Generation model
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum GenType {
    Void,
    Bool,
    U8,
    U16,
    U32,
    U64,
    Text,
}

impl GenType {
    fn name(self) -> &'static str {
        match self {
            GenType::Void => "Void",
            GenType::Bool => "Bool",
            GenType::U8 => "UInt8",
            GenType::U16 => "UInt16",
            GenType::U32 => "UInt32",
            GenType::U64 => "UInt64",
            GenType::Text => "Text",
        }
    }
}

#[derive(Debug, Clone)]
enum GenMember {
    Field(GenType),
    Union(Vec<GenVariant>),
}

#[derive(Debug, Clone)]
enum GenVariant {
    Field(GenType),
    Group(Vec<GenType>),
}

/// Number of ordinal-bearing declarations in the generated struct.
fn ordinal_slots(members: &[GenMember]) -> usize {
    members
        .iter()
        .map(|member| match member {
            GenMember::Field(_) => 1,
            GenMember::Union(variants) => variants
                .iter()
                .map(|variant| match variant {
                    GenVariant::Field(_) => 1,
                    GenVariant::Group(fields) => fields.len(),
                })
                .sum(),
        })
        .sum()
}

fn arb_type() -> impl Strategy<Value = GenType> {
    prop_oneof![
        Just(GenType::Void),
        Just(GenType::Bool),
        Just(GenType::U8),
        Just(GenType::U16),
        Just(GenType::U32),
        Just(GenType::U64),
        Just(GenType::Text),
    ]
}

fn arb_variant() -> impl Strategy<Value = GenVariant> {
    prop_oneof![
        2 => arb_type().prop_map(GenVariant::Field),
        1 => prop::collection::vec(arb_type(), 1..4).prop_map(GenVariant::Group),
    ]
}

fn arb_member() -> impl Strategy<Value = GenMember> {
    prop_oneof![
        3 => arb_type().prop_map(GenMember::Field),
        1 => prop::collection::vec(arb_variant(), 2..5).prop_map(GenMember::Union),
    ]
}

/// A struct shape plus a shuffled assignment of ordinals to its fields.
fn arb_struct() -> impl Strategy<Value = (Vec<GenMember>, Vec<u32>)> {
    prop::collection::vec(arb_member(), 1..7).prop_flat_map(|members| {
        let ordinals: Vec<u32> = (0..ordinal_slots(&members) as u32).collect();
        (Just(members), Just(ordinals).prop_shuffle())
    })
}

fn build_struct<'arena>(
    builder: &AstBuilder<'arena>,
    members: &[GenMember],
    ordinals: &[u32],
) -> Declaration<'arena> {
    let mut next_ordinal = ordinals.iter().copied();
    let mut next_name = 0u32;
    let mut name = |prefix: &str| {
        next_name += 1;
        format!("{}{}", prefix, next_name)
    };

    let mut decls = Vec::new();
    for member in members {
        match member {
            GenMember::Field(ty) => decls.push(builder.field(
                &name("f"),
                next_ordinal.next().unwrap(),
                builder.ty(ty.name()),
            )),
            GenMember::Union(variants) => {
                let mut variant_decls = Vec::new();
                for variant in variants {
                    match variant {
                        GenVariant::Field(ty) => variant_decls.push(builder.field(
                            &name("f"),
                            next_ordinal.next().unwrap(),
                            builder.ty(ty.name()),
                        )),
                        GenVariant::Group(fields) => {
                            let field_decls: Vec<_> = fields
                                .iter()
                                .map(|ty| {
                                    builder.field(
                                        &name("f"),
                                        next_ordinal.next().unwrap(),
                                        builder.ty(ty.name()),
                                    )
                                })
                                .collect();
                            variant_decls.push(builder.group(&name("g"), &field_decls));
                        }
                    }
                }
                decls.push(builder.union(&name("u"), None, &variant_decls));
            }
        }
    }
    builder.struct_decl("Subject", &decls)
}

// ============================================================================
// Region extraction
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Data,
    Pointer,
}

/// An allocated region, tagged with the union variants it lives under: one
/// `(union node id, discriminant value)` pair per enclosing union.
#[derive(Debug, Clone)]
struct Region {
    kind: Kind,
    start: u64,
    end: u64,
    variants: Vec<(u64, u16)>,
}

/// Two regions may share storage only when they lie in distinct variants
/// of some common union.
fn may_overlap(a: &Region, b: &Region) -> bool {
    a.variants.iter().any(|&(union_a, value_a)| {
        b.variants
            .iter()
            .any(|&(union_b, value_b)| union_a == union_b && value_a != value_b)
    })
}

fn overlaps(a: &Region, b: &Region) -> bool {
    a.kind == b.kind && a.start < b.end && b.start < a.end
}

fn struct_body(node: &Node) -> &StructNode {
    match &node.body {
        NodeBody::Struct(body) => body,
        body => panic!("expected a struct node, got {:?}", body),
    }
}

fn collect_regions(
    node: &Node,
    nodes_by_id: &HashMap<u64, &Node>,
    context: &[(u64, u16)],
    out: &mut Vec<Region>,
) {
    let body = struct_body(node);

    if body.discriminant_count > 0 {
        let start = u64::from(body.discriminant_offset) * 16;
        out.push(Region {
            kind: Kind::Data,
            start,
            end: start + 16,
            variants: context.to_vec(),
        });
    }

    for field in &body.fields {
        let mut variants = context.to_vec();
        if field.discriminant_value != NO_DISCRIMINANT {
            variants.push((node.id, field.discriminant_value));
        }

        match &field.kind {
            FieldKind::Regular { ty, offset, .. } => {
                let bits = match ty {
                    Type::Void => continue,
                    Type::Bool => 1,
                    Type::Int8 | Type::UInt8 => 8,
                    Type::Int16 | Type::UInt16 | Type::Enum(_) => 16,
                    Type::Int32 | Type::UInt32 | Type::Float32 => 32,
                    Type::Int64 | Type::UInt64 | Type::Float64 => 64,
                    _ => {
                        out.push(Region {
                            kind: Kind::Pointer,
                            start: u64::from(*offset),
                            end: u64::from(*offset) + 1,
                            variants,
                        });
                        continue;
                    }
                };
                let start = u64::from(*offset) * bits;
                out.push(Region {
                    kind: Kind::Data,
                    start,
                    end: start + bits,
                    variants,
                });
            }
            FieldKind::Group { type_id } => {
                let group = nodes_by_id
                    .get(type_id)
                    .unwrap_or_else(|| panic!("group node {} missing", type_id));
                collect_regions(group, nodes_by_id, &variants, out);
            }
        }
    }
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(192))]

    #[test]
    fn layout_invariants((members, ordinals) in arb_struct()) {
        let scope = Scope::new();
        let interner = RefCell::new(StringInterner::new());
        let builder = AstBuilder::new(&scope, &interner);
        let resolver = TestResolver::with_builtins(&builder);

        let decl = build_struct(&builder, &members, &ordinals);
        let Translation { root, groups, messages } = translate(&resolver, &interner, &decl);
        prop_assert!(messages.is_empty(), "unexpected messages: {:?}", messages);

        let mut nodes_by_id: HashMap<u64, &Node> = HashMap::new();
        nodes_by_id.insert(root.id, &root);
        for group in &groups {
            nodes_by_id.insert(group.id, group);
        }

        let mut regions = Vec::new();
        collect_regions(&root, &nodes_by_id, &[], &mut regions);

        // Regions never overlap unless they belong to distinct variants of
        // a common union; data fields stay aligned to their size.
        for (index, a) in regions.iter().enumerate() {
            if a.kind == Kind::Data {
                prop_assert_eq!(a.start % (a.end - a.start), 0, "misaligned: {:?}", a);
            }
            for b in &regions[index + 1..] {
                if overlaps(a, b) {
                    prop_assert!(
                        may_overlap(a, b),
                        "illegal overlap between {:?} and {:?}",
                        a,
                        b
                    );
                }
            }
        }

        // Tight packing: the data section ends in the word holding the
        // highest allocated bit, and the pointer section holds exactly the
        // slots that were handed out.
        let body = struct_body(&root);
        let max_data_end = regions
            .iter()
            .filter(|region| region.kind == Kind::Data)
            .map(|region| region.end)
            .max()
            .unwrap_or(0);
        prop_assert_eq!(u64::from(body.data_word_count), (max_data_end + 63) / 64);

        let max_pointer_end = regions
            .iter()
            .filter(|region| region.kind == Kind::Pointer)
            .map(|region| region.end)
            .max()
            .unwrap_or(0);
        prop_assert_eq!(u64::from(body.pointer_count), max_pointer_end);

        // The emitted ordinals are a permutation of the declared ones.
        let mut emitted_ordinals: Vec<u32> = nodes_by_id
            .values()
            .flat_map(|node| struct_body(node).fields.iter())
            .filter_map(|field| field.ordinal)
            .collect();
        emitted_ordinals.sort_unstable();
        let expected: Vec<u32> = (0..ordinals.len() as u32).collect();
        prop_assert_eq!(emitted_ordinals, expected);

        // Code order is a dense permutation of declaration order within
        // each scope.
        for node in nodes_by_id.values() {
            let mut code_orders: Vec<u16> = struct_body(node)
                .fields
                .iter()
                .map(|field| field.code_order)
                .collect();
            code_orders.sort_unstable();
            let dense: Vec<u16> = (0..code_orders.len() as u16).collect();
            prop_assert_eq!(code_orders, dense);
        }

        // Every union got a discriminant and counted its variants.
        for node in nodes_by_id.values() {
            let body = struct_body(node);
            let members = body
                .fields
                .iter()
                .filter(|field| field.discriminant_value != NO_DISCRIMINANT)
                .count();
            prop_assert_eq!(usize::from(body.discriminant_count), members);
        }

        // Group nodes mirror the root's sizes and encoding hint.
        for group in &groups {
            let group_body = struct_body(group);
            prop_assert!(group_body.is_group);
            prop_assert_eq!(group_body.data_word_count, body.data_word_count);
            prop_assert_eq!(group_body.pointer_count, body.pointer_count);
            prop_assert_eq!(
                group_body.preferred_list_encoding,
                body.preferred_list_encoding
            );
        }
    }

    /// For union-free structs the preferred list encoding is exactly
    /// determined by the section sizes and the used prefix of word 0.
    #[test]
    fn preferred_encoding_table(
        types in prop::collection::vec(arb_type(), 0..8),
    ) {
        let scope = Scope::new();
        let interner = RefCell::new(StringInterner::new());
        let builder = AstBuilder::new(&scope, &interner);
        let resolver = TestResolver::with_builtins(&builder);

        let fields: Vec<_> = types
            .iter()
            .enumerate()
            .map(|(ordinal, ty)| {
                builder.field(&format!("f{}", ordinal), ordinal as u32, builder.ty(ty.name()))
            })
            .collect();
        let decl = builder.struct_decl("Subject", &fields);
        let Translation { root, messages, .. } = translate(&resolver, &interner, &decl);
        prop_assert!(messages.is_empty(), "unexpected messages: {:?}", messages);

        let mut nodes_by_id = HashMap::new();
        nodes_by_id.insert(root.id, &root);
        let mut regions = Vec::new();
        collect_regions(&root, &nodes_by_id, &[], &mut regions);

        let body = struct_body(&root);
        let max_data_end = regions
            .iter()
            .filter(|region| region.kind == Kind::Data)
            .map(|region| region.end)
            .max()
            .unwrap_or(0);

        let expected = if body.pointer_count == 0 {
            match body.data_word_count {
                0 => ElementSize::Empty,
                1 => match max_data_end.next_power_of_two() {
                    1 => ElementSize::Bit,
                    2 | 4 | 8 => ElementSize::Byte,
                    16 => ElementSize::TwoBytes,
                    32 => ElementSize::FourBytes,
                    64 => ElementSize::EightBytes,
                    _ => unreachable!(),
                },
                _ => ElementSize::InlineComposite,
            }
        } else if body.pointer_count == 1 && body.data_word_count == 0 {
            ElementSize::Pointer
        } else {
            ElementSize::InlineComposite
        };
        prop_assert_eq!(body.preferred_list_encoding, expected);
    }
}
