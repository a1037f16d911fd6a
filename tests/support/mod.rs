//! Shared scaffolding for translator tests: declaration-tree builders over
//! a scoped arena, a map-backed resolver, and a one-call translation
//! runner.

// Each test binary uses a different subset of the helpers.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use scoped_arena::Scope;

use strata::ast::{
    AnnotationApplication, DeclKind, DeclName, Declaration, FieldAssignment, NameBase,
    TypeExpression, ValueExpression, ValueKind,
};
use strata::schema::{AnnotationTargets, Node, NodeBody};
use strata::source::{ByteRange, FileId, FileRange, Spanned};
use strata::translate::{BuiltinType, Message, ResolvedName};
use strata::{NodeTranslator, Resolver, StringId, StringInterner};

/// Builds arena-allocated declaration trees. Every node gets a distinct
/// fabricated source range so diagnostics can be told apart by location.
pub struct AstBuilder<'arena> {
    pub scope: &'arena Scope<'arena>,
    pub interner: &'arena RefCell<StringInterner>,
    file: FileId,
    next_pos: Cell<u32>,
}

impl<'arena> AstBuilder<'arena> {
    pub fn new(
        scope: &'arena Scope<'arena>,
        interner: &'arena RefCell<StringInterner>,
    ) -> AstBuilder<'arena> {
        AstBuilder {
            scope,
            interner,
            file: FileId::try_from(1).unwrap(),
            next_pos: Cell::new(0),
        }
    }

    pub fn range(&self) -> FileRange {
        let start = self.next_pos.get();
        self.next_pos.set(start + 2);
        FileRange::new(self.file, ByteRange::new(start, start + 1))
    }

    pub fn intern(&self, name: &str) -> StringId {
        self.interner.borrow_mut().get_or_intern(name)
    }

    fn spanned_name(&self, name: &str) -> Spanned<StringId> {
        Spanned::new(self.range(), self.intern(name))
    }

    fn alloc_decls(&self, decls: &[Declaration<'arena>]) -> &'arena [Declaration<'arena>] {
        self.scope.to_scope_from_iter(decls.iter().copied())
    }

    // ------------------------------------------------------------------
    // Names and types

    pub fn bare_name(&self, name: &str) -> DeclName<'arena> {
        DeclName {
            base: NameBase::Relative(self.intern(name)),
            member_path: &[],
            range: self.range(),
        }
    }

    pub fn qualified_name(&self, base: &str, path: &[&str]) -> DeclName<'arena> {
        let path = self
            .scope
            .to_scope_from_iter(path.iter().map(|part| self.spanned_name(part)));
        DeclName {
            base: NameBase::Relative(self.intern(base)),
            member_path: path,
            range: self.range(),
        }
    }

    pub fn ty(&self, name: &str) -> TypeExpression<'arena> {
        TypeExpression {
            name: self.bare_name(name),
            params: &[],
            range: self.range(),
        }
    }

    pub fn ty_with_params(
        &self,
        name: &str,
        params: &[TypeExpression<'arena>],
    ) -> TypeExpression<'arena> {
        TypeExpression {
            name: self.bare_name(name),
            params: self.scope.to_scope_from_iter(params.iter().copied()),
            range: self.range(),
        }
    }

    // ------------------------------------------------------------------
    // Values

    pub fn v_int(&self, value: u64) -> ValueExpression<'arena> {
        ValueExpression {
            kind: ValueKind::PositiveInt(value),
            range: self.range(),
        }
    }

    pub fn v_negative(&self, magnitude: u64) -> ValueExpression<'arena> {
        ValueExpression {
            kind: ValueKind::NegativeInt(magnitude),
            range: self.range(),
        }
    }

    pub fn v_float(&self, value: f64) -> ValueExpression<'arena> {
        ValueExpression {
            kind: ValueKind::Float(value),
            range: self.range(),
        }
    }

    pub fn v_string(&self, value: &str) -> ValueExpression<'arena> {
        ValueExpression {
            kind: ValueKind::String(self.intern(value)),
            range: self.range(),
        }
    }

    pub fn v_name(&self, name: DeclName<'arena>) -> ValueExpression<'arena> {
        ValueExpression {
            kind: ValueKind::Name(name),
            range: self.range(),
        }
    }

    pub fn v_list(&self, elements: &[ValueExpression<'arena>]) -> ValueExpression<'arena> {
        ValueExpression {
            kind: ValueKind::List(self.scope.to_scope_from_iter(elements.iter().copied())),
            range: self.range(),
        }
    }

    pub fn v_struct(&self, fields: &[(&str, ValueExpression<'arena>)]) -> ValueExpression<'arena> {
        let assignments = self.scope.to_scope_from_iter(fields.iter().map(
            |&(name, value)| FieldAssignment {
                field_name: self.spanned_name(name),
                value,
                union_syntax: false,
            },
        ));
        ValueExpression {
            kind: ValueKind::Struct(assignments),
            range: self.range(),
        }
    }

    // ------------------------------------------------------------------
    // Declarations

    fn decl(
        &self,
        name: Option<&str>,
        ordinal: Option<u32>,
        kind: DeclKind<'arena>,
        nested: &[Declaration<'arena>],
    ) -> Declaration<'arena> {
        Declaration {
            name: name.map(|name| self.spanned_name(name)),
            ordinal: ordinal.map(|ordinal| Spanned::new(self.range(), ordinal)),
            kind,
            annotations: &[],
            nested: self.alloc_decls(nested),
            range: self.range(),
        }
    }

    pub fn field(&self, name: &str, ordinal: u32, ty: TypeExpression<'arena>) -> Declaration<'arena> {
        self.decl(Some(name), Some(ordinal), DeclKind::Field { ty, default: None }, &[])
    }

    pub fn field_with_default(
        &self,
        name: &str,
        ordinal: u32,
        ty: TypeExpression<'arena>,
        default: ValueExpression<'arena>,
    ) -> Declaration<'arena> {
        self.decl(
            Some(name),
            Some(ordinal),
            DeclKind::Field {
                ty,
                default: Some(default),
            },
            &[],
        )
    }

    pub fn unnamed_union(&self, members: &[Declaration<'arena>]) -> Declaration<'arena> {
        self.decl(None, None, DeclKind::Union, members)
    }

    pub fn union(
        &self,
        name: &str,
        ordinal: Option<u32>,
        members: &[Declaration<'arena>],
    ) -> Declaration<'arena> {
        self.decl(Some(name), ordinal, DeclKind::Union, members)
    }

    pub fn group(&self, name: &str, members: &[Declaration<'arena>]) -> Declaration<'arena> {
        self.decl(Some(name), None, DeclKind::Group, members)
    }

    pub fn struct_decl(&self, name: &str, members: &[Declaration<'arena>]) -> Declaration<'arena> {
        self.decl(Some(name), None, DeclKind::Struct, members)
    }

    pub fn enum_decl(&self, name: &str, members: &[Declaration<'arena>]) -> Declaration<'arena> {
        self.decl(Some(name), None, DeclKind::Enum, members)
    }

    pub fn enumerant(&self, name: &str, ordinal: u32) -> Declaration<'arena> {
        self.decl(Some(name), Some(ordinal), DeclKind::Enumerant, &[])
    }

    pub fn interface_decl(
        &self,
        name: &str,
        members: &[Declaration<'arena>],
    ) -> Declaration<'arena> {
        self.decl(Some(name), None, DeclKind::Interface, members)
    }

    pub fn method(&self, name: &str, ordinal: u32) -> Declaration<'arena> {
        self.decl(Some(name), Some(ordinal), DeclKind::Method, &[])
    }

    pub fn const_decl(
        &self,
        name: &str,
        ty: TypeExpression<'arena>,
        value: ValueExpression<'arena>,
    ) -> Declaration<'arena> {
        self.decl(Some(name), None, DeclKind::Const { ty, value }, &[])
    }

    pub fn annotation_decl(
        &self,
        name: &str,
        ty: TypeExpression<'arena>,
        targets: AnnotationTargets,
    ) -> Declaration<'arena> {
        self.decl(Some(name), None, DeclKind::Annotation { ty, targets }, &[])
    }

    pub fn annotated(
        &self,
        mut decl: Declaration<'arena>,
        annotations: &[AnnotationApplication<'arena>],
    ) -> Declaration<'arena> {
        decl.annotations = self
            .scope
            .to_scope_from_iter(annotations.iter().copied());
        decl
    }

    pub fn annotation(
        &self,
        name: &str,
        value: Option<ValueExpression<'arena>>,
    ) -> AnnotationApplication<'arena> {
        AnnotationApplication {
            name: self.bare_name(name),
            value,
            range: self.range(),
        }
    }
}

/// A map-backed [`Resolver`] for tests. Names resolve by their interned
/// path; schemas by node id.
#[derive(Default)]
pub struct TestResolver {
    names: HashMap<Vec<StringId>, ResolvedName>,
    bootstrap: HashMap<u64, Node>,
    finals: HashMap<u64, Node>,
}

impl TestResolver {
    /// A resolver with the builtin type names predefined.
    pub fn with_builtins(builder: &AstBuilder<'_>) -> TestResolver {
        let mut resolver = TestResolver::default();
        let builtins = [
            ("Void", BuiltinType::Void),
            ("Bool", BuiltinType::Bool),
            ("Int8", BuiltinType::Int8),
            ("Int16", BuiltinType::Int16),
            ("Int32", BuiltinType::Int32),
            ("Int64", BuiltinType::Int64),
            ("UInt8", BuiltinType::UInt8),
            ("UInt16", BuiltinType::UInt16),
            ("UInt32", BuiltinType::UInt32),
            ("UInt64", BuiltinType::UInt64),
            ("Float32", BuiltinType::Float32),
            ("Float64", BuiltinType::Float64),
            ("Text", BuiltinType::Text),
            ("Data", BuiltinType::Data),
            ("List", BuiltinType::List),
            ("AnyPointer", BuiltinType::AnyPointer),
        ];
        for (name, builtin) in builtins {
            resolver
                .names
                .insert(vec![builder.intern(name)], ResolvedName::Builtin(builtin));
        }
        resolver
    }

    pub fn define(&mut self, builder: &AstBuilder<'_>, path: &[&str], resolved: ResolvedName) {
        let key = path.iter().map(|part| builder.intern(part)).collect();
        self.names.insert(key, resolved);
    }

    pub fn add_bootstrap(&mut self, node: Node) {
        self.bootstrap.insert(node.id, node);
    }

    pub fn add_final(&mut self, node: Node) {
        self.finals.insert(node.id, node);
    }
}

impl Resolver for TestResolver {
    fn resolve(&self, name: &DeclName<'_>) -> Option<ResolvedName> {
        let base = match name.base {
            NameBase::Relative(id) | NameBase::Absolute(id) | NameBase::Import(id) => id,
        };
        let mut key = vec![base];
        key.extend(name.member_path.iter().map(|part| **part));
        self.names.get(&key).copied()
    }

    fn resolve_bootstrap_schema(&self, id: u64) -> Option<&Node> {
        self.bootstrap.get(&id)
    }

    fn resolve_final_schema(&self, id: u64) -> Option<&Node> {
        // Fall back to the bootstrap schema, the way a driver that has
        // already finished a node would serve it.
        self.finals.get(&id).or_else(|| self.bootstrap.get(&id))
    }
}

/// The outcome of translating one declaration.
pub struct Translation {
    pub root: Node,
    pub groups: Vec<Node>,
    pub messages: Vec<Message>,
}

pub const TEST_NODE_ID: u64 = 0x8000_0000_0000_1234;

/// Run a full bootstrap-then-finish translation of `decl`.
pub fn translate(
    resolver: &dyn Resolver,
    interner: &RefCell<StringInterner>,
    decl: &Declaration<'_>,
) -> Translation {
    let local_name = decl
        .name
        .map(|name| {
            interner
                .borrow()
                .resolve(*name)
                .expect("declaration names are interned")
                .to_owned()
        })
        .unwrap_or_default();
    let display_name = format!("test.strata:{}", local_name);
    let prefix_length = (display_name.len() - local_name.len()) as u32;

    let wip_node = Node {
        id: TEST_NODE_ID,
        display_name,
        display_name_prefix_length: prefix_length,
        scope_id: 1,
        annotations: Vec::new(),
        body: NodeBody::File,
    };

    let mut translator = NodeTranslator::new(resolver, interner, decl, wip_node, true);
    let (root, groups) = {
        let set = translator.finish();
        (set.root.clone(), set.groups.to_vec())
    };
    let mut messages = Vec::new();
    translator.handle_messages(&mut |message| messages.push(message));

    Translation {
        root,
        groups,
        messages,
    }
}
