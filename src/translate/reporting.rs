//! Diagnostic messages produced during translation.
//!
//! Messages accumulate in the translator and are rendered to
//! [`Diagnostic`]s for presentation. All of them are recoverable:
//! translation continues with safe defaults after each one.

use std::cell::RefCell;

use codespan_reporting::diagnostic::{Diagnostic, Label};

use crate::schema::AnnotationTarget;
use crate::source::{FileId, FileRange};
use crate::{StringId, StringInterner};

#[derive(Debug, Clone)]
pub enum Message {
    /// A name collides with an earlier one in the same scope.
    NameAlreadyDefined {
        range: FileRange,
        name: StringId,
    },
    /// Companion to [`Message::NameAlreadyDefined`], pointing at the
    /// earlier occurrence.
    NamePreviouslyDefined {
        range: FileRange,
        name: StringId,
    },
    UnnamedUnionAlreadyDefined {
        range: FileRange,
    },
    UnnamedUnionPreviouslyDefined {
        range: FileRange,
    },
    /// A declaration kind that is illegal under its parent kind.
    DeclarationNotAllowedHere {
        range: FileRange,
    },
    EnumerantOutsideEnum {
        range: FileRange,
    },
    MethodOutsideInterface {
        range: FileRange,
    },
    MemberOutsideStruct {
        range: FileRange,
    },
    DuplicateOrdinal {
        range: FileRange,
    },
    /// Companion to [`Message::DuplicateOrdinal`], pointing at the first
    /// use of the ordinal.
    OrdinalOriginallyUsed {
        range: FileRange,
        ordinal: u32,
    },
    SkippedOrdinal {
        range: FileRange,
        expected: u32,
    },
    UnionMissingVariants {
        range: FileRange,
    },
    GroupMissingMembers {
        range: FileRange,
    },
    NestedUnion {
        range: FileRange,
    },
    /// A union's explicit ordinal came after more than one of its member
    /// ordinals.
    RetroactiveUnion {
        range: FileRange,
    },
    ListParameterCount {
        range: FileRange,
    },
    ListOfAnyPointer {
        range: FileRange,
    },
    NotAType {
        range: FileRange,
        name: String,
    },
    NoParametersExpected {
        range: FileRange,
        name: String,
    },
    /// A value expression's shape doesn't fit the type it is compiled
    /// against.
    TypeMismatch {
        range: FileRange,
    },
    IntegerTooBigToBeNegative {
        range: FileRange,
    },
    NoSuchField {
        range: FileRange,
        name: StringId,
    },
    UnionLiteralObsolete {
        range: FileRange,
    },
    NotAConstant {
        range: FileRange,
        name: String,
    },
    ConstantNotQualified {
        range: FileRange,
        name: String,
        suggestion: String,
    },
    NotAnAnnotation {
        range: FileRange,
        name: String,
    },
    AnnotationTargetNotAllowed {
        range: FileRange,
        name: String,
        target: AnnotationTarget,
    },
    AnnotationRequiresValue {
        range: FileRange,
        name: String,
    },
}

impl Message {
    pub fn range(&self) -> FileRange {
        match self {
            Message::NameAlreadyDefined { range, .. }
            | Message::NamePreviouslyDefined { range, .. }
            | Message::UnnamedUnionAlreadyDefined { range }
            | Message::UnnamedUnionPreviouslyDefined { range }
            | Message::DeclarationNotAllowedHere { range }
            | Message::EnumerantOutsideEnum { range }
            | Message::MethodOutsideInterface { range }
            | Message::MemberOutsideStruct { range }
            | Message::DuplicateOrdinal { range }
            | Message::OrdinalOriginallyUsed { range, .. }
            | Message::SkippedOrdinal { range, .. }
            | Message::UnionMissingVariants { range }
            | Message::GroupMissingMembers { range }
            | Message::NestedUnion { range }
            | Message::RetroactiveUnion { range }
            | Message::ListParameterCount { range }
            | Message::ListOfAnyPointer { range }
            | Message::NotAType { range, .. }
            | Message::NoParametersExpected { range, .. }
            | Message::TypeMismatch { range }
            | Message::IntegerTooBigToBeNegative { range }
            | Message::NoSuchField { range, .. }
            | Message::UnionLiteralObsolete { range }
            | Message::NotAConstant { range, .. }
            | Message::ConstantNotQualified { range, .. }
            | Message::NotAnAnnotation { range, .. }
            | Message::AnnotationTargetNotAllowed { range, .. }
            | Message::AnnotationRequiresValue { range, .. } => *range,
        }
    }

    pub fn to_diagnostic(&self, interner: &RefCell<StringInterner>) -> Diagnostic<FileId> {
        let primary_label = |range: &FileRange| Label::primary(range.file_id(), *range);
        let secondary_label = |range: &FileRange| Label::secondary(range.file_id(), *range);

        match self {
            Message::NameAlreadyDefined { range, name } => {
                let interner = interner.borrow();
                let name = interner.resolve(*name).unwrap();

                Diagnostic::error()
                    .with_message(format!("`{}` is already defined in this scope", name))
                    .with_labels(vec![primary_label(range).with_message("redefined here")])
            }
            Message::NamePreviouslyDefined { range, name } => {
                let interner = interner.borrow();
                let name = interner.resolve(*name).unwrap();

                Diagnostic::error()
                    .with_message(format!("`{}` previously defined here", name))
                    .with_labels(vec![secondary_label(range).with_message("first definition")])
            }
            Message::UnnamedUnionAlreadyDefined { range } => Diagnostic::error()
                .with_message("an unnamed union is already defined in this scope")
                .with_labels(vec![primary_label(range).with_message("second unnamed union")])
                .with_notes(vec![
                    "name at least one of the unions so they can be told apart".to_owned(),
                ]),
            Message::UnnamedUnionPreviouslyDefined { range } => Diagnostic::error()
                .with_message("previously defined here")
                .with_labels(vec![secondary_label(range).with_message("first unnamed union")]),
            Message::DeclarationNotAllowedHere { range } => Diagnostic::error()
                .with_message("this kind of declaration doesn't belong here")
                .with_labels(vec![primary_label(range)]),
            Message::EnumerantOutsideEnum { range } => Diagnostic::error()
                .with_message("enumerants can only appear in enums")
                .with_labels(vec![primary_label(range)]),
            Message::MethodOutsideInterface { range } => Diagnostic::error()
                .with_message("methods can only appear in interfaces")
                .with_labels(vec![primary_label(range)]),
            Message::MemberOutsideStruct { range } => Diagnostic::error()
                .with_message("this declaration can only appear in structs")
                .with_labels(vec![primary_label(range)]),
            Message::DuplicateOrdinal { range } => Diagnostic::error()
                .with_message("duplicate ordinal number")
                .with_labels(vec![primary_label(range)]),
            Message::OrdinalOriginallyUsed { range, ordinal } => Diagnostic::error()
                .with_message(format!("ordinal @{} originally used here", ordinal))
                .with_labels(vec![secondary_label(range).with_message("first use")]),
            Message::SkippedOrdinal { range, expected } => Diagnostic::error()
                .with_message(format!("skipped ordinal @{}", expected))
                .with_labels(vec![primary_label(range)])
                .with_notes(vec!["ordinals must be sequential with no holes".to_owned()]),
            Message::UnionMissingVariants { range } => Diagnostic::error()
                .with_message("union must have at least two members")
                .with_labels(vec![primary_label(range)]),
            Message::GroupMissingMembers { range } => Diagnostic::error()
                .with_message("group must have at least one member")
                .with_labels(vec![primary_label(range)]),
            Message::NestedUnion { range } => Diagnostic::error()
                .with_message("unions cannot contain unions")
                .with_labels(vec![primary_label(range)])
                .with_notes(vec![
                    "wrap the inner union in a group to get the same wire layout".to_owned(),
                ]),
            Message::RetroactiveUnion { range } => Diagnostic::error()
                .with_message(
                    "a union's ordinal may precede all but one of its member ordinals",
                )
                .with_labels(vec![primary_label(range).with_message("union ordinal")])
                .with_notes(vec![
                    "only one field can be retroactively unionized".to_owned(),
                ]),
            Message::ListParameterCount { range } => Diagnostic::error()
                .with_message("`List` requires exactly one parameter")
                .with_labels(vec![primary_label(range)]),
            Message::ListOfAnyPointer { range } => Diagnostic::error()
                .with_message("`List(AnyPointer)` is not supported")
                .with_labels(vec![primary_label(range)]),
            Message::NotAType { range, name } => Diagnostic::error()
                .with_message(format!("`{}` is not a type", name))
                .with_labels(vec![primary_label(range)]),
            Message::NoParametersExpected { range, name } => Diagnostic::error()
                .with_message(format!("`{}` does not accept parameters", name))
                .with_labels(vec![primary_label(range)]),
            Message::TypeMismatch { range } => Diagnostic::error()
                .with_message("type mismatch")
                .with_labels(vec![
                    primary_label(range).with_message("value doesn't fit the expected type")
                ]),
            Message::IntegerTooBigToBeNegative { range } => Diagnostic::error()
                .with_message("integer is too big to be negative")
                .with_labels(vec![primary_label(range)]),
            Message::NoSuchField { range, name } => {
                let interner = interner.borrow();
                let name = interner.resolve(*name).unwrap();

                Diagnostic::error()
                    .with_message(format!("struct has no field named `{}`", name))
                    .with_labels(vec![primary_label(range).with_message("unknown field")])
            }
            Message::UnionLiteralObsolete { range } => Diagnostic::error()
                .with_message("union literal syntax is obsolete")
                .with_labels(vec![primary_label(range)])
                .with_notes(vec!["assign the variant field directly".to_owned()]),
            Message::NotAConstant { range, name } => Diagnostic::error()
                .with_message(format!("`{}` does not refer to a constant", name))
                .with_labels(vec![primary_label(range)]),
            Message::ConstantNotQualified {
                range,
                name,
                suggestion,
            } => Diagnostic::error()
                .with_message("constant names must be qualified to avoid confusion")
                .with_labels(vec![primary_label(range)])
                .with_notes(vec![format!(
                    "replace `{}` with `{}`, if that's what you intended",
                    name, suggestion
                )]),
            Message::NotAnAnnotation { range, name } => Diagnostic::error()
                .with_message(format!("`{}` is not an annotation", name))
                .with_labels(vec![primary_label(range)]),
            Message::AnnotationTargetNotAllowed {
                range,
                name,
                target,
            } => Diagnostic::error()
                .with_message(format!(
                    "`{}` cannot be applied to {}",
                    name,
                    target.description()
                ))
                .with_labels(vec![primary_label(range)]),
            Message::AnnotationRequiresValue { range, name } => Diagnostic::error()
                .with_message(format!("`{}` requires a value", name))
                .with_labels(vec![primary_label(range)]),
        }
    }
}
