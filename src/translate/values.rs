//! Compilation of literal value expressions against schema types.
//!
//! Values compile in two phases. During bootstrap, primitive values are
//! compiled immediately; composite values (lists, structs, interfaces, any-
//! pointers) are deferred into the translator's unfinished-value queue,
//! because compiling them may need the final schemas of nodes still being
//! translated. Either way the target slot is first filled with the type's
//! *default default* — a zero or null — so downstream validation always
//! sees a well-formed value.
//!
//! Type checking is explicit: the inner compiler returns `Err(TypeMismatch)`
//! when an expression's shape doesn't fit the target type, and the catch
//! boundary turns that into a single "type mismatch" diagnostic plus the
//! default default. List elements and struct fields each have their own
//! catch boundary, so one bad element doesn't poison its siblings.

use crate::ast::{DeclName, NameBase, ValueExpression, ValueKind};
use crate::schema::{FieldKind, NodeBody, Type, Value};
use crate::translate::{Message, NodeKind, NodeTranslator, ResolvedName, ValueSlot};

/// A deferred composite value: compile `source` against `ty` into `slot`
/// once final schemas are available.
#[derive(Clone)]
pub(crate) struct UnfinishedValue<'arena> {
    pub(crate) source: ValueExpression<'arena>,
    pub(crate) ty: Type,
    pub(crate) slot: ValueSlot,
}

/// A value expression's shape doesn't fit the type it is compiled against.
/// Reported once, at the catch boundary.
pub(crate) struct TypeMismatch;

/// The zero/null value of a type.
pub(crate) fn default_value(ty: &Type) -> Value {
    match ty {
        Type::Void => Value::Void,
        Type::Bool => Value::Bool(false),
        Type::Int8 => Value::Int8(0),
        Type::Int16 => Value::Int16(0),
        Type::Int32 => Value::Int32(0),
        Type::Int64 => Value::Int64(0),
        Type::UInt8 => Value::UInt8(0),
        Type::UInt16 => Value::UInt16(0),
        Type::UInt32 => Value::UInt32(0),
        Type::UInt64 => Value::UInt64(0),
        Type::Float32 => Value::Float32(0.0),
        Type::Float64 => Value::Float64(0.0),
        Type::Text => Value::Text(String::new()),
        Type::Data => Value::Data(Vec::new()),
        Type::List(_) => Value::List(Vec::new()),
        Type::Enum(_) => Value::Enum(0),
        Type::Struct(_) => Value::Struct(Vec::new()),
        Type::Interface(_) => Value::Interface,
        Type::AnyPointer => Value::AnyPointer(None),
    }
}

impl<'arena, 'env> NodeTranslator<'arena, 'env> {
    /// Phase one. Fills the slot with the default default, then either
    /// compiles a primitive value in place or defers a composite one.
    pub(crate) fn compile_bootstrap_value(
        &mut self,
        source: ValueExpression<'arena>,
        ty: Type,
        slot: ValueSlot,
    ) {
        *self.slot_mut(slot) = default_value(&ty);

        match ty {
            Type::List(_) | Type::Struct(_) | Type::Interface(_) | Type::AnyPointer => {
                self.unfinished_values.push(UnfinishedValue { source, ty, slot });
            }
            _ => self.compile_value_into(source, &ty, slot, true),
        }
    }

    pub(crate) fn compile_value_into(
        &mut self,
        source: ValueExpression<'arena>,
        ty: &Type,
        slot: ValueSlot,
        is_bootstrap: bool,
    ) {
        let value = self.compile_value(source, ty, is_bootstrap);
        *self.slot_mut(slot) = value;
    }

    /// The catch boundary: a mismatch becomes one diagnostic and the
    /// default default.
    fn compile_value(
        &mut self,
        source: ValueExpression<'arena>,
        ty: &Type,
        is_bootstrap: bool,
    ) -> Value {
        match self.compile_value_inner(source, ty, is_bootstrap) {
            Ok(value) => value,
            Err(TypeMismatch) => {
                self.push_message(Message::TypeMismatch {
                    range: source.range,
                });
                default_value(ty)
            }
        }
    }

    fn compile_value_inner(
        &mut self,
        source: ValueExpression<'arena>,
        ty: &Type,
        is_bootstrap: bool,
    ) -> Result<Value, TypeMismatch> {
        match source.kind {
            // An earlier parse error; stay with the default.
            ValueKind::Unknown => Ok(default_value(ty)),

            ValueKind::Name(name) => self.compile_name(name, source, ty, is_bootstrap),

            ValueKind::PositiveInt(value) => compile_unsigned(value, ty),

            ValueKind::NegativeInt(magnitude) => {
                if magnitude > 1 << 63 {
                    self.push_message(Message::IntegerTooBigToBeNegative {
                        range: source.range,
                    });
                    return Ok(default_value(ty));
                }
                compile_signed((magnitude as i64).wrapping_neg(), ty)
            }

            ValueKind::Float(value) => match ty {
                Type::Float32 => Ok(Value::Float32(value as f32)),
                Type::Float64 => Ok(Value::Float64(value)),
                _ => Err(TypeMismatch),
            },

            ValueKind::String(id) => {
                let text = self
                    .interner
                    .borrow()
                    .resolve(id)
                    .unwrap_or_default()
                    .to_owned();
                match ty {
                    Type::Text => Ok(Value::Text(text)),
                    Type::Data => Ok(Value::Data(text.into_bytes())),
                    Type::AnyPointer => {
                        Ok(Value::AnyPointer(Some(Box::new(Value::Text(text)))))
                    }
                    _ => Err(TypeMismatch),
                }
            }

            ValueKind::List(elements) => {
                let element_ty = match ty {
                    Type::List(element_ty) => element_ty.as_ref().clone(),
                    _ => return Err(TypeMismatch),
                };
                let values = elements
                    .iter()
                    .map(|element| self.compile_value(*element, &element_ty, is_bootstrap))
                    .collect();
                Ok(Value::List(values))
            }

            ValueKind::Struct(assignments) => {
                let struct_id = match ty {
                    Type::Struct(id) => *id,
                    _ => return Err(TypeMismatch),
                };
                let resolver = self.resolver;
                let struct_node = match resolver.resolve_bootstrap_schema(struct_id) {
                    Some(node) => match &node.body {
                        NodeBody::Struct(struct_node) => struct_node,
                        _ => return Err(TypeMismatch),
                    },
                    // The struct's schema is broken for reasons already
                    // reported.
                    None => return Ok(default_value(ty)),
                };

                let mut values = Vec::new();
                for assignment in assignments {
                    if assignment.union_syntax {
                        self.push_message(Message::UnionLiteralObsolete {
                            range: assignment.field_name.range(),
                        });
                        continue;
                    }

                    let field = struct_node
                        .fields
                        .iter()
                        .find(|field| field.name == *assignment.field_name);
                    match field {
                        Some(field) => {
                            let field_ty = match &field.kind {
                                FieldKind::Regular { ty, .. } => ty.clone(),
                                FieldKind::Group { type_id } => Type::Struct(*type_id),
                            };
                            let value =
                                self.compile_value(assignment.value, &field_ty, is_bootstrap);
                            values.push((*assignment.field_name, value));
                        }
                        None => self.push_message(Message::NoSuchField {
                            range: assignment.field_name.range(),
                            name: *assignment.field_name,
                        }),
                    }
                }
                Ok(Value::Struct(values))
            }
        }
    }

    /// A name in value position: an enumerant of an enum-typed target, one
    /// of the reserved literals, or a constant reference.
    fn compile_name(
        &mut self,
        name: DeclName<'arena>,
        source: ValueExpression<'arena>,
        ty: &Type,
        is_bootstrap: bool,
    ) -> Result<Value, TypeMismatch> {
        if name.is_bare() {
            let id = match name.base {
                NameBase::Relative(id) => id,
                _ => unreachable!("bare names are relative"),
            };

            if let Type::Enum(enum_id) = ty {
                let resolver = self.resolver;
                match resolver.resolve_bootstrap_schema(*enum_id) {
                    Some(node) => {
                        if let NodeBody::Enum(enum_node) = &node.body {
                            let position = enum_node
                                .enumerants
                                .iter()
                                .position(|enumerant| enumerant.name == id);
                            if let Some(position) = position {
                                return Ok(Value::Enum(position as u16));
                            }
                        }
                    }
                    // The enum type is broken, and reported elsewhere.
                    // Assume we would have found a matching enumerant.
                    None => return Ok(Value::Enum(0)),
                }
            } else {
                enum Reserved {
                    Void,
                    True,
                    False,
                    Nan,
                    Inf,
                }
                let reserved = {
                    let interner = self.interner.borrow();
                    match interner.resolve(id) {
                        Some("void") => Some(Reserved::Void),
                        Some("true") => Some(Reserved::True),
                        Some("false") => Some(Reserved::False),
                        Some("nan") => Some(Reserved::Nan),
                        Some("inf") => Some(Reserved::Inf),
                        _ => None,
                    }
                };
                if let Some(reserved) = reserved {
                    return match (reserved, ty) {
                        (Reserved::Void, Type::Void) => Ok(Value::Void),
                        (Reserved::True, Type::Bool) => Ok(Value::Bool(true)),
                        (Reserved::False, Type::Bool) => Ok(Value::Bool(false)),
                        (Reserved::Nan, Type::Float32) => Ok(Value::Float32(f32::NAN)),
                        (Reserved::Nan, Type::Float64) => Ok(Value::Float64(f64::NAN)),
                        (Reserved::Inf, Type::Float32) => Ok(Value::Float32(f32::INFINITY)),
                        (Reserved::Inf, Type::Float64) => Ok(Value::Float64(f64::INFINITY)),
                        _ => Err(TypeMismatch),
                    };
                }
            }
        }

        // Not an enumerant or literal; try looking up a constant.
        match self.read_constant(name, is_bootstrap, source) {
            Some((value, declared_ty)) => coerce_constant(value, &declared_ty, ty),
            None => Ok(default_value(ty)),
        }
    }

    /// Dereference a constant, returning its value and declared type.
    /// Returns `None` with the error already reported (possibly by the
    /// resolver) on any failure.
    fn read_constant(
        &mut self,
        name: DeclName<'arena>,
        is_bootstrap: bool,
        source: ValueExpression<'arena>,
    ) -> Option<(Value, Type)> {
        let resolver = self.resolver;
        // Lookup reports its own errors.
        let resolved = resolver.resolve(&name)?;

        let id = match resolved {
            ResolvedName::Node {
                kind: NodeKind::Const,
                id,
            } => id,
            _ => {
                self.push_message(Message::NotAConstant {
                    range: source.range,
                    name: self.display_name(&name),
                });
                return None;
            }
        };

        // During bootstrap we expect a primitive, so the bootstrap schema
        // suffices; otherwise we may be compiling a composite and need the
        // final version with its value filled in.
        let node = if is_bootstrap {
            resolver.resolve_bootstrap_schema(id)
        } else {
            resolver.resolve_final_schema(id)
        };
        // If the constant's schema is broken, that is already reported.
        let node = node?;
        let const_node = match &node.body {
            NodeBody::Const(const_node) => const_node,
            _ => return None,
        };

        if name.is_bare() {
            // A bare identifier could plausibly refer to a constant in the
            // current scope, but we want the user to qualify it.
            if let Some(scope) = resolver.resolve_bootstrap_schema(node.scope_id) {
                let parent = match scope.body {
                    NodeBody::File => "",
                    _ => scope.local_name(),
                };
                let suggestion = format!("{}.{}", parent, node.local_name());
                self.push_message(Message::ConstantNotQualified {
                    range: source.range,
                    name: self.display_name(&name),
                    suggestion,
                });
            }
        }

        Some((const_node.value.clone(), const_node.ty.clone()))
    }

    /// The mutable value a slot addresses. Slots are stable for the
    /// translator's lifetime, so deferred compilation can write through
    /// them long after bootstrap.
    pub(crate) fn slot_mut(&mut self, slot: ValueSlot) -> &mut Value {
        match slot {
            ValueSlot::ConstValue => match &mut self.wip_node.body {
                NodeBody::Const(const_node) => &mut const_node.value,
                _ => panic!("node is not a constant"),
            },
            ValueSlot::FieldDefault { node, field } => {
                match &mut self.field_mut(node, field).kind {
                    FieldKind::Regular { default_value, .. } => default_value,
                    FieldKind::Group { .. } => panic!("group fields have no default value"),
                }
            }
            ValueSlot::Annotation { list, index } => {
                &mut self.annotation_list_mut(list)[index as usize].value
            }
        }
    }
}

/// Check an unsigned literal against the target type.
fn compile_unsigned(value: u64, ty: &Type) -> Result<Value, TypeMismatch> {
    // Out-of-range is a mismatch, same as a wrong shape.
    match ty {
        Type::Int8 => i8::try_from(value).map(Value::Int8).map_err(|_| TypeMismatch),
        Type::Int16 => i16::try_from(value).map(Value::Int16).map_err(|_| TypeMismatch),
        Type::Int32 => i32::try_from(value).map(Value::Int32).map_err(|_| TypeMismatch),
        Type::Int64 => i64::try_from(value).map(Value::Int64).map_err(|_| TypeMismatch),
        Type::UInt8 => u8::try_from(value).map(Value::UInt8).map_err(|_| TypeMismatch),
        Type::UInt16 => u16::try_from(value).map(Value::UInt16).map_err(|_| TypeMismatch),
        Type::UInt32 => u32::try_from(value).map(Value::UInt32).map_err(|_| TypeMismatch),
        Type::UInt64 => Ok(Value::UInt64(value)),
        Type::Float32 => Ok(Value::Float32(value as f32)),
        Type::Float64 => Ok(Value::Float64(value as f64)),
        _ => Err(TypeMismatch),
    }
}

/// Check a signed literal against the target type.
fn compile_signed(value: i64, ty: &Type) -> Result<Value, TypeMismatch> {
    match ty {
        Type::Int8 => i8::try_from(value).map(Value::Int8).map_err(|_| TypeMismatch),
        Type::Int16 => i16::try_from(value).map(Value::Int16).map_err(|_| TypeMismatch),
        Type::Int32 => i32::try_from(value).map(Value::Int32).map_err(|_| TypeMismatch),
        Type::Int64 => Ok(Value::Int64(value)),
        Type::UInt8 => u8::try_from(value).map(Value::UInt8).map_err(|_| TypeMismatch),
        Type::UInt16 => u16::try_from(value).map(Value::UInt16).map_err(|_| TypeMismatch),
        Type::UInt32 => u32::try_from(value).map(Value::UInt32).map_err(|_| TypeMismatch),
        Type::UInt64 => u64::try_from(value).map(Value::UInt64).map_err(|_| TypeMismatch),
        Type::Float32 => Ok(Value::Float32(value as f32)),
        Type::Float64 => Ok(Value::Float64(value as f64)),
        _ => Err(TypeMismatch),
    }
}

/// Convert a constant's value from its declared type to the target type.
/// Numeric conversions are range-checked; everything else must match
/// structurally, except that any-pointer values re-type against a concrete
/// pointer target and concrete pointer values satisfy an any-pointer
/// target.
fn coerce_constant(value: Value, from: &Type, to: &Type) -> Result<Value, TypeMismatch> {
    if from == to {
        return Ok(value);
    }

    // Numeric conversions are range-checked through the literal paths.
    if let Some(wide) = as_int(&value) {
        return match i64::try_from(wide) {
            Ok(signed) => compile_signed(signed, to),
            Err(_) => compile_unsigned(wide as u64, to),
        };
    }

    match (value, to) {
        (Value::Float32(inner), Type::Float64) => Ok(Value::Float64(f64::from(inner))),
        (Value::Float64(inner), Type::Float32) => Ok(Value::Float32(inner as f32)),

        // An any-pointer constant re-types against a concrete pointer
        // target.
        (
            Value::AnyPointer(Some(payload)),
            Type::Struct(_) | Type::List(_) | Type::Text | Type::Data,
        ) => Ok(*payload),
        (
            Value::AnyPointer(None),
            Type::Struct(_) | Type::List(_) | Type::Text | Type::Data,
        ) => Ok(default_value(to)),

        // Any pointer value satisfies an any-pointer target.
        (value, Type::AnyPointer) if from.is_pointer() => {
            Ok(Value::AnyPointer(Some(Box::new(value))))
        }

        _ => Err(TypeMismatch),
    }
}

fn as_int(value: &Value) -> Option<i128> {
    match value {
        Value::Int8(inner) => Some(i128::from(*inner)),
        Value::Int16(inner) => Some(i128::from(*inner)),
        Value::Int32(inner) => Some(i128::from(*inner)),
        Value::Int64(inner) => Some(i128::from(*inner)),
        Value::UInt8(inner) => Some(i128::from(*inner)),
        Value::UInt16(inner) => Some(i128::from(*inner)),
        Value::UInt32(inner) => Some(i128::from(*inner)),
        Value::UInt64(inner) => Some(i128::from(*inner)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_zeroes() {
        assert_eq!(default_value(&Type::Bool), Value::Bool(false));
        assert_eq!(default_value(&Type::UInt32), Value::UInt32(0));
        assert_eq!(default_value(&Type::Text), Value::Text(String::new()));
        assert_eq!(default_value(&Type::Enum(7)), Value::Enum(0));
        assert_eq!(default_value(&Type::AnyPointer), Value::AnyPointer(None));
        assert_eq!(
            default_value(&Type::List(Box::new(Type::UInt8))),
            Value::List(Vec::new())
        );
    }

    #[test]
    fn unsigned_literals_are_bounds_checked() {
        assert!(matches!(compile_unsigned(127, &Type::Int8), Ok(Value::Int8(127))));
        assert!(compile_unsigned(128, &Type::Int8).is_err());
        assert!(matches!(
            compile_unsigned(65_535, &Type::UInt16),
            Ok(Value::UInt16(65_535))
        ));
        assert!(compile_unsigned(65_536, &Type::UInt16).is_err());
        assert!(compile_unsigned(1, &Type::Text).is_err());
    }

    #[test]
    fn signed_literals_are_bounds_checked() {
        assert!(matches!(compile_signed(-128, &Type::Int8), Ok(Value::Int8(-128))));
        assert!(compile_signed(-129, &Type::Int8).is_err());
        assert!(compile_signed(-1, &Type::UInt32).is_err());
        assert!(matches!(compile_signed(0, &Type::UInt32), Ok(Value::UInt32(0))));
        assert!(matches!(
            compile_signed(i64::MIN, &Type::Int64),
            Ok(Value::Int64(i64::MIN))
        ));
    }

    #[test]
    fn constants_convert_between_numeric_types() {
        assert!(matches!(
            coerce_constant(Value::Int32(12), &Type::Int32, &Type::Int64),
            Ok(Value::Int64(12))
        ));
        assert!(matches!(
            coerce_constant(Value::UInt64(u64::MAX), &Type::UInt64, &Type::UInt64),
            Ok(Value::UInt64(u64::MAX))
        ));
        assert!(coerce_constant(Value::Int32(-1), &Type::Int32, &Type::UInt8).is_err());
        assert!(matches!(
            coerce_constant(Value::UInt8(3), &Type::UInt8, &Type::Float64),
            Ok(Value::Float64(_))
        ));
    }

    #[test]
    fn any_pointer_constants_retype() {
        let payload = Value::Struct(vec![]);
        let coerced = coerce_constant(
            Value::AnyPointer(Some(Box::new(payload.clone()))),
            &Type::AnyPointer,
            &Type::Struct(42),
        );
        assert!(matches!(coerced, Ok(value) if value == payload));

        let wrapped = coerce_constant(Value::Text("hi".into()), &Type::Text, &Type::AnyPointer);
        assert!(matches!(wrapped, Ok(Value::AnyPointer(Some(_)))));

        assert!(coerce_constant(Value::Bool(true), &Type::Bool, &Type::AnyPointer).is_err());
    }
}
