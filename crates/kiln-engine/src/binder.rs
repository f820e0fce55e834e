//! Value coercion and member lookup for bean actions.

use std::any::Any;

use crate::bean::{FieldKind, MemberTable, Value};
use crate::error::EngineError;
use crate::suggest;

/// Convert `raw` to the type declared by `kind`.
///
/// On failure, returns a description of what was expected.
pub fn coerce(kind: &FieldKind, raw: &str, append: bool) -> Result<Value, String> {
    if append && *kind != FieldKind::List {
        return Err("a list field for `+=`".to_owned());
    }
    match kind {
        FieldKind::Flag => match raw.to_ascii_lowercase().as_str() {
            "" | "true" => Ok(Value::Flag(true)),
            "false" => Ok(Value::Flag(false)),
            _ => Err("`true` or `false`".to_owned()),
        },
        FieldKind::Integer => raw
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| "an integer".to_owned()),
        FieldKind::Text | FieldKind::OptionalText => Ok(Value::Text(raw.to_owned())),
        FieldKind::Choice(names) => names
            .iter()
            .position(|name| *name == raw)
            .map(Value::Choice)
            .ok_or_else(|| format!("one of {}", names.join(", "))),
        FieldKind::List => {
            let items: Vec<String> = raw
                .split([',', ' '])
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_owned)
                .collect();
            Ok(if append {
                Value::Append(items)
            } else {
                Value::List(items)
            })
        }
    }
}

fn unknown_member(table: &dyn MemberTable, bean: &str, member: &str) -> EngineError {
    let names = table.field_names().into_iter().chain(table.method_names());
    EngineError::UnknownMember {
        bean: bean.to_owned(),
        member: member.to_owned(),
        hint: suggest::hint(&suggest::similar(member, names)),
    }
}

/// Look up field `member` of `bean` and coerce `raw` for it.
///
/// # Errors
/// Returns `UnknownMember` when the field does not exist and `InvalidValue`
/// when `raw` does not fit its type.
pub fn field_value(
    table: &dyn MemberTable,
    bean: &str,
    member: &str,
    raw: &str,
    append: bool,
) -> Result<Value, EngineError> {
    let Some(kind) = table.field_kind(member) else {
        return Err(unknown_member(table, bean, member));
    };
    coerce(kind, raw, append).map_err(|expected| EngineError::InvalidValue {
        bean: bean.to_owned(),
        member: member.to_owned(),
        value: raw.to_owned(),
        expected,
    })
}

/// Check that `bean` has a method named `member`.
///
/// # Errors
/// Returns `UnknownMember` with suggestions when it does not.
pub fn check_method(table: &dyn MemberTable, bean: &str, member: &str) -> Result<(), EngineError> {
    if table.has_method(member) {
        Ok(())
    } else {
        Err(unknown_member(table, bean, member))
    }
}

/// Coerce `raw` and store it into field `member` of `instance`.
///
/// # Errors
/// Returns the errors of [`field_value`].
pub fn set_field(
    table: &dyn MemberTable,
    instance: &mut dyn Any,
    bean: &str,
    member: &str,
    raw: &str,
    append: bool,
) -> Result<(), EngineError> {
    let value = field_value(table, bean, member, raw, append)?;
    if table.set_field(instance, member, value) {
        Ok(())
    } else {
        Err(EngineError::bean(bean, format!("cannot assign `{member}`")))
    }
}
