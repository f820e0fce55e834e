//! The `KBean` trait and the member tables that bind names to bean fields and methods.
//!
//! A bean describes its configurable members once, in [`KBean::schema`], by
//! registering a setter per dotted field path and a function per method. The
//! resulting [`BeanSchema`] is kept type-erased behind [`MemberTable`] so the
//! engine can bind command-line actions without knowing the bean's type.

use std::any::Any;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::context::RunContext;
use crate::error::EngineError;

/// A pluggable unit exposing configurable fields and invocable methods.
///
/// One instance per type is created per run, by [`KBean::create`], then
/// configured from properties, then initialized with [`KBean::init`].
pub trait KBean: Any + Sized {
    /// Register the fields and methods reachable from the command line.
    fn schema(schema: &mut BeanSchema<Self>);

    /// Build the instance with its defaults.
    ///
    /// # Errors
    /// Returns an error if the bean cannot be constructed for this project.
    fn create(ctx: &RunContext) -> Result<Self, EngineError>;

    /// Called once after property injection, before any command-line action.
    ///
    /// Other beans may be loaded and post-init hooks registered from here.
    ///
    /// # Errors
    /// Returns an error if initialization fails; the run is aborted.
    fn init(&mut self, _ctx: &mut RunContext) -> Result<(), EngineError> {
        Ok(())
    }
}

/// An enum whose constants can be named on the command line.
pub trait BeanEnum: Copy + 'static {
    /// Constants and their exact names, in declaration order.
    const CONSTANTS: &'static [(&'static str, Self)];
}

/// Declared type of a field, which drives value coercion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Flag,
    Integer,
    Text,
    OptionalText,
    /// Constant names of a [`BeanEnum`].
    Choice(Vec<&'static str>),
    List,
}

/// A coerced value ready to be stored into a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Flag(bool),
    Integer(i64),
    Text(String),
    /// Index into the enum's constants.
    Choice(usize),
    /// Replaces the list.
    List(Vec<String>),
    /// Extends the list (`key+=value`).
    Append(Vec<String>),
}

type Setter<B> = Rc<dyn Fn(&mut B, Value)>;

/// Signature of a bean method reachable from the command line.
pub type Method<B> = fn(&mut B, &mut RunContext) -> Result<(), EngineError>;

struct Field<B> {
    kind: FieldKind,
    set: Setter<B>,
}

/// Explicit table of a bean type's fields and methods.
pub struct BeanSchema<B> {
    fields: BTreeMap<String, Field<B>>,
    methods: BTreeMap<String, Method<B>>,
}

impl<B: 'static> Default for BeanSchema<B> {
    fn default() -> Self {
        Self {
            fields: BTreeMap::new(),
            methods: BTreeMap::new(),
        }
    }
}

impl<B: 'static> BeanSchema<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The schema a [`KBean`] declares for itself.
    pub fn of() -> Self
    where
        B: KBean,
    {
        let mut schema = Self::new();
        B::schema(&mut schema);
        schema
    }

    fn field(&mut self, path: &str, kind: FieldKind, set: impl Fn(&mut B, Value) + 'static) -> &mut Self {
        self.fields.insert(
            path.to_owned(),
            Field {
                kind,
                set: Rc::new(set),
            },
        );
        self
    }

    /// A boolean field; a bare token or an empty value sets it to `true`.
    pub fn flag(&mut self, path: &str, access: impl Fn(&mut B) -> &mut bool + 'static) -> &mut Self {
        self.field(path, FieldKind::Flag, move |bean, value| {
            if let Value::Flag(v) = value {
                *access(bean) = v;
            }
        })
    }

    pub fn integer(&mut self, path: &str, access: impl Fn(&mut B) -> &mut i64 + 'static) -> &mut Self {
        self.field(path, FieldKind::Integer, move |bean, value| {
            if let Value::Integer(v) = value {
                *access(bean) = v;
            }
        })
    }

    pub fn text(&mut self, path: &str, access: impl Fn(&mut B) -> &mut String + 'static) -> &mut Self {
        self.field(path, FieldKind::Text, move |bean, value| {
            if let Value::Text(v) = value {
                *access(bean) = v;
            }
        })
    }

    /// A text field where an empty value clears it.
    pub fn optional_text(
        &mut self,
        path: &str,
        access: impl Fn(&mut B) -> &mut Option<String> + 'static,
    ) -> &mut Self {
        self.field(path, FieldKind::OptionalText, move |bean, value| {
            if let Value::Text(v) = value {
                *access(bean) = (!v.is_empty()).then_some(v);
            }
        })
    }

    /// An enum field, set by the exact name of one of its constants.
    pub fn choice<E: BeanEnum>(&mut self, path: &str, access: impl Fn(&mut B) -> &mut E + 'static) -> &mut Self {
        let names = E::CONSTANTS.iter().map(|(name, _)| *name).collect();
        self.field(path, FieldKind::Choice(names), move |bean, value| {
            if let Value::Choice(index) = value {
                if let Some((_, constant)) = E::CONSTANTS.get(index) {
                    *access(bean) = *constant;
                }
            }
        })
    }

    /// A multi-valued field: comma or space separated, `+=` appends.
    pub fn list(&mut self, path: &str, access: impl Fn(&mut B) -> &mut Vec<String> + 'static) -> &mut Self {
        self.field(path, FieldKind::List, move |bean, value| match value {
            Value::List(items) => *access(bean) = items,
            Value::Append(items) => access(bean).extend(items),
            _ => {}
        })
    }

    /// The fields of a nested configuration object, registered under `prefix.`.
    ///
    /// The nested object must already exist in the bean; it is reached
    /// through `access` for every assignment.
    pub fn nested<N: 'static>(
        &mut self,
        prefix: &str,
        access: impl Fn(&mut B) -> &mut N + 'static,
        build: impl FnOnce(&mut BeanSchema<N>),
    ) -> &mut Self {
        let mut inner = BeanSchema::<N>::new();
        build(&mut inner);
        let access = Rc::new(access);
        for (path, field) in inner.fields {
            let access = Rc::clone(&access);
            let set = field.set;
            self.field(&format!("{prefix}.{path}"), field.kind, move |bean, value| {
                set(access(bean), value);
            });
        }
        self
    }

    /// A method taking no arguments besides the run context.
    pub fn method(&mut self, name: &str, method: Method<B>) -> &mut Self {
        self.methods.insert(name.to_owned(), method);
        self
    }
}

/// Type-erased view of a [`BeanSchema`].
pub trait MemberTable {
    fn field_kind(&self, path: &str) -> Option<&FieldKind>;

    /// Field paths, sorted.
    fn field_names(&self) -> Vec<&str>;

    fn has_method(&self, name: &str) -> bool;

    /// Method names, sorted.
    fn method_names(&self) -> Vec<&str>;

    /// Store `value` into field `path` of `bean`.
    ///
    /// Returns `false` if the field does not exist or `bean` is of another type.
    fn set_field(&self, bean: &mut dyn Any, path: &str, value: Value) -> bool;

    /// Invoke method `name` on `bean`, or `None` if there is no such method.
    fn call(
        &self,
        bean: &mut dyn Any,
        name: &str,
        ctx: &mut RunContext,
    ) -> Option<Result<(), EngineError>>;
}

impl<B: 'static> MemberTable for BeanSchema<B> {
    fn field_kind(&self, path: &str) -> Option<&FieldKind> {
        self.fields.get(path).map(|field| &field.kind)
    }

    fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    fn method_names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }

    fn set_field(&self, bean: &mut dyn Any, path: &str, value: Value) -> bool {
        match (self.fields.get(path), bean.downcast_mut::<B>()) {
            (Some(field), Some(bean)) => {
                (field.set)(bean, value);
                true
            }
            _ => false,
        }
    }

    fn call(
        &self,
        bean: &mut dyn Any,
        name: &str,
        ctx: &mut RunContext,
    ) -> Option<Result<(), EngineError>> {
        let method = self.methods.get(name)?;
        let bean = bean.downcast_mut::<B>()?;
        Some(method(bean, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Mode {
        Fast,
        Safe,
    }

    impl BeanEnum for Mode {
        const CONSTANTS: &'static [(&'static str, Self)] = &[("FAST", Self::Fast), ("SAFE", Self::Safe)];
    }

    #[derive(Debug)]
    struct Limits {
        retries: i64,
        mode: Mode,
    }

    #[derive(Debug)]
    struct Sample {
        name: String,
        label: Option<String>,
        quiet: bool,
        tags: Vec<String>,
        limits: Limits,
    }

    fn sample() -> Sample {
        Sample {
            name: "a".to_owned(),
            label: Some("l".to_owned()),
            quiet: false,
            tags: vec!["x".to_owned()],
            limits: Limits {
                retries: 1,
                mode: Mode::Safe,
            },
        }
    }

    fn schema() -> BeanSchema<Sample> {
        let mut schema = BeanSchema::new();
        schema
            .text("name", |s: &mut Sample| &mut s.name)
            .optional_text("label", |s: &mut Sample| &mut s.label)
            .flag("quiet", |s: &mut Sample| &mut s.quiet)
            .list("tags", |s: &mut Sample| &mut s.tags)
            .nested("limits", |s: &mut Sample| &mut s.limits, |limits| {
                limits
                    .integer("retries", |l: &mut Limits| &mut l.retries)
                    .choice("mode", |l: &mut Limits| &mut l.mode);
            });
        schema
    }

    #[test]
    fn nested_paths_registered() {
        let schema = schema();
        assert_eq!(
            schema.field_names(),
            vec!["label", "limits.mode", "limits.retries", "name", "quiet", "tags"]
        );
        assert_eq!(
            schema.field_kind("limits.mode"),
            Some(&FieldKind::Choice(vec!["FAST", "SAFE"]))
        );
    }

    #[test]
    fn setters_write_through_nested_objects() {
        let schema = schema();
        let mut bean = sample();
        assert!(schema.set_field(&mut bean, "limits.retries", Value::Integer(5)));
        assert!(schema.set_field(&mut bean, "limits.mode", Value::Choice(0)));
        assert!(schema.set_field(&mut bean, "quiet", Value::Flag(true)));
        assert!(schema.set_field(&mut bean, "name", Value::Text("b".to_owned())));
        assert!(schema.set_field(&mut bean, "label", Value::Text(String::new())));
        assert_eq!(bean.limits.retries, 5);
        assert_eq!(bean.limits.mode, Mode::Fast);
        assert!(bean.quiet);
        assert_eq!(bean.name, "b");
        assert_eq!(bean.label, None);
    }

    #[test]
    fn list_replace_and_append() {
        let schema = schema();
        let mut bean = sample();
        schema.set_field(&mut bean, "tags", Value::Append(vec!["y".to_owned()]));
        assert_eq!(bean.tags, vec!["x", "y"]);
        schema.set_field(&mut bean, "tags", Value::List(vec!["z".to_owned()]));
        assert_eq!(bean.tags, vec!["z"]);
    }

    #[test]
    fn unknown_field_or_wrong_type_not_set() {
        let schema = schema();
        let mut bean = sample();
        assert!(!schema.set_field(&mut bean, "missing", Value::Flag(true)));
        let mut other = 5_u8;
        assert!(!schema.set_field(&mut other, "quiet", Value::Flag(true)));
    }
}
