//! Bean discovery and name resolution.
//!
//! Rust has no classpath to scan, so the bean types visible to a run are
//! registered explicitly in a [`BeanCatalog`]: the standard beans shipped with
//! Kiln plus the project-local beans of a custom build binary.

use std::any::{Any, TypeId};
use std::rc::Rc;

use tracing::debug;

use crate::bean::{BeanSchema, KBean, MemberTable};
use crate::context::RunContext;
use crate::error::EngineError;
use crate::suggest;

const BEAN_SUFFIX: &str = "KBean";

/// Where a bean type comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeanOrigin {
    /// Shipped with Kiln.
    Standard,
    /// Defined by the project being built.
    Local,
}

type CreateFn = fn(&RunContext) -> Result<Box<dyn Any>, EngineError>;
type InitFn = fn(&mut dyn Any, &mut RunContext) -> Result<(), EngineError>;

fn create_erased<B: KBean>(ctx: &RunContext) -> Result<Box<dyn Any>, EngineError> {
    Ok(Box::new(B::create(ctx)?))
}

fn init_erased<B: KBean>(bean: &mut dyn Any, ctx: &mut RunContext) -> Result<(), EngineError> {
    match bean.downcast_mut::<B>() {
        Some(bean) => bean.init(ctx),
        None => Err(EngineError::bean(
            std::any::type_name::<B>(),
            "instance has an unexpected type",
        )),
    }
}

/// Everything the engine knows about one bean type.
#[derive(Clone)]
pub struct BeanDescriptor {
    class_name: String,
    simple_name: String,
    short_name: String,
    origin: BeanOrigin,
    type_id: TypeId,
    table: Rc<dyn MemberTable>,
    create: CreateFn,
    init: InitFn,
}

impl BeanDescriptor {
    pub fn of<B: KBean>(origin: BeanOrigin) -> Self {
        let class_name = std::any::type_name::<B>().to_owned();
        let simple_name = class_name
            .rsplit("::")
            .next()
            .unwrap_or(class_name.as_str())
            .to_owned();
        let short_name = uncapitalize(simple_name.strip_suffix(BEAN_SUFFIX).unwrap_or(simple_name.as_str()));
        Self {
            class_name,
            simple_name,
            short_name,
            origin,
            type_id: TypeId::of::<B>(),
            table: Rc::new(BeanSchema::<B>::of()),
            create: create_erased::<B>,
            init: init_erased::<B>,
        }
    }

    /// Full type path, e.g. `kiln_engine::builtins::project::ProjectKBean`.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Type name without its path, e.g. `ProjectKBean`.
    pub fn simple_name(&self) -> &str {
        &self.simple_name
    }

    /// Name used on the command line and in properties, e.g. `project`.
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn origin(&self) -> BeanOrigin {
        self.origin
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn table(&self) -> &dyn MemberTable {
        self.table.as_ref()
    }

    /// Whether `name` is one of the exact forms this bean answers to.
    pub fn answers_to(&self, name: &str) -> bool {
        name == self.class_name
            || name == self.simple_name
            || name == uncapitalize(&self.simple_name)
            || name == self.short_name
            || name == capitalize(&self.short_name)
    }

    pub(crate) fn create(&self, ctx: &RunContext) -> Result<Box<dyn Any>, EngineError> {
        (self.create)(ctx)
    }

    pub(crate) fn init(&self, bean: &mut dyn Any, ctx: &mut RunContext) -> Result<(), EngineError> {
        (self.init)(bean, ctx)
    }
}

impl std::fmt::Debug for BeanDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanDescriptor")
            .field("class_name", &self.class_name)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

fn uncapitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// The bean types available to a run.
#[derive(Debug, Clone, Default)]
pub struct BeanCatalog {
    beans: Vec<BeanDescriptor>,
    /// Default bean when nothing else designates one.
    fallback: Option<TypeId>,
}

impl BeanCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `B`. Registering the same type twice has no effect.
    pub fn register<B: KBean>(&mut self, origin: BeanOrigin) -> &mut Self {
        if self.by_type(TypeId::of::<B>()).is_none() {
            self.beans.push(BeanDescriptor::of::<B>(origin));
        }
        self
    }

    pub fn with<B: KBean>(mut self, origin: BeanOrigin) -> Self {
        self.register::<B>(origin);
        self
    }

    /// Make `B` the default bean of last resort, registering it as standard.
    pub fn with_fallback<B: KBean>(mut self) -> Self {
        self.register::<B>(BeanOrigin::Standard);
        self.fallback = Some(TypeId::of::<B>());
        self
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> &[BeanDescriptor] {
        &self.beans
    }

    pub fn by_class(&self, class_name: &str) -> Option<&BeanDescriptor> {
        self.beans.iter().find(|b| b.class_name == class_name)
    }

    pub fn by_type(&self, type_id: TypeId) -> Option<&BeanDescriptor> {
        self.beans.iter().find(|b| b.type_id == type_id)
    }

    pub fn fallback(&self) -> Option<&BeanDescriptor> {
        self.fallback.and_then(|id| self.by_type(id))
    }

    /// Resolve a bean name as written by a user.
    ///
    /// Exact forms (type path, simple name, short name and their
    /// capitalization variants) are tried first, then a unique prefix of a
    /// short name.
    ///
    /// # Errors
    /// Returns `AmbiguousBean` if several beans match, `UnresolvedBean` with
    /// suggestions if none does.
    pub fn find(&self, name: &str) -> Result<&BeanDescriptor, EngineError> {
        let exact: Vec<&BeanDescriptor> = self.beans.iter().filter(|b| b.answers_to(name)).collect();
        let matches = if exact.is_empty() {
            self.beans
                .iter()
                .filter(|b| !name.is_empty() && b.short_name.starts_with(name))
                .collect()
        } else {
            exact
        };
        match matches.as_slice() {
            [single] => Ok(*single),
            [] => Err(EngineError::UnresolvedBean {
                name: name.to_owned(),
                hint: suggest::hint(&suggest::similar(
                    name,
                    self.beans.iter().map(|b| b.short_name.as_str()),
                )),
            }),
            several => {
                let mut candidates: Vec<&str> = several.iter().map(|b| b.class_name.as_str()).collect();
                candidates.sort_unstable();
                Err(EngineError::AmbiguousBean {
                    name: name.to_owned(),
                    candidates: candidates.join(", "),
                })
            }
        }
    }
}

/// Which beans exist in a run, which is the default and which runs first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KBeanResolution {
    /// Type paths of every registered bean, sorted.
    pub all: Vec<String>,
    /// Type paths of the local beans, sorted.
    pub local: Vec<String>,
    /// Bean instantiated first, before the default one.
    pub init: Option<String>,
    /// Bean receiving the actions written before any `name:` switch.
    pub default: Option<String>,
}

impl KBeanResolution {
    /// Compute the resolution for `catalog`.
    ///
    /// The default bean is `requested_default` if given, else the only local
    /// bean, else the catalog's fallback. The init bean is the default bean
    /// when it is local, else the first local bean, else none.
    ///
    /// # Errors
    /// Returns an error if `requested_default` does not name exactly one bean.
    pub fn compute(catalog: &BeanCatalog, requested_default: Option<&str>) -> Result<Self, EngineError> {
        let mut all: Vec<String> = catalog
            .descriptors()
            .iter()
            .map(|b| b.class_name.clone())
            .collect();
        all.sort_unstable();
        let mut local: Vec<String> = catalog
            .descriptors()
            .iter()
            .filter(|b| b.origin == BeanOrigin::Local)
            .map(|b| b.class_name.clone())
            .collect();
        local.sort_unstable();

        let default = match requested_default {
            Some(name) => Some(catalog.find(name)?.class_name.clone()),
            None => match local.as_slice() {
                [only] => Some(only.clone()),
                _ => catalog.fallback().map(|b| b.class_name.clone()),
            },
        };
        let init = match &default {
            Some(name) if local.contains(name) => Some(name.clone()),
            _ => local.first().cloned(),
        };
        debug!(default = ?default, init = ?init, beans = all.len(), "resolved beans");
        Ok(Self {
            all,
            local,
            init,
            default,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;
    use crate::builtins::{ProjectKBean, QualityKBean};

    /// A project-local bean for tests.
    #[derive(Debug, Default)]
    pub(crate) struct ProjectorKBean {
        pub(crate) lens: String,
    }

    impl KBean for ProjectorKBean {
        fn schema(schema: &mut BeanSchema<Self>) {
            schema.text("lens", |p: &mut Self| &mut p.lens);
        }

        fn create(_ctx: &RunContext) -> Result<Self, EngineError> {
            Ok(Self::default())
        }
    }

    /// A second local bean.
    #[derive(Debug, Default)]
    pub(crate) struct DocsKBean;

    impl KBean for DocsKBean {
        fn schema(_schema: &mut BeanSchema<Self>) {}

        fn create(_ctx: &RunContext) -> Result<Self, EngineError> {
            Ok(Self)
        }
    }

    fn standard() -> BeanCatalog {
        BeanCatalog::new()
            .with_fallback::<ProjectKBean>()
            .with::<QualityKBean>(BeanOrigin::Standard)
    }

    #[test]
    fn names_derived_from_type() {
        let descriptor = BeanDescriptor::of::<ProjectKBean>(BeanOrigin::Standard);
        assert_eq!(descriptor.simple_name(), "ProjectKBean");
        assert_eq!(descriptor.short_name(), "project");
        assert!(descriptor.class_name().ends_with("::ProjectKBean"));
    }

    #[test]
    fn every_name_form_resolves() {
        let catalog = standard();
        let class = catalog.by_type(TypeId::of::<ProjectKBean>()).unwrap().class_name().to_owned();
        for name in [class.as_str(), "ProjectKBean", "projectKBean", "project", "Project", "proj"] {
            assert_eq!(catalog.find(name).unwrap().class_name(), class, "name {name}");
        }
    }

    #[test]
    fn ambiguous_prefix_lists_candidates() {
        let catalog = standard().with::<ProjectorKBean>(BeanOrigin::Local);
        let err = catalog.find("proj").unwrap_err();
        let EngineError::AmbiguousBean { candidates, .. } = &err else {
            unreachable!("expected ambiguity, got {err}");
        };
        assert!(candidates.contains("ProjectKBean") && candidates.contains("ProjectorKBean"));
        assert!(catalog.find("project").is_ok());
    }

    #[test]
    fn unresolved_name_suggests() {
        let err = standard().find("qualty").unwrap_err();
        assert_eq!(err.to_string(), "no bean named `qualty`; did you mean `quality`?");
    }

    #[test]
    fn fallback_is_default_without_locals() {
        let resolution = KBeanResolution::compute(&standard(), None).unwrap();
        assert!(resolution.default.unwrap().ends_with("::ProjectKBean"));
        assert_eq!(resolution.init, None);
        assert_eq!(resolution.all.len(), 2);
        assert!(resolution.local.is_empty());
    }

    #[test]
    fn single_local_bean_is_default_and_init() {
        let catalog = standard().with::<ProjectorKBean>(BeanOrigin::Local);
        let resolution = KBeanResolution::compute(&catalog, None).unwrap();
        assert!(resolution.default.as_deref().unwrap().ends_with("::ProjectorKBean"));
        assert_eq!(resolution.init, resolution.default);
    }

    #[test]
    fn explicit_default_wins_and_init_is_first_local() {
        let catalog = standard()
            .with::<ProjectorKBean>(BeanOrigin::Local)
            .with::<DocsKBean>(BeanOrigin::Local);
        let resolution = KBeanResolution::compute(&catalog, Some("quality")).unwrap();
        assert!(resolution.default.as_deref().unwrap().ends_with("::QualityKBean"));
        assert!(resolution.init.as_deref().unwrap().ends_with("::DocsKBean"));

        let two_locals = KBeanResolution::compute(&catalog, None).unwrap();
        assert!(two_locals.default.as_deref().unwrap().ends_with("::ProjectKBean"));
    }

    #[test]
    fn unknown_requested_default_rejected() {
        let err = KBeanResolution::compute(&standard(), Some("nope")).unwrap_err();
        assert!(matches!(err, EngineError::UnresolvedBean { .. }));
    }
}
