//! Run-scoped state shared by every bean of one invocation.
//!
//! A [`RunContext`] owns the layered properties, the manifest, the dependency
//! resolver and one instance per bean type. Bean instances live in slots; a
//! slot whose instance is absent belongs to a bean that is either still being
//! constructed or currently executing, which is how construction cycles and
//! re-entrant borrows are detected.

use std::any::{Any, TypeId};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use kiln_config::{Manifest, Properties};
use kiln_deps::{
    DependencyResolver, DependencySet, RepositorySet, Resolution, ResolveParameters, ScopeGraph,
};
use tracing::{debug, warn};

use crate::behavior::BehaviorSettings;
use crate::bean::KBean;
use crate::binder;
use crate::commandline::{ActionKind, KBeanAction};
use crate::engine::SubBuilder;
use crate::error::EngineError;
use crate::registry::{BeanCatalog, BeanDescriptor, KBeanResolution};

type PostInitHook = Box<dyn FnOnce(&mut RunContext) -> Result<(), EngineError>>;

struct BeanSlot {
    type_id: TypeId,
    class_name: String,
    instance: Option<Box<dyn Any>>,
}

/// State of one run: configuration, resolver and bean instances.
pub struct RunContext {
    root: PathBuf,
    properties: Properties,
    manifest: Option<Manifest>,
    settings: BehaviorSettings,
    resolver: DependencyResolver,
    catalog: Rc<BeanCatalog>,
    resolution: KBeanResolution,
    slots: Vec<BeanSlot>,
    /// Beans under construction, outermost first.
    creating: Vec<String>,
    hooks: Vec<PostInitHook>,
    hooks_done: bool,
    /// Project roots of the enclosing builds, this one last.
    ancestors: Vec<PathBuf>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    pub fn new(root: PathBuf, catalog: Rc<BeanCatalog>, resolution: KBeanResolution) -> Self {
        Self {
            ancestors: vec![root.clone()],
            root,
            properties: Properties::new(),
            manifest: None,
            settings: BehaviorSettings::default(),
            resolver: DependencyResolver::new(RepositorySet::new()),
            catalog,
            resolution,
            slots: Vec::new(),
            creating: Vec::new(),
            hooks: Vec::new(),
            hooks_done: false,
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_manifest(mut self, manifest: Option<Manifest>) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn with_settings(mut self, settings: BehaviorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_resolver(mut self, resolver: DependencyResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Record the projects whose builds enclose this one, outermost first.
    pub fn with_ancestors(mut self, mut outer: Vec<PathBuf>) -> Self {
        outer.push(self.root.clone());
        self.ancestors = outer;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// The project manifest, absent when the directory has no `kiln.toml`.
    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    pub fn settings(&self) -> &BehaviorSettings {
        &self.settings
    }

    pub fn resolution(&self) -> &KBeanResolution {
        &self.resolution
    }

    pub fn catalog(&self) -> &BeanCatalog {
        &self.catalog
    }

    pub fn scopes(&self) -> &ScopeGraph {
        self.resolver.scopes()
    }

    pub fn resolver_mut(&mut self) -> &mut DependencyResolver {
        &mut self.resolver
    }

    /// Project roots of the build stack, this project last.
    pub fn ancestors(&self) -> &[PathBuf] {
        &self.ancestors
    }

    /// Type paths of the instantiated beans, in instantiation order.
    pub fn active_beans(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.class_name.as_str()).collect()
    }

    pub fn is_active(&self, class_name: &str) -> bool {
        self.slots.iter().any(|slot| slot.class_name == class_name)
    }

    /// The instance of `B`, if it exists and is not in use.
    pub fn bean<B: KBean>(&self) -> Option<&B> {
        self.slots
            .iter()
            .find(|slot| slot.type_id == TypeId::of::<B>())?
            .instance
            .as_ref()?
            .downcast_ref::<B>()
    }

    pub fn bean_mut<B: KBean>(&mut self) -> Option<&mut B> {
        self.slots
            .iter_mut()
            .find(|slot| slot.type_id == TypeId::of::<B>())?
            .instance
            .as_mut()?
            .downcast_mut::<B>()
    }

    /// The instance of `B`, created on first use.
    ///
    /// # Errors
    /// Returns an error if `B` is not registered, is in use, or its
    /// construction fails or loops back on a bean being constructed.
    pub fn load<B: KBean>(&mut self) -> Result<&mut B, EngineError> {
        let catalog = Rc::clone(&self.catalog);
        let descriptor = descriptor_of::<B>(&catalog)?;
        self.instantiate_descriptor(descriptor)?;
        self.bean_mut::<B>().ok_or_else(|| EngineError::BeanBusy {
            bean: descriptor.short_name().to_owned(),
        })
    }

    /// Run `f` with the instance of `B` moved out of its slot, so that `f`
    /// can use the context at the same time.
    ///
    /// # Errors
    /// Returns the errors of [`RunContext::load`] and whatever `f` returns.
    pub fn with_bean<B: KBean, R>(
        &mut self,
        f: impl FnOnce(&mut B, &mut Self) -> Result<R, EngineError>,
    ) -> Result<R, EngineError> {
        let catalog = Rc::clone(&self.catalog);
        let descriptor = descriptor_of::<B>(&catalog)?;
        self.instantiate_descriptor(descriptor)?;
        let instance = self.take(descriptor)?;
        let mut bean = match instance.downcast::<B>() {
            Ok(bean) => bean,
            Err(other) => {
                self.put_back(descriptor, other);
                return Err(EngineError::bean(descriptor.short_name(), "instance has an unexpected type"));
            }
        };
        let result = f(&mut bean, self);
        self.put_back(descriptor, bean);
        result
    }

    /// Register `hook` to run against bean `B` once every bean of the run is
    /// constructed, before any command-line action is applied.
    ///
    /// Hooks run in registration order. A hook registered after that point
    /// runs as soon as the bean that registered it is constructed.
    pub fn post_init<B: KBean>(
        &mut self,
        hook: impl FnOnce(&mut B, &mut RunContext) -> Result<(), EngineError> + 'static,
    ) {
        self.hooks
            .push(Box::new(move |ctx: &mut RunContext| ctx.with_bean::<B, ()>(hook)));
    }

    /// Call method `method` of the bean answering to `bean`.
    ///
    /// # Errors
    /// Returns an error if the bean or method does not exist, the bean is in
    /// use, or the method fails (wrapped in `MethodFailed`).
    pub fn invoke(&mut self, bean: &str, method: &str) -> Result<(), EngineError> {
        let catalog = Rc::clone(&self.catalog);
        let descriptor = catalog.find(bean)?;
        binder::check_method(descriptor.table(), descriptor.short_name(), method)?;
        self.instantiate_descriptor(descriptor)?;
        let mut instance = self.take(descriptor)?;
        debug!(bean = descriptor.short_name(), method, "invoking");
        let outcome = descriptor.table().call(instance.as_mut(), method, self);
        self.put_back(descriptor, instance);
        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(source)) => Err(EngineError::MethodFailed {
                bean: descriptor.short_name().to_owned(),
                method: method.to_owned(),
                source: Box::new(source),
            }),
            None => Err(EngineError::bean(
                descriptor.short_name(),
                format!("cannot call `{method}`"),
            )),
        }
    }

    /// Resolve `set` for `scope`, building computed project dependencies
    /// with nested runs.
    ///
    /// # Errors
    /// Returns the resolver's errors.
    pub fn resolve(
        &mut self,
        set: &DependencySet,
        scope: &str,
        params: ResolveParameters,
    ) -> Result<Resolution, EngineError> {
        let mut builder = SubBuilder::new(Rc::clone(&self.catalog), self.ancestors.clone());
        Ok(self.resolver.resolve(set, scope, params, &mut builder)?)
    }

    /// Resolve `set` for `scope` into a classpath, using the file cache.
    ///
    /// # Errors
    /// Returns the resolver's errors.
    pub fn resolve_files(
        &mut self,
        set: &DependencySet,
        scope: &str,
        params: ResolveParameters,
    ) -> Result<Vec<PathBuf>, EngineError> {
        let mut builder = SubBuilder::new(Rc::clone(&self.catalog), self.ancestors.clone());
        Ok(self
            .resolver
            .resolve_files(set, scope, params, &mut builder)?)
    }

    /// Create the bean with type path `class_name` unless it already exists.
    pub(crate) fn instantiate(&mut self, class_name: &str) -> Result<(), EngineError> {
        let catalog = Rc::clone(&self.catalog);
        let descriptor = catalog.find(class_name)?;
        self.instantiate_descriptor(descriptor)
    }

    /// Run the pending post-init hooks, including hooks they register.
    pub(crate) fn run_post_init(&mut self) -> Result<(), EngineError> {
        while !self.hooks.is_empty() {
            let hooks = std::mem::take(&mut self.hooks);
            debug!(count = hooks.len(), "running post-init hooks");
            for hook in hooks {
                hook(self)?;
            }
        }
        self.hooks_done = true;
        Ok(())
    }

    /// Apply one parsed action.
    pub(crate) fn apply(&mut self, action: &KBeanAction) -> Result<(), EngineError> {
        let ActionKind::FieldSet { value, append } = &action.kind else {
            return self.invoke(&action.bean, &action.member);
        };
        let catalog = Rc::clone(&self.catalog);
        let descriptor = catalog.find(&action.bean)?;
        self.instantiate_descriptor(descriptor)?;
        debug!(action = %action, "applying");
        let instance = self
            .slots
            .iter_mut()
            .find(|slot| slot.type_id == descriptor.type_id())
            .and_then(|slot| slot.instance.as_deref_mut())
            .ok_or_else(|| EngineError::BeanBusy {
                bean: descriptor.short_name().to_owned(),
            })?;
        binder::set_field(
            descriptor.table(),
            instance,
            descriptor.short_name(),
            &action.member,
            value,
            *append,
        )
    }

    fn instantiate_descriptor(&mut self, descriptor: &BeanDescriptor) -> Result<(), EngineError> {
        if let Some(slot) = self.slots.iter().find(|s| s.type_id == descriptor.type_id()) {
            if slot.instance.is_some() {
                return Ok(());
            }
            if let Some(start) = self.creating.iter().position(|c| c == descriptor.class_name()) {
                let mut cycle: Vec<&str> = self
                    .creating
                    .iter()
                    .skip(start)
                    .map(|c| c.rsplit("::").next().unwrap_or(c.as_str()))
                    .collect();
                cycle.push(descriptor.simple_name());
                return Err(EngineError::BeanCycle {
                    cycle: cycle.join(" -> "),
                });
            }
            return Err(EngineError::BeanBusy {
                bean: descriptor.short_name().to_owned(),
            });
        }

        debug!(bean = descriptor.class_name(), "instantiating");
        self.slots.push(BeanSlot {
            type_id: descriptor.type_id(),
            class_name: descriptor.class_name().to_owned(),
            instance: None,
        });
        self.creating.push(descriptor.class_name().to_owned());
        let constructed = self.construct(descriptor);
        self.creating.pop();
        match constructed {
            Ok(instance) => self.put_back(descriptor, instance),
            Err(e) => {
                self.slots.retain(|slot| slot.type_id != descriptor.type_id());
                return Err(e);
            }
        }
        if self.hooks_done {
            self.run_post_init()?;
        }
        Ok(())
    }

    fn construct(&mut self, descriptor: &BeanDescriptor) -> Result<Box<dyn Any>, EngineError> {
        let mut instance = descriptor.create(self)?;
        let bean = descriptor.short_name();
        let prefix = format!("@{bean}.");
        for (member, raw) in self.properties.all_starting_with(&prefix, false) {
            if descriptor.table().field_kind(&member).is_none() {
                warn!(bean, member = %member, "ignoring property for unknown bean field");
                continue;
            }
            binder::set_field(descriptor.table(), instance.as_mut(), bean, &member, &raw, false)?;
            debug!(
                bean,
                member = %member,
                value = %Properties::display_value(&member, &raw),
                "injected property"
            );
        }
        descriptor.init(instance.as_mut(), self)?;
        Ok(instance)
    }

    fn take(&mut self, descriptor: &BeanDescriptor) -> Result<Box<dyn Any>, EngineError> {
        self.slots
            .iter_mut()
            .find(|slot| slot.type_id == descriptor.type_id())
            .and_then(|slot| slot.instance.take())
            .ok_or_else(|| EngineError::BeanBusy {
                bean: descriptor.short_name().to_owned(),
            })
    }

    fn put_back(&mut self, descriptor: &BeanDescriptor, instance: Box<dyn Any>) {
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|slot| slot.type_id == descriptor.type_id())
        {
            slot.instance = Some(instance);
        }
    }
}

fn descriptor_of<B: KBean>(catalog: &BeanCatalog) -> Result<&BeanDescriptor, EngineError> {
    catalog
        .by_type(TypeId::of::<B>())
        .ok_or_else(|| EngineError::UnresolvedBean {
            name: std::any::type_name::<B>().to_owned(),
            hint: " (the bean type is not registered)".to_owned(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use kiln_config::properties::PropertyLayer;

    use super::*;
    use crate::bean::BeanSchema;
    use crate::registry::BeanOrigin;

    #[derive(Debug, Default)]
    struct ChickenKBean;

    impl KBean for ChickenKBean {
        fn schema(_schema: &mut BeanSchema<Self>) {}

        fn create(_ctx: &RunContext) -> Result<Self, EngineError> {
            Ok(Self)
        }

        fn init(&mut self, ctx: &mut RunContext) -> Result<(), EngineError> {
            ctx.load::<EggKBean>()?;
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct EggKBean;

    impl KBean for EggKBean {
        fn schema(_schema: &mut BeanSchema<Self>) {}

        fn create(_ctx: &RunContext) -> Result<Self, EngineError> {
            Ok(Self)
        }

        fn init(&mut self, ctx: &mut RunContext) -> Result<(), EngineError> {
            ctx.load::<ChickenKBean>()?;
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct CounterKBean {
        count: i64,
        log: Vec<String>,
    }

    impl CounterKBean {
        fn bump(&mut self, _ctx: &mut RunContext) -> Result<(), EngineError> {
            self.count += 1;
            Ok(())
        }

        fn reenter(&mut self, ctx: &mut RunContext) -> Result<(), EngineError> {
            ctx.invoke("counter", "bump")
        }

        fn fail(&mut self, _ctx: &mut RunContext) -> Result<(), EngineError> {
            Err(EngineError::bean("counter", "boom"))
        }
    }

    impl KBean for CounterKBean {
        fn schema(schema: &mut BeanSchema<Self>) {
            schema
                .integer("count", |c: &mut Self| &mut c.count)
                .list("log", |c: &mut Self| &mut c.log)
                .method("bump", Self::bump)
                .method("reenter", Self::reenter)
                .method("fail", Self::fail);
        }

        fn create(_ctx: &RunContext) -> Result<Self, EngineError> {
            Ok(Self::default())
        }
    }

    #[derive(Debug, Default)]
    struct ListenerKBean;

    impl KBean for ListenerKBean {
        fn schema(_schema: &mut BeanSchema<Self>) {}

        fn create(_ctx: &RunContext) -> Result<Self, EngineError> {
            Ok(Self)
        }

        fn init(&mut self, ctx: &mut RunContext) -> Result<(), EngineError> {
            ctx.post_init::<CounterKBean>(|counter, _| {
                counter.log.push("first".to_owned());
                Ok(())
            });
            ctx.post_init::<CounterKBean>(|counter, ctx| {
                counter.log.push("second".to_owned());
                ctx.post_init::<CounterKBean>(|counter, _| {
                    counter.log.push("nested".to_owned());
                    Ok(())
                });
                Ok(())
            });
            Ok(())
        }
    }

    fn context(catalog: BeanCatalog) -> RunContext {
        let resolution = KBeanResolution::compute(&catalog, None).unwrap();
        RunContext::new(PathBuf::from("/work/app"), Rc::new(catalog), resolution)
    }

    fn counter_context() -> RunContext {
        context(
            BeanCatalog::new()
                .with::<CounterKBean>(BeanOrigin::Local)
                .with::<ListenerKBean>(BeanOrigin::Local),
        )
    }

    #[test]
    fn mutual_loading_is_a_cycle() {
        let mut ctx = context(
            BeanCatalog::new()
                .with::<ChickenKBean>(BeanOrigin::Local)
                .with::<EggKBean>(BeanOrigin::Local),
        );
        let err = ctx.load::<ChickenKBean>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "bean cycle: ChickenKBean -> EggKBean -> ChickenKBean"
        );
        assert!(ctx.active_beans().is_empty());
    }

    #[test]
    fn load_creates_once() {
        let mut ctx = counter_context();
        ctx.load::<CounterKBean>().unwrap().count = 7;
        assert_eq!(ctx.load::<CounterKBean>().unwrap().count, 7);
        assert_eq!(ctx.active_beans().len(), 1);
    }

    #[test]
    fn invoke_runs_method_and_reentry_is_busy() {
        let mut ctx = counter_context();
        ctx.invoke("counter", "bump").unwrap();
        assert_eq!(ctx.bean::<CounterKBean>().unwrap().count, 1);

        let err = ctx.invoke("counter", "reenter").unwrap_err();
        let EngineError::MethodFailed { source, .. } = &err else {
            unreachable!("expected a method failure, got {err}");
        };
        assert!(matches!(source.as_ref(), EngineError::BeanBusy { .. }));
        assert_eq!(ctx.bean::<CounterKBean>().unwrap().count, 1);
    }

    #[test]
    fn failing_method_wrapped() {
        let mut ctx = counter_context();
        let err = ctx.invoke("counter", "fail").unwrap_err();
        assert_eq!(err.to_string(), "counter#fail failed: counter: boom");
        assert!(ctx.bean::<CounterKBean>().is_some());
    }

    #[test]
    fn unknown_method_rejected_before_instantiation() {
        let mut ctx = counter_context();
        let err = ctx.invoke("counter", "bmp").unwrap_err();
        assert!(matches!(err, EngineError::UnknownMember { .. }));
        assert!(ctx.active_beans().is_empty());
    }

    #[test]
    fn post_init_hooks_run_in_registration_order() {
        let mut ctx = counter_context();
        ctx.load::<ListenerKBean>().unwrap();
        assert!(ctx.bean::<CounterKBean>().is_none());
        ctx.run_post_init().unwrap();
        assert_eq!(
            ctx.bean::<CounterKBean>().unwrap().log,
            vec!["first", "second", "nested"]
        );
    }

    #[test]
    fn late_hooks_run_on_construction() {
        let mut ctx = counter_context();
        ctx.run_post_init().unwrap();
        ctx.load::<ListenerKBean>().unwrap();
        assert_eq!(ctx.bean::<CounterKBean>().unwrap().log.len(), 3);
    }

    #[test]
    fn properties_injected_at_construction() {
        let mut values = BTreeMap::new();
        values.insert("@counter.count".to_owned(), "41".to_owned());
        values.insert("@counter.nope".to_owned(), "1".to_owned());
        let mut ctx = counter_context()
            .with_properties(Properties::new().with_layer(PropertyLayer::from_map("test", values)));
        assert_eq!(ctx.load::<CounterKBean>().unwrap().count, 41);
    }

    #[test]
    fn invalid_property_value_fails_construction() {
        let mut values = BTreeMap::new();
        values.insert("@counter.count".to_owned(), "many".to_owned());
        let mut ctx = counter_context()
            .with_properties(Properties::new().with_layer(PropertyLayer::from_map("test", values)));
        assert!(matches!(
            ctx.load::<CounterKBean>(),
            Err(EngineError::InvalidValue { .. })
        ));
    }

    #[test]
    fn field_actions_applied_in_place() {
        let mut ctx = counter_context();
        let class = std::any::type_name::<CounterKBean>().to_owned();
        let action = |member: &str, value: &str, append: bool| KBeanAction {
            bean: class.clone(),
            member: member.to_owned(),
            kind: ActionKind::FieldSet {
                value: value.to_owned(),
                append,
            },
        };
        ctx.apply(&action("count", "3", false)).unwrap();
        ctx.apply(&action("log", "a b", false)).unwrap();
        ctx.apply(&action("log", "c", true)).unwrap();
        let counter = ctx.bean::<CounterKBean>().unwrap();
        assert_eq!(counter.count, 3);
        assert_eq!(counter.log, vec!["a", "b", "c"]);
    }

    #[test]
    fn ancestors_end_with_root() {
        let ctx = counter_context().with_ancestors(vec![PathBuf::from("/work/outer")]);
        assert_eq!(
            ctx.ancestors(),
            &[PathBuf::from("/work/outer"), PathBuf::from("/work/app")]
        );
    }
}
