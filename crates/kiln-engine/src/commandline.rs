//! Command-line parser: bean tokens into ordered [`KBeanAction`]s.
//!
//! Tokens are split into context groups at `name:` switches. Inside a group,
//! `key=value` sets a field, `key+=value` appends to a list field, and a bare
//! word calls a method (or sets a boolean field of that name to `true`).
//! Values stay raw strings; coercion happens when the action is bound.

use std::fmt;

use tracing::debug;

use crate::bean::FieldKind;
use crate::error::EngineError;
use crate::registry::{BeanCatalog, BeanDescriptor, KBeanResolution};

/// Tokens addressed to one bean context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextGroup {
    /// Bean named by the switch, `None` for tokens before the first switch.
    pub name: Option<String>,
    /// The group's tokens, starting with the `name:` switch when there is one.
    pub tokens: Vec<String>,
}

/// What an action does to its bean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    FieldSet { value: String, append: bool },
    MethodCall,
}

/// One parsed instruction for a bean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KBeanAction {
    /// Type path of the target bean.
    pub bean: String,
    /// Dotted field path or method name.
    pub member: String,
    pub kind: ActionKind,
}

impl KBeanAction {
    pub fn is_method_call(&self) -> bool {
        self.kind == ActionKind::MethodCall
    }
}

impl fmt::Display for KBeanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bean = self.bean.rsplit("::").next().unwrap_or(self.bean.as_str());
        match &self.kind {
            ActionKind::FieldSet { value, append } => {
                let op = if *append { "+=" } else { "=" };
                let shown = kiln_config::Properties::display_value(&self.member, value);
                write!(f, "{bean}.{}{op}{shown}", self.member)
            }
            ActionKind::MethodCall => write!(f, "{bean}#{}", self.member),
        }
    }
}

fn switch_name(token: &str) -> Option<&str> {
    if token.contains('=') {
        return None;
    }
    token.strip_suffix(':')
}

/// Split bean tokens into context groups at `name:` switches.
///
/// Every switch starts a new group, even when it repeats the previous name.
pub fn split_groups<S: AsRef<str>>(args: &[S]) -> Vec<ContextGroup> {
    let mut groups: Vec<ContextGroup> = Vec::new();
    for arg in args {
        let token = arg.as_ref();
        if let Some(name) = switch_name(token) {
            groups.push(ContextGroup {
                name: Some(name.to_owned()),
                tokens: vec![token.to_owned()],
            });
            continue;
        }
        match groups.last_mut() {
            Some(group) => group.tokens.push(token.to_owned()),
            None => groups.push(ContextGroup {
                name: None,
                tokens: vec![token.to_owned()],
            }),
        }
    }
    groups
}

fn classify(token: &str) -> Result<(String, ActionKind), EngineError> {
    let malformed = |reason: &str| EngineError::MalformedAction {
        token: token.to_owned(),
        reason: reason.to_owned(),
    };
    if let Some((key, value)) = token.split_once('=') {
        let (key, append) = match key.strip_suffix('+') {
            Some(key) => (key, true),
            None => (key, false),
        };
        if key.is_empty() {
            return Err(malformed("missing field name before `=`"));
        }
        return Ok((
            key.to_owned(),
            ActionKind::FieldSet {
                value: value.to_owned(),
                append,
            },
        ));
    }
    if token.trim().is_empty() {
        return Err(malformed("empty argument"));
    }
    Ok((token.to_owned(), ActionKind::MethodCall))
}

fn target<'a>(
    group: &ContextGroup,
    catalog: &'a BeanCatalog,
    resolution: &KBeanResolution,
) -> Result<Option<&'a BeanDescriptor>, EngineError> {
    match &group.name {
        Some(name) if name.is_empty() => Err(EngineError::MalformedAction {
            token: ":".to_owned(),
            reason: "empty bean name".to_owned(),
        }),
        Some(name) => catalog.find(name).map(Some),
        None => Ok(resolution.default.as_deref().and_then(|class| catalog.by_class(class))),
    }
}

/// Parse bean tokens into actions, in the order they were written.
///
/// # Errors
/// Returns `UnresolvedBean`/`AmbiguousBean` for a switch naming no single
/// bean, `MalformedAction` for an empty key or bean name, and `NoDefaultBean`
/// for tokens before any switch when there is no default bean.
pub fn parse<S: AsRef<str>>(
    args: &[S],
    catalog: &BeanCatalog,
    resolution: &KBeanResolution,
) -> Result<Vec<KBeanAction>, EngineError> {
    let mut actions = Vec::new();
    for group in split_groups(args) {
        let skip = usize::from(group.name.is_some());
        let mut tokens = group.tokens.iter().skip(skip).peekable();
        if tokens.peek().is_none() {
            target(&group, catalog, resolution)?;
            continue;
        }
        let Some(bean) = target(&group, catalog, resolution)? else {
            let token = tokens.next().cloned().unwrap_or_default();
            return Err(EngineError::NoDefaultBean { token });
        };
        for token in tokens {
            let (member, mut kind) = classify(token)?;
            if kind == ActionKind::MethodCall
                && !bean.table().has_method(&member)
                && bean.table().field_kind(&member) == Some(&FieldKind::Flag)
            {
                kind = ActionKind::FieldSet {
                    value: String::new(),
                    append: false,
                };
            }
            actions.push(KBeanAction {
                bean: bean.class_name().to_owned(),
                member,
                kind,
            });
        }
    }
    debug!(
        actions = %actions.iter().map(ToString::to_string).collect::<Vec<_>>().join(" "),
        "parsed command line"
    );
    Ok(actions)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn words(line: &str) -> Vec<&str> {
        line.split_whitespace().collect()
    }

    fn parse_line(line: &str) -> Result<Vec<KBeanAction>, EngineError> {
        let catalog = BeanCatalog::standard();
        let resolution = KBeanResolution::compute(&catalog, None).unwrap();
        parse(&words(line), &catalog, &resolution)
    }

    fn field(action: &KBeanAction) -> (&str, &str) {
        match &action.kind {
            ActionKind::FieldSet { value, .. } => (action.member.as_str(), value.as_str()),
            ActionKind::MethodCall => unreachable!("expected a field action, got {action}"),
        }
    }

    #[test]
    fn splits_into_context_groups() {
        let groups = split_groups(&words("boo bar=2 project: version=1.0"));
        assert_eq!(groups.len(), 2);
        let first = groups.first().unwrap();
        assert_eq!(first.name, None);
        assert_eq!(first.tokens, vec!["boo", "bar=2"]);
        let second = groups.get(1).unwrap();
        assert_eq!(second.name.as_deref(), Some("project"));
        assert_eq!(second.tokens, vec!["project:", "version=1.0"]);
    }

    #[test]
    fn value_with_colon_is_not_a_switch() {
        let groups = split_groups(&words("repo=http://host:"));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups.first().unwrap().name, None);
    }

    #[test]
    fn repeated_switch_is_not_merged() {
        let actions = parse_line("project: version=1 project: version=2").unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(field(actions.first().unwrap()), ("version", "1"));
        assert_eq!(field(actions.get(1).unwrap()), ("version", "2"));
    }

    #[test]
    fn tokens_before_switch_go_to_default_bean() {
        let actions = parse_line("scope=test depTree quality: check").unwrap();
        let beans: Vec<&str> = actions
            .iter()
            .map(|a| a.bean.rsplit("::").next().unwrap())
            .collect();
        assert_eq!(beans, vec!["ProjectKBean", "ProjectKBean", "QualityKBean"]);
        assert!(actions.get(1).unwrap().is_method_call());
        assert!(actions.get(2).unwrap().is_method_call());
    }

    #[test]
    fn bare_boolean_field_becomes_flag_set() {
        let actions = parse_line("tests.skip pack").unwrap();
        assert_eq!(field(actions.first().unwrap()), ("tests.skip", ""));
        assert!(actions.get(1).unwrap().is_method_call());
    }

    #[test]
    fn append_operator() {
        let actions = parse_line("checks+=quality").unwrap();
        let action = actions.first().unwrap();
        assert_eq!(
            action.kind,
            ActionKind::FieldSet {
                value: "quality".to_owned(),
                append: true
            }
        );
        assert_eq!(action.member, "checks");
    }

    #[test]
    fn unknown_bean_switch_rejected() {
        let err = parse_line("nope: info").unwrap_err();
        assert!(matches!(err, EngineError::UnresolvedBean { name, .. } if name == "nope"));
    }

    #[test]
    fn empty_key_rejected() {
        assert!(matches!(parse_line("=1"), Err(EngineError::MalformedAction { .. })));
        assert!(matches!(parse_line("project: +=1"), Err(EngineError::MalformedAction { .. })));
        assert!(matches!(parse_line(": info"), Err(EngineError::MalformedAction { .. })));
    }

    #[test]
    fn no_default_bean_reported() {
        let catalog = BeanCatalog::new();
        let resolution = KBeanResolution::default();
        let err = parse(&["info"], &catalog, &resolution).unwrap_err();
        assert!(matches!(err, EngineError::NoDefaultBean { token } if token == "info"));
    }

    #[test]
    fn sensitive_values_masked_in_display() {
        let actions = parse_line("project: version=1 repo.token=abc").unwrap();
        assert_eq!(actions.get(1).unwrap().to_string(), "ProjectKBean.repo.token=***");
    }

    proptest! {
        #[test]
        fn splitting_never_loses_tokens(tokens in proptest::collection::vec("[a-z:=.+]{0,6}", 0..12)) {
            let groups = split_groups(&tokens);
            let total: usize = groups.iter().map(|g| g.tokens.len()).sum();
            prop_assert_eq!(total, tokens.len());
            let switches = tokens.iter().filter(|t| switch_name(t).is_some()).count();
            let named = groups.iter().filter(|g| g.name.is_some()).count();
            prop_assert_eq!(switches, named);
        }

        #[test]
        fn parsing_never_panics(tokens in proptest::collection::vec("[a-zA-Z:=.+ ]{0,8}", 0..8)) {
            let _ = parse_line(&tokens.join(" "));
        }
    }
}
