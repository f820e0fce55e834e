//! Behavior flags: the `-` prefixed arguments handled before any bean token.

use std::collections::BTreeMap;

use crate::error::EngineError;

/// Settings that steer the run itself rather than a bean.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BehaviorSettings {
    /// Bean named by `-kb=` / `-kbean=`.
    pub default_kbean: Option<String>,
    /// `-lv` / `-log.verbose`.
    pub verbose: bool,
    /// `-lst` / `-log.stacktrace`: print the cause chain of a failure.
    pub stacktrace: bool,
    /// `-cw` / `-clean.work`: clear the dependency cache before running.
    pub clean_work: bool,
    /// `-co` / `-clean.output`: delete the pack outputs before running.
    pub clean_output: bool,
    /// `-Dkey=value` properties, the top property layer.
    pub properties: BTreeMap<String, String>,
}

impl BehaviorSettings {
    /// Split `args` into behavior settings and the remaining bean tokens.
    ///
    /// Flags may appear anywhere; the relative order of the other tokens is kept.
    ///
    /// # Errors
    /// Returns an error for an unknown flag or a `-D` flag without a key.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<(Self, Vec<String>), EngineError> {
        let mut settings = Self::default();
        let mut rest = Vec::new();
        for arg in args {
            let arg = arg.as_ref();
            let Some(flag) = arg.strip_prefix('-') else {
                rest.push(arg.to_owned());
                continue;
            };
            if let Some(property) = flag.strip_prefix('D') {
                let (key, value) = property.split_once('=').unwrap_or((property, "true"));
                if key.is_empty() {
                    return Err(EngineError::MalformedAction {
                        token: arg.to_owned(),
                        reason: "property flag needs a key, as in `-Dkey=value`".to_owned(),
                    });
                }
                settings.properties.insert(key.to_owned(), value.to_owned());
                continue;
            }
            if let Some((name, value)) = flag.split_once('=') {
                match name {
                    "kb" | "kbean" if !value.is_empty() => {
                        settings.default_kbean = Some(value.to_owned());
                    }
                    _ => {
                        return Err(EngineError::UnknownFlag {
                            flag: arg.to_owned(),
                        })
                    }
                }
                continue;
            }
            match flag {
                "lv" | "log.verbose" => settings.verbose = true,
                "lst" | "log.stacktrace" => settings.stacktrace = true,
                "cw" | "clean.work" => settings.clean_work = true,
                "co" | "clean.output" => settings.clean_output = true,
                _ => {
                    return Err(EngineError::UnknownFlag {
                        flag: arg.to_owned(),
                    })
                }
            }
        }
        Ok((settings, rest))
    }
}
