//! Module versions, their ordering, and version selectors.

use std::cmp::Ordering;
use std::fmt;

use crate::error::DepsError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Num(u64),
    Text(String),
}

/// Rank of a textual qualifier relative to a plain release (rank 5).
fn qualifier_rank(text: &str) -> u8 {
    match text {
        "alpha" | "a" => 0,
        "beta" | "b" => 1,
        "milestone" | "m" => 2,
        "rc" | "cr" => 3,
        "snapshot" => 4,
        "" | "ga" | "final" | "release" => 5,
        "sp" => 6,
        _ => 7,
    }
}

const RELEASE_RANK: u8 = 5;

/// A concrete module version such as `1.2.0` or `2.0-beta1`.
///
/// Numeric segments compare numerically, qualifiers sort before the matching
/// release (`1.0-rc1 < 1.0 < 1.0.1`), and trailing zeros are insignificant
/// (`1.0 == 1.0.0`).
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    tokens: Vec<Token>,
}

impl Version {
    /// Parse a concrete version.
    ///
    /// # Errors
    /// Returns an error if the version is empty or contains characters other
    /// than ASCII alphanumerics, `.`, `-`, `_` and `+`.
    pub fn parse(raw: &str) -> Result<Self, DepsError> {
        if raw.is_empty() {
            return Err(DepsError::InvalidVersion {
                version: raw.to_owned(),
                reason: "version is empty".to_owned(),
            });
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+')))
        {
            return Err(DepsError::InvalidVersion {
                version: raw.to_owned(),
                reason: format!("unexpected character `{bad}`"),
            });
        }
        Ok(Self {
            raw: raw.to_owned(),
            tokens: tokenize(raw),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn tokenize(raw: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    for segment in raw.split(['.', '-', '_', '+']) {
        let mut current = String::new();
        let mut numeric = None;
        for c in segment.chars() {
            let is_digit = c.is_ascii_digit();
            if numeric.is_some_and(|n| n != is_digit) {
                tokens.push(make_token(&current));
                current.clear();
            }
            numeric = Some(is_digit);
            current.push(c.to_ascii_lowercase());
        }
        if !current.is_empty() {
            tokens.push(make_token(&current));
        }
    }
    while tokens.last().is_some_and(is_release_padding) {
        tokens.pop();
    }
    tokens
}

fn make_token(text: &str) -> Token {
    match text.parse::<u64>() {
        Ok(n) => Token::Num(n),
        Err(_) => Token::Text(text.to_owned()),
    }
}

fn is_release_padding(token: &Token) -> bool {
    match token {
        Token::Num(n) => *n == 0,
        Token::Text(t) => qualifier_rank(t) == RELEASE_RANK,
    }
}

fn compare_tokens(left: Option<&Token>, right: Option<&Token>) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (Some(Token::Num(a)), Some(Token::Num(b))) => a.cmp(b),
        (Some(Token::Text(a)), Some(Token::Text(b))) => qualifier_rank(a)
            .cmp(&qualifier_rank(b))
            .then_with(|| a.cmp(b)),
        (Some(Token::Num(_)), Some(Token::Text(_))) => Ordering::Greater,
        (Some(Token::Text(_)), Some(Token::Num(_))) => Ordering::Less,
        (Some(Token::Num(n)), None) => n.cmp(&0),
        (None, Some(Token::Num(n))) => 0.cmp(n),
        (Some(Token::Text(t)), None) => qualifier_rank(t).cmp(&RELEASE_RANK),
        (None, Some(Token::Text(t))) => RELEASE_RANK.cmp(&qualifier_rank(t)),
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.tokens.len().max(other.tokens.len());
        (0..len)
            .map(|i| compare_tokens(self.tokens.get(i), other.tokens.get(i)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One end of a version interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub version: Version,
    pub inclusive: bool,
}

/// A version selector as written in a coordinate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    /// `1.2.0`
    Exact(Version),
    /// `+` or `latest`
    Latest,
    /// `1.2.+`, stored without the `+`.
    Prefix(String),
    /// `[1.0,2.0)` style interval; a missing bound is unbounded.
    Range {
        lower: Option<Bound>,
        upper: Option<Bound>,
    },
}

impl VersionSpec {
    /// Parse a version selector.
    ///
    /// # Errors
    /// Returns an error if the selector is empty or an interval is malformed.
    pub fn parse(raw: &str) -> Result<Self, DepsError> {
        let raw = raw.trim();
        if raw == "+" || raw == "latest" {
            return Ok(Self::Latest);
        }
        if let Some(prefix) = raw.strip_suffix('+') {
            if prefix.is_empty() || !prefix.ends_with('.') {
                return Err(invalid(raw, "a dynamic version must look like `1.2.+`"));
            }
            Version::parse(prefix.trim_end_matches('.'))?;
            return Ok(Self::Prefix(prefix.to_owned()));
        }
        if raw.starts_with('[') || raw.starts_with('(') {
            return parse_range(raw);
        }
        Version::parse(raw).map(Self::Exact)
    }

    /// Whether `version` satisfies this selector.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Exact(v) => v == version,
            Self::Latest => true,
            Self::Prefix(prefix) => version.as_str().starts_with(prefix.as_str()),
            Self::Range { lower, upper } => {
                let above = lower.as_ref().is_none_or(|b| match version.cmp(&b.version) {
                    Ordering::Greater => true,
                    Ordering::Equal => b.inclusive,
                    Ordering::Less => false,
                });
                let below = upper.as_ref().is_none_or(|b| match version.cmp(&b.version) {
                    Ordering::Less => true,
                    Ordering::Equal => b.inclusive,
                    Ordering::Greater => false,
                });
                above && below
            }
        }
    }

    /// The highest candidate satisfying this selector.
    pub fn select<'a>(&self, candidates: &'a [Version]) -> Option<&'a Version> {
        candidates.iter().filter(|v| self.matches(v)).max()
    }

    /// The concrete version when this selector is exact.
    pub fn exact(&self) -> Option<&Version> {
        match self {
            Self::Exact(v) => Some(v),
            _ => None,
        }
    }
}

fn invalid(raw: &str, reason: &str) -> DepsError {
    DepsError::InvalidVersion {
        version: raw.to_owned(),
        reason: reason.to_owned(),
    }
}

fn parse_range(raw: &str) -> Result<VersionSpec, DepsError> {
    let lower_inclusive = raw.starts_with('[');
    let upper_inclusive = raw.ends_with(']');
    if !upper_inclusive && !raw.ends_with(')') {
        return Err(invalid(raw, "an interval must end with `]` or `)`"));
    }
    let inner = raw.get(1..raw.len().saturating_sub(1)).unwrap_or("");
    let bound = |text: &str, inclusive: bool| -> Result<Option<Bound>, DepsError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(Bound {
            version: Version::parse(text)?,
            inclusive,
        }))
    };
    match inner.split_once(',') {
        Some((low, high)) => {
            let lower = bound(low, lower_inclusive)?;
            let upper = bound(high, upper_inclusive)?;
            if let (Some(l), Some(u)) = (&lower, &upper) {
                if l.version > u.version {
                    return Err(invalid(raw, "lower bound is above upper bound"));
                }
            }
            Ok(VersionSpec::Range { lower, upper })
        }
        None => {
            if !(lower_inclusive && upper_inclusive) {
                return Err(invalid(raw, "a single-version interval must be written `[x]`"));
            }
            Version::parse(inner.trim()).map(VersionSpec::Exact)
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "{v}"),
            Self::Latest => f.write_str("+"),
            Self::Prefix(prefix) => write!(f, "{prefix}+"),
            Self::Range { lower, upper } => {
                let open = if lower.as_ref().is_some_and(|b| b.inclusive) { '[' } else { '(' };
                let close = if upper.as_ref().is_some_and(|b| b.inclusive) { ']' } else { ')' };
                let low = lower.as_ref().map(|b| b.version.to_string()).unwrap_or_default();
                let high = upper.as_ref().map(|b| b.version.to_string()).unwrap_or_default();
                write!(f, "{open}{low},{high}{close}")
            }
        }
    }
}
