//! URI template patterns
//!
//! A pattern is a `/`-separated list of segments. Each segment is either a
//! literal or contains exactly one variable expression, optionally
//! surrounded by literal text:
//!
//! - `{name}` binds one non-empty path segment
//! - `{name=default}` binds one segment, falling back to `default` when the
//!   segment is empty or missing at the end of the path
//! - `{+name}` binds the rest of the path, slashes included (last segment only)
//! - `item-{id}.xml` binds the text between a literal prefix and suffix
//!
//! Patterns are parsed once, at registration time. Matching never fails
//! with an error, it only answers yes or no.

use crate::error::{Result, RouterError};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::collections::BTreeMap;
use std::fmt;

/// Variable bindings produced by resolving a path against a pattern
pub type Variables = BTreeMap<String, String>;

const SEGMENT_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const REST_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, PartialEq, Eq)]
struct Variable {
    name: String,
    default: Option<String>,
    greedy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    prefix: String,
    variable: Option<Variable>,
    suffix: String,
}

impl Segment {
    /// Match one concrete path segment. Returns the bound value, if any.
    fn match_segment(&self, segment: &str) -> Option<Option<(String, String)>> {
        let var = match &self.variable {
            None => return (segment == self.prefix).then_some(None),
            Some(var) => var,
        };

        if segment.len() < self.prefix.len() + self.suffix.len()
            || !segment.starts_with(self.prefix.as_str())
            || !segment.ends_with(self.suffix.as_str())
        {
            return None;
        }

        let raw = &segment[self.prefix.len()..segment.len() - self.suffix.len()];
        if raw.is_empty() {
            return var
                .default
                .as_ref()
                .map(|d| Some((var.name.clone(), d.clone())));
        }
        Some(Some((var.name.clone(), decode(raw))))
    }

    /// Binding used when the path ends before this segment
    fn missing_binding(&self) -> Option<(String, String)> {
        let var = self.variable.as_ref()?;
        if !self.prefix.is_empty() || !self.suffix.is_empty() {
            return None;
        }
        var.default.as_ref().map(|d| (var.name.clone(), d.clone()))
    }
}

/// A parsed URI template
///
/// Equality and hashing follow the source string: equal pattern strings
/// are equal patterns.
#[derive(Debug, Clone)]
pub struct UriPattern {
    source: String,
    segments: Vec<Segment>,
    variable_count: usize,
}

impl PartialEq for UriPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for UriPattern {}

impl std::hash::Hash for UriPattern {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl fmt::Display for UriPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for UriPattern {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self> {
        UriPattern::parse(s)
    }
}

impl UriPattern {
    /// Parse a pattern string
    ///
    /// # Errors
    /// Returns `RouterError::InvalidPattern` when the pattern does not start
    /// with `/`, has unbalanced braces, an empty or invalid variable name,
    /// two variables in one segment, a duplicated variable name, or a
    /// greedy variable that is not the whole last segment.
    pub fn parse(source: &str) -> Result<Self> {
        if !source.starts_with('/') {
            return Err(RouterError::invalid_pattern(source, "must start with '/'"));
        }

        let raw_segments: Vec<&str> = source[1..].split('/').collect();
        let mut segments = Vec::with_capacity(raw_segments.len());
        let mut seen = Vec::new();

        for (index, raw) in raw_segments.iter().enumerate() {
            let segment = parse_segment(source, raw)?;
            if let Some(var) = &segment.variable {
                if seen.contains(&var.name) {
                    return Err(RouterError::invalid_pattern(
                        source,
                        format!("variable '{}' bound twice", var.name),
                    ));
                }
                if var.greedy
                    && (index + 1 != raw_segments.len()
                        || !segment.prefix.is_empty()
                        || !segment.suffix.is_empty())
                {
                    return Err(RouterError::invalid_pattern(
                        source,
                        "greedy variable must be the whole last segment",
                    ));
                }
                seen.push(var.name.clone());
            }
            segments.push(segment);
        }

        Ok(UriPattern {
            source: source.to_string(),
            variable_count: seen.len(),
            segments,
        })
    }

    /// The original pattern string
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Number of variables in the pattern; lower means more specific
    pub fn variable_count(&self) -> usize {
        self.variable_count
    }

    /// True when the pattern has no variables at all
    pub fn is_literal(&self) -> bool {
        self.variable_count == 0
    }

    /// Variable names in template order
    pub fn variable_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| s.variable.as_ref().map(|v| v.name.as_str()))
            .collect()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    /// Resolve a concrete path against this pattern
    ///
    /// Returns the variable bindings implied by the template positions, or
    /// `None` when the path does not match.
    pub fn resolve(&self, path: &str) -> Option<Variables> {
        let rest = path.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();
        let mut vars = Variables::new();

        for (index, segment) in self.segments.iter().enumerate() {
            if let Some(var) = segment.variable.as_ref().filter(|v| v.greedy) {
                let tail = parts.get(index..).map(|p| p.join("/")).unwrap_or_default();
                if tail.is_empty() {
                    vars.insert(var.name.clone(), var.default.clone()?);
                } else {
                    vars.insert(var.name.clone(), decode(&tail));
                }
                return Some(vars);
            }

            match parts.get(index) {
                Some(part) => {
                    if let Some((name, value)) = segment.match_segment(part)? {
                        vars.insert(name, value);
                    }
                }
                None => {
                    let (name, value) = segment.missing_binding()?;
                    vars.insert(name, value);
                }
            }
        }

        if parts.len() > self.segments.len() {
            return None;
        }
        Some(vars)
    }

    /// Expand the pattern with the given bindings
    ///
    /// Missing variables fall back to their default, or to the empty string.
    pub fn expand(&self, vars: &Variables) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            out.push('/');
            out.push_str(&segment.prefix);
            if let Some(var) = &segment.variable {
                let value = vars
                    .get(&var.name)
                    .or(var.default.as_ref())
                    .map(String::as_str)
                    .unwrap_or("");
                let set = if var.greedy { REST_ENCODE } else { SEGMENT_ENCODE };
                out.extend(utf8_percent_encode(value, set));
            }
            out.push_str(&segment.suffix);
        }
        out
    }
}

/// Pick the best matching pattern for a path
///
/// The pattern with the fewest variables wins; on a tie the candidate that
/// comes first in iteration (declaration) order is kept. Returns the
/// position of the winner within `candidates` and its bindings.
pub fn find_best_match<'a, I>(candidates: I, path: &str) -> Option<(usize, Variables)>
where
    I: IntoIterator<Item = &'a UriPattern>,
{
    let mut best: Option<(usize, usize, Variables)> = None;
    for (index, pattern) in candidates.into_iter().enumerate() {
        if let Some(vars) = pattern.resolve(path) {
            let better = match &best {
                Some((_, count, _)) => pattern.variable_count() < *count,
                None => true,
            };
            if better {
                best = Some((index, pattern.variable_count(), vars));
            }
        }
    }
    best.map(|(index, _, vars)| (index, vars))
}

fn parse_segment(source: &str, raw: &str) -> Result<Segment> {
    let open = match raw.find('{') {
        Some(pos) => pos,
        None => {
            if raw.contains('}') {
                return Err(RouterError::invalid_pattern(source, "unbalanced '}'"));
            }
            return Ok(Segment {
                prefix: raw.to_string(),
                variable: None,
                suffix: String::new(),
            });
        }
    };

    let close = raw[open..]
        .find('}')
        .map(|p| p + open)
        .ok_or_else(|| RouterError::invalid_pattern(source, "unbalanced '{'"))?;

    let prefix = &raw[..open];
    let expr = &raw[open + 1..close];
    let suffix = &raw[close + 1..];

    if prefix.contains('}') || expr.contains('{') {
        return Err(RouterError::invalid_pattern(source, "unbalanced braces"));
    }
    if suffix.contains('{') || suffix.contains('}') {
        return Err(RouterError::invalid_pattern(
            source,
            "only one variable per segment",
        ));
    }

    let (greedy, expr) = match expr.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, expr),
    };
    let (name, default) = match expr.split_once('=') {
        Some((name, default)) => (name, Some(default.to_string())),
        None => (expr, None),
    };

    if name.is_empty() {
        return Err(RouterError::invalid_pattern(source, "empty variable name"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(RouterError::invalid_pattern(
            source,
            format!("invalid variable name '{}'", name),
        ));
    }

    Ok(Segment {
        prefix: prefix.to_string(),
        variable: Some(Variable {
            name: name.to_string(),
            default,
            greedy,
        }),
        suffix: suffix.to_string(),
    })
}

fn decode(raw: &str) -> String {
    if raw.contains('%') {
        percent_decode_str(raw).decode_utf8_lossy().into_owned()
    } else {
        raw.to_string()
    }
}
