//! Parameter value templates
//!
//! A binding's parameter values are templates: literal text interleaved
//! with `{var}` or `{var=default}` placeholders that are filled from the
//! request's common parameter map at dispatch time. `{{` writes a literal
//! `{`.

use crate::error::{Result, RouterError};
use std::collections::BTreeMap;

/// String-keyed parameter map handed to generators
pub type ParamMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Placeholder { name: String, default: Option<String> },
}

/// A parsed value template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTemplate {
    source: String,
    pieces: Vec<Piece>,
}

impl ValueTemplate {
    /// Parse a template
    ///
    /// # Errors
    /// `RouterError::InvalidTemplate` on an unterminated placeholder or an
    /// empty placeholder name.
    pub fn parse(source: &str) -> Result<Self> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            if c != '{' {
                literal.push(c);
                continue;
            }
            if let Some((_, '{')) = chars.peek() {
                chars.next();
                literal.push('{');
                continue;
            }

            let close = source[pos..]
                .find('}')
                .map(|p| p + pos)
                .ok_or_else(|| RouterError::invalid_template(source, "unterminated placeholder"))?;
            let expr = &source[pos + 1..close];
            let (name, default) = match expr.split_once('=') {
                Some((name, default)) => (name.trim(), Some(default.to_string())),
                None => (expr.trim(), None),
            };
            if name.is_empty() {
                return Err(RouterError::invalid_template(source, "empty placeholder name"));
            }

            if !literal.is_empty() {
                pieces.push(Piece::Literal(std::mem::take(&mut literal)));
            }
            pieces.push(Piece::Placeholder {
                name: name.to_string(),
                default,
            });

            while let Some((p, _)) = chars.peek() {
                if *p > close {
                    break;
                }
                chars.next();
            }
        }

        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Ok(ValueTemplate {
            source: source.to_string(),
            pieces,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Fill the template from `params`
    ///
    /// A placeholder without a value and without a default becomes empty.
    pub fn resolve(&self, params: &ParamMap) -> String {
        let mut out = String::with_capacity(self.source.len());
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Placeholder { name, default } => {
                    if let Some(value) = params.get(name).or(default.as_ref()) {
                        out.push_str(value);
                    }
                }
            }
        }
        out
    }
}

/// A named parameter of a generator binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub value: ValueTemplate,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, value: &str) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(RouterError::invalid_template(value, "parameter without a name"));
        }
        Ok(ParameterSpec {
            name,
            value: ValueTemplate::parse(value)?,
        })
    }

    pub fn resolve(&self, params: &ParamMap) -> String {
        self.value.resolve(params)
    }
}

/// Collect query-string style pairs into a map; the first occurrence wins
pub fn collect_pairs<I, K, V>(pairs: I) -> ParamMap
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut map = ParamMap::new();
    for (k, v) in pairs {
        map.entry(k.into()).or_insert_with(|| v.into());
    }
    map
}
