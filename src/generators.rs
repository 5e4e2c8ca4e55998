//! Built-in generators
//!
//! - `static`: an element with literal text (`element`, `content`)
//! - `params`: echoes its parameter map
//! - `status`: answers a configured `status`, optionally with a `location`
//! - `error`: always fails with `code`, `message` and `status`

use crate::document::{is_valid_name, Element};
use crate::error::GeneratorError;
use crate::etag::hash_parts;
use crate::generator::{
    CacheableGenerator, Generator, GeneratorFactory, GeneratorKind, GeneratorOutput,
    GeneratorRequest,
};
use async_trait::async_trait;

type GenResult = Result<GeneratorOutput, GeneratorError>;

/// Register every built-in generator with `factory`
pub fn register_builtins(factory: &mut GeneratorFactory) {
    factory.register("static", || GeneratorKind::cacheable(StaticGenerator));
    factory.register("params", || GeneratorKind::cacheable(ParamsGenerator));
    factory.register("status", || GeneratorKind::plain(StatusGenerator));
    factory.register("error", || GeneratorKind::plain(ErrorGenerator));
}

/// Writes `<element>content</element>`
#[derive(Debug, Default)]
pub struct StaticGenerator;

impl StaticGenerator {
    fn element_name(request: &GeneratorRequest) -> &str {
        request.param("element").unwrap_or("static")
    }
}

#[async_trait]
impl Generator for StaticGenerator {
    async fn process(&self, request: &GeneratorRequest) -> GenResult {
        let name = Self::element_name(request);
        if !is_valid_name(name) {
            return Err(GeneratorError::new(
                "bad-element",
                format!("'{}' is not an XML element name", name),
            )
            .with_status(400));
        }
        let mut element = Element::new(name);
        if let Some(content) = request.param("content").filter(|c| !c.is_empty()) {
            element.push_text(content);
        }
        Ok(GeneratorOutput::ok(element))
    }
}

#[async_trait]
impl CacheableGenerator for StaticGenerator {
    async fn etag(&self, request: &GeneratorRequest) -> Option<String> {
        Some(hash_parts([
            Self::element_name(request),
            request.param("content").unwrap_or(""),
        ]))
    }
}

/// Writes `<params><param name="k">v</param>...</params>`
#[derive(Debug, Default)]
pub struct ParamsGenerator;

#[async_trait]
impl Generator for ParamsGenerator {
    async fn process(&self, request: &GeneratorRequest) -> GenResult {
        let mut root = Element::new("params");
        for (name, value) in &request.params {
            root.push(Element::new("param").attr("name", name.as_str()).text(value.as_str()));
        }
        Ok(GeneratorOutput::ok(root))
    }
}

#[async_trait]
impl CacheableGenerator for ParamsGenerator {
    async fn etag(&self, request: &GeneratorRequest) -> Option<String> {
        Some(hash_parts(
            request
                .params
                .iter()
                .flat_map(|(k, v)| [k.as_str(), v.as_str()]),
        ))
    }
}

/// Answers the `status` parameter (default 200) and an optional `location`
#[derive(Debug, Default)]
pub struct StatusGenerator;

#[async_trait]
impl Generator for StatusGenerator {
    async fn process(&self, request: &GeneratorRequest) -> GenResult {
        let status = parse_status(request.param("status"), 200)?;
        let mut output =
            GeneratorOutput::ok(Element::new("status").attr("code", status.to_string()))
                .with_status(status);
        if let Some(location) = request.param("location").filter(|l| !l.is_empty()) {
            output.fragment.set_attr("location", location);
            output = output.with_location(location);
        }
        Ok(output)
    }
}

/// Always fails
#[derive(Debug, Default)]
pub struct ErrorGenerator;

#[async_trait]
impl Generator for ErrorGenerator {
    async fn process(&self, request: &GeneratorRequest) -> GenResult {
        let status = parse_status(request.param("status"), 500)?;
        let mut error = GeneratorError::new(
            request.param("code").unwrap_or("generator-error"),
            request.param("message").unwrap_or("generator failed"),
        )
        .with_status(status);
        if let Some(cause) = request.param("cause") {
            error = error.with_cause(cause);
        }
        Err(error)
    }
}

fn parse_status(raw: Option<&str>, default: u16) -> Result<u16, GeneratorError> {
    let raw = match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw,
        None => return Ok(default),
    };
    raw.parse::<u16>()
        .ok()
        .filter(|code| (100..=599).contains(code))
        .ok_or_else(|| {
            GeneratorError::new("bad-status", format!("'{}' is not an HTTP status", raw))
        })
}
