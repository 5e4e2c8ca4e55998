//! Response assembler for aggregate responses

use crate::dispatch::{AggregateResponse, GeneratorResult};
use crate::document::Element;
use crate::error::{GeneratorError, Result, RouterError};
use crate::etag;
use crate::params::ParamMap;
use crate::registry::MatchingService;
use crate::renderer::Rendered;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use std::collections::BTreeSet;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Builds aggregate documents and the HTTP headers around them
#[derive(Debug, Clone)]
pub struct ResponseAssembler {
    expires_secs: u64,
}

impl ResponseAssembler {
    /// Create a new ResponseAssembler
    ///
    /// # Arguments
    /// * `expires_secs` - freshness lifetime of cacheable responses
    pub fn new(expires_secs: u64) -> Self {
        ResponseAssembler { expires_secs }
    }

    /// Compose the aggregate document
    ///
    /// Fragments appear in generator order under a `service` root, after
    /// the routing metadata (matched pattern, URI variables) and the HTTP
    /// parameters.
    pub fn build_document(
        matching: &MatchingService,
        params: &ParamMap,
        results: &[GeneratorResult],
    ) -> Element {
        let service = &matching.service;
        let mut root = Element::new("service")
            .attr("id", service.id())
            .attr("group", service.group());
        if !service.flags().is_empty() {
            root.set_attr("flags", service.flags());
        }

        let mut routing = Element::new("routing").attr("pattern", matching.pattern.as_str());
        for (name, value) in &matching.variables {
            routing.push(Element::new("variable").attr("name", name.as_str()).text(value.as_str()));
        }
        root.push(routing);

        let mut parameters = Element::new("parameters");
        for (name, value) in params {
            parameters.push(Element::new("param").attr("name", name.as_str()).text(value.as_str()));
        }
        root.push(parameters);

        for result in results {
            let mut generator = Element::new("generator")
                .attr("order", result.order.to_string())
                .attr("name", result.name.as_str())
                .attr("status", result.status.to_string());
            if let Some(target) = &result.target {
                generator.set_attr("target", target.as_str());
            }
            generator.push(result.fragment.clone());
            root.push(generator);
        }

        root
    }

    /// Build response headers for a rendered aggregate response
    ///
    /// # Arguments
    /// * `aggregate` - dispatch outcome
    /// * `rendered` - rendered body and its media type
    ///
    /// # Returns
    /// The response status and headers. Content-Length is set from the
    /// rendered body; the caller adjusts it after compression.
    pub fn build_response_header(
        &self,
        aggregate: &AggregateResponse,
        rendered: &Rendered,
    ) -> Result<(StatusCode, HeaderMap)> {
        let status = status_code(aggregate.status)?;
        let mut headers = HeaderMap::new();

        headers.insert(header::CONTENT_TYPE, header_value(&rendered.content_type)?);
        headers.insert(
            header::CONTENT_LENGTH,
            header_value(&rendered.body.len().to_string())?,
        );
        self.insert_cache_headers(aggregate, &mut headers)?;

        if let Some(location) = aggregate.location.as_deref().filter(|_| aggregate.is_redirect()) {
            headers.insert(header::LOCATION, header_value(location)?);
        }

        debug!(
            "Built response headers: status={}, etag={:?}, cacheable={}",
            status, aggregate.etag, aggregate.cacheable
        );
        Ok((status, headers))
    }

    /// Headers of a 304 answer to a matching conditional request
    pub fn build_not_modified_header(&self, aggregate: &AggregateResponse) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        self.insert_cache_headers(aggregate, &mut headers)?;
        Ok(headers)
    }

    /// Headers of a redirect answer
    pub fn build_redirect_header(
        &self,
        aggregate: &AggregateResponse,
    ) -> Result<(StatusCode, HeaderMap)> {
        let status = status_code(aggregate.status)?;
        let mut headers = HeaderMap::new();
        if let Some(location) = &aggregate.location {
            headers.insert(header::LOCATION, header_value(location)?);
        }
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        Ok((status, headers))
    }

    fn insert_cache_headers(
        &self,
        aggregate: &AggregateResponse,
        headers: &mut HeaderMap,
    ) -> Result<()> {
        match (&aggregate.etag, aggregate.cacheable) {
            (Some(tag), true) => {
                headers.insert(header::ETAG, header_value(&etag::quote(tag))?);
                let cache_control = aggregate
                    .cache_control
                    .clone()
                    .unwrap_or_else(|| format!("max-age={}", self.expires_secs));
                headers.insert(header::CACHE_CONTROL, header_value(&cache_control)?);
                let expires = SystemTime::now() + Duration::from_secs(self.expires_secs);
                headers.insert(header::EXPIRES, header_value(&httpdate::fmt_http_date(expires))?);
            }
            _ => {
                headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            }
        }
        Ok(())
    }
}

impl Default for ResponseAssembler {
    fn default() -> Self {
        Self::new(300)
    }
}

/// Error substitution for a failed generator
pub fn error_fragment(error: &GeneratorError) -> Element {
    let mut element = Element::new("error")
        .attr("code", error.code.as_str())
        .attr("status", error.status.to_string())
        .child(Element::new("message").text(error.message.as_str()));
    if let Some(generator) = &error.generator {
        element.set_attr("generator", generator.as_str());
    }
    if let Some(cause) = &error.cause {
        element.push(Element::new("cause").text(cause.as_str()));
    }
    element
}

/// `Allow` header value for a set of method names
pub fn allow_header(methods: &BTreeSet<String>) -> Result<HeaderValue> {
    let joined = methods.iter().map(String::as_str).collect::<Vec<_>>().join(", ");
    header_value(&joined)
}

fn status_code(status: u16) -> Result<StatusCode> {
    StatusCode::from_u16(status)
        .map_err(|e| RouterError::InternalError(format!("Invalid status {}: {}", status, e)))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| RouterError::HttpError(format!("Invalid header value: {}", e)))
}
