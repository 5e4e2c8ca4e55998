//! Renderer boundary
//!
//! A renderer turns the aggregate document into the final body. The
//! transformation engine itself lives outside this crate; it plugs in
//! through [`TemplateCompiler`]. Compiled templates are cached process
//! wide under a key chosen by [`CacheScope`].

use crate::document::Element;
use crate::error::RenderError;
use crate::params::ParamMap;
use crate::service::ServiceDefinition;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Media type of serialized aggregate documents
pub const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Final output of a renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub body: Bytes,
    pub content_type: String,
}

impl Rendered {
    pub fn new(body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Rendered {
            body: body.into(),
            content_type: content_type.into(),
        }
    }
}

/// Turns an aggregate document into response bytes
pub trait Renderer: Send + Sync {
    /// Render `document` with the template selected by `scope_key`
    fn render(
        &self,
        document: &Element,
        scope_key: &str,
        params: &ParamMap,
    ) -> Result<Rendered, RenderError>;

    /// Validator of the template selected by `scope_key`, `None` when the
    /// output cannot be cached
    fn etag(&self, scope_key: &str) -> Option<String>;

    /// Drop every cached template
    fn clear_cache(&self) {}
}

/// Serializes the document as XML without transformation
#[derive(Debug, Default, Clone)]
pub struct XmlRenderer;

impl Renderer for XmlRenderer {
    fn render(
        &self,
        document: &Element,
        _scope_key: &str,
        _params: &ParamMap,
    ) -> Result<Rendered, RenderError> {
        Ok(Rendered::new(document.to_document()?, XML_CONTENT_TYPE))
    }

    fn etag(&self, _scope_key: &str) -> Option<String> {
        Some("xml".to_string())
    }
}

/// Which services share a compiled template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheScope {
    /// One template for everything
    Global,
    /// One template per service group
    Group,
    /// One template per service
    #[default]
    Service,
}

impl CacheScope {
    /// Template cache key for `service`
    pub fn key(&self, service: &ServiceDefinition) -> String {
        match self {
            CacheScope::Global => "global".to_string(),
            CacheScope::Group => format!("group:{}", service.group()),
            CacheScope::Service => format!("service:{}", service.id()),
        }
    }
}

/// A compiled template
pub trait Template: Send + Sync {
    fn apply(&self, document: &Element, params: &ParamMap) -> Result<Rendered, RenderError>;

    /// Content-addressed validator of the template source
    fn etag(&self) -> String;
}

/// Compiles the template for a cache key
pub trait TemplateCompiler: Send + Sync {
    /// # Errors
    /// `RenderError::TemplateNotFound` when no template exists for `key`.
    fn compile(&self, key: &str) -> Result<Arc<dyn Template>, RenderError>;
}

/// Process-wide compiled template cache
#[derive(Default)]
pub struct TemplateCache {
    entries: RwLock<HashMap<String, Arc<dyn Template>>>,
    compilations: AtomicU64,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached template for `key`, compiling it on first use
    pub fn get_or_compile(
        &self,
        key: &str,
        compiler: &dyn TemplateCompiler,
    ) -> Result<Arc<dyn Template>, RenderError> {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(template) = entries.get(key) {
                return Ok(Arc::clone(template));
            }
        }

        let template = compiler.compile(key)?;
        self.compilations.fetch_add(1, Ordering::Relaxed);
        debug!(key, "Compiled template");

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(entries.entry(key.to_string()).or_insert(template)))
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let dropped = entries.len();
        entries.clear();
        info!(dropped, "Template cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of compilations since creation
    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
    }
}

/// Renderer backed by an external template compiler
pub struct TemplateRenderer<C: TemplateCompiler> {
    compiler: C,
    cache: TemplateCache,
}

impl<C: TemplateCompiler> TemplateRenderer<C> {
    pub fn new(compiler: C) -> Self {
        TemplateRenderer {
            compiler,
            cache: TemplateCache::new(),
        }
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }
}

impl<C: TemplateCompiler> Renderer for TemplateRenderer<C> {
    fn render(
        &self,
        document: &Element,
        scope_key: &str,
        params: &ParamMap,
    ) -> Result<Rendered, RenderError> {
        let template = self.cache.get_or_compile(scope_key, &self.compiler)?;
        template.apply(document, params)
    }

    fn etag(&self, scope_key: &str) -> Option<String> {
        self.cache
            .get_or_compile(scope_key, &self.compiler)
            .ok()
            .map(|t| t.etag())
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// HTTP parameters meant for the renderer, with `prefix` stripped
pub fn render_params(raw: &ParamMap, prefix: &str) -> ParamMap {
    raw.iter()
        .filter_map(|(k, v)| {
            k.strip_prefix(prefix)
                .filter(|name| !name.is_empty())
                .map(|name| (name.to_string(), v.clone()))
        })
        .collect()
}

/// Plain XML serialization of `document`, used when rendering fails
///
/// Always produces a body: a document that cannot be serialized is
/// replaced by a bare error element.
pub fn fail_safe(document: &Element, error: &RenderError) -> Rendered {
    let body = document.to_document().unwrap_or_else(|_| {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><render-error id=\"{}\"/>",
            error.diagnostic_id()
        )
    });
    Rendered::new(body, XML_CONTENT_TYPE)
}
