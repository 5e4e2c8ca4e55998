//! Generator capability interface and factory
//!
//! A generator produces one XML fragment for a request. Generators that can
//! describe their output with a validator token implement
//! [`CacheableGenerator`] as well; the two cases are carried by
//! [`GeneratorKind`] so the dispatcher never has to inspect types at run
//! time.

use crate::document::Element;
use crate::error::{GeneratorError, Result, RouterError};
use crate::params::ParamMap;
use async_trait::async_trait;
use http::Method;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Request attributes shared by all generators of one request
///
/// Generators run in declaration order, so a later generator sees what an
/// earlier one stored.
#[derive(Debug, Clone, Default)]
pub struct SharedAttributes {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl SharedAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(key.into(), value.into());
    }
}

/// Immutable sub-request handed to one generator
#[derive(Debug, Clone)]
pub struct GeneratorRequest {
    /// 0-based position of the generator within its service
    pub order: usize,
    pub method: Method,
    pub service_id: String,
    /// Effective generator name (binding name or type name)
    pub name: String,
    pub target: Option<String>,
    pub params: ParamMap,
    pub attributes: SharedAttributes,
}

impl GeneratorRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// What a generator hands back on success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorOutput {
    pub status: u16,
    /// Redirect target, meaningful with a 3xx status
    pub location: Option<String>,
    pub fragment: Element,
}

impl GeneratorOutput {
    /// A 200 output carrying `fragment`
    pub fn ok(fragment: Element) -> Self {
        GeneratorOutput {
            status: 200,
            location: None,
            fragment,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Content-producing unit
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce this generator's fragment
    ///
    /// Called exactly once per request.
    async fn process(
        &self,
        request: &GeneratorRequest,
    ) -> std::result::Result<GeneratorOutput, GeneratorError>;
}

/// Generators whose output can be validated with an ETag
#[async_trait]
pub trait CacheableGenerator: Generator {
    /// Unquoted validator for the output `process` would produce, or
    /// `None` when the output cannot be cached
    async fn etag(&self, request: &GeneratorRequest) -> Option<String>;
}

/// A generator together with its capabilities
#[derive(Clone)]
pub enum GeneratorKind {
    Plain(Arc<dyn Generator>),
    Cacheable(Arc<dyn CacheableGenerator>),
}

impl GeneratorKind {
    pub fn plain<G: Generator + 'static>(generator: G) -> Self {
        GeneratorKind::Plain(Arc::new(generator))
    }

    pub fn cacheable<G: CacheableGenerator + 'static>(generator: G) -> Self {
        GeneratorKind::Cacheable(Arc::new(generator))
    }

    pub fn is_cacheable(&self) -> bool {
        matches!(self, GeneratorKind::Cacheable(_))
    }

    pub async fn process(
        &self,
        request: &GeneratorRequest,
    ) -> std::result::Result<GeneratorOutput, GeneratorError> {
        match self {
            GeneratorKind::Plain(g) => g.process(request).await,
            GeneratorKind::Cacheable(g) => g.process(request).await,
        }
    }

    /// ETag lookup; plain generators never have one
    pub async fn etag(&self, request: &GeneratorRequest) -> Option<String> {
        match self {
            GeneratorKind::Plain(_) => None,
            GeneratorKind::Cacheable(g) => g.etag(request).await,
        }
    }
}

impl fmt::Debug for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratorKind::Plain(_) => f.write_str("GeneratorKind::Plain"),
            GeneratorKind::Cacheable(_) => f.write_str("GeneratorKind::Cacheable"),
        }
    }
}

type Constructor = Arc<dyn Fn() -> GeneratorKind + Send + Sync>;

/// Maps generator type names to constructors
///
/// Populated once at startup; the loader asks it for every generator a
/// services document references.
#[derive(Clone, Default)]
pub struct GeneratorFactory {
    constructors: BTreeMap<String, Constructor>,
}

impl GeneratorFactory {
    /// An empty factory
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory with the built-in generators registered
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        crate::generators::register_builtins(&mut factory);
        factory
    }

    /// Register a constructor under `type_name`, replacing any previous one
    pub fn register<F>(&mut self, type_name: impl Into<String>, constructor: F)
    where
        F: Fn() -> GeneratorKind + Send + Sync + 'static,
    {
        self.constructors
            .insert(type_name.into(), Arc::new(constructor));
    }

    /// Construct a generator by type name
    ///
    /// # Errors
    /// `RouterError::UnknownGenerator` when nothing is registered under
    /// `type_name`.
    pub fn create(&self, type_name: &str) -> Result<GeneratorKind> {
        self.constructors
            .get(type_name)
            .map(|constructor| constructor())
            .ok_or_else(|| RouterError::UnknownGenerator(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for GeneratorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorFactory")
            .field("types", &self.type_names())
            .finish()
    }
}
