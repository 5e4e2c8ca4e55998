//! Request dispatch and response aggregation
//!
//! Given a matched service and the request's raw parameters, the dispatcher
//! builds one sub-request per generator, runs the cacheability and ETag
//! phase, invokes every generator exactly once in declaration order and
//! folds the results into an [`AggregateResponse`].
//!
//! Generator failures never escape `dispatch`: each one is captured,
//! substituted into the document as an error fragment and collected into a
//! [`CompoundError`]. Panics inside a generator are not caught.
//!
//! Only a 2xx aggregate without failures keeps the ETag computed up front.

use crate::document::Element;
use crate::error::{CompoundError, GeneratorError};
use crate::etag::{compose_etag, EtagSeed};
use crate::generator::{GeneratorRequest, SharedAttributes};
use crate::params::ParamMap;
use crate::registry::MatchingService;
use crate::renderer::{CacheScope, Renderer};
use crate::response_assembler::{error_fragment, ResponseAssembler};
use crate::service::ServiceDefinition;
use crate::status_rule::StatusFold;
use http::Method;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Outcome of one generator invocation
#[derive(Debug, Clone)]
pub struct GeneratorResult {
    pub order: usize,
    pub name: String,
    pub target: Option<String>,
    pub status: u16,
    /// Redirect target reported by the generator
    pub location: Option<String>,
    /// Tag fetched during the ETag phase
    pub etag: Option<String>,
    /// Generator output, or the error substitution
    pub fragment: Element,
    pub error: Option<GeneratorError>,
    pub elapsed: Duration,
}

/// Everything the HTTP layer needs to answer a dispatched request
#[derive(Debug, Clone)]
pub struct AggregateResponse {
    pub service: Arc<ServiceDefinition>,
    pub status: u16,
    /// Redirect target of the generator whose 3xx won the status fold
    pub location: Option<String>,
    /// Unquoted aggregate validator; present iff `cacheable`, which
    /// requires a 2xx status and no generator failure
    pub etag: Option<String>,
    pub cacheable: bool,
    pub cache_control: Option<String>,
    /// Template cache key of the service
    pub scope_key: String,
    pub document: Element,
    pub errors: CompoundError,
    /// A generator failed and failures are not swallowed
    pub fatal: bool,
    pub results: Vec<GeneratorResult>,
    pub elapsed: Duration,
}

impl AggregateResponse {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.location.is_some()
    }
}

/// Runs the generators of matched services
#[derive(Clone)]
pub struct RequestDispatcher {
    seed: Arc<EtagSeed>,
    renderer: Option<Arc<dyn Renderer>>,
    scope: CacheScope,
    swallow_errors: bool,
}

impl RequestDispatcher {
    /// Create a dispatcher
    ///
    /// # Arguments
    /// * `seed` - process-wide ETag seed
    /// * `swallow_errors` - answer generator failures with an error document
    ///   instead of a hard 500
    pub fn new(seed: Arc<EtagSeed>, swallow_errors: bool) -> Self {
        RequestDispatcher {
            seed,
            renderer: None,
            scope: CacheScope::default(),
            swallow_errors,
        }
    }

    /// Include `renderer`'s tag in aggregate ETags
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>, scope: CacheScope) -> Self {
        self.renderer = Some(renderer);
        self.scope = scope;
        self
    }

    pub fn swallows_errors(&self) -> bool {
        self.swallow_errors
    }

    /// Dispatch a matched request
    ///
    /// # Arguments
    /// * `matching` - the registry match, with resolved URI variables
    /// * `method` - request method
    /// * `raw_params` - HTTP parameters (query string and form body)
    pub async fn dispatch(
        &self,
        matching: &MatchingService,
        method: &Method,
        raw_params: &ParamMap,
    ) -> AggregateResponse {
        let started = Instant::now();
        let service = Arc::clone(&matching.service);
        let bindings = service.generators();
        let scope_key = self.scope.key(&service);

        let mut common = raw_params.clone();
        for (name, value) in &matching.variables {
            common.insert(name.clone(), value.clone());
        }

        let attributes = SharedAttributes::new();
        let requests: Vec<GeneratorRequest> = bindings
            .iter()
            .enumerate()
            .map(|(order, binding)| {
                let mut params = common.clone();
                for spec in &binding.params {
                    params.insert(spec.name.clone(), spec.resolve(&common));
                }
                GeneratorRequest {
                    order,
                    method: method.clone(),
                    service_id: service.id().to_string(),
                    name: binding.effective_name().to_string(),
                    target: binding.target.clone(),
                    params,
                    attributes: attributes.clone(),
                }
            })
            .collect();

        // ETag phase
        let mut cacheable =
            service.is_cacheable() && (*method == Method::GET || *method == Method::HEAD);
        let mut tags: Vec<Option<String>> = vec![None; bindings.len()];
        if cacheable {
            for (binding, request) in bindings.iter().zip(&requests) {
                if tags[request.order].is_some() {
                    continue;
                }
                match binding.generator.etag(request).await {
                    Some(tag) => tags[request.order] = Some(tag),
                    None => {
                        debug!(
                            service = service.id(),
                            generator = %request.name,
                            "Generator has no ETag, response not cacheable"
                        );
                        cacheable = false;
                        break;
                    }
                }
            }
        }

        let mut renderer_tag = None;
        if cacheable {
            if let Some(renderer) = &self.renderer {
                renderer_tag = renderer.etag(&scope_key);
                if renderer_tag.is_none() {
                    debug!(
                        service = service.id(),
                        scope = %scope_key,
                        "Renderer has no ETag, response not cacheable"
                    );
                    cacheable = false;
                }
            }
        }

        let mut etag = if cacheable {
            let ordered: Vec<String> = tags.iter().flatten().cloned().collect();
            Some(compose_etag(self.seed.get(), &ordered, renderer_tag.as_deref()))
        } else {
            None
        };

        // Content phase
        let rule = service.status_rule();
        let mut fold = StatusFold::new(rule.aggregation);
        let mut errors = CompoundError::new();
        let mut results = Vec::with_capacity(bindings.len());

        for (binding, request) in bindings.iter().zip(&requests) {
            let invoked = Instant::now();
            let outcome = binding.generator.process(request).await;
            let elapsed = invoked.elapsed();

            let result = match outcome {
                Ok(output) => GeneratorResult {
                    order: request.order,
                    name: request.name.clone(),
                    target: request.target.clone(),
                    status: output.status,
                    location: output.location,
                    etag: tags[request.order].clone(),
                    fragment: output.fragment,
                    error: None,
                    elapsed,
                },
                Err(err) => {
                    let err = err.for_generator(&request.name);
                    error!(
                        service = service.id(),
                        generator = %request.name,
                        order = request.order,
                        code = %err.code,
                        status = err.status,
                        "Generator failed: {}",
                        err.message
                    );
                    errors.push(err.clone());
                    GeneratorResult {
                        order: request.order,
                        name: request.name.clone(),
                        target: request.target.clone(),
                        status: err.status,
                        location: None,
                        etag: tags[request.order].clone(),
                        fragment: error_fragment(&err),
                        error: Some(err),
                        elapsed,
                    }
                }
            };

            if rule.applies_to(binding) {
                fold.observe(result.status, result.location.as_deref());
            }
            results.push(result);
        }

        let (status, location) = fold.finish();
        if cacheable && (!errors.is_empty() || !(200..300).contains(&status)) {
            debug!(
                service = service.id(),
                status,
                failures = errors.len(),
                "Aggregate failed or is not 2xx, response not cacheable"
            );
            cacheable = false;
            etag = None;
        }
        let fatal = !errors.is_empty() && !self.swallow_errors;
        let document = ResponseAssembler::build_document(matching, raw_params, &results);

        debug!(
            service = service.id(),
            status,
            cacheable,
            failures = errors.len(),
            "Dispatch complete"
        );

        AggregateResponse {
            cache_control: service.cache_control().map(str::to_string),
            service,
            status,
            location,
            etag,
            cacheable,
            scope_key,
            document,
            errors,
            fatal,
            results,
            elapsed: started.elapsed(),
        }
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("scope", &self.scope)
            .field("swallow_errors", &self.swallow_errors)
            .field("has_renderer", &self.renderer.is_some())
            .finish()
    }
}
