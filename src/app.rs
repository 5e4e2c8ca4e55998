//! Application context and the request pipeline
//!
//! [`AppContext`] owns every process-wide component (registry, ETag seed,
//! generator factory, renderer, metrics) and turns an HTTP request into a
//! response: parameter collection, control actions, routing, dispatch,
//! conditional handling, rendering and compression.

use crate::compression;
use crate::config::ServerConfig;
use crate::control::{requested_actions, ControlHandler, ControlPolicy, ControlTarget};
use crate::control_metrics::ControlMetrics;
use crate::dispatch::{AggregateResponse, RequestDispatcher};
use crate::error::{Result, RouterError};
use crate::etag::{self, EtagSeed};
use crate::generator::GeneratorFactory;
use crate::loader::{LoadWarning, ServiceConfigLoader};
use crate::metrics::{RouterMetrics, RoutingOutcome};
use crate::params::{collect_pairs, ParamMap};
use crate::registry::{RegistrySnapshot, ServiceRegistry};
use crate::renderer::{fail_safe, render_params, Renderer, XmlRenderer};
use crate::response_assembler::{allow_header, ResponseAssembler};
use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::Full;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Process-wide state shared by every request
pub struct AppContext {
    config: Arc<ServerConfig>,
    registry: Arc<ServiceRegistry>,
    loader: ServiceConfigLoader,
    seed: Arc<EtagSeed>,
    renderer: Arc<dyn Renderer>,
    dispatcher: RequestDispatcher,
    assembler: ResponseAssembler,
    control: ControlHandler,
    metrics: Arc<RouterMetrics>,
    control_metrics: Arc<ControlMetrics>,
}

impl AppContext {
    /// Context with the built-in generators and the plain XML renderer
    pub fn new(config: ServerConfig) -> Result<Self> {
        Self::with_components(
            config,
            GeneratorFactory::with_builtins(),
            Arc::new(XmlRenderer),
        )
    }

    /// Context with a custom generator factory and renderer
    pub fn with_components(
        config: ServerConfig,
        factory: GeneratorFactory,
        renderer: Arc<dyn Renderer>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let seed = Arc::new(EtagSeed::from_clock());
        let control_metrics = Arc::new(ControlMetrics::new().map_err(|e| {
            RouterError::InternalError(format!("Failed to create control metrics: {}", e))
        })?);

        let dispatcher = RequestDispatcher::new(Arc::clone(&seed), config.swallow_generator_errors)
            .with_renderer(Arc::clone(&renderer), config.template_cache_scope);
        let control = ControlHandler::new(ControlPolicy::from_key(config.control_key()))
            .with_metrics(Arc::clone(&control_metrics));

        Ok(AppContext {
            registry: Arc::new(ServiceRegistry::new()),
            loader: ServiceConfigLoader::new(Arc::new(factory)),
            assembler: ResponseAssembler::new(config.expires_secs),
            metrics: Arc::new(RouterMetrics::new()),
            config,
            seed,
            renderer,
            dispatcher,
            control,
            control_metrics,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn seed(&self) -> &Arc<EtagSeed> {
        &self.seed
    }

    pub fn metrics(&self) -> &Arc<RouterMetrics> {
        &self.metrics
    }

    pub fn control_metrics(&self) -> &Arc<ControlMetrics> {
        &self.control_metrics
    }

    /// Load the configured services file into the registry
    pub async fn load_services(&self) -> Result<Vec<LoadWarning>> {
        let report = self
            .loader
            .load_file_async(&self.config.services_file)
            .await?;
        self.install(report.snapshot, report.warnings, &self.config.services_file)
    }

    /// Load a services document given as YAML text
    pub fn load_services_from_str(&self, source: &str) -> Result<Vec<LoadWarning>> {
        let report = self.loader.load_str(source)?;
        self.install(report.snapshot, report.warnings, "<inline>")
    }

    fn install(
        &self,
        snapshot: RegistrySnapshot,
        warnings: Vec<LoadWarning>,
        source: &str,
    ) -> Result<Vec<LoadWarning>> {
        for warning in &warnings {
            warn!(source, "Skipped services entry: {}", warning);
        }
        let version = self.registry.replace(snapshot);
        info!(
            source,
            version,
            services = self.registry.len(),
            warnings = warnings.len(),
            "Services loaded"
        );
        Ok(warnings)
    }

    /// Handle one HTTP request
    pub async fn handle(&self, req: Request<Bytes>) -> Response<Full<Bytes>> {
        let started = Instant::now();
        let (parts, body) = req.into_parts();
        let path = parts.uri.path().to_string();
        let params = collect_params(parts.uri.query(), &parts.headers, &body);

        let actions = requested_actions(&params);
        if !actions.is_empty() {
            self.metrics.record_request(RoutingOutcome::Control);
            let response = self
                .control
                .handle(self, &actions, &params, &parts.headers)
                .await;
            self.metrics.record_request_duration(started.elapsed());
            return response;
        }

        let response = self
            .route(&parts.method, &path, &params, &parts.headers)
            .await
            .unwrap_or_else(|e| error_response(&e));

        self.metrics.record_request_duration(started.elapsed());
        debug!(
            method = %parts.method,
            path = %path,
            status = response.status().as_u16(),
            "Request complete"
        );
        response
    }

    async fn route(
        &self,
        method: &Method,
        path: &str,
        params: &ParamMap,
        headers: &HeaderMap,
    ) -> Result<Response<Full<Bytes>>> {
        let snapshot = self.registry.snapshot();

        if *method == Method::OPTIONS {
            let mut allowed = snapshot.allows(path);
            if allowed.is_empty() {
                self.metrics.record_request(RoutingOutcome::NotFound);
                return Err(RouterError::NotFound(path.to_string()));
            }
            self.metrics.record_request(RoutingOutcome::Options);
            allowed.insert(Method::OPTIONS.to_string());
            let mut response = empty_response(StatusCode::OK);
            response.headers_mut().insert(header::ALLOW, allow_header(&allowed)?);
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
            return Ok(response);
        }

        let Some(matching) = snapshot.get(path, method) else {
            let allowed = snapshot.allows(path);
            if allowed.is_empty() {
                self.metrics.record_request(RoutingOutcome::NotFound);
                return Err(RouterError::NotFound(path.to_string()));
            }
            self.metrics.record_request(RoutingOutcome::MethodNotAllowed);
            return Err(RouterError::MethodNotAllowed {
                method: method.to_string(),
                path: path.to_string(),
                allow: allowed.into_iter().collect(),
            });
        };
        self.metrics.record_request(RoutingOutcome::Routed);

        let mut aggregate = self.dispatcher.dispatch(&matching, method, params).await;
        let generator_time: Duration = aggregate.results.iter().map(|r| r.elapsed).sum();
        self.metrics.record_generators(
            aggregate.results.len() as u64,
            aggregate.errors.len() as u64,
            generator_time,
        );

        if aggregate.fatal {
            self.metrics.record_fatal();
            warn!(
                service = aggregate.service.id(),
                failures = aggregate.errors.len(),
                "Generator failure, answering 500"
            );
            return Ok(text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "500 Internal Server Error",
            ));
        }

        if aggregate.is_redirect() {
            self.metrics.record_redirect();
            let (status, headers) = self.assembler.build_redirect_header(&aggregate)?;
            let mut response = empty_response(status);
            *response.headers_mut() = headers;
            return Ok(response);
        }

        if aggregate.cacheable {
            self.metrics.record_cacheable();
            if let Some(tag) = &aggregate.etag {
                let conditional = headers
                    .get(header::IF_NONE_MATCH)
                    .and_then(|v| v.to_str().ok());
                if let Some(matched) = conditional.and_then(|h| self.matching_variant(h, tag)) {
                    self.metrics.record_not_modified();
                    let mut response = empty_response(StatusCode::NOT_MODIFIED);
                    *response.headers_mut() = self.assembler.build_not_modified_header(&aggregate)?;
                    response
                        .headers_mut()
                        .insert(header::ETAG, etag_header(&matched)?);
                    if self.config.enable_compression {
                        response
                            .headers_mut()
                            .insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
                    }
                    return Ok(response);
                }
            }
        }

        self.render(method, &mut aggregate, params, headers)
    }

    /// The representation tag an If-None-Match header names, plain or gzip
    fn matching_variant(&self, if_none_match: &str, tag: &str) -> Option<String> {
        if etag::if_none_match(if_none_match, tag) {
            return Some(tag.to_string());
        }
        let zipped = compression::gzip_etag(tag);
        (self.config.enable_compression && etag::if_none_match(if_none_match, &zipped))
            .then_some(zipped)
    }

    fn render(
        &self,
        method: &Method,
        aggregate: &mut AggregateResponse,
        params: &ParamMap,
        headers: &HeaderMap,
    ) -> Result<Response<Full<Bytes>>> {
        let render_params = render_params(params, &self.config.render_param_prefix);
        let mut rendered = match self
            .renderer
            .render(&aggregate.document, &aggregate.scope_key, &render_params)
        {
            Ok(rendered) => rendered,
            Err(e) => {
                self.metrics.record_render_failure();
                warn!(
                    service = aggregate.service.id(),
                    diagnostic = e.diagnostic_id(),
                    "Rendering failed, sending plain document: {}",
                    e
                );
                aggregate.status = 500;
                aggregate.cacheable = false;
                aggregate.etag = None;
                fail_safe(&aggregate.document, &e)
            }
        };

        let compressible = self.config.enable_compression
            && compression::should_compress(&rendered.content_type);
        let mut compressed = false;
        if compressible
            && rendered.body.len() >= compression::MIN_COMPRESS_SIZE
            && compression::accepts_gzip(headers)
        {
            rendered.body = compression::gzip(&rendered.body)?;
            compressed = true;
            self.metrics.record_compressed();
        }

        let (status, mut response_headers) =
            self.assembler.build_response_header(aggregate, &rendered)?;
        if compressible {
            response_headers.insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        }
        if compressed {
            response_headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            if let Some(tag) = &aggregate.etag {
                response_headers.insert(header::ETAG, etag_header(&compression::gzip_etag(tag))?);
            }
        }

        let body = if *method == Method::HEAD {
            Bytes::new()
        } else {
            rendered.body
        };
        self.metrics.record_bytes_to_client(body.len() as u64);

        let mut response = Response::new(Full::new(body));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

#[async_trait]
impl ControlTarget for AppContext {
    async fn reload(&self) -> Result<Vec<LoadWarning>> {
        self.load_services().await
    }

    fn clear_templates(&self) {
        self.renderer.clear_cache();
    }

    fn reset_etag(&self) -> u64 {
        self.seed.reset()
    }

    fn registry_version(&self) -> u64 {
        self.registry.version()
    }
}

/// Query string pairs followed by form body pairs; the first occurrence wins
pub fn collect_params(query: Option<&str>, headers: &HeaderMap, body: &[u8]) -> ParamMap {
    let query_pairs = query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).collect::<Vec<_>>())
        .unwrap_or_default();

    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with(FORM_CONTENT_TYPE));
    let body_pairs = if is_form && !body.is_empty() {
        url::form_urlencoded::parse(body).collect::<Vec<_>>()
    } else {
        Vec::new()
    };

    collect_pairs(
        query_pairs
            .into_iter()
            .chain(body_pairs)
            .map(|(k, v)| (k.into_owned(), v.into_owned())),
    )
}

fn etag_header(tag: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(&etag::quote(tag))
        .map_err(|e| RouterError::HttpError(format!("Invalid ETag: {}", e)))
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn text_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Plain-text response for a request-level error
pub fn error_response(error: &RouterError) -> Response<Full<Bytes>> {
    let status =
        StatusCode::from_u16(error.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let message = match error {
        RouterError::NotFound(_) => "404 Not Found".to_string(),
        RouterError::MethodNotAllowed { .. } => "405 Method Not Allowed".to_string(),
        other => {
            warn!("Request failed: {}", other);
            format!("{} {}", status.as_u16(), status.canonical_reason().unwrap_or("Error"))
        }
    };
    let mut response = text_response(status, &message);

    if let RouterError::MethodNotAllowed { allow, .. } = error {
        let allowed: BTreeSet<String> = allow.iter().cloned().collect();
        if let Ok(value) = allow_header(&allowed) {
            response.headers_mut().insert(header::ALLOW, value);
        }
    }
    response
}
