//! Service Router
//!
//! Maps HTTP requests onto configured services, runs each service's
//! generators in declaration order, aggregates their fragments into one
//! document and answers with HTTP caching semantics (ETags, conditional
//! requests, Expires/Cache-Control).
//!
//! # Overview
//!
//! A services document declares groups of services. Each service is bound
//! to one method and one or more URI patterns such as `/article/{id}` or
//! `/files/{+path}`, and lists the generators producing its content.
//! For every request the router:
//!
//! 1. collects HTTP parameters (query string, then form body),
//! 2. looks the path up in the [`ServiceRegistry`] (404 / 405 on a miss),
//! 3. asks cacheable generators for ETags and composes a candidate ETag,
//! 4. invokes every generator once and folds their statuses with the
//!    service's [`StatusRule`],
//! 5. keeps the ETag only for a 2xx aggregate without generator failures,
//!    answering 304 when `If-None-Match` matches it and rendering the
//!    aggregate document otherwise.
//!
//! Generators always run before the conditional check, so a 304 saves the
//! rendering and the body transfer, not the generator work.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use service_router::{AppContext, ServerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let app = AppContext::new(ServerConfig::default())?;
//! app.load_services_from_str(r#"
//! groups:
//!   - name: site
//!     services:
//!       - id: hello
//!         uri: ["/hello/{name}"]
//!         generators:
//!           - type: static
//!             params:
//!               - { name: content, value: "Hello {name}" }
//! "#)?;
//! assert_eq!(app.registry().len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`UriPattern`]: URI templates, matching and expansion
//! - [`ServiceRegistry`]: lock-free readable (method, pattern) → service map
//! - [`ServiceConfigLoader`]: YAML services documents, staged then swapped
//! - [`RequestDispatcher`]: ETag phase, generator invocation, status fold
//! - [`ResponseAssembler`]: aggregate document and cache headers
//! - [`Renderer`]: document to bytes, with a process-wide template cache
//! - [`AppContext`]: owns all of the above and implements the HTTP pipeline
//!
//! # Configuration
//!
//! ```yaml
//! listen_address: "0.0.0.0:8080"
//! services_file: "services.yaml"
//! control_key: "change-me"
//! swallow_generator_errors: true
//! expires_secs: 300
//! ```
//!
//! See [`ServerConfig`] for every option.

pub mod app;
pub mod compression;
pub mod config;
pub mod control;
pub mod control_metrics;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod etag;
pub mod generator;
pub mod generators;
pub mod loader;
pub mod metrics;
pub mod metrics_endpoint;
pub mod params;
pub mod registry;
pub mod renderer;
pub mod response_assembler;
pub mod server;
pub mod service;
pub mod status_rule;
pub mod uri_pattern;

// Re-export commonly used types
pub use app::AppContext;
pub use config::{MetricsEndpointConfig, ServerConfig};
pub use control::{ControlAction, ControlHandler, ControlPolicy, ControlReport};
pub use control_metrics::ControlMetrics;
pub use dispatch::{AggregateResponse, GeneratorResult, RequestDispatcher};
pub use document::Element;
pub use error::{CompoundError, GeneratorError, RenderError, Result, RouterError};
pub use etag::EtagSeed;
pub use generator::{
    CacheableGenerator, Generator, GeneratorFactory, GeneratorKind, GeneratorOutput,
    GeneratorRequest,
};
pub use loader::{LoadWarning, ServiceConfigLoader, WarningKind};
pub use metrics::{MetricsSnapshot, RouterMetrics};
pub use metrics_endpoint::MetricsEndpoint;
pub use params::ParamMap;
pub use registry::{MatchingService, ServiceRegistry};
pub use renderer::{CacheScope, Rendered, Renderer, TemplateRenderer, XmlRenderer};
pub use response_assembler::ResponseAssembler;
pub use server::RouterServer;
pub use service::{GeneratorBinding, ServiceDefinition};
pub use status_rule::{Aggregation, Selector, StatusRule};
pub use uri_pattern::{UriPattern, Variables};
