use async_trait::async_trait;
use http::Method;
use service_router::dispatch::RequestDispatcher;
use service_router::document::Element;
use service_router::error::RenderError;
use service_router::generators::{ParamsGenerator, StatusGenerator};
use service_router::params::{ParamMap, ParameterSpec};
use service_router::{
    Aggregation, CacheScope, CacheableGenerator, EtagSeed, Generator, GeneratorBinding,
    GeneratorError, GeneratorKind, GeneratorOutput, GeneratorRequest, MatchingService, Rendered,
    Renderer, ServiceDefinition, StatusRule, UriPattern, XmlRenderer,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Test generator counting its invocations
#[derive(Clone, Default)]
struct Scripted {
    tag: Option<String>,
    status: u16,
    fail: bool,
    etag_calls: Arc<AtomicUsize>,
    process_calls: Arc<AtomicUsize>,
}

impl Scripted {
    fn tagged(tag: &str) -> Self {
        Scripted {
            tag: Some(tag.to_string()),
            status: 200,
            ..Default::default()
        }
    }

    fn untagged() -> Self {
        Scripted {
            status: 200,
            ..Default::default()
        }
    }

    fn failing(tag: &str) -> Self {
        Scripted {
            fail: true,
            ..Scripted::tagged(tag)
        }
    }

    fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    fn etags(&self) -> usize {
        self.etag_calls.load(Ordering::SeqCst)
    }

    fn processed(&self) -> usize {
        self.process_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for Scripted {
    async fn process(&self, request: &GeneratorRequest) -> Result<GeneratorOutput, GeneratorError> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(GeneratorError::new("boom", "scripted failure").with_cause("by request"));
        }
        Ok(GeneratorOutput::ok(Element::new("scripted").attr("name", request.name.as_str()))
            .with_status(self.status))
    }
}

#[async_trait]
impl CacheableGenerator for Scripted {
    async fn etag(&self, _request: &GeneratorRequest) -> Option<String> {
        self.etag_calls.fetch_add(1, Ordering::SeqCst);
        self.tag.clone()
    }
}

/// Stores an attribute for later generators
struct Writer;

#[async_trait]
impl Generator for Writer {
    async fn process(&self, request: &GeneratorRequest) -> Result<GeneratorOutput, GeneratorError> {
        request.attributes.set("user", "alice");
        Ok(GeneratorOutput::ok(Element::new("writer")))
    }
}

/// Echoes an attribute stored by an earlier generator
struct Reader;

#[async_trait]
impl Generator for Reader {
    async fn process(&self, request: &GeneratorRequest) -> Result<GeneratorOutput, GeneratorError> {
        let user = request.attributes.get("user").unwrap_or_default();
        Ok(GeneratorOutput::ok(Element::new("reader").text(user)))
    }
}

/// Renderer whose output can never be cached
struct Volatile;

impl Renderer for Volatile {
    fn render(&self, document: &Element, _: &str, _: &ParamMap) -> Result<Rendered, RenderError> {
        Ok(Rendered::new(document.to_document()?, "application/xml"))
    }

    fn etag(&self, _scope_key: &str) -> Option<String> {
        None
    }
}

fn cacheable(name: &str, scripted: &Scripted) -> GeneratorBinding {
    GeneratorBinding::new("scripted", GeneratorKind::cacheable(scripted.clone())).named(name)
}

fn matching(service: Arc<ServiceDefinition>, pattern: &str, path: &str) -> MatchingService {
    let pattern = UriPattern::parse(pattern).unwrap();
    let variables = pattern.resolve(path).unwrap();
    MatchingService {
        service,
        pattern,
        variables,
    }
}

fn dispatcher(swallow: bool) -> RequestDispatcher {
    RequestDispatcher::new(Arc::new(EtagSeed::new(1)), swallow)
        .with_renderer(Arc::new(XmlRenderer), CacheScope::Service)
}

#[tokio::test]
async fn test_first_fails_second_succeeds() {
    let first = Scripted::failing("a");
    let second = Scripted::tagged("b");
    let service = ServiceDefinition::builder("pair", "test")
        .generator(cacheable("first", &first))
        .generator(cacheable("second", &second))
        .build()
        .unwrap();
    let m = matching(service, "/pair", "/pair");

    let swallowed = dispatcher(true).dispatch(&m, &Method::GET, &ParamMap::new()).await;
    assert!(!swallowed.fatal);
    assert_eq!(swallowed.status, 500);
    assert!(!swallowed.cacheable);
    assert!(swallowed.etag.is_none());
    // Both generators had a tag, the failure alone drops it
    assert_eq!(first.etags(), 1);
    assert_eq!(second.etags(), 1);
    assert_eq!(swallowed.errors.len(), 1);
    let error = swallowed.errors.first().unwrap();
    assert_eq!(error.code, "boom");
    assert_eq!(error.generator.as_deref(), Some("first"));

    let generators: Vec<&Element> = swallowed.document.find_all("generator").collect();
    assert_eq!(generators.len(), 2);
    assert_eq!(generators[0].attribute("status"), Some("500"));
    assert!(generators[0].find("error").is_some());
    assert_eq!(generators[1].attribute("status"), Some("200"));
    assert!(generators[1].find("scripted").is_some());

    let strict = dispatcher(false).dispatch(&m, &Method::GET, &ParamMap::new()).await;
    assert!(strict.fatal);
    assert_eq!(strict.errors.len(), 1);
}

#[tokio::test]
async fn test_each_generator_invoked_once() {
    let all = [Scripted::tagged("a"), Scripted::tagged("b"), Scripted::tagged("c")];
    let mut builder = ServiceDefinition::builder("three", "test");
    for (i, scripted) in all.iter().enumerate() {
        builder = builder.generator(cacheable(&format!("g{}", i), scripted));
    }
    let m = matching(builder.build().unwrap(), "/three", "/three");

    let response = dispatcher(true).dispatch(&m, &Method::GET, &ParamMap::new()).await;
    assert!(response.cacheable);
    assert!(response.etag.is_some());
    for scripted in &all {
        assert_eq!(scripted.etags(), 1);
        assert_eq!(scripted.processed(), 1);
    }

    let order: Vec<usize> = response.results.iter().map(|r| r.order).collect();
    assert_eq!(order, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_missing_etag_demotes_and_stops_etag_phase() {
    let first = Scripted::tagged("a");
    let blank = Scripted::untagged();
    let last = Scripted::tagged("c");
    let service = ServiceDefinition::builder("demoted", "test")
        .generator(cacheable("first", &first))
        .generator(cacheable("blank", &blank))
        .generator(cacheable("last", &last))
        .build()
        .unwrap();
    let m = matching(service, "/demoted", "/demoted");

    let response = dispatcher(true).dispatch(&m, &Method::GET, &ParamMap::new()).await;
    assert!(!response.cacheable);
    assert!(response.etag.is_none());
    assert_eq!(first.etags(), 1);
    assert_eq!(blank.etags(), 1);
    assert_eq!(last.etags(), 0);
    assert_eq!(last.processed(), 1);
}

#[tokio::test]
async fn test_plain_generator_skips_etag_phase() {
    let scripted = Scripted::tagged("a");
    let service = ServiceDefinition::builder("mixed", "test")
        .generator(cacheable("scripted", &scripted))
        .generator(GeneratorBinding::new("status", GeneratorKind::plain(StatusGenerator)))
        .build()
        .unwrap();
    let m = matching(service, "/mixed", "/mixed");

    let response = dispatcher(true).dispatch(&m, &Method::GET, &ParamMap::new()).await;
    assert!(!response.cacheable);
    assert_eq!(scripted.etags(), 0);
    assert_eq!(scripted.processed(), 1);
}

#[tokio::test]
async fn test_only_get_and_head_are_cacheable() {
    let scripted = Scripted::tagged("a");
    let service = ServiceDefinition::builder("one", "test")
        .generator(cacheable("scripted", &scripted))
        .build()
        .unwrap();
    let m = matching(service, "/one", "/one");
    let d = dispatcher(true);

    assert!(d.dispatch(&m, &Method::GET, &ParamMap::new()).await.cacheable);
    assert!(d.dispatch(&m, &Method::HEAD, &ParamMap::new()).await.cacheable);
    assert!(!d.dispatch(&m, &Method::POST, &ParamMap::new()).await.cacheable);
}

#[tokio::test]
async fn test_renderer_without_etag_demotes() {
    let scripted = Scripted::tagged("a");
    let service = ServiceDefinition::builder("one", "test")
        .generator(cacheable("scripted", &scripted))
        .build()
        .unwrap();
    let m = matching(service, "/one", "/one");

    let response = RequestDispatcher::new(Arc::new(EtagSeed::new(1)), true)
        .with_renderer(Arc::new(Volatile), CacheScope::Service)
        .dispatch(&m, &Method::GET, &ParamMap::new())
        .await;
    assert!(!response.cacheable);
    assert!(response.etag.is_none());
}

#[tokio::test]
async fn test_etag_depends_on_generator_order_and_seed() {
    let a = Scripted::tagged("alpha");
    let b = Scripted::tagged("beta");
    let forward = ServiceDefinition::builder("s", "test")
        .generator(cacheable("a", &a))
        .generator(cacheable("b", &b))
        .build()
        .unwrap();
    let backward = ServiceDefinition::builder("s", "test")
        .generator(cacheable("b", &b))
        .generator(cacheable("a", &a))
        .build()
        .unwrap();

    let seed = Arc::new(EtagSeed::new(42));
    let d = RequestDispatcher::new(Arc::clone(&seed), true)
        .with_renderer(Arc::new(XmlRenderer), CacheScope::Service);
    let params = ParamMap::new();

    let forward = matching(forward, "/s", "/s");
    let backward = matching(backward, "/s", "/s");
    let tag_forward = d.dispatch(&forward, &Method::GET, &params).await.etag;
    let tag_again = d.dispatch(&forward, &Method::GET, &params).await.etag;
    let tag_backward = d.dispatch(&backward, &Method::GET, &params).await.etag;
    assert_eq!(tag_forward, tag_again);
    assert_ne!(tag_forward, tag_backward);

    seed.reset();
    let tag_reset = d.dispatch(&forward, &Method::GET, &params).await.etag;
    assert_ne!(tag_forward, tag_reset);
}

#[tokio::test]
async fn test_status_rule_selects_generators() {
    let main = Scripted::tagged("m").with_status(404);
    let side = Scripted::tagged("s").with_status(503);
    let service = ServiceDefinition::builder("ruled", "test")
        .status_rule(StatusRule::all(Aggregation::Highest).select("main"))
        .generator(cacheable("main", &main))
        .generator(cacheable("side", &side))
        .build()
        .unwrap();
    let m = matching(service, "/ruled", "/ruled");

    let response = dispatcher(true).dispatch(&m, &Method::GET, &ParamMap::new()).await;
    assert_eq!(response.status, 404);
    assert!(!response.cacheable);
    assert!(response.etag.is_none());
}

#[tokio::test]
async fn test_every_failure_is_kept_in_order() {
    let head = Scripted::failing("a");
    let body = Scripted::tagged("b");
    let tail = Scripted::failing("c");
    let service = ServiceDefinition::builder("flaky", "test")
        .generator(cacheable("head", &head))
        .generator(cacheable("body", &body))
        .generator(cacheable("tail", &tail))
        .build()
        .unwrap();
    let m = matching(service, "/flaky", "/flaky");

    let response = dispatcher(true).dispatch(&m, &Method::GET, &ParamMap::new()).await;
    assert_eq!(response.errors.len(), 2);
    let failed: Vec<Option<&str>> = response
        .errors
        .iter()
        .map(|e| e.generator.as_deref())
        .collect();
    assert_eq!(failed, vec![Some("head"), Some("tail")]);
    assert!(!response.cacheable);
    assert!(response.etag.is_none());

    let generators: Vec<&Element> = response.document.find_all("generator").collect();
    assert_eq!(generators.len(), 3);
    assert_eq!(generators[0].find("error").unwrap().attribute("generator"), Some("head"));
    assert!(generators[1].find("scripted").is_some());
    assert_eq!(generators[2].find("error").unwrap().attribute("generator"), Some("tail"));
    assert_eq!(body.processed(), 1);

    let strict = dispatcher(false).dispatch(&m, &Method::GET, &ParamMap::new()).await;
    assert!(strict.fatal);
    assert_eq!(strict.errors.len(), 2);
}

#[tokio::test]
async fn test_cacheable_non_2xx_is_not_cacheable() {
    let missing = Scripted::tagged("gone").with_status(404);
    let service = ServiceDefinition::builder("gone", "test")
        .generator(cacheable("missing", &missing))
        .build()
        .unwrap();
    let m = matching(service, "/gone", "/gone");

    let response = dispatcher(true).dispatch(&m, &Method::GET, &ParamMap::new()).await;
    assert_eq!(response.status, 404);
    assert!(!response.cacheable);
    assert!(response.etag.is_none());
    assert!(response.errors.is_empty());
}

#[tokio::test]
async fn test_redirect_from_generator() {
    let service = ServiceDefinition::builder("moved", "test")
        .generator(
            GeneratorBinding::new("status", GeneratorKind::plain(StatusGenerator))
                .param(ParameterSpec::new("status", "302").unwrap())
                .param(ParameterSpec::new("location", "/new/{id}").unwrap()),
        )
        .build()
        .unwrap();
    let m = matching(service, "/old/{id}", "/old/5");

    let response = dispatcher(true).dispatch(&m, &Method::GET, &ParamMap::new()).await;
    assert_eq!(response.status, 302);
    assert_eq!(response.location.as_deref(), Some("/new/5"));
    assert!(response.is_redirect());
}

#[tokio::test]
async fn test_attributes_flow_to_later_generators() {
    let service = ServiceDefinition::builder("session", "test")
        .generator(GeneratorBinding::new("writer", GeneratorKind::plain(Writer)))
        .generator(GeneratorBinding::new("reader", GeneratorKind::plain(Reader)))
        .build()
        .unwrap();
    let m = matching(service, "/session", "/session");

    let response = dispatcher(true).dispatch(&m, &Method::GET, &ParamMap::new()).await;
    let reader = response.document.find_all("generator").nth(1).unwrap();
    assert_eq!(reader.find("reader").unwrap().text_content(), "alice");
}

#[tokio::test]
async fn test_parameter_resolution() {
    let service = ServiceDefinition::builder("article", "site")
        .generator(
            GeneratorBinding::new("params", GeneratorKind::cacheable(ParamsGenerator))
                .param(ParameterSpec::new("key", "article-{id}").unwrap())
                .param(ParameterSpec::new("lang", "{lang=en}").unwrap()),
        )
        .build()
        .unwrap();
    let m = matching(service, "/article/{id}", "/article/7");

    let mut raw = ParamMap::new();
    raw.insert("id".into(), "from-query".into());
    raw.insert("q".into(), "search".into());

    let response = dispatcher(true).dispatch(&m, &Method::GET, &raw).await;

    let echoed: Vec<(String, String)> = response.results[0]
        .fragment
        .find_all("param")
        .map(|p| (p.attribute("name").unwrap().to_string(), p.text_content()))
        .collect();
    let lookup = |name: &str| {
        echoed
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    };
    // URI variables take precedence over HTTP parameters
    assert_eq!(lookup("id"), Some("7"));
    assert_eq!(lookup("key"), Some("article-7"));
    assert_eq!(lookup("lang"), Some("en"));
    assert_eq!(lookup("q"), Some("search"));

    // The document carries the raw HTTP parameters and the URI variables
    let routing = response.document.find("routing").unwrap();
    assert_eq!(routing.find("variable").unwrap().text_content(), "7");
    let parameters = response.document.find("parameters").unwrap();
    assert_eq!(parameters.elements().count(), 2);
    assert_eq!(response.scope_key, "service:article");
}
