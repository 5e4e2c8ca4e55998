//! Services document loader
//!
//! The services document is YAML:
//!
//! ```yaml
//! version: 1
//! status_rule: { aggregation: highest }
//! groups:
//!   - name: site
//!     services:
//!       - id: article
//!         method: GET
//!         uri: ["/article/{id}"]
//!         cache_control: "max-age=60"
//!         generators:
//!           - type: static
//!             name: title
//!             params:
//!               - { name: content, value: "Article {id}" }
//! ```
//!
//! Loading happens in two passes. The document is first deserialized into
//! a plain syntax tree; structural problems (malformed YAML, unknown
//! version) are fatal. The tree is then validated and registered into a
//! fresh [`RegistrySnapshot`]; semantic problems skip the offending entry
//! and are reported as [`LoadWarning`]s. The live registry only changes
//! when the finished snapshot is swapped in.

use crate::error::{Result, RouterError};
use crate::generator::GeneratorFactory;
use crate::params::ParameterSpec;
use crate::registry::{RegistrySnapshot, ServiceRegistry};
use crate::service::{GeneratorBinding, ServiceDefinition};
use crate::status_rule::{Aggregation, Selector, StatusRule};
use crate::uri_pattern::UriPattern;
use http::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Services document versions this loader understands
pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// Root of a services document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServicesDocument {
    /// Schema version; absent means the earliest known version
    #[serde(default)]
    pub version: Option<u32>,

    #[serde(default)]
    pub status_rule: Option<StatusRuleNode>,

    #[serde(default)]
    pub groups: Vec<GroupNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupNode {
    pub name: String,

    #[serde(default)]
    pub status_rule: Option<StatusRuleNode>,

    #[serde(default)]
    pub services: Vec<ServiceNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceNode {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default)]
    pub uri: Vec<String>,

    #[serde(default)]
    pub cache_control: Option<String>,

    #[serde(default)]
    pub flags: Option<String>,

    #[serde(default)]
    pub status_rule: Option<StatusRuleNode>,

    #[serde(default)]
    pub generators: Vec<GeneratorNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorNode {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub target: Option<String>,

    #[serde(default)]
    pub params: Vec<ParamNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamNode {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Status rule as written in the document
///
/// Kept as strings so a bad value is a warning rather than a parse error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusRuleNode {
    #[serde(default = "default_aggregation")]
    pub aggregation: String,

    #[serde(default = "default_selector")]
    pub selector: String,

    #[serde(default)]
    pub select: Vec<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_aggregation() -> String {
    "highest".to_string()
}

fn default_selector() -> String {
    "name".to_string()
}

impl StatusRuleNode {
    fn to_rule(&self) -> Result<StatusRule> {
        let mut rule = StatusRule::new(
            self.selector.parse::<Selector>()?,
            self.aggregation.parse::<Aggregation>()?,
        );
        rule.selected.extend(self.select.iter().cloned());
        Ok(rule)
    }
}

/// Kinds of non-fatal load problems
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    DuplicateGroup,
    DuplicatePattern,
    InvalidPattern,
    InvalidMethod,
    UnknownGenerator,
    InvalidParameter,
    InvalidStatusRule,
    MissingId,
    NoPatterns,
}

/// A skipped entry, with where it was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadWarning {
    pub kind: WarningKind,
    pub location: String,
    pub message: String,
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}

/// Outcome of a successful load: the staged snapshot and every warning
#[derive(Debug)]
pub struct LoadReport {
    pub snapshot: RegistrySnapshot,
    pub warnings: Vec<LoadWarning>,
}

/// Loads services documents into registries
#[derive(Debug, Clone)]
pub struct ServiceConfigLoader {
    factory: Arc<GeneratorFactory>,
}

impl ServiceConfigLoader {
    pub fn new(factory: Arc<GeneratorFactory>) -> Self {
        ServiceConfigLoader { factory }
    }

    /// Parse and stage a services document from a YAML string
    ///
    /// # Errors
    /// `RouterError::ConfigError` on malformed YAML and
    /// `RouterError::UnsupportedVersion` on an unknown version.
    pub fn load_str(&self, source: &str) -> Result<LoadReport> {
        let document: ServicesDocument = serde_yaml::from_str(source).map_err(|e| {
            RouterError::ConfigError(format!("malformed services document: {}", e))
        })?;
        self.load_document(&document)
    }

    /// Parse and stage a services document from a file
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<LoadReport> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| read_error(path.as_ref(), e))?;
        self.load_str(&content)
    }

    /// [`load_file`](Self::load_file) without blocking the runtime
    pub async fn load_file_async<P: AsRef<Path>>(&self, path: P) -> Result<LoadReport> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| read_error(path.as_ref(), e))?;
        self.load_str(&content)
    }

    /// Stage, then swap into `registry`; the registry is untouched on error
    ///
    /// # Returns
    /// The warnings collected while loading.
    pub fn load_into(&self, source: &str, registry: &ServiceRegistry) -> Result<Vec<LoadWarning>> {
        let report = self.load_str(source)?;
        let version = registry.replace(report.snapshot);
        info!(
            version,
            warnings = report.warnings.len(),
            "Services document loaded"
        );
        Ok(report.warnings)
    }

    /// Validate and register an already parsed document
    pub fn load_document(&self, document: &ServicesDocument) -> Result<LoadReport> {
        let version = document.version.unwrap_or(SUPPORTED_VERSIONS[0]);
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(RouterError::UnsupportedVersion(version));
        }

        let mut pass = LoadPass::default();
        let root_rule =
            pass.scoped_rule(document.status_rule.as_ref(), &StatusRule::default(), "root");

        let mut groups_seen = HashSet::new();
        for group in &document.groups {
            let location = format!("group '{}'", group.name);
            if !groups_seen.insert(group.name.as_str()) {
                pass.warn(
                    WarningKind::DuplicateGroup,
                    &location,
                    "duplicate group name, group skipped",
                );
                continue;
            }

            let group_rule = pass.scoped_rule(group.status_rule.as_ref(), &root_rule, &location);
            for (index, service) in group.services.iter().enumerate() {
                self.load_service(&mut pass, &group.name, index, service, &group_rule);
            }
        }

        Ok(LoadReport {
            snapshot: pass.snapshot,
            warnings: pass.warnings,
        })
    }

    fn load_service(
        &self,
        pass: &mut LoadPass,
        group: &str,
        index: usize,
        node: &ServiceNode,
        inherited: &StatusRule,
    ) {
        let id = match node.id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => {
                let location = format!("group '{}' / service #{}", group, index);
                pass.warn(WarningKind::MissingId, &location, "service without id skipped");
                return;
            }
        };
        let location = format!("group '{}' / service '{}'", group, id);

        if node.uri.is_empty() {
            pass.warn(WarningKind::NoPatterns, &location, "service without URI patterns skipped");
            return;
        }

        let method = match parse_method(&node.method) {
            Some(method) => method,
            None => {
                pass.warn(
                    WarningKind::InvalidMethod,
                    &location,
                    format!("method '{}' cannot be routed, service skipped", node.method),
                );
                return;
            }
        };

        let rule = pass.scoped_rule(node.status_rule.as_ref(), inherited, &location);

        let mut builder = ServiceDefinition::builder(id, group).status_rule(rule);
        if let Some(cache_control) = &node.cache_control {
            builder = builder.cache_control(cache_control.clone());
        }
        if let Some(flags) = &node.flags {
            builder = builder.flags(flags.clone());
        }

        for generator in &node.generators {
            match self.bind_generator(generator) {
                Ok(binding) => builder = builder.generator(binding),
                Err(err) => {
                    let kind = match err {
                        RouterError::UnknownGenerator(_) => WarningKind::UnknownGenerator,
                        _ => WarningKind::InvalidParameter,
                    };
                    pass.warn(kind, &location, format!("{}, service skipped", err));
                    return;
                }
            }
        }

        let service = match builder.build() {
            Ok(service) => service,
            Err(err) => {
                pass.warn(WarningKind::MissingId, &location, err.to_string());
                return;
            }
        };

        for raw in &node.uri {
            let pattern = match UriPattern::parse(raw) {
                Ok(pattern) => pattern,
                Err(err) => {
                    pass.warn(WarningKind::InvalidPattern, &location, err.to_string());
                    continue;
                }
            };
            if !pass.patterns_seen.insert((method.clone(), raw.clone())) {
                pass.warn(
                    WarningKind::DuplicatePattern,
                    &location,
                    format!("{} {} already declared earlier in the document", method, raw),
                );
                continue;
            }
            pass.snapshot
                .register(Arc::clone(&service), pattern, method.clone());
        }
    }

    fn bind_generator(&self, node: &GeneratorNode) -> Result<GeneratorBinding> {
        let generator = self.factory.create(&node.type_name)?;
        let mut binding = GeneratorBinding::new(node.type_name.clone(), generator);
        if let Some(name) = &node.name {
            binding = binding.named(name.clone());
        }
        if let Some(target) = &node.target {
            binding = binding.targeted(target.clone());
        }
        for param in &node.params {
            binding = binding.param(ParameterSpec::new(param.name.clone(), &param.value)?);
        }
        Ok(binding)
    }
}

#[derive(Default)]
struct LoadPass {
    snapshot: RegistrySnapshot,
    warnings: Vec<LoadWarning>,
    patterns_seen: HashSet<(Method, String)>,
}

impl LoadPass {
    fn warn(&mut self, kind: WarningKind, location: &str, message: impl Into<String>) {
        let warning = LoadWarning {
            kind,
            location: location.to_string(),
            message: message.into(),
        };
        warn!(kind = ?warning.kind, location = %warning.location, "{}", warning.message);
        self.warnings.push(warning);
    }

    /// Rule declared at this scope, or the inherited one
    fn scoped_rule(
        &mut self,
        node: Option<&StatusRuleNode>,
        inherited: &StatusRule,
        location: &str,
    ) -> StatusRule {
        match node.map(StatusRuleNode::to_rule) {
            None => inherited.clone(),
            Some(Ok(rule)) => rule,
            Some(Err(err)) => {
                self.warn(
                    WarningKind::InvalidStatusRule,
                    location,
                    format!("{}, inherited rule kept", err),
                );
                inherited.clone()
            }
        }
    }
}

/// Methods a service may be registered under; OPTIONS is answered by the
/// router itself
fn read_error(path: &Path, err: std::io::Error) -> RouterError {
    RouterError::ConfigError(format!(
        "failed to read services file {}: {}",
        path.display(),
        err
    ))
}

fn parse_method(raw: &str) -> Option<Method> {
    let method = Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes()).ok()?;
    match method {
        Method::GET
        | Method::HEAD
        | Method::POST
        | Method::PUT
        | Method::DELETE
        | Method::PATCH => Some(method),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> ServiceConfigLoader {
        ServiceConfigLoader::new(Arc::new(GeneratorFactory::with_builtins()))
    }

    #[test]
    fn test_minimal_document() {
        let report = loader()
            .load_str(
                r#"
groups:
  - name: site
    services:
      - id: home
        uri: ["/"]
        generators:
          - type: static
"#,
            )
            .unwrap();
        assert!(report.warnings.is_empty());
        assert!(report.snapshot.get("/", &Method::GET).is_some());
    }

    #[test]
    fn test_unknown_version_is_fatal() {
        let err = loader().load_str("version: 9\ngroups: []\n").unwrap_err();
        assert!(matches!(err, RouterError::UnsupportedVersion(9)));
    }

    #[test]
    fn test_malformed_document_is_fatal() {
        let err = loader().load_str("groups: [ {name: x, bogus: 1} ]").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("post"), Some(Method::POST));
        assert_eq!(parse_method("OPTIONS"), None);
        assert_eq!(parse_method("not a method"), None);
    }
}
