//! Service definitions
//!
//! A service is an immutable, ordered list of generator bindings plus the
//! metadata the aggregator needs (group, cache directive, status rule).

use crate::error::{Result, RouterError};
use crate::generator::GeneratorKind;
use crate::params::ParameterSpec;
use crate::status_rule::StatusRule;
use std::sync::Arc;

/// One generator as used by one service
#[derive(Debug, Clone)]
pub struct GeneratorBinding {
    pub generator: GeneratorKind,
    /// Factory type name the generator was created from
    pub type_name: String,
    /// Optional name override
    pub name: Option<String>,
    pub target: Option<String>,
    pub params: Vec<ParameterSpec>,
}

impl GeneratorBinding {
    pub fn new(type_name: impl Into<String>, generator: GeneratorKind) -> Self {
        GeneratorBinding {
            generator,
            type_name: type_name.into(),
            name: None,
            target: None,
            params: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn targeted(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn param(mut self, spec: ParameterSpec) -> Self {
        self.params.push(spec);
        self
    }

    /// Name override if present, type name otherwise
    pub fn effective_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.type_name)
    }
}

/// An immutable service definition
#[derive(Debug)]
pub struct ServiceDefinition {
    id: String,
    group: String,
    cache_control: Option<String>,
    flags: String,
    status_rule: StatusRule,
    generators: Vec<GeneratorBinding>,
    cacheable: bool,
}

impl ServiceDefinition {
    pub fn builder(id: impl Into<String>, group: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            id: id.into(),
            group: group.into(),
            cache_control: None,
            flags: String::new(),
            status_rule: StatusRule::default(),
            generators: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn cache_control(&self) -> Option<&str> {
        self.cache_control.as_deref()
    }

    pub fn flags(&self) -> &str {
        &self.flags
    }

    pub fn status_rule(&self) -> &StatusRule {
        &self.status_rule
    }

    /// Generator bindings in declaration order
    pub fn generators(&self) -> &[GeneratorBinding] {
        &self.generators
    }

    /// True iff every generator has the cacheable capability
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }
}

/// Builder for [`ServiceDefinition`]
#[derive(Debug)]
pub struct ServiceBuilder {
    id: String,
    group: String,
    cache_control: Option<String>,
    flags: String,
    status_rule: StatusRule,
    generators: Vec<GeneratorBinding>,
}

impl ServiceBuilder {
    pub fn cache_control(mut self, value: impl Into<String>) -> Self {
        self.cache_control = Some(value.into());
        self
    }

    pub fn flags(mut self, flags: impl Into<String>) -> Self {
        self.flags = flags.into();
        self
    }

    pub fn status_rule(mut self, rule: StatusRule) -> Self {
        self.status_rule = rule;
        self
    }

    pub fn generator(mut self, binding: GeneratorBinding) -> Self {
        self.generators.push(binding);
        self
    }

    /// Finish the definition
    ///
    /// # Errors
    /// `RouterError::ConfigError` when the id is empty.
    pub fn build(self) -> Result<Arc<ServiceDefinition>> {
        if self.id.trim().is_empty() {
            return Err(RouterError::ConfigError(
                "service id must not be empty".to_string(),
            ));
        }
        let cacheable = self.generators.iter().all(|b| b.generator.is_cacheable());
        Ok(Arc::new(ServiceDefinition {
            id: self.id,
            group: self.group,
            cache_control: self.cache_control,
            flags: self.flags,
            status_rule: self.status_rule,
            generators: self.generators,
            cacheable,
        }))
    }
}
