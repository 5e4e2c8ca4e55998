//! Control parameters
//!
//! Requests carrying `_reload`, `_clear_templates` or `_reset_etag` are
//! control requests. They are answered with a JSON [`ControlReport`]
//! instead of being routed. When a control key is configured the caller
//! must present it, either as the `_key` parameter or in the
//! `X-Control-Key` header; otherwise the request is rejected with 403.

use crate::control_metrics::ControlMetrics;
use crate::error::Result;
use crate::loader::LoadWarning;
use crate::params::ParamMap;
use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Response, StatusCode};
use http_body_util::Full;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Parameter carrying the control key
pub const KEY_PARAM: &str = "_key";

/// Header carrying the control key
pub const KEY_HEADER: &str = "x-control-key";

/// A control action, in the order actions are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ControlAction {
    /// Re-read the services file and swap the registry
    Reload,
    /// Drop every compiled template
    ClearTemplates,
    /// Invalidate every outstanding ETag
    ResetEtag,
}

impl ControlAction {
    pub const ALL: [ControlAction; 3] = [
        ControlAction::Reload,
        ControlAction::ClearTemplates,
        ControlAction::ResetEtag,
    ];

    /// Name of the triggering parameter
    pub fn param(&self) -> &'static str {
        match self {
            ControlAction::Reload => "_reload",
            ControlAction::ClearTemplates => "_clear_templates",
            ControlAction::ResetEtag => "_reset_etag",
        }
    }

    /// Label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            ControlAction::Reload => "reload",
            ControlAction::ClearTemplates => "clear_templates",
            ControlAction::ResetEtag => "reset_etag",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Actions requested by `params`, in execution order
///
/// The presence of the parameter triggers the action; its value is ignored.
pub fn requested_actions(params: &ParamMap) -> Vec<ControlAction> {
    ControlAction::ALL
        .into_iter()
        .filter(|action| params.contains_key(action.param()))
        .collect()
}

/// Who may trigger control actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPolicy {
    /// No key configured, every caller is allowed
    Open,
    /// Callers must present this key
    Key(String),
}

/// Why a control request was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingKey,
    InvalidKey,
}

impl AuthFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            AuthFailure::MissingKey => "missing_key",
            AuthFailure::InvalidKey => "invalid_key",
        }
    }
}

impl ControlPolicy {
    /// Policy for an optional configured key; an empty key is no key
    pub fn from_key(key: Option<&str>) -> Self {
        match key {
            Some(key) if !key.is_empty() => ControlPolicy::Key(key.to_string()),
            _ => ControlPolicy::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ControlPolicy::Open)
    }

    /// Check the key presented by a request
    pub fn authorize(
        &self,
        params: &ParamMap,
        headers: &HeaderMap,
    ) -> std::result::Result<(), AuthFailure> {
        let expected = match self {
            ControlPolicy::Open => return Ok(()),
            ControlPolicy::Key(key) => key,
        };

        let presented = params.get(KEY_PARAM).map(String::as_str).or_else(|| {
            headers
                .get(KEY_HEADER)
                .and_then(|value| value.to_str().ok())
        });

        match presented {
            None => Err(AuthFailure::MissingKey),
            Some(key) if key == expected => Ok(()),
            Some(_) => Err(AuthFailure::InvalidKey),
        }
    }
}

/// Operations control actions act upon
#[async_trait]
pub trait ControlTarget: Send + Sync {
    /// Reload the services file; the registry is kept on error
    async fn reload(&self) -> Result<Vec<LoadWarning>>;

    /// Drop every compiled template
    fn clear_templates(&self);

    /// Reset the ETag seed, returning the new seed
    fn reset_etag(&self) -> u64;

    /// Current registry version
    fn registry_version(&self) -> u64;
}

/// JSON body of a control response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlReport {
    pub success: bool,
    /// Labels of the executed actions
    pub actions: Vec<String>,
    pub registry_version: u64,
    /// Loader warnings of a reload
    pub warnings: Vec<String>,
    pub message: String,
}

/// Executes authorized control actions
pub struct ControlHandler {
    policy: ControlPolicy,
    metrics: Option<Arc<ControlMetrics>>,
}

impl ControlHandler {
    pub fn new(policy: ControlPolicy) -> Self {
        Self {
            policy,
            metrics: None,
        }
    }

    /// Enable Prometheus metrics
    pub fn with_metrics(mut self, metrics: Arc<ControlMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> &ControlPolicy {
        &self.policy
    }

    /// Authorize and run `actions` against `target`
    ///
    /// Actions run in [`ControlAction`] order. A failed reload does not stop
    /// the remaining actions but marks the report unsuccessful and answers
    /// 500.
    pub async fn handle(
        &self,
        target: &dyn ControlTarget,
        actions: &[ControlAction],
        params: &ParamMap,
        headers: &HeaderMap,
    ) -> Response<Full<Bytes>> {
        if let Err(failure) = self.policy.authorize(params, headers) {
            warn!(reason = failure.reason(), "Rejected control request");
            if let Some(metrics) = &self.metrics {
                metrics.record_auth_failure(failure.reason());
            }
            let report = ControlReport {
                success: false,
                actions: Vec::new(),
                registry_version: target.registry_version(),
                warnings: Vec::new(),
                message: "Invalid or missing control key".to_string(),
            };
            return json_response(StatusCode::FORBIDDEN, &report);
        }

        let mut success = true;
        let mut messages = Vec::new();
        let mut warnings = Vec::new();

        for action in actions {
            let start_time = Instant::now();
            if let Some(metrics) = &self.metrics {
                metrics.record_request(action.label());
            }

            let ok = match action {
                ControlAction::Reload => match target.reload().await {
                    Ok(loaded) => {
                        info!(warnings = loaded.len(), "Services reloaded");
                        messages.push(format!("reloaded with {} warning(s)", loaded.len()));
                        warnings.extend(loaded.iter().map(LoadWarning::to_string));
                        true
                    }
                    Err(e) => {
                        warn!("Reload failed, keeping current services: {}", e);
                        messages.push(format!("reload failed: {}", e));
                        false
                    }
                },
                ControlAction::ClearTemplates => {
                    target.clear_templates();
                    info!("Template cache cleared");
                    messages.push("templates cleared".to_string());
                    true
                }
                ControlAction::ResetEtag => {
                    let seed = target.reset_etag();
                    info!(seed, "ETag seed reset");
                    messages.push("etag seed reset".to_string());
                    true
                }
            };

            success &= ok;
            if let Some(metrics) = &self.metrics {
                metrics.record_result(action.label(), ok);
                metrics.record_duration(action.label(), start_time.elapsed().as_secs_f64());
            }
        }

        let report = ControlReport {
            success,
            actions: actions.iter().map(|a| a.label().to_string()).collect(),
            registry_version: target.registry_version(),
            warnings,
            message: messages.join("; "),
        };
        let status = if success {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        json_response(status, &report)
    }
}

fn json_response(status: StatusCode, report: &ControlReport) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string());

    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    response
}
