//! Lifecycle actions: small, declaratively-configured side effects run
//! before/after a node executes.
//!
//! Grounded on `actions.py`: a `BaseAction` ABC, a `create_action` factory
//! keyed by a `type` tag, and seven concrete actions (`log`, `notify`,
//! `webhook`, `metric`, `set_context`, `validate`, `transform`). The Rust
//! port keeps the same seven actions and the same tag-dispatch shape, but
//! expresses each action's configuration as its own struct inside a tagged
//! `ActionDefinition` enum (serde's internally-tagged representation)
//! instead of a dynamically-typed config dict, so invalid configurations
//! are rejected at deserialisation time rather than at invocation time.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{FlowError, Result};

/// Severity tag for [`LogActionDef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Logs a templated message through `tracing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogActionDef {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    /// Template string; `{node_name}`, `{result}`, `{error}` and any
    /// `ctx.<key>` placeholder are substituted, matching
    /// `actions.py`'s `_safe_format` helper.
    pub message: String,
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

/// Sends a notification through a named channel (left abstract; the engine
/// wires channels in via [`Action::invoke`]'s `ctx` side-channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyActionDef {
    pub channel: String,
    pub message: String,
    #[serde(default)]
    pub severity: Option<String>,
}

/// HTTP method for [`WebhookActionDef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
}

/// Posts the node's payload to an external URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookActionDef {
    pub url: String,
    #[serde(default = "default_webhook_method")]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

fn default_webhook_method() -> HttpMethod {
    HttpMethod::Post
}
fn default_webhook_timeout() -> u64 {
    30
}

/// Records a numeric metric observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricActionDef {
    pub name: String,
    #[serde(default = "default_metric_value")]
    pub value: f64,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

fn default_metric_value() -> f64 {
    1.0
}

/// Extracts a value (by dot-path) from the node's result and writes it
/// into the shared flow context under `key`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetContextActionDef {
    pub key: String,
    /// Dot-path into the result, e.g. `"decision.choice"`. Empty means the
    /// whole result.
    #[serde(default)]
    pub path: String,
}

/// What to do when a [`ValidateActionDef`] fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnValidationFailure {
    Raise,
    Skip,
    Fallback,
}

/// Validates the node's result against a JSON Schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateActionDef {
    #[serde(rename = "schema")]
    pub schema: Json,
    #[serde(default = "default_on_failure")]
    pub on_failure: OnValidationFailure,
    #[serde(default)]
    pub fallback: Option<Json>,
}

fn default_on_failure() -> OnValidationFailure {
    OnValidationFailure::Raise
}

/// Applies a restricted transform expression (method call or attribute
/// access only, never arbitrary code — mirrors `actions.py`'s `_safe_eval`)
/// to the node's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformActionDef {
    /// E.g. `"result.lower()"`, `"result.upper()"`, `"decision.choice"` — a
    /// dot-separated chain of attribute accesses and/or zero-arg method
    /// calls, with an optional leading `result.` matching the original's
    /// `_safe_eval`.
    pub expression: String,
}

/// Declarative configuration for one lifecycle action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionDefinition {
    Log(LogActionDef),
    Notify(NotifyActionDef),
    Webhook(WebhookActionDef),
    Metric(MetricActionDef),
    SetContext(SetContextActionDef),
    Validate(ValidateActionDef),
    Transform(TransformActionDef),
}

/// Everything an [`Action`] needs to run: the node it's attached to, its
/// payload (the prompt for pre-actions, the result for post-actions, stored
/// uniformly as JSON so `set_context`/`validate`/`transform` don't need to
/// know which phase invoked them), the original prompt text for templating,
/// whether the node failed, and read/write access to the shared flow
/// context.
pub struct ActionContext<'a> {
    pub node_name: &'a str,
    pub result: Option<&'a Json>,
    pub prompt: Option<&'a str>,
    pub error: Option<&'a str>,
    pub shared_context: &'a mut HashMap<String, Json>,
}

/// A runnable lifecycle action.
#[async_trait]
pub trait Action: Send + Sync {
    /// Execute the action. Implementations should treat failures the way
    /// their own semantics dictate (e.g. `validate`'s `on_failure`); most
    /// actions other than `validate` are best-effort and log rather than
    /// fail the node on error.
    async fn invoke(&self, ctx: &mut ActionContext<'_>) -> Result<()>;

    /// Action type tag, for logging.
    fn tag(&self) -> &'static str;
}

struct LogAction(LogActionDef);

#[async_trait]
impl Action for LogAction {
    async fn invoke(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let message = safe_format(&self.0.message, ctx);
        match self.0.level {
            LogLevel::Debug => tracing::debug!(node = ctx.node_name, "{message}"),
            LogLevel::Info => tracing::info!(node = ctx.node_name, "{message}"),
            LogLevel::Warn => tracing::warn!(node = ctx.node_name, "{message}"),
            LogLevel::Error => tracing::error!(node = ctx.node_name, "{message}"),
        }
        Ok(())
    }

    fn tag(&self) -> &'static str {
        "log"
    }
}

/// Substitutes `{node_name}`, `{result}`, `{error}` and `{ctx.<key>}`
/// placeholders in a template; unresolved placeholders are left verbatim
/// rather than raising, matching `actions.py::_safe_format`.
fn safe_format(template: &str, ctx: &ActionContext<'_>) -> String {
    let mut out = template.to_string();
    out = out.replace("{node_name}", ctx.node_name);
    if let Some(result) = ctx.result {
        out = out.replace("{result}", &json_to_display(result));
    }
    if let Some(prompt) = ctx.prompt {
        out = out.replace("{prompt}", prompt);
    }
    if let Some(error) = ctx.error {
        out = out.replace("{error}", error);
    }
    for (key, value) in ctx.shared_context.iter() {
        let placeholder = format!("{{ctx.{key}}}");
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, &json_to_display(value));
        }
    }
    out
}

fn json_to_display(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

struct NotifyAction(NotifyActionDef);

#[async_trait]
impl Action for NotifyAction {
    async fn invoke(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        tracing::info!(
            node = ctx.node_name,
            channel = %self.0.channel,
            severity = ?self.0.severity,
            "notify: {}",
            self.0.message
        );
        Ok(())
    }

    fn tag(&self) -> &'static str {
        "notify"
    }
}

struct WebhookAction {
    def: WebhookActionDef,
    client: flow_utils::HttpClient,
}

impl WebhookAction {
    fn new(def: WebhookActionDef) -> Result<Self> {
        let config = flow_utils::ClientConfig::new()
            .with_timeout(std::time::Duration::from_secs(def.timeout_secs));
        let client = flow_utils::HttpClient::new(config)
            .map_err(|e| FlowError::Other(format!("webhook client: {e}")))?;
        Ok(Self { def, client })
    }
}

#[async_trait]
impl Action for WebhookAction {
    async fn invoke(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let body = serde_json::json!({
            "node_name": ctx.node_name,
            "result": ctx.result,
            "error": ctx.error,
        });
        let outcome = match self.def.method {
            HttpMethod::Post => self.client.post_json(&self.def.url, &body).await,
            HttpMethod::Put => self.client.put_json(&self.def.url, &body).await,
        };
        if let Err(err) = outcome {
            tracing::warn!(node = ctx.node_name, url = %self.def.url, %err, "webhook delivery failed");
        }
        Ok(())
    }

    fn tag(&self) -> &'static str {
        "webhook"
    }
}

struct MetricAction(MetricActionDef);

#[async_trait]
impl Action for MetricAction {
    async fn invoke(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        tracing::info!(
            node = ctx.node_name,
            metric = %self.0.name,
            value = self.0.value,
            tags = ?self.0.tags,
            "metric observation"
        );
        Ok(())
    }

    fn tag(&self) -> &'static str {
        "metric"
    }
}

struct SetContextAction(SetContextActionDef);

#[async_trait]
impl Action for SetContextAction {
    async fn invoke(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let Some(result) = ctx.result else {
            return Ok(());
        };
        let extracted = extract_path(result, &self.0.path);
        ctx.shared_context.insert(self.0.key.clone(), extracted);
        Ok(())
    }

    fn tag(&self) -> &'static str {
        "set_context"
    }
}

/// Dot-path extraction, e.g. `extract_path(result, "decision.choice")`.
/// An empty path returns the whole value. Missing segments yield `Null`
/// rather than erroring, mirroring `actions.py::_extract_value`.
fn extract_path(value: &Json, path: &str) -> Json {
    if path.is_empty() {
        return value.clone();
    }
    let mut current = value;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Json::Null,
        }
    }
    current.clone()
}

struct ValidateAction(ValidateActionDef);

#[async_trait]
impl Action for ValidateAction {
    async fn invoke(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let Some(result) = ctx.result else {
            return Ok(());
        };

        #[cfg(feature = "json-validation")]
        let valid = {
            match jsonschema::JSONSchema::compile(&self.0.schema) {
                Ok(compiled) => compiled.is_valid(result),
                Err(err) => {
                    tracing::warn!(node = ctx.node_name, %err, "invalid json schema; treating as pass");
                    true
                }
            }
        };
        #[cfg(not(feature = "json-validation"))]
        let valid = true;

        if valid {
            return Ok(());
        }

        match self.0.on_failure {
            OnValidationFailure::Raise => Err(FlowError::ValidationFailed {
                node: ctx.node_name.to_string(),
                reason: "result did not match schema".to_string(),
            }),
            OnValidationFailure::Skip => {
                tracing::warn!(node = ctx.node_name, "validation failed; skipping per on_failure=skip");
                Ok(())
            }
            OnValidationFailure::Fallback => {
                if let Some(fallback) = &self.0.fallback {
                    ctx.shared_context
                        .insert(format!("{}__validation_fallback", ctx.node_name), fallback.clone());
                }
                Ok(())
            }
        }
    }

    fn tag(&self) -> &'static str {
        "validate"
    }
}

struct TransformAction(TransformActionDef);

#[async_trait]
impl Action for TransformAction {
    async fn invoke(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let Some(result) = ctx.result else {
            return Ok(());
        };
        let transformed = safe_eval(result, &self.0.expression);
        ctx.shared_context.insert("_transformed_result".to_string(), transformed);
        Ok(())
    }

    fn tag(&self) -> &'static str {
        "transform"
    }
}

/// Safely evaluate a restricted expression against `obj`: a dot-separated
/// chain of attribute accesses and/or zero-arg method calls (`name()`),
/// with an optional leading `result.` prefix stripped first — mirrors
/// `actions.py::TransformAction._safe_eval` exactly, including its
/// fall-through behaviour (a segment not present on the current value
/// just returns the current value unchanged rather than erroring).
fn safe_eval(obj: &Json, expression: &str) -> Json {
    let expression = expression.strip_prefix("result.").unwrap_or(expression);
    let mut current = obj.clone();
    for part in expression.replace("()", "").split('.') {
        if part.is_empty() {
            continue;
        }
        current = match &current {
            Json::Null => return Json::Null,
            Json::Object(map) => map.get(part).cloned().unwrap_or_else(|| current.clone()),
            _ => match apply_method_or_attr(&current, part) {
                Some(v) => v,
                None => return current,
            },
        };
    }
    current
}

/// The fixed set of zero-arg "methods"/attributes the original's
/// `hasattr`/`getattr` probe resolves for scalar values: string case/trim
/// transforms and `len`. Anything else leaves the value untouched.
fn apply_method_or_attr(value: &Json, name: &str) -> Option<Json> {
    match name {
        "upper" => value.as_str().map(|s| Json::String(s.to_uppercase())),
        "lower" => value.as_str().map(|s| Json::String(s.to_lowercase())),
        "strip" => value.as_str().map(|s| Json::String(s.trim().to_string())),
        "len" => Some(match value {
            Json::String(s) => Json::Number(s.chars().count().into()),
            Json::Array(a) => Json::Number(a.len().into()),
            Json::Object(o) => Json::Number(o.len().into()),
            _ => Json::Null,
        }),
        _ => None,
    }
}

/// Build a runnable [`Action`] from its declarative definition, matching
/// `actions.py::create_action`'s tag-based dispatch.
pub fn create_action(def: &ActionDefinition) -> Result<Box<dyn Action>> {
    Ok(match def.clone() {
        ActionDefinition::Log(d) => Box::new(LogAction(d)),
        ActionDefinition::Notify(d) => Box::new(NotifyAction(d)),
        ActionDefinition::Webhook(d) => Box::new(WebhookAction::new(d)?),
        ActionDefinition::Metric(d) => Box::new(MetricAction(d)),
        ActionDefinition::SetContext(d) => Box::new(SetContextAction(d)),
        ActionDefinition::Validate(d) => Box::new(ValidateAction(d)),
        ActionDefinition::Transform(d) => Box::new(TransformAction(d)),
    })
}

/// Run a list of actions in order, stopping at (and propagating) the first
/// one that returns an error — only `validate` with `on_failure = raise`
/// does this; every other action swallows its own failures.
pub async fn run_actions(defs: &[ActionDefinition], ctx: &mut ActionContext<'_>) -> Result<()> {
    for def in defs {
        let action = create_action(def)?;
        action.invoke(ctx).await?;
    }
    Ok(())
}
