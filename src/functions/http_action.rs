//! REST and GraphQL action execution.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use super::template::{render, render_with, value_to_text};
use crate::config::AgentryConfig;
use crate::error::{AgentryError, Result};
use crate::manifest::{HttpAction, HttpMethod};

/// RFC 3986 unreserved characters stay as-is.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode one URL component.
pub fn encode_component(text: &str) -> String {
    utf8_percent_encode(text, COMPONENT).to_string()
}

/// Resolve the app key for `action` against the target `url`.
///
/// A secret of the form `host,value` is only released to that exact host;
/// any other host is refused with [`AgentryError::DomainMismatch`].
pub fn resolve_appkey(
    action: &HttpAction,
    config: &AgentryConfig,
    url: &str,
) -> Result<Option<String>> {
    let Some(ref name) = action.appkey else {
        return Ok(None);
    };
    let secret = config
        .secret(name)
        .ok_or_else(|| AgentryError::Configuration(format!("Missing secret {name}")))?;

    match secret.split_once(',') {
        None => Ok(Some(secret.to_string())),
        Some((host, value)) => {
            let target = Url::parse(url)
                .map_err(|e| AgentryError::InvalidArgument(format!("invalid url {url}: {e}")))?;
            let actual = target.host_str().unwrap_or_default();
            if actual != host.trim() {
                return Err(AgentryError::DomainMismatch {
                    expected: host.trim().to_string(),
                    actual: actual.to_string(),
                });
            }
            Ok(Some(value.trim().to_string()))
        }
    }
}

/// Render header templates against the arguments plus `{appkey}`.
pub fn build_headers(
    action: &HttpAction,
    args: &Map<String, Value>,
    appkey: Option<&str>,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, template) in &action.headers {
        let value = render_with(template, |key| match key {
            "appkey" => appkey.map(str::to_string),
            other => args.get(other).map(value_to_text),
        })?;
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AgentryError::Manifest(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| AgentryError::InvalidArgument(format!("invalid header value: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Render the URL template with every argument percent-encoded.
pub fn build_url(action: &HttpAction, args: &Map<String, Value>) -> Result<String> {
    let encoded: Map<String, Value> = args
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(encode_component(&value_to_text(v)))))
        .collect();
    render(&action.url, &encoded)
}

/// Executes REST and GraphQL actions with a shared client.
#[derive(Debug, Clone)]
pub struct HttpActionExecutor {
    client: reqwest::Client,
}

impl HttpActionExecutor {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Call a REST endpoint. Non-200 responses are returned as
    /// [`AgentryError::Api`].
    pub async fn rest(
        &self,
        action: &HttpAction,
        args: &Map<String, Value>,
        config: &AgentryConfig,
    ) -> Result<String> {
        let url = build_url(action, args)?;
        let appkey = resolve_appkey(action, config, &url)?;
        let headers = build_headers(action, args, appkey.as_deref())?;

        debug!(method = %action.method, url = %url, "rest action");
        let request = match action.method {
            HttpMethod::Get => self.client.get(&url).headers(headers),
            HttpMethod::Post => self
                .client
                .post(&url)
                .headers(headers)
                .header(CONTENT_TYPE, "application/json")
                .json(args),
        };

        let resp = request.send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if status != 200 {
            return Err(AgentryError::api(status, body));
        }
        Ok(body)
    }

    /// Run the `query` argument against a GraphQL endpoint. Transport and
    /// query failures come back as text for the model; only app-key
    /// problems are errors.
    pub async fn graphql(
        &self,
        action: &HttpAction,
        args: &Map<String, Value>,
        config: &AgentryConfig,
    ) -> Result<String> {
        let appkey = resolve_appkey(action, config, &action.url)?;
        let headers = build_headers(action, args, appkey.as_deref())?;

        match self.graphql_request(action, args, headers).await {
            Ok(body) => Ok(body),
            Err(err) => {
                debug!(error = %err, "graphql action failed");
                Ok(err.to_string())
            }
        }
    }

    async fn graphql_request(
        &self,
        action: &HttpAction,
        args: &Map<String, Value>,
        headers: HeaderMap,
    ) -> Result<String> {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentryError::InvalidArgument("Missing string argument: query".into()))?;
        let mut body = serde_json::json!({ "query": query });
        if let Some(variables) = args.get("variables") {
            body["variables"] = variables.clone();
        }

        debug!(url = %action.url, "graphql action");
        let resp = self
            .client
            .post(&action.url)
            .headers(headers)
            .json(&body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let text = resp.text().await?;
        if status != 200 {
            return Err(AgentryError::api(status, text));
        }

        let parsed: Value = serde_json::from_str(&text)?;
        if let Some(errors) = parsed.get("errors") {
            return Err(AgentryError::api(status, errors.to_string()));
        }
        Ok(parsed
            .get("data")
            .map(Value::to_string)
            .unwrap_or(text))
    }
}
