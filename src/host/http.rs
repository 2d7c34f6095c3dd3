//! The `http` namespace: outbound requests gated by the run's network guard.
//!
//! Each verb takes a URL and an optional options mapping:
//! `params` (query string), `headers`, `json` (serialized request body) or
//! `data` (form-encoded request body). Responses come back as a mapping with
//! `url`, `status_code`, `headers`, `text` and `json`. Error statuses are
//! responses, not failures; only transport problems fail the call.

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::host::{Args, Namespace};
use crate::marshal;
use crate::network::NetworkGuard;
use crate::value::{DynamicValue, Mapping};

pub const VERBS: &[&str] = &["get", "put", "post", "delete", "patch", "options", "head"];

#[derive(Clone, Debug)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("transform-kernel/{}", crate::VERSION),
        }
    }
}

pub fn namespace(guard: &NetworkGuard, settings: &HttpSettings) -> Namespace {
    let agent = ureq::AgentBuilder::new()
        .timeout(settings.timeout)
        .user_agent(&settings.user_agent)
        .build();
    let mut ns = Namespace::new("http");
    for &verb in VERBS {
        let agent = agent.clone();
        let guard = guard.clone();
        ns = ns.with(verb, move |args| {
            guard.ensure_enabled(&format!("http.{verb}"))?;
            let args = Args::new(verb, args, 2)?;
            let url = args.string(0, "url")?;
            let options = match args.optional(1) {
                None | Some(DynamicValue::Null) => Mapping::new(),
                Some(DynamicValue::Mapping(m)) => m.clone(),
                Some(other) => {
                    return Err(Error::invalid_argument(
                        verb,
                        format!("expected options to be a mapping, got {}", other.type_name()),
                    ))
                }
            };
            request(&agent, verb, url, &options)
        });
    }
    ns
}

fn request(agent: &ureq::Agent, verb: &str, raw_url: &str, options: &Mapping) -> Result<DynamicValue> {
    let mut url = parse_url(raw_url)?;
    if let Some(params) = mapping_option(verb, options, "params")? {
        let mut query = url.query_pairs_mut();
        for (key, value) in pairs(params)? {
            query.append_pair(&key, &value);
        }
    }

    let mut req = agent.request_url(&verb.to_uppercase(), &url);
    if let Some(headers) = mapping_option(verb, options, "headers")? {
        for (name, value) in pairs(headers)? {
            req = req.set(&name, &value);
        }
    }

    log::debug!("http {verb} {url}");
    let sent = match (options.get_str("json"), mapping_option(verb, options, "data")?) {
        (Some(json), _) if !json.is_null() => {
            let body = serde_json::to_vec(&marshal::to_json(json)?)?;
            req.set("Content-Type", "application/json").send_bytes(&body)
        }
        (_, Some(data)) => {
            let form = pairs(data)?;
            let form: Vec<(&str, &str)> = form.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
            req.send_form(&form)
        }
        _ => req.call(),
    };

    let response = match sent {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(ureq::Error::Transport(transport)) => {
            return Err(Error::Http(format!("{verb} {url}: {transport}")))
        }
    };
    into_value(response)
}

fn parse_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::Http(format!("invalid url {raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(Error::Http(format!("unsupported url scheme {scheme}"))),
    }
}

fn mapping_option<'a>(verb: &str, options: &'a Mapping, key: &str) -> Result<Option<&'a Mapping>> {
    match options.get_str(key) {
        None | Some(DynamicValue::Null) => Ok(None),
        Some(DynamicValue::Mapping(m)) => Ok(Some(m)),
        Some(other) => Err(Error::invalid_argument(
            verb,
            format!("expected {key} to be a mapping, got {}", other.type_name()),
        )),
    }
}

/// Flattens a mapping into string pairs. Non-string values are rendered as JSON.
fn pairs(mapping: &Mapping) -> Result<Vec<(String, String)>> {
    mapping
        .iter()
        .map(|(key, value)| {
            let key = key
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::invalid_argument("http", "option keys must be strings"))?;
            let value = match value {
                DynamicValue::String(s) => s.clone(),
                other => marshal::to_json(other)?.to_string(),
            };
            Ok((key, value))
        })
        .collect()
}

fn into_value(response: ureq::Response) -> Result<DynamicValue> {
    let url = response.get_url().to_string();
    let status = i64::from(response.status());
    let mut headers = Mapping::new();
    for name in response.headers_names() {
        if let Some(value) = response.header(&name) {
            headers.insert(name.as_str(), value);
        }
    }
    let text = response.into_string()?;
    let json = match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(value) => marshal::from_json(&value)?,
        Err(_) => DynamicValue::Null,
    };

    let mut out = Mapping::new();
    out.insert("url", url);
    out.insert("status_code", status);
    out.insert("headers", headers);
    out.insert("text", text);
    out.insert("json", json);
    Ok(DynamicValue::Mapping(out))
}
