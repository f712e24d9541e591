//! Environment synthesis for the supervised child.
//!
//! Turns the network mapping, dependency mappings, provider values and
//! static config variables into one ordered list of `KEY=VALUE` assignments.
//! The same list is passed to the child and written to the env file
//! (`.env.local` by default) on every start.
//!
//! Naming:
//! - own endpoint `grpc` → `GRPC_ADDRESS`, `GRPC_PORT` (HTTP also gets `HTTP_URL`)
//! - public endpoint `http` of dependency `users` → `USERS_HTTP_ADDRESS`
//! - provider `auth0`, key `domain` → `PROVIDER_AUTH0_DOMAIN`

use crate::config::ProviderInfo;
use crate::error::{Error, Result};
use crate::network::{NetworkMapping, Protocol};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::Path;

/// Ordered environment assignments. Setting an existing key replaces its
/// value in place so the rendered file keeps a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentVariables {
    vars: Vec<(String, String)>,
}

impl EnvironmentVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.vars.push((key, value)),
        }
    }

    pub fn extend<I, K, V>(&mut self, items: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in items {
            self.set(k, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        self.vars.iter().cloned().collect()
    }

    /// One `KEY=VALUE` line per variable; values that dotenv parsers would
    /// misread are double-quoted.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.vars {
            let _ = writeln!(out, "{}={}", key, quote_value(value));
        }
        out
    }

    /// Write the env file, replacing any previous one.
    pub fn write_env_file(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension("devsup-tmp");
        std::fs::write(&tmp, self.render())
            .and_then(|_| std::fs::rename(&tmp, path))
            .map_err(|e| Error::EnvironmentFile {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!("Wrote {} variable(s) to {}", self.len(), path.display());
        Ok(())
    }
}

/// Build an environment variable name from parts: upper-cased, with any
/// character outside `[A-Z0-9_]` replaced by `_`.
pub fn env_key(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_uppercase()
                    } else {
                        '_'
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// Variables for the service's own endpoints.
pub fn endpoint_variables(mapping: &NetworkMapping) -> Vec<(String, String)> {
    let mut vars = Vec::new();
    for entry in mapping.iter() {
        let Some(address) = entry.primary() else {
            continue;
        };
        let name = entry.endpoint.name.as_str();
        vars.push((env_key(&[name, "ADDRESS"]), address.to_string()));
        vars.push((env_key(&[name, "PORT"]), address.port.to_string()));
        if entry.endpoint.protocol == Protocol::Http {
            vars.push((env_key(&[name, "URL"]), format!("http://{}", address)));
        }
    }
    vars
}

/// Variables for other services' public endpoints.
pub fn dependency_variables(mappings: &[NetworkMapping]) -> Vec<(String, String)> {
    let mut vars = Vec::new();
    for mapping in mappings {
        for entry in mapping.public().iter() {
            if let Some(address) = entry.primary() {
                vars.push((
                    env_key(&[&mapping.service, &entry.endpoint.name, "ADDRESS"]),
                    address.to_string(),
                ));
            }
        }
    }
    vars
}

pub fn provider_variables(providers: &[ProviderInfo]) -> Vec<(String, String)> {
    providers
        .iter()
        .flat_map(|p| {
            p.values
                .iter()
                .map(move |(k, v)| (env_key(&["PROVIDER", &p.name, k]), v.clone()))
        })
        .collect()
}

/// Everything a start needs, in override order: providers, own endpoints,
/// dependencies, then the static config variables (which win).
pub fn synthesize(
    own: &NetworkMapping,
    dependencies: &[NetworkMapping],
    providers: &[ProviderInfo],
    statics: &BTreeMap<String, String>,
) -> EnvironmentVariables {
    let mut env = EnvironmentVariables::new();
    env.extend(provider_variables(providers));
    env.extend(endpoint_variables(own));
    env.extend(dependency_variables(dependencies));
    env.extend(statics.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

fn quote_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '#' | '"' | '\'' | '\\' | '$' | '`'));
    if !needs_quotes {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '$' => quoted.push_str("\\$"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Address, Endpoint};
    use tempfile::TempDir;

    fn own() -> NetworkMapping {
        let mut mapping = NetworkMapping::new("billing");
        mapping.push(
            Endpoint::new("grpc", Protocol::Grpc),
            vec![Address::new("localhost", 51000)],
        );
        mapping.push(
            Endpoint::new("http", Protocol::Http).public(),
            vec![Address::new("localhost", 51001)],
        );
        mapping
    }

    #[test]
    fn env_key_normalizes_parts() {
        assert_eq!(env_key(&["grpc", "ADDRESS"]), "GRPC_ADDRESS");
        assert_eq!(env_key(&["user-api", "rest.v1"]), "USER_API_REST_V1");
        assert_eq!(env_key(&["", "x"]), "X");
    }

    #[test]
    fn own_endpoints_export_address_and_port() {
        let env = synthesize(&own(), &[], &[], &BTreeMap::new());
        assert_eq!(env.get("GRPC_ADDRESS"), Some("localhost:51000"));
        assert_eq!(env.get("HTTP_ADDRESS"), Some("localhost:51001"));
        assert_eq!(env.get("GRPC_PORT"), Some("51000"));
        assert_eq!(env.get("HTTP_URL"), Some("http://localhost:51001"));
        assert!(env.get("GRPC_URL").is_none());
    }

    #[test]
    fn dependencies_export_only_public_endpoints() {
        let mut users = NetworkMapping::new("users");
        users.push(
            Endpoint::new("grpc", Protocol::Grpc),
            vec![Address::new("localhost", 52000)],
        );
        users.push(
            Endpoint::new("http", Protocol::Http).public(),
            vec![Address::new("localhost", 52001)],
        );

        let vars = dependency_variables(&[users]);
        assert_eq!(
            vars,
            vec![("USERS_HTTP_ADDRESS".to_string(), "localhost:52001".to_string())]
        );
    }

    #[test]
    fn providers_are_prefixed() {
        let providers = vec![ProviderInfo::new("auth0").with("domain", "example.auth0.com")];
        let env = synthesize(&NetworkMapping::default(), &[], &providers, &BTreeMap::new());
        assert_eq!(env.get("PROVIDER_AUTH0_DOMAIN"), Some("example.auth0.com"));
    }

    #[test]
    fn statics_override_derived_values_in_place() {
        let mut statics = BTreeMap::new();
        statics.insert("GRPC_ADDRESS".to_string(), "override:1".to_string());
        let env = synthesize(&own(), &[], &[], &statics);
        assert_eq!(env.get("GRPC_ADDRESS"), Some("override:1"));
        assert_eq!(env.iter().next().map(|(k, _)| k), Some("GRPC_ADDRESS"));
    }

    #[test]
    fn render_quotes_awkward_values() {
        let mut env = EnvironmentVariables::new();
        env.set("PLAIN", "value");
        env.set("SPACED", "two words");
        env.set("EMPTY", "");
        env.set("QUOTE", "say \"hi\"");
        let rendered = env.render();
        assert!(rendered.contains("PLAIN=value\n"));
        assert!(rendered.contains("SPACED=\"two words\"\n"));
        assert!(rendered.contains("EMPTY=\"\"\n"));
        assert!(rendered.contains("QUOTE=\"say \\\"hi\\\"\"\n"));
    }

    #[test]
    fn env_file_round_trips_through_dotenv() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".env.local");
        let mut env = synthesize(&own(), &[], &[], &BTreeMap::new());
        env.set("MESSAGE", "hello world # not a comment");
        env.write_env_file(&path).unwrap();

        let loaded = crate::config::load_env_file(&path).unwrap();
        assert_eq!(loaded["GRPC_ADDRESS"], "localhost:51000");
        assert_eq!(loaded["MESSAGE"], "hello world # not a comment");
        assert_eq!(loaded.len(), env.len());
    }
}
