//! Environment file (.env) loading and provider resolution.
//!
//! Provider values reach the supervisor two ways: the orchestrator passes
//! them to `Init`, or the config points at a dotenv file / inline values.
//! Supplied values win over configured ones.

use super::{ProviderInfo, ProviderSettings};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Load variables from a dotenv file.
///
/// Uses dotenvy for parsing which handles `KEY=VALUE`, comments, quoting
/// and blank lines. Variable names are validated afterwards.
pub fn load_env_file<P: AsRef<Path>>(path: P) -> Result<BTreeMap<String, String>> {
    let path = path.as_ref();
    let display = path.display().to_string();

    if !path.exists() {
        return Err(Error::EnvironmentFile {
            path: display,
            reason: "file not found".to_string(),
        });
    }

    let iter = dotenvy::from_path_iter(path).map_err(|e| Error::EnvironmentFile {
        path: display.clone(),
        reason: e.to_string(),
    })?;

    let mut vars = BTreeMap::new();
    for item in iter {
        let (key, value) = item.map_err(|e| Error::EnvironmentFile {
            path: display.clone(),
            reason: e.to_string(),
        })?;
        validate_env_name(&key)?;
        vars.insert(key, value);
    }
    Ok(vars)
}

/// Validate an environment variable name.
///
/// Names must start with a letter or underscore and contain only ASCII
/// alphanumerics and underscores.
pub fn validate_env_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(Error::Config(
            "Environment variable name cannot be empty".to_string(),
        ));
    };

    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(Error::Config(format!(
            "Invalid environment variable name '{}': must start with a letter or underscore",
            name
        )));
    }

    if let Some((i, c)) = name
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_')
    {
        return Err(Error::Config(format!(
            "Invalid environment variable name '{}': character '{}' at position {} is not allowed",
            name, c, i
        )));
    }

    Ok(())
}

/// Merge configured providers with the ones supplied to `Init`.
///
/// Every configured provider must end up with values: supplied by the
/// orchestrator, read from its `env_file`, or given inline. Supplied
/// providers that the config does not mention are passed through as-is.
pub fn resolve_providers(
    configured: &[ProviderSettings],
    supplied: &[ProviderInfo],
    base_dir: &Path,
) -> Result<Vec<ProviderInfo>> {
    let mut resolved = Vec::with_capacity(configured.len() + supplied.len());

    for settings in configured {
        if let Some(info) = supplied.iter().find(|p| p.name == settings.name) {
            resolved.push(info.clone());
            continue;
        }

        let mut values = settings.values.clone();
        if let Some(env_file) = &settings.env_file {
            let from_file = load_env_file(base_dir.join(env_file))?;
            // Inline values override the file
            for (k, v) in from_file {
                values.entry(k).or_insert(v);
            }
        }

        if values.is_empty() {
            return Err(Error::ProviderNotFound(settings.name.clone()));
        }

        tracing::debug!(
            "Provider '{}' resolved from config with {} value(s)",
            settings.name,
            values.len()
        );
        resolved.push(ProviderInfo {
            name: settings.name.clone(),
            values,
        });
    }

    for info in supplied {
        if !configured.iter().any(|c| c.name == info.name) {
            resolved.push(info.clone());
        }
    }

    Ok(resolved)
}
