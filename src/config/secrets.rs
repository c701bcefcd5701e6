use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use regex::Regex;

use super::model::SlotConfig;

/// Compiled pattern matching `$VAR`, `${VAR}`, and `$$` escape sequences.
static ENV_VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)|\$\$")
        .expect("valid regex")
});

// ---------------------------------------------------------------------------
// SecretRegistry: tracks secret values for masking
// ---------------------------------------------------------------------------

/// Tracks expanded values (HF tokens, API keys) so they can be masked in output.
#[derive(Debug, Default, Clone)]
pub struct SecretRegistry {
    secret_values: HashSet<String>,
}

impl SecretRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value as secret (to be masked in output).
    pub fn track(&mut self, value: &str) {
        if !value.is_empty() {
            self.secret_values.insert(value.to_string());
        }
    }

    /// Replace any known secret substrings in `value` with `****`.
    pub fn mask_value(&self, value: &str) -> String {
        let mut result = value.to_string();
        for secret in &self.secret_values {
            if !secret.is_empty() {
                result = result.replace(secret.as_str(), "****");
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// .env file parser
// ---------------------------------------------------------------------------

/// Parse a `.env` file into key-value pairs.
///
/// Supports: `KEY=VALUE`, `KEY="VALUE"`, `KEY='VALUE'`, `# comments`, blank lines.
/// Returns an empty map if the file does not exist.
pub fn parse_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading .env file {}", path.display()))?;

    parse_env_content(&content)
}

fn parse_env_content(content: &str) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();

    for (line_num, line) in content.lines().enumerate() {
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);

        let Some((key, value)) = trimmed.split_once('=') else {
            bail!(
                ".env line {}: expected KEY=VALUE, got {:?}",
                line_num + 1,
                trimmed
            );
        };

        let key = key.trim().to_string();
        if key.is_empty() {
            bail!(".env line {}: empty key", line_num + 1);
        }

        let value = value.trim();

        // Strip matching quotes
        let value = if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            &value[1..value.len() - 1]
        } else {
            value
        };

        vars.insert(key, value.to_string());
    }

    Ok(vars)
}

// ---------------------------------------------------------------------------
// $VAR expansion engine
// ---------------------------------------------------------------------------

/// Expand `$VAR`, `${VAR}`, and `$$` escape sequences in a string.
///
/// Lookup order: (1) `env_file_vars`, (2) host process env via `std::env::var`.
/// Returns `(expanded_string, had_expansion)`.
pub fn expand_env_vars(
    input: &str,
    env_file_vars: &BTreeMap<String, String>,
    field_context: &str,
) -> Result<(String, bool)> {
    if !input.contains('$') {
        return Ok((input.to_string(), false));
    }

    let mut result = String::with_capacity(input.len());
    let mut last_end = 0;
    let mut had_expansion = false;

    for caps in ENV_VAR_RE.captures_iter(input) {
        let Some(m) = caps.get(0) else { continue };
        result.push_str(&input[last_end..m.start()]);

        if m.as_str() == "$$" {
            result.push('$');
        } else {
            let var_name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|g| g.as_str())
                .unwrap_or_default();

            let value = env_file_vars
                .get(var_name)
                .cloned()
                .or_else(|| std::env::var(var_name).ok());

            match value {
                Some(val) => {
                    result.push_str(&val);
                    had_expansion = true;
                }
                None => {
                    bail!(
                        "undefined environment variable ${} in {}",
                        var_name,
                        field_context
                    );
                }
            }
        }

        last_end = m.end();
    }

    result.push_str(&input[last_end..]);
    Ok((result, had_expansion))
}

// ---------------------------------------------------------------------------
// Config walker
// ---------------------------------------------------------------------------

/// Load the project `env_file`, if any, relative to the config directory.
pub fn load_env_file(config: &SlotConfig, config_dir: &Path) -> Result<BTreeMap<String, String>> {
    match &config.project.env_file {
        Some(env_file) => parse_env_file(&config_dir.join(env_file))
            .with_context(|| format!("loading project env_file {:?}", env_file)),
        None => Ok(BTreeMap::new()),
    }
}

/// Expand `$VAR` references in service env values and volume specs.
/// Returns a `SecretRegistry` tracking which env values came from expansion.
pub fn expand_config_env_vars(
    config: &mut SlotConfig,
    env_file_vars: &BTreeMap<String, String>,
) -> Result<SecretRegistry> {
    let mut registry = SecretRegistry::new();

    for svc in &mut config.services {
        for (key, value) in svc.env.iter_mut() {
            let (expanded, was_secret) = expand_env_vars(
                value,
                env_file_vars,
                &format!("services.{}.env.{key}", svc.name),
            )?;
            if was_secret {
                registry.track(&expanded);
            }
            *value = expanded;
        }

        for volume in svc.volumes.iter_mut() {
            let (expanded, _) = expand_env_vars(
                volume,
                env_file_vars,
                &format!("services.{}.volumes", svc.name),
            )?;
            *volume = expanded;
        }
    }

    Ok(registry)
}
