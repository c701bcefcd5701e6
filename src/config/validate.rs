// The miette/thiserror derive macros generate code that triggers false
// positive unused_assignments warnings on enum variant fields.
#![allow(unused_assignments)]

use std::collections::BTreeMap;

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::config::model::SlotConfig;

// ---------------------------------------------------------------------------
// ConfigDiagnostic: miette-powered validation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigDiagnostic {
    #[error("service `{service}` is declared more than once")]
    #[diagnostic(code(llmslot::duplicate_service))]
    DuplicateService {
        #[source_code]
        src: NamedSource<String>,
        #[label("second declaration")]
        span: SourceSpan,
        service: String,
    },

    #[error("host port {port} is used by multiple services: {services:?}")]
    #[diagnostic(code(llmslot::duplicate_port))]
    DuplicatePort {
        #[source_code]
        src: NamedSource<String>,
        #[label("duplicate port")]
        span: SourceSpan,
        port: u16,
        services: Vec<String>,
    },

    #[error("container name `{container}` is used by multiple services: {services:?}")]
    #[diagnostic(code(llmslot::duplicate_container_name))]
    DuplicateContainerName {
        #[source_code]
        src: NamedSource<String>,
        #[label("duplicate container name")]
        span: SourceSpan,
        container: String,
        services: Vec<String>,
    },

    #[error("service `{service}` has an empty {field}")]
    #[diagnostic(code(llmslot::empty_field))]
    EmptyField {
        #[source_code]
        src: NamedSource<String>,
        #[label("{field} is empty")]
        span: SourceSpan,
        service: String,
        field: String,
    },

    #[error("invalid service name `{service}`")]
    #[diagnostic(
        code(llmslot::invalid_identifier),
        help("service names may contain only lowercase letters, digits, `-` and `_`")
    )]
    InvalidIdentifier {
        #[source_code]
        src: NamedSource<String>,
        #[label("invalid name")]
        span: SourceSpan,
        service: String,
    },

    #[error("service `{service}` has an invalid readiness setting: {reason}")]
    #[diagnostic(code(llmslot::invalid_readiness))]
    InvalidReadiness {
        #[source_code]
        src: NamedSource<String>,
        #[label("here")]
        span: SourceSpan,
        service: String,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Source span helpers
// ---------------------------------------------------------------------------

/// Byte ranges of every `[[services]]` block, in declaration order.
fn service_blocks(source: &str) -> Vec<(usize, usize)> {
    let starts: Vec<usize> = source.match_indices("[[services]]").map(|(i, _)| i).collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(source.len());
            (start, end)
        })
        .collect()
}

/// Span of the quoted name value inside the `index`th `[[services]]` block.
fn find_name_span(source: &str, index: usize, name: &str) -> SourceSpan {
    let quoted = format!("\"{}\"", name);
    if let Some(&(start, end)) = service_blocks(source).get(index) {
        if let Some(rel) = source[start..end].find(&quoted) {
            return (start + rel + 1, name.len()).into();
        }
    }
    match source.find(&quoted) {
        Some(pos) => (pos + 1, name.len()).into(),
        None => (0, 0).into(),
    }
}

/// Span of a `field = value` line inside the `index`th `[[services]]` block,
/// falling back to the service name.
fn find_field_span(source: &str, index: usize, name: &str, field: &str) -> SourceSpan {
    if let Some(&(start, end)) = service_blocks(source).get(index) {
        let block = &source[start..end];
        for prefix in [format!("{} =", field), format!("{}=", field)] {
            let hit = block.match_indices(&prefix).find(|(pos, _)| {
                *pos == 0 || matches!(block.as_bytes()[pos - 1], b'\n' | b' ' | b'\t')
            });
            if let Some((rel, _)) = hit {
                let abs = start + rel;
                let line_len = source[abs..].find('\n').unwrap_or(source.len() - abs);
                return (abs, line_len).into();
            }
        }
    }
    find_name_span(source, index, name)
}

// ---------------------------------------------------------------------------
// Similarity suggestions
// ---------------------------------------------------------------------------

/// Closest candidate by Jaro-Winkler similarity, if any scores at least 0.8.
pub fn find_closest_match<'a>(name: &str, candidates: &[&'a str]) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for candidate in candidates {
        let score = strsim::jaro_winkler(name, candidate);
        if score >= 0.8 && best.is_none_or(|(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }
    best.map(|(name, _)| name)
}

pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

// ---------------------------------------------------------------------------
// Main validation function
// ---------------------------------------------------------------------------

/// Check catalog-level invariants serde cannot express. `default_container`
/// maps a service name to the container name used when none is configured.
pub fn validate(
    config: &SlotConfig,
    source: &str,
    filename: &str,
    default_container: impl Fn(&str) -> String,
) -> Result<(), Vec<ConfigDiagnostic>> {
    let mut errors = Vec::new();
    let src = NamedSource::new(filename, source.to_string());

    // Names: well-formed and unique
    let mut first_seen: BTreeMap<&str, usize> = BTreeMap::new();
    for (idx, svc) in config.services.iter().enumerate() {
        if svc.name.trim().is_empty() {
            errors.push(ConfigDiagnostic::EmptyField {
                src: src.clone(),
                span: find_field_span(source, idx, &svc.name, "name"),
                service: format!("#{}", idx + 1),
                field: "name".to_string(),
            });
            continue;
        }
        if !is_valid_identifier(&svc.name) {
            errors.push(ConfigDiagnostic::InvalidIdentifier {
                src: src.clone(),
                span: find_name_span(source, idx, &svc.name),
                service: svc.name.clone(),
            });
        }
        if first_seen.insert(svc.name.as_str(), idx).is_some() {
            errors.push(ConfigDiagnostic::DuplicateService {
                src: src.clone(),
                span: find_name_span(source, idx, &svc.name),
                service: svc.name.clone(),
            });
        }
    }

    // Required string fields
    for (idx, svc) in config.services.iter().enumerate() {
        for (field, value) in [("image", &svc.image), ("model", &svc.model)] {
            if value.trim().is_empty() {
                errors.push(ConfigDiagnostic::EmptyField {
                    src: src.clone(),
                    span: find_field_span(source, idx, &svc.name, field),
                    service: svc.name.clone(),
                    field: field.to_string(),
                });
            }
        }
    }

    // Host ports
    let mut port_map: BTreeMap<u16, Vec<(usize, String)>> = BTreeMap::new();
    for (idx, svc) in config.services.iter().enumerate() {
        port_map
            .entry(svc.port)
            .or_default()
            .push((idx, svc.name.clone()));
    }
    for (port, owners) in port_map {
        if owners.len() > 1 {
            let (idx, name) = &owners[1];
            errors.push(ConfigDiagnostic::DuplicatePort {
                src: src.clone(),
                span: find_field_span(source, *idx, name, "port"),
                port,
                services: owners.iter().map(|(_, n)| n.clone()).collect(),
            });
        }
    }

    // Container names, explicit or derived
    let mut container_map: BTreeMap<String, Vec<(usize, String)>> = BTreeMap::new();
    for (idx, svc) in config.services.iter().enumerate() {
        let container = svc
            .container_name
            .clone()
            .unwrap_or_else(|| default_container(&svc.name));
        container_map
            .entry(container)
            .or_default()
            .push((idx, svc.name.clone()));
    }
    for (container, owners) in container_map {
        // Duplicate service names already produce their own diagnostic.
        let mut names: Vec<&str> = owners.iter().map(|(_, n)| n.as_str()).collect();
        names.dedup();
        if names.len() > 1 {
            let (idx, name) = &owners[1];
            errors.push(ConfigDiagnostic::DuplicateContainerName {
                src: src.clone(),
                span: find_field_span(source, *idx, name, "container_name"),
                container,
                services: owners.iter().map(|(_, n)| n.clone()).collect(),
            });
        }
    }

    // Readiness timing
    for (idx, svc) in config.services.iter().enumerate() {
        let readiness = &svc.readiness;
        let reason = if readiness.poll_interval_ms == 0 {
            Some(("poll_interval_ms", "poll interval must be greater than zero".to_string()))
        } else if readiness.timeout_ms == 0 {
            Some(("timeout_ms", "timeout must be greater than zero".to_string()))
        } else if readiness.poll_interval_ms > readiness.timeout_ms {
            Some((
                "poll_interval_ms",
                format!(
                    "poll interval {}ms exceeds timeout {}ms",
                    readiness.poll_interval_ms, readiness.timeout_ms
                ),
            ))
        } else {
            None
        };
        if let Some((field, reason)) = reason {
            errors.push(ConfigDiagnostic::InvalidReadiness {
                src: src.clone(),
                span: find_field_span(source, idx, &svc.name, field),
                service: svc.name.clone(),
                reason,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
