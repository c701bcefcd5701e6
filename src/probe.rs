use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use backon::{ConstantBuilder, Retryable};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Readiness, ServiceDefinition};

const MAX_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);
const BODY_EXCERPT: usize = 200;

/// Result of waiting for a service to accept requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready { elapsed: Duration },
    TimedOut { elapsed: Duration, budget: Duration },
    Error(String),
    Cancelled,
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Poll until ready, the readiness budget runs out, a non-retryable error
    /// is seen, or `cancel` fires.
    async fn wait_until_ready(&self, readiness: &Readiness, cancel: &CancellationToken)
        -> ProbeOutcome;
}

#[derive(Debug)]
enum Attempt {
    /// Server not reachable yet, or still loading weights.
    NotYet(String),
    Fatal(String),
}

impl std::fmt::Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attempt::NotYet(reason) | Attempt::Fatal(reason) => f.write_str(reason),
        }
    }
}

/// Polls an HTTP endpoint until it answers 2xx.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }

    async fn attempt(&self, url: &reqwest::Url, timeout: Duration) -> Result<(), Attempt> {
        let response = match self.client.get(url.clone()).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                return Err(Attempt::NotYet(e.to_string()))
            }
            Err(e) => return Err(Attempt::Fatal(e.to_string())),
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(Attempt::NotYet(format!("{} returned {}", url, status)));
        }

        let body = response.text().await.unwrap_or_default();
        Err(Attempt::Fatal(format!(
            "{} returned {}: {}",
            url,
            status,
            excerpt(&body)
        )))
    }
}

/// Per-request timeout: the poll interval clamped to 1..=5 seconds.
pub fn attempt_timeout(interval: Duration) -> Duration {
    interval.clamp(MIN_ATTEMPT_TIMEOUT, MAX_ATTEMPT_TIMEOUT)
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > BODY_EXCERPT {
        let cut: String = trimmed.chars().take(BODY_EXCERPT).collect();
        format!("{cut}...")
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn wait_until_ready(
        &self,
        readiness: &Readiness,
        cancel: &CancellationToken,
    ) -> ProbeOutcome {
        let started = Instant::now();
        let url = match reqwest::Url::parse(&readiness.probe_url) {
            Ok(url) => url,
            Err(e) => {
                return ProbeOutcome::Error(format!(
                    "invalid probe URL {:?}: {}",
                    readiness.probe_url, e
                ))
            }
        };
        let per_attempt = attempt_timeout(readiness.poll_interval);

        let polling = (|| async { self.attempt(&url, per_attempt).await })
            .retry(
                ConstantBuilder::default()
                    .with_delay(readiness.poll_interval)
                    .without_max_times(),
            )
            .when(|e: &Attempt| matches!(e, Attempt::NotYet(_)))
            .notify(|e: &Attempt, dur: Duration| {
                tracing::debug!(url = %url, "not ready: {}, retrying in {:?}", e, dur);
            });

        tokio::select! {
            _ = cancel.cancelled() => ProbeOutcome::Cancelled,
            result = tokio::time::timeout(readiness.timeout, polling) => match result {
                Ok(Ok(())) => ProbeOutcome::Ready { elapsed: started.elapsed() },
                Ok(Err(e)) => ProbeOutcome::Error(e.to_string()),
                Err(_) => ProbeOutcome::TimedOut {
                    elapsed: started.elapsed(),
                    budget: readiness.timeout,
                },
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Smoke test
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SmokeReport {
    pub models: Vec<String>,
    pub latency: Duration,
    pub reply: String,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// List the served models, then ask for a one-word completion.
pub async fn smoke_test(service: &ServiceDefinition, timeout: Duration) -> Result<SmokeReport> {
    smoke_test_at(
        &service.api_base(),
        &service.info.served_model_name,
        timeout,
    )
    .await
}

pub async fn smoke_test_at(api_base: &str, model: &str, timeout: Duration) -> Result<SmokeReport> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("building HTTP client")?;

    let models_url = format!("{}/v1/models", api_base);
    let response = client
        .get(&models_url)
        .send()
        .await
        .with_context(|| format!("cannot connect to {}", models_url))?;
    if !response.status().is_success() {
        bail!("{} returned {}", models_url, response.status());
    }
    let models: ModelList = response
        .json()
        .await
        .with_context(|| format!("decoding {}", models_url))?;
    let models: Vec<String> = models.data.into_iter().map(|m| m.id).collect();

    let chat_url = format!("{}/v1/chat/completions", api_base);
    let request = serde_json::json!({
        "model": model,
        "messages": [{"role": "user", "content": "Reply with one word: ready?"}],
        "max_tokens": 10,
        "temperature": 0,
    });
    let started = Instant::now();
    let response = client
        .post(&chat_url)
        .json(&request)
        .send()
        .await
        .with_context(|| format!("cannot connect to {}", chat_url))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("{} returned {}: {}", chat_url, status, excerpt(&body));
    }
    let completion: ChatCompletion = response
        .json()
        .await
        .with_context(|| format!("decoding {}", chat_url))?;
    let latency = started.elapsed();

    let reply = completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .context("completion response had no choices")?;

    Ok(SmokeReport {
        models,
        latency,
        reply,
    })
}
