use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::process::Command;

use crate::runtime::{GpuUsage, ResourceUsage};

const QUERY: &str = "--query-gpu=index,name,memory.used,memory.total,utilization.gpu";
const MIB: u64 = 1024 * 1024;

/// Run `nvidia-smi` and return a host-wide snapshot.
pub async fn query(nvidia_smi: &str, timeout: Duration) -> Result<ResourceUsage> {
    let output = tokio::time::timeout(
        timeout,
        Command::new(nvidia_smi)
            .arg(QUERY)
            .arg("--format=csv,noheader,nounits")
            .kill_on_drop(true)
            .output(),
    )
    .await
    .with_context(|| format!("{} did not answer within {:?}", nvidia_smi, timeout))?
    .with_context(|| format!("running {}", nvidia_smi))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{} exited with {}: {}",
            nvidia_smi,
            output.status,
            stderr.trim()
        );
    }

    let gpus = parse_csv(&String::from_utf8_lossy(&output.stdout))?;
    Ok(ResourceUsage {
        gpus,
        captured_at: Utc::now(),
    })
}

/// Parse `csv,noheader,nounits` output, one GPU per line. Memory is in MiB.
pub fn parse_csv(text: &str) -> Result<Vec<GpuUsage>> {
    let mut gpus = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != 5 {
            bail!(
                "nvidia-smi line {}: expected 5 fields, got {}: {:?}",
                n + 1,
                fields.len(),
                line
            );
        }
        let index = fields[0]
            .parse::<u32>()
            .with_context(|| format!("nvidia-smi line {}: bad index {:?}", n + 1, fields[0]))?;
        gpus.push(GpuUsage {
            index,
            name: fields[1].to_string(),
            memory_used_bytes: parse_mib(fields[2]).saturating_mul(MIB),
            memory_total_bytes: parse_mib(fields[3]).saturating_mul(MIB),
            utilization_percent: fields[4].parse::<u8>().unwrap_or(0).min(100),
        });
    }
    Ok(gpus)
}

// "[N/A]" and similar placeholders read as zero.
fn parse_mib(field: &str) -> u64 {
    field.parse::<u64>().unwrap_or(0)
}
