pub mod model;
pub mod resolve;
pub mod secrets;
pub mod validate;

use std::path::Path;

use model::SlotConfig;

/// Read and parse a config file, returning the parsed config alongside the raw
/// source (kept for diagnostic spans).
pub fn load_config(path: &Path) -> anyhow::Result<(SlotConfig, String)> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file {}: {}", path.display(), e))?;
    let config: SlotConfig = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e))?;
    Ok((config, content))
}
