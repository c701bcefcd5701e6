use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "llmslot.toml";

/// Environment variable that points at a config file when `-f` is not given.
pub const CONFIG_ENV: &str = "LLMSLOT_CONFIG";

/// Walk up the directory tree from `start`, checking for `filename` at each level.
pub fn find_config(start: &Path, filename: &str) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(filename);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Resolve the config file path.
///
/// Precedence: the `-f` flag, then `$LLMSLOT_CONFIG`, then the nearest
/// `llmslot.toml` walking up from the working directory.
pub fn resolve_config(cli_file: Option<&Path>) -> anyhow::Result<PathBuf> {
    let explicit = cli_file
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.canonicalize()?);
        }
        anyhow::bail!("Config file not found: {}", path.display());
    }

    let cwd = std::env::current_dir()?;
    find_config(&cwd, CONFIG_FILENAME).ok_or_else(|| {
        anyhow::anyhow!(
            "No {} found in {} or any parent directory (run `llmslot init` to create one)",
            CONFIG_FILENAME,
            cwd.display()
        )
    })
}
