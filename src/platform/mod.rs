use std::path::PathBuf;

#[cfg(unix)]
mod unix;

#[cfg(unix)]
use unix as imp;

#[cfg(not(unix))]
mod imp {
    /// Without a cheap liveness check, assume the pid is alive so transition
    /// markers are only cleared by their owner.
    pub fn is_process_alive(_pid: u32) -> bool {
        true
    }

    pub fn identify_port_owner(_port: u16) -> Option<String> {
        None
    }
}

/// Check if a process with the given PID is still alive.
pub fn is_process_alive(pid: u32) -> bool {
    imp::is_process_alive(pid)
}

/// Identify which process is listening on a given TCP port.
pub fn identify_port_owner(port: u16) -> Option<String> {
    imp::identify_port_owner(port)
}

/// Get the current user's home directory.
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir()
}

/// Expand leading `~` or `$HOME` in a path string to the actual home directory.
///
/// Returns the original string unchanged when no home directory is available
/// or the string doesn't start with `~` or `$HOME`.
pub fn expand_home(path: &str) -> String {
    if let Some(home) = home_dir() {
        let home = home.to_string_lossy();
        if path == "~" || path == "$HOME" {
            return home.to_string();
        }
        if let Some(rest) = path.strip_prefix("~/") {
            return format!("{}/{}", home, rest);
        }
        if let Some(rest) = path.strip_prefix("$HOME/") {
            return format!("{}/{}", home, rest);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_home_prefixes() {
        let home = home_dir().unwrap();
        let home = home.to_string_lossy();
        assert_eq!(expand_home("~"), home);
        assert_eq!(expand_home("~/models"), format!("{}/models", home));
        assert_eq!(expand_home("$HOME/.cache/hf"), format!("{}/.cache/hf", home));
    }

    #[test]
    fn expand_home_leaves_other_paths() {
        assert_eq!(expand_home("/srv/models"), "/srv/models");
        assert_eq!(expand_home("relative/path"), "relative/path");
        assert_eq!(expand_home("/some/~path"), "/some/~path");
        assert_eq!(expand_home(""), "");
    }

    #[cfg(unix)]
    #[test]
    fn own_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn reaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!is_process_alive(pid));
    }
}
