use anyhow::Context;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Host-wide advisory lock serialising transitions across processes.
/// Released when dropped (or when the holding process dies).
#[derive(Debug)]
pub struct HostLock {
    path: PathBuf,
    _file: File,
}

impl HostLock {
    /// Default location: `~/.llmslot/slot.lock`.
    pub fn default_path() -> Option<PathBuf> {
        crate::platform::home_dir().map(|home| home.join(".llmslot").join("slot.lock"))
    }

    /// Take the lock without blocking. `Ok(None)` means another holder has it.
    pub fn try_acquire(path: &Path) -> anyhow::Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating lock directory {}", parent.display()))?;
        }
        imp::try_lock(path).map(|file| {
            file.map(|file| Self {
                path: path.to_path_buf(),
                _file: file,
            })
        })
    }
}

impl Drop for HostLock {
    fn drop(&mut self) {
        tracing::debug!(lock = %self.path.display(), "releasing host lock");
        #[cfg(not(unix))]
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
mod imp {
    use anyhow::Context;
    use std::fs::{File, OpenOptions};
    use std::os::unix::io::AsRawFd;
    use std::path::Path;

    pub fn try_lock(path: &Path) -> anyhow::Result<Option<File>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("opening lock file {}", path.display()))?;

        // SAFETY: fd is valid for the lifetime of file
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(Some(file));
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            Ok(None)
        } else {
            Err(err).with_context(|| format!("locking {}", path.display()))
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use anyhow::Context;
    use std::fs::{File, OpenOptions};
    use std::path::Path;

    /// Exclusive-create fallback; a crashed holder leaves the file behind.
    pub fn try_lock(path: &Path) -> anyhow::Result<Option<File>> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e).with_context(|| format!("creating lock file {}", path.display())),
        }
    }
}
