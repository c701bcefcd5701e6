use nix::sys::signal::kill;
use nix::unistd::Pid;

pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 only checks existence; EPERM still means the pid is taken.
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
pub fn identify_port_owner(port: u16) -> Option<String> {
    let port_hex = format!("{:04X}", port);

    let mut target_inode: Option<String> = None;
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(content) = std::fs::read_to_string(table) else {
            continue;
        };
        for line in content.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            // Field 3 is the socket state; 0A is LISTEN.
            if fields.len() < 10 || fields[3] != "0A" {
                continue;
            }
            if fields[1].rsplit(':').next() == Some(port_hex.as_str()) {
                target_inode = Some(fields[9].to_string());
                break;
            }
        }
        if target_inode.is_some() {
            break;
        }
    }

    let inode = target_inode?;
    if inode == "0" {
        return Some("another process".to_string());
    }

    let needle = format!("socket:[{}]", inode);
    for entry in std::fs::read_dir("/proc").ok()?.flatten() {
        let pid_str = entry.file_name().to_string_lossy().to_string();
        if !pid_str.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let Ok(fds) = std::fs::read_dir(format!("/proc/{}/fd", pid_str)) else {
            continue;
        };
        let owns_socket = fds.flatten().any(|fd| {
            std::fs::read_link(fd.path())
                .map(|link| link.to_string_lossy() == needle)
                .unwrap_or(false)
        });
        if !owns_socket {
            continue;
        }
        let cmd = std::fs::read_to_string(format!("/proc/{}/cmdline", pid_str))
            .map(|c| c.replace('\0', " ").trim().to_string())
            .unwrap_or_default();
        if cmd.is_empty() {
            return Some(format!("PID {}", pid_str));
        }
        if cmd.chars().count() > 60 {
            let short: String = cmd.chars().take(57).collect();
            return Some(format!("{}... (PID {})", short, pid_str));
        }
        return Some(format!("{} (PID {})", cmd, pid_str));
    }

    // Listening, but owned by a process we cannot inspect (e.g. docker-proxy as root).
    Some("another process".to_string())
}

#[cfg(not(target_os = "linux"))]
pub fn identify_port_owner(_port: u16) -> Option<String> {
    None
}
