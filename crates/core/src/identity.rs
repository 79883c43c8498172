//! Watcher identity: distinguishes gitdrive instances syncing the same
//! repository from different machines or directories.

use std::path::Path;

use chrono::{Local, SecondsFormat};

/// `<host>:<watch_dir>`.
pub fn watcher_id(host: &str, watch_dir: &Path) -> String {
    format!("{}:{}", host, watch_dir.display())
}

/// Commit message for an automatic commit: `<watcher id>: <RFC 3339 time>`.
pub fn commit_message(watcher_id: &str) -> String {
    format!(
        "{}: {}",
        watcher_id,
        Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
    )
}

/// The name of this host.
#[cfg(unix)]
pub fn hostname() -> std::io::Result<String> {
    let mut buf = [0u8; 256];
    // SAFETY: the pointer and length describe `buf`, which outlives the call.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// The name of this host.
#[cfg(not(unix))]
pub fn hostname() -> std::io::Result<String> {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e))
}
