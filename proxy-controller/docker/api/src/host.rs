use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static CGROUP_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[^:]*:[^:]*:.*\b([[:alnum:]]{64})\b").expect("cgroup pattern must compile")
});

static MOUNTINFO_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"containers/([[:alnum:]]{64})/").expect("mountinfo pattern must compile")
});

/// Determines the ID of the container this process runs in.
///
/// Looks at `/proc/self/cgroup` (cgroup v1) and then `/proc/self/mountinfo`
/// (cgroup v2), and finally falls back to the hostname, which Docker sets
/// to the short container ID by default.
pub async fn current_container_id() -> Result<String> {
    if let Ok(cgroup) = tokio::fs::read_to_string("/proc/self/cgroup").await {
        if let Some(id) = id_from_cgroup(&cgroup) {
            debug!(%id, "Found container ID in cgroup");
            return Ok(id.to_string());
        }
    }

    if let Ok(mountinfo) = tokio::fs::read_to_string("/proc/self/mountinfo").await {
        if let Some(id) = id_from_mountinfo(&mountinfo) {
            debug!(%id, "Found container ID in mountinfo");
            return Ok(id.to_string());
        }
    }

    if let Ok(hostname) = std::env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return Ok(hostname);
        }
    }
    let hostname = tokio::fs::read_to_string("/etc/hostname")
        .await
        .unwrap_or_default();
    let hostname = hostname.trim();
    if hostname.is_empty() {
        bail!("unable to determine the current container ID");
    }
    Ok(hostname.to_string())
}

fn id_from_cgroup(cgroup: &str) -> Option<&str> {
    CGROUP_ID
        .captures(cgroup)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn id_from_mountinfo(mountinfo: &str) -> Option<&str> {
    MOUNTINFO_ID
        .captures_iter(mountinfo)
        .filter_map(|c| c.get(1))
        .last()
        .map(|m| m.as_str())
}
