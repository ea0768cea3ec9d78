//! # Workload
//!
//! Abstract interface to the managed registry service.
//!
//! The reconciler only ever talks to the service through this trait: write
//! the rendered config and authfile, manage TLS material on disk, and
//! start/stop/restart the process. A systemd-backed implementation runs in
//! production; [`InMemoryWorkload`] backs the test suite and supports
//! injected failures.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

/// Well-known file locations for the registry installation.
#[derive(Debug, Clone)]
pub struct RegistryPaths {
    conf_dir: PathBuf,
}

impl RegistryPaths {
    #[must_use]
    pub fn new(conf_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf_dir: conf_dir.into(),
        }
    }

    fn join(&self, file: &str) -> String {
        self.conf_dir.join(file).to_string_lossy().into_owned()
    }

    #[must_use]
    pub fn karapace_config(&self) -> String {
        self.join("karapace.config.json")
    }

    #[must_use]
    pub fn registry_authfile(&self) -> String {
        self.join("authfile.json")
    }

    #[must_use]
    pub fn ssl_cafile(&self) -> String {
        self.join("ca.pem")
    }

    #[must_use]
    pub fn ssl_certfile(&self) -> String {
        self.join("server.pem")
    }

    #[must_use]
    pub fn ssl_keyfile(&self) -> String {
        self.join("server.key")
    }
}

/// Operations against the managed registry service.
#[async_trait]
pub trait Workload: Send + Sync {
    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    async fn restart(&mut self) -> Result<()>;

    async fn write_file(&mut self, path: &str, content: &str) -> Result<()>;

    async fn read_file(&self, path: &str) -> Result<Option<String>>;

    async fn remove_file(&mut self, path: &str) -> Result<()>;

    /// Whether the service process is currently running.
    async fn active(&self) -> bool;
}

/// Systemd-managed registry workload.
#[derive(Debug)]
pub struct SystemdWorkload {
    service: String,
}

impl SystemdWorkload {
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    async fn systemctl(&self, verb: &str) -> Result<()> {
        let output = tokio::process::Command::new("systemctl")
            .arg(verb)
            .arg(&self.service)
            .output()
            .await
            .with_context(|| format!("failed to execute systemctl {verb} {}", self.service))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("systemctl {verb} {} failed: {stderr}", self.service);
        }
        debug!(service = %self.service, verb, "systemctl ok");
        Ok(())
    }
}

#[async_trait]
impl Workload for SystemdWorkload {
    async fn start(&mut self) -> Result<()> {
        self.systemctl("start").await
    }

    async fn stop(&mut self) -> Result<()> {
        self.systemctl("stop").await
    }

    async fn restart(&mut self) -> Result<()> {
        self.systemctl("restart").await
    }

    async fn write_file(&mut self, path: &str, content: &str) -> Result<()> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory for {path}"))?;
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("failed to write {path}"))
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {path}")),
        }
    }

    async fn remove_file(&mut self, path: &str) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {path}")),
        }
    }

    async fn active(&self) -> bool {
        tokio::process::Command::new("systemctl")
            .arg("is-active")
            .arg("--quiet")
            .arg(&self.service)
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// In-memory workload used by the test suite.
///
/// `fail_next` makes the next N mutating operations fail, simulating a
/// backend that rejects config mid rolling restart.
#[derive(Debug, Default)]
pub struct InMemoryWorkload {
    pub files: HashMap<String, String>,
    pub running: bool,
    pub restarts: u32,
    pub fail_next: u32,
}

impl InMemoryWorkload {
    fn check_failure(&mut self, op: &str) -> Result<()> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            anyhow::bail!("injected failure during {op}");
        }
        Ok(())
    }
}

#[async_trait]
impl Workload for InMemoryWorkload {
    async fn start(&mut self) -> Result<()> {
        self.check_failure("start")?;
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    async fn restart(&mut self) -> Result<()> {
        self.check_failure("restart")?;
        self.running = true;
        self.restarts += 1;
        Ok(())
    }

    async fn write_file(&mut self, path: &str, content: &str) -> Result<()> {
        self.check_failure("write")?;
        self.files.insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>> {
        Ok(self.files.get(path).cloned())
    }

    async fn remove_file(&mut self, path: &str) -> Result<()> {
        self.files.remove(path);
        Ok(())
    }

    async fn active(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_rooted_in_conf_dir() {
        let paths = RegistryPaths::new("/etc/karapace");
        assert_eq!(paths.karapace_config(), "/etc/karapace/karapace.config.json");
        assert_eq!(paths.registry_authfile(), "/etc/karapace/authfile.json");
        assert_eq!(paths.ssl_keyfile(), "/etc/karapace/server.key");
    }

    #[tokio::test]
    async fn test_in_memory_workload_round_trip() {
        let mut workload = InMemoryWorkload::default();
        workload.write_file("/tmp/x", "hello").await.unwrap();
        assert_eq!(
            workload.read_file("/tmp/x").await.unwrap().as_deref(),
            Some("hello")
        );
        workload.remove_file("/tmp/x").await.unwrap();
        assert_eq!(workload.read_file("/tmp/x").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_in_memory_workload_fail_injection() {
        let mut workload = InMemoryWorkload::default();
        workload.fail_next = 2;
        assert!(workload.restart().await.is_err());
        assert!(workload.restart().await.is_err());
        assert!(workload.restart().await.is_ok());
        assert_eq!(workload.restarts, 1);
    }
}
