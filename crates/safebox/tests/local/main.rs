//! Local tests for safebox
//!
//! These run everywhere: guests are plain `sh` scripts launched by
//! [`ShellRuntime`] in their own process group, which stands in for a
//! container. Killing the group plays the role of `docker kill`.
//!
//! Run with: cargo test -p safebox --test local

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use safebox::{
    Config, ContainerError, ContainerProcess, ContainerRuntime, FileName, IsolationSpec, Runner,
};
use tokio::process::Command;

mod coordination;
mod supervision;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Runs an isolation spec's command directly on the host
///
/// Mount targets in the command, working directory and environment are
/// rewritten to their host sources, so a guest writing to `$RESULT_PATH`
/// lands in the job's real output directory.
#[derive(Default)]
pub(crate) struct ShellRuntime {
    pub fail_launch: bool,
    groups: Mutex<HashMap<String, u32>>,
    launches: AtomicUsize,
    kills: AtomicUsize,
    removes: AtomicUsize,
}

impl ShellRuntime {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            fail_launch: true,
            ..Self::default()
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    async fn kill_group(&self, name: &str) -> bool {
        let pgid = self.groups.lock().unwrap().get(name).copied();
        let Some(pgid) = pgid else {
            return false;
        };
        Command::new("kill")
            .args(["-KILL", "--", &format!("-{pgid}")])
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

fn remap(spec: &IsolationSpec, value: &str) -> String {
    for mount in spec.mounts() {
        if let Some(rest) = value.strip_prefix(mount.target.as_str())
            && (rest.is_empty() || rest.starts_with('/'))
        {
            return format!("{}{rest}", mount.source.display());
        }
    }
    value.to_string()
}

#[async_trait]
impl ContainerRuntime for ShellRuntime {
    async fn launch(&self, spec: &IsolationSpec) -> Result<ContainerProcess, ContainerError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launch {
            return Err(ContainerError::CreateFailed {
                name: spec.name().to_string(),
                message: "Cannot connect to the Docker daemon".to_string(),
            });
        }

        let command: Vec<String> = spec.command().iter().map(|arg| remap(spec, arg)).collect();
        let child = Command::new(&command[0])
            .args(&command[1..])
            .current_dir(remap(spec, spec.workdir()))
            .envs(spec.env().iter().map(|(key, value)| (key, remap(spec, value))))
            .process_group(0)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(pid) = child.id() {
            self.groups.lock().unwrap().insert(spec.name().to_string(), pid);
        }
        Ok(ContainerProcess::new(spec.name(), child))
    }

    async fn kill(&self, name: &str) -> Result<(), ContainerError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if self.kill_group(name).await {
            Ok(())
        } else {
            Err(ContainerError::KillFailed {
                name: name.to_string(),
                message: "no such process group".to_string(),
            })
        }
    }

    async fn remove(&self, name: &str) -> Result<(), ContainerError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.kill_group(name).await;
        self.groups.lock().unwrap().remove(name);
        Ok(())
    }

    fn remove_detached(&self, name: &str) {
        self.removes.fetch_add(1, Ordering::SeqCst);
        let pgid = self.groups.lock().unwrap().remove(name);
        if let Some(pgid) = pgid {
            let _ = std::process::Command::new("kill")
                .args(["-KILL", "--", &format!("-{pgid}")])
                .stderr(Stdio::null())
                .status();
        }
    }
}

/// Config running `main.sh` under `sh`, with workspaces under `root`
pub(crate) fn shell_config(root: &Path) -> Config {
    let mut config = Config {
        workspace_root: Some(root.to_path_buf()),
        kill_grace_ms: 2_000,
        ..Config::empty()
    };
    config.guest.command = vec!["sh".to_string(), "/workspace/main.sh".to_string()];
    config.guest.source_name = FileName::new("main.sh").unwrap();
    config
}

pub(crate) fn shell_runner(root: &Path, runtime: Arc<ShellRuntime>) -> Runner<Arc<ShellRuntime>> {
    Runner::with_runtime(shell_config(root), runtime)
}

/// Entries left under a workspace root
pub(crate) fn leftover_entries(root: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(root)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}
