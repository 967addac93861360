//! Fixed containment policy applied to every sandboxed execution.
//!
//! There is deliberately no constructor taking limits: every isolated run
//! gets exactly [`ResourcePolicy::apply`].

use std::path::Path;

use serde::Serialize;

/// Mount point of the per-call code directory inside the container.
pub const CODE_MOUNT_PATH: &str = "/code";

/// Writable scratch directory inside the container (tmpfs).
pub const SCRATCH_PATH: &str = "/tmp";

/// Network mode for the isolated environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Disabled,
}

/// Isolation environment configuration produced by the policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourcePolicy {
    pub memory_limit_mb: u64,
    pub cpus: f64,
    pub pids_limit: u32,
    pub network: NetworkMode,
    /// Root filesystem mounted read-only; only the scratch tmpfs is writable.
    pub read_only_root: bool,
    pub code_mount_path: &'static str,
    pub code_mount_read_only: bool,
    pub scratch_path: &'static str,
    pub scratch_size_mb: u64,
    /// Linux capabilities to drop ("ALL") and to add back (none).
    pub cap_drop: &'static str,
    pub cap_add: Vec<&'static str>,
    pub no_new_privileges: bool,
    /// Unprivileged uid:gid the submission runs as.
    pub user: &'static str,
    pub auto_remove: bool,
}

impl ResourcePolicy {
    /// The single policy every container is created with.
    pub fn apply() -> Self {
        Self {
            memory_limit_mb: 256,
            cpus: 0.5,
            pids_limit: 64,
            network: NetworkMode::Disabled,
            read_only_root: true,
            code_mount_path: CODE_MOUNT_PATH,
            code_mount_read_only: true,
            scratch_path: SCRATCH_PATH,
            scratch_size_mb: 64,
            cap_drop: "ALL",
            cap_add: Vec::new(),
            no_new_privileges: true,
            user: "65534:65534",
            auto_remove: true,
        }
    }

    /// `docker run` flags enforcing this policy, including the read-only
    /// bind mount of `code_dir`.
    pub fn docker_args(&self, code_dir: &Path) -> Vec<String> {
        let mut args = Vec::new();

        if self.auto_remove {
            args.push("--rm".to_string());
        }

        match self.network {
            NetworkMode::Disabled => args.push("--network=none".to_string()),
        }

        args.push(format!("--memory={}m", self.memory_limit_mb));
        // Equal to --memory, so the container cannot swap past the ceiling
        args.push(format!("--memory-swap={}m", self.memory_limit_mb));
        args.push(format!("--cpus={}", self.cpus));
        args.push(format!("--pids-limit={}", self.pids_limit));

        if self.read_only_root {
            args.push("--read-only".to_string());
        }
        args.push("--tmpfs".to_string());
        args.push(format!(
            "{}:rw,exec,nosuid,size={}m",
            self.scratch_path, self.scratch_size_mb
        ));

        let mode = if self.code_mount_read_only { "ro" } else { "rw" };
        args.push("-v".to_string());
        args.push(format!(
            "{}:{}:{}",
            code_dir.display(),
            self.code_mount_path,
            mode
        ));
        args.push("-w".to_string());
        args.push(self.code_mount_path.to_string());

        args.push(format!("--cap-drop={}", self.cap_drop));
        for cap in &self.cap_add {
            args.push(format!("--cap-add={}", cap));
        }
        if self.no_new_privileges {
            args.push("--security-opt=no-new-privileges".to_string());
        }
        args.push(format!("--user={}", self.user));

        args
    }
}
