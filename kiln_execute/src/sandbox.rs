//! Resource limits and best-effort sandboxing applied to a child before
//! exec, via a `pre_exec` hook (`spec.md` §4.F).
//!
//! Namespace isolation is Linux-only and best-effort: when
//! [`IsolationPolicy::Strict`](crate::spec::IsolationPolicy::Strict) is
//! requested on a platform where we can't unshare namespaces, setup
//! returns [`SandboxError::Unavailable`] rather than silently running
//! unsandboxed.

use crate::error::SandboxError;
use crate::spec::{IsolationPolicy, ResourceLimits};

/// Applies `limits` and, if `policy` is [`IsolationPolicy::Strict`],
/// namespace isolation, to `cmd` via a `pre_exec` hook. Returns an error
/// only when strict isolation was requested and this platform can't
/// provide it.
pub fn apply(
    cmd: &mut std::process::Command,
    limits: &ResourceLimits,
    policy: IsolationPolicy,
) -> Result<(), SandboxError> {
    #[cfg(unix)]
    {
        apply_unix(cmd, limits.clone(), policy)
    }

    #[cfg(not(unix))]
    {
        let _ = cmd;
        let _ = limits;
        match policy {
            IsolationPolicy::Strict => Err(SandboxError::Unavailable(
                "strict isolation is only implemented on Unix".to_string(),
            )),
            IsolationPolicy::BestEffort => Ok(()),
        }
    }
}

#[cfg(unix)]
fn apply_unix(
    cmd: &mut std::process::Command,
    limits: ResourceLimits,
    policy: IsolationPolicy,
) -> Result<(), SandboxError> {
    use std::os::unix::process::CommandExt;

    if policy == IsolationPolicy::Strict && !linux_namespaces_available() {
        return Err(SandboxError::Unavailable(
            "unshare(2) namespace isolation unavailable".to_string(),
        ));
    }

    unsafe {
        cmd.pre_exec(move || {
            apply_rlimits(&limits);
            if policy == IsolationPolicy::Strict {
                enter_namespace_sandbox()?;
            }
            Ok(())
        });
    }

    Ok(())
}

#[cfg(unix)]
fn apply_rlimits(limits: &ResourceLimits) {
    if let Some(cpu) = limits.cpu_time {
        let secs = cpu.as_secs().max(1);
        let _ = rlimit::setrlimit(rlimit::Resource::CPU, secs, secs);
    }
    if let Some(mem) = limits.max_memory_bytes {
        let _ = rlimit::setrlimit(rlimit::Resource::AS, mem, mem);
    }
    if let Some(nofile) = limits.max_file_descriptors {
        let _ = rlimit::setrlimit(rlimit::Resource::NOFILE, nofile, nofile);
    }
    if let Some(nproc) = limits.max_processes {
        let _ = rlimit::setrlimit(rlimit::Resource::NPROC, nproc, nproc);
    }
}

/// Linux-only: unshares the mount, PID, and UTS namespaces so the child
/// can't observe or affect the host outside its declared inputs/outputs.
/// A no-op (`Ok`) everywhere else, since macOS/Windows have no
/// equivalent wired up yet (tracked as a non-hermetic degrade by the
/// caller).
#[cfg(target_os = "linux")]
fn enter_namespace_sandbox() -> std::io::Result<()> {
    nix::sched::unshare(
        nix::sched::CloneFlags::CLONE_NEWNS
            | nix::sched::CloneFlags::CLONE_NEWPID
            | nix::sched::CloneFlags::CLONE_NEWUTS,
    )
    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
}

#[cfg(all(unix, not(target_os = "linux")))]
fn enter_namespace_sandbox() -> std::io::Result<()> {
    Ok(())
}

#[cfg(target_os = "linux")]
fn linux_namespaces_available() -> bool {
    std::path::Path::new("/proc/self/ns/mnt").exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn linux_namespaces_available() -> bool {
    false
}
