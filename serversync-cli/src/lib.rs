//! Helpers shared by the `serversync` binary: config bootstrapping, prompts,
//! result summaries and exit codes.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serversync_sync::{
    ApplyOutcome, BackendConfig, LockState, PublishOutcome, StatusReport, SyncConfig, SyncError,
};

/// Exit status when another sync holds the remote lock.
pub const EXIT_LOCK_HELD: u8 = 2;
/// Exit status for every other failure.
pub const EXIT_FAILURE: u8 = 1;

/// Builds the config written by `setup`.
///
/// Directories derive from `base_dir`; `state_dir` defaults to
/// `<base_dir>/sync_state`. A `local_root` selects the directory backend
/// instead of Google Drive.
pub fn setup_config(
    container_id: &str,
    base_dir: &Path,
    state_dir: Option<&Path>,
    local_root: Option<PathBuf>,
) -> SyncConfig {
    let state_dir = state_dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| base_dir.join("sync_state"));
    let mut config = SyncConfig::with_layout(container_id.trim(), base_dir, &state_dir);
    if let Some(root) = local_root {
        config.backend = BackendConfig::Local { root };
    }
    config
}

/// Parses a yes/no answer. `None` means ask again.
pub fn parse_confirmation(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Maps a failed command to its process exit status.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    let lock_held = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<SyncError>())
        .any(SyncError::is_lock_held);
    if lock_held { EXIT_LOCK_HELD } else { EXIT_FAILURE }
}

pub fn describe_publish(outcome: &PublishOutcome) -> String {
    match outcome {
        PublishOutcome::NoChanges => "No changes to publish.".to_string(),
        PublishOutcome::Published { entry, files } => {
            format!("Published {} as '{}'.", plural(files.len(), "file"), entry.filename)
        }
    }
}

pub fn describe_apply(outcome: &ApplyOutcome) -> String {
    let report = match outcome {
        ApplyOutcome::NothingToApply => {
            return "Nothing to apply: no local files and no full archive remotely.".to_string();
        }
        ApplyOutcome::Applied(report) => report,
    };

    let mut lines = Vec::new();
    if let Some(backup) = &report.backup {
        lines.push(format!("Backup written to {}.", backup.display()));
    }
    if report.bootstrapped {
        lines.push("Server files restored from the full archive.".to_string());
    }
    if report.applied.is_empty() {
        lines.push("No new changes to apply.".to_string());
    } else {
        lines.push(format!("Applied {}.", plural(report.applied.len(), "change-set")));
    }
    for entry in &report.skipped {
        lines.push(format!("Skipped '{}': archive not found remotely.", entry.filename));
    }
    lines.join("\n")
}

pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();

    let lock = match &report.lock {
        LockState::Unlocked => "free".to_string(),
        LockState::Locked(Some(info)) => format!(
            "held by {} (pid {}) since {}",
            info.host, info.pid, info.acquired_at
        ),
        LockState::Locked(None) => "held (holder unknown)".to_string(),
    };
    let _ = writeln!(out, "Lock:            {lock}");

    match &report.pending_changes {
        Some(paths) => {
            let _ = writeln!(out, "Local changes:   {}", paths.len());
        }
        None => {
            let _ = writeln!(out, "Local changes:   server files directory missing");
        }
    }

    let _ = writeln!(out, "Remote pending:  {}", report.missing_entries.len());
    for entry in &report.missing_entries {
        let _ = writeln!(out, "  {}", entry.filename);
    }
    out
}

fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {noun}")
    } else {
        format!("{n} {noun}s")
    }
}
