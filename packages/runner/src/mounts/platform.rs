// ABOUTME: Platform-specific mount detection, FUSE enumeration, unmounting and tool lookup
// ABOUTME: Linux and macOS command sets behind one set of functions, all run through MountContext

use super::{MountContext, Platform};
use crate::error::{Result, RunnerError};
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const UNMOUNT_TIMEOUT: Duration = Duration::from_secs(30);

/// One command in a fallback chain
#[derive(Debug, Clone, Copy)]
pub struct Attempt<'a> {
    pub program: &'a str,
    pub args: &'a [&'a str],
}

impl Attempt<'_> {
    fn describe(&self) -> String {
        std::iter::once(self.program)
            .chain(self.args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Run attempts in order until one exits zero
///
/// Returns the index of the first successful attempt, or the last
/// attempt's diagnostic when every attempt failed.
pub async fn try_in_order(
    ctx: &MountContext,
    attempts: &[Attempt<'_>],
    timeout: Duration,
) -> std::result::Result<usize, String> {
    let mut last_error = String::from("no commands to try");

    for (index, attempt) in attempts.iter().enumerate() {
        match ctx.runner.run(attempt.program, attempt.args, Some(timeout)).await {
            Ok(output) if output.success() => return Ok(index),
            Ok(output) => {
                let diagnostic = output.diagnostic();
                last_error = if diagnostic.is_empty() {
                    format!("{} exited with {}", attempt.describe(), output.exit_code)
                } else {
                    diagnostic
                };
            }
            Err(e) => last_error = e.to_string(),
        }
        ctx.logger
            .debug(&format!("{} failed: {}", attempt.describe(), last_error));
    }

    Err(last_error)
}

/// Whether `path` is currently a mount point; any failure counts as "no"
pub async fn is_mount_point(path: &str, ctx: &MountContext) -> bool {
    match &ctx.platform {
        Platform::MacOs => match ctx.runner.run("mount", &[], Some(PROBE_TIMEOUT)).await {
            Ok(output) if output.success() => {
                let needle = format!(" on {} (", path);
                output.stdout.lines().any(|line| line.contains(&needle))
            }
            _ => false,
        },
        _ => matches!(
            ctx.runner
                .run("mountpoint", &["-q", path], Some(PROBE_TIMEOUT))
                .await,
            Ok(output) if output.success()
        ),
    }
}

/// Mount paths of all active FUSE filesystems
pub async fn get_active_fuse_mounts(ctx: &MountContext) -> Vec<String> {
    match &ctx.platform {
        Platform::Linux => {
            match ctx
                .runner
                .run("sh", &["-c", "cat /proc/mounts"], Some(PROBE_TIMEOUT))
                .await
            {
                Ok(output) if output.success() => parse_proc_mounts(&output.stdout),
                _ => Vec::new(),
            }
        }
        Platform::MacOs => match ctx.runner.run("mount", &[], Some(PROBE_TIMEOUT)).await {
            Ok(output) if output.success() => parse_macos_fuse_mounts(&output.stdout),
            _ => Vec::new(),
        },
        Platform::Other(_) => Vec::new(),
    }
}

/// Mount points from `/proc/mounts` whose type is a FUSE mount
///
/// `fusectl` (the FUSE control filesystem) is not a mount of a bucket and is skipped.
fn parse_proc_mounts(proc_mounts: &str) -> Vec<String> {
    proc_mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _source = fields.next()?;
            let path = fields.next()?;
            let fs_type = fields.next()?;
            is_fuse_type(fs_type).then(|| unescape_mount_path(path))
        })
        .collect()
}

fn is_fuse_type(fs_type: &str) -> bool {
    fs_type == "fuse" || fs_type == "fuseblk" || fs_type.starts_with("fuse.")
}

/// Undo the octal escapes the kernel applies to spaces, tabs, newlines and backslashes
fn unescape_mount_path(path: &str) -> String {
    path.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

/// Parse `<source> on <path> (<type>, <options>)` lines, keeping FUSE entries
fn parse_macos_fuse_mounts(mount_output: &str) -> Vec<String> {
    mount_output
        .lines()
        .filter_map(|line| {
            let (_, rest) = line.split_once(" on ")?;
            let open = rest.rfind(" (")?;
            let (path, options) = rest.split_at(open);
            let is_fuse = options.contains("fuse");
            is_fuse.then(|| path.to_string())
        })
        .collect()
}

/// Unmount a FUSE filesystem, falling back to more forceful methods
pub async fn unmount_fuse(path: &str, ctx: &MountContext) -> Result<()> {
    let linux = [
        Attempt { program: "fusermount", args: &["-u", path] },
        Attempt { program: "umount", args: &[path] },
        Attempt { program: "umount", args: &["-l", path] },
    ];
    let macos = [
        Attempt { program: "umount", args: &[path] },
        Attempt { program: "diskutil", args: &["unmount", path] },
    ];
    let other = [Attempt { program: "umount", args: &[path] }];

    let chain: &[Attempt<'_>] = match &ctx.platform {
        Platform::Linux => &linux,
        Platform::MacOs => &macos,
        Platform::Other(_) => &other,
    };

    match try_in_order(ctx, chain, UNMOUNT_TIMEOUT).await {
        Ok(index) => {
            ctx.logger
                .info(&format!("Unmounted {} with {}", path, chain[index].describe()));
            Ok(())
        }
        Err(last_error) => Err(RunnerError::UnmountExhausted {
            path: path.to_string(),
            last_error,
        }),
    }
}

/// Absolute path of `name` on the PATH, if installed
pub async fn find_tool(name: &str, ctx: &MountContext) -> Option<String> {
    match ctx.runner.run("which", &[name], Some(PROBE_TIMEOUT)).await {
        Ok(output) if output.success() => {
            let path = output.stdout.trim();
            (!path.is_empty()).then(|| path.to_string())
        }
        _ => None,
    }
}

/// How to install a mount tool on the given platform
pub fn get_install_instructions(tool: &str, platform: &Platform) -> String {
    match (tool, platform) {
        ("s3fs", Platform::MacOs) => {
            "Install with: brew install --cask macfuse && brew install gromgit/fuse/s3fs-mac"
                .to_string()
        }
        ("gcsfuse", Platform::MacOs) => {
            "Install with: brew install --cask macfuse && brew install gcsfuse".to_string()
        }
        ("macfuse", Platform::MacOs) => {
            "Install macfuse with: brew install --cask macfuse (a restart may be required)"
                .to_string()
        }
        ("s3fs", Platform::Linux) => {
            "Install with: sudo apt-get install -y s3fs (or the s3fs-fuse package for your distribution)"
                .to_string()
        }
        ("gcsfuse", Platform::Linux) => {
            "Install with: sudo apt-get install -y gcsfuse (see https://cloud.google.com/storage/docs/gcsfuse-install)"
                .to_string()
        }
        (tool, platform) => format!(
            "Install {} using your system package manager ({} is not directly supported)",
            tool, platform
        ),
    }
}
