use std::process::Command;

use crate::{elog_debug, elog_trace, elog_warn, Error, Result};

/// Thin wrapper over the `tmux` binary for talking to worker panes.
pub struct Tmux;

impl Tmux {
    /// Send key names (`Escape`, `C-u`, `Enter`) to a pane.
    pub fn send_keys(target: &str, keys: &[&str]) -> Result<()> {
        elog_debug!("Tmux::send_keys target={} keys={:?}", target, keys);
        let mut args = vec!["send-keys", "-t", target];
        args.extend_from_slice(keys);
        run(&args, target)
    }

    /// Type `text` into a pane without interpreting key names.
    pub fn send_text(target: &str, text: &str) -> Result<()> {
        elog_debug!("Tmux::send_text target={} len={}", target, text.len());
        run(&["send-keys", "-t", target, "-l", text], target)
    }

    /// Type `text` into a pane and press Enter.
    pub fn send_line(target: &str, text: &str) -> Result<()> {
        Self::send_text(target, text)?;
        Self::send_keys(target, &["Enter"])
    }

    /// Check whether a pane or session target resolves.
    pub fn pane_exists(target: &str) -> bool {
        elog_trace!("Tmux::pane_exists target={}", target);
        Command::new("tmux")
            .args(["display-message", "-t", target, "-p", "#{pane_id}"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub fn is_available() -> bool {
        Command::new("tmux")
            .arg("-V")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

fn run(args: &[&str], target: &str) -> Result<()> {
    let output = Command::new("tmux").args(args).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        elog_warn!("Failed to send keys to '{}': {}", target, stderr.trim());
        return Err(Error::Tmux(format!(
            "Failed to send keys to '{}': {}",
            target,
            stderr.trim()
        )));
    }
    Ok(())
}
