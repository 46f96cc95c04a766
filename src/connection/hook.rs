// src/connection/hook.rs

//! Runs the configured on-connect command for the lifetime of a connection.

use super::ConnSettings;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause before restarting a command that exited on its own.
const RESTART_PAUSE: Duration = Duration::from_secs(5);

/// A running on-connect command. Killed by `stop`, or when dropped.
pub struct OnConnectHook {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl OnConnectHook {
    /// Spawns the command through `sh -c`, with `RTSP_PATH` and `RTSP_PORT` exported.
    pub fn start(settings: &ConnSettings) -> Self {
        let token = CancellationToken::new();
        let cmdline = settings.run_on_connect.clone();
        let restart = settings.run_on_connect_restart;
        let env = vec![
            ("RTSP_PATH".to_string(), String::new()),
            (
                "RTSP_PORT".to_string(),
                relay_port(&settings.relay_address).to_string(),
            ),
        ];
        info!("runOnConnect command started: {}", cmdline);
        let task = tokio::spawn(supervise(cmdline, restart, env, token.clone()));
        Self { token, task }
    }

    /// Kills the command (if still running) and waits for the supervisor to exit.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Err(e) = (&mut self.task).await {
            warn!("runOnConnect supervisor failed: {e:?}");
        }
        info!("runOnConnect command stopped.");
    }
}

impl Drop for OnConnectHook {
    fn drop(&mut self) {
        // Aborting drops the child, which `kill_on_drop` then kills.
        self.token.cancel();
        self.task.abort();
    }
}

async fn supervise(
    cmdline: String,
    restart: bool,
    env: Vec<(String, String)>,
    token: CancellationToken,
) {
    loop {
        let spawned = Command::new("sh")
            .arg("-c")
            .arg(&cmdline)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        match spawned {
            Ok(mut child) => {
                tokio::select! {
                    _ = token.cancelled() => {
                        if let Err(e) = child.kill().await {
                            debug!("runOnConnect kill failed: {}", e);
                        }
                        return;
                    }
                    status = child.wait() => match status {
                        Ok(status) => info!("runOnConnect command exited with {}", status),
                        Err(e) => warn!("runOnConnect wait failed: {}", e),
                    },
                }
            }
            Err(e) => warn!("runOnConnect command failed to start: {}", e),
        }

        if !restart {
            return;
        }
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(RESTART_PAUSE) => {}
        }
    }
}

/// Extracts the port from `host:port` or `:port`. Falls back to the RTSP default.
pub(crate) fn relay_port(address: &str) -> u16 {
    address
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse().ok())
        .unwrap_or(8554)
}
