use super::{run, ProcessControl};
use crate::error::ProcessError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Host flavour process lookup and termination is implemented for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    pub fn current() -> Result<Self, ProcessError> {
        if cfg!(windows) {
            Ok(Platform::Windows)
        } else if cfg!(unix) {
            Ok(Platform::Unix)
        } else {
            Err(ProcessError::UnsupportedPlatform(std::env::consts::OS))
        }
    }
}

/// `ProcessControl` for the machine the daemon runs on.
#[derive(Debug, Clone)]
pub struct LocalProcessControl {
    platform: Platform,
    appium: String,
}

impl LocalProcessControl {
    pub fn new(platform: Platform, appium: impl Into<String>) -> Self {
        Self {
            platform,
            appium: appium.into(),
        }
    }

    async fn listeners(&self, port: u16) -> Result<Vec<u32>, ProcessError> {
        match self.platform {
            Platform::Unix => {
                let target = format!(":{}", port);
                let output = Command::new("lsof")
                    .args(["-t", "-i", target.as_str(), "-sTCP:LISTEN"])
                    .output()
                    .await
                    .map_err(|source| ProcessError::Spawn {
                        command: format!("lsof -t -i {} -sTCP:LISTEN", target),
                        source,
                    })?;
                // lsof exits non-zero when nothing matches
                Ok(parse_lsof_pids(&String::from_utf8_lossy(&output.stdout)))
            }
            Platform::Windows => {
                let table = run("netstat", &["-ano"]).await?;
                Ok(parse_netstat_listeners(&table, port))
            }
        }
    }

    async fn kill(&self, pid: u32) -> Result<(), ProcessError> {
        let pid = pid.to_string();
        match self.platform {
            Platform::Unix => run("kill", &["-9", pid.as_str()]).await.map(|_| ()),
            Platform::Windows => run("taskkill", &["/F", "/pid", pid.as_str()]).await.map(|_| ()),
        }
    }
}

#[async_trait]
impl ProcessControl for LocalProcessControl {
    async fn start_node(&self, port: u16, bootstrap_port: u16) -> Result<(), ProcessError> {
        let port = port.to_string();
        let bootstrap_port = bootstrap_port.to_string();
        let args = [
            "-p",
            port.as_str(),
            "-bp",
            bootstrap_port.as_str(),
            "--log-level",
            "error",
            "--session-override",
        ];
        // appium is a .cmd shim on Windows and needs the shell to resolve it
        let mut command = match self.platform {
            Platform::Unix => Command::new(&self.appium),
            Platform::Windows => {
                let mut shell = Command::new("cmd");
                shell.args(["/C", self.appium.as_str()]);
                shell
            }
        };
        let child = command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: format!("{} {}", self.appium, args.join(" ")),
                source,
            })?;
        debug!(port = %port, pid = child.id(), "launched node");
        Ok(())
    }

    async fn terminate_port_owner(&self, port: u16) -> Result<Vec<u32>, ProcessError> {
        let pids = self.listeners(port).await?;
        let mut killed = Vec::with_capacity(pids.len());
        for pid in pids {
            match self.kill(pid).await {
                Ok(()) => {
                    info!(port, pid, "terminated port owner");
                    killed.push(pid);
                }
                Err(err) => warn!(port, pid, error = %err, "failed to terminate port owner"),
            }
        }
        Ok(killed)
    }
}

pub fn parse_lsof_pids(output: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// PIDs of TCP sockets in LISTENING state on `port` from `netstat -ano`.
pub fn parse_netstat_listeners(table: &str, port: u16) -> Vec<u32> {
    let port = port.to_string();
    let mut pids: Vec<u32> = table
        .lines()
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            match columns.as_slice() {
                ["TCP", local, _, "LISTENING", pid] => {
                    let (_, local_port) = local.rsplit_once(':')?;
                    if local_port == port {
                        pid.parse().ok()
                    } else {
                        None
                    }
                }
                _ => None,
            }
        })
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsof_pids_are_deduplicated() {
        assert_eq!(parse_lsof_pids("4242\n17\n4242\n"), vec![17, 4242]);
        assert!(parse_lsof_pids("").is_empty());
    }

    #[test]
    fn netstat_matches_exact_listening_port() {
        let table = "
Active Connections

  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:4723           0.0.0.0:0              LISTENING       5120
  TCP    [::]:4723              [::]:0                 LISTENING       5120
  TCP    0.0.0.0:47230          0.0.0.0:0              LISTENING       777
  TCP    127.0.0.1:4723         127.0.0.1:50022        ESTABLISHED     5120
  TCP    127.0.0.1:50022        127.0.0.1:4723         ESTABLISHED     9000
  UDP    0.0.0.0:4723           *:*                                    31
";
        assert_eq!(parse_netstat_listeners(table, 4723), vec![5120]);
        assert_eq!(parse_netstat_listeners(table, 47230), vec![777]);
        assert!(parse_netstat_listeners(table, 8200).is_empty());
    }

    #[test]
    fn current_platform_is_supported_on_ci_hosts() {
        assert!(Platform::current().is_ok());
    }
}
