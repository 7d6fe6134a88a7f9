use clap::{Parser, Subcommand};
use common::{Allocation, DeviceLease, Inventory, NodeLease, ReleaseOutcome};
use reqwest::Client;
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::time;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the droidpool daemon
    #[arg(long, global = true, default_value = "http://localhost:9093")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lease a device
    Device,
    /// Release a leased device
    ReleaseDevice {
        serial: String,
    },
    /// Lease an Appium node
    Appium,
    /// Release a leased Appium node
    ReleaseAppium {
        /// Node URL or bare port
        address: String,
    },
    /// Print both pools
    Status,
    /// List all records as JSON
    List,
    /// Exit 0 if nothing is leased, 1 otherwise
    Idle,
    /// Restart all nodes and free all devices
    Cleanup,
    /// Re-read attached devices
    Refresh,
    /// Run a command with a leased device and Appium node
    Run {
        /// Seconds to keep retrying while the pools answer WAIT
        #[arg(long, default_value_t = 0)]
        wait: u64,

        /// Command and arguments to execute
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

const POLL_INTERVAL: Duration = Duration::from_secs(2);

struct Daemon {
    client: Client,
    base: String,
}

impl Daemon {
    async fn text(&self, path: &str, query: &[(&str, &str)]) -> Result<String, reqwest::Error> {
        self.client
            .get(format!("{}{}", self.base, path))
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    async fn allocate<T>(&self, path: &str) -> Result<Allocation<T>, Box<dyn std::error::Error>>
    where
        T: FromStr<Err = common::ParseError>,
    {
        Ok(self.text(path, &[]).await?.parse()?)
    }

    /// Polls `path` until it yields a lease or `budget` runs out.
    async fn acquire<T>(&self, path: &str, budget: Duration) -> Result<Option<T>, Box<dyn std::error::Error>>
    where
        T: FromStr<Err = common::ParseError>,
    {
        let deadline = Instant::now() + budget;
        loop {
            match self.allocate(path).await? {
                Allocation::Leased(lease) => return Ok(Some(lease)),
                Allocation::Wait if Instant::now() + POLL_INTERVAL > deadline => return Ok(None),
                Allocation::Wait => time::sleep(POLL_INTERVAL).await,
            }
        }
    }

    async fn release(&self, path: &str, key: &str, value: &str) -> Result<ReleaseOutcome, Box<dyn std::error::Error>> {
        Ok(self.text(path, &[(key, value)]).await?.parse()?)
    }

    /// Release during cleanup: reports problems but never aborts. Returns
    /// whether the daemon confirmed the release.
    async fn release_or_warn(&self, path: &str, key: &str, value: &str) -> bool {
        match self.release(path, key, value).await {
            Ok(ReleaseOutcome::Released) => true,
            Ok(ReleaseOutcome::Unknown) => {
                eprintln!("Warning: daemon no longer knows {}", value);
                false
            }
            Err(e) => {
                eprintln!("Warning: failed to release {}: {}", value, e);
                eprintln!("The lease stays held until its TTL expires");
                false
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let daemon = Daemon {
        client: Client::new(),
        base: cli.server.trim_end_matches('/').to_string(),
    };

    match cli.command {
        Commands::Device => match daemon.allocate::<DeviceLease>("/getDevice").await? {
            Allocation::Leased(lease) => {
                println!("Leased device: {}", lease.serial);
                println!("System port: {}", lease.system_port);
            }
            Allocation::Wait => {
                eprintln!("No free device, try again later");
                std::process::exit(2);
            }
        },
        Commands::ReleaseDevice { serial } => {
            match daemon.release("/releaseDevice", "name", &serial).await? {
                ReleaseOutcome::Released => println!("Released device: {}", serial),
                ReleaseOutcome::Unknown => {
                    eprintln!("Unknown device: {}", serial);
                    std::process::exit(1);
                }
            }
        }
        Commands::Appium => match daemon.allocate::<NodeLease>("/getAppium").await? {
            Allocation::Leased(lease) => println!("{}", lease.url),
            Allocation::Wait => {
                eprintln!("No free Appium node, try again later");
                std::process::exit(2);
            }
        },
        Commands::ReleaseAppium { address } => {
            match daemon.release("/releaseAppium", "url", &address).await? {
                ReleaseOutcome::Released => println!("Released node: {}", address),
                ReleaseOutcome::Unknown => {
                    eprintln!("Unknown node: {}", address);
                    std::process::exit(1);
                }
            }
        }
        Commands::Status => println!("{}", daemon.text("/status", &[]).await?),
        Commands::List => {
            let inventory: Inventory = daemon
                .client
                .get(format!("{}/list", daemon.base))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            println!("Devices:");
            for record in inventory.devices {
                println!(
                    "  {} free={} systemPort={} since={}",
                    record.id, record.free, record.aux_port, record.last_transition
                );
            }
            println!("Appium nodes:");
            for record in inventory.nodes {
                println!(
                    "  {} free={} bootstrapPort={} since={}",
                    record.id, record.free, record.aux_port, record.last_transition
                );
            }
        }
        Commands::Idle => {
            let idle = daemon.text("/isAllFree", &[]).await?;
            println!("{}", idle.trim());
            if idle.trim() != "true" {
                std::process::exit(1);
            }
        }
        Commands::Cleanup => {
            daemon.text("/forceCleanUp", &[]).await?;
            println!("Pools cleaned up");
        }
        Commands::Refresh => println!("{}", daemon.text("/rereadDevices", &[]).await?),
        Commands::Run { wait, command } => {
            if command.is_empty() {
                eprintln!("No command specified");
                std::process::exit(1);
            }
            let budget = Duration::from_secs(wait);

            let Some(device) = daemon.acquire::<DeviceLease>("/getDevice", budget).await? else {
                eprintln!("No free device");
                std::process::exit(2);
            };
            let node = match daemon.acquire::<NodeLease>("/getAppium", budget).await {
                Ok(Some(node)) => node,
                outcome => {
                    daemon
                        .release_or_warn("/releaseDevice", "name", &device.serial)
                        .await;
                    match outcome {
                        Err(e) => return Err(e),
                        _ => {
                            eprintln!("No free Appium node");
                            std::process::exit(2);
                        }
                    }
                }
            };
            println!(
                "Leased device {} (systemPort {}) and node {}",
                device.serial, device.system_port, node.url
            );

            let cmd = &command[0];
            let args = &command[1..];
            let status = Command::new(cmd)
                .args(args)
                .env("ANDROID_SERIAL", &device.serial)
                .env("SYSTEM_PORT", device.system_port.to_string())
                .env("APPIUM_URL", &node.url)
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status();

            daemon.release_or_warn("/releaseAppium", "url", &node.url).await;
            daemon
                .release_or_warn("/releaseDevice", "name", &device.serial)
                .await;
            println!("Released device {} and node {}", device.serial, node.url);

            match status {
                Ok(s) => {
                    if !s.success() {
                        std::process::exit(s.code().unwrap_or(1));
                    }
                }
                Err(e) => {
                    eprintln!("Failed to run command: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cleanup_release_survives_unreachable_daemon() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let daemon = Daemon {
            client: Client::new(),
            base,
        };

        assert!(daemon.release("/releaseDevice", "name", "X").await.is_err());
        assert!(!daemon.release_or_warn("/releaseDevice", "name", "X").await);
    }
}
