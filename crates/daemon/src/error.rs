use thiserror::Error;

/// Failures of the platform collaborators. These are logged by the pools and
/// never reach an HTTP caller.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Exit {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("process control is not implemented for {0}")]
    UnsupportedPlatform(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("pool size must be at least 1")]
    EmptyPool,

    #[error("busy limit must be greater than zero")]
    ZeroTtl,

    #[error("probe attempts per node must be at least 1")]
    NoProbeAttempts,

    #[error("{count} nodes starting at port {base} do not fit below 65536")]
    NodePortsOverflow { base: u16, count: usize },

    #[error("device port base {system_port} collides with node ports {first}..={last}")]
    PortOverlap { system_port: u16, first: u16, last: u16 },

    #[error("HTTP port {port} collides with node ports {first}..={last}")]
    ListenerOverlap { port: u16, first: u16, last: u16 },
}
