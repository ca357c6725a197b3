//! Well-known paths
//! ================
//!
//! The health socket, pause FIFO, and stderr mirror are part of the wire
//! contract shared with the host-side healthcheck and orchestrator, not
//! configuration — they are bare constants rather than options threaded
//! through a builder. Only one supervisor may own these paths in a given
//! mount namespace at a time.

pub const HEALTH_SOCKET_PATH: &str = "/tmp/imagetest.health.sock";
pub const PAUSE_FIFO_PATH: &str = "/tmp/imagetest.unpause";
pub const STDERR_MIRROR_PATH: &str = "/tmp/imagetest.stderr.log";
