//! Host port allocation

use std::net::TcpListener;
use std::ops::Range;

use tracing::debug;

use crate::errors::DeployerError;

pub const DEFAULT_PORT_START: u16 = 32000;
/// Exclusive upper bound
pub const DEFAULT_PORT_END: u16 = 33000;

/// Finds a free host port by binding and releasing each candidate in turn.
///
/// The check is advisory: another process may take the port between the
/// probe and the container start.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    bind_host: String,
    start: u16,
    end: u16,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new("0.0.0.0", DEFAULT_PORT_START, DEFAULT_PORT_END)
    }
}

impl PortAllocator {
    /// Allocator over the half-open range `start..end`
    pub fn new(bind_host: impl Into<String>, start: u16, end: u16) -> Self {
        Self {
            bind_host: bind_host.into(),
            start,
            end,
        }
    }

    pub fn range(&self) -> (u16, u16) {
        (self.start, self.end)
    }

    /// Ports probed by `allocate`, in order
    pub fn candidates(&self) -> Range<u16> {
        self.start..self.end
    }

    pub fn allocate(&self) -> Result<u16, DeployerError> {
        for port in self.candidates() {
            if self.is_free(port) {
                debug!("Allocated host port {}", port);
                return Ok(port);
            }
        }
        Err(DeployerError::NoFreePort {
            start: self.start,
            end: self.end,
        })
    }

    fn is_free(&self, port: u16) -> bool {
        // listener is dropped at the end of the statement
        TcpListener::bind((self.bind_host.as_str(), port)).is_ok()
    }
}
