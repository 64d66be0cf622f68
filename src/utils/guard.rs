// src/utils/guard.rs: one pipeline per host, enforced by holding a local TCP port

use log::debug;
use tokio::net::TcpListener;

use crate::config::defs::PipelineError;

/// Held for the lifetime of a run. The port is released when the guard is dropped.
#[derive(Debug)]
pub struct SingleInstanceGuard {
    port: u16,
    _listener: TcpListener,
}

impl SingleInstanceGuard {
    /// Binds `127.0.0.1:port`. Port 0 disables the check and yields no guard.
    ///
    /// # Arguments
    ///
    /// * `port` - The `-p` value of the run.
    ///
    /// # Returns
    /// Some(guard), None when disabled, or PipelineError::Exclusivity when the port is taken.
    pub async fn acquire(port: u16) -> Result<Option<Self>, PipelineError> {
        if port == 0 {
            debug!("Single instance check disabled");
            return Ok(None);
        }
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| PipelineError::Exclusivity {
                port,
                reason: e.to_string(),
            })?;
        debug!("Holding port {}", port);
        Ok(Some(SingleInstanceGuard {
            port,
            _listener: listener,
        }))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn release(self) {
        debug!("Releasing port {}", self.port);
    }
}
