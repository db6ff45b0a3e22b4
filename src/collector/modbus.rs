//! Modbus TCP sessions backed by `tokio-modbus`.
//!
//! [`ModbusConnector`] opens one client context per device. Reads are bounded
//! by the configured I/O timeout; a Modbus exception response is reported as
//! [`SessionError::Exception`], everything else as a transport failure.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::timeout;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use crate::collector::traits::{PollSettings, RegisterSession, SessionConnector, SessionError};

/// Connector producing Modbus TCP client sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModbusConnector;

impl ModbusConnector {
    pub fn new() -> Self {
        Self
    }
}

async fn resolve(device: &str, port: u16) -> Result<SocketAddr, SessionError> {
    tokio::net::lookup_host((device, port))
        .await?
        .next()
        .ok_or_else(|| {
            SessionError::Transport(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address found for {device}"),
            ))
        })
}

#[async_trait::async_trait]
impl SessionConnector for ModbusConnector {
    async fn connect(
        &self,
        device: &str,
        settings: &PollSettings,
    ) -> Result<Box<dyn RegisterSession>, SessionError> {
        let addr = resolve(device, settings.port).await?;
        let ctx = tcp::connect_slave(addr, Slave(settings.unit_id)).await?;

        tracing::debug!(device, %addr, unit_id = settings.unit_id, "Modbus session opened");
        Ok(Box::new(ModbusSession {
            ctx,
            addr,
            io_timeout: settings.io_timeout,
        }))
    }
}

/// One Modbus TCP client context.
pub struct ModbusSession {
    ctx: Context,
    addr: SocketAddr,
    io_timeout: Duration,
}

impl std::fmt::Debug for ModbusSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusSession")
            .field("addr", &self.addr)
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl RegisterSession for ModbusSession {
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, SessionError> {
        let response = timeout(self.io_timeout, self.ctx.read_holding_registers(address, count))
            .await
            .map_err(|_| SessionError::Timeout)?;

        match response {
            Ok(Ok(values)) => Ok(values),
            Ok(Err(exception)) => Err(SessionError::Exception(format!("{exception:?}"))),
            Err(tokio_modbus::Error::Transport(e)) => Err(SessionError::Transport(e)),
            Err(other) => Err(SessionError::Transport(io::Error::new(
                io::ErrorKind::InvalidData,
                other.to_string(),
            ))),
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ctx.disconnect().await {
            tracing::debug!(addr = %self.addr, error = %e, "Modbus disconnect failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port with no listener
        let listener = match TcpListener::bind("127.0.0.1:0").await {
            Ok(l) => l,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => return,
            Err(e) => panic!("Failed to bind test listener: {e}"),
        };
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let settings = PollSettings::default().with_port(port);
        let result = ModbusConnector::new().connect("127.0.0.1", &settings).await;
        assert!(matches!(result, Err(SessionError::Transport(_))));
    }

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let addr = resolve("127.0.0.1", 502).await.unwrap();
        assert_eq!(addr, "127.0.0.1:502".parse::<SocketAddr>().unwrap());
    }
}
