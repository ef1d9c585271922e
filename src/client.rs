//! Client operations: upload a local file, download a remote one.
//!
//! Local problems (missing source, bad destination directory, invalid
//! configuration) are reported before a single datagram is sent.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use crate::chunks::{self, ChunkReader};
use crate::config::{Mode, Protocol, TransferConfig};
use crate::error::Result;
use crate::handshake::{self, Request};
use crate::session::Session;
use crate::simulator::SimulatorConfig;
use crate::transfer::{self, TransferReport};

#[derive(Debug, Clone)]
pub struct Client {
    server: SocketAddr,
    protocol: Protocol,
    config: TransferConfig,
    simulator: Option<SimulatorConfig>,
}

impl Client {
    pub fn new(server: SocketAddr, protocol: Protocol, config: TransferConfig) -> Self {
        Self {
            server,
            protocol,
            config,
            simulator: None,
        }
    }

    /// Inject faults into this client's data and closing traffic.
    pub fn with_simulator(mut self, simulator: SimulatorConfig) -> Self {
        self.simulator = Some(simulator);
        self
    }

    /// Send `source` to the server, stored there as `name`.
    pub async fn upload(&self, source: &Path, name: &str) -> Result<TransferReport> {
        self.config.validate()?;
        let reader = ChunkReader::open(source, self.config.chunk_size).await?;
        let session = self.connect(Request::new(Mode::Upload, name)).await?;
        transfer::send_file(session, reader, self.protocol, &self.config).await
    }

    /// Fetch `name` from the server into `dest`.
    pub async fn download(&self, name: &str, dest: &Path) -> Result<TransferReport> {
        self.config.validate()?;
        chunks::check_destination(dest).await?;
        let session = self.connect(Request::new(Mode::Download, name)).await?;
        transfer::receive_file(session, dest, self.protocol, &self.config).await
    }

    async fn connect(&self, request: Request) -> Result<Arc<Session>> {
        let session = handshake::connect(self.server, &request, &self.config).await?;
        if let Some(simulator) = &self.simulator {
            session.attach_simulator(simulator.clone())?;
        }
        Ok(Arc::new(session))
    }
}
