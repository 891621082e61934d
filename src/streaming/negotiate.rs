//! Protocol version negotiation.

use super::protocol::{ProtocolBehavior, ProtocolTable, ProtocolVersion};
use super::{StreamConnection, Upgrader};
use crate::config::StreamConfig;
use crate::error::{Error, Result};

/// Client-side negotiation of the remote command protocol.
///
/// Behavior rows come from the borrowed `handlers` table; every offered
/// version must have one.
#[derive(Debug, Clone)]
pub struct StreamNegotiator<'t> {
    versions: Vec<ProtocolVersion>,
    handlers: ProtocolTable<'t>,
}

impl StreamNegotiator<'static> {
    /// Offers `versions`, most preferred first, with the standard table.
    pub fn new(versions: Vec<ProtocolVersion>) -> Result<Self> {
        Self::with_handlers(versions, ProtocolTable::default())
    }

    /// Offers every version from v4 down to v1.
    pub fn all() -> Self {
        Self {
            versions: ProtocolVersion::PREFERRED.to_vec(),
            handlers: ProtocolTable::default(),
        }
    }

    /// Offers the versions listed in the stream config.
    pub fn from_config(config: &StreamConfig) -> Result<Self> {
        Self::from_config_with_handlers(config, ProtocolTable::default())
    }
}

impl<'t> StreamNegotiator<'t> {
    /// Offers `versions` with behavior looked up in `handlers`.
    pub fn with_handlers(versions: Vec<ProtocolVersion>, handlers: ProtocolTable<'t>) -> Result<Self> {
        if versions.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one stream protocol must be offered".to_string(),
            ));
        }
        if let Some(missing) = versions.iter().find(|v| handlers.get(**v).is_none()) {
            return Err(Error::InvalidConfig(format!(
                "no handler for stream protocol {missing}"
            )));
        }
        Ok(Self { versions, handlers })
    }

    /// Offers the configured versions with behavior looked up in `handlers`.
    pub fn from_config_with_handlers(config: &StreamConfig, handlers: ProtocolTable<'t>) -> Result<Self> {
        let versions = config
            .protocols
            .iter()
            .map(|name| {
                ProtocolVersion::from_name(name).ok_or_else(|| {
                    Error::InvalidConfig(format!("unknown stream protocol {name:?}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::with_handlers(versions, handlers)
    }

    pub fn versions(&self) -> &[ProtocolVersion] {
        &self.versions
    }

    /// Upgrades the connection and looks up the chosen version's behavior.
    ///
    /// A peer that picks no protocol is treated as v1.
    pub async fn negotiate(
        &self,
        upgrader: &dyn Upgrader,
    ) -> Result<(Box<dyn StreamConnection>, &'t ProtocolBehavior)> {
        let offered: Vec<&'static str> = self.versions.iter().map(|v| v.name()).collect();
        let (conn, chosen) = upgrader.upgrade(&offered).await?;

        if chosen.is_empty() {
            tracing::info!(
                fallback = ProtocolVersion::V1.name(),
                "Server did not negotiate a streaming protocol version, falling back"
            );
            return self.lookup(conn, ProtocolVersion::V1).await;
        }

        match ProtocolVersion::from_name(&chosen).filter(|v| self.versions.contains(v)) {
            Some(version) => {
                tracing::debug!(protocol = %version, "Negotiated streaming protocol");
                self.lookup(conn, version).await
            }
            None => {
                if let Err(e) = conn.close().await {
                    tracing::debug!(error = %e, "Failed to close rejected connection");
                }
                Err(Error::ProtocolNegotiation(format!(
                    "server chose unsupported protocol {chosen:?}"
                )))
            }
        }
    }

    async fn lookup(
        &self,
        conn: Box<dyn StreamConnection>,
        version: ProtocolVersion,
    ) -> Result<(Box<dyn StreamConnection>, &'t ProtocolBehavior)> {
        match self.handlers.get(version) {
            Some(behavior) => Ok((conn, behavior)),
            None => {
                if let Err(e) = conn.close().await {
                    tracing::debug!(error = %e, "Failed to close rejected connection");
                }
                Err(Error::ProtocolNegotiation(format!(
                    "no handler for negotiated protocol {version}"
                )))
            }
        }
    }
}

/// Server-side choice: the first client-preferred protocol the server supports.
///
/// A client that lists nothing gets v1 when the server still supports it.
pub fn select_protocol(client: &[String], server: &[ProtocolVersion]) -> Result<ProtocolVersion> {
    if client.is_empty() {
        if server.contains(&ProtocolVersion::V1) {
            tracing::info!("Client did not request a streaming protocol, using v1");
            return Ok(ProtocolVersion::V1);
        }
        return Err(Error::ProtocolNegotiation(
            "client did not request a protocol and v1 is disabled".to_string(),
        ));
    }

    client
        .iter()
        .filter_map(|name| ProtocolVersion::from_name(name))
        .find(|v| server.contains(v))
        .ok_or_else(|| {
            Error::ProtocolNegotiation(format!(
                "no common protocol: client offered {client:?}, server supports {:?}",
                server.iter().map(|v| v.name()).collect::<Vec<_>>()
            ))
        })
}
