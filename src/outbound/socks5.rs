//! Upstream SOCKS5 client outbound (RFC 1928, RFC 1929)
//!
//! Carries proxied connections through the tunnel's local entry. Each
//! dial opens a fresh connection to the entry, negotiates
//! authentication, and issues a CONNECT for the target. Domain targets
//! are passed through as `ATYP = domain`, so name resolution happens at
//! the tunnel exit rather than on this host.
//!
//! Connection flow:
//! 1. TCP connect to the tunnel entry
//! 2. Method selection (VER, NMETHODS, METHODS) and server choice
//! 3. Username/password sub-negotiation when the server asks for it
//! 4. CONNECT request with the destination address
//! 5. Reply with result code and bound address

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use super::direct::DirectOutbound;
use super::socks5_common::{
    reply_message, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, AUTH_METHOD_NONE, AUTH_METHOD_NO_ACCEPTABLE,
    AUTH_METHOD_PASSWORD, AUTH_PASSWORD_VERSION, CMD_CONNECT, MAX_DOMAIN_LEN, REPLY_SUCCEEDED,
    SOCKS5_VERSION,
};
use super::target::TargetAddr;
use super::traits::{Outbound, OutboundConnection};
use crate::error::OutboundError;

/// SOCKS5 client dialing through the tunnel entry
pub struct Socks5Outbound {
    /// Local address of the tunnel entry
    entry: SocketAddr,
    /// Optional username/password credentials (RFC 1929)
    auth: Option<(String, String)>,
}

impl Socks5Outbound {
    /// Create a client for an entry that requires no authentication
    #[must_use]
    pub const fn new(entry: SocketAddr) -> Self {
        Self { entry, auth: None }
    }

    /// Set username/password credentials
    #[must_use]
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some((username.into(), password.into()));
        self
    }

    /// The tunnel entry address this client dials
    #[must_use]
    pub const fn entry(&self) -> SocketAddr {
        self.entry
    }

    /// Method selection and optional auth sub-negotiation
    async fn handshake(&self, stream: &mut TcpStream) -> Result<(), OutboundError> {
        let greeting: &[u8] = if self.auth.is_some() {
            &[SOCKS5_VERSION, 2, AUTH_METHOD_NONE, AUTH_METHOD_PASSWORD]
        } else {
            &[SOCKS5_VERSION, 1, AUTH_METHOD_NONE]
        };
        stream.write_all(greeting).await?;

        let mut response = [0u8; 2];
        stream.read_exact(&mut response).await?;
        trace!("method selection response: {:?}", response);

        if response[0] != SOCKS5_VERSION {
            return Err(OutboundError::UpstreamProtocol(format!(
                "invalid version in method selection: {:#04x}",
                response[0]
            )));
        }

        match response[1] {
            AUTH_METHOD_NONE => Ok(()),
            AUTH_METHOD_PASSWORD => self.authenticate(stream).await,
            AUTH_METHOD_NO_ACCEPTABLE => Err(OutboundError::UpstreamProtocol(
                "no acceptable authentication method".into(),
            )),
            other => Err(OutboundError::UpstreamProtocol(format!(
                "unsupported auth method selected: {other:#04x}"
            ))),
        }
    }

    /// Username/password sub-negotiation (RFC 1929)
    async fn authenticate(&self, stream: &mut TcpStream) -> Result<(), OutboundError> {
        let Some((username, password)) = &self.auth else {
            return Err(OutboundError::UpstreamProtocol(
                "server requires authentication but no credentials configured".into(),
            ));
        };

        if username.len() > 255 || password.len() > 255 {
            return Err(OutboundError::UpstreamProtocol(
                "credentials exceed 255 bytes".into(),
            ));
        }

        // VER | ULEN | USERNAME | PLEN | PASSWORD
        let mut request = Vec::with_capacity(3 + username.len() + password.len());
        request.push(AUTH_PASSWORD_VERSION);
        request.push(username.len() as u8);
        request.extend_from_slice(username.as_bytes());
        request.push(password.len() as u8);
        request.extend_from_slice(password.as_bytes());

        stream.write_all(&request).await?;

        let mut response = [0u8; 2];
        stream.read_exact(&mut response).await?;

        if response[0] != AUTH_PASSWORD_VERSION {
            return Err(OutboundError::UpstreamProtocol(format!(
                "invalid auth sub-negotiation version: {:#04x}",
                response[0]
            )));
        }
        if response[1] != 0x00 {
            return Err(OutboundError::UpstreamProtocol(
                "authentication rejected".into(),
            ));
        }

        trace!("upstream authentication succeeded");
        Ok(())
    }

    /// Send CONNECT and validate the reply
    async fn request_connect(
        stream: &mut TcpStream,
        target: &TargetAddr,
    ) -> Result<(), OutboundError> {
        let request = build_connect_request(target)?;
        stream.write_all(&request).await?;

        // Reply header: VER | REP | RSV | ATYP
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await?;

        if header[0] != SOCKS5_VERSION {
            return Err(OutboundError::UpstreamProtocol(format!(
                "invalid version in reply: {:#04x}",
                header[0]
            )));
        }
        if header[1] != REPLY_SUCCEEDED {
            return Err(OutboundError::UpstreamReply {
                code: header[1],
                message: reply_message(header[1]),
            });
        }

        // Drain the bound address; its value is not used
        match header[3] {
            ATYP_IPV4 => {
                let mut rest = [0u8; 6];
                stream.read_exact(&mut rest).await?;
            }
            ATYP_IPV6 => {
                let mut rest = [0u8; 18];
                stream.read_exact(&mut rest).await?;
            }
            ATYP_DOMAIN => {
                let mut len = [0u8; 1];
                stream.read_exact(&mut len).await?;
                let mut rest = vec![0u8; len[0] as usize + 2];
                stream.read_exact(&mut rest).await?;
            }
            other => {
                return Err(OutboundError::UpstreamProtocol(format!(
                    "invalid address type in reply: {other:#04x}"
                )));
            }
        }

        Ok(())
    }

    /// Full dial: entry connect, handshake, CONNECT
    async fn dial(&self, target: &TargetAddr) -> Result<OutboundConnection, OutboundError> {
        let mut stream = DirectOutbound::connect_once(self.entry).await?;

        self.handshake(&mut stream).await?;
        Self::request_connect(&mut stream, target).await?;

        debug!(target = %target, entry = %self.entry, "tunnel CONNECT established");
        Ok(OutboundConnection::new(stream, self.entry))
    }
}

#[async_trait]
impl Outbound for Socks5Outbound {
    async fn connect(
        &self,
        target: &TargetAddr,
        connect_timeout: Duration,
    ) -> Result<OutboundConnection, OutboundError> {
        match timeout(connect_timeout, self.dial(target)).await {
            Ok(result) => result,
            Err(_) => Err(OutboundError::timeout(
                target.to_string(),
                connect_timeout.as_secs(),
            )),
        }
    }

    fn tag(&self) -> &'static str {
        "socks5-tunnel"
    }
}

impl std::fmt::Debug for Socks5Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socks5Outbound")
            .field("entry", &self.entry)
            .field("has_auth", &self.auth.is_some())
            .finish()
    }
}

/// Build a SOCKS5 CONNECT request for the target
///
/// Domain targets are encoded as `ATYP = domain` so the relay's exit
/// resolves the name.
fn build_connect_request(target: &TargetAddr) -> Result<Vec<u8>, OutboundError> {
    let mut request = Vec::with_capacity(22);
    request.push(SOCKS5_VERSION);
    request.push(CMD_CONNECT);
    request.push(0x00); // Reserved

    match target {
        TargetAddr::Ip(SocketAddr::V4(v4)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&v4.ip().octets());
        }
        TargetAddr::Ip(SocketAddr::V6(v6)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&v6.ip().octets());
        }
        TargetAddr::Domain(host, _) => {
            if host.len() > MAX_DOMAIN_LEN {
                return Err(OutboundError::connection_failed(
                    target.to_string(),
                    "domain name exceeds 255 bytes",
                ));
            }
            request.push(ATYP_DOMAIN);
            request.push(host.len() as u8);
            request.extend_from_slice(host.as_bytes());
        }
    }

    request.extend_from_slice(&target.port().to_be_bytes());
    Ok(request)
}
