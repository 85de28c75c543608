//! russh-backed sessions to target devices

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;

use wf_core::config::ConnectionConfig;
use wf_core::error::ConnectionError;
use wf_core::traits::{RemoteSession, SessionFactory};
use wf_core::types::{Address, CommandOutput};

/// SSH extended-data stream number for stderr
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Opens password-authenticated SSH sessions with russh
pub struct RusshSessionFactory {
    /// Login user
    username: String,
    /// SSH port on the device
    port: u16,
}

impl RusshSessionFactory {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            username: config.username.clone(),
            port: config.port,
        }
    }

    async fn authenticate(
        &self,
        handle: &mut Handle<ClientHandler>,
        address: Address,
        password: &str,
    ) -> Result<(), ConnectionError> {
        // Freshly flashed devices have no root password and accept "none"
        if password.is_empty() {
            let accepted = handle
                .authenticate_none(&self.username)
                .await
                .map_err(|e| map_ssh_error(address, e))?;
            if accepted {
                return Ok(());
            }
        }

        let accepted = handle
            .authenticate_password(&self.username, password)
            .await
            .map_err(|e| map_ssh_error(address, e))?;

        if accepted {
            Ok(())
        } else {
            Err(ConnectionError::AuthenticationFailed(format!(
                "{}@{}",
                self.username, address
            )))
        }
    }
}

#[async_trait]
impl SessionFactory for RusshSessionFactory {
    async fn open(
        &self,
        address: Address,
        password: &str,
        timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, ConnectionError> {
        let config = Arc::new(Config {
            inactivity_timeout: Some(timeout.max(Duration::from_secs(30))),
            ..Default::default()
        });

        tracing::debug!("Connecting to {}:{}", address, self.port);
        let mut handle = tokio::time::timeout(
            timeout,
            client::connect(config, (address.ip(), self.port), ClientHandler),
        )
        .await
        .map_err(|_| ConnectionError::Timeout(timeout))?
        .map_err(|e| ConnectionError::Refused(format!("{}: {}", address, e)))?;

        tracing::debug!("Authenticating as '{}' on {}", self.username, address);
        if let Err(e) = self.authenticate(&mut handle, address, password).await {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(e);
        }

        Ok(Box::new(RusshSession { address, handle }))
    }
}

/// An authenticated russh session
pub struct RusshSession {
    address: Address,
    handle: Handle<ClientHandler>,
}

#[async_trait]
impl RemoteSession for RusshSession {
    async fn exec(&self, command: &str) -> Result<CommandOutput, ConnectionError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| map_ssh_error(self.address, e))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| map_ssh_error(self.address, e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        // The channel ended without an exit status: the server went away
        if exit_status.is_none() {
            return Err(ConnectionError::Closed(format!(
                "{} closed the session during '{}'",
                self.address, command
            )));
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        })
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    async fn close(&self) {
        if self.handle.is_closed() {
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await
        {
            tracing::debug!("Disconnect from {} failed: {}", self.address, e);
        }
    }
}

/// Classify a russh error; transport loss becomes `Closed`
fn map_ssh_error(address: Address, error: russh::Error) -> ConnectionError {
    match error {
        russh::Error::Disconnect | russh::Error::HUP | russh::Error::SendError => {
            ConnectionError::Closed(format!("{}: {}", address, error))
        }
        russh::Error::IO(ref io) => match io.kind() {
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => {
                ConnectionError::Closed(format!("{}: {}", address, error))
            }
            _ => ConnectionError::Ssh(format!("{}: {}", address, error)),
        },
        other => ConnectionError::Ssh(format!("{}: {}", address, other)),
    }
}

/// SSH client handler for device sessions
struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    /// Accept every host key.
    ///
    /// Devices regenerate their host key on each flash, so pinning would make
    /// every post-flash reconnect fail. This is the only place host identity
    /// is decided.
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!("Accepting host key {}", server_public_key.fingerprint());
        Ok(true)
    }
}
