//! Per-address SSH session registry
//!
//! The [`ConnectionManager`] owns at most one live session per device
//! address. Establishing a session for an address always tears down the
//! previous one first, so two sessions never race commands against the same
//! device.
//!
//! # Concurrency
//!
//! Sessions for different addresses are independent. Operations against the
//! *same* address must be serialized by the caller: a second `connect` for an
//! address that is mid-command will close the session under the first
//! caller's feet. The registry never holds a lock across an await point.

use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use wf_core::config::ConnectionConfig;
use wf_core::error::ConnectionError;
use wf_core::traits::{FileTransporter, RemoteSession, SessionFactory};
use wf_core::types::{Address, CommandOutput, ConnectOutcome};

use crate::command::{remote_parent, shell_quote};

/// Exclusive, timeout-bound SSH sessions keyed by device address
pub struct ConnectionManager {
    /// Opens new authenticated sessions
    factory: Arc<dyn SessionFactory>,
    /// Delivers files to devices
    transporter: Arc<dyn FileTransporter>,
    /// Timeouts and login settings
    config: ConnectionConfig,
    /// Live sessions indexed by address
    sessions: DashMap<Address, Arc<dyn RemoteSession>>,
    /// Last password that authenticated, per address
    credentials: DashMap<Address, String>,
}

impl ConnectionManager {
    /// Create an empty registry
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        transporter: Arc<dyn FileTransporter>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            factory,
            transporter,
            config,
            sessions: DashMap::new(),
            credentials: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Log in to a device, replacing any existing session for it.
    ///
    /// Never fails past this boundary; the reason is carried in the outcome.
    pub async fn connect(&self, address: Address, password: &str) -> ConnectOutcome {
        match self
            .establish(address, password, self.config.connect_timeout)
            .await
        {
            Ok(_) => ConnectOutcome::ok(),
            Err(e) => {
                tracing::warn!("Connection to {} failed: {}", address, e);
                ConnectOutcome::failed(e.to_string())
            }
        }
    }

    /// Check that a device accepts a login within `timeout`.
    ///
    /// The probe session is closed again immediately and the registry is
    /// left untouched, whatever the result. Used for polling only.
    pub async fn quick_connect(&self, address: Address, timeout: Duration) -> bool {
        // One deadline covers every password tried
        let deadline = tokio::time::Instant::now() + timeout;
        for password in self.password_candidates(address) {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                tracing::trace!("Quick connect to {} ran out of time", address);
                break;
            }
            match self.open_session(address, &password, remaining).await {
                Ok(session) => {
                    session.close().await;
                    return true;
                }
                Err(e) => {
                    tracing::trace!("Quick connect to {} failed: {}", address, e);
                }
            }
        }
        false
    }

    /// Run a command on the device, reconnecting first if there is no live
    /// session.
    ///
    /// Standard error and non-zero exit codes are logged but do not fail the
    /// call. A session that drops mid-command is evicted from the registry
    /// and reported as [`ConnectionError::Closed`].
    pub async fn execute(
        &self,
        address: Address,
        command: &str,
    ) -> Result<CommandOutput, ConnectionError> {
        let session = match self.live_session(address) {
            Some(session) => session,
            None => self.reconnect(address).await?,
        };

        tracing::debug!("[{}] $ {}", address, command);
        match session.exec(command).await {
            Ok(output) => {
                if !output.stderr.trim().is_empty() {
                    tracing::warn!("[{}] stderr: {}", address, output.stderr.trim());
                }
                if !output.success() {
                    tracing::debug!(
                        "[{}] '{}' exited with {:?}",
                        address,
                        command,
                        output.exit_status
                    );
                }
                Ok(output)
            }
            Err(e) => {
                if e.is_connection_closed() || session.is_closed() {
                    self.evict(address, &session);
                }
                Err(e)
            }
        }
    }

    /// Copy a local file to the device.
    ///
    /// Creates the remote parent directory first. Returns `false` on any
    /// failure; never errors.
    pub async fn transfer_file(
        &self,
        address: Address,
        local_path: &Path,
        remote_path: &str,
        password: Option<&str>,
    ) -> bool {
        if let Some(parent) = remote_parent(remote_path) {
            let mkdir = format!("mkdir -p {}", shell_quote(parent));
            if let Err(e) = self.execute(address, &mkdir).await {
                tracing::error!("Failed to prepare {} on {}: {}", parent, address, e);
                return false;
            }
        }

        let remembered = self.remembered_password(address);
        let password = password.or(remembered.as_deref());

        match self
            .transporter
            .transfer(address, local_path, remote_path, password)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    "Copied {} to {}:{}",
                    local_path.display(),
                    address,
                    remote_path
                );
                true
            }
            Err(e) => {
                tracing::error!("Transfer to {} failed: {}", address, e);
                false
            }
        }
    }

    /// Poll a rebooting device until it accepts a login.
    ///
    /// Makes up to `max_attempts` quick connects, sleeping `interval` after
    /// each failure. Returns `true` on the first success.
    pub async fn poll_for_availability(
        &self,
        address: Address,
        max_attempts: u32,
        interval: Duration,
    ) -> bool {
        for attempt in 1..=max_attempts {
            if self
                .quick_connect(address, self.config.quick_connect_timeout)
                .await
            {
                tracing::info!("{} is reachable (attempt {}/{})", address, attempt, max_attempts);
                return true;
            }
            tracing::debug!(
                "{} not reachable yet (attempt {}/{})",
                address,
                attempt,
                max_attempts
            );
            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }
        false
    }

    /// Close and forget the session for an address, if any
    pub async fn close_connection(&self, address: Address) {
        if let Some((_, session)) = self.sessions.remove(&address) {
            tracing::debug!("Closing session to {}", address);
            session.close().await;
        }
    }

    /// Close every session. Called at shutdown.
    pub async fn close_all(&self) {
        let addresses: Vec<Address> = self.sessions.iter().map(|r| *r.key()).collect();
        for address in addresses {
            self.close_connection(address).await;
        }
    }

    /// Whether a live session exists for an address
    pub fn is_connected(&self, address: Address) -> bool {
        self.live_session(address).is_some()
    }

    /// Number of sessions currently held
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Password that last authenticated against an address
    pub fn remembered_password(&self, address: Address) -> Option<String> {
        self.credentials.get(&address).map(|r| r.value().clone())
    }

    async fn establish(
        &self,
        address: Address,
        password: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn RemoteSession>, ConnectionError> {
        self.close_connection(address).await;

        let session = self.open_session(address, password, timeout).await?;
        let session: Arc<dyn RemoteSession> = Arc::from(session);

        // Another caller may have raced us to the same address
        if let Some(previous) = self.sessions.insert(address, Arc::clone(&session)) {
            tracing::warn!("Replacing concurrent session to {}", address);
            previous.close().await;
        }
        self.credentials.insert(address, password.to_string());

        tracing::info!("Connected to {}", address);
        Ok(session)
    }

    async fn open_session(
        &self,
        address: Address,
        password: &str,
        timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, ConnectionError> {
        tokio::time::timeout(timeout, self.factory.open(address, password, timeout))
            .await
            .map_err(|_| ConnectionError::Timeout(timeout))?
    }

    async fn reconnect(&self, address: Address) -> Result<Arc<dyn RemoteSession>, ConnectionError> {
        let mut last_error = None;
        for password in self.password_candidates(address) {
            match self
                .establish(address, &password, self.config.connect_timeout)
                .await
            {
                Ok(session) => return Ok(session),
                Err(e) => last_error = Some(e),
            }
        }
        Err(match last_error {
            Some(ConnectionError::AuthenticationFailed(_)) | None => {
                ConnectionError::NotConnected(address.to_string())
            }
            Some(e) => e,
        })
    }

    /// Remembered password first, then the empty password
    fn password_candidates(&self, address: Address) -> Vec<String> {
        let mut candidates = Vec::with_capacity(2);
        if let Some(password) = self.remembered_password(address) {
            candidates.push(password);
        }
        if !candidates.iter().any(String::is_empty) {
            candidates.push(String::new());
        }
        candidates
    }

    fn live_session(&self, address: Address) -> Option<Arc<dyn RemoteSession>> {
        self.sessions
            .get(&address)
            .map(|r| Arc::clone(r.value()))
            .filter(|session| !session.is_closed())
    }

    fn evict(&self, address: Address, session: &Arc<dyn RemoteSession>) {
        let removed = self
            .sessions
            .remove_if(&address, |_, current| Arc::ptr_eq(current, session));
        if removed.is_some() {
            tracing::debug!("Dropped dead session to {}", address);
        }
    }
}
