//! In-memory devices for tests
//!
//! A [`FakeDevice`] answers commands from scripted [`Reply`] rules, keeps a
//! small filesystem, and can simulate the reboot that follows a firmware
//! flash. [`FakeSessionFactory`] and [`FakeTransporter`] plug fake devices
//! into a [`ConnectionManager`](crate::ConnectionManager).

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use wf_core::board::BOARD_QUERY;
use wf_core::error::{ConnectionError, TransferError};
use wf_core::traits::{FileTransporter, RemoteSession, SessionFactory};
use wf_core::types::{Address, CommandOutput};

/// Scripted response to a command prefix
#[derive(Debug, Clone)]
pub enum Reply {
    /// Command completes with this output
    Output(CommandOutput),
    /// Command fails with this error; the session stays up
    Fail(ConnectionError),
    /// Device drops every session and reboots, refusing logins for
    /// `downtime_attempts` attempts
    Reboot { downtime_attempts: u32 },
}

impl Reply {
    /// Successful command printing `stdout`
    pub fn stdout(stdout: &str) -> Self {
        Reply::Output(CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_status: Some(0),
        })
    }

    /// Command exiting with `code` and printing `stderr`
    pub fn exit(code: u32, stderr: &str) -> Self {
        Reply::Output(CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_status: Some(code),
        })
    }
}

#[derive(Debug)]
struct DeviceState {
    reachable: bool,
    login_delay: Duration,
    passwords: Vec<String>,
    rules: Vec<(String, Reply)>,
    files: HashMap<String, String>,
    after_reboot: HashMap<String, String>,
    reset_password_on_reboot: bool,
    downtime_remaining: u32,
    generation: u64,
    open_sessions: usize,
    max_concurrent_sessions: usize,
    total_logins: usize,
    login_attempts: usize,
    reboots: usize,
    commands: Vec<String>,
}

/// A simulated router
#[derive(Debug)]
pub struct FakeDevice {
    address: Address,
    state: Mutex<DeviceState>,
}

impl FakeDevice {
    /// Reachable device with an empty root password and no scripted replies
    pub fn new(address: Address) -> Arc<Self> {
        Arc::new(Self {
            address,
            state: Mutex::new(DeviceState {
                reachable: true,
                login_delay: Duration::ZERO,
                passwords: vec![String::new()],
                rules: Vec::new(),
                files: HashMap::new(),
                after_reboot: HashMap::new(),
                reset_password_on_reboot: false,
                downtime_remaining: 0,
                generation: 0,
                open_sessions: 0,
                max_concurrent_sessions: 0,
                total_logins: 0,
                login_attempts: 0,
                reboots: 0,
                commands: Vec::new(),
            }),
        })
    }

    /// Device that identifies as OpenWrt with the given board name
    pub fn openwrt(address: Address, board_name: &str) -> Arc<Self> {
        let device = Self::new(address);
        device.on(BOARD_QUERY, Reply::stdout(&openwrt_board_json(board_name, "23.05.2")));
        device
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Answer commands starting with `prefix`. Later rules take precedence.
    pub fn on(&self, prefix: &str, reply: Reply) {
        self.state().rules.push((prefix.to_string(), reply));
    }

    /// Passwords accepted for login
    pub fn set_passwords(&self, passwords: &[&str]) {
        self.state().passwords = passwords.iter().map(|p| p.to_string()).collect();
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// How long every login attempt takes to answer
    pub fn set_login_delay(&self, delay: Duration) {
        self.state().login_delay = delay;
    }

    pub fn put_file(&self, path: &str, contents: &str) {
        self.state().files.insert(path.to_string(), contents.to_string());
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.state().files.contains_key(path)
    }

    /// File that appears once the device has rebooted
    pub fn after_reboot_file(&self, path: &str, contents: &str) {
        self.state()
            .after_reboot
            .insert(path.to_string(), contents.to_string());
    }

    /// Whether a reboot clears the login password
    pub fn reset_password_on_reboot(&self, reset: bool) {
        self.state().reset_password_on_reboot = reset;
    }

    pub fn open_sessions(&self) -> usize {
        self.state().open_sessions
    }

    pub fn max_concurrent_sessions(&self) -> usize {
        self.state().max_concurrent_sessions
    }

    /// Successful logins
    pub fn total_logins(&self) -> usize {
        self.state().total_logins
    }

    /// Every login attempt, successful or not
    pub fn login_attempts(&self) -> usize {
        self.state().login_attempts
    }

    pub fn reboots(&self) -> usize {
        self.state().reboots
    }

    /// Commands received, in order
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn login_delay(&self) -> Duration {
        self.state().login_delay
    }

    fn login(&self, password: &str) -> Result<u64, ConnectionError> {
        let mut state = self.state();
        state.login_attempts += 1;

        if !state.reachable {
            return Err(ConnectionError::Refused(format!("{}: unreachable", self.address)));
        }
        if state.downtime_remaining > 0 {
            state.downtime_remaining -= 1;
            return Err(ConnectionError::Refused(format!("{}: rebooting", self.address)));
        }
        if !state.passwords.iter().any(|p| p == password) {
            return Err(ConnectionError::AuthenticationFailed(format!(
                "root@{}",
                self.address
            )));
        }

        state.open_sessions += 1;
        state.max_concurrent_sessions = state.max_concurrent_sessions.max(state.open_sessions);
        state.total_logins += 1;
        Ok(state.generation)
    }

    fn release(&self, generation: u64) {
        let mut state = self.state();
        if state.generation == generation {
            state.open_sessions = state.open_sessions.saturating_sub(1);
        }
    }

    fn generation(&self) -> u64 {
        self.state().generation
    }

    fn run(&self, command: &str) -> Reply {
        let mut state = self.state();
        state.commands.push(command.to_string());

        let scripted = state
            .rules
            .iter()
            .rev()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, reply)| reply.clone());

        let reply = match scripted {
            Some(reply) => reply,
            None => builtin_reply(&state.files, command),
        };

        if let Reply::Reboot { downtime_attempts } = reply {
            state.reboots += 1;
            state.generation += 1;
            state.open_sessions = 0;
            state.downtime_remaining = downtime_attempts;
            state.files.retain(|path, _| !path.starts_with("/tmp/"));
            let after_reboot = state.after_reboot.clone();
            state.files.extend(after_reboot);
            if state.reset_password_on_reboot {
                state.passwords = vec![String::new()];
            }
        }

        reply
    }
}

/// Behaviour for `mkdir -p`, `ls` and `cat <file>` when nothing is scripted
fn builtin_reply(files: &HashMap<String, String>, command: &str) -> Reply {
    let tokens: Vec<&str> = command.split_whitespace().collect();

    match tokens.as_slice() {
        ["mkdir", "-p", ..] => Reply::stdout(""),
        ["ls", .., path] => {
            let path = unquote(path);
            if files.contains_key(&path) {
                Reply::stdout(&format!("{}\n", path))
            } else {
                Reply::exit(1, &format!("ls: {}: No such file or directory", path))
            }
        }
        ["cat", path] => match files.get(&unquote(path)) {
            Some(contents) => Reply::stdout(contents),
            None => Reply::exit(1, &format!("cat: can't open '{}'", unquote(path))),
        },
        _ => Reply::exit(127, &format!("ash: {}: not found", tokens.first().unwrap_or(&""))),
    }
}

fn unquote(value: &str) -> String {
    value.trim_matches('\'').to_string()
}

/// JSON in the shape `ubus call system board` prints
pub fn openwrt_board_json(board_name: &str, version: &str) -> String {
    format!(
        r#"{{"kernel":"5.15.137","hostname":"OpenWrt","system":"fake","model":"Fake {board}","board_name":"{board}","release":{{"distribution":"OpenWrt","version":"{version}","revision":"r0","target":"ramips/mt7621","description":"OpenWrt {version}"}}}}"#,
        board = board_name,
        version = version
    )
}

/// Session on a [`FakeDevice`]
pub struct FakeSession {
    device: Arc<FakeDevice>,
    generation: u64,
    closed: AtomicBool,
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn exec(&self, command: &str) -> Result<CommandOutput, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed(format!(
                "{}: session is gone",
                self.device.address
            )));
        }

        match self.device.run(command) {
            Reply::Output(output) => Ok(output),
            Reply::Fail(error) => Err(error),
            Reply::Reboot { .. } => {
                self.closed.store(true, Ordering::SeqCst);
                Err(ConnectionError::Closed(format!(
                    "{}: connection closed by remote host",
                    self.device.address
                )))
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.device.generation() != self.generation
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.device.release(self.generation);
        }
    }
}

/// Opens [`FakeSession`]s on registered devices
#[derive(Default)]
pub struct FakeSessionFactory {
    devices: Mutex<HashMap<Address, Arc<FakeDevice>>>,
}

impl FakeSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, device: Arc<FakeDevice>) {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(device.address(), device);
    }

    fn device(&self, address: Address) -> Option<Arc<FakeDevice>> {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&address)
            .cloned()
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn open(
        &self,
        address: Address,
        password: &str,
        _timeout: Duration,
    ) -> Result<Box<dyn RemoteSession>, ConnectionError> {
        let device = self
            .device(address)
            .ok_or_else(|| ConnectionError::Refused(format!("{}: no route to host", address)))?;
        let delay = device.login_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let generation = device.login(password)?;
        Ok(Box::new(FakeSession {
            device,
            generation,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Copies files into registered [`FakeDevice`]s
#[derive(Default)]
pub struct FakeTransporter {
    devices: Mutex<HashMap<Address, Arc<FakeDevice>>>,
    failure: Mutex<Option<String>>,
    transfers: Mutex<Vec<(Address, String)>>,
}

impl FakeTransporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, device: Arc<FakeDevice>) {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(device.address(), device);
    }

    /// Make every transfer fail with this message
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.to_string());
    }

    /// Completed transfers as `(address, remote_path)`
    pub fn transfers(&self) -> Vec<(Address, String)> {
        self.transfers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl FileTransporter for FakeTransporter {
    async fn transfer(
        &self,
        address: Address,
        local_path: &Path,
        remote_path: &str,
        _password: Option<&str>,
    ) -> Result<(), TransferError> {
        if let Some(message) = self.failure.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            return Err(TransferError::Failed {
                status: "exit status: 1".to_string(),
                stderr: message,
            });
        }

        let contents = tokio::fs::read(local_path)
            .await
            .map_err(|source| TransferError::LocalFile {
                path: local_path.to_path_buf(),
                source,
            })?;

        let device = self
            .devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&address)
            .cloned()
            .ok_or_else(|| TransferError::Failed {
                status: "exit status: 255".to_string(),
                stderr: format!("ssh: connect to host {} port 22: No route to host", address),
            })?;

        device.put_file(remote_path, &String::from_utf8_lossy(&contents));
        self.transfers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((address, remote_path.to_string()));
        Ok(())
    }
}
