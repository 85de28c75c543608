//! File delivery through the system `scp` client
//!
//! Embedded dropbear servers rarely ship an SFTP subsystem, and modern
//! OpenSSH `scp` defaults to SFTP. The transporter therefore forces the
//! legacy protocol (`-O`), disables host-key checking (keys change on every
//! flash) and re-enables `ssh-rsa` for old dropbear builds. When a password
//! is needed it is handed to `sshpass` through the environment, never argv.

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

use wf_core::config::ConnectionConfig;
use wf_core::error::TransferError;
use wf_core::traits::FileTransporter;
use wf_core::types::Address;

/// Shells out to `scp`, optionally wrapped in `sshpass -e`
pub struct ScpTransporter {
    config: ConnectionConfig,
}

impl ScpTransporter {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Build the copy command without running it
    pub fn build_command(
        &self,
        address: Address,
        local_path: &Path,
        remote_path: &str,
        password: Option<&str>,
    ) -> Command {
        let password = password.filter(|p| !p.is_empty());

        let mut command = match password {
            Some(password) => {
                let mut command = Command::new(&self.config.password_helper);
                command
                    .arg("-e")
                    .arg(&self.config.scp_program)
                    .env("SSHPASS", password);
                command
            }
            None => {
                let mut command = Command::new(&self.config.scp_program);
                // Never block on an interactive password prompt
                command.args(["-o", "BatchMode=yes"]);
                command
            }
        };

        if self.config.legacy_scp {
            command.arg("-O");
        }

        let connect_timeout = self.config.connect_timeout.as_secs().max(1);
        command
            .args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "UserKnownHostsFile=/dev/null"])
            .args(["-o", "HostKeyAlgorithms=+ssh-rsa"])
            .args(["-o", "PubkeyAcceptedKeyTypes=+ssh-rsa"])
            .args(["-o", "LogLevel=ERROR"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", connect_timeout))
            .arg("-P")
            .arg(self.config.port.to_string())
            .arg(local_path)
            .arg(format!("{}@{}:{}", self.config.username, address, remote_path))
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        command
    }
}

#[async_trait]
impl FileTransporter for ScpTransporter {
    async fn transfer(
        &self,
        address: Address,
        local_path: &Path,
        remote_path: &str,
        password: Option<&str>,
    ) -> Result<(), TransferError> {
        tokio::fs::metadata(local_path)
            .await
            .map_err(|source| TransferError::LocalFile {
                path: local_path.to_path_buf(),
                source,
            })?;

        let mut command = self.build_command(address, local_path, remote_path, password);
        let program = command.as_std().get_program().to_string_lossy().into_owned();

        tracing::debug!("Running {} for {} -> {}", program, local_path.display(), address);
        let output = command
            .output()
            .await
            .map_err(|source| TransferError::Spawn { program, source })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(TransferError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn args(command: &Command) -> Vec<String> {
        command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_command_without_password() {
        let transporter = ScpTransporter::new(ConnectionConfig::default());
        let command = transporter.build_command(
            "192.168.1.1".parse().unwrap(),
            Path::new("/var/tmp/fw.bin"),
            "/tmp/firmware.bin",
            None,
        );

        assert_eq!(command.as_std().get_program(), OsStr::new("scp"));
        let args = args(&command);
        assert!(args.contains(&"-O".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert_eq!(args.last().unwrap(), "root@192.168.1.1:/tmp/firmware.bin");
    }

    #[test]
    fn test_command_with_password_uses_helper() {
        let transporter = ScpTransporter::new(ConnectionConfig {
            legacy_scp: false,
            ..Default::default()
        });
        let command = transporter.build_command(
            "10.0.0.1".parse().unwrap(),
            Path::new("fw.bin"),
            "/tmp/fw.bin",
            Some("hunter2"),
        );

        assert_eq!(command.as_std().get_program(), OsStr::new("sshpass"));
        let args = args(&command);
        assert_eq!(&args[..2], &["-e".to_string(), "scp".to_string()]);
        assert!(!args.contains(&"-O".to_string()));
        assert!(!args.iter().any(|a| a.contains("hunter2")));

        let env: Vec<_> = command.as_std().get_envs().collect();
        assert!(env.contains(&(OsStr::new("SSHPASS"), Some(OsStr::new("hunter2")))));
    }

    #[test]
    fn test_empty_password_is_no_password() {
        let transporter = ScpTransporter::new(ConnectionConfig::default());
        let command = transporter.build_command(
            "10.0.0.1".parse().unwrap(),
            Path::new("fw.bin"),
            "/tmp/fw.bin",
            Some(""),
        );
        assert_eq!(command.as_std().get_program(), OsStr::new("scp"));
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        let transporter = ScpTransporter::new(ConnectionConfig::default());
        let result = transporter
            .transfer(
                "10.0.0.1".parse().unwrap(),
                Path::new("/nonexistent/wrtflash/fw.bin"),
                "/tmp/fw.bin",
                None,
            )
            .await;
        assert!(matches!(result, Err(TransferError::LocalFile { .. })));
    }
}
