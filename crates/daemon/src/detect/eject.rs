//! Tray control.

use async_trait::async_trait;
use std::io;

/// Ejects the disc from a drive.
#[async_trait]
pub trait Ejector: Send + Sync {
    async fn eject(&self, device: &str) -> io::Result<()>;
}

/// Runs the `eject` utility.
#[derive(Debug, Clone)]
pub struct CommandEjector {
    program: String,
}

impl Default for CommandEjector {
    fn default() -> Self {
        Self::new("eject")
    }
}

impl CommandEjector {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Ejector for CommandEjector {
    async fn eject(&self, device: &str) -> io::Result<()> {
        let out = tokio::process::Command::new(&self.program)
            .arg(device)
            .output()
            .await?;
        if out.status.success() {
            return Ok(());
        }
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!(
                "{} exited with {}: {}",
                self.program,
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_ejector_reports_exit_status() {
        assert!(CommandEjector::new("true").eject("/dev/sr0").await.is_ok());

        let err = CommandEjector::new("false").eject("/dev/sr0").await.unwrap_err();
        assert!(err.to_string().contains("false exited"));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let err = CommandEjector::new("riparr-no-such-eject")
            .eject("/dev/sr0")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
