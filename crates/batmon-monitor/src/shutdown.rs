//! Critical-battery shutdown

use std::io;
use std::process::{Command, Stdio};

/// Requests a system shutdown
///
/// Implementations must return as soon as the request is launched; the
/// monitor keeps sampling while the system goes down.
pub trait ShutdownAction {
    fn request_shutdown(&mut self) -> io::Result<()>;
}

impl<F> ShutdownAction for F
where
    F: FnMut() -> io::Result<()>,
{
    fn request_shutdown(&mut self) -> io::Result<()> {
        self()
    }
}

/// Runs an external command (default `shutdown -h now`) without waiting on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandShutdown {
    program: String,
    args: Vec<String>,
}

impl Default for CommandShutdown {
    fn default() -> Self {
        Self {
            program: "shutdown".to_string(),
            args: vec!["-h".to_string(), "now".to_string()],
        }
    }
}

impl CommandShutdown {
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build from an argv-style list; `None` if the list is empty
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl ShutdownAction for CommandShutdown {
    fn request_shutdown(&mut self) -> io::Result<()> {
        tracing::warn!(
            "Battery critical, running shutdown command: {} {}",
            self.program,
            self.args.join(" ")
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .spawn()?;

        let program = self.program.clone();
        std::thread::spawn(move || match child.wait() {
            Ok(status) if status.success() => {
                tracing::info!("Shutdown command {} finished", program);
            }
            Ok(status) => {
                tracing::error!("Shutdown command {} exited with {}", program, status);
            }
            Err(e) => {
                tracing::error!("Failed to wait for shutdown command {}: {}", program, e);
            }
        });

        Ok(())
    }
}
