//! Adapter for the stock `usbip` command-line tool.
//!
//! Device and driver control is never done in-process.  Every operation is
//! an invocation of `usbip`; remote operations point it at a loopback port
//! that the caller relays over the WebSocket session.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use thiserror::Error;
use tracing::debug;

/// Host `usbip` is pointed at for remote operations.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Failures running the `usbip` tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: ExitStatus },
}

/// One `usbip` operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsbipCommand {
    /// Export a device to the remote application side.
    Connect { busid: String },
    /// Withdraw an exported device.
    Disconnect { busid: String },
    /// Import a remote device into the local vhci driver.
    Attach { busid: String },
    /// Release an imported device.
    Detach { port: String },
    /// Show imported devices.
    Port,
    /// List exportable devices, locally or on the remote side.
    List { local: bool, parsable: bool },
    /// Bind a local device to usbip-host.
    Bind { busid: String },
    /// Return a local device to its original driver.
    Unbind { busid: String },
}

impl UsbipCommand {
    /// Arguments after the program name and any global options.
    fn args(&self) -> Vec<String> {
        let owned = |parts: &[&str]| parts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        match self {
            UsbipCommand::Connect { busid } => {
                owned(&["connect", "--remote", LOOPBACK_HOST, "--busid", busid.as_str()])
            }
            UsbipCommand::Disconnect { busid } => {
                owned(&["disconnect", "--remote", LOOPBACK_HOST, "--busid", busid.as_str()])
            }
            UsbipCommand::Attach { busid } => {
                owned(&["attach", "--remote", LOOPBACK_HOST, "--busid", busid.as_str()])
            }
            UsbipCommand::Detach { port } => owned(&["detach", "--port", port.as_str()]),
            UsbipCommand::Port => owned(&["port"]),
            UsbipCommand::List { local: true, parsable } => {
                let mut args = owned(&["list", "--local"]);
                if *parsable {
                    args.push("--parsable".to_string());
                }
                args
            }
            UsbipCommand::List { local: false, .. } => {
                owned(&["list", "--remote", LOOPBACK_HOST])
            }
            UsbipCommand::Bind { busid } => owned(&["bind", "--busid", busid.as_str()]),
            UsbipCommand::Unbind { busid } => owned(&["unbind", "--busid", busid.as_str()]),
        }
    }
}

/// Locates and runs the `usbip` program.
#[derive(Debug, Clone)]
pub struct UsbipTool {
    program: PathBuf,
}

impl Default for UsbipTool {
    fn default() -> Self {
        Self::new("usbip")
    }
}

impl UsbipTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn name(&self) -> String {
        self.program.display().to_string()
    }

    /// Full argument list for `command`; `tcp_port` selects the loopback
    /// relay port for remote operations.
    pub fn args(&self, command: &UsbipCommand, tcp_port: Option<u16>) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(port) = tcp_port {
            args.push(OsString::from("--tcp-port"));
            args.push(OsString::from(port.to_string()));
        }
        args.extend(command.args().into_iter().map(OsString::from));
        args
    }

    /// Starts the tool without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Spawn`] if the program cannot be started.
    pub fn spawn(&self, command: &UsbipCommand, tcp_port: Option<u16>) -> Result<Child, ToolError> {
        let args = self.args(command, tcp_port);
        debug!(program = %self.program.display(), ?args, "running usbip");
        Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: self.name(),
                source,
            })
    }

    /// Runs the tool to completion.
    ///
    /// # Errors
    ///
    /// [`ToolError::Spawn`] if it cannot be started, [`ToolError::Failed`] if
    /// it exits unsuccessfully.
    pub fn run(&self, command: &UsbipCommand) -> Result<(), ToolError> {
        let mut child = self.spawn(command, None)?;
        let status = child.wait().map_err(|source| ToolError::Spawn {
            program: self.name(),
            source,
        })?;
        self.check(status)
    }

    /// Maps an exit status to a result.
    pub fn check(&self, status: ExitStatus) -> Result<(), ToolError> {
        if status.success() {
            Ok(())
        } else {
            Err(ToolError::Failed {
                program: self.name(),
                status,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.into_string().unwrap())
            .collect()
    }

    #[test]
    fn test_attach_args_point_at_loopback_port() {
        // Arrange
        let tool = UsbipTool::default();
        let cmd = UsbipCommand::Attach {
            busid: "1-1".to_string(),
        };

        // Act
        let args = strings(tool.args(&cmd, Some(40123)));

        // Assert
        assert_eq!(
            args,
            [
                "--tcp-port",
                "40123",
                "attach",
                "--remote",
                "127.0.0.1",
                "--busid",
                "1-1"
            ]
        );
    }

    #[test]
    fn test_local_list_args() {
        let tool = UsbipTool::default();
        let cmd = UsbipCommand::List {
            local: true,
            parsable: true,
        };
        assert_eq!(
            strings(tool.args(&cmd, None)),
            ["list", "--local", "--parsable"]
        );
    }

    #[test]
    fn test_detach_args() {
        let tool = UsbipTool::default();
        let cmd = UsbipCommand::Detach {
            port: "00".to_string(),
        };
        assert_eq!(strings(tool.args(&cmd, None)), ["detach", "--port", "00"]);
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let tool = UsbipTool::new("/nonexistent/usbip");
        let result = tool.run(&UsbipCommand::Port);
        assert!(matches!(result, Err(ToolError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_reports_exit_status() {
        // `true` and `false` ignore their arguments
        assert!(UsbipTool::new("true").run(&UsbipCommand::Port).is_ok());
        assert!(matches!(
            UsbipTool::new("false").run(&UsbipCommand::Port),
            Err(ToolError::Failed { .. })
        ));
    }
}
