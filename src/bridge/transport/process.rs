//! Child-process transport.
//!
//! Spawns the background host as a child process and talks to it with the
//! frame codec over stdin/stdout. The host's stderr is inherited so its logs
//! land next to ours.

use std::io;
use std::process::Stdio;

use serde_json::Value;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::framing::{read_raw_frame, write_frame};
use super::{MessageSink, MessageSource, Transport};
use crate::bridge::protocol::OutboundEnvelope;

/// Transport to a spawned host process.
pub struct ProcessTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl ProcessTransport {
    /// Spawn `command[0]` with the remaining elements as arguments.
    ///
    /// # Errors
    /// Returns error if:
    /// - `command` is empty
    /// - the process fails to spawn
    /// - stdin/stdout handles cannot be obtained
    pub fn spawn(command: &[String]) -> io::Result<Self> {
        let (program, args) = command.split_first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "host command is empty")
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| io::Error::new(e.kind(), format!("failed to spawn {}: {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other(format!("failed to obtain stdin for {}", program)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other(format!("failed to obtain stdout for {}", program)))?;

        log::debug!(
            target: "workbridge::bridge::process",
            "Spawned host process {} (pid {:?})",
            program,
            child.id()
        );

        Ok(Self {
            child,
            stdin,
            stdout,
        })
    }
}

/// Write half: owns stdin and the child handle (so closing can kill it).
pub struct ProcessSink {
    child: Child,
    stdin: Option<ChildStdin>,
}

/// Read half: buffered stdout.
pub struct ProcessSource {
    stdout: BufReader<ChildStdout>,
}

impl Transport for ProcessTransport {
    type Sink = ProcessSink;
    type Source = ProcessSource;

    fn split(self) -> (ProcessSink, ProcessSource) {
        (
            ProcessSink {
                child: self.child,
                stdin: Some(self.stdin),
            },
            ProcessSource {
                stdout: BufReader::new(self.stdout),
            },
        )
    }
}

impl MessageSink for ProcessSink {
    async fn send(&mut self, envelope: OutboundEnvelope) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "host stdin closed"))?;
        let frame = envelope.into_wire().map_err(io::Error::other)?;
        // Attachments are written straight from their owned allocations and
        // released when `frame` drops
        write_frame(stdin, &frame.body, &frame.attachments).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.stdin.take();
        match self.child.try_wait()? {
            Some(_) => Ok(()),
            None => self.child.kill().await,
        }
    }
}

impl MessageSource for ProcessSource {
    async fn recv(&mut self) -> io::Result<Option<Value>> {
        loop {
            let Some(frame) = read_raw_frame(&mut self.stdout).await? else {
                return Ok(None);
            };
            // The frame is fully consumed, so a bad body is dropped and
            // the stream stays usable
            match serde_json::from_slice(&frame.body) {
                Ok(body) => return Ok(Some(body)),
                Err(e) => log::warn!(
                    target: "workbridge::bridge::process",
                    "Dropping frame with malformed body ({} bytes): {}",
                    frame.body.len(),
                    e
                ),
            }
        }
    }
}
