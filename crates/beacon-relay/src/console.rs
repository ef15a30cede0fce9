//! Line-oriented operator console.
//!
//! Every input line prints a status report. A few exact lines change the
//! output:
//!
//! - `debug`: the text report, then the drained diagnostic ring
//! - `json`: the report as pretty-printed JSON
//! - `metrics`: the text report, then the Prometheus exposition
//!
//! Lines are matched as read, without trimming; only the line terminator
//! (`\n` or `\r\n`) is removed. Bytes that are not UTF-8 are replaced, so any
//! line still produces a report. End of input ends the console only.

use std::borrow::Cow;
use std::sync::Arc;

use beacon_logging::DiagnosticRing;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::registry::Registry;
use crate::status::StatusReport;

/// Command recognised on a console line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Print the status report.
    Report,
    /// Print the status report, then drain the diagnostic ring.
    Debug,
    /// Print the status report as JSON.
    Json,
    /// Print the status report, then the Prometheus metrics.
    Metrics,
}

impl ConsoleCommand {
    /// Classify one input line (terminator already removed).
    ///
    /// Only exact matches select a command; `" debug"` is a plain report.
    pub fn parse(line: &str) -> Self {
        match line {
            "debug" => Self::Debug,
            "json" => Self::Json,
            "metrics" => Self::Metrics,
            _ => Self::Report,
        }
    }
}

/// What the console reports on.
pub struct ConsoleState {
    /// Connections to report.
    pub registry: Arc<Registry>,
    /// Diagnostic entries drained by `debug`.
    pub ring: Arc<DiagnosticRing>,
    /// Recorder handle rendered by `metrics`, if one is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl ConsoleState {
    /// Output for one command.
    pub fn respond(&self, command: ConsoleCommand) -> std::io::Result<String> {
        let report = StatusReport::capture(&self.registry);
        if command == ConsoleCommand::Json {
            let mut text = serde_json::to_string_pretty(&report)?;
            text.push('\n');
            return Ok(text);
        }

        let mut text = report.render(true);
        match command {
            ConsoleCommand::Debug => {
                for entry in self.ring.drain() {
                    text.push_str(&entry);
                    text.push('\n');
                }
            }
            ConsoleCommand::Metrics => match &self.metrics {
                Some(handle) => text.push_str(&handle.render()),
                None => text.push_str("Metrics recorder not installed.\n"),
            },
            ConsoleCommand::Report | ConsoleCommand::Json => {}
        }
        Ok(text)
    }
}

/// Serve operator commands from `input` until EOF or cancellation.
pub async fn run_console<R, W>(
    mut input: R,
    mut output: W,
    state: ConsoleState,
    cancel: CancellationToken,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            () = cancel.cancelled() => break,
            read = input.read_until(b'\n', &mut buf) => read?,
        };
        if read == 0 {
            debug!("console input closed");
            break;
        }

        let line = String::from_utf8_lossy(strip_terminator(&buf));
        if matches!(line, Cow::Owned(_)) {
            debug!("console line was not valid UTF-8");
        }
        let text = state.respond(ConsoleCommand::parse(&line))?;
        output.write_all(text.as_bytes()).await?;
        output.flush().await?;
    }
    Ok(())
}

fn strip_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
