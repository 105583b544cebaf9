//! Subprocess embedding bridge.
//!
//! Spawns the embedding bridge (by default the Python sentence-encoder
//! script), then speaks a JSON-lines protocol over stdin/stdout:
//!
//! ```text
//! <- {"type":"ready","dimension":512}
//! -> {"type":"embed","id":"req-1","texts":["pick up the cup","",""]}
//! <- {"type":"result","id":"req-1","embeddings":[[...],[...],[...]]}
//! -> {"type":"shutdown"}
//! ```
//!
//! Bridge logs go to the parent's stderr.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use bridge_rlds_shared::{BridgeRldsError, EmbeddingConfig, Result};

use crate::embedding::{Embedder, validate_embeddings};

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

/// Request message sent to the bridge.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum RequestMessage<'a> {
    #[serde(rename = "embed")]
    Embed { id: String, texts: &'a [String] },
    #[serde(rename = "shutdown")]
    Shutdown,
}

/// Response message received from the bridge.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseMessage {
    #[serde(rename = "ready")]
    Ready {
        #[serde(default)]
        dimension: Option<usize>,
    },
    #[serde(rename = "result")]
    Result {
        id: String,
        embeddings: Vec<Vec<f32>>,
    },
    #[serde(rename = "error")]
    Error {
        #[allow(dead_code)]
        id: String,
        error: String,
    },
}

fn bridge_err(msg: impl Into<String>) -> BridgeRldsError {
    BridgeRldsError::EmbeddingFailure(msg.into())
}

// ---------------------------------------------------------------------------
// Bridge handle
// ---------------------------------------------------------------------------

/// Embedder backed by a long-lived bridge subprocess.
pub struct BridgeEmbedder {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    dimension: usize,
    request_counter: u64,
    finished: bool,
}

impl BridgeEmbedder {
    /// Spawn the bridge and wait for its ready message.
    #[instrument(skip_all, fields(cmd = %config.bridge_cmd))]
    pub fn spawn(config: &EmbeddingConfig) -> Result<Self> {
        info!(args = ?config.bridge_args, model = %config.model, "spawning embedding bridge");

        let mut child = Command::new(&config.bridge_cmd)
            .args(&config.bridge_args)
            .current_dir(&config.working_dir)
            .env("BRIDGE_RLDS_MODEL", &config.model)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                bridge_err(format!(
                    "failed to spawn bridge: {e}. Is `{}` installed?",
                    config.bridge_cmd
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| bridge_err("failed to capture bridge stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| bridge_err("failed to capture bridge stdout"))?;

        let mut bridge = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            dimension: config.dimension,
            request_counter: 0,
            finished: false,
        };
        bridge.wait_for_ready()?;
        Ok(bridge)
    }

    fn read_message(&mut self) -> Result<ResponseMessage> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|e| bridge_err(format!("bridge read error: {e}")))?;

        if line.is_empty() {
            return Err(bridge_err("bridge closed stdout unexpectedly"));
        }

        serde_json::from_str(line.trim()).map_err(|e| {
            bridge_err(format!(
                "invalid bridge message: {e} (got: {})",
                line.chars().take(200).collect::<String>()
            ))
        })
    }

    fn wait_for_ready(&mut self) -> Result<()> {
        match self.read_message()? {
            ResponseMessage::Ready { dimension } => {
                if let Some(reported) = dimension.filter(|d| *d != self.dimension) {
                    return Err(bridge_err(format!(
                        "bridge reports dimension {reported}, expected {}",
                        self.dimension
                    )));
                }
                info!(dimension = self.dimension, "bridge is ready");
                Ok(())
            }
            other => Err(bridge_err(format!("expected ready message, got: {other:?}"))),
        }
    }

    fn send(&mut self, request: &RequestMessage<'_>) -> Result<()> {
        let json = serde_json::to_string(request)
            .map_err(|e| bridge_err(format!("failed to serialize request: {e}")))?;
        writeln!(self.stdin, "{json}")
            .map_err(|e| bridge_err(format!("failed to write to bridge stdin: {e}")))?;
        self.stdin
            .flush()
            .map_err(|e| bridge_err(format!("failed to flush bridge stdin: {e}")))
    }
}

impl Embedder for BridgeEmbedder {
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);

        self.send(&RequestMessage::Embed {
            id: id.clone(),
            texts,
        })?;

        match self.read_message()? {
            ResponseMessage::Result {
                id: resp_id,
                embeddings,
            } => {
                if resp_id != id {
                    return Err(bridge_err(format!(
                        "response id {resp_id} does not match request {id}"
                    )));
                }
                validate_embeddings(&embeddings, texts.len(), self.dimension)?;
                Ok(embeddings)
            }
            ResponseMessage::Error { error, .. } => Err(bridge_err(error)),
            ResponseMessage::Ready { .. } => {
                Err(bridge_err("unexpected ready message during embedding"))
            }
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    /// Send shutdown and wait for the bridge to exit.
    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        // A bridge that already exited closes its stdin; reap it regardless.
        if let Err(e) = self.send(&RequestMessage::Shutdown) {
            debug!("failed to send shutdown to bridge: {e}");
        }
        match self.child.wait() {
            Ok(status) => info!(?status, "bridge exited"),
            Err(e) => warn!("bridge wait error: {e}"),
        }
        Ok(())
    }
}

impl Drop for BridgeEmbedder {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
