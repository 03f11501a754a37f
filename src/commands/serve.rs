//! Long-running request mode.
//!
//! Reads one JSON request per line and writes one JSON response per line.
//! Duplicate alerts raised while serving are written to the same stream as
//! `{"type":"alert",...}` lines, interleaved with responses.
//!
//! ```text
//! > {"op":"register","item":{"type":"DIAMOND","quantity":1},"action":"CRAFTED","actor":"alice"}
//! < {"type":"registration","id":4660531249152,"newly_registered":true,...}
//! > {"op":"stats"}
//! < {"type":"stats","records":1,...}
//! ```

use super::inspect::{self, HistoryReport, LookupReport, RegistrationReport, ScanReport, StatsReport};
use super::start_engine;
use crate::models::{Alert, ItemContent, ItemId};
use crate::{Engine, EngineConfig};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Types listed by a `stats` request.
const STATS_TOP_TYPES: usize = 10;

/// A request line.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Register an item under an action.
    Register {
        /// The item.
        item: ItemContent,
        /// Action being performed.
        action: String,
        /// Who performed it.
        actor: String,
    },
    /// Check a held item.
    Check {
        /// The item.
        item: ItemContent,
        /// Who is checking.
        actor: String,
    },
    /// Look up an id.
    Lookup {
        /// The id.
        id: ItemId,
    },
    /// Scan an inventory.
    Scan {
        /// Inventory contents in slot order.
        inventory: Vec<ItemContent>,
    },
    /// Show the history of an id.
    History {
        /// The id.
        id: ItemId,
        /// Keep only the latest entries.
        #[serde(default)]
        limit: Option<usize>,
    },
    /// Show statistics.
    Stats,
    /// Re-read detection settings from the configuration sources.
    Reload,
    /// Stop serving.
    Shutdown,
}

/// A response line.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Result of `register` or `check`.
    Registration(RegistrationReport),
    /// Result of `lookup`.
    Lookup(LookupReport),
    /// Result of `scan`.
    Scan(ScanReport),
    /// Result of `history`.
    History(HistoryReport),
    /// Result of `stats`.
    Stats(StatsReport),
    /// Detection settings now in effect.
    Reloaded {
        /// Whether alerts are broadcast.
        alerts_enabled: bool,
        /// Duplicates needed before an alert.
        min_duplicates: usize,
        /// Scan cap.
        max_results: usize,
        /// Actions that never alert, sorted.
        ignored_actions: Vec<String>,
    },
    /// A duplicate alert, local or from the fleet.
    Alert(Alert),
    /// The request could not be handled.
    Error {
        /// What went wrong.
        message: String,
    },
    /// Acknowledges `shutdown`.
    Bye,
}

/// Handles one request.
///
/// `reload` re-resolves configuration from `config_path` the way the binary
/// does at startup and applies the detection section. `shutdown` is answered
/// with [`Response::Bye`]; stopping is up to the caller.
pub async fn handle_request(
    engine: &Engine,
    request: Request,
    config_path: Option<&Path>,
) -> Response {
    match request {
        Request::Register {
            item,
            action,
            actor,
        } => Response::Registration(inspect::register(engine, item, &action, &actor)),
        Request::Check { item, actor } => {
            Response::Registration(inspect::check(engine, item, &actor))
        },
        Request::Lookup { id } => Response::Lookup(inspect::lookup(engine, id).await),
        Request::Scan { inventory } => Response::Scan(inspect::scan(engine, &inventory)),
        Request::History { id, limit } => {
            Response::History(inspect::history(engine, id, limit).await)
        },
        Request::Stats => Response::Stats(inspect::stats(engine, STATS_TOP_TYPES)),
        Request::Reload => match EngineConfig::resolve(config_path) {
            Ok(config) => {
                let detection = config.detection;
                let mut ignored_actions: Vec<_> =
                    detection.ignored_actions.iter().cloned().collect();
                ignored_actions.sort_unstable();
                let response = Response::Reloaded {
                    alerts_enabled: detection.alerts_enabled,
                    min_duplicates: detection.min_duplicates,
                    max_results: detection.max_results,
                    ignored_actions,
                };
                engine.reload_config(detection);
                response
            },
            Err(e) => {
                warn!(error = %e, "Configuration reload failed, keeping current settings");
                Response::Error {
                    message: format!("reload failed: {e}"),
                }
            },
        },
        Request::Shutdown => Response::Bye,
    }
}

/// Serves requests from `input` until end of input or a `shutdown` request.
///
/// # Errors
///
/// Returns an error if reading input or writing output fails.
pub async fn serve<R, W>(
    engine: &Engine,
    config_path: Option<&Path>,
    input: R,
    output: &mut W,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut alerts = engine.bus().subscribe();
    let mut alerts_open = true;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read request")? else {
                    debug!("End of input");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let response = match serde_json::from_str::<Request>(line) {
                    Ok(Request::Shutdown) => {
                        write_line(output, &Response::Bye).await?;
                        break;
                    },
                    Ok(request) => handle_request(engine, request, config_path).await,
                    Err(e) => Response::Error {
                        message: format!("invalid request: {e}"),
                    },
                };
                write_line(output, &response).await?;
            },
            alert = alerts.recv(), if alerts_open => match alert {
                Ok(alert) => write_line(output, &Response::Alert(alert)).await?,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Alert stream lagged, some alerts were not forwarded");
                },
                Err(RecvError::Closed) => alerts_open = false,
            },
        }
    }
    Ok(())
}

/// Serve command.
///
/// Runs until stdin closes, a `shutdown` request arrives, or Ctrl-C.
///
/// # Errors
///
/// Returns an error if the engine cannot start or stdout fails.
pub async fn cmd_serve(config: &EngineConfig, config_path: Option<&Path>) -> anyhow::Result<()> {
    let engine = start_engine(config).await?;
    info!(node = engine.node_name(), "Serving requests on stdin");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let result = tokio::select! {
        result = serve(&engine, config_path, stdin, &mut stdout) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        },
    };

    engine.shutdown().await;
    result
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, response: &Response) -> anyhow::Result<()> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    output
        .write_all(&line)
        .await
        .context("failed to write response")?;
    output.flush().await.context("failed to flush response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PersistenceConfig;
    use crate::sync::NoopSync;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn engine(dir: &TempDir) -> Engine {
        let config = EngineConfig::default()
            .with_data_dir(dir.path())
            .with_node_name("serve")
            .with_persistence(
                PersistenceConfig::default().with_debounce(Duration::from_millis(20)),
            );
        Engine::start_with_sync(config, Arc::new(NoopSync))
            .await
            .expect("engine starts")
    }

    fn responses(output: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(output)
            .lines()
            .map(|line| serde_json::from_str(line).expect("valid json line"))
            .filter(|value: &Value| value["type"] != "alert")
            .collect()
    }

    #[tokio::test]
    async fn test_requests_are_answered_in_order() {
        let dir = TempDir::new().expect("tempdir");
        let engine = engine(&dir).await;
        let input = concat!(
            r#"{"op":"register","item":{"type":"DIAMOND","quantity":1},"action":"CRAFTED","actor":"alice"}"#,
            "\n\n",
            r#"{"op":"stats"}"#,
            "\n",
            "not json\n",
            r#"{"op":"lookup","id":12345}"#,
            "\n",
            r#"{"op":"shutdown"}"#,
            "\n",
            r#"{"op":"stats"}"#,
            "\n",
        );
        let mut output = Vec::new();

        serve(&engine, None, input.as_bytes(), &mut output)
            .await
            .expect("serve");

        let responses = responses(&output);
        let types: Vec<_> = responses.iter().map(|r| r["type"].as_str().unwrap_or("")).collect();
        assert_eq!(types, vec!["registration", "stats", "error", "lookup", "bye"]);
        assert_eq!(responses[0]["newly_registered"], true);
        assert_eq!(responses[1]["records"], 1);
        assert!(responses[3]["record"].is_null());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_end_of_input_stops_serving() {
        let dir = TempDir::new().expect("tempdir");
        let engine = engine(&dir).await;
        let mut output = Vec::new();

        serve(&engine, None, &b""[..], &mut output).await.expect("serve");

        assert!(output.is_empty());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_alerts_are_forwarded() {
        let dir = TempDir::new().expect("tempdir");
        let engine = Arc::new(engine(&dir).await);
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, mut server_write) = tokio::io::split(server);
        let (client_read, mut client_write) = tokio::io::split(client);

        let serving = Arc::clone(&engine);
        let task = tokio::spawn(async move {
            serve(&serving, None, BufReader::new(server_read), &mut server_write).await
        });

        let register = r#"{"op":"register","item":{"type":"EMERALD","quantity":3},"action":"CRAFTED","actor":"bob"}"#;
        client_write
            .write_all(format!("{register}\n{register}\n").as_bytes())
            .await
            .expect("write");

        let mut lines = BufReader::new(client_read).lines();
        let mut alerts = 0;
        while alerts == 0 {
            let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
                .await
                .expect("response in time")
                .expect("read")
                .expect("line");
            let value: Value = serde_json::from_str(&line).expect("json");
            if value["type"] == "alert" {
                assert_eq!(value["actor"], "bob");
                assert_eq!(value["origin_node"], "serve");
                alerts += 1;
            }
        }

        client_write
            .write_all(b"{\"op\":\"shutdown\"}\n")
            .await
            .expect("write");
        task.await.expect("join").expect("serve");
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_applies_detection_section() {
        let dir = TempDir::new().expect("tempdir");
        let engine = engine(&dir).await;
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            "[detection]\nmin_duplicates = 4\nignored_actions = [\"TRADE\", \"DROP\"]\n",
        )
        .expect("write config");

        let response = handle_request(&engine, Request::Reload, Some(&config_path)).await;

        let json = serde_json::to_value(&response).expect("serialize");
        assert_eq!(json["type"], "reloaded");
        assert_eq!(json["min_duplicates"], 4);
        assert_eq!(json["ignored_actions"], serde_json::json!(["DROP", "TRADE"]));
        assert_eq!(engine.dispatcher().config().min_duplicates, 4);

        let missing = dir.path().join("missing.toml");
        let failed = handle_request(&engine, Request::Reload, Some(&missing)).await;
        assert!(matches!(failed, Response::Error { .. }));
        assert_eq!(engine.dispatcher().config().min_duplicates, 4);
        engine.shutdown().await;
    }
}
