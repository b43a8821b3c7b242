// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Out-of-process skills.
//!
//! The child speaks line-delimited JSON on stdio. Each request is one line
//!
//! ```json
//! {"id": 1, "method": "invoke", "params": {"entry_point": "predict", "input": {}}}
//! ```
//!
//! answered by one line
//!
//! ```json
//! {"id": 1, "ok": true, "result": {}}
//! {"id": 1, "ok": false, "error": "reason"}
//! ```
//!
//! Methods: `initialize`, `capabilities`, `entry_points`, `invoke`,
//! `shutdown`. Capabilities and entry points are read once after
//! `initialize`. A crashed child fails the call in progress and every later
//! call; a reload spawns a fresh process.
//!
//! Replies are read on a dedicated thread. A request that gets no reply
//! within the timeout (manifest `timeout_ms`, default 30 s) kills the child,
//! so a hung plugin never holds its execution slot past the deadline.

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::domain::plugin::{EntryPoint, PluginContext, PluginError, PluginId, SkillPlugin};

#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

struct Connection {
    child: Child,
    stdin: ChildStdin,
    replies: Receiver<io::Result<String>>,
}

/// Forward stdout lines until EOF, a read error, or the receiver is gone.
fn spawn_reader(plugin_id: &PluginId, stdout: ChildStdout) -> io::Result<Receiver<io::Result<String>>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("plugin-{}", plugin_id))
        .spawn(move || {
            let mut stdout = BufReader::new(stdout);
            loop {
                let mut line = String::new();
                match stdout.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        })?;
    Ok(rx)
}

pub struct ProcessPlugin {
    plugin_id: PluginId,
    command: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    connection: Option<Connection>,
    timeout: Duration,
    next_id: u64,
    capabilities: Vec<String>,
    entry_points: Vec<EntryPoint>,
}

impl ProcessPlugin {
    pub fn new(
        plugin_id: PluginId,
        command: PathBuf,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            plugin_id,
            command,
            args,
            env,
            connection: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            next_id: 1,
            capabilities: Vec::new(),
            entry_points: vec![EntryPoint::Execute],
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn spawn(&mut self, context: &PluginContext) -> Result<(), PluginError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .envs(&self.env)
            .env("NIGHTFRAME_PLUGIN_ID", context.plugin_id.as_str())
            .current_dir(&context.plugin_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| PluginError::Initialization {
                plugin_id: self.plugin_id.clone(),
                message: format!("failed to spawn {}: {}", self.command.display(), e),
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(PluginError::Protocol("child stdio was not captured".to_string()));
        };

        let replies = match spawn_reader(&self.plugin_id, stdout) {
            Ok(replies) => replies,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PluginError::Initialization {
                    plugin_id: self.plugin_id.clone(),
                    message: format!("failed to start reader thread: {}", e),
                });
            }
        };

        debug!(plugin_id = %self.plugin_id, pid = child.id(), "Spawned plugin process");
        self.connection = Some(Connection {
            child,
            stdin,
            replies,
        });
        Ok(())
    }

    fn request(&mut self, method: &str, params: Value) -> Result<Value, PluginError> {
        let id = self.next_id;
        self.next_id += 1;

        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| PluginError::NotLoaded(self.plugin_id.clone()))?;

        let mut line = serde_json::to_string(&Request { id, method, params })
            .map_err(|e| PluginError::Protocol(e.to_string()))?;
        line.push('\n');
        connection
            .stdin
            .write_all(line.as_bytes())
            .and_then(|_| connection.stdin.flush())
            .map_err(|e| PluginError::Protocol(format!("write to plugin failed: {}", e)))?;

        let reply = match connection.replies.recv_timeout(self.timeout) {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                return Err(PluginError::Protocol(format!("read from plugin failed: {}", e)));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(PluginError::Protocol(format!(
                    "plugin {} closed its output",
                    self.plugin_id
                )));
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    plugin_id = %self.plugin_id,
                    method,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Plugin did not reply in time, killing it"
                );
                self.terminate();
                return Err(PluginError::Protocol(format!(
                    "plugin {} did not answer {} within {:?}",
                    self.plugin_id, method, self.timeout
                )));
            }
        };

        let response: Response = serde_json::from_str(reply.trim_end())
            .map_err(|e| PluginError::Protocol(format!("malformed response: {}", e)))?;
        if response.id != id {
            return Err(PluginError::Protocol(format!(
                "response id {} does not match request id {}",
                response.id, id
            )));
        }
        if !response.ok {
            return Err(PluginError::Execution {
                plugin_id: self.plugin_id.clone(),
                message: response.error.unwrap_or_else(|| format!("{} failed", method)),
            });
        }
        Ok(response.result)
    }

    fn terminate(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.child.kill() {
                debug!(plugin_id = %self.plugin_id, error = %e, "Plugin process already exited");
            }
            let _ = connection.child.wait();
        }
    }
}

impl SkillPlugin for ProcessPlugin {
    fn initialize(&mut self, context: &PluginContext) -> Result<(), PluginError> {
        self.spawn(context)?;

        let params = json!({
            "plugin_id": context.plugin_id,
            "plugin_dir": context.plugin_dir,
            "config": context.config,
        });
        let setup = self
            .request("initialize", params)
            .and_then(|_| self.request("capabilities", Value::Null))
            .and_then(|caps| {
                serde_json::from_value::<Vec<String>>(caps)
                    .map_err(|e| PluginError::Protocol(format!("capabilities: {}", e)))
            });

        let capabilities = match setup {
            Ok(capabilities) => capabilities,
            Err(e) => {
                self.terminate();
                return Err(PluginError::Initialization {
                    plugin_id: self.plugin_id.clone(),
                    message: e.to_string(),
                });
            }
        };
        self.capabilities = capabilities;

        // Older plugins only implement `execute`
        match self.request("entry_points", Value::Null) {
            Ok(value) => match serde_json::from_value::<Vec<EntryPoint>>(value) {
                Ok(entry_points) => self.entry_points = entry_points,
                Err(e) => warn!(plugin_id = %self.plugin_id, error = %e, "Ignoring malformed entry points"),
            },
            Err(e) => debug!(plugin_id = %self.plugin_id, error = %e, "Plugin did not report entry points"),
        }
        Ok(())
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    fn entry_points(&self) -> Vec<EntryPoint> {
        self.entry_points.clone()
    }

    fn invoke(&mut self, entry_point: EntryPoint, input: Value) -> Result<Value, PluginError> {
        self.request(
            "invoke",
            json!({
                "entry_point": entry_point,
                "input": input,
            }),
        )
    }

    fn shutdown(&mut self) -> Result<(), PluginError> {
        if self.connection.is_none() {
            return Ok(());
        }
        let result = self.request("shutdown", Value::Null).map(|_| ());
        self.terminate();
        result
    }
}

impl Drop for ProcessPlugin {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"#!/bin/sh
while read -r line; do
  id=$(echo "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"capabilities"'*) echo "{\"id\":$id,\"ok\":true,\"result\":[\"wifi_ap\"]}" ;;
    *'"method":"entry_points"'*) echo "{\"id\":$id,\"ok\":true,\"result\":[\"analyze_state\"]}" ;;
    *'"method":"invoke"'*'"hang"'*) exec sleep 30 ;;
    *'"method":"invoke"'*) echo "{\"id\":$id,\"ok\":true,\"result\":{\"echo\":true}}" ;;
    *'"method":"shutdown"'*) echo "{\"id\":$id,\"ok\":true}"; exit 0 ;;
    *) echo "{\"id\":$id,\"ok\":true,\"result\":null}" ;;
  esac
done
"#;

    fn script(dir: &std::path::Path) -> String {
        let path = dir.join("echo_plugin.sh");
        std::fs::write(&path, SCRIPT).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_process_plugin_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let script = script(dir.path());
        let mut plugin = ProcessPlugin::new(
            PluginId::new("echo"),
            PathBuf::from("sh"),
            vec![script],
            BTreeMap::new(),
        );

        let context = PluginContext {
            plugin_id: PluginId::new("echo"),
            plugin_dir: dir.path().to_path_buf(),
            config: BTreeMap::new(),
        };
        plugin.initialize(&context).unwrap();
        assert_eq!(plugin.capabilities(), vec!["wifi_ap".to_string()]);
        assert_eq!(plugin.entry_points(), vec![EntryPoint::AnalyzeState]);

        let out = plugin.invoke(EntryPoint::AnalyzeState, json!({"rssi": -60})).unwrap();
        assert_eq!(out, json!({"echo": true}));
        plugin.shutdown().unwrap();
        assert!(plugin.invoke(EntryPoint::AnalyzeState, Value::Null).is_err());
    }

    #[test]
    fn test_hung_request_times_out_and_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let script = script(dir.path());
        let mut plugin = ProcessPlugin::new(
            PluginId::new("echo"),
            PathBuf::from("sh"),
            vec![script],
            BTreeMap::new(),
        )
        .with_timeout(Duration::from_millis(300));

        let context = PluginContext {
            plugin_id: PluginId::new("echo"),
            plugin_dir: dir.path().to_path_buf(),
            config: BTreeMap::new(),
        };
        plugin.initialize(&context).unwrap();

        let started = std::time::Instant::now();
        let err = plugin
            .invoke(EntryPoint::AnalyzeState, json!({"mode": "hang"}))
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(err.to_string().contains("did not answer"), "{}", err);
        assert!(matches!(
            plugin.invoke(EntryPoint::AnalyzeState, Value::Null),
            Err(PluginError::NotLoaded(_))
        ));
    }

    #[test]
    fn test_spawn_failure_is_initialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut plugin = ProcessPlugin::new(
            PluginId::new("missing"),
            dir.path().join("no_such_binary"),
            vec![],
            BTreeMap::new(),
        );
        let context = PluginContext {
            plugin_id: PluginId::new("missing"),
            plugin_dir: dir.path().to_path_buf(),
            config: BTreeMap::new(),
        };
        assert!(matches!(
            plugin.initialize(&context),
            Err(PluginError::Initialization { .. })
        ));
    }
}
