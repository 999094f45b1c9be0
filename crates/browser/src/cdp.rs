//! Low-level Chrome DevTools Protocol connection over WebSocket.
//!
//! One connection is held against the browser endpoint; per-tab commands are
//! multiplexed over it with flat session ids (`Target.attachToTarget` with
//! `flatten: true`). Responses are routed back to callers by command id.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use tabbridge_core::{Error, Result};

/// Backstop for a single CDP command when no tighter bound applies.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// A multiplexed CDP WebSocket connection.
pub struct CdpConnection {
    ws_tx: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicU64,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

/// Removes a command's routing entry when its wait ends without the response
/// being routed, including when the waiting future is dropped mid-flight.
/// Without this, a cancelled wait against a hung tab would leave the entry
/// behind for the life of the connection.
struct PendingGuard {
    pending: PendingMap,
    id: u64,
    armed: bool,
}

impl PendingGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed {
            self.pending.lock().unwrap().remove(&self.id);
        }
    }
}

impl CdpConnection {
    /// Connect to a browser-level CDP WebSocket endpoint.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::cdp(format!("connect to CDP endpoint {}: {}", ws_url, e)))?;

        let (mut ws_sink, mut ws_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let pending_reader = Arc::clone(&pending);

        // Writer task owns the sink and drains the outgoing channel.
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    warn!("CDP write error: {}", e);
                    break;
                }
            }
        });

        // Reader task routes responses by id. Event frames carry a `method`
        // instead of an `id`; nothing here consumes them.
        let reader_handle = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        let val: Value = match serde_json::from_str(&text) {
                            Ok(v) => v,
                            Err(_) => continue,
                        };
                        if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                            let tx = pending_reader.lock().unwrap().remove(&id);
                            if let Some(tx) = tx {
                                let _ = tx.send(val);
                            }
                        } else if let Some(method) = val.get("method").and_then(|v| v.as_str()) {
                            trace!(method, "CDP event");
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Issue a CDP command and wait for the matching response.
    ///
    /// `session` scopes the command to an attached target; `None` runs it at
    /// browser level. The wait ends early when `cancel` fires; the browser
    /// may still execute the command, but no caller is left hanging on it.
    pub async fn execute(
        &self,
        session: Option<&str>,
        method: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let mut msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(sid) = session {
            msg["sessionId"] = json!(sid);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            id,
            armed: true,
        };

        if self.ws_tx.send(msg.to_string()).await.is_err() {
            return Err(Error::cdp(format!("{}: connection closed", method)));
        }

        let response = tokio::select! {
            resp = rx => match resp {
                Ok(v) => {
                    // The reader already removed the entry to route this.
                    guard.disarm();
                    v
                }
                Err(_) => return Err(Error::cdp(format!("{}: response channel closed", method))),
            },
            _ = cancel.cancelled() => {
                return Err(Error::cdp(format!("{}: cancelled", method)));
            }
            _ = tokio::time::sleep(COMMAND_TIMEOUT) => {
                return Err(Error::cdp(format!("{}: timed out after {:?}", method, COMMAND_TIMEOUT)));
            }
        };

        if let Some(error) = response.get("error") {
            let text = error
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown CDP error");
            return Err(Error::cdp(format!("{}: {}", method, text)));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Evaluate a JS expression in a tab, returning the result value.
    pub async fn eval_in(
        &self,
        session: &str,
        expression: &str,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let result = self
            .execute(
                Some(session),
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
                cancel,
            )
            .await?;
        if let Some(exc) = result.get("exceptionDetails") {
            let text = exc
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|v| v.as_str())
                .unwrap_or("evaluation threw");
            return Err(Error::cdp(format!("evaluate: {}", text)));
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_guard_removes_entry_on_drop() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, _rx) = oneshot::channel();
        pending.lock().unwrap().insert(7, tx);

        let guard = PendingGuard {
            pending: Arc::clone(&pending),
            id: 7,
            armed: true,
        };
        drop(guard);
        assert!(pending.lock().unwrap().is_empty());
    }

    #[test]
    fn disarmed_guard_leaves_entry_alone() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, _rx) = oneshot::channel();
        pending.lock().unwrap().insert(7, tx);

        let guard = PendingGuard {
            pending: Arc::clone(&pending),
            id: 7,
            armed: true,
        };
        guard.disarm();
        assert_eq!(pending.lock().unwrap().len(), 1);
    }
}
