use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::browser::{TabHost, TabId, TabInfo};
use crate::config::AppConfig;
use crate::coordinator::Coordinator;
use crate::errors::{AppError, AppResult};
use crate::protocol::{BrowserSignal, ExtensionMessage};

/// Largest message the browser may send to a native host.
pub const MAX_INBOUND_FRAME: usize = 64 * 1024 * 1024;
/// Largest message a native host may send to the browser.
pub const MAX_OUTBOUND_FRAME: usize = 1024 * 1024;
/// How long shutdown waits for in-flight work and the final flush.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Inbound {
    Signal {
        signal: BrowserSignal,
    },
    Request {
        request_id: u64,
        message: ExtensionMessage,
    },
    Reply {
        call_id: u64,
        #[serde(default)]
        tab: Option<TabInfo>,
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Outbound {
    Call { call_id: u64, call: BrowserCall },
    Response { request_id: u64, body: Value },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BrowserCall {
    QueryActiveTab,
    GetTab { tab_id: TabId },
    UpdateTab { tab_id: TabId, url: String },
}

#[derive(Debug, Default)]
pub struct CallReply {
    pub tab: Option<TabInfo>,
    pub error: Option<String>,
}

/// Reads one length-prefixed frame. `Ok(None)` on a clean EOF.
pub async fn read_frame<R>(reader: &mut R) -> AppResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0_u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(AppError::Io(err)),
    }

    let len = u32::from_ne_bytes(header) as usize;
    if len > MAX_INBOUND_FRAME {
        return Err(AppError::Protocol(format!(
            "frame of {len} bytes exceeds {MAX_INBOUND_FRAME}"
        )));
    }

    let mut body = vec![0_u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_OUTBOUND_FRAME {
        return Err(AppError::Protocol(format!(
            "outbound frame of {} bytes exceeds {MAX_OUTBOUND_FRAME}",
            body.len()
        )));
    }
    let len = body.len() as u32;
    writer.write_all(&len.to_ne_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// [`TabHost`] that forwards calls to the extension over the native channel
/// and waits for the correlated reply.
pub struct BridgeBrowser {
    outbound: mpsc::UnboundedSender<Outbound>,
    pending: Mutex<HashMap<u64, oneshot::Sender<CallReply>>>,
    next_call: AtomicU64,
    call_timeout: Duration,
}

impl BridgeBrowser {
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>, call_timeout: Duration) -> Self {
        Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_call: AtomicU64::new(0),
            call_timeout,
        }
    }

    /// Hands a reply to the waiting caller. False when nobody waits for it.
    pub fn resolve(&self, call_id: u64, reply: CallReply) -> bool {
        match self.pending.lock().remove(&call_id) {
            Some(sender) => sender.send(reply).is_ok(),
            None => false,
        }
    }

    /// Drops every outstanding call; waiting callers see an error.
    pub fn fail_pending(&self) {
        self.pending.lock().clear();
    }

    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }

    async fn call(&self, call: BrowserCall) -> AppResult<Option<TabInfo>> {
        let call_id = self.next_call.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().insert(call_id, sender);

        if self.outbound.send(Outbound::Call { call_id, call }).is_err() {
            self.pending.lock().remove(&call_id);
            return Err(AppError::Browser("native channel closed".into()));
        }

        let reply = match timeout(self.call_timeout, receiver).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(AppError::Browser(format!(
                    "call {call_id} dropped before a reply"
                )))
            }
            Err(_) => {
                self.pending.lock().remove(&call_id);
                return Err(AppError::Browser(format!("call {call_id} timed out")));
            }
        };

        match reply.error {
            Some(error) => Err(AppError::Browser(error)),
            None => Ok(reply.tab),
        }
    }
}

#[async_trait]
impl TabHost for BridgeBrowser {
    async fn active_tab(&self) -> AppResult<Option<TabInfo>> {
        self.call(BrowserCall::QueryActiveTab).await
    }

    async fn get_tab(&self, tab_id: TabId) -> AppResult<Option<TabInfo>> {
        self.call(BrowserCall::GetTab { tab_id }).await
    }

    async fn update_tab_url(&self, tab_id: TabId, url: &str) -> AppResult<()> {
        self.call(BrowserCall::UpdateTab {
            tab_id,
            url: url.to_string(),
        })
        .await
        .map(|_| ())
    }
}

/// Native messaging host wiring the coordinator to the extension.
pub struct NativeHost {
    coordinator: Coordinator,
    bridge: Arc<BridgeBrowser>,
    outbound: mpsc::UnboundedSender<Outbound>,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
}

impl NativeHost {
    pub fn new(config: AppConfig) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let bridge = Arc::new(BridgeBrowser::new(
            outbound.clone(),
            config.browser_call_timeout(),
        ));
        let coordinator = Coordinator::new(bridge.clone(), config);
        Self {
            coordinator,
            bridge,
            outbound,
            outbound_rx,
        }
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Serves frames from `reader` until EOF, writing calls and responses
    /// to `writer`.
    ///
    /// Signals go through one consumer task and are handled in arrival
    /// order. Requests are answered concurrently.
    pub async fn run<R, W>(self, mut reader: R, writer: W) -> AppResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let NativeHost {
            coordinator,
            bridge,
            outbound,
            outbound_rx,
        } = self;

        let (stop_writer, writer_stopped) = oneshot::channel();
        let mut writer_task = tokio::spawn(write_outbound(writer, outbound_rx, writer_stopped));

        let (signals, mut signal_rx) = mpsc::unbounded_channel::<BrowserSignal>();
        let mut signal_task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                while let Some(signal) = signal_rx.recv().await {
                    coordinator.handle_signal(signal).await;
                }
            })
        };

        let mut requests = JoinSet::new();

        info!("native host ready");
        while let Some(frame) = read_frame(&mut reader).await? {
            while requests.try_join_next().is_some() {}

            let inbound: Inbound = match serde_json::from_slice(&frame) {
                Ok(inbound) => inbound,
                Err(err) => {
                    warn!(?err, "skipping malformed native message");
                    continue;
                }
            };

            match inbound {
                Inbound::Reply {
                    call_id,
                    tab,
                    error,
                } => {
                    if !bridge.resolve(call_id, CallReply { tab, error }) {
                        debug!(call_id, "reply for unknown browser call");
                    }
                }
                Inbound::Signal { signal } => {
                    if signals.send(signal).is_err() {
                        warn!("signal consumer stopped; dropping signal");
                    }
                }
                Inbound::Request {
                    request_id,
                    message,
                } => {
                    let coordinator = coordinator.clone();
                    let outbound = outbound.clone();
                    requests.spawn(async move {
                        let body = match coordinator.handle_message(message).await {
                            Ok(body) => body.unwrap_or(Value::Null),
                            Err(err) => {
                                warn!(?err, request_id, "failed to answer request");
                                Value::Null
                            }
                        };
                        if outbound
                            .send(Outbound::Response { request_id, body })
                            .is_err()
                        {
                            debug!(request_id, "native channel closed before response");
                        }
                    });
                }
            }
        }

        info!("native channel closed; shutting down");
        drop(signals);
        bridge.fail_pending();

        let drained = timeout(SHUTDOWN_GRACE, async {
            while requests.join_next().await.is_some() {}
            let _ = (&mut signal_task).await;
        })
        .await;
        if drained.is_err() {
            warn!("in-flight work outlived the shutdown grace period");
            requests.abort_all();
            signal_task.abort();
        }

        let _ = stop_writer.send(());
        if timeout(SHUTDOWN_GRACE, &mut writer_task).await.is_err() {
            warn!("native writer did not flush in time");
            writer_task.abort();
        }
        Ok(())
    }
}

/// Frames outbound messages until told to stop, then flushes what is queued.
async fn write_outbound<W>(
    mut writer: W,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    mut stop: oneshot::Receiver<()>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            message = outbound_rx.recv() => match message {
                Some(message) => {
                    if !write_message(&mut writer, &message).await {
                        return;
                    }
                }
                None => return,
            },
            _ = &mut stop => break,
        }
    }

    while let Ok(message) = outbound_rx.try_recv() {
        if !write_message(&mut writer, &message).await {
            return;
        }
    }
}

async fn write_message<W>(writer: &mut W, message: &Outbound) -> bool
where
    W: AsyncWrite + Unpin,
{
    let body = match serde_json::to_vec(message) {
        Ok(body) => body,
        Err(err) => {
            warn!(?err, "failed to encode native message");
            return true;
        }
    };
    match write_frame(writer, &body).await {
        Ok(()) => true,
        Err(err) => {
            warn!(?err, "failed to write native message");
            false
        }
    }
}
