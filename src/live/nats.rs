use anyhow::{Context, Result};
use async_nats::Client;
use futures::stream::StreamExt;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::messages::{LiveSetup, ServerMessage};
use super::transport::{ChannelEvent, ConnectionControl, LiveConnection, LiveTransport, OutboundLink};

/// Live transport over NATS
///
/// A gateway bridges these subjects to the model endpoint:
/// - `{prefix}.{session}.setup`  - setup envelope (published once on open)
/// - `{prefix}.{session}.input`  - realtime input (audio chunks, video frames)
/// - `{prefix}.{session}.server` - server messages (subscribed)
/// - `{prefix}.{session}.close`  - end of session
pub struct NatsTransport {
    url: String,
    subject_prefix: String,
    outbound_buffer: usize,
}

/// Setup payload published to the gateway
#[derive(Debug, Serialize)]
struct SetupEnvelope<'a> {
    session_id: &'a str,
    api_key: &'a str,
    setup: &'a LiveSetup,
}

impl NatsTransport {
    pub fn new(url: impl Into<String>, subject_prefix: impl Into<String>, outbound_buffer: usize) -> Self {
        Self {
            url: url.into(),
            subject_prefix: subject_prefix.into(),
            outbound_buffer,
        }
    }

    fn subject(&self, session_id: &str, kind: &str) -> String {
        format!("{}.{}.{}", self.subject_prefix, session_id, kind)
    }
}

#[async_trait::async_trait]
impl LiveTransport for NatsTransport {
    async fn open(
        &self,
        session_id: &str,
        api_key: &str,
        setup: &LiveSetup,
    ) -> Result<LiveConnection> {
        info!("Connecting to NATS at {}", self.url);

        let (event_tx, event_rx) = mpsc::channel(64);

        // Losing the server is fatal for the session; no transparent reconnect.
        let error_tx = event_tx.clone();
        let client = async_nats::ConnectOptions::new()
            .event_callback(move |event| {
                let error_tx = error_tx.clone();
                async move {
                    if let async_nats::Event::Disconnected = event {
                        let _ = error_tx
                            .send(ChannelEvent::Error("NATS connection lost".to_string()))
                            .await;
                    }
                }
            })
            .connect(self.url.as_str())
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        let server_subject = self.subject(session_id, "server");
        let mut subscriber = client
            .subscribe(server_subject.clone())
            .await
            .context("Failed to subscribe to server messages")?;

        info!("Subscribed to {}", server_subject);

        let envelope = SetupEnvelope {
            session_id,
            api_key,
            setup,
        };
        let payload = serde_json::to_vec(&envelope)?;
        client
            .publish(self.subject(session_id, "setup"), payload.into())
            .await
            .context("Failed to publish live setup")?;

        let reader = tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<ServerMessage>(&msg.payload) {
                    Ok(message) => {
                        let event = if message.setup_complete.is_some() {
                            ChannelEvent::Open
                        } else {
                            ChannelEvent::Message(message)
                        };
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to parse server message: {}", e);
                    }
                }
            }

            debug!("Server message subscription ended");
            let _ = event_tx.send(ChannelEvent::Closed).await;
        });

        let (outbound, mut input_rx) = OutboundLink::channel(self.outbound_buffer);
        let input_subject = self.subject(session_id, "input");
        let writer_client = client.clone();

        let writer = tokio::spawn(async move {
            while let Some(input) = input_rx.recv().await {
                let payload = match serde_json::to_vec(&input) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Failed to serialize realtime input: {}", e);
                        continue;
                    }
                };

                if let Err(e) = writer_client
                    .publish(input_subject.clone(), payload.into())
                    .await
                {
                    warn!("Failed to publish realtime input: {}", e);
                }
            }
        });

        Ok(LiveConnection {
            outbound,
            inbound: event_rx,
            control: Box::new(NatsConnection {
                client,
                close_subject: self.subject(session_id, "close"),
                reader: Some(reader),
                writer: Some(writer),
            }),
        })
    }

    fn name(&self) -> &str {
        "NATS"
    }
}

struct NatsConnection {
    client: Client,
    close_subject: String,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl ConnectionControl for NatsConnection {
    async fn close(&mut self) -> Result<()> {
        info!("Closing NATS live connection");

        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        // A disconnected client holds publish and flush until it reconnects
        within(
            CLOSE_STEP_TIMEOUT,
            "publish session close",
            self.client
                .publish(self.close_subject.clone(), Vec::<u8>::new().into()),
        )
        .await?;
        within(CLOSE_STEP_TIMEOUT, "flush NATS", self.client.flush()).await?;

        Ok(())
    }
}

/// Time allowed for each step of closing a connection
const CLOSE_STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// Run one NATS operation, giving up after `limit`
async fn within<T, E>(limit: Duration, what: &str, op: impl Future<Output = Result<T, E>>) -> Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result.with_context(|| format!("Failed to {}", what)),
        Err(_) => {
            warn!("Timed out after {:?} trying to {}", limit, what);
            anyhow::bail!("Timed out trying to {}", what)
        }
    }
}

impl Drop for NatsConnection {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
