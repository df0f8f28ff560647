//! Broker session manager.
//!
//! Owns the one MQTT connection for the life of the process: connect,
//! subscribe on every ConnAck (covers reconnects), hand each inbound
//! publish to its own dispatch task, and disconnect cleanly on SIGINT or
//! SIGTERM. Only the initial connection failure is fatal; once up, poll
//! errors are logged and retried.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::FutureExt;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, TlsConfiguration};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::{Config, MqttConfig, Transport};
use crate::relay::{Dispatcher, ResultPublisher};
use crate::trace::Tracer;

/// Bound on a single publish, independent of the trace deadline.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(60);
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Run the MQTT relay until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<()> {
    let mqtt = config.mqtt.clone();
    let options = build_options(&mqtt)?;

    info!(
        host = %mqtt.host,
        port = mqtt.port,
        transport = %mqtt.transport,
        tls = mqtt.with_tls,
        "connecting to broker"
    );

    let (client, mut eventloop) = AsyncClient::new(options, EVENT_CHANNEL_CAPACITY);

    let publisher: Arc<dyn ResultPublisher> = Arc::new(MqttPublisher {
        client: client.clone(),
        qos: qos_level(mqtt.qos),
        retain: mqtt.retain,
    });
    let dispatcher = Arc::new(Dispatcher::new(Tracer::from_config(&config)));

    let task_topic = mqtt.task_topic();
    let mut connected_once = false;

    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    connected_once = true;
                    info!(client_id = %mqtt.client_id, topic = %task_topic, "connected, subscribing");
                    if let Err(e) = client.subscribe(&task_topic, qos_level(mqtt.qos)).await {
                        error!(topic = %task_topic, error = %e, "subscribe failed");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    // Each message gets its own task so dispatch never
                    // blocks keep-alive processing, plus a panic boundary
                    // so one bad task cannot end the loop.
                    let dispatcher = Arc::clone(&dispatcher);
                    let publisher = Arc::clone(&publisher);
                    let client_id = mqtt.client_id.clone();
                    tokio::spawn(async move {
                        let unit = dispatcher.handle(
                            &publish.payload,
                            &client_id,
                            &publish.topic,
                            publisher.as_ref(),
                        );
                        if let Err(panic) = AssertUnwindSafe(unit).catch_unwind().await {
                            error!(topic = %publish.topic, "task handler panicked: {panic:?}");
                        }
                    });
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("server requested disconnect");
                }
                Ok(_) => {}
                Err(e) if !connected_once => {
                    return Err(e).context("initial broker connection failed");
                }
                Err(e) => {
                    warn!(error = %e, "connection lost, retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            },
            _ = shutdown_signal() => {
                info!("shutdown signal received, disconnecting");
                let _ = client.disconnect().await;
                // Drain until the close completes or errors out; a stalled
                // broker must not be able to hang process exit.
                while let Ok(Ok(_)) = timeout(SHUTDOWN_DRAIN, eventloop.poll()).await {}
                return Ok(());
            }
        }
    }
}

/// Publishes result envelopes through the shared broker client.
struct MqttPublisher {
    client: AsyncClient,
    qos: QoS,
    retain: bool,
}

#[async_trait]
impl ResultPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        timeout(
            PUBLISH_TIMEOUT,
            self.client.publish(topic, self.qos, self.retain, payload),
        )
        .await
        .map_err(|_| anyhow::anyhow!("publish timed out after {PUBLISH_TIMEOUT:?}"))?
        .context("broker rejected publish")
    }
}

fn build_options(mqtt: &MqttConfig) -> Result<MqttOptions> {
    let mut options = match mqtt.transport {
        Transport::Ws => {
            // For websocket transports rumqttc takes the full URL in the
            // host slot and ignores the port argument.
            let scheme = if mqtt.with_tls { "wss" } else { "ws" };
            let url = format!("{scheme}://{}:{}/mqtt", mqtt.host, mqtt.port);
            let mut options = MqttOptions::new(&mqtt.client_id, url, mqtt.port);
            options.set_transport(if mqtt.with_tls {
                rumqttc::Transport::Wss(tls_configuration(mqtt)?)
            } else {
                rumqttc::Transport::Ws
            });
            options
        }
        Transport::Tcp => {
            let mut options = MqttOptions::new(&mqtt.client_id, &mqtt.host, mqtt.port);
            options.set_transport(if mqtt.with_tls {
                rumqttc::Transport::Tls(tls_configuration(mqtt)?)
            } else {
                rumqttc::Transport::Tcp
            });
            options
        }
    };

    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(mqtt.clean_start);
    if !mqtt.username.is_empty() {
        options.set_credentials(&mqtt.username, &mqtt.password);
    }
    Ok(options)
}

fn tls_configuration(mqtt: &MqttConfig) -> Result<TlsConfiguration> {
    if mqtt.insecure_tls {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .context("failed to build TLS connector")?;
        Ok(TlsConfiguration::NativeConnector(connector))
    } else {
        Ok(TlsConfiguration::Native)
    }
}

fn qos_level(level: u8) -> QoS {
    match level {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
