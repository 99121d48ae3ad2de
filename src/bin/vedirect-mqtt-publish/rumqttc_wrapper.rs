use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::bail;
use chrono::Utc;
use log::{debug, info, warn};
use rumqttc::{
    tokio_rustls::{self, rustls::ClientConfig},
    Client, Event, LastWill, MqttOptions, Outgoing, Packet, Transport,
};
use vedirect2mqtt::{
    mqtt_config::MqttConfig,
    mqtt_wrapper::{self, OFFLINE, ONLINE},
};

static RECONNECT_DELAY: Duration = Duration::from_secs(5);
static KEEP_ALIVE: Duration = Duration::from_secs(60);

pub struct RumqttcWrapper {
    client: Client,
    broker: String,
    connected: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    event_loop: Option<JoinHandle<()>>,
}

fn match_qos(qos: mqtt_wrapper::QoS) -> rumqttc::QoS {
    match qos {
        mqtt_wrapper::QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        mqtt_wrapper::QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        mqtt_wrapper::QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

fn sleep_unless_stopping(stopping: &AtomicBool, duration: Duration) {
    let step = Duration::from_millis(100);
    let mut slept = Duration::ZERO;
    while slept < duration && !stopping.load(Ordering::SeqCst) {
        thread::sleep(step);
        slept += step;
    }
}

fn tls_transport() -> Transport {
    // Use rustls-native-certs to load root certificates from the operating system.
    let mut roots = tokio_rustls::rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for e in native.errors {
        warn!("could not load platform certificate: {e}");
    }
    for cert in native.certs {
        if let Err(e) = roots.add(cert) {
            warn!("skipping platform certificate: {e}");
        }
    }

    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Transport::tls_with_config(client_config.into())
}

impl mqtt_wrapper::MqttWrapper for RumqttcWrapper {
    fn publish<S, V>(
        &mut self,
        topic: S,
        qos: mqtt_wrapper::QoS,
        retain: bool,
        payload: V,
    ) -> anyhow::Result<()>
    where
        S: Clone + Into<String>,
        V: Clone + Into<Vec<u8>>,
    {
        // queued requests would pile up in the client channel while the broker is away
        if !self.connected.load(Ordering::SeqCst) {
            bail!("not connected to {}", self.broker);
        }
        // try publishing up to three times
        if self
            .client
            .try_publish(topic.clone(), match_qos(qos), retain, payload.clone())
            .is_ok()
        {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(100));
        if self
            .client
            .try_publish(topic.clone(), match_qos(qos), retain, payload.clone())
            .is_ok()
        {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(100));
        Ok(self
            .client
            .try_publish(topic, match_qos(qos), retain, payload)?)
    }

    fn disconnect(&mut self) -> anyhow::Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        let result = self.client.disconnect();
        if let Some(handle) = self.event_loop.take() {
            if handle.join().is_err() {
                warn!("mqtt event loop panicked");
            }
        }
        Ok(result?)
    }

    fn new(config: &MqttConfig) -> Self {
        let host = config.host.clone();
        let port = config.port_or_default();
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("victron-uart-{}", Utc::now().timestamp()));

        let mut mqttoptions = MqttOptions::new(client_id, &host, port);
        mqttoptions.set_keep_alive(KEEP_ALIVE);
        mqttoptions.set_clean_session(true);
        if config.use_tls() {
            mqttoptions.set_transport(tls_transport());
        }
        if let Some((username, password)) = config.credentials() {
            mqttoptions.set_credentials(username, password);
        }
        if let Some(topic) = &config.availability_topic {
            mqttoptions.set_last_will(LastWill::new(
                topic,
                OFFLINE,
                rumqttc::QoS::AtMostOnce,
                true,
            ));
        }

        let (client, mut connection) = Client::new(mqttoptions, 512);
        let connected = Arc::new(AtomicBool::new(false));
        let stopping = Arc::new(AtomicBool::new(false));

        let availability_topic = config.availability_topic.clone();
        let loop_client = client.clone();
        let loop_connected = connected.clone();
        let loop_stopping = stopping.clone();
        let event_loop = thread::spawn(move || {
            // keep polling the event loop to make sure outgoing messages get sent.
            // rumqttc reconnects on the next poll after an error.
            for notification in connection.iter() {
                match notification {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected to {host}:{port}");
                        loop_connected.store(true, Ordering::SeqCst);
                        if let Some(topic) = &availability_topic {
                            if let Err(e) = loop_client.try_publish(
                                topic.as_str(),
                                rumqttc::QoS::AtMostOnce,
                                true,
                                ONLINE,
                            ) {
                                warn!("could not mark {topic} {ONLINE}: {e}");
                            }
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("MQTT disconnect sent");
                        loop_connected.store(false, Ordering::SeqCst);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        loop_connected.store(false, Ordering::SeqCst);
                        if loop_stopping.load(Ordering::SeqCst) {
                            break;
                        }
                        warn!(
                            "MQTT connection to {host}:{port} failed: {e}. Retry in {}s",
                            RECONNECT_DELAY.as_secs()
                        );
                        sleep_unless_stopping(&loop_stopping, RECONNECT_DELAY);
                    }
                }
            }
        });

        Self {
            client,
            broker: format!("{}:{}", config.host, port),
            connected,
            stopping,
            event_loop: Some(event_loop),
        }
    }
}
