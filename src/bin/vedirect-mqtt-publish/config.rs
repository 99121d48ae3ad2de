use std::{env, fs, path::PathBuf, str::FromStr};

use anyhow::{bail, Context};
use log::{info, warn};
use serde_derive::Deserialize;
use vedirect2mqtt::{
    frame_assembler::FrameConfig, mqtt_config::MqttConfig, simple_mqtt::PublishConfig,
    vedirect::SerialConfig,
};

static CONFIG_FILE: &str = "config.toml";

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub mqtt: MqttConfig,
    pub publish: PublishConfig,
    pub frame: FrameConfig,
}

impl Config {
    pub fn is_valid(&self) -> bool {
        !self.serial.port.is_empty() && self.mqtt.is_valid()
    }

    /// Read `config.toml` if present, then apply environment overrides.
    pub fn load() -> anyhow::Result<Config> {
        let mut config = match config_path() {
            Some(path) => {
                info!("loading configuration from {}", path.display());
                let contents = fs::read_to_string(&path)
                    .with_context(|| format!("could not read {}", path.display()))?;
                toml::from_str::<Config>(&contents)
                    .with_context(|| format!("{} unparsable", path.display()))?
            }
            None => {
                info!("no {CONFIG_FILE} found, using defaults and environment");
                Config::default()
            }
        };

        config.apply_env(|name| env::var(name).ok());

        if !config.is_valid() {
            bail!("configuration needs a serial port and an MQTT host");
        }
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = var("SERIAL_PORT") {
            self.serial.port = port;
        }
        override_parsed(&var, "BAUDRATE", &mut self.serial.baud_rate);

        if let Some(host) = var("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = var("MQTT_PORT") {
            match port.parse() {
                Ok(port) => self.mqtt.port = Some(port),
                Err(e) => warn!("ignoring MQTT_PORT={port}: {e}"),
            }
        }
        // an empty user disables authentication
        if let Some(username) = var("MQTT_USER") {
            self.mqtt.username = Some(username).filter(|u| !u.is_empty());
        }
        if let Some(password) = var("MQTT_PASS") {
            self.mqtt.password = Some(password);
        }
        if let Some(client_id) = var("MQTT_CLIENT_ID") {
            self.mqtt.client_id = Some(client_id).filter(|c| !c.is_empty());
        }
        if let Some(tls) = var("MQTT_TLS") {
            self.mqtt.tls = Some(is_truthy(&tls));
        }
        if let Some(topic) = var("AVAIL_TOPIC") {
            self.mqtt.availability_topic = Some(topic).filter(|t| !t.is_empty());
        }

        if let Some(prefix) = var("TOPIC_PREFIX") {
            self.publish.topic_prefix = prefix;
        }
        if let Some(retain) = var("RETAIN") {
            self.publish.retain = is_truthy(&retain);
        }

        override_parsed(&var, "FRAME_IDLE_TIMEOUT_S", &mut self.frame.idle_timeout_s);
        override_parsed(&var, "FRAME_MAX_LINES", &mut self.frame.max_lines);
    }
}

// load configuration from current working dir, or relative to executable if former location fails
fn config_path() -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(mut path) = env::current_dir() {
        path.push(CONFIG_FILE);
        candidates.push(path);
    }
    if let Ok(mut path) = env::current_exe() {
        path.pop();
        path.push(CONFIG_FILE);
        candidates.push(path);
    }
    candidates.into_iter().find(|path| path.exists())
}

fn override_parsed<F, T>(var: &F, name: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = var(name) {
        match value.trim().parse() {
            Ok(parsed) => *target = parsed,
            Err(e) => warn!("ignoring {name}={value}: {e}"),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes")
}
