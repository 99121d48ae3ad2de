use serde_derive::Deserialize;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub tls: Option<bool>,
    /// Retained `online`/`offline` status topic, also used as last will.
    pub availability_topic: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "mqtt".to_string(),
            port: None,
            username: None,
            password: None,
            client_id: None,
            tls: None,
            availability_topic: Some("victron/status".to_string()),
        }
    }
}

impl MqttConfig {
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty()
    }

    pub fn use_tls(&self) -> bool {
        self.tls.is_some_and(|tls| tls)
    }

    pub fn port_or_default(&self) -> u16 {
        self.port
            .unwrap_or(if self.use_tls() { 8883 } else { 1883 })
    }

    /// Username and password to authenticate with. A password without a
    /// username is ignored, a username without a password sends an empty one.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.username, &self.password) {
            (None, _) => None,
            (Some(username), _) if username.is_empty() => None,
            (Some(username), None) => Some((username.clone(), "".into())),
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
        }
    }
}
