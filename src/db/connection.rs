use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    #[default]
    Disabled,
    Preferred,
    Required,
    VerifyCa,
    VerifyIdentity,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    pub mode: TlsMode,
    pub ca_cert_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
}

impl TlsSettings {
    pub fn is_enabled(&self) -> bool {
        self.mode != TlsMode::Disabled
    }
}

/// Everything needed to open a session against one server. Two profiles with
/// the same `name` are the same logical connection target.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionProfile {
    pub name: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub host: String,
    pub port: u16,
    /// Oracle service name; ignored by backends that address databases by name.
    pub service_name: Option<String>,
    pub database: Option<String>,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub query_timeout_secs: Option<u64>,
    pub auto_reconnect: bool,
    pub tls: TlsSettings,
}

impl ConnectionProfile {
    pub fn new(name: &str, username: &str, password: &str, host: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            host: host.to_string(),
            port,
            ..Self::default()
        }
    }

    /// Easy Connect string, switching to `tcps` when TLS is requested.
    pub fn connection_string(&self) -> String {
        let service = self
            .service_name
            .as_deref()
            .or(self.database.as_deref())
            .unwrap_or_default();
        let prefix = if self.tls.is_enabled() { "tcps://" } else { "//" };
        format!("{prefix}{}:{}/{service}", self.host, self.port)
    }

    pub fn display_string(&self) -> String {
        match &self.database {
            Some(db) => format!("{} ({}@{}:{}/{})", self.name, self.username, self.host, self.port, db),
            None => format!("{} ({}@{}:{})", self.name, self.username, self.host, self.port),
        }
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_secs.map(Duration::from_secs)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    /// Overwrite the password bytes with zeros before releasing the allocation.
    pub fn clear_password(&mut self) {
        // SAFETY: zero bytes are valid UTF-8, so the string stays well formed.
        let bytes = unsafe { self.password.as_bytes_mut() };
        for b in bytes.iter_mut() {
            unsafe { std::ptr::write_volatile(b, 0) };
        }
        self.password.clear();
        self.password.shrink_to_fit();
    }

    /// Copy of the profile safe to keep around for display and bookkeeping.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.clear_password();
        copy
    }
}

impl Default for ConnectionProfile {
    fn default() -> Self {
        Self {
            name: String::new(),
            username: String::new(),
            password: String::new(),
            host: "localhost".to_string(),
            port: 3306,
            service_name: None,
            database: None,
            charset: None,
            collation: None,
            connect_timeout_secs: None,
            query_timeout_secs: None,
            auto_reconnect: false,
            tls: TlsSettings::default(),
        }
    }
}
