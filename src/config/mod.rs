//! Configuration loading and management
//!
//! Settings are layered with `figment`: built-in defaults for local
//! development, then the YAML file named by `NOTIFIER_CONFIG` (if any), then
//! the individual environment variables. Later layers win key by key.
//!
//! ```yaml
//! server:
//!   port: 8081
//! kafka:
//!   brokers: ["localhost:9092"]
//!   topic: order-placed
//! identity:
//!   header: x-user-id
//!   dev_mode: false
//! ```

use crate::core::error::ConfigError;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const KAFKA_BROKERS: &str = "KAFKA_BROKERS";
pub const KAFKA_CLIENT_ID: &str = "KAFKA_CLIENT_ID";
pub const KAFKA_GROUP_ID: &str = "KAFKA_GROUP_ID";
pub const KAFKA_TOPIC: &str = "KAFKA_TOPIC";
pub const KAFKA_AUTO_OFFSET_RESET: &str = "KAFKA_AUTO_OFFSET_RESET";
pub const WS_HOST: &str = "WS_HOST";
pub const WS_PORT: &str = "WS_PORT";
pub const SHUTDOWN_GRACE_MS: &str = "SHUTDOWN_GRACE_MS";
pub const IDENTITY_HEADER: &str = "IDENTITY_HEADER";
pub const JWT_SECRET: &str = "JWT_SECRET";
pub const DEV_MODE: &str = "DEV_MODE";
pub const TRUST_IDENTITY_HEADER: &str = "TRUST_IDENTITY_HEADER";
/// Path to a YAML file layered under the individual variables
pub const CONFIG_FILE: &str = "NOTIFIER_CONFIG";

/// Environment variable, the config key it sets, and what it must hold
struct EnvKey {
    var: &'static str,
    path: &'static str,
    expected: &'static str,
}

const ENV_KEYS: &[EnvKey] = &[
    EnvKey { var: KAFKA_BROKERS, path: "kafka.brokers", expected: "a comma-separated broker list" },
    EnvKey { var: KAFKA_CLIENT_ID, path: "kafka.client_id", expected: "a string" },
    EnvKey { var: KAFKA_GROUP_ID, path: "kafka.group_id", expected: "a string" },
    EnvKey { var: KAFKA_TOPIC, path: "kafka.topic", expected: "a string" },
    EnvKey { var: KAFKA_AUTO_OFFSET_RESET, path: "kafka.auto_offset_reset", expected: "'earliest' or 'latest'" },
    EnvKey { var: WS_HOST, path: "server.host", expected: "a string" },
    EnvKey { var: WS_PORT, path: "server.port", expected: "a port number" },
    EnvKey { var: SHUTDOWN_GRACE_MS, path: "server.shutdown_grace_ms", expected: "milliseconds" },
    EnvKey { var: IDENTITY_HEADER, path: "identity.header", expected: "a valid HTTP header name" },
    EnvKey { var: TRUST_IDENTITY_HEADER, path: "identity.trust_header", expected: "a boolean" },
    EnvKey { var: JWT_SECRET, path: "identity.jwt_secret", expected: "a string" },
    EnvKey { var: DEV_MODE, path: "identity.dev_mode", expected: "a boolean" },
];

/// Listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(deserialize_with = "de::text")]
    pub host: String,
    pub port: u16,
    /// How long live sockets get to close during shutdown
    pub shutdown_grace_ms: u64,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            shutdown_grace_ms: 5_000,
        }
    }
}

/// Event stream consumer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    #[serde(deserialize_with = "de::string_list")]
    pub brokers: Vec<String>,
    #[serde(deserialize_with = "de::text")]
    pub client_id: String,
    #[serde(deserialize_with = "de::text")]
    pub group_id: String,
    #[serde(deserialize_with = "de::text")]
    pub topic: String,
    /// `latest` skips history on first join, `earliest` replays it
    #[serde(deserialize_with = "de::text")]
    pub auto_offset_reset: String,
}

impl KafkaConfig {
    /// Broker list in the comma-separated form clients expect
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            client_id: "websocket-notifier".to_string(),
            group_id: "ws-notifier-group".to_string(),
            topic: "order-placed".to_string(),
            auto_offset_reset: "latest".to_string(),
        }
    }
}

/// How connecting clients are identified
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Header set by the upstream gateway after authentication; empty disables it
    #[serde(deserialize_with = "de::text")]
    pub header: String,
    /// Whether the header is honoured. Unset means "only without a JWT secret"
    #[serde(deserialize_with = "de::optional_flag")]
    pub trust_header: Option<bool>,
    /// Enables HS256 token verification when present
    #[serde(deserialize_with = "de::optional_text")]
    pub jwt_secret: Option<String>,
    /// Accept the unauthenticated query parameter fallback
    #[serde(deserialize_with = "de::flag")]
    pub dev_mode: bool,
    #[serde(deserialize_with = "de::text")]
    pub query_param: String,
}

impl IdentityConfig {
    /// Whether the gateway header takes part in identity resolution
    ///
    /// Once tokens are verified, a client could forge the header unless the
    /// deployment states that a proxy always overwrites it.
    pub fn header_trusted(&self) -> bool {
        !self.header.trim().is_empty() && self.trust_header.unwrap_or(self.jwt_secret.is_none())
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            header: "x-user-id".to_string(),
            trust_header: None,
            jwt_secret: None,
            dev_mode: false,
            query_param: "userId".to_string(),
        }
    }
}

impl fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("header", &self.header)
            .field("trust_header", &self.trust_header)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("dev_mode", &self.dev_mode)
            .field("query_param", &self.query_param)
            .finish()
    }
}

/// Complete notifier configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub server: ServerConfig,
    pub kafka: KafkaConfig,
    pub identity: IdentityConfig,
}

impl NotifierConfig {
    /// Defaults, then the YAML file named by `NOTIFIER_CONFIG`, then the environment
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var(CONFIG_FILE)
            .ok()
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty());
        Self::layered(file.as_deref())
    }

    /// Defaults overridden by the environment, no file
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::layered(None)
    }

    /// Load configuration from a YAML file alone
    pub fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        Self::extract(Self::with_file(Self::figment(), path)?)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::extract(Self::figment().merge(Yaml::string(yaml)))
    }

    /// Built-in defaults as a figment, for callers adding their own layers
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
    }

    fn layered(file: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = Self::figment();
        if let Some(path) = file {
            figment = Self::with_file(figment, path)?;
        }
        Self::extract(figment.merge(env_provider()))
    }

    fn with_file(figment: Figment, path: &str) -> Result<Figment, ConfigError> {
        // figment skips missing files; a named one has to exist
        std::fs::metadata(path)?;
        Ok(figment.merge(Yaml::file(path)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment.extract::<Self>()?.validated()
    }

    fn validated(mut self) -> Result<Self, ConfigError> {
        self.kafka.brokers = self
            .kafka
            .brokers
            .iter()
            .map(|broker| broker.trim())
            .filter(|broker| !broker.is_empty())
            .map(str::to_string)
            .collect();
        if self.kafka.brokers.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: KAFKA_BROKERS,
                value: String::new(),
                expected: "a comma-separated broker list",
            });
        }

        if !matches!(self.kafka.auto_offset_reset.as_str(), "earliest" | "latest") {
            return Err(ConfigError::InvalidValue {
                key: KAFKA_AUTO_OFFSET_RESET,
                value: self.kafka.auto_offset_reset,
                expected: "'earliest' or 'latest'",
            });
        }

        self.identity.header = self.identity.header.trim().to_ascii_lowercase();
        Ok(self)
    }
}

/// The documented variable names, mapped onto nested config keys
fn env_provider() -> Env {
    let vars: Vec<&str> = ENV_KEYS.iter().map(|key| key.var).collect();
    Env::raw().only(&vars).map(|var| {
        ENV_KEYS
            .iter()
            .find(|key| var.as_str().eq_ignore_ascii_case(key.var))
            .map(|key| key.path.to_string())
            .unwrap_or_else(|| var.as_str().to_string())
            .into()
    })
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        let path = err.path.join(".");
        match ENV_KEYS.iter().find(|key| key.path == path) {
            Some(key) => ConfigError::InvalidValue {
                key: key.var,
                value: err.kind.to_string(),
                expected: key.expected,
            },
            None => ConfigError::Load(Box::new(err)),
        }
    }
}

/// Lenient deserializers: environment values arrive as whatever scalar they
/// look like, so `JWT_SECRET=1234` is a number and `DEV_MODE=yes` a string.
mod de {
    use serde::Deserializer;
    use serde::de::{self, SeqAccess, Visitor};
    use std::fmt;

    struct TextVisitor;

    impl<'de> Visitor<'de> for TextVisitor {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a string")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        d.deserialize_any(TextVisitor)
    }

    struct OptionalText;

    impl<'de> Visitor<'de> for OptionalText {
        type Value = Option<String>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an optional string")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            text(d).map(|s| Some(s).filter(|s| !s.is_empty()))
        }
    }

    /// Empty strings count as unset
    pub fn optional_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        d.deserialize_option(OptionalText)
    }

    struct FlagVisitor;

    impl<'de> Visitor<'de> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a boolean")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
            match v {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(E::invalid_value(de::Unexpected::Unsigned(v), &self)),
            }
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
            match v {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(E::invalid_value(de::Unexpected::Signed(v), &self)),
            }
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" | "" => Ok(false),
                _ => Err(E::invalid_value(de::Unexpected::Str(v), &self)),
            }
        }
    }

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        d.deserialize_any(FlagVisitor)
    }

    struct OptionalFlag;

    impl<'de> Visitor<'de> for OptionalFlag {
        type Value = Option<bool>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an optional boolean")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            flag(d).map(Some)
        }
    }

    pub fn optional_flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        d.deserialize_option(OptionalFlag)
    }

    struct ListVisitor;

    impl<'de> Visitor<'de> for ListVisitor {
        type Value = Vec<String>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a list or a comma-separated string")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v.split(',').map(str::to_string).collect())
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut items = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                items.push(item);
            }
            Ok(items)
        }
    }

    /// A YAML list, or `a:9092,b:9092` from the environment
    pub fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        d.deserialize_any(ListVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::io::Write;

    #[test]
    fn test_defaults_for_local_development() {
        let config = NotifierConfig::extract(NotifierConfig::figment()).unwrap();

        assert_eq!(config.kafka.bootstrap_servers(), "localhost:9092");
        assert_eq!(config.kafka.client_id, "websocket-notifier");
        assert_eq!(config.kafka.group_id, "ws-notifier-group");
        assert_eq!(config.kafka.topic, "order-placed");
        assert_eq!(config.kafka.auto_offset_reset, "latest");
        assert_eq!(config.server.bind_addr(), "0.0.0.0:8081");
        assert_eq!(config.server.shutdown_grace(), Duration::from_secs(5));
        assert_eq!(config.identity.header, "x-user-id");
        assert!(config.identity.header_trusted());
        assert!(!config.identity.dev_mode);
        assert!(config.identity.jwt_secret.is_none());
    }

    #[test]
    fn test_env_overrides() {
        Jail::expect_with(|jail| {
            jail.set_env(KAFKA_BROKERS, "kafka-1:9092, kafka-2:9092,");
            jail.set_env(KAFKA_TOPIC, "order-notification-topic");
            jail.set_env(KAFKA_AUTO_OFFSET_RESET, "earliest");
            jail.set_env(WS_PORT, "9000");
            jail.set_env(IDENTITY_HEADER, "X-Authenticated-User");
            jail.set_env(JWT_SECRET, "1234");
            jail.set_env(DEV_MODE, "yes");

            let config = NotifierConfig::from_env().unwrap();

            assert_eq!(config.kafka.brokers, vec!["kafka-1:9092", "kafka-2:9092"]);
            assert_eq!(config.kafka.bootstrap_servers(), "kafka-1:9092,kafka-2:9092");
            assert_eq!(config.kafka.topic, "order-notification-topic");
            assert_eq!(config.kafka.auto_offset_reset, "earliest");
            assert_eq!(config.server.port, 9000);
            assert_eq!(config.identity.header, "x-authenticated-user");
            assert_eq!(config.identity.jwt_secret.as_deref(), Some("1234"));
            assert!(config.identity.dev_mode);
            assert!(!config.identity.header_trusted());
            Ok(())
        });
    }

    #[test]
    fn test_trust_header_env_keeps_header_with_jwt() {
        Jail::expect_with(|jail| {
            jail.set_env(JWT_SECRET, "s3cret");
            jail.set_env(TRUST_IDENTITY_HEADER, "true");

            let config = NotifierConfig::from_env().unwrap();
            assert_eq!(config.identity.trust_header, Some(true));
            assert!(config.identity.header_trusted());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env(WS_PORT, "eighty");
            let err = NotifierConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { key: WS_PORT, .. }));
            Ok(())
        });

        Jail::expect_with(|jail| {
            jail.set_env(DEV_MODE, "maybe");
            let err = NotifierConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { key: DEV_MODE, .. }));
            Ok(())
        });

        Jail::expect_with(|jail| {
            jail.set_env(KAFKA_BROKERS, " , ");
            let err = NotifierConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { key: KAFKA_BROKERS, .. }));
            Ok(())
        });

        Jail::expect_with(|jail| {
            jail.set_env(KAFKA_AUTO_OFFSET_RESET, "smallest");
            let err = NotifierConfig::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue { key: KAFKA_AUTO_OFFSET_RESET, .. }
            ));
            Ok(())
        });
    }

    #[test]
    fn test_env_layers_over_config_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "notifier.yaml",
                "server:\n  port: 9100\nkafka:\n  topic: orders\nidentity:\n  dev_mode: true\n",
            )?;
            jail.set_env(CONFIG_FILE, "notifier.yaml");
            jail.set_env(WS_PORT, "9200");
            jail.set_env(JWT_SECRET, "s3cret");

            let config = NotifierConfig::load().unwrap();

            assert_eq!(config.server.port, 9200);
            assert_eq!(config.kafka.topic, "orders");
            assert!(config.identity.dev_mode);
            assert_eq!(config.identity.jwt_secret.as_deref(), Some("s3cret"));
            Ok(())
        });
    }

    #[test]
    fn test_yaml_values_are_validated() {
        let err = NotifierConfig::from_yaml_str("kafka:\n  auto_offset_reset: smallest\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key: KAFKA_AUTO_OFFSET_RESET, .. }
        ));
    }

    #[test]
    fn test_jwt_secret_is_redacted_in_debug() {
        let identity = IdentityConfig {
            jwt_secret: Some("super-secret".to_string()),
            ..IdentityConfig::default()
        };
        let debug = format!("{:?}", identity);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = NotifierConfig::from_yaml_str(
            "server:\n  port: 9100\nkafka:\n  topic: orders\n  brokers: [\"b1:9092\", \"b2:9092\"]\n",
        )
        .unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.kafka.topic, "orders");
        assert_eq!(config.kafka.brokers, vec!["b1:9092", "b2:9092"]);
        assert_eq!(config.kafka.group_id, "ws-notifier-group");
        assert_eq!(config.identity, IdentityConfig::default());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let mut config = NotifierConfig::default();
        config.identity.dev_mode = true;
        config.kafka.brokers = vec!["broker:29092".to_string()];

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_yaml::to_string(&config).unwrap().as_bytes())
            .unwrap();

        let loaded = NotifierConfig::from_yaml_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_yaml_file_is_io_error() {
        let err = NotifierConfig::from_yaml_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
