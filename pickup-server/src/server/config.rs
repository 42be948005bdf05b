use chrono_tz::Tz;
use pickup_shared::auth::StaffRole;
use serde::Deserialize;
use std::{env, fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub jwt_secret: String,
    #[serde(default)]
    pub listen_port: Option<u16>,
    #[serde(default)]
    pub dev_cors_origin: Option<String>,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
    #[serde(default = "default_db_pool_size")]
    pub db_pool_size: u32,
    /// IANA zone that defines "today" for the present-children view.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Staff roles allowed to record scans.
    #[serde(default = "default_scan_roles")]
    pub scan_roles: Vec<StaffRole>,
    #[serde(default)]
    pub bootstrap_admin: Option<BootstrapAdmin>,
    #[serde(default)]
    pub push: Option<PushConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapAdmin {
    pub username: String,
    pub password_hash: String, // bcrypt hash
    #[serde(default = "default_admin_name")]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub contact: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Required unless it can be taken from the service account.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Overrides the FCM send URL.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Static OAuth bearer; skips the service-account exchange.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub service_account_base64: Option<String>,
    #[serde(default = "default_push_timeout")]
    pub timeout_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            project_id: None,
            endpoint: None,
            access_token: None,
            service_account_base64: None,
            timeout_secs: default_push_timeout(),
        }
    }
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_db_pool_size() -> u32 {
    10
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_scan_roles() -> Vec<StaffRole> {
    StaffRole::ALL.to_vec()
}

fn default_admin_name() -> String {
    "Administrator".to_string()
}

fn default_true() -> bool {
    true
}

fn default_push_timeout() -> u64 {
    10
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Yaml(e) => write!(f, "YAML error: {}", e),
            ConfigError::Invalid(m) => write!(f, "invalid config: {}", m),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        ConfigError::Yaml(value)
    }
}

impl AppConfig {
    /// A config with only the signing secret set; everything else at defaults.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: secret.into(),
            listen_port: None,
            dev_cors_origin: None,
            bcrypt_cost: default_bcrypt_cost(),
            db_pool_size: default_db_pool_size(),
            timezone: default_timezone(),
            scan_roles: default_scan_roles(),
            bootstrap_admin: None,
            push: None,
        }
    }

    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_path(path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        let mut cfg: AppConfig = serde_yaml::from_str(&text)?;
        cfg.apply_overrides(|key| env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Secrets that may come from the environment instead of the file.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
            self.jwt_secret = secret;
        }
        if let Some(sa) = lookup("PUSH_SERVICE_ACCOUNT_BASE64").filter(|s| !s.is_empty()) {
            self.push
                .get_or_insert_with(PushConfig::default)
                .service_account_base64 = Some(sa);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Invalid("jwt_secret must not be empty".into()));
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::Invalid(format!(
                "bcrypt_cost must be within 4..=31, got {}",
                self.bcrypt_cost
            )));
        }
        if self.db_pool_size == 0 {
            return Err(ConfigError::Invalid("db_pool_size must be positive".into()));
        }
        self.timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::Invalid(format!("timezone {:?}: {}", self.timezone, e)))?;
        if let Some(admin) = &self.bootstrap_admin
            && (admin.username.trim().is_empty() || admin.password_hash.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "bootstrap_admin needs username and password_hash".into(),
            ));
        }
        Ok(())
    }

    /// Parsed zone; falls back to UTC for configs that skipped `validate`.
    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_gets_defaults() {
        let cfg = AppConfig::load_from_str("jwt_secret: s3cret\n").unwrap();
        assert_eq!(cfg.db_pool_size, 10);
        assert_eq!(cfg.timezone, "UTC");
        assert_eq!(cfg.scan_roles, StaffRole::ALL.to_vec());
        assert!(cfg.push.is_none());
        assert!(cfg.bootstrap_admin.is_none());
    }

    #[test]
    fn full_file_parses() {
        let yaml = r#"
jwt_secret: s3cret
listen_port: 5000
bcrypt_cost: 4
timezone: Europe/Warsaw
scan_roles: [teacher, caretaker]
bootstrap_admin:
  username: root
  password_hash: "$2b$04$abcdefghijklmnopqrstuv"
push:
  project_id: school-app
  access_token: static
  timeout_secs: 3
"#;
        let cfg = AppConfig::load_from_str(yaml).unwrap();
        assert_eq!(cfg.listen_port, Some(5000));
        assert_eq!(cfg.tz(), chrono_tz::Europe::Warsaw);
        assert_eq!(cfg.scan_roles, vec![StaffRole::Teacher, StaffRole::Caretaker]);
        let push = cfg.push.unwrap();
        assert!(push.enabled);
        assert_eq!(push.timeout_secs, 3);
        assert_eq!(cfg.bootstrap_admin.unwrap().name, "Administrator");
    }

    #[test]
    fn rejects_empty_secret_and_bad_timezone() {
        assert!(matches!(
            AppConfig::load_from_str("jwt_secret: ''\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::load_from_str("jwt_secret: x\ntimezone: Mars/Olympus\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            AppConfig::load_from_str("jwt_secret: x\nscan_roles: [janitor]\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn environment_overrides_secrets() {
        let mut cfg = AppConfig::with_secret("from-file");
        cfg.apply_overrides(|key| match key {
            "JWT_SECRET" => Some("from-env".to_string()),
            "PUSH_SERVICE_ACCOUNT_BASE64" => Some("e30=".to_string()),
            _ => None,
        });
        assert_eq!(cfg.jwt_secret, "from-env");
        let push = cfg.push.unwrap();
        assert_eq!(push.service_account_base64.as_deref(), Some("e30="));
        assert!(push.enabled);
    }

    #[test]
    fn empty_environment_values_are_ignored() {
        let mut cfg = AppConfig::with_secret("from-file");
        cfg.apply_overrides(|_| Some(String::new()));
        assert_eq!(cfg.jwt_secret, "from-file");
        assert!(cfg.push.is_none());
    }
}
