//! Settings - Typed Configuration Snapshot
//!
//! Settings are resolved once per invocation (defaults, then an optional file,
//! then `CERTISSUE_*` environment variables) and passed by reference to every
//! component. Every field has a default.

use chrono::NaiveDate;
use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::templates::LayoutConfig;

pub const ENV_PREFIX: &str = "CERTISSUE";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid settings: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchMode {
    #[default]
    Production,
    Test,
    DryRun,
}

impl BatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchMode::Production => "production",
            BatchMode::Test => "test",
            BatchMode::DryRun => "dry-run",
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, BatchMode::DryRun)
    }
}

impl fmt::Display for BatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" => Ok(BatchMode::Production),
            "test" => Ok(BatchMode::Test),
            "dry-run" | "dryrun" | "dry_run" => Ok(BatchMode::DryRun),
            other => Err(format!("unknown batch mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub source: PathBuf,
    pub template: PathBuf,
    pub font: PathBuf,
    pub email_template: PathBuf,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            source: PathBuf::from("./data/participants.csv"),
            template: PathBuf::from("./templates/certificate.png"),
            font: PathBuf::from("./templates/font.ttf"),
            email_template: PathBuf::from("./templates/email-template.html"),
            output_dir: PathBuf::from("./output/generated-certificates"),
            log_dir: PathBuf::from("./logs"),
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub host: String,
    pub port: u16,
    /// Implicit TLS. When false the connection is upgraded with STARTTLS.
    pub secure: bool,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub from_name: String,
    pub subject: String,
    /// Recipient for every mail in test mode.
    pub operator_address: Option<String>,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            host: "smtp.gmail.com".to_string(),
            port: 587,
            secure: false,
            user: String::new(),
            password: String::new(),
            from_name: "Club Name".to_string(),
            subject: "Your Certificate of Participation".to_string(),
            operator_address: None,
        }
    }
}

impl EmailSettings {
    /// Test-mode recipient: the configured operator, else the sending account.
    pub fn operator_recipient(&self) -> Option<String> {
        self.operator_address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .or_else(|| Some(self.user.trim()).filter(|u| !u.is_empty()))
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub send_delay_ms: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 5000,
            send_delay_ms: 3000,
        }
    }
}

impl DeliverySettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mode: BatchMode,
    pub event_name: String,
    pub certificate_id_prefix: String,
    /// Fixed issue date for identifiers. Today (UTC) when unset.
    pub issue_date: Option<NaiveDate>,
    pub verification_url: String,
    pub auto_cleanup: bool,
    pub paths: PathSettings,
    pub layout: LayoutConfig,
    pub email: EmailSettings,
    pub delivery: DeliverySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: BatchMode::default(),
            event_name: "Event".to_string(),
            certificate_id_prefix: "CERT".to_string(),
            issue_date: None,
            verification_url: "https://yourclub.com/verify/".to_string(),
            auto_cleanup: false,
            paths: PathSettings::default(),
            layout: LayoutConfig::default(),
            email: EmailSettings::default(),
            delivery: DeliverySettings::default(),
        }
    }
}

impl Settings {
    /// Resolve settings from an optional file and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self, SettingsError> {
        // Defaults go in as a source so partial overrides merge key by key.
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Settings::default())?);

        if let Some(path) = file {
            if !path.is_file() {
                return Err(SettingsError::FileNotFound(path.to_path_buf()));
            }
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn with_mode(mut self, mode: BatchMode) -> Self {
        self.mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_option() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.mode, BatchMode::Production);
        assert_eq!(settings.certificate_id_prefix, "CERT");
        assert_eq!(settings.delivery.max_retries, 3);
        assert_eq!(settings.delivery.retry_delay_ms, 5000);
        assert_eq!(settings.delivery.send_delay_ms, 3000);
        assert_eq!(settings.email.port, 587);
        assert!(!settings.layout.qr.enabled);
        assert!(settings.issue_date.is_none());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("dry-run".parse::<BatchMode>().unwrap(), BatchMode::DryRun);
        assert_eq!("TEST".parse::<BatchMode>().unwrap(), BatchMode::Test);
        assert!("staging".parse::<BatchMode>().is_err());

        let settings: Settings = serde_json::from_str(r#"{"mode": "dry-run"}"#).unwrap();
        assert!(settings.mode.is_dry_run());
    }

    #[test]
    fn test_operator_recipient_fallback() {
        let mut email = EmailSettings::default();
        assert_eq!(email.operator_recipient(), None);

        email.user = "club@example.org".to_string();
        assert_eq!(email.operator_recipient().as_deref(), Some("club@example.org"));

        email.operator_address = Some("ops@example.org".to_string());
        assert_eq!(email.operator_recipient().as_deref(), Some("ops@example.org"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certissue.json");
        std::fs::write(
            &path,
            r#"{"certificate_id_prefix": "ACM", "issue_date": "2026-02-01", "delivery": {"max_retries": 5}}"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.certificate_id_prefix, "ACM");
        assert_eq!(settings.issue_date, NaiveDate::from_ymd_opt(2026, 2, 1));
        assert_eq!(settings.delivery.max_retries, 5);
        assert_eq!(settings.delivery.retry_delay_ms, 5000);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = Settings::load(Some(Path::new("/nonexistent/certissue.toml"))).unwrap_err();
        assert!(matches!(err, SettingsError::FileNotFound(_)));
    }
}
