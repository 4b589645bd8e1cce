//! Run configuration.
//!
//! `RelayConfig` is resolved once at process start and handed to the pipeline;
//! nothing in the engine reads the environment on its own.

use thiserror::Error;

use crate::checksums::ChecksumAlgorithm;
use crate::model::SourceLocation;

pub const DEFAULT_SOURCE_CONTAINER: &str = "outbound";
pub const DEFAULT_ARCHIVE_CONTAINER: &str = "archive";
pub const DEFAULT_PREFIXES: &[&str] = &["marketing/", "engineering/", "finance/", "shipping/"];
pub const DEFAULT_BASE_PATH: &str = "upload";
pub const DEFAULT_SUBJECT: &str = "File Transfer to GCS: {succeeded} succeeded, {failed} failed";

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required setting {0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("mail settings are incomplete; missing {0}")]
    IncompleteMail(String),
}

/// How to reach the Azure storage account.
#[derive(Clone, PartialEq, Eq)]
pub enum AzureConnection {
    /// Local Azurite emulator (`UseDevelopmentStorage=true`)
    Emulator,
    /// Shared-key access
    AccountKey { account: String, key: String },
}

impl std::fmt::Debug for AzureConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AzureConnection::Emulator => write!(f, "Emulator"),
            AzureConnection::AccountKey { account, .. } => f
                .debug_struct("AccountKey")
                .field("account", account)
                .field("key", &"<redacted>")
                .finish(),
        }
    }
}

impl AzureConnection {
    /// Parse an Azure storage connection string
    /// (`DefaultEndpointsProtocol=https;AccountName=..;AccountKey=..;...`).
    pub fn parse(connection_string: &str) -> Result<Self, ConfigError> {
        let mut account = None;
        let mut key = None;

        for pair in connection_string.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((name, value)) = pair.split_once('=') else {
                return Err(ConfigError::Invalid {
                    key: "AzureWebJobsStorage",
                    reason: format!("malformed segment '{}'", pair),
                });
            };
            match name {
                "UseDevelopmentStorage" if value.eq_ignore_ascii_case("true") => {
                    return Ok(AzureConnection::Emulator);
                }
                "AccountName" => account = Some(value.to_string()),
                // Keys are base64 and may end in '='; split_once keeps them intact.
                "AccountKey" => key = Some(value.to_string()),
                _ => {}
            }
        }

        match (account, key) {
            (Some(account), Some(key)) => Ok(AzureConnection::AccountKey { account, key }),
            (None, _) => Err(ConfigError::Invalid {
                key: "AzureWebJobsStorage",
                reason: "AccountName is missing".to_string(),
            }),
            (_, None) => Err(ConfigError::Invalid {
                key: "AzureWebJobsStorage",
                reason: "AccountKey is missing".to_string(),
            }),
        }
    }
}

/// Source container, archive container and monitored prefixes.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub connection: AzureConnection,
    pub container: String,
    pub archive_container: String,
    /// Processed in this order
    pub prefixes: Vec<String>,
}

impl SourceConfig {
    pub fn locations(&self) -> Vec<SourceLocation> {
        self.prefixes
            .iter()
            .map(|prefix| SourceLocation::new(self.container.clone(), prefix.clone()))
            .collect()
    }
}

/// Destination bucket settings.
#[derive(Clone)]
pub struct DestinationConfig {
    pub bucket: String,
    /// Inline service-account JSON
    pub service_account_key: String,
    pub base_path: String,
}

impl std::fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("bucket", &self.bucket)
            .field("service_account_key", &"<redacted>")
            .field("base_path", &self.base_path)
            .finish()
    }
}

/// Microsoft Graph mail settings.
#[derive(Clone)]
pub struct MailConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub from: String,
    pub to: String,
    pub subject_template: String,
}

impl std::fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("subject_template", &self.subject_template)
            .finish()
    }
}

/// Everything a run needs, resolved up front.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    /// None disables the report email
    pub mail: Option<MailConfig>,
    /// Verify-after-upload algorithm; None disables verification
    pub verify: Option<ChecksumAlgorithm>,
}

impl RelayConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let connection = AzureConnection::parse(&require("AzureWebJobsStorage")?)?;
        let prefixes = match get("SOURCE_PREFIXES") {
            Some(raw) => parse_prefixes(&raw)?,
            None => DEFAULT_PREFIXES.iter().map(|p| p.to_string()).collect(),
        };

        let source = SourceConfig {
            connection,
            container: get("SOURCE_CONTAINER").unwrap_or_else(|| DEFAULT_SOURCE_CONTAINER.to_string()),
            archive_container: get("ARCHIVE_CONTAINER")
                .unwrap_or_else(|| DEFAULT_ARCHIVE_CONTAINER.to_string()),
            prefixes,
        };
        if source.container == source.archive_container {
            return Err(ConfigError::Invalid {
                key: "ARCHIVE_CONTAINER",
                reason: "archive container must differ from the source container".to_string(),
            });
        }

        let service_account_key = require("GOOGLE_APPLICATION_CREDENTIALS")?;
        if serde_json::from_str::<serde_json::Value>(&service_account_key).is_err() {
            return Err(ConfigError::Invalid {
                key: "GOOGLE_APPLICATION_CREDENTIALS",
                reason: "expected inline service-account JSON".to_string(),
            });
        }
        let destination = DestinationConfig {
            bucket: require("GCS_BUCKET_NAME")?,
            service_account_key,
            base_path: get("GCS_BASE_PATH").unwrap_or_else(|| DEFAULT_BASE_PATH.to_string()),
        };

        let mail = load_mail(&get)?;

        let verify = match get("VERIFY_CHECKSUM") {
            None => None,
            Some(raw) => Some(ChecksumAlgorithm::from_str(&raw).ok_or_else(|| {
                ConfigError::Invalid {
                    key: "VERIFY_CHECKSUM",
                    reason: format!("unknown algorithm '{}'; use md5, sha256 or blake3", raw),
                }
            })?),
        };

        Ok(RelayConfig {
            source,
            destination,
            mail,
            verify,
        })
    }
}

fn parse_prefixes(raw: &str) -> Result<Vec<String>, ConfigError> {
    let prefixes: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            if p.ends_with('/') {
                p.to_string()
            } else {
                format!("{}/", p)
            }
        })
        .collect();

    if prefixes.is_empty() {
        return Err(ConfigError::Invalid {
            key: "SOURCE_PREFIXES",
            reason: "at least one prefix is required".to_string(),
        });
    }
    if let Some(bad) = prefixes.iter().find(|p| p.trim_matches('/').is_empty()) {
        return Err(ConfigError::Invalid {
            key: "SOURCE_PREFIXES",
            reason: format!("prefix '{}' has no name", bad),
        });
    }
    Ok(prefixes)
}

/// Mail is all-or-nothing: none set disables it, a partial set is an error.
fn load_mail(get: &dyn Fn(&str) -> Option<String>) -> Result<Option<MailConfig>, ConfigError> {
    const KEYS: [&str; 5] = ["GRAPH_TENANT_ID", "GRAPH_CLIENT_ID", "GRAPH_CLIENT_SECRET", "MAIL_FROM", "MAIL_TO"];

    let values: Vec<Option<String>> = KEYS.iter().map(|k| get(k)).collect();
    if values.iter().all(Option::is_none) {
        return Ok(None);
    }

    let missing: Vec<&str> = KEYS
        .iter()
        .zip(&values)
        .filter(|(_, v)| v.is_none())
        .map(|(k, _)| *k)
        .collect();
    if !missing.is_empty() {
        return Err(ConfigError::IncompleteMail(missing.join(", ")));
    }

    let mut values = values.into_iter().flatten();
    let mut next = || values.next().unwrap_or_default();
    Ok(Some(MailConfig {
        tenant_id: next(),
        client_id: next(),
        client_secret: next(),
        from: next(),
        to: next(),
        subject_template: get("MAIL_SUBJECT").unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
    }))
}
