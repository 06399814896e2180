//! # Bridge Configuration
//!
//! Configuration management for the sync bridge.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STORELINK_CLIENT_CODE=123456                                       │
//! │     STORELINK_USERNAME=bridge                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/storelink/bridge.toml (Linux)                            │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [erp]
//! client_code = "123456"
//! username = "bridge"
//! password = "secret"
//!
//! [sync]
//! warehouse_id = 1
//! product_group_id = 4
//! payment_type_id = 2
//! default_vat_rate_id = 1
//! billing_address_type_id = 1
//! shipping_address_type_id = 2
//! order_document_type = "ORDER"
//! allow_unsynced_products = true
//! sync_orders_immediately = false
//! prices_include_tax = true
//!
//! [database]
//! path = "./storelink.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// ERP Connection
// =============================================================================

/// Credentials and endpoint of the remote ERP account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErpConfig {
    /// ERP account code; also selects the per-account API host.
    pub client_code: String,

    /// API user name.
    pub username: String,

    /// API password.
    pub password: String,

    /// Explicit endpoint override. When absent the endpoint is derived from
    /// the client code. Mainly for test doubles and staging hosts.
    #[serde(default)]
    pub api_url: Option<String>,
}

impl ErpConfig {
    /// The endpoint requests are posted to.
    pub fn endpoint(&self) -> String {
        match &self.api_url {
            Some(url) => url.clone(),
            None => format!("https://{}.erply.com/api/", self.client_code),
        }
    }
}

// =============================================================================
// Order Document Type
// =============================================================================

/// ERP document type completed orders are saved as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderDocumentType {
    /// A confirmed order document.
    #[default]
    #[serde(rename = "ORDER")]
    Order,

    /// An invoice-waybill document.
    #[serde(rename = "INVWAYBILL")]
    InvWaybill,
}

impl OrderDocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDocumentType::Order => "ORDER",
            OrderDocumentType::InvWaybill => "INVWAYBILL",
        }
    }
}

impl std::fmt::Display for OrderDocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderDocumentType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ORDER" => Ok(OrderDocumentType::Order),
            "INVWAYBILL" => Ok(OrderDocumentType::InvWaybill),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown order document type: '{other}'. Valid options: ORDER, INVWAYBILL"
            ))),
        }
    }
}

// =============================================================================
// Sync Options
// =============================================================================

/// Pipeline behavior settings consumed by the stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Warehouse all stock and documents are booked against.
    #[serde(default = "default_id")]
    pub warehouse_id: i64,

    /// Product group new products are created under.
    #[serde(default = "default_id")]
    pub product_group_id: i64,

    /// Payment type recorded on `savePayment`.
    #[serde(default = "default_id")]
    pub payment_type_id: i64,

    /// VAT rate applied to invoice lines.
    #[serde(default = "default_id")]
    pub default_vat_rate_id: i64,

    /// Address type id for billing addresses.
    #[serde(default = "default_id")]
    pub billing_address_type_id: i64,

    /// Address type id for shipping addresses.
    #[serde(default = "default_id")]
    pub shipping_address_type_id: i64,

    /// Document type completed orders are saved as.
    #[serde(default)]
    pub order_document_type: OrderDocumentType,

    /// When true, an order line whose product was never pushed becomes a
    /// free-text line; when false, such an order fails the run.
    #[serde(default = "default_true")]
    pub allow_unsynced_products: bool,

    /// When true, payment-completed orders are queued for immediate sync.
    #[serde(default)]
    pub sync_orders_immediately: bool,

    /// Whether storefront prices already include tax. When true, line
    /// prices are divided by (1 + VAT rate / 100) to strip the VAT the ERP
    /// adds back itself.
    #[serde(default = "default_true")]
    pub prices_include_tax: bool,
}

fn default_id() -> i64 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            warehouse_id: default_id(),
            product_group_id: default_id(),
            payment_type_id: default_id(),
            default_vat_rate_id: default_id(),
            billing_address_type_id: default_id(),
            shipping_address_type_id: default_id(),
            order_document_type: OrderDocumentType::default(),
            allow_unsynced_products: default_true(),
            sync_orders_immediately: false,
            prices_include_tax: default_true(),
        }
    }
}

// =============================================================================
// Database Location
// =============================================================================

/// Location of the bridge's SQLite database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./storelink.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: default_db_path(),
        }
    }
}

// =============================================================================
// Main Bridge Configuration
// =============================================================================

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// ERP connection settings.
    #[serde(default)]
    pub erp: ErpConfig,

    /// Pipeline behavior settings.
    #[serde(default)]
    pub sync: SyncOptions,

    /// Database location.
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl BridgeConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (bridge.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading bridge config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load bridge config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Bridge config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.erp.client_code.is_empty() {
            return Err(SyncError::InvalidConfig(
                "erp.client_code must be set".into(),
            ));
        }

        if let Some(ref url) = self.erp.api_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(SyncError::InvalidUrl(format!(
                    "ERP URL must start with http:// or https://, got: {url}"
                )));
            }
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(code) = std::env::var("STORELINK_CLIENT_CODE") {
            debug!("Overriding ERP client code from environment");
            self.erp.client_code = code;
        }

        if let Ok(username) = std::env::var("STORELINK_USERNAME") {
            self.erp.username = username;
        }

        if let Ok(password) = std::env::var("STORELINK_PASSWORD") {
            self.erp.password = password;
        }

        if let Ok(url) = std::env::var("STORELINK_API_URL") {
            debug!(url = %url, "Overriding ERP URL from environment");
            self.erp.api_url = Some(url);
        }

        if let Ok(path) = std::env::var("STORELINK_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }

        if let Ok(doc_type) = std::env::var("STORELINK_ORDER_DOCUMENT_TYPE") {
            match doc_type.parse() {
                Ok(parsed) => self.sync.order_document_type = parsed,
                Err(_) => warn!(doc_type = %doc_type, "Unknown order document type in environment"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "storelink", "bridge").map(|dirs| {
            let config_dir = dirs.config_dir();
            config_dir.join("bridge.toml")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_type_parsing() {
        assert_eq!(
            "ORDER".parse::<OrderDocumentType>().unwrap(),
            OrderDocumentType::Order
        );
        assert_eq!(
            "invwaybill".parse::<OrderDocumentType>().unwrap(),
            OrderDocumentType::InvWaybill
        );
        assert!("RECEIPT".parse::<OrderDocumentType>().is_err());
    }

    #[test]
    fn test_endpoint_derived_from_client_code() {
        let erp = ErpConfig {
            client_code: "123456".into(),
            ..Default::default()
        };
        assert_eq!(erp.endpoint(), "https://123456.erply.com/api/");

        let overridden = ErpConfig {
            api_url: Some("http://localhost:9000/api/".into()),
            ..erp
        };
        assert_eq!(overridden.endpoint(), "http://localhost:9000/api/");
    }

    #[test]
    fn test_validation() {
        let mut config = BridgeConfig::default();
        assert!(config.validate().is_err()); // client code missing

        config.erp.client_code = "123456".into();
        assert!(config.validate().is_ok());

        config.erp.api_url = Some("ftp://nope".into());
        assert!(config.validate().is_err());

        config.erp.api_url = Some("https://staging.example/api/".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = BridgeConfig {
            erp: ErpConfig {
                client_code: "42".into(),
                username: "bridge".into(),
                password: "secret".into(),
                api_url: None,
            },
            ..Default::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[erp]"));
        assert!(toml_str.contains("[sync]"));

        let parsed: BridgeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.erp.client_code, "42");
        assert!(parsed.sync.prices_include_tax);
        assert_eq!(parsed.sync.order_document_type, OrderDocumentType::Order);
    }
}
