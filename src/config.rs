//! Configuration for the weather API server.
//!
//! All settings come from CLI flags or environment variables, with defaults
//! chosen so the server runs out of the box against the public x402
//! facilitator on Base Sepolia. `EVM_ADDRESS` is the one setting that must be
//! supplied for payments to actually land anywhere: without it the server
//! still starts, but charges to the zero address.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use clap::Parser;
use http::header::{AUTHORIZATION, HeaderMap, HeaderValue, InvalidHeaderValue};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use url::Url;

use crate::util::money_amount::{MoneyAmount, MoneyAmountParseError};

/// CLI arguments for the weather API server.
#[derive(Parser, Debug)]
#[command(name = "x402-weather-api")]
#[command(about = "Weather data HTTP server monetized with x402 micropayments")]
struct CliArgs {
    /// EVM address that receives payments
    #[arg(long, env = "EVM_ADDRESS")]
    evm_address: Option<String>,
    /// x402 v1 network name to charge on
    #[arg(long, env = "NETWORK", default_value = "base-sepolia")]
    network: String,
    /// Base URL of the remote x402 facilitator
    #[arg(
        long,
        env = "FACILITATOR_URL",
        default_value = "https://x402.org/facilitator"
    )]
    facilitator_url: String,
    /// CDP API key id; together with the secret, selects the
    /// Coinbase-managed facilitator instead of FACILITATOR_URL
    #[arg(long, env = "CDP_API_KEY_ID")]
    cdp_api_key_id: Option<String>,
    /// CDP API key secret
    #[arg(long, env = "CDP_API_KEY_SECRET")]
    cdp_api_key_secret: Option<String>,
    /// Price per paid request, human-readable (e.g. "$0.001")
    #[arg(long, env = "PRICE", default_value = "$0.001")]
    price: String,
    /// Network interface to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,
    /// TCP port to bind
    #[arg(long, env = "PORT", default_value_t = 4022)]
    port: u16,
    /// Public base URL advertised in payment requirements.
    /// Defaults to http://{host}:{port}/
    #[arg(long, env = "BASE_URL")]
    base_url: Option<Url>,
}

/// Errors produced while validating the server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid EVM_ADDRESS: {0}")]
    InvalidPayToAddress(String),
    #[error("Invalid BASE_URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
    #[error("Invalid PRICE: {0}")]
    InvalidPrice(#[from] MoneyAmountParseError),
    #[error("Invalid CDP credentials: {0}")]
    InvalidCdpCredentials(#[from] InvalidHeaderValue),
}

/// Base URL of the Coinbase-managed facilitator selected by a CDP key pair.
pub const CDP_FACILITATOR_URL: &str = "https://api.cdp.coinbase.com/platform/v2/x402";

/// A CDP API key pair authenticating requests to the Coinbase-managed
/// facilitator.
#[derive(Clone, PartialEq, Eq)]
pub struct CdpCredentials {
    id: String,
    secret: String,
}

impl CdpCredentials {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        CdpCredentials {
            id: id.into(),
            secret: secret.into(),
        }
    }

    /// Headers attached to every facilitator request made with this key pair.
    pub fn headers(&self) -> Result<HeaderMap, ConfigError> {
        let token = b64.encode(format!("{}:{}", self.id, self.secret));
        let mut value = HeaderValue::from_str(&format!("Basic {token}"))?;
        value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }
}

// The secret stays out of logs.
impl fmt::Debug for CdpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CdpCredentials")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// A validated EVM address payments are sent to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayToAddress(String);

static EVM_ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("valid regex"));

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

impl PayToAddress {
    /// The all-zeroes address used when `EVM_ADDRESS` is not configured.
    pub fn zero() -> Self {
        PayToAddress(ZERO_ADDRESS.to_string())
    }

    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_ADDRESS
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PayToAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if EVM_ADDRESS_RE.is_match(s) {
            Ok(PayToAddress(s.to_string()))
        } else {
            Err(format!("expected 0x-prefixed 20-byte hex address, got {s:?}"))
        }
    }
}

impl fmt::Display for PayToAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pay_to: PayToAddress,
    network: String,
    facilitator_url: String,
    cdp_credentials: Option<CdpCredentials>,
    price: MoneyAmount,
    host: IpAddr,
    port: u16,
    base_url: Url,
}

impl Config {
    /// Parses configuration from CLI arguments and environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Config::try_from(CliArgs::parse())
    }

    pub fn pay_to(&self) -> &PayToAddress {
        &self.pay_to
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn facilitator_url(&self) -> &str {
        &self.facilitator_url
    }

    /// CDP key pair selecting the Coinbase-managed facilitator, when both
    /// halves are configured.
    pub fn cdp_credentials(&self) -> Option<&CdpCredentials> {
        self.cdp_credentials.as_ref()
    }

    pub fn price(&self) -> &MoneyAmount {
        &self.price
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Public base URL that request paths are resolved against when building
    /// the `resource` field of payment requirements.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl TryFrom<CliArgs> for Config {
    type Error = ConfigError;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let pay_to = match args.evm_address.as_deref().filter(|s| !s.is_empty()) {
            Some(address) => address
                .parse::<PayToAddress>()
                .map_err(ConfigError::InvalidPayToAddress)?,
            None => {
                tracing::warn!(
                    "EVM_ADDRESS is not set, payment middleware will be non-functional"
                );
                PayToAddress::zero()
            }
        };
        let not_empty = |s: Option<String>| s.filter(|s| !s.is_empty());
        let cdp_credentials = match (
            not_empty(args.cdp_api_key_id),
            not_empty(args.cdp_api_key_secret),
        ) {
            (Some(id), Some(secret)) => Some(CdpCredentials { id, secret }),
            (None, None) => None,
            _ => {
                tracing::warn!(
                    "CDP_API_KEY_ID and CDP_API_KEY_SECRET must both be set, \
                     falling back to FACILITATOR_URL"
                );
                None
            }
        };
        let price = MoneyAmount::parse(&args.price)?;
        let base_url = match args.base_url {
            Some(url) => url,
            None => Url::parse(&format!(
                "http://{}/",
                SocketAddr::new(args.host, args.port)
            ))?,
        };
        Ok(Config {
            pay_to,
            network: args.network,
            facilitator_url: args.facilitator_url,
            cdp_credentials,
            price,
            host: args.host,
            port: args.port,
            base_url,
        })
    }
}
