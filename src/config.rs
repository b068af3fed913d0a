//! Command-line configuration for the webhook server
//!
//! Flags fall back to `CARRIER_WEBHOOK_*` environment variables so the same
//! binary can be configured from a Deployment manifest or a shell.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;

use clap::Parser;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::{Error, Result, DEFAULT_SDK_GRPC_PORT, DEFAULT_SDK_HTTP_PORT, DEFAULT_WEBHOOK_PORT};

/// Options for `carrier-webhook`
#[derive(Parser, Debug, Clone)]
#[command(name = "carrier-webhook", version, about, long_about = None)]
pub struct ServerOptions {
    /// IPv4 address to listen on
    #[arg(long, env = "CARRIER_WEBHOOK_ADDRESS", default_value = "0.0.0.0")]
    pub address: Ipv4Addr,

    /// Port to listen on
    #[arg(long, env = "CARRIER_WEBHOOK_PORT", default_value_t = DEFAULT_WEBHOOK_PORT)]
    pub port: u16,

    /// PEM certificate for HTTPS; plain HTTP is served when neither cert nor key is set
    #[arg(long, env = "CARRIER_WEBHOOK_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key matching `--tls-cert`
    #[arg(long, env = "CARRIER_WEBHOOK_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Image of the injected SDK sidecar
    #[arg(long, env = "CARRIER_WEBHOOK_SIDECAR_IMAGE")]
    pub sidecar_image: String,

    /// CPU request and limit of the sidecar ("0" disables resources)
    #[arg(long, env = "CARRIER_WEBHOOK_SIDECAR_CPU", default_value = "100m")]
    pub sidecar_cpu: String,

    /// Memory request and limit of the sidecar ("0" disables resources)
    #[arg(long, env = "CARRIER_WEBHOOK_SIDECAR_MEMORY", default_value = "100M")]
    pub sidecar_memory: String,

    /// Default SDK HTTP port
    #[arg(
        long,
        env = "CARRIER_WEBHOOK_HTTP_PORT",
        default_value_t = DEFAULT_SDK_HTTP_PORT,
        value_parser = clap::value_parser!(i32).range(1..=65535)
    )]
    pub http_port: i32,

    /// Default SDK gRPC port
    #[arg(
        long,
        env = "CARRIER_WEBHOOK_GRPC_PORT",
        default_value_t = DEFAULT_SDK_GRPC_PORT,
        value_parser = clap::value_parser!(i32).range(1..=65535)
    )]
    pub grpc_port: i32,

    /// Emit logs as JSON
    #[arg(long, env = "CARRIER_WEBHOOK_LOG_JSON")]
    pub log_json: bool,
}

/// Certificate and key paths for HTTPS serving
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    /// PEM certificate chain
    pub cert: PathBuf,
    /// PEM private key
    pub key: PathBuf,
}

impl ServerOptions {
    /// Socket address the server binds to
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.port))
    }

    /// TLS paths when both cert and key are configured
    ///
    /// Exactly one of the two is a configuration error.
    pub fn tls(&self) -> Result<Option<TlsPaths>> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Ok(Some(TlsPaths {
                cert: cert.clone(),
                key: key.clone(),
            })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(Error::config("--tls-cert requires --tls-key")),
            (None, Some(_)) => Err(Error::config("--tls-key requires --tls-cert")),
        }
    }

    /// Validated sidecar configuration
    pub fn sidecar_config(&self) -> Result<SidecarConfig> {
        let image = self.sidecar_image.trim();
        if image.is_empty() {
            return Err(Error::config("--sidecar-image must not be empty"));
        }
        Ok(SidecarConfig {
            image: image.to_string(),
            cpu: parse_quantity(&self.sidecar_cpu, "--sidecar-cpu")?,
            memory: parse_quantity(&self.sidecar_memory, "--sidecar-memory")?,
            http_port: self.http_port,
            grpc_port: self.grpc_port,
        })
    }
}

/// Sidecar settings, fixed for the lifetime of the process
#[derive(Debug, Clone, PartialEq)]
pub struct SidecarConfig {
    /// Sidecar image reference
    pub image: String,
    /// CPU request and limit
    pub cpu: Quantity,
    /// Memory request and limit
    pub memory: Quantity,
    /// Default SDK HTTP port
    pub http_port: i32,
    /// Default SDK gRPC port
    pub grpc_port: i32,
}

impl SidecarConfig {
    /// Returns true when the sidecar should carry resource requirements
    pub fn has_resources(&self) -> bool {
        !quantity_is_zero(&self.cpu) || !quantity_is_zero(&self.memory)
    }
}

// =============================================================================
// Quantities
// =============================================================================

const BINARY_SUFFIXES: [(&str, u32); 6] =
    [("Ki", 10), ("Mi", 20), ("Gi", 30), ("Ti", 40), ("Pi", 50), ("Ei", 60)];
const DECIMAL_SUFFIXES: [(&str, i32); 10] = [
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
    ("", 0),
];

/// Multiplier carried by a quantity suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scale {
    /// Power of two, e.g. `Ki` is 2^10
    Binary(u32),
    /// Power of ten, from an SI suffix or an exponent
    Decimal(i32),
}

/// Split a quantity into its numeric part and scale, or None when the format is invalid
fn split_quantity(qty: &str) -> Option<(&str, Scale)> {
    let binary = BINARY_SUFFIXES
        .iter()
        .filter_map(|(suffix, bits)| Some((qty.strip_suffix(suffix)?, Scale::Binary(*bits))));
    let decimal = DECIMAL_SUFFIXES
        .iter()
        .filter_map(|(suffix, exp)| Some((qty.strip_suffix(suffix)?, Scale::Decimal(*exp))));
    binary
        .chain(decimal)
        .find(|(n, _)| is_decimal(n))
        .or_else(|| {
            // decimal exponent form, e.g. 1e3
            let (mantissa, exponent) = qty.split_once(['e', 'E'])?;
            let digits = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
            if !is_decimal(mantissa) || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            Some((mantissa, Scale::Decimal(exponent.parse().ok()?)))
        })
}

fn is_decimal(s: &str) -> bool {
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    let (int, frac) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    !(int.is_empty() && frac.is_empty())
        && int.bytes().all(|b| b.is_ascii_digit())
        && frac.bytes().all(|b| b.is_ascii_digit())
}

/// Parse a Kubernetes resource quantity such as `100m`, `1.5`, `128Mi` or `1e3`
pub fn parse_quantity(qty: &str, flag: &str) -> Result<Quantity> {
    let qty = qty.trim();
    if split_quantity(qty).is_none() {
        return Err(Error::config(format!(
            "{flag}: invalid quantity '{qty}' (expected e.g. '100m', '1', '128Mi')"
        )));
    }
    Ok(Quantity(qty.to_string()))
}

/// Returns true when the quantity is numerically zero
pub fn quantity_is_zero(qty: &Quantity) -> bool {
    split_quantity(&qty.0)
        .is_some_and(|(n, _)| n.bytes().all(|b| matches!(b, b'0' | b'.' | b'+' | b'-')))
}

/// Value of a quantity in nano-units, rounded up like the API server does
///
/// None when the quantity is malformed or does not fit.
pub fn quantity_nanos(qty: &Quantity) -> Option<i128> {
    let (number, scale) = split_quantity(qty.0.trim())?;
    let (negative, unsigned) = match number.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, number.strip_prefix('+').unwrap_or(number)),
    };
    let (int, frac) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let mut value: i128 = format!("{int}{frac}").parse().ok()?;
    let mut exponent = 9 - i32::try_from(frac.len()).ok()?;
    match scale {
        Scale::Binary(bits) => value = value.checked_mul(1i128.checked_shl(bits)?)?,
        Scale::Decimal(exp) => exponent = exponent.checked_add(exp)?,
    }
    if exponent >= 0 {
        value = value.checked_mul(10i128.checked_pow(exponent.unsigned_abs())?)?;
    } else {
        let divisor = 10i128.checked_pow(exponent.unsigned_abs()).unwrap_or(i128::MAX);
        value = value / divisor + i128::from(value % divisor != 0);
    }
    Some(if negative { -value } else { value })
}

/// Rewrite a quantity so that equal values have equal text
///
/// Malformed quantities are left untouched.
pub fn canonicalize_quantity(qty: &mut Quantity) {
    if let Some(nanos) = quantity_nanos(qty) {
        qty.0 = format!("{nanos}n");
    }
}
