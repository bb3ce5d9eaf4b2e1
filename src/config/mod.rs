use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use rand::RngCore;

/// Floor for the RSS poll interval; anything lower hammers upstream feeds.
const RSS_POLL_FLOOR_MS: u64 = 15_000;

/// Default RSS poll interval.
const RSS_POLL_DEFAULT_MS: u64 = 120_000;

#[derive(Clone, Debug)]
pub struct Config {
    /// Socket the HTTP/WebSocket listener binds to.
    pub bind_addr: SocketAddr,
    /// Root directory for local file storage and the database.
    pub data_dir: PathBuf,
    /// SQLite database file path.
    pub database_path: PathBuf,
    /// RSS poll interval in milliseconds (floored at 15 000).
    pub rss_poll_ms: u64,
    /// Admin elevation key. Randomly generated per process unless ADMIN_KEY
    /// is set; logged once at startup either way.
    pub admin_key: String,
    /// Whether the admin key came from the environment (not logged then).
    pub admin_key_from_env: bool,
    /// Address announced to WebRTC clients (public IP or hostname).
    pub announced_address: Option<String>,
    /// IP the SFU binds RTP sockets on.
    pub rtc_listen_ip: IpAddr,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
    /// Initial available outgoing bitrate hint for WebRTC transports.
    pub initial_outgoing_bitrate: u32,
    pub allowed_origins: Vec<String>,
    pub is_dev: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let bind_addr: SocketAddr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:1337".to_string())
            .parse()
            .map_err(|e| format!("Invalid BIND_ADDR: {e}"))?;

        let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()));

        let database_path = env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("bastion.db"));

        let rss_poll_ms = env::var("RSS_POLL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(RSS_POLL_DEFAULT_MS)
            .max(RSS_POLL_FLOOR_MS);

        let (admin_key, admin_key_from_env) = match env::var("ADMIN_KEY") {
            Ok(key) if !key.trim().is_empty() => (key, true),
            _ => (generate_admin_key(), false),
        };

        let rtc_min_port = env::var("RTC_MIN_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(40_000);
        let rtc_max_port = env::var("RTC_MAX_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(49_999);
        if rtc_min_port > rtc_max_port {
            return Err(format!(
                "RTC_MIN_PORT ({rtc_min_port}) must not exceed RTC_MAX_PORT ({rtc_max_port})"
            ));
        }

        let rtc_listen_ip = env::var("RTC_LISTEN_IP")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        let announced_address = env::var("ANNOUNCED_ADDRESS")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let initial_outgoing_bitrate = env::var("INITIAL_OUTGOING_BITRATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(600_000);

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let is_dev = env::var("APP_ENV").as_deref() != Ok("production");

        Ok(Config {
            bind_addr,
            data_dir,
            database_path,
            rss_poll_ms,
            admin_key,
            admin_key_from_env,
            announced_address,
            rtc_listen_ip,
            rtc_min_port,
            rtc_max_port,
            initial_outgoing_bitrate,
            allowed_origins,
            is_dev,
        })
    }
}

/// 32 random bytes, hex-encoded. Fresh per process so a leaked key does not
/// outlive a restart.
fn generate_admin_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_key_is_64_hex_chars() {
        let key = generate_admin_key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn admin_keys_are_unique_per_call() {
        assert_ne!(generate_admin_key(), generate_admin_key());
    }
}
