//! Relay server configuration

use std::time::Duration;

/// One gibibyte
const GIB: u64 = 1024 * 1024 * 1024;

/// Relay server configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen port
    pub port: u16,
    /// Maximum concurrent rooms
    pub max_rooms: usize,
    /// Per-room relayed-byte cap; the room closes gracefully on overflow
    pub max_bytes_per_room: u64,
    /// Room time-to-live; rooms die at TTL no matter what
    pub ttl: Duration,
    /// Room creations allowed per IP per minute
    pub creates_per_minute: u32,
    /// Join attempts allowed per IP per minute
    pub joins_per_minute: u32,
    /// Failed joins before a room locks out
    pub lockout_threshold: u32,
    /// How long a lockout lasts
    pub lockout_duration: Duration,
    /// Graceful-shutdown drain budget
    pub drain_timeout: Duration,
    /// This node's shard index (with `shards`, enables redirects)
    pub shard_index: usize,
    /// All shard addresses, index-aligned; empty disables sharding
    pub shards: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 4433,
            max_rooms: 5000,
            max_bytes_per_room: 10 * GIB,
            ttl: Duration::from_secs(24 * 60 * 60),
            creates_per_minute: 10,
            joins_per_minute: 10,
            lockout_threshold: 50,
            lockout_duration: Duration::from_secs(10 * 60),
            drain_timeout: Duration::from_secs(30),
            shard_index: 0,
            shards: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// Which shard a room hash belongs to; None when sharding is off
    pub fn shard_for(&self, code_hash: &[u8; 32]) -> Option<usize> {
        if self.shards.len() < 2 {
            return None;
        }
        Some(code_hash[0] as usize % self.shards.len())
    }
}

/// Parse a duration string with s/m/h/d suffix (plain numbers are seconds)
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    let (number, multiplier) = match input.as_bytes()[input.len() - 1] {
        b's' => (&input[..input.len() - 1], 1u64),
        b'm' => (&input[..input.len() - 1], 60),
        b'h' => (&input[..input.len() - 1], 3600),
        b'd' => (&input[..input.len() - 1], 86400),
        _ => (input, 1),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration '{}'", input))?;
    Ok(Duration::from_secs(value * multiplier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = RelayConfig::default();
        assert_eq!(config.max_bytes_per_room, 10 * GIB);
        assert_eq!(config.ttl, Duration::from_secs(86400));
        assert_eq!(config.lockout_threshold, 50);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("2d").unwrap(), Duration::from_secs(172_800));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn test_sharding_disabled_for_single_node() {
        let config = RelayConfig::default();
        assert_eq!(config.shard_for(&[0u8; 32]), None);

        let sharded = RelayConfig {
            shards: vec!["a:1".into(), "b:2".into(), "c:3".into()],
            ..Default::default()
        };
        assert_eq!(sharded.shard_for(&[7u8; 32]), Some(7 % 3));
    }
}
