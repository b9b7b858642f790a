//! Pure checks on chain names, RPC URLs and ports.
//!
//! Nothing here fails loudly: each check reports errors and warnings and the
//! caller decides whether to escalate.

use url::Url;

const MAX_CHAIN_NAME_LEN: usize = 50;
const MIN_PORT: u32 = 1024;
const MAX_PORT: u32 = 65535;
const LOW_PORT_WARNING_THRESHOLD: u32 = 8000;
const RPC_SCHEMES: &[&str] = &["http", "https", "ws", "wss"];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// All errors joined for inclusion in a single error message.
    pub fn error_summary(&self) -> String {
        self.errors.join(", ")
    }
}

pub fn validate_chain_name(name: &str) -> ValidationResult {
    let mut result = ValidationResult::default();

    if name.trim().is_empty() {
        result.errors.push("Chain name cannot be empty".to_string());
    }
    let allowed_charset = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !allowed_charset {
        result.errors.push(
            "Chain name can only contain letters, numbers, underscores, and hyphens".to_string(),
        );
    }
    if name.chars().count() > MAX_CHAIN_NAME_LEN {
        result
            .warnings
            .push("Chain name is quite long, consider using a shorter name".to_string());
    }

    result
}

pub fn validate_rpc_url(url: &str) -> ValidationResult {
    let mut result = ValidationResult::default();

    if url.trim().is_empty() {
        result.errors.push("RPC URL cannot be empty".to_string());
    }
    match Url::parse(url) {
        Ok(parsed) if !RPC_SCHEMES.contains(&parsed.scheme()) => {
            result
                .errors
                .push("RPC URL must use http, https, ws, or wss protocol".to_string());
        }
        Ok(_) => {}
        Err(_) => result.errors.push("Invalid RPC URL format".to_string()),
    }

    result
}

/// Takes a `u32` so that counters running past the `u16` range are reported, not wrapped.
pub fn validate_port(port: u32) -> ValidationResult {
    let mut result = ValidationResult::default();

    if !(MIN_PORT..=MAX_PORT).contains(&port) {
        result
            .errors
            .push(format!("Port must be between {MIN_PORT} and {MAX_PORT}"));
    }
    if port < LOW_PORT_WARNING_THRESHOLD {
        result
            .warnings
            .push("Using a port below 8000 might conflict with system services".to_string());
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_name_accepts_letters_digits_underscore_hyphen() {
        let result = validate_chain_name("arbitrum_one-2");
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn chain_name_rejects_empty_and_whitespace() {
        let empty = validate_chain_name("");
        assert!(!empty.is_valid());
        assert!(empty.error_summary().contains("Chain name cannot be empty"));

        let blank = validate_chain_name("   ");
        assert!(!blank.is_valid());
        assert!(blank.error_summary().contains("Chain name cannot be empty"));
    }

    #[test]
    fn chain_name_rejects_special_characters() {
        for name in ["test@chain", "bad name!", "a.b", "eth/main"] {
            let result = validate_chain_name(name);
            assert!(!result.is_valid(), "{name} should be rejected");
            assert!(result
                .error_summary()
                .contains("can only contain letters, numbers, underscores, and hyphens"));
        }
    }

    #[test]
    fn long_chain_name_is_valid_with_warning() {
        let result = validate_chain_name(&"a".repeat(60));
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn rpc_url_scheme_must_be_supported() {
        let ftp = validate_rpc_url("ftp://x.com");
        assert!(!ftp.is_valid());
        assert_eq!(
            ftp.errors,
            vec!["RPC URL must use http, https, ws, or wss protocol"]
        );

        for url in ["https://x.com", "http://127.0.0.1:8545", "ws://x.com", "wss://x.com/v3/key"] {
            assert!(validate_rpc_url(url).is_valid(), "{url} should be accepted");
        }
    }

    #[test]
    fn rpc_url_must_parse() {
        let result = validate_rpc_url("not-a-url");
        assert!(!result.is_valid());
        assert_eq!(result.errors, vec!["Invalid RPC URL format"]);
    }

    #[test]
    fn empty_rpc_url_reports_emptiness() {
        let result = validate_rpc_url("");
        assert!(!result.is_valid());
        assert!(result.errors.contains(&"RPC URL cannot be empty".to_string()));
    }

    #[test]
    fn port_boundaries() {
        let lowest = validate_port(1024);
        assert!(lowest.is_valid());
        // 1024 is below 8000, so it still carries the low-port warning.
        assert_eq!(lowest.warnings.len(), 1);

        let below = validate_port(1023);
        assert!(!below.is_valid());
        assert!(below
            .errors
            .contains(&"Port must be between 1024 and 65535".to_string()));

        let low = validate_port(7000);
        assert!(low.is_valid());
        assert!(low.warnings[0].contains("below 8000"));

        let highest = validate_port(65535);
        assert!(highest.is_valid());
        assert!(highest.warnings.is_empty());

        let above = validate_port(65536);
        assert!(!above.is_valid());
        assert!(above
            .errors
            .contains(&"Port must be between 1024 and 65535".to_string()));
    }

    #[test]
    fn default_fork_ports_are_clean() {
        let result = validate_port(8546);
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }
}
