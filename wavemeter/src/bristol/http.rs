//! HTTP transport to the wavemeter firmware.

use std::time::Duration;

use tracing::trace;

use super::{WavemeterError, WavemeterResult, WavemeterTransport};

/// Static IP of the wavemeter on the bench network.
pub const DEFAULT_ADDRESS: &str = "192.168.0.109";

/// Per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Blocking HTTP transport built on `ureq`.
pub struct HttpTransport {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `address`.
    ///
    /// `address` may be a bare host (`192.168.0.109`), `host:port`, or a full
    /// base URL (`http://wavemeter.local`).
    pub fn new(address: &str) -> Self {
        Self::with_timeout(address, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(address: &str, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            base_url: base_url(address),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl WavemeterTransport for HttpTransport {
    fn fetch(&mut self, path: &str) -> WavemeterResult<String> {
        let url = format!("{}{}", self.base_url, path);
        trace!("GET {url}");
        let response = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| WavemeterError::Transport(format!("GET {url} failed: {e}")))?;
        response
            .into_body()
            .read_to_string()
            .map_err(|e| WavemeterError::Transport(format!("Reading {url} failed: {e}")))
    }
}

fn base_url(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_forms() {
        assert_eq!(base_url("192.168.0.109"), "http://192.168.0.109");
        assert_eq!(base_url("wm.local:8080/"), "http://wm.local:8080");
        assert_eq!(base_url("http://127.0.0.1:4000"), "http://127.0.0.1:4000");
        assert_eq!(base_url(" https://wm/ "), "https://wm");
    }

    #[test]
    fn test_unreachable_host_is_transport_error() {
        // Port 9 (discard) on localhost is closed on CI machines.
        let mut transport =
            HttpTransport::with_timeout("127.0.0.1:9", Duration::from_millis(500));
        assert!(matches!(
            transport.fetch(super::super::WAVELENGTH_PATH),
            Err(WavemeterError::Transport(_))
        ));
    }
}
