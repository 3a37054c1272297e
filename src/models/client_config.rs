use crate::error::{PocketLinkError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// URL scheme used to reach the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the backend lives and how requests are decorated.
///
/// ```rust
/// use pocket_link::{ClientConfig, Protocol};
///
/// let config = ClientConfig::from_url("https://pb.example.com:8443").unwrap();
/// assert_eq!(config.protocol, Protocol::Https);
/// assert_eq!(config.host, "pb.example.com");
/// assert_eq!(config.port, Some(8443));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub protocol: Protocol,

    pub host: String,

    #[serde(default)]
    pub port: Option<u16>,

    /// Value of the `Accept-Language` header sent with every request.
    /// Default: `en-US`
    #[serde(default = "default_lang")]
    pub lang: String,
}

fn default_lang() -> String {
    "en-US".to_string()
}

impl ClientConfig {
    /// Plain HTTP config for `host` on the default port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            protocol: Protocol::Http,
            host: host.into(),
            port: None,
            lang: default_lang(),
        }
    }

    /// Parse a base URL such as `http://127.0.0.1:8090`.
    ///
    /// A missing scheme means `http`. Any path component is ignored: every
    /// request path is absolute from the host root.
    pub fn from_url(url: &str) -> Result<Self> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(PocketLinkError::ConfigurationError(
                "base_url must not be empty".to_string(),
            ));
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };
        let parsed = url::Url::parse(&with_scheme)?;

        let protocol = match parsed.scheme() {
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            other => {
                return Err(PocketLinkError::ConfigurationError(format!(
                    "Unsupported scheme '{}': expected http or https",
                    other
                )))
            },
        };

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                PocketLinkError::ConfigurationError(format!("No host in base_url '{}'", url))
            })?
            .to_string();

        if parsed.path() != "/" && !parsed.path().is_empty() {
            log::warn!(
                "[pocket-link] Ignoring path '{}' in base_url; requests are rooted at the host",
                parsed.path()
            );
        }

        Ok(Self {
            protocol,
            host,
            port: parsed.port(),
            lang: default_lang(),
        })
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    /// `scheme://host[:port]` without a trailing slash.
    pub fn origin(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.protocol, self.host, port),
            None => format!("{}://{}", self.protocol, self.host),
        }
    }
}
