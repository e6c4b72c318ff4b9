use std::str::FromStr;

use telemetry_api::TelemetryError;

pub const DEFAULT_PORT: u16 = 1883;

/// Адрес брокера из строки вида `tcp://host[:port]` или `mqtt://host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddr {
    pub host: String,
    pub port: u16,
}

impl BrokerAddr {
    /// `host:port` для `TcpStream::connect` (IPv6 в квадратных скобках).
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl std::fmt::Display for BrokerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tcp://{}", self.socket_addr())
    }
}

impl FromStr for BrokerAddr {
    type Err = TelemetryError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let url = url.trim();
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| TelemetryError::Config(format!("broker url '{url}': missing scheme (tcp://)")))?;

        match scheme.to_ascii_lowercase().as_str() {
            "tcp" | "mqtt" => {}
            "ssl" | "tls" | "mqtts" | "ws" | "wss" => {
                return Err(TelemetryError::Config(format!(
                    "broker url '{url}': scheme '{scheme}' is not supported (use tcp:// or mqtt://)"
                )));
            }
            other => {
                return Err(TelemetryError::Config(format!("broker url '{url}': unknown scheme '{other}'")));
            }
        }

        let authority = rest.trim_end_matches('/');
        if authority.contains('/') || authority.contains('@') {
            return Err(TelemetryError::Config(format!(
                "broker url '{url}': paths and credentials are not supported"
            )));
        }

        let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
            let (host, tail) = v6
                .split_once(']')
                .ok_or_else(|| TelemetryError::Config(format!("broker url '{url}': unterminated '['")))?;
            let port = match tail {
                "" => None,
                t => Some(t.strip_prefix(':').ok_or_else(|| {
                    TelemetryError::Config(format!("broker url '{url}': garbage after ']'"))
                })?),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(TelemetryError::Config(format!("broker url '{url}': empty host")));
        }

        let port = match port {
            Some(p) => p
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| TelemetryError::Config(format!("broker url '{url}': bad port '{p}'")))?,
            None => DEFAULT_PORT,
        };

        Ok(Self { host: host.to_string(), port })
    }
}
