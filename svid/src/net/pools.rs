use std::time::Duration;

use rand::seq::IndexedRandom;

use crate::error::SvidError;

const PACKAGED_PROXIES: &str = include_str!("../../assets/proxies.csv");
const PACKAGED_USER_AGENTS: &str = include_str!("../../assets/UserAgent.csv");

/// one entry in the proxy rotation. `Direct` rows keep plain connections
/// in the rotation so the tool still works when packaged public proxies
/// have rotted.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyEntry {
    Direct,
    Upstream { url: String },
}

impl ProxyEntry {
    pub fn apply(
        &self,
        builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, SvidError> {
        match self {
            ProxyEntry::Direct => Ok(builder.no_proxy()),
            ProxyEntry::Upstream { url } => {
                let proxy = reqwest::Proxy::all(url.as_str())
                    .map_err(|e| SvidError::InvalidInput(format!("invalid proxy '{url}': {e}")))?;
                Ok(builder.proxy(proxy))
            }
        }
    }
}

/// the proxy rotation, immutable after load. sampling is uniform and
/// safe to call from many workers at once.
#[derive(Debug, Clone)]
pub struct ProxyPool {
    entries: Vec<ProxyEntry>,
}

impl ProxyPool {
    /// loads the proxy list packaged with the crate
    /// (`assets/proxies.csv`, columns `ip,port,protocols`).
    pub fn packaged() -> Result<Self, SvidError> {
        Self::from_csv(PACKAGED_PROXIES)
    }

    pub fn from_csv(content: &str) -> Result<Self, SvidError> {
        let mut reader = csv::Reader::from_reader(content.as_bytes());
        let headers = reader
            .headers()
            .map_err(|e| SvidError::InvalidInput(format!("invalid proxy csv header: {e}")))?
            .clone();
        let column = |name: &str| headers.iter().position(|h| h == name);
        let (Some(ip_idx), Some(port_idx), Some(protocol_idx)) =
            (column("ip"), column("port"), column("protocols"))
        else {
            return Err(SvidError::InvalidInput(String::from(
                "proxy csv must have ip, port and protocols columns",
            )));
        };
        let mut entries = vec![];
        for record in reader.records() {
            let record = record
                .map_err(|e| SvidError::InvalidInput(format!("invalid proxy csv row: {e}")))?;
            let protocol = record.get(protocol_idx).unwrap_or_default().trim();
            if protocol.eq_ignore_ascii_case("direct") {
                entries.push(ProxyEntry::Direct);
                continue;
            }
            let ip = record.get(ip_idx).unwrap_or_default().trim();
            let port = record.get(port_idx).unwrap_or_default().trim();
            if ip.is_empty() || port.is_empty() || protocol.is_empty() {
                continue;
            }
            entries.push(ProxyEntry::Upstream {
                url: format!("{protocol}://{ip}:{port}"),
            });
        }
        if entries.is_empty() {
            return Err(SvidError::InvalidInput(String::from(
                "proxy pool is empty",
            )));
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sample(&self) -> &ProxyEntry {
        self.entries
            .choose(&mut rand::rng())
            .unwrap_or(&ProxyEntry::Direct)
    }
}

/// the User-Agent rotation (`assets/UserAgent.csv`, one agent per line),
/// immutable after load.
#[derive(Debug, Clone)]
pub struct UserAgentPool {
    agents: Vec<String>,
}

impl UserAgentPool {
    pub fn packaged() -> Result<Self, SvidError> {
        Self::from_lines(PACKAGED_USER_AGENTS)
    }

    pub fn from_lines(content: &str) -> Result<Self, SvidError> {
        let agents: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if agents.is_empty() {
            return Err(SvidError::InvalidInput(String::from(
                "user agent pool is empty",
            )));
        }
        Ok(Self { agents })
    }

    pub fn sample(&self) -> &str {
        self.agents
            .choose(&mut rand::rng())
            .map(String::as_str)
            .unwrap_or("svid")
    }
}

/// builds a one-shot HTTP client for a single request attempt with the
/// sampled proxy and user agent. workers never share connections.
pub fn client_for(
    proxy: &ProxyEntry,
    user_agent: &str,
    timeout: Duration,
) -> Result<reqwest::Client, SvidError> {
    let builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout);
    let builder = proxy.apply(builder)?;
    builder
        .build()
        .map_err(|e| SvidError::InternalError(format!("failure building http client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packaged_pools_load() {
        let proxies = ProxyPool::packaged().unwrap();
        assert!(!proxies.is_empty());
        // the packaged list keeps direct connections in the rotation
        assert!(proxies.entries.contains(&ProxyEntry::Direct));
        let agents = UserAgentPool::packaged().unwrap();
        assert!(!agents.sample().is_empty());
    }

    #[test]
    fn test_proxy_csv_rows_become_urls() {
        let pool =
            ProxyPool::from_csv("ip,port,protocols\n10.0.0.1,8080,http\n10.0.0.2,1080,socks5\n")
                .unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(
            pool.entries[0],
            ProxyEntry::Upstream {
                url: String::from("http://10.0.0.1:8080")
            }
        );
    }

    #[test]
    fn test_rows_missing_fields_are_skipped() {
        let pool = ProxyPool::from_csv("ip,port,protocols\n10.0.0.1,,http\n,,direct\n").unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.entries[0], ProxyEntry::Direct);
    }

    #[test]
    fn test_empty_pools_are_rejected() {
        assert!(ProxyPool::from_csv("ip,port,protocols\n").is_err());
        assert!(UserAgentPool::from_lines("\n\n").is_err());
    }

    #[test]
    fn test_client_for_direct_proxy_builds() {
        let client = client_for(&ProxyEntry::Direct, "svid-test", Duration::from_secs(5));
        assert!(client.is_ok());
    }
}
