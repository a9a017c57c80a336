use serde::{Deserialize, Serialize};

/// A named speed test endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestServer {
    pub name: String,
    pub host: String,
    /// Port used for latency probes.
    pub port: u16,
    pub download_url: String,
    pub upload_url: String,
    pub country: Option<String>,
    pub distance_km: Option<f64>,
}

impl TestServer {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        download_url: impl Into<String>,
        upload_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: 80,
            download_url: download_url.into(),
            upload_url: upload_url.into(),
            country: None,
            distance_km: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    /// URL used for HEAD latency probes.
    pub fn probe_url(&self) -> String {
        if self.port == 80 {
            format!("http://{}", self.host)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

pub fn default_servers() -> Vec<TestServer> {
    vec![
        TestServer::new(
            "Cloudflare",
            "speed.cloudflare.com",
            "https://speed.cloudflare.com/__down?bytes=25000000",
            "https://speed.cloudflare.com/__up",
        ),
        TestServer::new(
            "Fast.com (Netflix)",
            "fast.com",
            "https://api.fast.com/netflix/speedtest",
            "https://api.fast.com/netflix/speedtest",
        )
        .with_country("US"),
        TestServer::new(
            "LibreSpeed Demo",
            "librespeed.org",
            "http://librespeed.org/garbage.php?ckSize=25",
            "http://librespeed.org/empty.php",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_url_omits_default_port() {
        let server = TestServer::new("a", "example.com", "http://d", "http://u");
        assert_eq!(server.probe_url(), "http://example.com");
        assert_eq!(server.with_port(8080).probe_url(), "http://example.com:8080");
    }

    #[test]
    fn default_catalog_is_populated() {
        let servers = default_servers();
        assert_eq!(servers.len(), 3);
        assert!(servers.iter().all(|s| s.port == 80 && !s.download_url.is_empty()));
    }
}
