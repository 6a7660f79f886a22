//! Readiness probes for a starting server.

use std::time::Duration;

use reqwest::Client;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// How to tell that a server accepts requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessProbe {
    /// A TCP connection to the port succeeds.
    Tcp { port: u16 },
    /// An HTTP GET on the URL answers with a success status.
    Http { url: String },
}

impl ReadinessProbe {
    pub fn tcp(port: u16) -> Self {
        Self::Tcp { port }
    }

    pub fn http_root(port: u16) -> Self {
        Self::Http {
            url: format!("http://127.0.0.1:{port}/"),
        }
    }

    /// Run the probe once.
    pub async fn check(&self, client: &Client) -> bool {
        match self {
            Self::Tcp { port } => matches!(
                tokio::time::timeout(
                    CONNECT_TIMEOUT,
                    tokio::net::TcpStream::connect(("127.0.0.1", *port)),
                )
                .await,
                Ok(Ok(_))
            ),
            Self::Http { url } => match client.get(url).timeout(CONNECT_TIMEOUT).send().await {
                Ok(resp) => resp.status().is_success(),
                Err(_) => false,
            },
        }
    }
}
