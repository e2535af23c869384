//! The attacker: the HTTP client that executes one [`Target`] and returns
//! one [`Sample`]. It never fails: transport errors are folded into the
//! sample with `code = 0`.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use http::StatusCode;
use tracing::debug;

use crate::error::Error;
use crate::sample::Sample;
use crate::target::{Method, Target};

/// Connection options shared by every user of a run. Read-only after
/// start; each user builds its own [`Attacker`] from a copy.
#[derive(Debug, Clone)]
pub struct AttackerConfig {
    /// Per-request timeout, bounding the only non-cancellable suspension.
    pub timeout: Duration,
    /// Maximum redirects to follow; 0 disables following.
    pub redirects: usize,
    /// Reuse connections between hits.
    pub keepalive: bool,
    /// Local address to bind outgoing sockets to.
    pub local_addr: Option<IpAddr>,
    /// Extra PEM root certificate for TLS targets.
    pub root_cert_pem: Option<Vec<u8>>,
}

impl Default for AttackerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            redirects: 10,
            keepalive: true,
            local_addr: None,
            root_cert_pem: None,
        }
    }
}

pub struct Attacker {
    client: reqwest::Client,
}

impl Attacker {
    pub fn new(config: &AttackerConfig) -> Result<Self, Error> {
        let redirects = if config.redirects == 0 {
            reqwest::redirect::Policy::none()
        } else {
            reqwest::redirect::Policy::limited(config.redirects)
        };
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(redirects);
        if !config.keepalive {
            builder = builder.pool_max_idle_per_host(0);
        }
        if let Some(addr) = config.local_addr {
            builder = builder.local_address(addr);
        }
        if let Some(pem) = &config.root_cert_pem {
            let cert = reqwest::Certificate::from_pem(pem)
                .map_err(|err| Error::setup(format!("unreadable certificate: {err}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let client = builder
            .build()
            .map_err(|err| Error::setup(format!("cannot build HTTP client: {err}")))?;
        Ok(Self { client })
    }

    /// Execute one request and record the outcome.
    ///
    /// Latency runs from just before send until the response body has been
    /// consumed. A non-2xx status records the status reason as the error;
    /// transport failures record the failure text with `code = 0`.
    pub async fn hit(&self, target: &Target, timestamp: DateTime<Utc>) -> Sample {
        let mut sample = Sample {
            code: 0,
            timestamp,
            latency: Duration::ZERO,
            bytes_out: target.body.len() as u64,
            bytes_in: 0,
            error: String::new(),
            method: target.method.to_string(),
            url: target.url.clone(),
        };

        let mut request = self
            .client
            .request(to_reqwest(target.method), &target.url);
        for (name, value) in &target.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !target.body.is_empty() {
            request = request.body(target.body.clone());
        }

        let started = Instant::now();
        match request.send().await {
            Ok(response) => {
                let status = response.status();
                sample.code = status.as_u16();
                match response.bytes().await {
                    Ok(body) => sample.bytes_in = body.len() as u64,
                    Err(err) => {
                        debug!(url = %sample.url, %err, "response body read failed");
                        sample.error = err.to_string();
                    }
                }
                sample.latency = started.elapsed();
                if sample.error.is_empty() && !status.is_success() {
                    sample.error = status_line(status);
                }
            }
            Err(err) => {
                sample.latency = started.elapsed();
                sample.error = err.to_string();
            }
        }
        sample
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Options => reqwest::Method::OPTIONS,
        Method::Head => reqwest::Method::HEAD,
    }
}

fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => reason.to_string(),
        None => status.as_u16().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::testutil::serve;

    fn get(url: String) -> Target {
        Target::from_chunk(&format!("GET {url}")).unwrap()
    }

    #[tokio::test]
    async fn hit_records_status_and_bytes() {
        let addr = serve(
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;
        let attacker = Attacker::new(&AttackerConfig::default()).unwrap();

        let t0 = Utc::now();
        let sample = attacker.hit(&get(format!("http://{addr}/a")), t0).await;

        assert_eq!(sample.code, 200);
        assert_eq!(sample.bytes_in, 5);
        assert_eq!(sample.bytes_out, 0);
        assert_eq!(sample.error, "");
        assert_eq!(sample.method, "GET");
        assert_eq!(sample.timestamp, t0);
        assert!(sample.latency > Duration::ZERO);
    }

    #[tokio::test]
    async fn non_2xx_records_the_reason_phrase() {
        let addr = serve(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let attacker = Attacker::new(&AttackerConfig::default()).unwrap();

        let sample = attacker.hit(&get(format!("http://{addr}/a")), Utc::now()).await;

        assert_eq!(sample.code, 500);
        assert_eq!(sample.error, "Internal Server Error");
    }

    #[tokio::test]
    async fn transport_failure_yields_code_zero() {
        // bind and drop to find a port with nothing listening
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let attacker = Attacker::new(&AttackerConfig {
            timeout: Duration::from_secs(2),
            ..AttackerConfig::default()
        })
        .unwrap();

        let sample = attacker.hit(&get(format!("http://{addr}/a")), Utc::now()).await;

        assert_eq!(sample.code, 0);
        assert!(!sample.error.is_empty());
    }
}
