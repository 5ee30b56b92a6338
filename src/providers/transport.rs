//! HTML fetch strategies for scraped sources.
//!
//! The primary transport is reqwest. Some environments cannot verify the central bank's
//! certificate chain with the bundled roots while the operating system's own stack can, so a
//! secondary transport may be injected and is tried only for that one failure cause.

use async_trait::async_trait;
use std::error::Error as StdError;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer's certificate chain could not be verified.
    #[error("certificate chain could not be verified: {0}")]
    UntrustedCertificate(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Request(String),
    /// The transport cannot run on this platform.
    #[error("{0}")]
    Unsupported(String),
}

impl TransportError {
    pub fn is_untrusted_certificate(&self) -> bool {
        matches!(self, TransportError::UntrustedCertificate(_))
    }
}

#[async_trait]
pub trait HtmlTransport: Send + Sync {
    async fn get_html(&self, url: &str) -> Result<String, TransportError>;
}

/// Plain reqwest GET with a browser user agent.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HtmlTransport for ReqwestTransport {
    async fn get_html(&self, url: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/html")
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        response.text().await.map_err(classify)
    }
}

/// Maps a reqwest failure to [`TransportError`], recognising certificate chain errors
/// anywhere in the source chain.
fn classify(err: reqwest::Error) -> TransportError {
    let mut messages = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        messages.push(cause.to_string());
        source = cause.source();
    }
    let chain = messages.join(": ");
    if is_certificate_chain_failure(&chain) {
        TransportError::UntrustedCertificate(chain)
    } else {
        TransportError::Request(chain)
    }
}

fn is_certificate_chain_failure(chain: &str) -> bool {
    const MARKERS: [&str; 4] = [
        "UnknownIssuer",
        "unable to get local issuer certificate",
        "unable to verify the first certificate",
        "certificate verify failed",
    ];
    MARKERS.iter().any(|m| chain.contains(m))
}

/// Fetches through Windows PowerShell (`Invoke-WebRequest`), which validates against the OS
/// certificate store. Fails closed on every other platform.
pub struct PowerShellTransport {
    timeout: Duration,
}

impl PowerShellTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for PowerShellTransport {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl HtmlTransport for PowerShellTransport {
    async fn get_html(&self, url: &str) -> Result<String, TransportError> {
        if !cfg!(windows) {
            return Err(TransportError::Unsupported(
                "PowerShell fallback is only available on Windows".to_string(),
            ));
        }

        let command = format!(
            "(Invoke-WebRequest -UseBasicParsing -Uri '{}').Content",
            url.replace('\'', "''")
        );
        debug!("Fetching {} through PowerShell", url);

        let mut child = tokio::process::Command::new("powershell")
            .args([
                "-NoProfile",
                "-NonInteractive",
                "-ExecutionPolicy",
                "Bypass",
                "-Command",
                &command,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Request(format!("PowerShell failed to start: {e}")))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::Request("PowerShell stdout was not captured".to_string())
        })?;

        let run = async {
            let body = read_capped(stdout, Self::MAX_OUTPUT_BYTES)
                .await
                .map_err(|e| {
                    TransportError::Request(format!("PowerShell output unreadable: {e}"))
                })?
                .ok_or_else(|| {
                    TransportError::Request("PowerShell output exceeded 10 MiB".to_string())
                })?;
            let status = child
                .wait()
                .await
                .map_err(|e| TransportError::Request(format!("PowerShell did not exit: {e}")))?;
            if !status.success() {
                return Err(TransportError::Request(format!(
                    "PowerShell exited with {status}"
                )));
            }
            Ok::<_, TransportError>(body)
        };

        // Dropping the child on timeout or overflow kills the process.
        let body = tokio::time::timeout(self.timeout, run).await.map_err(|_| {
            TransportError::Request(format!(
                "PowerShell fetch timed out after {}s",
                self.timeout.as_secs()
            ))
        })??;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// Reads at most `cap` bytes; `None` when the reader had more.
async fn read_capped<R>(reader: R, cap: usize) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.take(cap as u64 + 1).read_to_end(&mut buf).await?;
    Ok((buf.len() <= cap).then_some(buf))
}
