//! Liveness endpoint: a raw TCP listener answering `GET /health` with a bare
//! `200 OK`, independent of the JSON API server so orchestrators can probe it
//! even if the API listener is saturated.

use anyhow::Context;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct HealthChecker {
    listener: TcpListener,
}

impl HealthChecker {
    pub async fn new(hostname: &str, port: u16) -> anyhow::Result<Self> {
        let bind_address = format!("{hostname}:{port}");
        info!(bind_address, "starting health checker");
        let listener = TcpListener::bind(&bind_address)
            .await
            .with_context(|| format!("could not bind TCP listener to {bind_address}"))?;
        Ok(Self { listener })
    }

    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((mut stream, _addr)) => {
                            let mut buffer = [0; 1024];
                            if stream.read(&mut buffer).await.is_err() {
                                continue;
                            }

                            let mut headers = [httparse::EMPTY_HEADER; 16];
                            let mut request = httparse::Request::new(&mut headers);
                            match request.parse(&buffer) {
                                Ok(_) if request.path == Some("/health") => {
                                    let _ = stream.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await;
                                    let _ = stream.flush().await;
                                }
                                Ok(_) => warn!(path = ?request.path, "health check at unknown path"),
                                Err(error) => warn!(%error, "invalid health check request"),
                            }
                        }
                        Err(error) => warn!(%error, "health check accept failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_check_responds_200() {
        let checker = HealthChecker::new("127.0.0.1", 0).await.unwrap();
        let addr = checker.listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();
        tokio::spawn(checker.run(shutdown_clone));

        let response = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        shutdown.cancel();
    }
}
