//! Fetches source metadata, normalizes it to the target chain's schema, and
//! optionally re-hosts the image and JSON document on a content-addressed
//! store (C8). Per spec §4.8: an explicit SSRF block list on every
//! user-referenced URL, redirect-following disabled, and a 10 MiB cap on
//! image downloads enforced both via `Content-Length` and on actual bytes
//! read.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::chains::SourceChain;
use crate::deposit_verifier::DepositVerification;
use crate::errors::RelayerError;
use crate::external::ContentStore;

const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_URI_LEN: usize = 512;
const PRIVATE_HOST_SUFFIXES: &[&str] = &[".internal", ".local"];
const PRIVATE_HOSTS: &[&str] = &["localhost"];

#[derive(Debug, Clone, Serialize)]
pub struct Creator {
    pub address: String,
    pub share: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct Properties {
    pub category: &'static str,
    pub creators: Vec<Creator>,
    pub files: Vec<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Provenance {
    pub source_chain: &'static str,
    pub source_chain_id: u16,
    pub source_contract: String,
    pub source_token_id: String,
    pub bridge_method: &'static str,
    pub deposit_address: String,
    pub bridged_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizedMetadata {
    pub name: String,
    pub symbol: &'static str,
    pub description: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    pub properties: Properties,
    pub provenance: Provenance,
}

/// Rejects any URL that isn't plain `http(s)` or whose host falls in the
/// private/loopback/link-local ranges — checked before any socket is ever
/// opened.
pub fn is_ssrf_blocked(url: &Url) -> bool {
    if url.scheme() != "http" && url.scheme() != "https" {
        return true;
    }
    let Some(host) = url.host_str() else { return true };

    if PRIVATE_HOSTS.contains(&host) || PRIVATE_HOST_SUFFIXES.iter().any(|suffix| host.ends_with(suffix)) {
        return true;
    }

    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return is_private_ip(ip);
    }
    false
}

fn is_private_ip(ip: std::net::IpAddr) -> bool {
    match ip {
        std::net::IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.octets()[0] == 169 && v4.octets()[1] == 254
        }
        std::net::IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

/// Expands a content-addressed URI (currently: `ipfs://<cid>[/path]`) to a
/// list of gateway URLs to try in order. Non content-addressed URIs are
/// returned unchanged as the sole candidate.
pub fn expand_gateways(uri: &str, gateways: &[String]) -> Vec<String> {
    let Some(rest) = uri.strip_prefix("ipfs://") else { return vec![uri.to_string()] };
    gateways.iter().map(|template| template.replace("{cid}", rest)).collect()
}

pub struct MetadataPipeline {
    http: reqwest::Client,
    content_store: Option<Arc<dyn ContentStore>>,
    gateways: Vec<String>,
}

impl MetadataPipeline {
    pub fn new(content_store: Option<Arc<dyn ContentStore>>, gateways: Vec<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none()).build()?;
        Ok(Self { http, content_store, gateways })
    }

    async fn fetch_json(&self, uri: &str) -> Result<Value, RelayerError> {
        let mut last_error = None;
        for candidate in expand_gateways(uri, &self.gateways) {
            let url = Url::parse(&candidate)
                .map_err(|e| RelayerError::ValidationFailure(format!("malformed metadata URL: {e}")))?;
            if is_ssrf_blocked(&url) {
                last_error = Some(RelayerError::ValidationFailure(format!("blocked URL: {candidate}")));
                continue;
            }
            match self.http.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    return response.json::<Value>().await.map_err(RelayerError::from);
                }
                Ok(response) => last_error = Some(RelayerError::TransientNetwork(format!("status {}", response.status()))),
                Err(error) => last_error = Some(error.into()),
            }
        }
        Err(last_error.unwrap_or_else(|| RelayerError::ValidationFailure("no gateway candidates".into())))
    }

    /// Downloads the referenced image, capping at 10 MiB whether declared in
    /// `Content-Length` or only discovered once the body is actually read.
    async fn download_image(&self, image_uri: &str) -> Result<(Vec<u8>, String), RelayerError> {
        let url = Url::parse(image_uri)
            .map_err(|e| RelayerError::ValidationFailure(format!("malformed image URL: {e}")))?;
        if is_ssrf_blocked(&url) {
            return Err(RelayerError::ValidationFailure(format!("blocked image URL: {image_uri}")));
        }

        let response = self.http.get(url).send().await?;
        if let Some(len) = response.content_length() {
            if len > MAX_IMAGE_BYTES {
                return Err(RelayerError::ValidationFailure(format!(
                    "image declares {len} bytes, exceeds {MAX_IMAGE_BYTES} cap"
                )));
            }
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(RelayerError::ValidationFailure("image body is empty".into()));
        }
        if bytes.len() as u64 > MAX_IMAGE_BYTES {
            return Err(RelayerError::ValidationFailure(format!(
                "image body is {} bytes, exceeds {MAX_IMAGE_BYTES} cap",
                bytes.len()
            )));
        }
        Ok((bytes.to_vec(), content_type))
    }

    /// Runs the full pipeline for a verified deposit: fetch-or-use metadata,
    /// normalize to the target schema, and optionally re-host. Returns the
    /// final URI to store as the reborn NFT's `tokenUri`.
    pub async fn run(
        &self,
        verification: &DepositVerification,
        source_chain: SourceChain,
        nft_contract: &str,
        token_id: &str,
        deposit_address: &[u8],
        receiver_address: &str,
    ) -> Result<String, RelayerError> {
        let (name, description, image) = if verification.image_url.is_some() || verification.name.is_some() {
            (
                verification.name.clone().unwrap_or_default(),
                verification.description.clone().unwrap_or_default(),
                verification.image_url.clone().unwrap_or_default(),
            )
        } else if let Some(token_uri) = &verification.token_uri {
            let doc = self.fetch_json(token_uri).await?;
            (
                doc.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                doc.get("description").and_then(Value::as_str).unwrap_or_default().to_string(),
                doc.get("image").and_then(Value::as_str).unwrap_or_default().to_string(),
            )
        } else {
            return Err(RelayerError::DepositUnverified("no metadata source available".into()));
        };

        let normalized = NormalizedMetadata {
            name,
            symbol: "REBORN",
            description,
            image: image.clone(),
            attributes: None,
            external_url: None,
            properties: Properties {
                category: "image",
                creators: vec![Creator { address: receiver_address.to_string(), share: 100 }],
                files: vec![serde_json::json!({ "uri": image, "type": "image" })],
            },
            provenance: Provenance {
                source_chain: source_chain.as_str(),
                source_chain_id: source_chain.info().wormhole_chain_id,
                source_contract: nft_contract.to_string(),
                source_token_id: token_id.to_string(),
                bridge_method: "mpc-attestation",
                deposit_address: format!("0x{}", hex::encode(deposit_address)),
                bridged_at: chrono::Utc::now(),
            },
        };

        match &self.content_store {
            Some(store) => self.upload(store.as_ref(), &normalized).await,
            None => {
                let source_uri = verification.token_uri.clone().unwrap_or(normalized.image.clone());
                if source_uri.starts_with("data:") {
                    return Err(RelayerError::ValidationFailure(
                        "data URIs are not permitted as a tokenUri".into(),
                    ));
                }
                if source_uri.len() > MAX_URI_LEN {
                    return Err(RelayerError::ValidationFailure(format!(
                        "source URI is {} bytes, exceeds the {MAX_URI_LEN}-byte target-chain limit",
                        source_uri.len()
                    )));
                }
                Ok(source_uri)
            }
        }
    }

    async fn upload(&self, store: &dyn ContentStore, normalized: &NormalizedMetadata) -> Result<String, RelayerError> {
        let (image_bytes, content_type) = self.download_image(&normalized.image).await?;
        let image_url = store.upload(image_bytes, &content_type).await?;

        let mut with_hosted_image = normalized.clone();
        with_hosted_image.image = image_url.clone();
        with_hosted_image.properties.files = vec![serde_json::json!({ "uri": image_url, "type": content_type })];

        let json_bytes = serde_json::to_vec(&with_hosted_image)?;
        let final_url = store.upload(json_bytes, "application/json").await?;

        if final_url.len() > MAX_URI_LEN {
            warn!(len = final_url.len(), "uploaded metadata URL exceeds the target-chain URI limit");
            return Err(RelayerError::ValidationFailure(format!(
                "uploaded metadata URL is {} bytes, exceeds the {MAX_URI_LEN}-byte limit",
                final_url.len()
            )));
        }
        Ok(final_url)
    }
}

impl Clone for NormalizedMetadata {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            symbol: self.symbol,
            description: self.description.clone(),
            image: self.image.clone(),
            attributes: self.attributes.clone(),
            external_url: self.external_url.clone(),
            properties: Properties {
                category: self.properties.category,
                creators: self.properties.creators.clone(),
                files: self.properties.files.clone(),
            },
            provenance: Provenance {
                source_chain: self.provenance.source_chain,
                source_chain_id: self.provenance.source_chain_id,
                source_contract: self.provenance.source_contract.clone(),
                source_token_id: self.provenance.source_token_id.clone(),
                bridge_method: self.provenance.bridge_method,
                deposit_address: self.provenance.deposit_address.clone(),
                bridged_at: self.provenance.bridged_at,
            },
        }
    }
}

impl Clone for Creator {
    fn clone(&self) -> Self {
        Self { address: self.address.clone(), share: self.share }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_non_http_schemes() {
        let url = Url::parse("file:///etc/passwd").unwrap();
        assert!(is_ssrf_blocked(&url));
    }

    #[test]
    fn blocks_loopback_and_private_ranges() {
        for host in ["127.0.0.1", "10.0.0.5", "192.168.1.1", "172.16.5.5", "169.254.1.1"] {
            let url = Url::parse(&format!("http://{host}/x")).unwrap();
            assert!(is_ssrf_blocked(&url), "{host} should be blocked");
        }
    }

    #[test]
    fn blocks_localhost_and_internal_suffixes() {
        assert!(is_ssrf_blocked(&Url::parse("http://localhost/x").unwrap()));
        assert!(is_ssrf_blocked(&Url::parse("http://service.internal/x").unwrap()));
        assert!(is_ssrf_blocked(&Url::parse("http://box.local/x").unwrap()));
    }

    #[test]
    fn allows_ordinary_public_https() {
        assert!(!is_ssrf_blocked(&Url::parse("https://example.com/metadata.json").unwrap()));
    }

    #[test]
    fn expands_ipfs_uris_to_configured_gateways() {
        let gateways = vec!["https://ipfs.io/ipfs/{cid}".to_string(), "https://cf.io/ipfs/{cid}".to_string()];
        let expanded = expand_gateways("ipfs://Qm123/meta.json", &gateways);
        assert_eq!(expanded, vec!["https://ipfs.io/ipfs/Qm123/meta.json", "https://cf.io/ipfs/Qm123/meta.json"]);
    }

    #[test]
    fn non_ipfs_uri_passes_through_unchanged() {
        let expanded = expand_gateways("https://example.com/x.json", &[]);
        assert_eq!(expanded, vec!["https://example.com/x.json"]);
    }
}
