//! Opening remote file references.
//!
//! `http(s)://` is streamed with `reqwest`, `s3://` and `gs://` go through
//! `object_store` with credentials from the environment. Local references
//! (`file://` or a bare path) are refused: trusted callers stage local files
//! with [`crate::FileSource::LocalPath`] instead.
//!
//! Hosts of network URIs must match the [`RemoteHostRegistry`]. HTTP hosts
//! are resolved before each request and every hop of a redirect chain is
//! checked again, so a public name cannot lead the server to loopback,
//! link-local or private addresses.

use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, ObjectStoreExt};
use reqwest::Url;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::lookup_host;
use tokio::sync::RwLock;

use crate::traits::{ByteStream, StorageError, StorageResult};

const MAX_REDIRECTS: usize = 5;

/// Hosts remote URIs may point at. An empty registry allows every public
/// host. An entry also allows its subdomains.
#[derive(Debug, Default)]
pub struct RemoteHostRegistry {
    hosts: RwLock<BTreeSet<String>>,
}

impl RemoteHostRegistry {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: RwLock::new(
                hosts
                    .into_iter()
                    .map(|h| h.as_ref().trim().to_ascii_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect(),
            ),
        }
    }

    pub async fn register(&self, host: &str) {
        self.hosts.write().await.insert(host.trim().to_ascii_lowercase());
        tracing::info!(host = %host, "Remote host registered");
    }

    pub async fn unregister(&self, host: &str) -> bool {
        let removed = self.hosts.write().await.remove(&host.trim().to_ascii_lowercase());
        if removed {
            tracing::info!(host = %host, "Remote host unregistered");
        }
        removed
    }

    pub async fn is_allowed(&self, host: &str) -> bool {
        let hosts = self.hosts.read().await;
        if hosts.is_empty() {
            return true;
        }
        let host = host.to_ascii_lowercase();
        hosts
            .iter()
            .any(|allowed| host == *allowed || host.ends_with(&format!(".{}", allowed)))
    }

    pub async fn hosts(&self) -> Vec<String> {
        self.hosts.read().await.iter().cloned().collect()
    }
}

/// Where a reference points.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RemoteTarget {
    Http(Url),
    S3 { bucket: String, key: String },
    Gcs { bucket: String, key: String },
}

fn not_allowed(uri: &str, reason: impl Into<String>) -> StorageError {
    StorageError::RemoteNotAllowed {
        uri: uri.to_string(),
        reason: reason.into(),
    }
}

fn parse_target(uri: &str) -> StorageResult<RemoteTarget> {
    if !uri.contains("://") {
        return Err(not_allowed(uri, "local paths cannot be fetched"));
    }
    let url = Url::parse(uri).map_err(|e| StorageError::InvalidKey(format!("{}: {}", uri, e)))?;
    let bucket_and_key = |url: &Url| -> StorageResult<(String, String)> {
        let bucket = url
            .host_str()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| StorageError::InvalidKey(format!("{} has no bucket", uri)))?;
        let key = url.path().trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidKey(format!("{} has no object key", uri)));
        }
        Ok((bucket.to_string(), key.to_string()))
    };

    match url.scheme() {
        "http" | "https" => Ok(RemoteTarget::Http(url)),
        "s3" => {
            let (bucket, key) = bucket_and_key(&url)?;
            Ok(RemoteTarget::S3 { bucket, key })
        }
        "gs" | "gcs" => {
            let (bucket, key) = bucket_and_key(&url)?;
            Ok(RemoteTarget::Gcs { bucket, key })
        }
        "file" => Err(not_allowed(uri, "local paths cannot be fetched")),
        other => Err(StorageError::InvalidKey(format!(
            "Unsupported URI scheme '{}'",
            other
        ))),
    }
}

/// Last path segment of a reference, used to name the staged copy.
pub fn remote_file_name(uri: &str) -> Option<String> {
    let path = match parse_target(uri).ok()? {
        RemoteTarget::Http(url) => url.path().to_string(),
        RemoteTarget::S3 { key, .. } | RemoteTarget::Gcs { key, .. } => key,
    };
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();
            octets[0] == 10
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
                || octets[0] == 127
                || (octets[0] == 169 && octets[1] == 254)
                || (octets[0] == 100 && (64..=127).contains(&octets[1]))
                || (224..=239).contains(&octets[0])
                || octets[0] == 0
                || ipv4.is_broadcast()
        }
        IpAddr::V6(ipv6) => {
            // ::ffff:a.b.c.d carries a v4 address past the v6 checks
            if let Some(ipv4) = ipv6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(ipv4));
            }
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                || ipv6.is_multicast()
                || is_ipv6_link_local(ipv6)
                || is_ipv6_unique_local(ipv6)
        }
    }
}

fn is_ipv6_link_local(ip: &Ipv6Addr) -> bool {
    ip.segments()[0] & 0xffc0 == 0xfe80
}

fn is_ipv6_unique_local(ip: &Ipv6Addr) -> bool {
    ip.segments()[0] & 0xfe00 == 0xfc00
}

fn is_internal_host_name(host: &str) -> bool {
    host == "localhost"
        || host.ends_with(".localhost")
        || host.ends_with(".local")
        || host.ends_with(".internal")
        || host.ends_with(".corp")
        || host.starts_with("0.")
}

/// Opens file references of any supported scheme as a byte stream.
#[derive(Clone)]
pub struct RemoteOpener {
    hosts: Arc<RemoteHostRegistry>,
    allow_private_hosts: bool,
}

impl RemoteOpener {
    pub fn new(hosts: Arc<RemoteHostRegistry>) -> Self {
        Self {
            hosts,
            allow_private_hosts: false,
        }
    }

    /// Permit loopback and private-network hosts. Only for deployments that
    /// stage from an internal file server.
    pub fn with_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    pub fn hosts(&self) -> &Arc<RemoteHostRegistry> {
        &self.hosts
    }

    #[tracing::instrument(skip(self))]
    pub async fn open(&self, uri: &str) -> StorageResult<ByteStream> {
        match parse_target(uri)? {
            RemoteTarget::Http(url) => self.open_http(url, uri).await,
            RemoteTarget::S3 { bucket, key } => {
                self.check_host(&bucket, uri).await?;
                let store = AmazonS3Builder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|e| StorageError::ConfigError(e.to_string()))?;
                open_object(&store, &key, uri).await
            }
            RemoteTarget::Gcs { bucket, key } => {
                self.check_host(&bucket, uri).await?;
                let store = GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(|e| StorageError::ConfigError(e.to_string()))?;
                open_object(&store, &key, uri).await
            }
        }
    }

    /// Follows redirects by hand so every hop passes [`Self::validate_url`].
    /// Each request is pinned to the addresses that were checked.
    async fn open_http(&self, mut url: Url, uri: &str) -> StorageResult<ByteStream> {
        for _ in 0..=MAX_REDIRECTS {
            let addrs = self.validate_url(&url).await?;
            let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
            if let Some(domain) = url.domain() {
                builder = builder.resolve_to_addrs(domain, &addrs);
            }
            let client = builder
                .build()
                .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
            let response = client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;

            if response.status().is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| StorageError::DownloadFailed(format!("{}: redirect without location", uri)))?;
                let next = url
                    .join(location)
                    .map_err(|e| StorageError::InvalidKey(format!("{}: {}", location, e)))?;
                tracing::debug!(from = %url, to = %next, "Following redirect");
                url = next;
                continue;
            }
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(StorageError::NotFound(uri.to_string()));
            }
            let response = response
                .error_for_status()
                .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| StorageError::DownloadFailed(e.to_string())));
            return Ok(Box::pin(stream));
        }
        Err(StorageError::DownloadFailed(format!(
            "{}: more than {} redirects",
            uri, MAX_REDIRECTS
        )))
    }

    /// Scheme, allowlist and address checks for one HTTP hop. Returns the
    /// resolved addresses the request must connect to.
    async fn validate_url(&self, url: &Url) -> StorageResult<Vec<SocketAddr>> {
        let uri = url.as_str();
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(not_allowed(uri, "only http and https can be fetched"));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| StorageError::InvalidKey(format!("{} has no host", uri)))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_ascii_lowercase();
        self.check_host(&host, uri).await?;

        if !self.allow_private_hosts {
            if let Ok(ip) = host.parse::<IpAddr>() {
                if is_private_ip(&ip) {
                    tracing::warn!(host = %host, "Private address in remote reference");
                    return Err(not_allowed(uri, "private or internal addresses are not allowed"));
                }
            }
            if is_internal_host_name(&host) {
                return Err(not_allowed(uri, "localhost and internal host names are not allowed"));
            }
        }

        let port = url.port_or_known_default().unwrap_or(80);
        let addrs: Vec<SocketAddr> = lookup_host((host.as_str(), port))
            .await
            .map_err(|e| {
                tracing::warn!(host = %host, error = %e, "DNS resolution failed for remote reference");
                StorageError::DownloadFailed(format!("{}: host could not be resolved: {}", uri, e))
            })?
            .collect();
        if !self.allow_private_hosts {
            if let Some(addr) = addrs.iter().find(|addr| is_private_ip(&addr.ip())) {
                tracing::warn!(host = %host, ip = %addr.ip(), "Remote host resolves to a private address");
                return Err(not_allowed(
                    uri,
                    format!("host resolves to private address {}", addr.ip()),
                ));
            }
        }
        Ok(addrs)
    }

    async fn check_host(&self, host: &str, uri: &str) -> StorageResult<()> {
        if self.hosts.is_allowed(host).await {
            Ok(())
        } else {
            tracing::warn!(host = %host, uri = %uri, "Remote host not in allowlist");
            Err(not_allowed(uri, format!("host '{}' is not in the allowlist", host)))
        }
    }
}

async fn open_object<S: ObjectStore>(store: &S, key: &str, uri: &str) -> StorageResult<ByteStream> {
    let result = store
        .get(&ObjectPath::from(key))
        .await
        .map_err(|e| match e {
            object_store::Error::NotFound { .. } => StorageError::NotFound(uri.to_string()),
            other => StorageError::DownloadFailed(other.to_string()),
        })?;
    let stream = result
        .into_stream()
        .map(|chunk| chunk.map_err(|e| StorageError::DownloadFailed(e.to_string())));
    Ok(Box::pin(stream))
}
