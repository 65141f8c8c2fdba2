//! DNS lookups used by the trust checks.

use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::{
    ResolveError, TokioResolver, config::ResolverOpts, name_server::TokioConnectionProvider,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DnsError {
    /// The name exists but has no records of the requested type, or doesn't
    /// exist at all.
    #[error("no records found for {0}")]
    NoRecords(String),

    /// DNS query failed due to network or resolver issues.
    #[error("DNS lookup failed: {0}")]
    LookupFailed(#[from] ResolveError),

    #[error("DNS query timed out for {0}")]
    Timeout(String),
}

/// The record lookups the verifier needs.
#[async_trait]
pub trait DnsLookup: Send + Sync {
    /// Exchange host names of the MX records for `domain`.
    async fn mx(&self, domain: &str) -> Result<Vec<String>, DnsError>;

    /// Every TXT record at `name`, each one's strings concatenated.
    async fn txt(&self, name: &str) -> Result<Vec<String>, DnsError>;
}

/// [`DnsLookup`] backed by the system resolver configuration.
#[derive(Debug)]
pub struct HickoryLookup {
    resolver: TokioResolver,
    timeout: Duration,
}

impl HickoryLookup {
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn new(timeout_secs: u64) -> Result<Self, DnsError> {
        let timeout = Duration::from_secs(timeout_secs);
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;

        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(opts)
            .build();

        Ok(Self { resolver, timeout })
    }

    fn classify(name: &str, err: ResolveError) -> DnsError {
        if err.is_no_records_found() {
            DnsError::NoRecords(name.to_string())
        } else {
            DnsError::LookupFailed(err)
        }
    }
}

/// Lookups are made fully qualified so search domains never apply.
fn absolute(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

#[async_trait]
impl DnsLookup for HickoryLookup {
    async fn mx(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        let lookup = tokio::time::timeout(self.timeout, self.resolver.mx_lookup(absolute(domain)))
            .await
            .map_err(|_| DnsError::Timeout(domain.to_string()))?
            .map_err(|err| Self::classify(domain, err))?;

        let hosts = lookup
            .iter()
            .map(|mx| mx.exchange().to_utf8())
            .collect::<Vec<_>>();
        debug!("Found {} MX record(s) for {domain}", hosts.len());
        Ok(hosts)
    }

    async fn txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        let lookup = tokio::time::timeout(self.timeout, self.resolver.txt_lookup(absolute(name)))
            .await
            .map_err(|_| DnsError::Timeout(name.to_string()))?
            .map_err(|err| Self::classify(name, err))?;

        Ok(lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|part| String::from_utf8_lossy(part))
                    .collect::<String>()
            })
            .collect())
    }
}
