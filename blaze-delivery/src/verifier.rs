//! The four DNS trust checks for a sending domain.

use std::sync::Arc;

use blaze_common::{CheckStatus, Domain, GatewayError, TrustReport};
use tracing::{debug, instrument};

use crate::dns::{DnsError, DnsLookup};

/// Runs the MX, SPF, DKIM and DMARC checks for a domain concurrently.
///
/// DNS failures never abort verification: each one becomes the reason its
/// check is invalid.
#[derive(Clone)]
pub struct DomainVerifier {
    dns: Arc<dyn DnsLookup>,
    selector: String,
}

impl DomainVerifier {
    pub fn new(dns: Arc<dyn DnsLookup>, selector: impl Into<String>) -> Self {
        Self {
            dns,
            selector: selector.into(),
        }
    }

    /// # Errors
    ///
    /// [`GatewayError::Validation`] if `domain` isn't a valid domain name.
    pub async fn verify(&self, domain: &str) -> Result<TrustReport, GatewayError> {
        self.verify_with_selector(domain, None).await
    }

    /// Verify `domain`, looking its DKIM key up under `selector` when given.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Validation`] if `domain` or `selector` isn't a valid
    /// name.
    #[instrument(level = "debug", skip(self))]
    pub async fn verify_with_selector(
        &self,
        domain: &str,
        selector: Option<&str>,
    ) -> Result<TrustReport, GatewayError> {
        let domain = Domain::parse(domain)?;
        let selector = match selector.map(str::trim).filter(|s| !s.is_empty()) {
            Some(selector) => {
                Domain::parse(selector).map_err(|_| {
                    GatewayError::Validation(format!("'{selector}' is not a valid DKIM selector"))
                })?;
                selector
            }
            None => self.selector.as_str(),
        };

        let (mx, spf, dkim, dmarc) = tokio::join!(
            self.check_mx(&domain),
            self.check_spf(&domain),
            self.check_dkim(&domain, selector),
            self.check_dmarc(&domain),
        );

        let report = TrustReport::new(domain, mx, spf, dkim, dmarc);
        debug!(domain = %report.domain(), summary = %report.summary(), "Verified domain");
        Ok(report)
    }

    async fn check_mx(&self, domain: &Domain) -> CheckStatus {
        match self.dns.mx(domain.as_str()).await {
            Ok(hosts) if !hosts.is_empty() => CheckStatus::Valid,
            Ok(_) | Err(DnsError::NoRecords(_)) => {
                CheckStatus::Invalid("no MX records found".to_string())
            }
            Err(err) => CheckStatus::Invalid(format!("MX lookup failed: {err}")),
        }
    }

    async fn check_spf(&self, domain: &Domain) -> CheckStatus {
        let records = self.dns.txt(domain.as_str()).await;
        txt_check("SPF", records, |record| starts_with_ignore_case(record, "v=spf1"))
    }

    async fn check_dkim(&self, domain: &Domain, selector: &str) -> CheckStatus {
        let records = self.dns.txt(&domain.dkim_record(selector)).await;
        txt_check("DKIM", records, |record| starts_with_ignore_case(record, "v=DKIM1"))
    }

    async fn check_dmarc(&self, domain: &Domain) -> CheckStatus {
        let records = self.dns.txt(&domain.dmarc_record()).await;
        txt_check("DMARC", records, |record| {
            starts_with_ignore_case(record, "v=DMARC1") && record.contains("p=")
        })
    }
}

fn starts_with_ignore_case(record: &str, prefix: &str) -> bool {
    record
        .trim_start()
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn txt_check(
    name: &str,
    records: Result<Vec<String>, DnsError>,
    matches: impl Fn(&str) -> bool,
) -> CheckStatus {
    match records {
        Ok(records) if records.iter().any(|record| matches(record)) => CheckStatus::Valid,
        Ok(_) | Err(DnsError::NoRecords(_)) => {
            CheckStatus::Invalid(format!("no {name} record found"))
        }
        Err(err) => CheckStatus::Invalid(format!("{name} lookup failed: {err}")),
    }
}
