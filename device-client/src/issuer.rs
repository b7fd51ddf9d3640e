//! Certificate issuance from a signing request

use tracing::info;

use shared::constants::CREATE_CERTIFICATE_TOPIC;
use shared::error::ProvisioningResult;
use shared::types::{CreateCertificateRequest, CreateCertificateResponse, IssuedCertificate};

use crate::exchange::CorrelatedExchange;

const OPERATION: &str = "CreateCertificateFromCsr";

/// Obtains a certificate and ownership token for a CSR
pub struct CertificateIssuer<'a> {
    exchange: &'a CorrelatedExchange,
}

impl<'a> CertificateIssuer<'a> {
    pub fn new(exchange: &'a CorrelatedExchange) -> Self {
        Self { exchange }
    }

    /// Exchange a PEM signing request for an issued certificate
    pub async fn issue_certificate(&self, csr_pem: &str) -> ProvisioningResult<IssuedCertificate> {
        let request = CreateCertificateRequest {
            certificate_signing_request: csr_pem.to_string(),
        };

        let response: CreateCertificateResponse = self
            .exchange
            .request(OPERATION, CREATE_CERTIFICATE_TOPIC, &request)
            .await?;

        let issued = IssuedCertificate::from(response);
        info!(certificate_id = %issued.id, "Certificate issued");
        Ok(issued)
    }
}
