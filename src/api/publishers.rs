//! RFC 8183 publisher requests and repository responses, as exchanged
//! with non-hosted CAs and the external repository.

use rpki::ca::idexchange;

use crate::api::ca::PublisherHandle;
use crate::commons::error::Error;
use crate::commons::{IssuerEmptyResult, IssuerResult};

pub use rpki::ca::idexchange::{PublisherRequest, RepositoryResponse};


/// Parses an uploaded `<publisher_request/>` and checks its identity
/// certificate.
pub fn parse_publisher_request(xml: &[u8]) -> IssuerResult<PublisherRequest> {
    let request = PublisherRequest::parse(xml)
        .map_err(|e| Error::InvalidPublisherRequest(e.to_string()))?;
    validate_publisher_request(&request)?;
    Ok(request)
}

/// Checks that the identity certificate is a valid, current TA certificate.
///
/// The handle in the request is only informational. The actual publisher
/// handle is generated by this system, so that different CAs can never
/// collide.
pub fn validate_publisher_request(
    request: &PublisherRequest,
) -> IssuerEmptyResult {
    request.validate().map(|_| ()).map_err(|e| {
        Error::InvalidPublisherRequest(format!(
            "identity certificate of '{}' rejected: {}",
            request.publisher_handle(),
            e
        ))
    })
}

/// Returns the handle the repository knows a publisher by.
pub fn repository_publisher_handle(
    handle: PublisherHandle,
) -> idexchange::PublisherHandle {
    idexchange::PublisherHandle::new(handle.to_string().into())
}


//============ Tests =========================================================
