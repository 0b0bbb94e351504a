// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Matching a decoded response against the kind the caller expects.

use uaconv_proto::{ResponseEnvelope, ResponseHeader, ServiceBody, ServiceResponse, StatusCode};

use crate::error::{ProtocolError, ServiceError, UaResult};

/// Unwraps the body of `envelope` as `T`.
///
/// A `ServiceFault` becomes [`ServiceError::BadResult`] with the fault's
/// status; any other kind becomes [`ProtocolError::ResponseMismatch`]. The
/// service result of a matching body is left for the caller to inspect.
pub fn expect<T>(envelope: ResponseEnvelope) -> UaResult<(ResponseHeader, T)>
where
    T: ServiceBody + TryFrom<ServiceResponse, Error = ServiceResponse>,
{
    let ResponseEnvelope { header, body, .. } = envelope;
    match T::try_from(body) {
        Ok(body) => Ok((header, body)),
        Err(ServiceResponse::ServiceFault(_)) => Err(ServiceError::BadResult {
            service: T::NAME,
            status: header.service_result,
        }
        .into()),
        Err(other) => Err(ProtocolError::ResponseMismatch {
            actual: other.name(),
            expected: T::NAME,
        }
        .into()),
    }
}

/// Like [`expect`], but a bad service result is an error too.
pub fn expect_good<T>(envelope: ResponseEnvelope) -> UaResult<(ResponseHeader, T)>
where
    T: ServiceBody + TryFrom<ServiceResponse, Error = ServiceResponse>,
{
    let (header, body) = expect::<T>(envelope)?;
    if header.service_result.is_bad() {
        return Err(ServiceError::BadResult {
            service: T::NAME,
            status: header.service_result,
        }
        .into());
    }
    Ok((header, body))
}

/// Checks per-item results: the count must match `expected` and each
/// status must be Good. Returns the first failure.
pub fn check_results(
    service: &'static str,
    results: &[StatusCode],
    expected: usize,
) -> UaResult<()> {
    if results.len() != expected {
        return Err(ServiceError::ResultCountMismatch {
            service,
            expected,
            actual: results.len(),
        }
        .into());
    }
    match results.iter().position(|status| !status.is_good()) {
        Some(index) => Err(ServiceError::BadItem {
            service,
            index,
            status: results[index],
        }
        .into()),
        None => Ok(()),
    }
}
