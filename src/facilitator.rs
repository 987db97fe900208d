//! Core trait defining the verification and settlement interface used by the
//! payment gate.
//!
//! Implementors validate incoming payment payloads against the declared
//! requirements ([`Facilitator::verify`]) and execute on-chain transfers
//! ([`Facilitator::settle`]). The production implementation is
//! [`FacilitatorClient`](crate::facilitator_client::FacilitatorClient), which
//! delegates to a remote facilitator over HTTP; tests substitute their own.

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::proto::{SettleRequest, SettleResponse, VerifyRequest, VerifyResponse};

/// Asynchronous interface for x402 payment verification and settlement.
pub trait Facilitator {
    /// The error type returned by this facilitator.
    type Error: Debug + Display;

    /// Verifies a proposed x402 payment payload against the payment
    /// requirements carried in `request`.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the facilitator could not be consulted.
    /// A payment that was checked and rejected is not an error: it comes
    /// back as [`VerifyResponse::Invalid`].
    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send;

    /// Executes an on-chain settlement for a previously verified payment.
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the facilitator could not be consulted.
    /// A settlement the facilitator attempted and rejected comes back as
    /// [`SettleResponse::Error`].
    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(request)
    }

    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(request)
    }
}
