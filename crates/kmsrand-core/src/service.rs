//! The remote random-byte service seam.
//!
//! [`RandomByteSource`](crate::RandomByteSource) talks to the remote HSM only
//! through [`RandomService`]. [`KmsClient`](crate::KmsClient) is the production
//! implementation; tests plug in call-counting stubs.

use crate::error::Result;
use crate::protocol::{GenerateRandomBytesRequest, GenerateRandomBytesResponse};

/// A remote capability that generates random bytes for a location.
///
/// Implementations perform exactly one remote call per invocation and return
/// whatever the service produced, without padding or retrying. Concurrency
/// guarantees are the implementation's own; the source adds no locking.
pub trait RandomService: Send + Sync {
    /// Ask the service for `request.length_bytes` bytes.
    fn generate_random_bytes(
        &self,
        request: &GenerateRandomBytesRequest<'_>,
    ) -> Result<GenerateRandomBytesResponse>;

    /// Release the session. Calls made after a successful close are the
    /// implementation's concern.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: RandomService + ?Sized> RandomService for Box<T> {
    fn generate_random_bytes(
        &self,
        request: &GenerateRandomBytesRequest<'_>,
    ) -> Result<GenerateRandomBytesResponse> {
        (**self).generate_random_bytes(request)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
