//! HSM-backed random byte source.
//!
//! [`RandomByteSource`] turns one remote `generateRandomBytes` call into one
//! buffer fill. It is usable as:
//!
//! - a [`std::io::Read`] implementation (also on `&RandomByteSource`),
//! - a [`ByteFiller`] and [`NumericSource`](crate::NumericSource),
//! - a [`rand::TryRngCore`] + [`rand::TryCryptoRng`]. Call
//!   [`unwrap_err`](rand::TryRngCore::unwrap_err) or
//!   [`unwrap_mut`](rand::TryRngCore::unwrap_mut) to get an infallible
//!   [`rand::RngCore`] that panics if the service fails.
//!
//! Fill contract:
//! 1. buffers longer than `i32::MAX` fail locally with
//!    [`Error::RequestTooLarge`]
//! 2. buffers shorter than 8 bytes still request 8 bytes from the service
//! 3. the request always asks for HSM protection
//! 4. a response shorter than the request fails with
//!    [`Error::ShortResponse`] and leaves the buffer untouched
//! 5. on success exactly `buf.len()` bytes are copied and returned

use std::io;

use log::{debug, trace, warn};
use rand::{TryCryptoRng, TryRngCore};

use crate::client::KmsClient;
use crate::config::ClientOptions;
use crate::error::{Error, Result};
use crate::numeric::{ByteFiller, NumericSource, uniform_below};
use crate::protocol::{GenerateRandomBytesRequest, request_length};
use crate::service::RandomService;

/// Random bytes from a remote HSM, one remote call per fill.
pub struct RandomByteSource<S = KmsClient> {
    service: S,
    location: String,
}

impl RandomByteSource<KmsClient> {
    /// Connect to Cloud KMS using [`ClientOptions::from_env`].
    ///
    /// `location` has the form `projects/<project>/locations/<location>`. It
    /// is not validated here; a malformed location surfaces on first use.
    pub fn open(location: impl Into<String>) -> Result<Self> {
        Self::open_with_options(location, ClientOptions::from_env())
    }

    /// Connect to Cloud KMS with explicit options.
    pub fn open_with_options(location: impl Into<String>, options: ClientOptions) -> Result<Self> {
        let service = KmsClient::connect(options)?;
        Ok(Self::with_service(service, location))
    }
}

impl<S: RandomService> RandomByteSource<S> {
    /// Wrap an already connected service.
    pub fn with_service(service: S, location: impl Into<String>) -> Self {
        let location = location.into();
        debug!("random byte source opened for {location}");
        Self { service, location }
    }

    /// Location every request is sent to.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The wrapped service.
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Fill `buf` entirely with bytes from the remote HSM.
    ///
    /// Returns `buf.len()` on success. Makes exactly one remote call, except
    /// when the buffer is too large, in which case none is made. On error the
    /// buffer is left as it was.
    pub fn fill(&self, buf: &mut [u8]) -> Result<usize> {
        let wanted = request_length(buf.len())?;
        let request = GenerateRandomBytesRequest::hsm(&self.location, wanted);
        let requested = request.len();

        trace!("requesting {requested} bytes for a {}-byte buffer", buf.len());
        let response = self.service.generate_random_bytes(&request)?;

        let received = response.data.len();
        if received < requested {
            warn!("random service returned {received} bytes, {requested} requested");
            return Err(Error::ShortResponse {
                requested,
                received,
            });
        }

        let n = buf.len();
        buf.copy_from_slice(&response.data[..n]);
        Ok(n)
    }

    /// Release the underlying session. Consumes the source, so it cannot be
    /// filled afterwards.
    pub fn close(mut self) -> Result<()> {
        debug!("closing random byte source for {}", self.location);
        self.service.close()
    }
}

impl<S> std::fmt::Debug for RandomByteSource<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomByteSource")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Streaming read
// ---------------------------------------------------------------------------

impl<S: RandomService> io::Read for RandomByteSource<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (&*self).read(buf)
    }
}

impl<S: RandomService> io::Read for &RandomByteSource<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fill(buf).map_err(io::Error::other)
    }
}

impl<S: RandomService> ByteFiller for RandomByteSource<S> {
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        RandomByteSource::fill(self, buf)
    }
}

// ---------------------------------------------------------------------------
// Numeric source
// ---------------------------------------------------------------------------

/// Exclusive upper bound of every numeric draw.
const INT63_BOUND: std::num::NonZeroU64 = match std::num::NonZeroU64::new(i64::MAX as u64) {
    Some(bound) => bound,
    None => unreachable!(),
};

impl<S: RandomService> NumericSource for RandomByteSource<S> {
    fn try_next_int63(&mut self) -> Result<i64> {
        let n = uniform_below(self, INT63_BOUND)?;
        // n < i64::MAX, so the conversion is lossless.
        Ok(n as i64)
    }

    /// Draws from `[0, i64::MAX)`, the same range as
    /// [`try_next_int63`](NumericSource::try_next_int63). The upper half of
    /// the `u64` range is never produced.
    fn try_next_uint64(&mut self) -> Result<u64> {
        uniform_below(self, INT63_BOUND)
    }

    fn reseed(&mut self, _seed: i64) {}
}

// ---------------------------------------------------------------------------
// rand integration
// ---------------------------------------------------------------------------

impl<S: RandomService> TryRngCore for RandomByteSource<S> {
    type Error = Error;

    fn try_next_u32(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        RandomByteSource::fill(self, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn try_next_u64(&mut self) -> Result<u64> {
        let mut bytes = [0u8; 8];
        RandomByteSource::fill(self, &mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn try_fill_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
        RandomByteSource::fill(self, dst).map(|_| ())
    }
}

impl<S: RandomService> TryCryptoRng for RandomByteSource<S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use rand::Rng;

    use crate::error::RemoteError;
    use crate::protocol::{GenerateRandomBytesResponse, MAX_REQUEST_LENGTH, ProtectionLevel};

    const LOCATION: &str = "projects/test/locations/global";

    /// Remote stub that counts calls, records requests, and answers with
    /// `i as u8` for byte `i` (minus `short_by` bytes).
    #[derive(Default)]
    struct StubService {
        calls: AtomicUsize,
        requests: Mutex<Vec<(String, i32, ProtectionLevel)>>,
        short_by: usize,
        fail: bool,
        closed: Arc<AtomicUsize>,
    }

    impl StubService {
        fn short_by(n: usize) -> Self {
            Self {
                short_by: n,
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn last_length(&self) -> Option<i32> {
            self.requests.lock().unwrap().last().map(|r| r.1)
        }
    }

    impl RandomService for StubService {
        fn generate_random_bytes(
            &self,
            request: &GenerateRandomBytesRequest<'_>,
        ) -> Result<GenerateRandomBytesResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push((
                request.location.to_string(),
                request.length_bytes,
                request.protection_level,
            ));
            if self.fail {
                return Err(RemoteError::new(500, "INTERNAL", "hsm unavailable").into());
            }
            let n = request.len().saturating_sub(self.short_by);
            Ok(GenerateRandomBytesResponse::new(
                (0..n).map(|i| i as u8).collect(),
            ))
        }

        fn close(&mut self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn source() -> RandomByteSource<StubService> {
        RandomByteSource::with_service(StubService::default(), LOCATION)
    }

    // -----------------------------------------------------------------------
    // Fill
    // -----------------------------------------------------------------------

    #[test]
    fn test_fill_16_bytes() {
        let src = source();
        let mut buf = [0u8; 16];
        assert_eq!(src.fill(&mut buf).unwrap(), 16);
        let expected: Vec<u8> = (0..16).collect();
        assert_eq!(buf.to_vec(), expected);
        assert_eq!(src.service().calls(), 1);
        assert_eq!(src.service().last_length(), Some(16));
    }

    #[test]
    fn test_fill_empty_buffer() {
        let src = source();
        let mut buf: [u8; 0] = [];
        assert_eq!(src.fill(&mut buf).unwrap(), 0);
        // still one call at the protocol minimum
        assert_eq!(src.service().calls(), 1);
        assert_eq!(src.service().last_length(), Some(8));
    }

    #[test]
    fn test_fill_small_buffer_requests_minimum() {
        let src = source();
        for n in 1..8 {
            let mut buf = vec![0xEE; n];
            assert_eq!(src.fill(&mut buf).unwrap(), n);
            assert_eq!(src.service().last_length(), Some(8));
            let expected: Vec<u8> = (0..n as u8).collect();
            assert_eq!(buf, expected);
        }
        assert_eq!(src.service().calls(), 7);
    }

    #[test]
    fn test_fill_returns_buffer_length() {
        let src = source();
        for n in [8usize, 9, 31, 64, 1000] {
            let mut buf = vec![0u8; n];
            assert_eq!(src.fill(&mut buf).unwrap(), n);
        }
    }

    #[test]
    fn test_request_uses_location_and_hsm() {
        let src = source();
        let mut buf = [0u8; 32];
        src.fill(&mut buf).unwrap();
        src.fill(&mut buf).unwrap();
        let requests = src.service().requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        for (location, length, level) in requests.iter() {
            assert_eq!(location, LOCATION);
            assert_eq!(*length, 32);
            assert_eq!(*level, ProtectionLevel::Hsm);
        }
    }

    #[test]
    fn test_short_response_fails_and_leaves_buffer() {
        let src = RandomByteSource::with_service(StubService::short_by(3), LOCATION);
        let mut buf = [0xAB; 16];
        let err = src.fill(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::ShortResponse {
                requested: 16,
                received: 13
            }
        ));
        assert_eq!(buf, [0xAB; 16]);
        assert_eq!(src.service().calls(), 1);
    }

    #[test]
    fn test_short_response_counts_against_padded_request() {
        // 4-byte buffer, 8 requested, 5 returned: still short
        let src = RandomByteSource::with_service(StubService::short_by(3), LOCATION);
        let mut buf = [0u8; 4];
        let err = src.fill(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::ShortResponse {
                requested: 8,
                received: 5
            }
        ));
    }

    #[test]
    fn test_remote_error_propagates() {
        let src = RandomByteSource::with_service(StubService::failing(), LOCATION);
        let mut buf = [0u8; 8];
        let err = src.fill(&mut buf).unwrap_err();
        assert!(matches!(err, Error::RemoteCall(ref e) if e.status == "INTERNAL"));
        assert_eq!(src.service().calls(), 1);
    }

    #[test]
    fn test_fill_one_past_limit_makes_no_call() {
        let src = source();
        // zeroed pages are mapped lazily, so this stays cheap
        let mut buf = vec![0u8; MAX_REQUEST_LENGTH + 1];
        let err = src.fill(&mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::RequestTooLarge { requested, max }
                if requested == MAX_REQUEST_LENGTH + 1 && max == MAX_REQUEST_LENGTH
        ));
        assert_eq!(src.service().calls(), 0);
        assert!(src.service().requests.lock().unwrap().is_empty());
    }

    #[test]
    #[ignore] // Allocates a 16 GiB zeroed buffer. Run with: cargo test -- --ignored
    fn test_fill_oversized_buffer_makes_no_call() {
        let src = source();
        let mut buf = vec![0u8; 1 << 34];
        let err = src.fill(&mut buf).unwrap_err();
        assert!(err.to_string().contains("request too large"));
        assert!(matches!(
            err,
            Error::RequestTooLarge { requested, max }
                if requested == 1 << 34 && max == MAX_REQUEST_LENGTH
        ));
        assert_eq!(src.service().calls(), 0);
    }

    // -----------------------------------------------------------------------
    // io::Read
    // -----------------------------------------------------------------------

    #[test]
    fn test_read_impl() {
        let mut src = source();
        let mut buf = [0u8; 12];
        assert_eq!(src.read(&mut buf).unwrap(), 12);
        assert_eq!(buf[11], 11);

        let mut shared = &src;
        assert_eq!(shared.read(&mut buf).unwrap(), 12);
        assert_eq!(src.service().calls(), 2);
    }

    #[test]
    fn test_read_exact_and_take() {
        let src = source();
        let mut buf = [0u8; 40];
        (&src).read_exact(&mut buf).unwrap();
        assert_eq!(buf[39], 39);

        let mut out = Vec::new();
        (&src).take(10).read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn test_read_error_wraps_source_error() {
        let mut src = RandomByteSource::with_service(StubService::short_by(1), LOCATION);
        let mut buf = [0u8; 8];
        let err = src.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        let inner = err.into_inner().unwrap().downcast::<Error>().unwrap();
        assert!(matches!(*inner, Error::ShortResponse { .. }));
    }

    // -----------------------------------------------------------------------
    // Numeric source
    // -----------------------------------------------------------------------

    #[test]
    fn test_next_int63_in_range() {
        let mut src = source();
        for _ in 0..50 {
            let n = src.next_int63();
            assert!(n >= 0);
        }
    }

    #[test]
    fn test_next_uint64_confined_to_lower_half() {
        let mut src = source();
        for _ in 0..50 {
            assert!(src.next_uint64() < 1 << 63);
        }
    }

    #[test]
    fn test_numeric_draw_uses_one_eight_byte_fill() {
        // stub bytes 00..07 big-endian, top bit masked, is below the bound
        let mut src = source();
        assert_eq!(src.try_next_int63().unwrap(), 0x0001_0203_0405_0607);
        assert_eq!(src.service().calls(), 1);
        assert_eq!(src.service().last_length(), Some(8));
    }

    #[test]
    fn test_reseed_is_noop() {
        let mut a = source();
        let mut b = source();
        b.reseed(42);
        b.reseed(i64::MIN);
        assert_eq!(a.next_int63(), b.next_int63());
        assert_eq!(b.service().calls(), 1);
    }

    #[test]
    fn test_try_next_int63_propagates_error() {
        let mut src = RandomByteSource::with_service(StubService::failing(), LOCATION);
        assert!(matches!(src.try_next_int63(), Err(Error::RemoteCall(_))));
        assert!(matches!(src.try_next_uint64(), Err(Error::RemoteCall(_))));
    }

    #[test]
    #[should_panic(expected = "random byte source failed")]
    fn test_next_int63_panics_on_error() {
        let mut src = RandomByteSource::with_service(StubService::failing(), LOCATION);
        let _ = src.next_int63();
    }

    // -----------------------------------------------------------------------
    // rand integration
    // -----------------------------------------------------------------------

    #[test]
    fn test_try_rng_core() {
        let mut src = source();
        assert_eq!(src.try_next_u32().unwrap(), u32::from_le_bytes([0, 1, 2, 3]));
        assert_eq!(
            src.try_next_u64().unwrap(),
            u64::from_le_bytes([0, 1, 2, 3, 4, 5, 6, 7])
        );
        let mut buf = [0u8; 3];
        src.try_fill_bytes(&mut buf).unwrap();
        assert_eq!(buf, [0, 1, 2]);
        assert_eq!(src.service().last_length(), Some(8));
    }

    #[test]
    fn test_unwrap_mut_works_with_rng() {
        let mut src = source();
        let mut rng = src.unwrap_mut();
        let x: u64 = rng.random();
        assert_eq!(x, u64::from_le_bytes([0, 1, 2, 3, 4, 5, 6, 7]));
        let mut arr = [0u8; 5];
        rng.fill(&mut arr);
        assert_eq!(arr, [0, 1, 2, 3, 4]);
    }

    #[test]
    #[should_panic]
    fn test_unwrap_err_panics_on_failure() {
        let src = RandomByteSource::with_service(StubService::failing(), LOCATION);
        let mut rng = src.unwrap_err();
        let _: u64 = rng.random();
    }

    // -----------------------------------------------------------------------
    // Lifecycle and sharing
    // -----------------------------------------------------------------------

    #[test]
    fn test_close_releases_once() {
        let src = source();
        let closed = Arc::clone(&src.service().closed);
        assert_eq!(src.location(), LOCATION);
        assert_eq!(closed.load(Ordering::SeqCst), 0);
        src.close().unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_boxed_dyn_service() {
        let svc: Box<dyn RandomService> = Box::new(StubService::default());
        let src = RandomByteSource::with_service(svc, LOCATION);
        let mut buf = [0u8; 9];
        assert_eq!(src.fill(&mut buf).unwrap(), 9);
        src.close().unwrap();
    }

    #[test]
    fn test_shared_across_threads() {
        let src = source();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let mut buf = [0u8; 24];
                    assert_eq!(src.fill(&mut buf).unwrap(), 24);
                });
            }
        });
        assert_eq!(src.service().calls(), 4);
    }
}
