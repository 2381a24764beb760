//! Wire types for the `generateRandomBytes` call.
//!
//! # REST mapping
//!
//! ```text
//! POST {endpoint}/v1/{location}:generateRandomBytes
//! {"lengthBytes": 32, "protectionLevel": "HSM"}
//!
//! 200 OK
//! {"data": "<base64>"}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Smallest length the service accepts. Shorter reads are padded up to this.
pub const MIN_REQUEST_LENGTH: usize = 8;

/// Largest length representable in the request's signed 32-bit field.
///
/// The service currently caps requests lower (1024 bytes), but that limit is
/// left for the service to enforce.
pub const MAX_REQUEST_LENGTH: usize = i32::MAX as usize;

/// Where random bytes are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtectionLevel {
    /// Software-backed generation.
    Software,
    /// Generation inside a hardware security module.
    Hsm,
    /// External key manager.
    External,
    /// External key manager reached over a VPC.
    ExternalVpc,
}

impl std::fmt::Display for ProtectionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software => write!(f, "SOFTWARE"),
            Self::Hsm => write!(f, "HSM"),
            Self::External => write!(f, "EXTERNAL"),
            Self::ExternalVpc => write!(f, "EXTERNAL_VPC"),
        }
    }
}

/// Build a location name of the form `projects/<project>/locations/<location>`.
pub fn location_name(project: &str, location: &str) -> String {
    format!("projects/{project}/locations/{location}")
}

/// Compute the length to request for a caller buffer of `n` bytes.
///
/// Fails with [`Error::RequestTooLarge`] above [`MAX_REQUEST_LENGTH`] and
/// raises anything below [`MIN_REQUEST_LENGTH`] to the minimum.
pub fn request_length(n: usize) -> Result<i32> {
    if n > MAX_REQUEST_LENGTH {
        return Err(Error::RequestTooLarge {
            requested: n,
            max: MAX_REQUEST_LENGTH,
        });
    }
    let wanted = n.max(MIN_REQUEST_LENGTH);
    i32::try_from(wanted).map_err(|_| Error::RequestTooLarge {
        requested: n,
        max: MAX_REQUEST_LENGTH,
    })
}

/// One `generateRandomBytes` request.
///
/// The location travels in the URL path, so it is skipped in the JSON body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRandomBytesRequest<'a> {
    #[serde(skip)]
    pub location: &'a str,
    pub length_bytes: i32,
    pub protection_level: ProtectionLevel,
}

impl<'a> GenerateRandomBytesRequest<'a> {
    /// HSM-backed request for `length_bytes` bytes at `location`.
    pub fn hsm(location: &'a str, length_bytes: i32) -> Self {
        Self {
            location,
            length_bytes,
            protection_level: ProtectionLevel::Hsm,
        }
    }

    /// Requested length as a buffer size.
    pub fn len(&self) -> usize {
        usize::try_from(self.length_bytes).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bytes returned by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRandomBytesResponse {
    #[serde(with = "base64_bytes", default)]
    pub data: Vec<u8>,
}

impl GenerateRandomBytesResponse {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

/// Error envelope returned with non-success HTTP statuses.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        match encoded {
            Some(s) => STANDARD.decode(s).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
