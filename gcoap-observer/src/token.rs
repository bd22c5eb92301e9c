use std::fmt;

use crate::{ObserverError, ObserverResult, MAX_TOKEN_LEN, RANDOM_TOKEN_LEN};

/// [`Token`] is the opaque byte string that ties an Observe registration
/// to the notifications the server sends for it. Always 1 to 8 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token(Vec<u8>);

impl Token {
    /// Two random bytes, used when the command driver supplies no token
    pub fn random() -> Self {
        let bytes: [u8; RANDOM_TOKEN_LEN] = rand::random();
        Self(bytes.to_vec())
    }

    /// Decode hex text such as `05` or `05a6`. The text must have an even
    /// number of hex digits; the token length is half the text length
    pub fn from_hex(text: &str) -> ObserverResult<Self> {
        let bytes = hex::decode(text).map_err(|e| {
            log::error!("Unable to decode token text {text:?}: {e:}");
            e
        })?;
        Self::try_from(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl TryFrom<Vec<u8>> for Token {
    type Error = ObserverError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        if bytes.is_empty() || bytes.len() > MAX_TOKEN_LEN {
            return Err(ObserverError::TokenLength(bytes.len()));
        }
        Ok(Self(bytes))
    }
}

impl PartialEq<[u8]> for Token {
    fn eq(&self, other: &[u8]) -> bool {
        self.0 == other
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}
