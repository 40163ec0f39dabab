use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Every failure the library can surface. Variants carry the structure and
/// field that failed so a one-line message is enough to locate the problem.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("malformed DER in {context}: {reason}")]
    MalformedEncoding { context: String, reason: String },

    #[error("unexpected tag in {context}: expected {expected}, found {found}")]
    UnexpectedTag {
        context: String,
        expected: String,
        found: String,
    },

    #[error("{structure} is missing required property {property}")]
    MissingProperty { structure: String, property: String },

    #[error("invalid fourcc {0:?}: must be exactly 4 ASCII characters")]
    InvalidFourCC(String),

    #[error("no backend available for {codec} compression{detail}")]
    UnsupportedCodec { codec: String, detail: String },

    #[error("corrupt {codec} stream: {reason}")]
    CorruptStream { codec: String, reason: String },

    #[error("payload is already {codec}-compressed")]
    AlreadyCompressed { codec: String },

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("keybag has no entry for usage class {0}")]
    KeybagNotFound(u64),

    #[error("digest mismatch for {fourcc}: manifest {expected}, computed {computed}")]
    DigestMismatch {
        fourcc: String,
        expected: String,
        computed: String,
    },

    #[error("manifest signature does not verify: {0}")]
    SignatureMismatch(String),

    #[error("certificate chain is not trusted: {0}")]
    UntrustedChain(String),

    #[error("malformed certificate {index}: {reason}")]
    MalformedCertificate { index: usize, reason: String },
}

impl Error {
    pub(crate) fn malformed(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedEncoding {
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unexpected(
        context: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Error::UnexpectedTag {
            context: context.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub(crate) fn missing(structure: impl Into<String>, property: impl Into<String>) -> Self {
        Error::MissingProperty {
            structure: structure.into(),
            property: property.into(),
        }
    }

    /// Process exit code used by the command-line front end. Each kind gets
    /// its own code; 1 is left for I/O and usage errors outside the library.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::MalformedEncoding { .. } => 2,
            Error::UnexpectedTag { .. } => 3,
            Error::MissingProperty { .. } => 4,
            Error::InvalidFourCC(_) => 5,
            Error::UnsupportedCodec { .. } => 6,
            Error::CorruptStream { .. } => 7,
            Error::AlreadyCompressed { .. } => 8,
            Error::DecryptionFailed(_) => 9,
            Error::KeybagNotFound(_) => 10,
            Error::DigestMismatch { .. } => 11,
            Error::SignatureMismatch(_) => 12,
            Error::UntrustedChain(_) => 13,
            Error::MalformedCertificate { .. } => 14,
        }
    }
}
