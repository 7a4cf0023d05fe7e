use thiserror::Error;

#[derive(Debug, Error)]
pub enum PassportError {
    #[error("Invalid authentication seed: {0}")]
    InvalidSeed(String),

    #[error("MRZ parsing error: {0}")]
    MrzParsingError(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("OCR error: {0}")]
    OcrError(String),

    #[error("Image processing error: {0}")]
    ImageProcessingError(String),

    #[error("Alignment error: {0}")]
    AlignmentError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    /// The card answered with a non-success status word.
    #[error("Card returned status {sw:04X} for {context}")]
    CardStatus { sw: u16, context: String },

    #[error("Secure messaging error: {0}")]
    SecureMessagingError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Malformed TLV data: {0}")]
    TlvError(String),

    #[error("Data group error: {0}")]
    DataGroupError(String),

    #[error("Security object error: {0}")]
    SodError(String),

    #[error("Crypto error: {0}")]
    CryptoError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("A chip read is already in progress")]
    ReaderBusy,

    #[error("Chip read cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl PassportError {
    /// Transport failures (and cancellation) end the whole chip session;
    /// everything else is scoped to the file or step that produced it.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            PassportError::TransportError(_) | PassportError::SecureMessagingError(_) | PassportError::Cancelled
        )
    }

    /// "File not found" style answers mean the object is simply absent.
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            PassportError::CardStatus { sw: 0x6A82, .. }
                | PassportError::CardStatus { sw: 0x6A88, .. }
                | PassportError::CardStatus { sw: 0x6982, .. }
                | PassportError::CardStatus { sw: 0x6986, .. }
        )
    }
}
