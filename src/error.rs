use thiserror::Error;

/// Failure to turn a message into an advertisable frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("message is {size} bytes but the advertisement only has room for {capacity}")]
    PayloadTooLarge { size: usize, capacity: usize },
}

/// Failure to pull a message out of received service data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("advertisement carries no service data for the beacon service")]
    ServiceIdNotPresent,

    #[error("advertisement structure at offset {offset} runs past the end of the record")]
    MalformedAdvertisement { offset: usize },
}

/// Synchronous refusal of a start request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("advertising is already active")]
    AlreadyActive,

    #[error("could not encode message: {0}")]
    EncodeFailed(#[from] EncodeError),

    #[error("transport rejected the request: {0}")]
    Transport(String),
}

/// Categorized advertise failure reported by the transport after submission.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("ADVERTISE_FAILED_DATA_TOO_LARGE")]
    DataTooLarge,

    #[error("ADVERTISE_FAILED_TOO_MANY_ADVERTISERS")]
    TooManyAdvertisers,

    #[error("ADVERTISE_FAILED_ALREADY_STARTED")]
    AlreadyStarted,

    #[error("ADVERTISE_FAILED_INTERNAL_ERROR")]
    InternalError,

    #[error("ADVERTISE_FAILED_FEATURE_UNSUPPORTED")]
    FeatureUnsupported,

    #[error("advertising failed with unknown error {0}")]
    Unknown(i32),
}

impl TransportError {
    /// Maps the host stack's numeric advertise-failure codes.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => TransportError::DataTooLarge,
            2 => TransportError::TooManyAdvertisers,
            3 => TransportError::AlreadyStarted,
            4 => TransportError::InternalError,
            5 => TransportError::FeatureUnsupported,
            other => TransportError::Unknown(other),
        }
    }
}

/// A power level or advertise mode name that matches no known value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} {label}")]
pub struct UnknownLabel {
    pub kind: &'static str,
    pub label: String,
}

/// Conditions that make the radio unusable. The program refuses to go on.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Bluetooth not detected on device")]
    AdapterNotFound,

    #[error("BLE advertising not supported on this device")]
    AdvertisingUnsupported,
}
