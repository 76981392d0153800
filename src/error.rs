use thiserror::Error;

/// Errors surfaced by parsing, wrapper resolution and playback. Each variant
/// maps onto a numeric code from the VAST error vocabulary.
#[derive(Error, Debug)]
pub enum VastError {
    #[error("Failed to parse XML: {0}")]
    XmlParse(String),

    #[error("Schema violation: {0}")]
    Schema(String),

    #[error("Unsupported VAST version: {0}")]
    UnsupportedVersion(String),

    #[error("Wrapper error: {0}")]
    WrapperGeneral(String),

    #[error("Wrapper fetch timed out: {0}")]
    WrapperTimeout(String),

    #[error("Wrapper limit exceeded at {0}")]
    WrapperLimit(String),

    #[error("No response from wrapper URI: {0}")]
    WrapperNoResponse(String),

    #[error("Linear ad error: {0}")]
    LinearGeneral(String),

    #[error("Media file not found: {0}")]
    FileNotFound(String),

    #[error("Media fetch timed out: {0}")]
    MediaTimeout(String),

    #[error("Media not supported: {0}")]
    MediaNotSupported(String),

    #[error("Companion ad error: {0}")]
    Companion(String),

    #[error("Undefined error: {0}")]
    Undefined(String),
}

impl VastError {
    /// VAST-standard numeric code for this error.
    pub fn code(&self) -> u32 {
        match self {
            VastError::XmlParse(_) => 100,
            VastError::Schema(_) => 101,
            VastError::UnsupportedVersion(_) => 102,
            VastError::WrapperGeneral(_) => 300,
            VastError::WrapperTimeout(_) => 301,
            VastError::WrapperLimit(_) => 302,
            VastError::WrapperNoResponse(_) => 303,
            VastError::LinearGeneral(_) => 400,
            VastError::FileNotFound(_) => 401,
            VastError::MediaTimeout(_) => 402,
            VastError::MediaNotSupported(_) => 403,
            VastError::Companion(_) => 600,
            VastError::Undefined(_) => 900,
        }
    }
}

impl From<quick_xml::Error> for VastError {
    fn from(e: quick_xml::Error) -> Self {
        VastError::XmlParse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, VastError>;
