use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlPointError {
    /// The action response envelope is missing a required field.
    #[error("Malformed UPnP response: {0}")]
    MalformedResponse(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Unknown browse type: {0}")]
    UnknownBrowseType(String),
    #[error("Metadata browse for {0} did not return exactly one entry")]
    MetadataCountMismatch(String),
    #[error("Subscription failure for {0}: {1}")]
    Subscription(String, String),
    /// Fault raised by the transport collaborator.
    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),
    #[error("Device is not discovered")]
    NotDiscovered,
    #[error("Media record {0} carries no file URI")]
    MissingFileUri(String),
}

impl ControlPointError {
    pub fn malformed(detail: &str) -> Self {
        ControlPointError::MalformedResponse(detail.to_string())
    }

    pub fn subscription(service_type: &str, detail: impl ToString) -> Self {
        ControlPointError::Subscription(service_type.to_string(), detail.to_string())
    }
}

impl From<pavanedidl::DidlError> for ControlPointError {
    fn from(err: pavanedidl::DidlError) -> Self {
        ControlPointError::Parse(err.to_string())
    }
}
