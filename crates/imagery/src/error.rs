use streaming::FetchError;

/// A metadata document that does not have the expected shape.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    MissingField { field: String },
    InvalidField { field: String, reason: String },
    /// An image refers to a camera that the document does not define.
    UnknownCamera { image: String, camera: String },
    /// Neither a flat nor a tiled document.
    UnsupportedShape,
}

impl ParseError {
    pub(crate) fn missing(field: impl Into<String>) -> Self {
        ParseError::MissingField {
            field: field.into(),
        }
    }

    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ParseError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::MissingField { field } => write!(f, "missing field `{field}`"),
            ParseError::InvalidField { field, reason } => {
                write!(f, "invalid field `{field}`: {reason}")
            }
            ParseError::UnknownCamera { image, camera } => {
                write!(f, "image {image} references unknown camera {camera}")
            }
            ParseError::UnsupportedShape => {
                write!(f, "document has neither `images` nor `availableTiles`")
            }
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageryError {
    /// `initialize` was called on a data set that already holds a document.
    AlreadyInitialized { url: String },
    Fetch(FetchError),
    Parse(ParseError),
    /// A tile operation was requested on a flat data set.
    NotTiled { url: String },
}

impl std::fmt::Display for ImageryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageryError::AlreadyInitialized { url } => {
                write!(f, "data set {url} is already initialized")
            }
            ImageryError::Fetch(e) => write!(f, "{e}"),
            ImageryError::Parse(e) => write!(f, "{e}"),
            ImageryError::NotTiled { url } => write!(f, "data set {url} is not tiled"),
        }
    }
}

impl std::error::Error for ImageryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImageryError::Fetch(e) => Some(e),
            ImageryError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FetchError> for ImageryError {
    fn from(e: FetchError) -> Self {
        ImageryError::Fetch(e)
    }
}

impl From<ParseError> for ImageryError {
    fn from(e: ParseError) -> Self {
        ImageryError::Parse(e)
    }
}
