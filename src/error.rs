use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Parse error in {record}: {reason}")]
    Parse { record: String, reason: String },

    #[error("Image {image}: scale reference landmark {index} is missing")]
    MissingReference { image: String, index: u32 },

    #[error("Image {image}: scale reference landmarks {first} and {second} coincide")]
    DegenerateReference {
        image: String,
        first: u32,
        second: u32,
    },

    #[error("Invalid correspondence table: {0}")]
    InvalidCorrespondence(String),

    #[error("No matching landmarks found between the two annotation sets")]
    NoMatches,

    #[error("Cannot estimate density: {0}")]
    SingularDensity(String),

    #[error("Plot error: {0}")]
    Plot(String),

    #[error("Image index {index} out of range for {count} images")]
    ImageIndexOutOfRange { index: usize, count: usize },
}

impl Error {
    pub(crate) fn parse(record: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Parse {
            record: record.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
