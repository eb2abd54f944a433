use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid code width({0}), must be within [1, 16]")]
    InvalidCodeWidth(usize),
    #[error("unsupported predicate count({0})")]
    UnsupportedPredicateCount(usize),
    #[error("{0} not supported")]
    NotSupported(&'static str),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl From<toml::de::Error> for Error {
    #[inline]
    fn from(src: toml::de::Error) -> Self {
        Error::InvalidConfig(src.message().to_string())
    }
}

impl From<toml::ser::Error> for Error {
    #[inline]
    fn from(src: toml::ser::Error) -> Self {
        Error::InvalidConfig(src.to_string())
    }
}
