use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Telegram request failed: {0}")]
    Request(#[from] teloxide::RequestError),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("bad URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("could not draw the chart: {0}")]
    Image(#[from] image::ImageError),
}

impl HandlerError {
    /// Short name of what went wrong, for error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::Request(_) => "RequestError",
            HandlerError::Config(_) => "ConfigError",
            HandlerError::Http(_) => "HttpError",
            HandlerError::Url(_) => "UrlError",
            HandlerError::Io(_) => "IoError",
            HandlerError::Image(_) => "ImageError",
        }
    }
}
