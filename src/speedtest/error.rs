use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpeedTestError {
    #[error("no test servers configured")]
    NoServers,

    #[error("unable to reach server {server}")]
    Unreachable { server: String },

    #[error("download test failed to measure any speed")]
    DownloadFailed,

    #[error("upload test failed to measure any speed")]
    UploadFailed,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, SpeedTestError>;
