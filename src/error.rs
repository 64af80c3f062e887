use serde::Serialize;

pub type BarwaveResult<T> = Result<T, BarwaveError>;

/// Coarse error classes surfaced on a failed job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad audio, image, font or configuration. Never retried.
    Input,
    /// The encoder could not be started, crashed or exited non-zero.
    EncoderProcess,
    /// Programming error: a stage was driven outside its contract.
    InternalRender,
    Cancelled,
}

#[derive(thiserror::Error, Debug)]
pub enum BarwaveError {
    #[error("unsupported audio format: {0}")]
    UnsupportedAudioFormat(String),

    #[error("audio track is empty")]
    EmptyAudioTrack,

    #[error("invalid render configuration: {0}")]
    RenderConfigInvalid(String),

    #[error("invalid input: {0}")]
    Input(String),

    #[error("encoder process error: {0}")]
    EncoderProcess(String),

    #[error("internal render error: {0}")]
    InternalRender(String),

    #[error("job cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BarwaveError {
    pub fn unsupported_audio(msg: impl Into<String>) -> Self {
        Self::UnsupportedAudioFormat(msg.into())
    }

    pub fn render_config(msg: impl Into<String>) -> Self {
        Self::RenderConfigInvalid(msg.into())
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::EncoderProcess(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalRender(msg.into())
    }

    /// Maps an `anyhow` chain built with `.context(..)` onto the input class,
    /// keeping every layer of the message.
    pub fn input_from(err: anyhow::Error) -> Self {
        Self::Input(format!("{err:#}"))
    }

    pub fn unsupported_audio_from(err: anyhow::Error) -> Self {
        Self::UnsupportedAudioFormat(format!("{err:#}"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedAudioFormat(_)
            | Self::EmptyAudioTrack
            | Self::RenderConfigInvalid(_)
            | Self::Input(_) => ErrorKind::Input,
            Self::EncoderProcess(_) => ErrorKind::EncoderProcess,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InternalRender(_) | Self::Other(_) => ErrorKind::InternalRender,
        }
    }
}
