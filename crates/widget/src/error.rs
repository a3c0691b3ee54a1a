use snafu::Snafu;

use cordial_backend::BackendError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum WidgetError {
    #[snafu(display("widget configuration is missing an embed id"))]
    MissingEmbedId { stage: &'static str },
    #[snafu(display("failed to load widget configuration: {source}"))]
    Config {
        stage: &'static str,
        source: figment::Error,
    },
    #[snafu(display("no state directory is available on this platform"))]
    MissingStateDirectory { stage: &'static str },
    #[snafu(display("failed to create state directory at {path}"))]
    CreateStateDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to read state file at {path}"))]
    ReadStateFile {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to write state file at {path}"))]
    WriteStateFile {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("a generation is already in flight for this session"))]
    GenerationAlreadyActive { stage: &'static str },
    #[snafu(display("backend call failed on `{stage}`: {source}"))]
    Backend {
        stage: &'static str,
        source: BackendError,
    },
}

pub type WidgetResult<T> = Result<T, WidgetError>;
