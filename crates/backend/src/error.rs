use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("request failed on `{stage}`: {source}"))]
    Request {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("backend returned status {status} on `{stage}`: {body}"))]
    Status {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode backend payload on `{stage}`: {source}"))]
    Decode {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("generation request has no history messages"))]
    EmptyHistory { stage: &'static str },
}

pub type BackendResult<T> = Result<T, BackendError>;
