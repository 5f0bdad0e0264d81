use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Pipeline stage an error was raised in. Variants are in running order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Metadata,
    Content,
    Menu,
    PostProcess,
    Packaging,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Metadata => "metadata",
            Stage::Content => "content",
            Stage::Menu => "menu",
            Stage::PostProcess => "post-process",
            Stage::Packaging => "packaging",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url \"{url}\": {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} body exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Fatal conditions of a conversion run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("[metadata] {field} must not be empty")]
    MissingMetadata { field: &'static str },

    #[error("[content] {0}")]
    Fetch(#[from] FetchError),

    #[error("[{stage}] no chapters to {action}")]
    NoChapters { stage: Stage, action: &'static str },

    #[error("[{stage}] manifest already contains an item with {what} \"{value}\"")]
    DuplicateManifestItem {
        stage: Stage,
        what: &'static str,
        value: String,
    },

    #[error("[packaging] book is not ready for packaging: {reason}")]
    IncompleteBook { reason: String },

    #[error("[{stage}] stage requires the {requires} stage to run first")]
    StageOrder { stage: Stage, requires: Stage },

    #[error("[{stage}] stage has already run")]
    StageRepeated { stage: Stage },

    #[error("[packaging] failed to write {} ({}): {source}", path.display(), leftover(present))]
    Write {
        path: PathBuf,
        present: bool,
        #[source]
        source: ArchiveError,
    },
}

fn leftover(present: &bool) -> &'static str {
    if *present {
        "a possibly invalid archive was left behind"
    } else {
        "no archive was produced"
    }
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::MissingMetadata { .. } => Stage::Metadata,
            PipelineError::Fetch(_) => Stage::Content,
            PipelineError::NoChapters { stage, .. }
            | PipelineError::DuplicateManifestItem { stage, .. }
            | PipelineError::StageOrder { stage, .. }
            | PipelineError::StageRepeated { stage } => *stage,
            PipelineError::IncompleteBook { .. } | PipelineError::Write { .. } => Stage::Packaging,
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
