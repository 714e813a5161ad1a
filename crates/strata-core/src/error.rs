use std::io;
use std::path::PathBuf;

/// Errors surfaced while building file graphs, archives and layers.
///
/// None of them is retried: every input is local, so a second attempt
/// would fail the same way.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed accessing path {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error(
        "the file '{destination}' already exists in the graph with {attribute} '{existing}' from '{existing_source}' while it is added again with {attribute} '{incoming}' by '{incoming_source}'"
    )]
    Conflict {
        destination: String,
        attribute: &'static str,
        existing: String,
        existing_source: String,
        incoming: String,
        incoming_source: String,
    },
    #[error("invalid rule for {path}: {message}")]
    Rule { path: String, message: String },
    #[error("cannot archive {}: {reason}", .path.display())]
    Unsupported { path: PathBuf, reason: String },
    #[error("the maximum number of layers must be at least 1 (got {0})")]
    InvalidLayerCount(usize),
    #[error("failed to write the tar stream: {0}")]
    Archive(#[source] io::Error),
    #[error("the tar producer stopped before the end of the stream")]
    ProducerLost,
    #[error("failed to start the layer workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl BuildError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Recovers a `BuildError` that travelled through an `io::Error`, e.g.
    /// out of [`crate::archive::TarStream`].
    pub fn from_stream(err: io::Error) -> Self {
        if err
            .get_ref()
            .is_some_and(|inner| inner.is::<BuildError>())
        {
            return err
                .into_inner()
                .and_then(|inner| inner.downcast::<BuildError>().ok())
                .map_or(Self::ProducerLost, |inner| *inner);
        }
        Self::Archive(err)
    }
}
