pub mod docker;

use thiserror::Error;

pub use docker::{DockerLogSource, LogStreamOptions, descriptor_from_inspect, split_timestamp};

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Docker connection failed: {0}")]
    ConnectionFailed(#[from] bollard::errors::Error),
    #[error("Container inspection failed for {0}: incomplete response")]
    IncompleteInspect(String),
    #[error("Collection stopped")]
    CollectionStopped,
}
