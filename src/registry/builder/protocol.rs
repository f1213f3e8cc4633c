//! Builder-to-worker message protocol
//!
//! Request: `{"sourceFile": "/abs/path.js"}`
//! Success reply: `{"sourceFile": "/abs/path.js", "annotations": [...]}`
//! Failure reply: `{"error": true, "message": "..."}`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::registry::annotation::Annotation;
use crate::registry::error::BuildError;

/// Task handed to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    pub source_file: PathBuf,
}

/// What went wrong in a failed reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// Reading the source file failed
    Read,
    /// Annotation arguments were malformed
    AnnotationParse,
    /// Anything else, including a worker that panicked
    #[default]
    Worker,
}

/// Worker reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerReply {
    Annotations {
        #[serde(rename = "sourceFile")]
        source_file: PathBuf,
        annotations: Vec<Annotation>,
    },
    Failure {
        error: bool,
        message: String,
        #[serde(default, rename = "sourceFile", skip_serializing_if = "Option::is_none")]
        source_file: Option<PathBuf>,
        #[serde(default)]
        kind: FailureKind,
    },
}

impl WorkerReply {
    pub fn annotations(source_file: PathBuf, annotations: Vec<Annotation>) -> Self {
        WorkerReply::Annotations {
            source_file,
            annotations,
        }
    }

    pub fn failure(kind: FailureKind, source_file: Option<PathBuf>, message: impl Into<String>) -> Self {
        WorkerReply::Failure {
            error: true,
            message: message.into(),
            source_file,
            kind,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, WorkerReply::Failure { .. })
    }

    /// Convert a failure reply back into the build error it reports
    pub fn into_build_error(self) -> Option<BuildError> {
        match self {
            WorkerReply::Annotations { .. } => None,
            WorkerReply::Failure {
                message,
                source_file,
                kind,
                ..
            } => Some(match (kind, source_file) {
                (FailureKind::Read, Some(path)) => BuildError::Scan { path, message },
                (FailureKind::AnnotationParse, Some(file)) => {
                    BuildError::AnnotationParse { file, message }
                }
                _ => BuildError::WorkerFailure(message),
            }),
        }
    }
}
