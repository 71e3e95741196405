//! Stage and artifact naming shared across crates.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One step of the remix pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Trim,
    Transcode,
    Separate,
    Merge,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Trim => "trim",
            Stage::Transcode => "transcode",
            Stage::Separate => "separate",
            Stage::Merge => "merge",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which of the two submitted tracks a stage is working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrackRole {
    Instrumental,
    Vocals,
}

impl TrackRole {
    pub const ALL: [TrackRole; 2] = [TrackRole::Instrumental, TrackRole::Vocals];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackRole::Instrumental => "instrumental",
            TrackRole::Vocals => "vocals",
        }
    }
}

impl fmt::Display for TrackRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Owner of a local artifact within a job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactRole {
    Instrumental,
    Vocals,
    /// The mixed output
    Mix,
}

impl ArtifactRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactRole::Instrumental => "instrumental",
            ArtifactRole::Vocals => "vocals",
            ArtifactRole::Mix => "mix",
        }
    }
}

impl From<TrackRole> for ArtifactRole {
    fn from(role: TrackRole) -> Self {
        match role {
            TrackRole::Instrumental => ArtifactRole::Instrumental,
            TrackRole::Vocals => ArtifactRole::Vocals,
        }
    }
}

/// Published artifacts other than the final remix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntermediateArtifact {
    TrimmedInstrumental,
    TrimmedVocals,
}

impl IntermediateArtifact {
    pub fn trimmed(role: TrackRole) -> Self {
        match role {
            TrackRole::Instrumental => IntermediateArtifact::TrimmedInstrumental,
            TrackRole::Vocals => IntermediateArtifact::TrimmedVocals,
        }
    }

    /// Key in the job's `intermediate_urls` map.
    pub fn key(&self) -> &'static str {
        match self {
            IntermediateArtifact::TrimmedInstrumental => "trimmed_instrumental",
            IntermediateArtifact::TrimmedVocals => "trimmed_vocals",
        }
    }

    /// Object name under the job's publish prefix.
    pub fn file_name(&self) -> &'static str {
        match self {
            IntermediateArtifact::TrimmedInstrumental => "instrumental_trimmed.mp3",
            IntermediateArtifact::TrimmedVocals => "vocals_trimmed.mp3",
        }
    }
}

/// Object name of the final remix under the job's publish prefix.
pub const REMIX_FILE_NAME: &str = "remix.mp3";
