//! Parsing of `team/study[#version-sha]` references.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ReferenceError;

/// Shortest accepted version sha prefix.
pub const MIN_SHA_LEN: usize = 6;

/// A reference to a study version on the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReference {
    pub team: String,
    pub study: String,
    /// `None` selects the latest version.
    pub version_sha: Option<String>,
}

impl MergeReference {
    /// Parse a reference. Validation happens entirely locally, so a bad
    /// reference never reaches the network.
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let invalid = || ReferenceError::InvalidFormat(input.to_string());

        let (team, rest) = input.trim().split_once('/').ok_or_else(invalid)?;
        let (study, version_sha) = match rest.split_once('#') {
            Some((study, sha)) => (study, Some(sha)),
            None => (rest, None),
        };

        if team.is_empty() || study.is_empty() || study.contains('/') {
            return Err(invalid());
        }

        if let Some(sha) = version_sha {
            if sha.len() < MIN_SHA_LEN {
                return Err(ReferenceError::ShortSha {
                    sha: sha.to_string(),
                    min: MIN_SHA_LEN,
                });
            }
            if !sha.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(invalid());
            }
        }

        Ok(Self {
            team: team.to_string(),
            study: study.to_string(),
            version_sha: version_sha.map(str::to_string),
        })
    }
}

impl FromStr for MergeReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MergeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.team, self.study)?;
        if let Some(ref sha) = self.version_sha {
            write!(f, "#{}", sha)?;
        }
        Ok(())
    }
}
