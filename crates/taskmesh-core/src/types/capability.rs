//! Capability vocabulary
//!
//! The fixed set of tags describing what a worker can do. Strings appear
//! only at the wire boundary; everywhere else the tagged enum is used.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A worker specialization tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    DataAnalysis,
    WebScraping,
    CodeGeneration,
    FileProcessing,
    DatabaseOperations,
    ApiIntegration,
}

/// Raised when a wire string does not name a known capability.
#[derive(Debug, Clone, Error)]
#[error("unknown capability: {0}")]
pub struct UnknownCapability(pub String);

impl Capability {
    /// The full vocabulary, in declaration order.
    pub const ALL: [Capability; 6] = [
        Capability::DataAnalysis,
        Capability::WebScraping,
        Capability::CodeGeneration,
        Capability::FileProcessing,
        Capability::DatabaseOperations,
        Capability::ApiIntegration,
    ];

    /// Wire form of the capability.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::DataAnalysis => "data_analysis",
            Capability::WebScraping => "web_scraping",
            Capability::CodeGeneration => "code_generation",
            Capability::FileProcessing => "file_processing",
            Capability::DatabaseOperations => "database_operations",
            Capability::ApiIntegration => "api_integration",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "data_analysis" => Ok(Capability::DataAnalysis),
            "web_scraping" => Ok(Capability::WebScraping),
            "code_generation" => Ok(Capability::CodeGeneration),
            "file_processing" => Ok(Capability::FileProcessing),
            "database_operations" => Ok(Capability::DatabaseOperations),
            "api_integration" => Ok(Capability::ApiIntegration),
            other => Err(UnknownCapability(other.to_string())),
        }
    }
}
