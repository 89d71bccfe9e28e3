//! Parsing, inheritance merging, and validation of PAPR suite documents.

mod doc;
mod error;

pub use doc::{
    BuildDirective, CanonicalSuite, ContainerSpec, EnvSelector, ExtraRepo, HostSpec, HostSpecs,
    OstreeSpec, SuiteParser,
};
pub use error::{ordinal, ParseError, Result};
