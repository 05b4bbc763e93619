//! Parsers that turn bundle files into typed objects.
//!
//! The coordinator only fetches bytes; building schema and runtime
//! configuration objects is left to these collaborators.

use crate::error::BoxError;

/// Builds a runtime configuration from a bundle file.
pub trait ConfigParser {
    type Config;
    /// Whatever the parser needs to resolve further resources.
    type Loader: ?Sized;

    fn parse_config(
        &self,
        loader: &Self::Loader,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<Self::Config, BoxError>;
}

/// Builds a schema from a bundle file, given the runtime configuration it
/// belongs to.
pub trait SchemaParser {
    type Schema;
    type Config;
    type Loader: ?Sized;

    fn parse_schema(
        &self,
        config: &Self::Config,
        loader: &Self::Loader,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<Self::Schema, BoxError>;
}
