//! Utility functions for rendering configuration artifacts in the YAML file format
use std::io::Write;

use serde::ser;
use snafu::{ResultExt, Snafu};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize YAML"))]
    SerializeYaml { source: serde_yaml::Error },

    #[snafu(display("failed to parse bytes as valid UTF-8 string"))]
    ParseUtf8Bytes { source: std::string::FromUtf8Error },
}

/// Serializes the given data structure and writes it to a [`Writer`](Write).
///
/// Alertmanager, amtool and the exporter-toolkit web config all read plain documents, so no
/// leading document separator is written.
///
/// The output is only as deterministic as `T`'s [`Serialize`](ser::Serialize) implementation:
/// structs render in declaration order and [`serde_json::Map`] renders sorted by key.
pub fn serialize<T, W>(value: &T, writer: W) -> Result<()>
where
    T: ser::Serialize,
    W: Write,
{
    let mut serializer = serde_yaml::Serializer::new(writer);
    value
        .serialize(&mut serializer)
        .context(SerializeYamlSnafu)?;

    Ok(())
}

/// Renders `value` as a plain YAML document.
pub fn to_string<T>(value: &T) -> Result<String>
where
    T: ser::Serialize,
{
    let mut buffer = Vec::new();
    serialize(value, &mut buffer)?;
    String::from_utf8(buffer).context(ParseUtf8BytesSnafu)
}
