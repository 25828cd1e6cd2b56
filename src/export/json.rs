use anyhow::Result;
use std::io::Write;

use crate::trace::Discovery;

/// Export a discovery run as JSON
pub fn export_json<W: Write>(discovery: &Discovery, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, discovery)?;
    Ok(())
}
