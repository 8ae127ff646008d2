//! Citation utilities: `docket citations`.

use anyhow::{Context, Result};
use docket::citation::extract_citations;

use super::super::CitationCommands;

pub fn cmd_citations(command: CitationCommands) -> Result<()> {
    match command {
        CitationCommands::Extract { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let citations = extract_citations(&text);
            println!("{}", serde_json::to_string_pretty(&citations)?);
        }
    }
    Ok(())
}
