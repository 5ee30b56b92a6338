use super::ui;
use crate::core::rate::iso8601;
use crate::core::{Snapshot, SourceHealth};
use anyhow::{Context, Result};
use comfy_table::Cell;
use std::collections::BTreeMap;
use std::path::Path;

impl Snapshot {
    /// Renders rates with the health of their source, followed by timestamps.
    pub fn display_as_table(&self) -> String {
        let empty = BTreeMap::new();
        let sources: &BTreeMap<String, SourceHealth> =
            self.meta.as_ref().map_or(&empty, |m| &m.sources);

        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Rate"),
            ui::header_cell("VES per USD"),
            ui::header_cell("Status"),
            ui::header_cell("Detail"),
        ]);

        for rate in &self.rates {
            let health = sources.get(&rate.id);
            let detail = match health {
                Some(SourceHealth {
                    error: Some(error), ..
                }) => Cell::new(ui::style_text(error, ui::StyleType::Error)),
                Some(SourceHealth {
                    updated_at: Some(at),
                    ..
                }) => Cell::new(ui::style_text(&iso8601::format(at), ui::StyleType::Subtle)),
                _ => Cell::new(""),
            };
            table.add_row(vec![
                Cell::new(&rate.name),
                ui::value_cell(rate.value),
                ui::status_cell(health.map(|h| h.ok)),
                detail,
            ]);
        }

        let mut output = format!(
            "{}\n\n",
            ui::style_text("USD/VES rates", ui::StyleType::Title)
        );
        output.push_str(&table.to_string());
        output.push_str(&format!("\n\nUpdated at: {}", iso8601::format(&self.updated_at)));
        match &self.meta {
            Some(meta) => output.push_str(&format!(
                "\nLast attempt: {}",
                iso8601::format(&meta.last_attempt_at)
            )),
            None => output.push_str(&format!(
                "\n{}",
                ui::style_text("Bundled snapshot, no refresh has succeeded yet", ui::StyleType::Subtle)
            )),
        }
        output
    }
}

/// Writes the snapshot as pretty JSON with a trailing newline.
pub fn write_json(snapshot: &Snapshot, output: Option<&Path>) -> Result<()> {
    let mut json = serde_json::to_string_pretty(snapshot)?;
    json.push('\n');

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write snapshot to {}", path.display()))?;
            tracing::info!("Wrote {}", path.display());
        }
        None => print!("{json}"),
    }
    Ok(())
}
