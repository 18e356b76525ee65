//! `stagehand config` - print the effective configuration.

use anyhow::Result;
use console::style;

use stagehand_infra::config::{render_config, CONFIG_FILE_NAME};

use crate::state::AppState;

pub fn show_config(state: &AppState, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&*state.config)?);
        return Ok(());
    }

    let path = state.data_dir.join(CONFIG_FILE_NAME);
    println!(
        "{}",
        style(format!("# effective configuration ({})", path.display())).dim()
    );
    print!("{}", render_config(&state.config)?);
    Ok(())
}
