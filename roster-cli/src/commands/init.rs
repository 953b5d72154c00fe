//! `roster init`

use anyhow::{Context, Result};
use clap::Args;

use roster_core::settings;

use super::home_dir;

/// Scaffold the global settings file. Existing settings are left untouched.
#[derive(Args, Debug)]
pub struct InitArgs {}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let (loaded, created) =
            settings::init_at(&home).context("failed to initialize ~/.roster/config.yaml")?;

        if created {
            println!("✓ Created {}", settings::settings_path_at(&home).display());
        } else {
            println!(
                "✓ Already initialized: {}",
                settings::settings_path_at(&home).display()
            );
        }
        println!(
            "  delete batch {} | update batch {} | update workers {} | service '{}'",
            loaded.delete_batch_size,
            loaded.update_batch_size,
            loaded.update_concurrency,
            loaded.service_name
        );
        println!("Next: roster institution add <id> --name <name> --endpoint <url> --username <user>");
        Ok(())
    }
}
