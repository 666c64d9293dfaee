//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init {
            path,
            force,
            resolved,
        } => {
            let path = path.unwrap_or_else(linkmon_config::config_path);
            if resolved {
                let cfg = super::load(global)?;
                cfg.to_monitor_config()?;
                linkmon_config::save_config(&cfg, &path, force)?;
            } else {
                linkmon_config::write_default_config(&path, force)?;
            }
            eprintln!("Wrote {}", path.display());
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = super::load(global)?;
            // Surface translation errors here rather than at serve time.
            cfg.to_monitor_config()?;
            print!("{}", toml::to_string_pretty(&cfg)?);
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", linkmon_config::config_path().display());
            Ok(())
        }
    }
}
