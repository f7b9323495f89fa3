use crate::output::print_json;
use anyhow::Context;
use bulkops_core::catalog::EXAMPLE_CATALOG;
use bulkops_core::config::{Config, WarnLevel};
use bulkops_core::{io, paths};
use clap::Subcommand;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Write a default config, an example catalog and placeholder scripts
    Init,

    /// Print the effective config
    Show,

    /// Validate the config for common mistakes
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Init => init(root, json),
        ConfigSubcommand::Show => show(root, json),
        ConfigSubcommand::Validate => validate(root, json),
    }
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

const PLACEHOLDER_SCRIPT: &str = r#"#!/bin/sh
# bulkops action: {name}
#
# Runs once per target. The run description arrives as JSON on stdin and
# BULKOPS_* variables name the target. A JSON object printed on stdout is
# attached to the result; a non-zero exit marks the target as unsuccessful.
echo "{name}: $BULKOPS_ENVIRONMENT_NAME" >&2
echo '{}'
"#;

fn init(root: &Path, json: bool) -> anyhow::Result<()> {
    let config_path = paths::config_path(root);
    let mut created: Vec<PathBuf> = Vec::new();

    let config = if config_path.exists() {
        Config::load(root).context("failed to load existing config")?
    } else {
        let config = Config::new();
        config.save(root).context("failed to write config")?;
        created.push(config_path);
        config
    };

    let catalog_path = config.catalog_path(root);
    if io::write_if_missing(&catalog_path, EXAMPLE_CATALOG.as_bytes())
        .with_context(|| format!("failed to write {}", catalog_path.display()))?
    {
        created.push(catalog_path);
    }

    let actions_dir = paths::actions_dir(root);
    for (name, action) in &config.actions {
        let script = root.join(&action.command);
        if !script.starts_with(&actions_dir) {
            continue;
        }
        let body = PLACEHOLDER_SCRIPT.replace("{name}", name);
        if io::install_script(&script, &body)
            .with_context(|| format!("failed to write {}", script.display()))?
        {
            created.push(script);
        }
    }

    if json {
        let created: Vec<_> = created.iter().map(|p| p.display().to_string()).collect();
        print_json(&serde_json::json!({ "created": created }))?;
    } else if created.is_empty() {
        println!("Already initialized: {}", paths::bulkops_dir(root).display());
    } else {
        for path in &created {
            println!("created {}", path.display());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    if json {
        print_json(&config)
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let warnings = config.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
