use crate::output::{print_json, print_table};
use anyhow::Context;
use bulkops_core::catalog::{Environment, Project, YamlCatalog};
use bulkops_core::config::Config;
use clap::Subcommand;
use std::path::Path;
use uuid::Uuid;

#[derive(Subcommand)]
pub enum CatalogSubcommand {
    /// List projects
    Projects,

    /// List the environments and systems of one project
    Targets {
        /// Project id or name
        project: String,
    },
}

pub fn run(root: &Path, subcmd: CatalogSubcommand, json: bool) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let projects = rt.block_on(load_projects(root))?;
    match subcmd {
        CatalogSubcommand::Projects => list_projects(&projects, json),
        CatalogSubcommand::Targets { project } => {
            let project = find_project(&projects, &project)?;
            list_targets(project, json)
        }
    }
}

/// Load the catalog the config at `root` points at.
pub async fn load_projects(root: &Path) -> anyhow::Result<Vec<Project>> {
    let config = Config::load(root).context("failed to load config")?;
    let path = config.catalog_path(root);
    let catalog = YamlCatalog::open(&path)
        .with_context(|| format!("failed to open catalog {}", path.display()))?;
    Ok(catalog.projects().await?.as_ref().clone())
}

/// Find a project by id or by name.
pub fn find_project<'a>(projects: &'a [Project], key: &str) -> anyhow::Result<&'a Project> {
    let id = Uuid::parse_str(key).ok();
    projects
        .iter()
        .find(|p| Some(p.id) == id || p.name == key)
        .with_context(|| format!("project not found: {key}"))
}

/// Find an environment of `project` by id or by name.
pub fn find_environment<'a>(project: &'a Project, key: &str) -> anyhow::Result<&'a Environment> {
    let id = Uuid::parse_str(key).ok();
    project
        .environments
        .iter()
        .find(|e| Some(e.id) == id || e.name == key)
        .with_context(|| format!("environment not found in {}: {key}", project.name))
}

fn list_projects(projects: &[Project], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&projects);
    }
    let rows = projects
        .iter()
        .map(|p| {
            vec![
                p.name.clone(),
                p.id.to_string(),
                p.environments.len().to_string(),
            ]
        })
        .collect();
    print_table(&["PROJECT", "ID", "ENVIRONMENTS"], rows);
    Ok(())
}

fn list_targets(project: &Project, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&project.environments);
    }
    let mut rows = Vec::new();
    for env in &project.environments {
        if env.systems.is_empty() {
            rows.push(vec![env.name.clone(), "-".into(), env.id.to_string(), String::new()]);
        }
        for system in &env.systems {
            let connections: Vec<_> = system.connections.iter().map(|c| c.name.as_str()).collect();
            rows.push(vec![
                env.name.clone(),
                system.name.clone(),
                system.id.to_string(),
                connections.join(","),
            ]);
        }
    }
    print_table(&["ENVIRONMENT", "SYSTEM", "ID", "CONNECTIONS"], rows);
    Ok(())
}
