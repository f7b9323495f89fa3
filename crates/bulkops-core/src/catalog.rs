//! Environment catalog: projects, their environments, systems and
//! connections, loaded from YAML.
//!
//! Ids are optional in the file. A missing id is derived from names with
//! UUID v5 (`project/env`, `project/env/system`, ...), so renaming an entry
//! changes its id and nothing else does, and equal names in different
//! projects never share an id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{BulkError, Result};

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct System {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl System {
    pub fn has_connection(&self, name: &str) -> bool {
        self.connections.iter().any(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: Uuid,
    pub name: String,
    pub project_id: Uuid,
    #[serde(default)]
    pub systems: Vec<System>,
}

impl Environment {
    pub fn system(&self, id: Uuid) -> Option<&System> {
        self.systems.iter().find(|s| s.id == id)
    }

    pub fn has_connection(&self, name: &str) -> bool {
        self.systems.iter().any(|s| s.has_connection(name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub environments: Vec<Environment>,
}

/// One environment, optionally narrowed to a single system.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub environment: Environment,
    pub system: Option<System>,
}

impl Target {
    pub fn environment(environment: Environment) -> Self {
        Self {
            environment,
            system: None,
        }
    }

    pub fn narrowed(environment: Environment, system: System) -> Self {
        Self {
            environment,
            system: Some(system),
        }
    }

    /// Stable id: the system id when narrowed, else the environment id.
    pub fn id(&self) -> Uuid {
        self.system.as_ref().map_or(self.environment.id, |s| s.id)
    }

    pub fn display_name(&self) -> String {
        match &self.system {
            Some(system) => format!("{}/{}", self.environment.name, system.name),
            None => self.environment.name.clone(),
        }
    }

    pub fn has_connection(&self, name: &str) -> bool {
        match &self.system {
            Some(system) => system.has_connection(name),
            None => self.environment.has_connection(name),
        }
    }
}

// ---------------------------------------------------------------------------
// Deterministic ids
// ---------------------------------------------------------------------------

pub fn project_id_for(name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("project:{name}").as_bytes())
}

pub fn environment_id_for(project: &str, env: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{project}/{env}").as_bytes())
}

pub fn system_id_for(project: &str, env: &str, system: &str) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{project}/{env}/{system}").as_bytes(),
    )
}

pub fn connection_id_for(project: &str, env: &str, system: &str, connection: &str) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{project}/{env}/{system}/{connection}").as_bytes(),
    )
}

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    projects: Vec<ProjectEntry>,
}

#[derive(Debug, Deserialize)]
struct ProjectEntry {
    #[serde(default)]
    id: Option<Uuid>,
    name: String,
    #[serde(default)]
    environments: Vec<EnvironmentEntry>,
}

#[derive(Debug, Deserialize)]
struct EnvironmentEntry {
    #[serde(default)]
    id: Option<Uuid>,
    name: String,
    #[serde(default)]
    systems: Vec<SystemEntry>,
}

#[derive(Debug, Deserialize)]
struct SystemEntry {
    #[serde(default)]
    id: Option<Uuid>,
    name: String,
    #[serde(default)]
    connections: Vec<ConnectionEntry>,
}

#[derive(Debug, Deserialize)]
struct ConnectionEntry {
    #[serde(default)]
    id: Option<Uuid>,
    name: String,
    #[serde(default)]
    parameters: BTreeMap<String, String>,
}

impl CatalogFile {
    fn into_projects(self) -> Vec<Project> {
        self.projects
            .into_iter()
            .map(|p| {
                let project_name = p.name;
                let project_id = p.id.unwrap_or_else(|| project_id_for(&project_name));
                let environments = p
                    .environments
                    .into_iter()
                    .map(|e| {
                        let env_name = e.name;
                        let systems = e
                            .systems
                            .into_iter()
                            .map(|s| System {
                                id: s.id.unwrap_or_else(|| system_id_for(&project_name, &env_name, &s.name)),
                                connections: s
                                    .connections
                                    .into_iter()
                                    .map(|c| Connection {
                                        id: c.id.unwrap_or_else(|| {
                                            connection_id_for(&project_name, &env_name, &s.name, &c.name)
                                        }),
                                        name: c.name,
                                        parameters: c.parameters,
                                    })
                                    .collect(),
                                name: s.name,
                            })
                            .collect();
                        Environment {
                            id: e.id.unwrap_or_else(|| environment_id_for(&project_name, &env_name)),
                            name: env_name,
                            project_id,
                            systems,
                        }
                    })
                    .collect();
                Project {
                    id: project_id,
                    name: project_name,
                    environments,
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// TargetResolver
// ---------------------------------------------------------------------------

/// Directory of environments and systems belonging to projects.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    /// Environments of `project_id`, in catalog order.
    async fn list_targets(&self, project_id: Uuid) -> Result<Vec<Environment>>;

    async fn project_name(&self, project_id: Uuid) -> Result<String>;

    async fn environment_name(&self, environment_id: Uuid) -> Result<String>;

    async fn system_name(&self, environment_id: Uuid, system_id: Uuid) -> Result<String>;
}

/// YAML-backed catalog. File-backed catalogs are re-read on every lookup so
/// edits take effect without a restart.
#[derive(Debug, Clone)]
pub struct YamlCatalog {
    path: Option<PathBuf>,
    projects: Arc<Vec<Project>>,
}

impl YamlCatalog {
    /// Parse a catalog document held in memory.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(Self {
            path: None,
            projects: Arc::new(parse(yaml)?),
        })
    }

    pub fn from_projects(projects: Vec<Project>) -> Self {
        Self {
            path: None,
            projects: Arc::new(projects),
        }
    }

    /// Open a file-backed catalog. The file is read once here so a broken
    /// catalog fails fast at startup.
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            BulkError::Resolution(format!("cannot read catalog {}: {e}", path.display()))
        })?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            projects: Arc::new(parse(&data)?),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current view of all projects.
    pub async fn projects(&self) -> Result<Arc<Vec<Project>>> {
        let Some(path) = &self.path else {
            return Ok(self.projects.clone());
        };
        let data = tokio::fs::read_to_string(path).await.map_err(|e| {
            BulkError::Resolution(format!("cannot read catalog {}: {e}", path.display()))
        })?;
        let projects = parse(&data).map_err(|e| BulkError::Resolution(e.to_string()))?;
        Ok(Arc::new(projects))
    }

    pub async fn project(&self, project_id: Uuid) -> Result<Project> {
        self.projects()
            .await?
            .iter()
            .find(|p| p.id == project_id)
            .cloned()
            .ok_or_else(|| BulkError::ProjectNotFound(project_id.to_string()))
    }

    async fn find_environment(&self, environment_id: Uuid) -> Result<Environment> {
        self.projects()
            .await?
            .iter()
            .flat_map(|p| p.environments.iter())
            .find(|e| e.id == environment_id)
            .cloned()
            .ok_or_else(|| BulkError::EnvironmentNotFound(environment_id.to_string()))
    }
}

fn parse(yaml: &str) -> Result<Vec<Project>> {
    let file: CatalogFile = serde_yaml::from_str(yaml)?;
    Ok(file.into_projects())
}

#[async_trait]
impl TargetResolver for YamlCatalog {
    async fn list_targets(&self, project_id: Uuid) -> Result<Vec<Environment>> {
        let project = self.project(project_id).await?;
        Ok(project.environments)
    }

    async fn project_name(&self, project_id: Uuid) -> Result<String> {
        Ok(self.project(project_id).await?.name)
    }

    async fn environment_name(&self, environment_id: Uuid) -> Result<String> {
        Ok(self.find_environment(environment_id).await?.name)
    }

    async fn system_name(&self, environment_id: Uuid, system_id: Uuid) -> Result<String> {
        let env = self.find_environment(environment_id).await?;
        env.system(system_id)
            .map(|s| s.name.clone())
            .ok_or_else(|| BulkError::SystemNotFound {
                environment: env.name.clone(),
                system: system_id.to_string(),
            })
    }
}

/// Example catalog written by `bulkops config init`.
pub const EXAMPLE_CATALOG: &str = r#"projects:
  - name: billing
    environments:
      - name: billing-qa1
        systems:
          - name: billing-db
            connections:
              - name: db
                parameters:
                  url: postgres://billing-qa1.internal:5432/billing
          - name: billing-api
            connections:
              - name: http
                parameters:
                  url: https://billing-qa1.internal
      - name: billing-qa2
        systems:
          - name: billing-db
            connections:
              - name: db
                parameters:
                  url: postgres://billing-qa2.internal:5432/billing
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn derives_ids_from_names() {
        let catalog = YamlCatalog::from_yaml(EXAMPLE_CATALOG).unwrap();
        let project = &catalog.projects[0];
        assert_eq!(project.id, project_id_for("billing"));
        let env = &project.environments[0];
        assert_eq!(env.id, environment_id_for("billing", "billing-qa1"));
        assert_eq!(env.project_id, project.id);
        assert_eq!(env.systems[0].id, system_id_for("billing", "billing-qa1", "billing-db"));
        assert_eq!(
            env.systems[0].connections[0].id,
            connection_id_for("billing", "billing-qa1", "billing-db", "db")
        );
    }

    #[test]
    fn same_system_name_in_two_environments_gets_distinct_ids() {
        let catalog = YamlCatalog::from_yaml(EXAMPLE_CATALOG).unwrap();
        let envs = &catalog.projects[0].environments;
        assert_ne!(envs[0].systems[0].id, envs[1].systems[0].id);
    }

    #[tokio::test]
    async fn shared_environment_names_stay_apart_across_projects() {
        let yaml = r#"
projects:
  - name: billing
    environments:
      - name: qa
        systems:
          - name: db
  - name: payroll
    environments:
      - name: qa
        systems:
          - name: db
          - name: api
"#;
        let catalog = YamlCatalog::from_yaml(yaml).unwrap();
        let billing = &catalog.projects[0].environments[0];
        let payroll = &catalog.projects[1].environments[0];
        assert_ne!(billing.id, payroll.id);
        assert_ne!(billing.systems[0].id, payroll.systems[0].id);

        assert_eq!(catalog.environment_name(payroll.id).await.unwrap(), "qa");
        let api = payroll.systems[1].id;
        assert_eq!(catalog.system_name(payroll.id, api).await.unwrap(), "api");
        let err = catalog.system_name(billing.id, api).await.unwrap_err();
        assert!(matches!(err, BulkError::SystemNotFound { .. }));
    }

    #[test]
    fn explicit_ids_win() {
        let yaml = r#"
projects:
  - id: 00000000-0000-0000-0000-0000000000aa
    name: p
    environments:
      - id: 00000000-0000-0000-0000-0000000000bb
        name: e
"#;
        let catalog = YamlCatalog::from_yaml(yaml).unwrap();
        let env = &catalog.projects[0].environments[0];
        assert_eq!(env.id.to_string(), "00000000-0000-0000-0000-0000000000bb");
        assert_eq!(env.project_id.to_string(), "00000000-0000-0000-0000-0000000000aa");
    }

    #[test]
    fn target_names_and_connections() {
        let catalog = YamlCatalog::from_yaml(EXAMPLE_CATALOG).unwrap();
        let env = catalog.projects[0].environments[0].clone();
        let api = env.systems[1].clone();
        let whole = Target::environment(env.clone());
        assert_eq!(whole.display_name(), "billing-qa1");
        assert_eq!(whole.id(), env.id);
        assert!(whole.has_connection("db"));

        let narrowed = Target::narrowed(env, api.clone());
        assert_eq!(narrowed.display_name(), "billing-qa1/billing-api");
        assert_eq!(narrowed.id(), api.id);
        assert!(!narrowed.has_connection("db"));
    }

    #[tokio::test]
    async fn resolver_lookups() {
        let catalog = YamlCatalog::from_yaml(EXAMPLE_CATALOG).unwrap();
        let project_id = project_id_for("billing");
        let envs = catalog.list_targets(project_id).await.unwrap();
        assert_eq!(envs.len(), 2);
        assert_eq!(catalog.project_name(project_id).await.unwrap(), "billing");
        assert_eq!(
            catalog.environment_name(envs[1].id).await.unwrap(),
            "billing-qa2"
        );
        let system = envs[0].systems[1].id;
        assert_eq!(
            catalog.system_name(envs[0].id, system).await.unwrap(),
            "billing-api"
        );
    }

    #[tokio::test]
    async fn unknown_project_is_error() {
        let catalog = YamlCatalog::from_yaml(EXAMPLE_CATALOG).unwrap();
        let err = catalog.list_targets(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, BulkError::ProjectNotFound(_)));
    }

    #[tokio::test]
    async fn unknown_system_is_error() {
        let catalog = YamlCatalog::from_yaml(EXAMPLE_CATALOG).unwrap();
        let env = environment_id_for("billing", "billing-qa2");
        let err = catalog.system_name(env, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, BulkError::SystemNotFound { .. }));
    }

    #[tokio::test]
    async fn file_backed_catalog_sees_edits() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(&path, "projects:\n  - name: alpha\n").unwrap();
        let catalog = YamlCatalog::open(&path).unwrap();
        let alpha = project_id_for("alpha");
        assert!(catalog.list_targets(alpha).await.unwrap().is_empty());

        std::fs::write(
            &path,
            "projects:\n  - name: alpha\n    environments:\n      - name: a1\n",
        )
        .unwrap();
        assert_eq!(catalog.list_targets(alpha).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn vanished_catalog_file_is_resolution_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(&path, "projects: []\n").unwrap();
        let catalog = YamlCatalog::open(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        let err = catalog.list_targets(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, BulkError::Resolution(_)));
    }
}
