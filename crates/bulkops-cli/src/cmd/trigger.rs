//! Operator client for `/ws/bulk/{action}`: one frame out, every frame the
//! server sends printed until the session closes.

use crate::cmd::catalog::{find_environment, find_project, load_projects};
use crate::output::print_json_line;
use anyhow::Context;
use bulkops_core::config::{Config, ServerConfig};
use bulkops_core::request::BulkActionConfig;
use bulkops_core::types::{ActionResult, CloseStatus, StatusFrame};
use clap::Args;
use futures::{SinkExt, StreamExt};
use std::path::Path;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Keys of the request frame that `--param` may not override.
const RESERVED_KEYS: &[&str] = &[
    "projectId",
    "environmentId",
    "systemId",
    "executeInParallel",
    "sendResult",
    "recipients",
];

#[derive(Args)]
pub struct TriggerArgs {
    /// Action name, as configured under `actions:`
    pub action: String,

    /// Project id or name
    #[arg(long)]
    pub project: String,

    /// Restrict the run to one environment (id or name)
    #[arg(long)]
    pub environment: Option<String>,

    /// Restrict the run to one system (id, or `environment/system`)
    #[arg(long)]
    pub system: Option<String>,

    /// Run targets concurrently instead of one after another
    #[arg(long)]
    pub parallel: bool,

    /// Ask the server to send a report once the run finishes
    #[arg(long)]
    pub send_result: bool,

    /// Report recipient (repeatable)
    #[arg(long = "recipient", value_name = "ADDR")]
    pub recipients: Vec<String>,

    /// Extra action parameter; the value is parsed as JSON when it can be
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, serde_json::Value)>,

    /// Server URL (default: ws://127.0.0.1:<server.port>/ws/bulk/<action>)
    #[arg(long)]
    pub url: Option<String>,
}

fn parse_param(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub fn run(root: &Path, args: TriggerArgs, json: bool) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(trigger(root, args, json))
}

async fn trigger(root: &Path, args: TriggerArgs, json: bool) -> anyhow::Result<()> {
    let url = match &args.url {
        Some(url) => url.clone(),
        None => default_url(root, &args.action),
    };
    let request = build_request(root, &args).await?;
    let frame = serde_json::to_string(&request)?;
    tracing::debug!(%url, %frame, "starting bulk run");

    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .with_context(|| format!("cannot connect to {url}"))?;
    ws.send(Message::Text(frame.into()))
        .await
        .context("failed to send request frame")?;

    let mut close_code = None;
    while let Some(msg) = ws.next().await {
        match msg.context("websocket receive failed")? {
            Message::Text(text) => print_frame(text.as_str(), json)?,
            Message::Close(frame) => {
                close_code = Some(frame.map_or(CloseStatus::Normal.code(), |f| u16::from(f.code)));
                break;
            }
            _ => {}
        }
    }

    match close_code {
        Some(code) if code == CloseStatus::Normal.code() => Ok(()),
        Some(code) => anyhow::bail!("server closed the session with code {code}"),
        None => anyhow::bail!("connection ended without a close frame"),
    }
}

fn default_url(root: &Path, action: &str) -> String {
    let port = Config::load(root)
        .map(|c| c.server.port)
        .unwrap_or_else(|_| ServerConfig::default().port);
    format!("ws://127.0.0.1:{port}/ws/bulk/{action}")
}

/// Build the request frame. The catalog is consulted only when a project,
/// environment or system is given by name.
async fn build_request(root: &Path, args: &TriggerArgs) -> anyhow::Result<BulkActionConfig> {
    let mut request = match ids_only(args) {
        Some((project, environment, system)) => {
            let mut request = BulkActionConfig::for_project(project);
            request.environment_id = environment;
            request.system_id = system;
            request
        }
        None => resolve_names(root, args).await?,
    };

    request.execute_in_parallel = args.parallel;
    request.send_result = args.send_result;
    request.recipients = args.recipients.clone();
    for (key, value) in &args.params {
        if RESERVED_KEYS.contains(&key.as_str()) {
            anyhow::bail!("--param {key} collides with a request field");
        }
        request.params.insert(key.clone(), value.clone());
    }
    Ok(request)
}

type Ids = (Uuid, Option<Uuid>, Option<Uuid>);

fn ids_only(args: &TriggerArgs) -> Option<Ids> {
    let parse = |key: &Option<String>| match key {
        Some(k) => Uuid::parse_str(k).ok().map(Some),
        None => Some(None),
    };
    Some((
        Uuid::parse_str(&args.project).ok()?,
        parse(&args.environment)?,
        parse(&args.system)?,
    ))
}

async fn resolve_names(root: &Path, args: &TriggerArgs) -> anyhow::Result<BulkActionConfig> {
    let projects = load_projects(root).await?;
    let project = find_project(&projects, &args.project)?;
    let mut request = BulkActionConfig::for_project(project.id);

    let mut environment = match &args.environment {
        Some(key) => Some(find_environment(project, key)?),
        None => None,
    };

    if let Some(key) = &args.system {
        request.system_id = Some(match Uuid::parse_str(key) {
            Ok(id) => id,
            Err(_) => {
                let (env, name) = match key.split_once('/') {
                    Some((env, name)) => {
                        let env = find_environment(project, env)?;
                        if environment.is_some_and(|e| e.id != env.id) {
                            anyhow::bail!("--system {key} is outside --environment");
                        }
                        environment = Some(env);
                        (env, name)
                    }
                    None => {
                        let env = environment
                            .context("--system by name needs --environment or env/system")?;
                        (env, key.as_str())
                    }
                };
                env.systems
                    .iter()
                    .find(|s| s.name == name)
                    .map(|s| s.id)
                    .with_context(|| format!("system not found in {}: {name}", env.name))?
            }
        });
    }

    request.environment_id = environment.map(|e| e.id);
    Ok(request)
}

fn print_frame(text: &str, json: bool) -> anyhow::Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(text).with_context(|| format!("unexpected frame: {text}"))?;
    if json {
        return print_json_line(&value);
    }
    if value.get("status").is_some() {
        let frame: StatusFrame = serde_json::from_value(value)?;
        println!("run {}: {}", frame.id, frame.status);
    } else {
        let result: ActionResult = serde_json::from_value(value)?;
        let target = match &result.system_name {
            Some(system) => format!("{}/{system}", result.environment_name),
            None => result.environment_name.clone(),
        };
        let mark = if result.success { "ok  " } else { "FAIL" };
        println!("{mark} {target}: {}", result.message);
    }
    Ok(())
}
