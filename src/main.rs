use bizdesk::cache::ReadMode;
use bizdesk::resources::descriptor::{CREATE, DELETE, GET, LIST, UPDATE};
use bizdesk::{logging, ApiError, Config, DataClient, ListQuery, Registration, Resource};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bizdesk")]
#[command(about = "Command-line client for the business-management API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/bizdesk/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Sign in and store the session
  Login {
    email: String,
    #[arg(short, long)]
    password: String,
  },
  /// Create a user together with a new tenant
  Register {
    email: String,
    #[arg(short, long)]
    password: String,
    #[arg(long)]
    tenant_name: String,
    #[arg(long)]
    company_name: String,
    #[arg(long)]
    first_name: Option<String>,
    #[arg(long)]
    last_name: Option<String>,
  },
  /// End the session
  Logout,
  /// Show the signed-in user and session state
  Whoami,
  /// List resource families and the operations they support
  Resources,
  /// List entities of a family
  List {
    resource: Resource,
    #[arg(long)]
    page: Option<u32>,
    #[arg(long)]
    page_size: Option<u32>,
    #[arg(short, long)]
    search: Option<String>,
    /// Extra filter as name=value (repeatable)
    #[arg(short, long, value_parser = parse_filter)]
    filter: Vec<(String, String)>,
  },
  /// Fetch one entity
  Get { resource: Resource, id: String },
  /// Create an entity from a JSON payload
  Create {
    resource: Resource,
    #[arg(short, long)]
    data: String,
  },
  /// Update an entity with a partial JSON payload
  Update {
    resource: Resource,
    id: String,
    #[arg(short, long)]
    data: String,
  },
  /// Delete an entity
  Delete { resource: Resource, id: String },
  /// Run a named transition (e.g. `transition leads convert <id>`)
  Transition {
    resource: Resource,
    name: String,
    id: String,
    #[arg(short, long, default_value = "{}")]
    data: String,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init()?;

  let config = Config::load(args.config.as_deref())?;
  let data = DataClient::open(&config)?;

  run(&data, args.command).await.map_err(|e| match e.downcast_ref::<ApiError>() {
    Some(api) if api.requires_login() => eyre!("{} (run `bizdesk login` first)", api),
    _ => e,
  })
}

async fn run(data: &DataClient, command: Command) -> Result<()> {
  match command {
    Command::Login { email, password } => {
      let session = data.auth().login(&email, &password).await?;
      print_json(&json!({
        "tenantId": session.tenant_id(),
        "expiresAt": session.expires_at(),
        "user": session.current_user(),
      }))
    }
    Command::Register {
      email,
      password,
      tenant_name,
      company_name,
      first_name,
      last_name,
    } => {
      let registration = Registration {
        email,
        password,
        first_name,
        last_name,
        tenant_name,
        company_name,
      };
      let session = data.auth().register(&registration).await?;
      print_json(&json!({
        "tenantId": session.tenant_id(),
        "expiresAt": session.expires_at(),
        "user": session.current_user(),
      }))
    }
    Command::Logout => {
      data.auth().logout().await?;
      print_json(&json!({ "loggedOut": true }))
    }
    Command::Whoami => {
      let user = data.auth().current_user().await?;
      let session = data.session();
      print_json(&json!({
        "user": user,
        "tenantId": session.as_ref().and_then(|s| s.tenant_id()),
        "expiresAt": session.as_ref().map(|s| s.expires_at()),
        "credential": format!("{:?}", data.credential_state()),
      }))
    }
    Command::Resources => {
      let families: Vec<Value> = Resource::ALL
        .iter()
        .map(|r| {
          let descriptor = r.descriptor();
          let operations: Vec<&str> = [LIST, GET, CREATE, UPDATE, DELETE]
            .into_iter()
            .filter(|op| descriptor.supports(op))
            .collect();
          let transitions: Vec<&str> = descriptor.transitions.iter().map(|t| t.name).collect();
          json!({
            "name": descriptor.name,
            "path": descriptor.base_path,
            "operations": operations,
            "transitions": transitions,
          })
        })
        .collect();
      print_json(&families)
    }
    Command::List {
      resource,
      page,
      page_size,
      search,
      filter,
    } => {
      let mut query = ListQuery::new();
      if let Some(page) = page {
        query = query.page(page);
      }
      if let Some(size) = page_size {
        query = query.page_size(size);
      }
      if let Some(search) = search {
        query = query.filter("search", search);
      }
      for (name, value) in filter {
        query = query.filter(name, value);
      }
      let page = data
        .list_with::<Value>(resource, &query, ReadMode::Blocking)
        .await?;
      print_json(&page.data)
    }
    Command::Get { resource, id } => {
      let entity: Value = data.get(resource, &id).await?;
      print_json(&entity)
    }
    Command::Create { resource, data: payload } => {
      let created: Value = data.create(resource, &parse_payload(&payload)?).await?;
      print_json(&created)
    }
    Command::Update {
      resource,
      id,
      data: payload,
    } => {
      let updated: Value = data.update(resource, &id, &parse_payload(&payload)?).await?;
      print_json(&updated)
    }
    Command::Delete { resource, id } => {
      data.delete(resource, &id).await?;
      print_json(&json!({ "deleted": id }))
    }
    Command::Transition {
      resource,
      name,
      id,
      data: payload,
    } => {
      let result = data
        .transition_json(resource, &name, &id, &parse_payload(&payload)?)
        .await?;
      print_json(&result)
    }
  }
}

fn parse_filter(s: &str) -> std::result::Result<(String, String), String> {
  let (name, value) = s
    .split_once('=')
    .ok_or_else(|| format!("expected name=value, got '{}'", s))?;
  Ok((name.trim().to_string(), value.to_string()))
}

fn parse_payload(raw: &str) -> Result<Value> {
  serde_json::from_str(raw).map_err(|e| eyre!("Failed to parse JSON payload: {}", e))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  let out =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format output: {}", e))?;
  println!("{}", out);
  Ok(())
}
