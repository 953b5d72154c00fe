//! `roster institution list | add | show | enable | disable`

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use roster_core::{registry, DestinationConfig, Institution, InstitutionId};

use super::home_dir;

/// Manage registered institutions.
#[derive(Subcommand, Debug)]
pub enum InstitutionCommand {
    /// List every registered institution.
    List,

    /// Register a new institution with a permissive default policy.
    Add(AddArgs),

    /// Show one institution's destination and policy.
    Show(ShowArgs),

    /// Include an institution in sync runs.
    Enable { id: u32 },

    /// Exclude an institution from sync runs.
    Disable { id: u32 },
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Numeric institution id.
    pub id: u32,

    /// Display name.
    #[arg(long)]
    pub name: String,

    /// Base URL of the destination LMS API.
    #[arg(long)]
    pub endpoint: String,

    /// API user for HTTP Basic auth.
    #[arg(long)]
    pub username: String,

    /// Environment variable holding the API password.
    #[arg(long, value_name = "VAR")]
    pub password_env: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub id: u32,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct InstitutionRow {
    #[tabled(rename = "id")]
    id: u32,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "enabled")]
    enabled: String,
    #[tabled(rename = "endpoint")]
    endpoint: String,
}

pub fn run(cmd: InstitutionCommand) -> Result<()> {
    match cmd {
        InstitutionCommand::List => list(),
        InstitutionCommand::Add(args) => add(args),
        InstitutionCommand::Show(args) => show(args),
        InstitutionCommand::Enable { id } => set_enabled(id, true),
        InstitutionCommand::Disable { id } => set_enabled(id, false),
    }
}

fn list() -> Result<()> {
    let home = home_dir()?;
    let institutions =
        registry::list_institutions_at(&home).context("failed to load institution registry")?;

    if institutions.is_empty() {
        println!("No institutions registered.");
        println!("Run: roster institution add <id> --name <name> --endpoint <url> --username <user>");
        return Ok(());
    }

    let rows: Vec<InstitutionRow> = institutions
        .into_iter()
        .map(|i| InstitutionRow {
            id: i.id.0,
            name: i.name,
            enabled: if i.enabled {
                "yes".green().to_string()
            } else {
                "no".bright_black().to_string()
            },
            endpoint: i.destination.endpoint,
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn add(args: AddArgs) -> Result<()> {
    let home = home_dir()?;
    let id = InstitutionId(args.id);
    let existed = registry::institution_path_at(&home, id).exists();

    let institution = registry::add_institution_at(
        &home,
        id,
        args.name,
        DestinationConfig {
            endpoint: args.endpoint,
            username: args.username,
            password_env: args.password_env,
            timeout_secs: args.timeout,
        },
    )
    .with_context(|| format!("failed to add institution {id}"))?;

    if existed {
        println!(
            "Institution {} ('{}') already registered, left unchanged",
            institution.id, institution.name
        );
    } else {
        println!("✓ Added institution {} ('{}')", institution.id, institution.name);
        println!(
            "  Saved to: {}",
            registry::institution_path_at(&home, id).display()
        );
    }
    Ok(())
}

fn show(args: ShowArgs) -> Result<()> {
    let home = home_dir()?;
    let institution = registry::load_institution_at(&home, InstitutionId(args.id))
        .with_context(|| format!("failed to load institution {}", args.id))?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&institution)
                .context("failed to serialize institution JSON")?
        );
        return Ok(());
    }
    print_institution(&institution);
    Ok(())
}

fn set_enabled(id: u32, enabled: bool) -> Result<()> {
    let home = home_dir()?;
    let mut institution = registry::load_institution_at(&home, InstitutionId(id))
        .with_context(|| format!("failed to load institution {id}"))?;
    institution.enabled = enabled;
    institution.updated_at = chrono::Utc::now();
    registry::save_institution_at(&home, &institution)
        .with_context(|| format!("failed to save institution {id}"))?;

    let state = if enabled { "enabled" } else { "disabled" };
    println!("✓ Institution {id} ('{}') {state}", institution.name);
    Ok(())
}

fn print_institution(institution: &Institution) {
    let policy = &institution.policy;
    let on_off = |flag: bool| if flag { "on" } else { "off" };

    println!(
        "{} {}",
        format!("Institution {}", institution.id).bold(),
        institution.name
    );
    println!("  enabled:           {}", on_off(institution.enabled));
    println!("  endpoint:          {}", institution.destination.endpoint);
    println!("  api user:          {}", institution.destination.username);
    println!(
        "  password from:     {}",
        institution
            .destination
            .password_env
            .as_deref()
            .unwrap_or("(none)")
    );
    println!(
        "  admin override:    {} ({} last names)",
        on_off(policy.admin_override_enabled),
        policy.admin_last_names.len()
    );
    println!(
        "  name exceptions:   {}",
        policy.full_first_name_exceptions.len()
    );
    println!("  email sync:        {}", on_off(!policy.email_sync_disabled));
    println!(
        "  disabled users:    {}",
        if policy.disabled_user_sync_enabled {
            "removed"
        } else {
            "kept"
        }
    );
    if policy.organization_filter.enabled {
        let allowed: Vec<&str> = policy
            .organization_filter
            .allowed
            .iter()
            .map(String::as_str)
            .collect();
        println!("  organizations:     {}", allowed.join(", "));
    } else {
        println!("  organizations:     all");
    }
    if !policy.teacher_group_patterns.is_empty() {
        println!(
            "  teacher groups:    {}",
            policy.teacher_group_patterns.join(", ")
        );
    }
}
