//! Command-line client for the flaggate service
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use serde::Serialize;
use std::io::{self, BufRead, IsTerminal, Write};
use std::process::ExitCode;

use flaggate::auth::validate_password;
use flaggate::client::{LoginOutcome, Session, SessionStatus};
use flaggate::config::ClientConfig;
use flaggate::rpc::messages::{CreateUserRequest, FlagRequest, UpdateUserRequest};
use flaggate::{FlagGateError, Result};

const PASSWORD_ENV: &str = "FEATURECTL_PASSWORD";
const NEW_PASSWORD_ENV: &str = "FEATURECTL_NEW_PASSWORD";

#[derive(Parser, Debug)]
#[command(author, version, about = "Manage feature flags on a flaggate server")]
struct Cli {
    /// Server base URL (overrides FEATURECTL_SERVER_URL)
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authentication and credential cache
    #[command(subcommand)]
    Auth(AuthCommand),
    /// Feature flag management
    #[command(subcommand)]
    Flag(FlagCommand),
    /// User provisioning (admin only)
    #[command(subcommand)]
    User(UserCommand),
}

#[derive(Subcommand, Debug)]
enum AuthCommand {
    /// Log in and cache the issued tokens
    Login {
        /// Email of the user to log in as
        email: String,
    },
    /// Replace a temporary password and log in
    Activate {
        /// Email of the provisioned user
        email: String,
    },
    /// Show the cached login
    Status,
    /// Forget the cached login
    Logout,
}

#[derive(Args, Debug)]
struct FlagFields {
    /// Flag name
    name: String,
    /// Human readable description
    #[arg(long, default_value = "")]
    description: String,
    /// Create or leave the flag enabled
    #[arg(long)]
    enabled: bool,
}

impl From<FlagFields> for FlagRequest {
    fn from(fields: FlagFields) -> Self {
        FlagRequest {
            name: fields.name,
            description: fields.description,
            enabled: fields.enabled,
        }
    }
}

#[derive(Subcommand, Debug)]
enum FlagCommand {
    /// List all flags
    List,
    /// Show one flag
    Get { id: String },
    /// Create a flag
    Create(FlagFields),
    /// Replace a flag's fields
    Update {
        id: String,
        #[command(flatten)]
        fields: FlagFields,
    },
    /// Delete a flag
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Provision a user and print its temporary password
    Create {
        /// Email of the user to create
        email: String,
        /// Display name, defaults to the email's local part
        #[arg(default_value = "")]
        name: String,
        /// Role to assign; repeat for several
        #[arg(long = "role")]
        roles: Vec<String>,
    },
    /// List all users
    List,
    /// Show one user
    Get { id: String },
    /// Rename a user or replace its roles
    Update {
        id: String,
        /// New display name
        #[arg(long)]
        name: Option<String>,
        /// Replacement role set; repeat for several
        #[arg(long = "role")]
        roles: Vec<String>,
    },
    /// Delete a user
    Delete { id: String },
}

/// Reads a secret from `env_var`, else prompts on stderr. Input is hidden
/// when stdin is a terminal and read as a plain line otherwise.
fn read_secret(env_var: &str, prompt: &str) -> Result<String> {
    if let Ok(value) = std::env::var(env_var) {
        return Ok(value);
    }
    let secret = if io::stdin().is_terminal() {
        rpassword::prompt_password(prompt)?
    } else {
        eprint!("{}", prompt);
        io::stderr().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        line.trim_end_matches(['\r', '\n']).to_string()
    };
    if secret.is_empty() {
        return Err(FlagGateError::Validation("password must not be empty".to_string()));
    }
    Ok(secret)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| FlagGateError::Internal(format!("failed to format output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

async fn run_auth(session: &Session, command: AuthCommand) -> Result<()> {
    match command {
        AuthCommand::Login { email } => {
            let password = read_secret(PASSWORD_ENV, "Password: ")?;
            match session.login(&email, &password).await? {
                LoginOutcome::AlreadyLoggedIn => println!("Already logged in"),
                LoginOutcome::Refreshed => println!("Session refreshed"),
                LoginOutcome::LoggedIn => println!("Login successful"),
            }
        }
        AuthCommand::Activate { email } => {
            let temporary = read_secret(PASSWORD_ENV, "Temporary password: ")?;
            let new_password = read_secret(NEW_PASSWORD_ENV, "New password: ")?;
            validate_password(&new_password)?;
            session.activate(&email, &temporary, &new_password).await?;
            println!("Account activated, you are now logged in");
        }
        AuthCommand::Status => match session.status().await? {
            SessionStatus::LoggedOut => {
                println!("Not logged in. Use 'featurectl auth login' to log in.")
            }
            SessionStatus::Expired => println!("Login expired, please log in again"),
            SessionStatus::Active {
                email,
                user_id,
                expires_at,
            } => {
                let expiry = expires_at
                    .map(|t| t.to_rfc2822())
                    .unwrap_or_else(|| "unknown".to_string());
                println!("Logged in as {} ({}), expires {}", email, user_id, expiry);
            }
        },
        AuthCommand::Logout => {
            session.logout()?;
            println!("Logged out");
        }
    }
    Ok(())
}

async fn run_flag(session: &Session, command: FlagCommand) -> Result<()> {
    let token = session.access_token().await?;
    let api = session.api();
    match command {
        FlagCommand::List => print_json(&api.list_flags(&token).await?),
        FlagCommand::Get { id } => print_json(&api.get_flag(&token, &id).await?),
        FlagCommand::Create(fields) => print_json(&api.create_flag(&token, &fields.into()).await?),
        FlagCommand::Update { id, fields } => {
            print_json(&api.update_flag(&token, &id, &fields.into()).await?)
        }
        FlagCommand::Delete { id } => {
            api.delete_flag(&token, &id).await?;
            info!("Deleted flag {}", id);
            println!("Deleted {}", id);
            Ok(())
        }
    }
}

async fn run_user(session: &Session, command: UserCommand) -> Result<()> {
    let token = session.access_token().await?;
    let api = session.api();
    match command {
        UserCommand::Create { email, name, roles } => {
            let created = api
                .create_user(&token, &CreateUserRequest { email, name, roles })
                .await?;
            print_json(&created.user)?;
            println!("Temporary password: {}", created.temporary_password);
            println!("It is shown only once; the user must activate the account with it.");
            Ok(())
        }
        UserCommand::List => print_json(&api.list_users(&token).await?),
        UserCommand::Get { id } => print_json(&api.get_user(&token, &id).await?),
        UserCommand::Update { id, name, roles } => {
            let update = UpdateUserRequest {
                id: id.clone(),
                name,
                roles: (!roles.is_empty()).then_some(roles),
            };
            print_json(&api.update_user(&token, &id, &update).await?)
        }
        UserCommand::Delete { id } => {
            api.delete_user(&token, &id).await?;
            info!("Deleted user {}", id);
            println!("Deleted {}", id);
            Ok(())
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = ClientConfig::from_env()?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    let session = Session::from_config(&config)?;

    match cli.command {
        Command::Auth(command) => run_auth(&session, command).await,
        Command::Flag(command) => run_flag(&session, command).await,
        Command::User(command) => run_user(&session, command).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(FlagGateError::NotLoggedIn) => {
            eprintln!("{}", FlagGateError::NotLoggedIn);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
