use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use dalil_auth::config::ConfigError;
use dalil_auth::notify::{Notifier, Toast, ToastVariant};
use dalil_auth::validation::{LoginForm, ProfileForm, RegisterForm, ResetForm, ValidationErrors};
use dalil_auth::{AuthError, Redirects, Role, RouteGuard, ServiceConfig, ServiceError, SessionManager, SupabaseClient};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Service(#[from] ServiceError),
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationErrors),
    #[error("{0}")]
    Auth(#[from] AuthError),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "dalil-auth", about = "dalil.dz account and session CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the current session, profile, roles and guard decision.
    Status {
        /// Evaluate the route guard for this role.
        #[arg(long)]
        require_role: Option<Role>,
    },
    SignUp(SignUpArgs),
    SignIn(CredentialArgs),
    SignOut,
    ResetPassword {
        #[arg(long, env = "DALIL_EMAIL")]
        email: String,
    },
    UpdateProfile(ProfileArgs),
}

#[derive(Args, Debug)]
struct CredentialArgs {
    #[arg(long, env = "DALIL_EMAIL")]
    email: String,
    #[arg(long, env = "DALIL_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Args, Debug)]
struct SignUpArgs {
    #[command(flatten)]
    credentials: CredentialArgs,
    /// Defaults to the password.
    #[arg(long)]
    confirm_password: Option<String>,
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    role: Option<Role>,
}

#[derive(Args, Debug)]
struct ProfileArgs {
    /// Defaults to the current value.
    #[arg(long)]
    first_name: Option<String>,
    /// Defaults to the current value.
    #[arg(long)]
    last_name: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    avatar_url: Option<String>,
}

/// Prints toasts to stdout.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, toast: Toast) {
        let marker = match toast.variant {
            ToastVariant::Default => "ok",
            ToastVariant::Destructive => "!!",
        };
        println!("[{marker}] {}: {}", toast.title, toast.description);
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = ServiceConfig::from_env()?;
    let client = Arc::new(SupabaseClient::new(&config)?);
    let manager = SessionManager::start(client, Arc::new(ConsoleNotifier), Redirects::from_config(&config));
    manager.settled().await;

    let result = run(&manager, cli.command).await;
    manager.shutdown();
    result
}

async fn run(manager: &SessionManager, command: Command) -> Result<(), CliError> {
    match command {
        Command::Status { require_role } => print_status(manager, require_role).await,
        Command::SignUp(args) => {
            let form = RegisterForm {
                email: args.credentials.email,
                confirm_password: args
                    .confirm_password
                    .unwrap_or_else(|| args.credentials.password.clone()),
                password: args.credentials.password,
                first_name: args.first_name,
                last_name: args.last_name,
                role: args.role,
            };
            form.validate()?;
            let session = manager
                .sign_up(&form.email, &form.password, &form.metadata())
                .await?;
            if session.is_some() {
                manager.settled().await;
            }
            Ok(())
        }
        Command::SignIn(args) => {
            let form = LoginForm { email: args.email, password: args.password };
            form.validate()?;
            manager.sign_in(&form.email, &form.password).await?;
            manager.settled().await;
            print_status(manager, None).await
        }
        Command::SignOut => Ok(manager.sign_out().await?),
        Command::ResetPassword { email } => {
            let form = ResetForm { email };
            form.validate()?;
            Ok(manager.reset_password(&form.email).await?)
        }
        Command::UpdateProfile(args) => {
            let current = manager.profile().unwrap_or_default();
            let form = ProfileForm {
                first_name: args.first_name.or(current.first_name).unwrap_or_default(),
                last_name: args.last_name.or(current.last_name).unwrap_or_default(),
                phone: args.phone,
            };
            form.validate()?;
            let mut update = form.into_update();
            update.avatar_url = args.avatar_url;
            let profile = manager.update_profile(&update).await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(())
        }
    }
}

async fn print_status(manager: &SessionManager, require_role: Option<Role>) -> Result<(), CliError> {
    let state = manager.settled().await;
    let guard = RouteGuard { require_role };
    let decision = guard.decide(&state);
    let out = json!({
        "signed_in": state.user.is_some(),
        "user": state.user,
        "display_name": state.profile.as_ref().map(dalil_auth::Profile::display_name),
        "role_label": state.user.as_ref().map(|_| state.role_label()),
        "roles": state.roles.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        "profile": state.profile,
        "expires_at": state.session.as_ref().and_then(|s| s.expires_at),
        "guard": format!("{decision:?}"),
        "guard_message": decision.title(),
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
