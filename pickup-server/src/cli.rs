use clap::{Parser, Subcommand};

const HELP_EPILOG: &str = r#"Server options can also be provided via environment variables:
  CONFIG_PATH                  (default: ./config.yaml)
  DB_PATH                      (default: data/app.db)
  PORT                         (default: 5000 or config.listen_port)
  JWT_SECRET                   (overrides jwt_secret)
  PUSH_SERVICE_ACCOUNT_BASE64  (overrides push.service_account_base64)
"#;

#[derive(Debug, Parser)]
#[command(
    name = "pickup-server",
    version,
    about = "School pickup tracking server",
    long_about = None,
    after_long_help = HELP_EPILOG,
)]
pub struct Cli {
    /// Optional subcommand. Without one, runs the server.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print a bcrypt hash, e.g. for bootstrap_admin.password_hash
    HashPassword {
        /// Password to hash; read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
        /// bcrypt cost factor
        #[arg(long, default_value_t = bcrypt::DEFAULT_COST)]
        cost: u32,
    },
}
