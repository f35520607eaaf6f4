//! Atelier CLI - shopper session and cart from the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Log in (password may also come from ATELIER_PASSWORD)
//! atelier login -e a@x.com -p secret1
//!
//! # Show the session, cookies and cart state
//! atelier status
//!
//! # Add to the cart (guest cart while logged out, server cart otherwise)
//! atelier cart add tee-01 --size M --quantity 2 --name "Linen Tee" --price 25.00
//!
//! # Rotate tokens, then log out
//! atelier refresh
//! atelier logout
//! ```
//!
//! # Commands
//!
//! - `login`, `signup`, `logout`, `whoami`, `refresh`, `status`
//! - `cart add`, `cart show`
//!
//! Every invocation hydrates the session from `ATELIER_STATE_DIR`, runs one
//! reconciliation pass, executes the command and waits for the cart
//! coordinator to settle before exiting.

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "atelier")]
#[command(author, version, about = "Atelier shopper CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in with email and password
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Account password
        #[arg(short, long, env = "ATELIER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account (does not log in)
    Signup {
        /// Given name
        #[arg(long)]
        first_name: String,

        /// Family name
        #[arg(long)]
        last_name: String,

        /// Account email
        #[arg(short, long)]
        email: String,

        /// Account password
        #[arg(short, long, env = "ATELIER_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Log out and clear local session state
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Rotate the access token
    Refresh,
    /// Show session, cookie and cart state
    Status,
    /// Cart operations
    Cart {
        #[command(subcommand)]
        action: CartAction,
    },
}

#[derive(Subcommand)]
enum CartAction {
    /// Add a product to the cart
    Add {
        /// Product id
        product_id: String,

        /// Size label
        #[arg(short, long)]
        size: Option<String>,

        /// Number of units
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,

        /// Display name kept with guest cart lines
        #[arg(long)]
        name: Option<String>,

        /// Unit price kept with guest cart lines (e.g. 25.00)
        #[arg(long, default_value = "0")]
        price: String,
    },
    /// Show the guest cart and the server cart
    Show,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CliError> {
    let client = commands::connect().await?;

    let result = match cli.command {
        Commands::Login { email, password } => {
            commands::session::login(&client, &email, password).await
        }
        Commands::Signup {
            first_name,
            last_name,
            email,
            password,
        } => commands::session::signup(&client, &first_name, &last_name, &email, password).await,
        Commands::Logout => {
            commands::session::logout(&client).await;
            Ok(())
        }
        Commands::Whoami => commands::session::whoami(&client),
        Commands::Refresh => commands::session::refresh(&client).await,
        Commands::Status => {
            commands::session::status(&client).await;
            Ok(())
        }
        Commands::Cart { action } => match action {
            CartAction::Add {
                product_id,
                size,
                quantity,
                name,
                price,
            } => {
                commands::cart::add(&client, &product_id, size, quantity, name, &price).await
            }
            CartAction::Show => {
                commands::cart::show(&client).await;
                Ok(())
            }
        },
    };

    commands::finish(client).await;
    result
}
