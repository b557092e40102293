use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Track receipts and expenses from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to the local data directory
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a receipt
    #[command(alias = "new")]
    Add {
        /// Store name
        store: String,
        /// Expense category (food, shopping, transport, entertainment,
        /// daily, medical, other)
        #[arg(short, long, default_value = "other")]
        category: String,
        /// Line item as name:quantity:price (repeatable)
        #[arg(short, long = "item", value_name = "NAME:QTY:PRICE")]
        items: Vec<String>,
        /// Single total amount when no line items are given
        #[arg(short, long)]
        amount: Option<f64>,
        /// Payment method
        #[arg(long, default_value = "cash")]
        payment: String,
        /// Optional note
        #[arg(long)]
        note: Option<String>,
    },
    /// List recent receipts
    List {
        /// Number of receipts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Filter by category
        #[arg(short, long)]
        category: Option<String>,
        /// Filter by month (YYYY-MM)
        #[arg(short, long)]
        month: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a receipt
    Delete {
        /// Receipt ID or unique ID prefix
        id: String,
    },
    /// Scan a receipt photo with the configured AI provider
    Scan {
        /// Path to the receipt image
        image: PathBuf,
        /// Save the scanned receipt after a successful parse
        #[arg(long)]
        save: bool,
        /// Override the configured provider (openai, anthropic, google)
        #[arg(long)]
        provider: Option<String>,
        /// Override the configured model
        #[arg(long)]
        model: Option<String>,
        /// Override the configured API key
        #[arg(long, value_name = "KEY")]
        api_key: Option<String>,
    },
    /// Fetch e-invoices and import them as receipts
    Invoice {
        #[command(subcommand)]
        command: InvoiceCommands,
    },
    /// Show achievements and unlock progress
    Achievements {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Monthly spending summary by category
    Stats {
        /// Month to summarize (YYYY-MM, defaults to the current month)
        #[arg(short, long)]
        month: Option<String>,
    },
    /// Copy signed-out data to the signed-in account (one time)
    Migrate {
        /// Confirm without prompting (including merge into non-empty remote)
        #[arg(long)]
        yes: bool,
        /// Skip migration permanently for this account on this device
        #[arg(long)]
        skip: bool,
    },
    /// Sign in and out of cloud sync
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Show or update endpoint configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum InvoiceCommands {
    /// Query the carrier API and import new invoices as receipts
    Sync {
        /// Start date (YYYY-MM-DD, default 7 days ago)
        #[arg(long)]
        from: Option<String>,
        /// End date (YYYY-MM-DD, default today)
        #[arg(long)]
        to: Option<String>,
        /// Use the built-in mock feed instead of the live API
        #[arg(long)]
        mock: bool,
    },
    /// Show carrier configuration and last sync status
    Status,
    /// Configure the invoice carrier
    Configure {
        /// Carrier type (phone, natural, credit_card)
        #[arg(long, default_value = "phone")]
        carrier_type: String,
        /// Carrier number (e.g. /ABC1234)
        #[arg(long)]
        carrier_number: String,
        /// Carrier verification code
        #[arg(long)]
        verify_code: String,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Sign in with email and password
    Login {
        email: String,
        /// Password (read from stdin when omitted)
        #[arg(long)]
        password: Option<String>,
    },
    /// Create an account
    Signup {
        email: String,
        /// Password (read from stdin when omitted)
        #[arg(long)]
        password: Option<String>,
    },
    /// Sign out and clear the stored session
    Logout,
    /// Show the current session
    Status,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the resolved configuration
    Show,
    /// Update configuration values
    Set {
        /// Document backend base URL
        #[arg(long)]
        api_base_url: Option<String>,
        /// Auth service base URL
        #[arg(long)]
        auth_url: Option<String>,
        /// Auth service anon key
        #[arg(long)]
        anon_key: Option<String>,
        /// E-invoice API application id
        #[arg(long)]
        einvoice_app_id: Option<String>,
        /// E-invoice API key
        #[arg(long)]
        einvoice_api_key: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
