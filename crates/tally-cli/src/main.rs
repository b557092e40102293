//! Tally CLI - receipt and expense tracking from the terminal
//!
//! Works fully offline against local JSON storage; signing in switches
//! every collection to the cloud backend, with a one-time migration of
//! signed-out data.

mod backend;
mod cli;

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use clap::{CommandFactory, Parser};
use clap_complete::aot::Generator;
use clap_complete::{generate, shells};
use thiserror::Error;

use backend::Backend;
use cli::{AuthCommands, Cli, Commands, CompletionShell, ConfigCommands, InvoiceCommands};
use tally_core::achievements::{self, Evaluation, NOTIFICATIONS_KEY};
use tally_core::auth::{
    AuthClient, AuthError, AuthSession, FileSessionStore, Identity, SessionPersistence,
    SignUpOutcome,
};
use tally_core::config::ClientConfig;
use tally_core::invoice::{
    import_new_invoices, mock_invoices, InvoiceClient, InvoiceError,
};
use tally_core::models::{
    Achievement, AchievementNotification, AiProvider, AiSettings, CarrierType, EInvoice,
    InvoiceQuery, InvoiceSettings, InvoiceSyncStatus, Receipt, ReceiptItem, StoreNameHistory,
};
use tally_core::scan::{ScanClient, ScanError};
use tally_core::store::{HttpRemoteStore, LocalStore, Record, SettingsDocument};
use tally_core::subscription::{quota_status, SubscriptionService};
use tally_core::sync::{CollectionSync, DocumentSync, MigrationFlow};
use tally_core::util::{month_stamp, unix_timestamp_ms};
use tally_core::Category;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] tally_core::Error),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Invoice(#[from] InvoiceError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Unknown category: {0}")]
    InvalidCategory(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("Invalid item '{0}'; expected NAME:QTY:PRICE or NAME:PRICE")]
    InvalidItem(String),
    #[error("Invalid date '{0}'; expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("Invalid month '{0}'; expected YYYY-MM")]
    InvalidMonth(String),
    #[error("Provide --amount or at least one --item")]
    EmptyReceipt,
    #[error("Receipt not found for id/prefix: {0}")]
    ReceiptNotFound(String),
    #[error("{0}")]
    AmbiguousReceiptId(String),
    #[error("Not signed in. Run `tally auth login` first.")]
    NotSignedIn,
    #[error("Auth is not configured. Set TALLY_AUTH_URL and TALLY_ANON_KEY or run `tally config set`.")]
    AuthNotConfigured,
    #[error("E-invoice API credentials are not configured. Set INVOICE_API_APP_ID and INVOICE_API_KEY, or use --mock.")]
    EInvoiceNotConfigured,
    #[error("No invoice carrier configured. Run `tally invoice configure` first.")]
    CarrierNotConfigured,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tally=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir);
    let config = ClientConfig::load_from_path(&ClientConfig::default_path())?.apply_env();
    config.validate()?;

    match cli.command {
        Some(Commands::Add {
            store,
            category,
            items,
            amount,
            payment,
            note,
        }) => {
            run_add(&data_dir, &config, &store, &category, &items, amount, &payment, note).await?;
        }
        Some(Commands::List {
            limit,
            category,
            month,
            json,
        }) => run_list(&data_dir, &config, limit, category.as_deref(), month.as_deref(), json).await?,
        Some(Commands::Delete { id }) => run_delete(&data_dir, &config, &id).await?,
        Some(Commands::Scan {
            image,
            save,
            provider,
            model,
            api_key,
        }) => {
            run_scan(
                &data_dir,
                &config,
                &image,
                save,
                provider.as_deref(),
                model.as_deref(),
                api_key.as_deref(),
            )
            .await?;
        }
        Some(Commands::Invoice { command }) => match command {
            InvoiceCommands::Sync { from, to, mock } => {
                run_invoice_sync(&data_dir, &config, from.as_deref(), to.as_deref(), mock).await?;
            }
            InvoiceCommands::Status => run_invoice_status(&data_dir, &config).await?,
            InvoiceCommands::Configure {
                carrier_type,
                carrier_number,
                verify_code,
            } => {
                run_invoice_configure(&data_dir, &config, &carrier_type, &carrier_number, &verify_code)
                    .await?;
            }
        },
        Some(Commands::Achievements { json }) => run_achievements(&data_dir, &config, json).await?,
        Some(Commands::Stats { month }) => run_stats(&data_dir, &config, month.as_deref()).await?,
        Some(Commands::Migrate { yes, skip }) => run_migrate(&data_dir, &config, yes, skip).await?,
        Some(Commands::Auth { command }) => match command {
            AuthCommands::Login { email, password } => run_auth_login(&config, &email, password).await?,
            AuthCommands::Signup { email, password } => {
                run_auth_signup(&config, &email, password).await?;
            }
            AuthCommands::Logout => run_auth_logout(&config).await?,
            AuthCommands::Status => run_auth_status(&config).await?,
        },
        Some(Commands::Config { command }) => match command {
            ConfigCommands::Show => run_config_show(&config),
            ConfigCommands::Set {
                api_base_url,
                auth_url,
                anon_key,
                einvoice_app_id,
                einvoice_api_key,
            } => run_config_set(api_base_url, auth_url, anon_key, einvoice_app_id, einvoice_api_key)?,
        },
        Some(Commands::Completions { shell, output }) => run_completions(shell, output.as_deref())?,
        None => {
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// App context
// ---------------------------------------------------------------------------

/// Shared per-invocation state: local store, backend selection, session
struct App {
    local: LocalStore,
    backend: Backend,
    session: Option<AuthSession>,
}

impl App {
    async fn open(data_dir: &Path, config: &ClientConfig) -> Result<Self, CliError> {
        let session = load_session(config).await;
        let backend = match (&session, config.api_base_url.as_deref()) {
            (Some(session), Some(base_url)) => {
                Backend::Http(HttpRemoteStore::new(base_url, &session.access_token)?)
            }
            (Some(_), None) => {
                tracing::warn!("Signed in but no api_base_url configured; staying local");
                Backend::offline()
            }
            _ => Backend::offline(),
        };
        Ok(Self {
            local: LocalStore::new(data_dir),
            backend,
            session,
        })
    }

    /// Identity to sync under, when both a session and a backend exist
    fn sync_identity(&self) -> Option<Identity> {
        if matches!(self.backend, Backend::Http(_)) {
            self.session.as_ref().map(|session| session.identity.clone())
        } else {
            None
        }
    }

    async fn collection<T: Record>(&self) -> Result<CollectionSync<T, Backend>, CliError> {
        let sync = CollectionSync::new(self.local.clone(), self.backend.clone());
        if let Some(identity) = self.sync_identity() {
            sync.sign_in(identity);
            sync.refresh().await?;
        }
        Ok(sync)
    }

    async fn document<T: SettingsDocument>(&self) -> Result<DocumentSync<T, Backend>, CliError> {
        let sync = DocumentSync::new(self.local.clone(), self.backend.clone());
        if let Some(identity) = self.sync_identity() {
            sync.sign_in(identity);
            sync.refresh().await?;
        }
        Ok(sync)
    }

    async fn subscription(&self) -> Result<Option<SubscriptionService<Backend>>, CliError> {
        // Quota is only tracked for signed-in identities, as the backend
        // owns the counters.
        let Some(identity) = self.sync_identity() else {
            return Ok(None);
        };
        let service = SubscriptionService::new(self.local.clone(), self.backend.clone());
        service.doc().sign_in(identity);
        Ok(Some(service))
    }
}

async fn load_session(config: &ClientConfig) -> Option<AuthSession> {
    let store = FileSessionStore::new(FileSessionStore::default_path());
    if config.auth_configured() {
        let client = auth_client(config, store).ok()?;
        match client.restore_session().await {
            Ok(session) => session,
            Err(error) => {
                tracing::warn!("Could not restore session: {error}");
                None
            }
        }
    } else {
        store
            .load()
            .unwrap_or_default()
            .filter(|session| !session.is_expired())
    }
}

fn auth_client(
    config: &ClientConfig,
    store: FileSessionStore,
) -> Result<AuthClient<FileSessionStore>, CliError> {
    let (Some(auth_url), Some(anon_key)) = (&config.auth_url, &config.anon_key) else {
        return Err(CliError::AuthNotConfigured);
    };
    Ok(AuthClient::new(auth_url, anon_key.clone(), store)?)
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
async fn run_add(
    data_dir: &Path,
    config: &ClientConfig,
    store: &str,
    category: &str,
    item_specs: &[String],
    amount: Option<f64>,
    payment: &str,
    note: Option<String>,
) -> Result<(), CliError> {
    let category = parse_category(category)?;
    let items = parse_items(item_specs, amount)?;

    let app = App::open(data_dir, config).await?;
    if let Some(subscription) = app.subscription().await? {
        subscription.record_receipt(Local::now().date_naive()).await?;
    }

    let receipts = app.collection::<Receipt>().await?;
    let mut receipt = Receipt::new(store, category, items, payment);
    receipt.note = note;
    receipts.upsert(receipt.clone()).await?;

    let store_names = app.document::<StoreNameHistory>().await?;
    let mut history = store_names.get();
    history.remember(store);
    store_names.save(&history).await?;

    let evaluation = evaluate_achievements(&app, &receipts).await?;
    for notification in &evaluation.newly_unlocked {
        println!(
            "{} Achievement unlocked: {}",
            notification.achievement.icon, notification.achievement.title
        );
    }

    println!("{}", receipt.id);
    Ok(())
}

async fn run_list(
    data_dir: &Path,
    config: &ClientConfig,
    limit: usize,
    category: Option<&str>,
    month: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    let category = category.map(parse_category).transpose()?;
    let month = month.map(parse_month).transpose()?;

    let app = App::open(data_dir, config).await?;
    let receipts = app.collection::<Receipt>().await?;
    let filtered: Vec<Receipt> = receipts
        .records()
        .into_iter()
        .filter(|receipt| category.is_none_or(|wanted| receipt.category == wanted))
        .filter(|receipt| {
            month
                .as_deref()
                .is_none_or(|wanted| month_stamp(receipt.date) == wanted)
        })
        .take(limit)
        .collect();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&filtered)?);
    } else {
        for line in format_receipt_lines(&filtered) {
            println!("{line}");
        }
    }
    Ok(())
}

async fn run_delete(data_dir: &Path, config: &ClientConfig, id: &str) -> Result<(), CliError> {
    let app = App::open(data_dir, config).await?;
    let receipts = app.collection::<Receipt>().await?;
    let receipt = resolve_receipt(&receipts.records(), id)?;
    receipts.remove(&receipt.id.as_str()).await?;
    println!("{}", receipt.id);
    Ok(())
}

async fn run_scan(
    data_dir: &Path,
    config: &ClientConfig,
    image_path: &Path,
    save: bool,
    provider: Option<&str>,
    model: Option<&str>,
    api_key: Option<&str>,
) -> Result<(), CliError> {
    let image = std::fs::read(image_path)?;
    let mime_type = mime_for(image_path);

    let app = App::open(data_dir, config).await?;
    let settings_doc = app.document::<AiSettings>().await?;
    let mut settings = settings_doc.get();
    if let Some(provider) = provider {
        settings.set_provider(parse_provider(provider)?);
    }
    if let Some(model) = model {
        settings.model = model.to_string();
    }
    if let Some(api_key) = api_key {
        settings.api_key = api_key.to_string();
    }

    let today = Local::now().date_naive();
    let subscription = app.subscription().await?;
    if let Some(subscription) = &subscription {
        subscription.record_ai_scan(today).await?;
    }

    let client = ScanClient::new()?;
    let result = client.analyze(&image, mime_type, &settings).await?;

    println!("Store:    {}", result.store_name);
    println!("Category: {}", result.category);
    for item in &result.items {
        println!("  {} x{} @ {:.2}", item.name, item.quantity, item.price);
    }
    println!("Payment:  {}", result.payment_method);
    println!("Total:    {:.2}", result.total);

    if save {
        if let Some(subscription) = &subscription {
            subscription.record_receipt(today).await?;
        }
        let receipts = app.collection::<Receipt>().await?;
        let receipt = result.into_receipt();
        receipts.upsert(receipt.clone()).await?;

        let store_names = app.document::<StoreNameHistory>().await?;
        let mut history = store_names.get();
        history.remember(&receipt.store_name);
        store_names.save(&history).await?;

        evaluate_achievements(&app, &receipts).await?;
        println!("{}", receipt.id);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// E-invoices
// ---------------------------------------------------------------------------

async fn run_invoice_sync(
    data_dir: &Path,
    config: &ClientConfig,
    from: Option<&str>,
    to: Option<&str>,
    mock: bool,
) -> Result<(), CliError> {
    let today = Local::now().date_naive();
    let end_date = to.map(parse_date).transpose()?.unwrap_or(today);
    let start_date = from
        .map(parse_date)
        .transpose()?
        .unwrap_or_else(|| end_date - chrono::Days::new(7));

    let app = App::open(data_dir, config).await?;
    let settings_doc = app.document::<InvoiceSettings>().await?;
    let settings = settings_doc.get();

    settings_doc
        .merge(serde_json::json!({ "sync_status": InvoiceSyncStatus::Syncing }))
        .await?;

    let fetched: Result<Vec<EInvoice>, CliError> = if mock {
        Ok(mock_invoices(today))
    } else {
        fetch_live_invoices(config, &settings, start_date, end_date).await
    };

    let fetched = match fetched {
        Ok(fetched) => fetched,
        Err(error) => {
            settings_doc
                .merge(serde_json::json!({
                    "sync_status": InvoiceSyncStatus::Error,
                    "sync_error": error.to_string(),
                }))
                .await?;
            return Err(error);
        }
    };

    let invoices = app.collection::<EInvoice>().await?;
    let receipts = app.collection::<Receipt>().await?;
    let summary = import_new_invoices(fetched, &invoices, &receipts).await?;

    settings_doc
        .merge(serde_json::json!({
            "sync_status": InvoiceSyncStatus::Success,
            "sync_error": null,
            "last_sync_at": unix_timestamp_ms(),
        }))
        .await?;

    evaluate_achievements(&app, &receipts).await?;
    println!(
        "Imported {} invoices ({} already imported)",
        summary.imported, summary.skipped_duplicates
    );
    Ok(())
}

async fn fetch_live_invoices(
    config: &ClientConfig,
    settings: &InvoiceSettings,
    start_date: NaiveDate,
    end_date: NaiveDate,
) -> Result<Vec<EInvoice>, CliError> {
    let (Some(app_id), Some(api_key)) = (&config.einvoice_app_id, &config.einvoice_api_key) else {
        return Err(CliError::EInvoiceNotConfigured);
    };
    if !settings.is_configured() {
        return Err(CliError::CarrierNotConfigured);
    }

    let client = InvoiceClient::new(app_id, api_key)?;
    let query = InvoiceQuery {
        start_date,
        end_date,
        carrier_type: settings.carrier_type,
        carrier_number: settings.carrier_number.clone(),
        verify_code: settings.verify_code.clone(),
    };
    Ok(client.query_invoices(&query).await?)
}

async fn run_invoice_status(data_dir: &Path, config: &ClientConfig) -> Result<(), CliError> {
    let app = App::open(data_dir, config).await?;
    let settings = app.document::<InvoiceSettings>().await?.get();

    println!("Carrier type:   {:?}", settings.carrier_type);
    println!(
        "Carrier number: {}",
        if settings.carrier_number.is_empty() {
            "(not set)"
        } else {
            &settings.carrier_number
        }
    );
    println!("Auto sync:      {}", settings.auto_sync);
    println!("Sync status:    {:?}", settings.sync_status);
    if let Some(error) = &settings.sync_error {
        println!("Last error:     {error}");
    }
    if let Some(last_sync_at) = settings.last_sync_at {
        println!("Last sync:      {}", format_timestamp(last_sync_at));
    }
    Ok(())
}

async fn run_invoice_configure(
    data_dir: &Path,
    config: &ClientConfig,
    carrier_type: &str,
    carrier_number: &str,
    verify_code: &str,
) -> Result<(), CliError> {
    let carrier_type = parse_carrier_type(carrier_type)?;
    let app = App::open(data_dir, config).await?;
    let settings_doc = app.document::<InvoiceSettings>().await?;

    let mut settings = settings_doc.get();
    settings.carrier_type = carrier_type;
    settings.carrier_number = carrier_number.trim().to_string();
    settings.verify_code = verify_code.trim().to_string();
    settings_doc.save(&settings).await?;

    println!("Carrier configured");
    Ok(())
}

// ---------------------------------------------------------------------------
// Achievements & stats
// ---------------------------------------------------------------------------

async fn run_achievements(data_dir: &Path, config: &ClientConfig, as_json: bool) -> Result<(), CliError> {
    let app = App::open(data_dir, config).await?;
    let receipts = app.collection::<Receipt>().await?;
    let evaluation = evaluate_achievements(&app, &receipts).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&evaluation.achievements)?);
        return Ok(());
    }

    let unlocked = evaluation
        .achievements
        .iter()
        .filter(|achievement| achievement.unlocked)
        .count();
    println!("Unlocked {unlocked}/{} achievements", evaluation.achievements.len());
    for achievement in &evaluation.achievements {
        let marker = if achievement.unlocked { "✔" } else { " " };
        println!(
            "[{marker}] {} {:<22} {:>4}/{:<4} {}",
            achievement.icon,
            achievement.title,
            achievement.current.min(achievement.requirement),
            achievement.requirement,
            achievement.description
        );
    }

    let notifications: Vec<AchievementNotification> = app.local.load_named(NOTIFICATIONS_KEY);
    let unread = achievements::unread_count(&notifications);
    if unread > 0 {
        println!("{unread} unread unlock notifications");
    }
    Ok(())
}

async fn run_stats(data_dir: &Path, config: &ClientConfig, month: Option<&str>) -> Result<(), CliError> {
    let month = match month {
        Some(raw) => parse_month(raw)?,
        None => month_stamp(Local::now().date_naive()),
    };

    let app = App::open(data_dir, config).await?;
    let receipts = app.collection::<Receipt>().await?;
    let in_month: Vec<Receipt> = receipts
        .records()
        .into_iter()
        .filter(|receipt| month_stamp(receipt.date) == month)
        .collect();

    let mut by_category: Vec<(Category, f64)> = Category::ALL
        .into_iter()
        .map(|category| {
            let total = in_month
                .iter()
                .filter(|receipt| receipt.category == category)
                .map(|receipt| receipt.total)
                .sum::<f64>();
            (category, total)
        })
        .filter(|(_, total)| *total > 0.0)
        .collect();
    by_category.sort_by(|a, b| b.1.total_cmp(&a.1));

    println!("{month}: {} receipts", in_month.len());
    for (category, total) in &by_category {
        println!("  {:<13} {:>10.2}", category.to_string(), total);
    }
    let total: f64 = in_month.iter().map(|receipt| receipt.total).sum();
    println!("  {:<13} {:>10.2}", "total", total);

    if let Some(subscription) = app.subscription().await? {
        let status = quota_status(&subscription.current(Local::now().date_naive()).await?);
        match (status.remaining_receipts, status.remaining_ai_scans) {
            (Some(receipts_left), Some(scans_left)) => println!(
                "Quota: {receipts_left} receipts, {scans_left} AI scans remaining this month"
            ),
            _ => println!("Plan: pro (unlimited)"),
        }
    }
    Ok(())
}

/// Re-evaluate achievements against the current receipts and persist both
/// the refreshed progress and any new unlock notifications.
async fn evaluate_achievements(
    app: &App,
    receipts: &CollectionSync<Receipt, Backend>,
) -> Result<Evaluation, CliError> {
    let achievements_sync = app.collection::<Achievement>().await?;
    let evaluation = achievements::evaluate(
        &receipts.records(),
        &achievements_sync.records(),
        Local::now().date_naive(),
        unix_timestamp_ms(),
    );

    if app.sync_identity().is_some() {
        // Remotely only unlocked achievements are stored, one doc per id
        for notification in &evaluation.newly_unlocked {
            achievements_sync
                .upsert(notification.achievement.clone())
                .await?;
        }
    } else {
        app.local.save_collection(&evaluation.achievements);
    }

    if !evaluation.newly_unlocked.is_empty() {
        let mut notifications: Vec<AchievementNotification> = app.local.load_named(NOTIFICATIONS_KEY);
        notifications.extend(evaluation.newly_unlocked.iter().cloned());
        app.local.save_named(NOTIFICATIONS_KEY, &notifications);
    }

    Ok(evaluation)
}

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

async fn run_migrate(
    data_dir: &Path,
    config: &ClientConfig,
    yes: bool,
    skip: bool,
) -> Result<(), CliError> {
    let app = App::open(data_dir, config).await?;
    let Some(identity) = app.sync_identity() else {
        return Err(CliError::NotSignedIn);
    };
    let flow = MigrationFlow::new(app.local.clone(), app.backend.clone(), identity);

    if skip {
        flow.skip();
        println!("Migration skipped; it will not be offered again for this account.");
        return Ok(());
    }

    let Some(prompt) = flow.check().await? else {
        println!("Nothing to migrate.");
        return Ok(());
    };

    println!("Local data found:");
    println!("  Receipts:             {}", prompt.receipt_count);
    println!("  Unlocked achievements: {}", prompt.unlocked_achievement_count);
    if prompt.has_ai_settings {
        println!("  AI settings:          configured");
    }
    if prompt.store_name_count > 0 {
        println!("  Remembered stores:    {}", prompt.store_name_count);
    }

    if !yes && !confirm("Copy this data to your account?")? {
        println!("Not migrating. Run `tally migrate` again anytime, or `tally migrate --skip` to dismiss.");
        return Ok(());
    }
    if prompt.remote_has_data
        && !yes
        && !confirm("Your account already has receipts. Merge (duplicates are skipped)?")?
    {
        println!("Not migrating.");
        return Ok(());
    }

    let outcome = flow
        .migrate(|progress| {
            print!("\rMigrating... {}/{}", progress.completed, progress.total);
            let _ = io::stdout().flush();
        })
        .await?;
    println!();
    println!(
        "Migrated {} receipts ({} duplicates skipped) and {} achievements.",
        outcome.migrated_receipts, outcome.skipped_duplicates, outcome.migrated_achievements
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

async fn run_auth_login(
    config: &ClientConfig,
    email: &str,
    password: Option<String>,
) -> Result<(), CliError> {
    let password = read_password(password)?;
    let store = FileSessionStore::new(FileSessionStore::default_path());
    let client = auth_client(config, store)?;
    let session = client.sign_in(email, &password).await?;
    println!(
        "Signed in as {}",
        session.identity.email.as_deref().unwrap_or(&session.identity.user_id)
    );
    println!("Run `tally migrate` to copy signed-out data to your account.");
    Ok(())
}

async fn run_auth_signup(
    config: &ClientConfig,
    email: &str,
    password: Option<String>,
) -> Result<(), CliError> {
    let password = read_password(password)?;
    let store = FileSessionStore::new(FileSessionStore::default_path());
    let client = auth_client(config, store)?;
    match client.sign_up(email, &password).await? {
        SignUpOutcome::SignedIn(session) => {
            println!(
                "Signed up and in as {}",
                session.identity.email.as_deref().unwrap_or(&session.identity.user_id)
            );
        }
        SignUpOutcome::ConfirmationRequired => {
            println!("Check your email to confirm the account, then run `tally auth login`.");
        }
    }
    Ok(())
}

async fn run_auth_logout(config: &ClientConfig) -> Result<(), CliError> {
    let store = FileSessionStore::new(FileSessionStore::default_path());
    let session = store.load().unwrap_or_default();
    match (session, config.auth_configured()) {
        (Some(session), true) => {
            let client = auth_client(config, store)?;
            client.sign_out(&session).await?;
        }
        _ => store.clear()?,
    }
    println!("Signed out. Local data stays on this device; cloud data stays in your account.");
    Ok(())
}

async fn run_auth_status(config: &ClientConfig) -> Result<(), CliError> {
    match load_session(config).await {
        Some(session) => {
            println!(
                "Signed in as {} ({})",
                session.identity.email.as_deref().unwrap_or("no email"),
                session.identity.user_id
            );
            println!("Session expires at {}", format_timestamp(session.expires_at * 1000));
        }
        None => println!("Not signed in."),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config & completions
// ---------------------------------------------------------------------------

fn run_config_show(config: &ClientConfig) {
    let display = |value: &Option<String>| value.clone().unwrap_or_else(|| "(not set)".to_string());
    println!("api_base_url:     {}", display(&config.api_base_url));
    println!("auth_url:         {}", display(&config.auth_url));
    println!("anon_key:         {}", display(&config.anon_key));
    println!("einvoice_app_id:  {}", display(&config.einvoice_app_id));
    println!(
        "einvoice_api_key: {}",
        if config.einvoice_api_key.is_some() {
            "(configured)"
        } else {
            "(not set)"
        }
    );
}

fn run_config_set(
    api_base_url: Option<String>,
    auth_url: Option<String>,
    anon_key: Option<String>,
    einvoice_app_id: Option<String>,
    einvoice_api_key: Option<String>,
) -> Result<(), CliError> {
    let path = ClientConfig::default_path();
    let mut config = ClientConfig::load_from_path(&path)?;
    if let Some(value) = api_base_url {
        config.api_base_url = Some(value);
    }
    if let Some(value) = auth_url {
        config.auth_url = Some(value);
    }
    if let Some(value) = anon_key {
        config.anon_key = Some(value);
    }
    if let Some(value) = einvoice_app_id {
        config.einvoice_app_id = Some(value);
    }
    if let Some(value) = einvoice_api_key {
        config.einvoice_api_key = Some(value);
    }
    config.validate()?;
    config.save_to_path(&path)?;
    println!("{}", path.display());
    Ok(())
}

fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let mut command = Cli::command();
    let mut buffer = Vec::new();

    match shell {
        CompletionShell::Bash => generate_for_shell(shells::Bash, &mut command, &mut buffer),
        CompletionShell::Zsh => generate_for_shell(shells::Zsh, &mut command, &mut buffer),
        CompletionShell::Fish => generate_for_shell(shells::Fish, &mut command, &mut buffer),
    }

    if let Some(path) = output_path {
        std::fs::write(path, &buffer)?;
        println!("{}", path.display());
    } else {
        io::stdout().write_all(&buffer)?;
    }

    Ok(())
}

fn generate_for_shell<G: Generator>(
    generator: G,
    command: &mut clap::Command,
    buffer: &mut Vec<u8>,
) {
    generate(generator, command, "tally", buffer);
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn resolve_data_dir(cli_data_dir: Option<PathBuf>) -> PathBuf {
    cli_data_dir
        .or_else(|| std::env::var_os("TALLY_DATA_DIR").map(PathBuf::from))
        .unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tally")
        })
}

fn parse_category(raw: &str) -> Result<Category, CliError> {
    raw.parse()
        .map_err(|_| CliError::InvalidCategory(raw.to_string()))
}

fn parse_provider(raw: &str) -> Result<AiProvider, CliError> {
    AiProvider::ALL
        .into_iter()
        .find(|provider| provider.as_str() == raw.trim().to_lowercase())
        .ok_or_else(|| CliError::InvalidArgument(format!("unknown provider: {raw}")))
}

fn parse_carrier_type(raw: &str) -> Result<CarrierType, CliError> {
    match raw.trim().to_lowercase().as_str() {
        "phone" => Ok(CarrierType::Phone),
        "natural" => Ok(CarrierType::Natural),
        "credit_card" | "credit-card" => Ok(CarrierType::CreditCard),
        _ => Err(CliError::InvalidArgument(format!("unknown carrier type: {raw}"))),
    }
}

/// Build line items from `NAME:QTY:PRICE` / `NAME:PRICE` specs, or from a
/// bare `--amount` when no items were given.
fn parse_items(specs: &[String], amount: Option<f64>) -> Result<Vec<ReceiptItem>, CliError> {
    if specs.is_empty() {
        let amount = amount.ok_or(CliError::EmptyReceipt)?;
        return Ok(vec![ReceiptItem {
            name: "General".to_string(),
            quantity: 1,
            price: amount,
        }]);
    }
    specs.iter().map(|spec| parse_item(spec)).collect()
}

fn parse_item(spec: &str) -> Result<ReceiptItem, CliError> {
    let parts: Vec<&str> = spec.rsplitn(3, ':').collect();
    let invalid = || CliError::InvalidItem(spec.to_string());

    match parts.as_slice() {
        // rsplitn yields segments right-to-left
        [price, quantity, name] => Ok(ReceiptItem {
            name: non_empty_name(name).ok_or_else(invalid)?,
            quantity: quantity.trim().parse().map_err(|_| invalid())?,
            price: price.trim().parse().map_err(|_| invalid())?,
        }),
        [price, name] => Ok(ReceiptItem {
            name: non_empty_name(name).ok_or_else(invalid)?,
            quantity: 1,
            price: price.trim().parse().map_err(|_| invalid())?,
        }),
        _ => Err(invalid()),
    }
}

fn non_empty_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, CliError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| CliError::InvalidDate(raw.to_string()))
}

fn parse_month(raw: &str) -> Result<String, CliError> {
    let trimmed = raw.trim();
    let valid = NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d").is_ok();
    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(CliError::InvalidMonth(raw.to_string()))
    }
}

fn resolve_receipt(records: &[Receipt], query: &str) -> Result<Receipt, CliError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::ReceiptNotFound(query.to_string()));
    }

    let matches: Vec<&Receipt> = records
        .iter()
        .filter(|receipt| receipt.id.as_str().starts_with(query))
        .collect();
    match matches.as_slice() {
        [] => Err(CliError::ReceiptNotFound(query.to_string())),
        [receipt] => Ok((*receipt).clone()),
        ambiguous => {
            let options = ambiguous
                .iter()
                .take(3)
                .map(|receipt| receipt.id.as_str().chars().take(13).collect::<String>())
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousReceiptId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

fn format_receipt_lines(receipts: &[Receipt]) -> Vec<String> {
    receipts
        .iter()
        .map(|receipt| {
            let id = receipt.id.as_str();
            let short_id = id.chars().take(13).collect::<String>();
            let store = receipt.store_name.chars().take(20).collect::<String>();
            let category = receipt.category.to_string();
            format!(
                "{short_id:<13}  {}  {store:<20}  {category:<13}  {:>9.2}",
                receipt.date, receipt.total
            )
        })
        .collect()
}

fn format_timestamp(unix_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(unix_ms)
        .map_or_else(|| unix_ms.to_string(), |time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

fn confirm(prompt: &str) -> Result<bool, CliError> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let answer = line.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

fn read_password(flag: Option<String>) -> Result<String, CliError> {
    if let Some(password) = flag {
        return Ok(password);
    }
    eprint!("Password: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}
