//! Load a user's ledger through the domain store and print a summary.
#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), deny(clippy::expect_used))]
//!
//! Runs against the PostgREST gateway when `LEDGER_STORE_GATEWAY_URL` is set
//! and against the bundled fixture otherwise.
//!
//! # Examples
//! ```sh
//! cargo run --manifest-path store/Cargo.toml --bin ledger-snapshot -- \
//!     --user-id 5d1f6a3e-8f0b-4c1e-9a57-2b6c0e4d9f10
//! ```

use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use ledger_store::domain::ports::RemoteGateway;
use ledger_store::domain::{
    Collection, DomainStore, Measure, RecordKind, StoreSnapshot, UnitSystem, UserId,
};
use ledger_store::outbound::memory::InMemoryGateway;
use ledger_store::outbound::rest::RestGateway;
use ledger_store::settings::StoreSettings;
use ortho_config::OrthoConfig;
use tokio::runtime::Builder;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// `ledger-snapshot` command arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ledger-snapshot",
    about = "Load a user's profile, expenses and mileage through the domain store",
    version
)]
struct CliArgs {
    /// Identifier of the signed-in user.
    #[arg(long = "user-id", value_name = "uuid", value_parser = parse_user_id)]
    user_id: UserId,
    /// Bearer token for the HTTP gateway.
    #[arg(long = "access-token", value_name = "token")]
    access_token: Option<String>,
    /// Fixture to serve offline, overriding `LEDGER_STORE_FIXTURE_PATH`.
    #[arg(long = "fixture", value_name = "path")]
    fixture: Option<PathBuf>,
}

fn parse_user_id(raw: &str) -> Result<UserId, String> {
    UserId::new(raw).map_err(|error| error.to_string())
}

fn main() -> io::Result<()> {
    if let Err(error) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %error, "tracing init failed");
    }

    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| io::Error::other(format!("create Tokio runtime: {error}")))?;
    runtime.block_on(async_main())
}

async fn async_main() -> io::Result<()> {
    let args = CliArgs::try_parse().map_err(io::Error::other)?;
    let settings = StoreSettings::load_from_iter([OsString::from("ledger-snapshot")])
        .map_err(|error| io::Error::other(format!("load settings: {error}")))?;
    let gateway_url = settings.gateway_url().map_err(|error| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("LEDGER_STORE_GATEWAY_URL is not a URL: {error}"),
        )
    })?;

    if let Some(url) = gateway_url {
        info!(gateway = %url, "using HTTP gateway");
        let mut gateway = RestGateway::new(url, settings.request_timeout())
            .map_err(|error| io::Error::other(format!("build HTTP client: {error}")))?;
        if let Some(key) = settings.api_key {
            gateway = gateway.with_api_key(key);
        }
        if let Some(token) = args.access_token {
            gateway = gateway.with_access_token(token);
        }
        summarize(Arc::new(gateway), args.user_id).await
    } else {
        let path = args.fixture.unwrap_or_else(|| settings.fixture_path());
        info!(fixture = %path.display(), "using in-memory gateway");
        let gateway = InMemoryGateway::from_fixture(&path)
            .map_err(|error| io::Error::other(format!("seed fixture gateway: {error}")))?;
        summarize(Arc::new(gateway), args.user_id).await
    }
}

async fn summarize<G>(gateway: Arc<G>, user_id: UserId) -> io::Result<()>
where
    G: RemoteGateway + 'static,
{
    let store = DomainStore::new(gateway, user_id);
    let snapshot = store.initialize().await;
    let categories = match store.categories().ensure_loaded().await {
        Ok(loaded) => loaded.len(),
        Err(error) => {
            warn!(error = %error, "category taxonomy unavailable");
            0
        }
    };

    let mut out = io::stdout().lock();
    write_summary(&mut out, &snapshot, categories)
}

fn write_summary(
    out: &mut impl Write,
    snapshot: &StoreSnapshot,
    categories: usize,
) -> io::Result<()> {
    writeln!(out, "lifecycle={:?}", snapshot.lifecycle())?;
    writeln!(out, "onboarding_complete={}", snapshot.onboarding_complete())?;
    if let Some(profile) = snapshot.profile() {
        writeln!(out, "display_name={}", profile.display_name)?;
        writeln!(out, "region={}", profile.region)?;
        writeln!(out, "unit_system={}", profile.unit_system)?;
    }
    writeln!(out, "categories={categories}")?;

    let expenses = snapshot.records(RecordKind::Expense);
    let spent: i64 = expenses
        .iter()
        .filter_map(|record| match record.measure {
            Measure::Money { minor_units } => Some(minor_units),
            Measure::Distance { .. } => None,
        })
        .sum();
    writeln!(out, "expenses={} total_minor_units={spent}", expenses.len())?;

    let trips = snapshot.records(RecordKind::Mileage);
    let (metric, imperial) = trips.iter().fold((0_u64, 0_u64), |(km, mi), record| {
        match record.measure {
            Measure::Distance {
                tenths,
                unit: UnitSystem::Metric,
            } => (km + u64::from(tenths), mi),
            Measure::Distance {
                tenths,
                unit: UnitSystem::Imperial,
            } => (km, mi + u64::from(tenths)),
            Measure::Money { .. } => (km, mi),
        }
    });
    writeln!(
        out,
        "mileage_logs={} km_tenths={metric} mi_tenths={imperial}",
        trips.len()
    )?;

    for collection in Collection::ALL {
        if let Some(error) = snapshot.load_error(collection) {
            writeln!(out, "load_error[{collection}]={}: {error}", error.code())?;
        }
    }
    Ok(())
}
