//! Safeshift - run batched, resumable schema migrations.

mod config;
mod formatter;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use safeshift_core::connection::{self, Connection};
use safeshift_core::migration::{
    CancellationToken, MigrationExecutor, MigrationPlan, TableLedger, EXIT_SUCCESS,
};

use config::{Args, Mode, RunConfig, EXIT_USAGE};

fn main() {
    // Logs go to stderr so that reports on stdout stay machine-readable.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "safeshift=info,safeshift_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Args::parse().into_config();

    let code = match run(config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_USAGE
        }
    };

    std::process::exit(code);
}

/// Load the plan, open the database and run the requested mode.
///
/// Errors returned here are setup problems; migration failures are part
/// of the report and only affect the exit code.
fn run(config: RunConfig) -> Result<i32, Box<dyn std::error::Error>> {
    let plan = MigrationPlan::from_path(&config.plan_path)?;
    tracing::info!(
        plan = %plan.name,
        path = %config.plan_path.display(),
        steps = plan.step_count(),
        "plan loaded"
    );

    let mut conn = connection::open(&config.database)?;
    tracing::info!(dialect = %conn.dialect(), "database opened");

    let cancel = CancellationToken::new();
    install_ctrl_c(cancel.clone());

    let ledger = TableLedger::new().with_table_name(config.ledger_table.clone())?;
    let mut executor =
        MigrationExecutor::new(&mut *conn, config.executor.clone()).with_ledger(ledger);
    let formatter = formatter::create_formatter(config.format);

    let code = match config.mode {
        Mode::Apply => {
            let result = executor.apply(&plan, &cancel)?;
            println!("{}", formatter.format_plan_result(&result));
            result.exit_code()
        }
        Mode::DryRun => {
            let estimates = executor.estimate(&plan)?;
            println!("{}", formatter.format_estimates(&plan, &estimates));
            EXIT_SUCCESS
        }
        Mode::Status => {
            let entries = executor.status(&plan)?;
            println!("{}", formatter.format_status(&plan, &entries));
            EXIT_SUCCESS
        }
        Mode::Revert(step) => {
            let upto = match step.as_deref().or_else(|| plan.steps.last().map(|s| s.name.as_str())) {
                Some(upto) => upto.to_string(),
                None => return Err("plan has no steps".into()),
            };
            let result = executor.revert(&plan, &upto, &cancel)?;
            println!("{}", formatter.format_revert_result(&result));
            result.exit_code()
        }
    };

    Ok(code)
}

/// Cancel `token` on Ctrl-C. The engine stops before its next batch.
fn install_ctrl_c(token: CancellationToken) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::error!(error = %e, "failed to start signal listener");
                return;
            }
        };

        runtime.block_on(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl+c");
                return;
            }
            tracing::warn!("received interrupt, stopping after the current batch");
            token.cancel();
        });
    });
}
