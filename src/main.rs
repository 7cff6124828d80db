//! Runs the reference suite against `IMAGE_NAME`.
//!
//! Exit status: 0 when every case passed, 1 when any case failed, 2 when
//! configuration or setup failed or the run was interrupted. Ctrl-C stops the
//! container before exiting.

use std::process::ExitCode;

use imagecheck::{DockerRuntime, Harness, HarnessConfig, SuiteReport, suite};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(report) if report.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run() -> anyhow::Result<SuiteReport> {
    let config = HarnessConfig::from_env()?;
    tracing::info!(image = %config.image, "Verifying image");

    let runtime = DockerRuntime::connect().await?;
    let mut harness = Harness::new(runtime, config);
    let report = harness
        .run_until(&suite::debian9_nginx(), tokio::signal::ctrl_c())
        .await?;

    print!("{}", report.render());
    if let Some(path) = &harness.config().report_path {
        report.write_json(path)?;
        tracing::info!(path = %path.display(), "Report written");
    }

    Ok(report)
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("imagecheck=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
