//! BrowserBench CLI - runs YAML scenarios against a WebDriver server

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use browserbench_e2e::config::keys;
use browserbench_e2e::{
    ConfigSource, EnvSource, HarnessConfig, HarnessResult, LayeredSource, LifecycleController,
    MapSource, ModeResolver, Scenario, SuiteRunner, TomlSource, WebDriverLauncher,
};

/// BrowserBench - browser test execution harness
#[derive(Parser)]
#[command(name = "browserbench")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory of scenario files (*.yaml, *.yml)
    #[arg(long, default_value = "scenarios")]
    scenarios: PathBuf,

    /// Only run scenarios with this tag
    #[arg(long)]
    tag: Option<String>,

    /// Only run tests with this name
    #[arg(long)]
    name: Option<String>,

    /// TOML configuration file
    #[arg(long, default_value = "browserbench.toml")]
    config: PathBuf,

    /// Force headless (true) or interactive (false) execution
    #[arg(long, env = "BROWSERBENCH_HEADLESS")]
    headless: Option<String>,

    /// WebDriver endpoint
    #[arg(long)]
    webdriver_url: Option<String>,

    /// Entry URL of the system under test
    #[arg(long)]
    base_url: Option<String>,

    /// Report output directory
    #[arg(long)]
    output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    /// Explicit flags, highest precedence layer.
    fn overrides(&self) -> MapSource {
        let mut map = MapSource::new();
        if let Some(url) = &self.webdriver_url {
            map.set(keys::WEBDRIVER_URL, url.clone());
        }
        if let Some(url) = &self.base_url {
            map.set(keys::BASE_URL, url.clone());
        }
        if let Some(dir) = &self.output {
            map.set(keys::REPORT_DIR, dir.display().to_string());
        }
        map
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let code = match run(args).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!("{}", e);
            2
        }
    };
    std::process::exit(code);
}

/// `Ok(true)` when every test passed or was skipped.
async fn run(args: Args) -> HarnessResult<bool> {
    let source: Arc<dyn ConfigSource> = Arc::new(
        LayeredSource::new()
            .push(args.overrides())
            .push(EnvSource)
            .push(TomlSource::load(&args.config)),
    );
    let config = Arc::new(HarnessConfig::from_source(source.as_ref())?);
    info!(
        base_url = %config.base_url,
        webdriver = %config.webdriver_url,
        "Loaded configuration"
    );

    let mut scenarios = Scenario::load_all(&args.scenarios)?;
    if let Some(tag) = &args.tag {
        scenarios = Scenario::filter_by_tag(scenarios, tag);
    }
    if let Some(name) = &args.name {
        scenarios = Scenario::filter_by_test_name(scenarios, name);
    }
    if scenarios.is_empty() {
        warn!("No scenarios matched in {}", args.scenarios.display());
        return Ok(true);
    }
    info!("Loaded {} scenario(s)", scenarios.len());

    let resolver = Arc::new(ModeResolver::new(args.headless.clone(), source));
    let launcher = Arc::new(WebDriverLauncher::new(config.webdriver_url.clone()));
    let lifecycle = Arc::new(LifecycleController::new(Arc::clone(&config), resolver, launcher));
    let runner = SuiteRunner::new(lifecycle);

    let results = runner
        .run(scenarios.into_iter().map(Scenario::into_class).collect())
        .await;
    runner.write_results(&results)?;

    info!(
        "Report: {} ({})",
        config.html_report_path().display(),
        config.json_report_path().display()
    );
    Ok(results.success())
}
