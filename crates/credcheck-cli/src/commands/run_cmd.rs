use anyhow::{bail, Context, Result};
use clap::Args;
use credcheck::auth::Authentication;
use credcheck::config::{AuthMode, CredcheckConfig, HubEndpoint, RidPolicy};
use credcheck::csr;
use credcheck::report::OutcomeReport;
use credcheck::scenario::{self, Scenario, ScenarioContext};
use credcheck::transport::MqttTransport;
use credcheck::{RunController, RunOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, warn};

use super::list_cmd::{print_scenarios, write_scenarios};
use super::parsers::parse_duration;

#[derive(Args)]
pub struct RunCommand {
    /// Scenario to run
    #[arg(default_value = "happy_path")]
    pub scenario: String,

    /// List all available scenarios and exit
    #[arg(long)]
    pub list_scenarios: bool,

    /// Use X.509 certificate authentication
    #[arg(long, conflicts_with = "sas")]
    pub cert: bool,

    /// Use SAS token authentication (token is generated)
    #[arg(long)]
    pub sas: bool,

    /// Hub hostname (overrides --hub-name/--hub-domain)
    #[arg(long, short = 'H')]
    pub host: Option<String>,

    /// Hub name, combined with --hub-domain
    #[arg(long, env = "HUB_NAME")]
    pub hub_name: Option<String>,

    /// Hub DNS domain
    #[arg(long)]
    pub hub_domain: Option<String>,

    /// Device id, also used as the MQTT client id
    #[arg(long, short, env = "DEVICE_NAME")]
    pub device: Option<String>,

    /// Hub port
    #[arg(long, short)]
    pub port: Option<u16>,

    /// api-version query parameter of the MQTT username
    #[arg(long)]
    pub api_version: Option<String>,

    /// Trusted root CA (PEM)
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,

    /// Device certificate (PEM), default ./certGen/certs/<device>.crt
    #[arg(long)]
    pub device_cert: Option<PathBuf>,

    /// Device private key (PEM), default ./certGen/private/<device>.key
    #[arg(long)]
    pub device_key: Option<PathBuf>,

    /// Base64 shared access key
    #[arg(long, env = "IOTHUB_SAS_KEY", hide_env_values = true)]
    pub sas_key: Option<String>,

    /// Shared access policy name; empty signs with a device key
    #[arg(long)]
    pub sas_policy: Option<String>,

    /// SAS token validity (seconds or humantime)
    #[arg(long, value_parser = parse_duration)]
    pub token_ttl: Option<Duration>,

    /// Bound on each wait for the response or disconnection
    #[arg(long, short, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Delay before reconnecting in disconnect_reconnect
    #[arg(long, value_parser = parse_duration)]
    pub reconnect_delay: Option<Duration>,

    /// Base64 CSR to send instead of the mock CSR
    #[arg(long, conflicts_with = "csr_file")]
    pub csr: Option<String>,

    /// CSR file (PEM or DER)
    #[arg(long)]
    pub csr_file: Option<PathBuf>,

    /// Accept the first response even if its $rid differs from the request
    #[arg(long)]
    pub accept_any_rid: bool,

    /// Output format for the outcome: text, json
    #[arg(long, short, default_value = "text", value_parser = ["text", "json"])]
    pub output: String,

    /// TOML configuration file
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

pub async fn execute(cmd: RunCommand, verbose: bool, debug: bool) -> Result<ExitCode> {
    crate::init_basic_tracing(verbose, debug);

    if cmd.list_scenarios {
        print_scenarios();
        return Ok(ExitCode::SUCCESS);
    }

    if !check_scenario(&cmd.scenario, &mut io::stdout().lock())? {
        return Ok(ExitCode::FAILURE);
    }

    let has_config = cmd.config.is_some();
    let mut config = match &cmd.config {
        Some(path) => CredcheckConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => CredcheckConfig::default(),
    };
    apply_overrides(&mut config, &cmd);

    if !cmd.cert && !cmd.sas && !has_config {
        bail!("Authentication method required: use --cert or --sas");
    }

    let endpoint = config
        .hub
        .endpoint()
        .context("Hub endpoint is incomplete (use --host or --hub-name, and --device)")?;

    let csr = resolve_csr(&config)?;
    let mut ctx = ScenarioContext::new(endpoint.device_id.clone()).with_csr(csr);
    if let Some(delay) = config.run.reconnect_delay {
        ctx = ctx.with_reconnect_delay(delay);
    }
    let scenario = scenario::build_scenario(&cmd.scenario, &ctx)?;

    let auth = Authentication::from_config(&config.auth, &endpoint.device_id)?;
    print_banner(scenario.as_ref(), &endpoint, &auth, config.run.timeout);

    let credentials = auth
        .resolve(&endpoint)
        .with_context(|| format!("Failed to prepare {} credentials", auth.label()))?;
    if let Some(password) = &credentials.password {
        println!("✓ SAS token generated");
        println!("Token preview: {}...\n", preview(password, 80));
    }

    let options = RunOptions::default()
        .with_timeout(config.run.timeout)
        .with_rid_policy(config.run.rid_policy);
    let controller = RunController::new(MqttTransport::new(&endpoint, credentials), options);

    println!("Connecting to {}:{}...", endpoint.host, endpoint.port);
    let outcome = controller.run_until(scenario, interrupted()).await;

    if cmd.output == "json" {
        println!("{}", OutcomeReport::new(&outcome).generate_json()?);
    } else {
        println!("\n{}", OutcomeReport::new(&outcome).generate_text());
    }

    Ok(if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn apply_overrides(config: &mut CredcheckConfig, cmd: &RunCommand) {
    let hub = &mut config.hub;
    if cmd.host.is_some() {
        hub.host.clone_from(&cmd.host);
    }
    if cmd.hub_name.is_some() {
        hub.hub_name.clone_from(&cmd.hub_name);
    }
    if cmd.hub_domain.is_some() {
        hub.hub_domain.clone_from(&cmd.hub_domain);
    }
    if cmd.device.is_some() {
        hub.device_id.clone_from(&cmd.device);
    }
    if cmd.port.is_some() {
        hub.port = cmd.port;
    }
    if cmd.api_version.is_some() {
        hub.api_version.clone_from(&cmd.api_version);
    }

    let auth = &mut config.auth;
    if cmd.cert {
        auth.mode = AuthMode::Certificate;
    } else if cmd.sas {
        auth.mode = AuthMode::Sas;
    }
    if let Some(ca) = &cmd.ca_cert {
        auth.ca_cert.clone_from(ca);
    }
    if cmd.device_cert.is_some() {
        auth.device_cert.clone_from(&cmd.device_cert);
    }
    if cmd.device_key.is_some() {
        auth.device_key.clone_from(&cmd.device_key);
    }
    if cmd.sas_key.is_some() {
        auth.sas_key.clone_from(&cmd.sas_key);
    }
    if let Some(policy) = &cmd.sas_policy {
        auth.sas_policy = Some(policy.clone()).filter(|p| !p.is_empty());
    }
    if let Some(ttl) = cmd.token_ttl {
        auth.token_ttl = ttl;
    }

    let run = &mut config.run;
    if let Some(timeout) = cmd.timeout {
        run.timeout = timeout;
    }
    if cmd.reconnect_delay.is_some() {
        run.reconnect_delay = cmd.reconnect_delay;
    }
    if cmd.csr.is_some() {
        run.csr.clone_from(&cmd.csr);
        run.csr_file = None;
    }
    if cmd.csr_file.is_some() {
        run.csr_file.clone_from(&cmd.csr_file);
        run.csr = None;
    }
    if cmd.accept_any_rid {
        run.rid_policy = RidPolicy::Lenient;
    }
}

fn resolve_csr(config: &CredcheckConfig) -> Result<String> {
    if let Some(path) = &config.run.csr_file {
        debug!(path = %path.display(), "Reading CSR file");
        return csr::csr_from_file(path)
            .with_context(|| format!("Failed to load CSR from {}", path.display()));
    }
    match &config.run.csr {
        Some(value) => csr::validate_csr(value).context("Invalid --csr value"),
        None => Ok(scenario::MOCK_CSR.to_string()),
    }
}

fn print_banner(
    scenario: &dyn Scenario,
    endpoint: &HubEndpoint,
    auth: &Authentication,
    timeout: Duration,
) {
    let rule = "=".repeat(70);
    println!("\n{rule}");
    println!("MQTT Credential Management Test - {}", scenario.name());
    println!("Description: {}", scenario.description());
    println!("{rule}");
    println!("Host: {}", endpoint.host);
    println!("Port: {}", endpoint.port);
    println!("Device: {}", endpoint.device_id);
    println!("Request ID: {}", scenario.correlation_id());
    println!("Authentication: {}", auth.label());
    match auth {
        Authentication::Certificate {
            ca_cert,
            device_cert,
            device_key,
        } => {
            println!("CA Cert: {}", ca_cert.display());
            println!("Device Cert: {}", device_cert.display());
            println!("Device Key: {}", device_key.display());
        }
        Authentication::SharedAccessSignature {
            ca_cert, policy, ..
        } => {
            println!("CA Cert: {}", ca_cert.display());
            println!("Policy: {}", policy.as_deref().unwrap_or("(device key)"));
        }
    }
    println!("Subscribe Topic: {}", scenario.subscribe_filter());
    println!("Publish Topic: {}", scenario.publish_topic());
    println!("Timeout: {}", humantime::format_duration(timeout));
    println!("{rule}\n");
}

/// Reports an unknown scenario name together with the registry listing.
/// Returns `false` when the run must stop before connecting.
fn check_scenario(name: &str, out: &mut impl Write) -> io::Result<bool> {
    if scenario::find(name).is_some() {
        return Ok(true);
    }
    writeln!(out, "✗ Error: Unknown scenario '{name}'")?;
    write_scenarios(out)?;
    Ok(false)
}

fn preview(token: &str, max: usize) -> String {
    token.chars().take(max).collect()
}

/// Resolves on Ctrl+C. If the handler cannot be installed it never resolves.
async fn interrupted() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
