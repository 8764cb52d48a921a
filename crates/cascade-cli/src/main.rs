//! `cascade` - runs demo invoices through the agent chain

use anyhow::{Context, Result};
use cascade_core::{
    CascadeConfig, CascadeReport, ExternalJudge, FallbackJudge, HeuristicJudge, Orchestrator,
};
use cascade_llm::{ChatCompletionsConfig, ChatCompletionsJudge};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod scenario;

use scenario::Scenario;

fn cli() -> Command {
    Command::new("cascade")
        .version(cascade_core::VERSION)
        .about("Run invoices through the agent chain and classify cascading failures")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run")
                .about("Run one scenario, or all of them concurrently")
                .arg(
                    Arg::new("scenario")
                        .long("scenario")
                        .short('s')
                        .default_value("all")
                        .help("Scenario name, or `all`"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .short('c')
                        .value_parser(value_parser!(PathBuf))
                        .help("TOML configuration file"),
                )
                .arg(
                    Arg::new("strict")
                        .long("strict")
                        .action(ArgAction::SetTrue)
                        .help("Stop the chain at the first halting stage"),
                )
                .arg(
                    Arg::new("validator-only")
                        .long("validator-only")
                        .action(ArgAction::SetTrue)
                        .help("Run only the validator stage"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output reports as JSON"),
                )
                .arg(
                    Arg::new("endpoint")
                        .long("endpoint")
                        .help("OpenAI-compatible chat-completions URL; enables the remote judge"),
                )
                .arg(
                    Arg::new("model")
                        .long("model")
                        .help("Model name for the remote judge; enables the remote judge"),
                ),
        )
        .subcommand(Command::new("scenarios").about("List built-in scenarios"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cascade=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("run", args)) => run(args).await,
        Some(("scenarios", _)) => {
            for scenario in Scenario::ALL {
                println!("{:<16} {}", scenario.name(), scenario.summary());
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

async fn run(args: &ArgMatches) -> Result<()> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => CascadeConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CascadeConfig::default(),
    };
    if args.get_flag("strict") {
        config = config.with_strict(true);
    }

    let scenarios = match args.get_one::<String>("scenario").map(String::as_str) {
        Some("all") | None => Scenario::ALL.to_vec(),
        Some(name) => vec![name.parse::<Scenario>().map_err(anyhow::Error::msg)?],
    };

    let base = build_judge(args, &config)?;
    let runs = scenarios
        .iter()
        .map(|scenario| {
            Orchestrator::new(config.clone(), scenario.judge(base.clone()))
                .map(|orchestrator| (*scenario, orchestrator))
                .context("building orchestrator")
        })
        .collect::<Result<Vec<_>>>()?;
    tracing::info!(
        "Running {} scenario(s) (strict: {})",
        runs.len(),
        runs.first().is_some_and(|(_, o)| o.is_strict())
    );

    let json = args.get_flag("json");
    if args.get_flag("validator-only") {
        return run_validator_only(&runs, json).await;
    }

    let reports = join_all(runs.iter().map(|(scenario, orchestrator)| {
        let invoice = scenario.invoice();
        async move { orchestrator.run(&invoice).await }
    }))
    .await;

    let mut rendered = Vec::with_capacity(reports.len());
    for ((scenario, _), report) in runs.iter().zip(reports) {
        let report = report.with_context(|| format!("scenario {scenario}"))?;
        if json {
            rendered.push(serde_json::json!({
                "scenario": scenario.name(),
                "report": serde_json::to_value(&report)?,
            }));
        } else {
            print_report(*scenario, &report);
        }
    }

    if json {
        print_json(rendered)?;
    }
    Ok(())
}

async fn run_validator_only(runs: &[(Scenario, Orchestrator)], json: bool) -> Result<()> {
    let results = join_all(runs.iter().map(|(scenario, orchestrator)| {
        let invoice = scenario.invoice();
        async move { orchestrator.run_validator(&invoice).await }
    }))
    .await;

    let mut rendered = Vec::with_capacity(results.len());
    for ((scenario, _), result) in runs.iter().zip(results) {
        if json {
            rendered.push(serde_json::json!({
                "scenario": scenario.name(),
                "validator": serde_json::to_value(&result)?,
            }));
        } else {
            println!("== {} ({}) ==", scenario.name(), scenario.summary());
            println!(
                "[{}] validator confidence {:.3}",
                if result.success { "PASS" } else { "FAIL" },
                result.confidence
            );
            for error in &result.errors {
                println!("  - {error}");
            }
            println!("{}", result.reasoning);
            println!();
        }
    }

    if json {
        print_json(rendered)?;
    }
    Ok(())
}

fn print_json(mut rendered: Vec<serde_json::Value>) -> Result<()> {
    let output = if rendered.len() == 1 {
        rendered.remove(0)
    } else {
        serde_json::Value::Array(rendered)
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn build_judge(args: &ArgMatches, config: &CascadeConfig) -> Result<Arc<dyn ExternalJudge>> {
    let endpoint = args.get_one::<String>("endpoint");
    let model = args.get_one::<String>("model");
    if endpoint.is_none() && model.is_none() {
        tracing::info!("Using offline heuristic judge");
        return Ok(Arc::new(HeuristicJudge::new()));
    }

    let mut llm = ChatCompletionsConfig::from_env();
    if let Some(endpoint) = endpoint {
        llm = llm.with_endpoint(endpoint);
    }
    if let Some(model) = model {
        llm = llm.with_model(model);
    }
    tracing::info!(
        "Using remote judge {} ({}), heuristic fallback",
        llm.endpoint,
        llm.model
    );

    let remote = ChatCompletionsJudge::new(llm).context("building remote judge")?;
    let judge = FallbackJudge::new(Arc::new(remote), Arc::new(HeuristicJudge::new()))
        .within(Duration::from_secs(config.judge_timeout_secs));
    Ok(Arc::new(judge))
}

fn print_report(scenario: Scenario, report: &CascadeReport) {
    println!("== {} ({}) ==", scenario.name(), scenario.summary());
    println!("{}", report.render_text());
    println!();
}
