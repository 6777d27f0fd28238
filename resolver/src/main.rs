//! Package conflict resolver.
//!
//! `diagnose` runs install commands and writes an oracle diagnosis;
//! `resolve` applies the diagnosis's solutions, escalating to the oracle
//! when a whole pass fails, until solved or out of options.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

use resolver::apply::{ApplyConfig, ApplyOutcome};
use resolver::consult::ConsultConfig;
use resolver::diagnose::{DEFAULT_INSTALLER, DiagnoseConfig, run_diagnosis};
use resolver::exit_codes;
use resolver::io::advisor::{Advisor, CommandAdvisor};
use resolver::io::command::ShellRunner;
use resolver::io::config::{DEFAULT_CONFIG_FILE, ResolverConfig, load_config};
use resolver::io::diagnosis::{DEFAULT_DIAGNOSIS_FILE, load_diagnosis, render_summary};
use resolver::io::prompt::DEFAULT_PROMPT_BUDGET_BYTES;
use resolver::io::resolution_log::DEFAULT_LOG_FILE;
use resolver::logging;
use resolver::resolve::{ResolutionEvent, ResolveConfig, run_resolution};

#[derive(Parser)]
#[command(
    name = "resolver",
    version,
    about = "Diagnose and resolve package installation conflicts"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply the diagnosis's solutions until the conflict is resolved.
    Resolve(ResolveArgs),
    /// Install packages and ask the oracle for an initial diagnosis.
    Diagnose(DiagnoseArgs),
}

#[derive(Args)]
struct ResolveArgs {
    /// Diagnosis file produced by `diagnose`.
    #[arg(default_value = DEFAULT_DIAGNOSIS_FILE)]
    diagnosis: PathBuf,
    /// Maximum oracle consultations (overrides config).
    #[arg(long)]
    max_ai_iterations: Option<u32>,
    /// Resolution log path.
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    log: PathBuf,
    /// Never consult the oracle; stop after the first failed pass.
    #[arg(long)]
    no_ai: bool,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct DiagnoseArgs {
    /// Packages to install, one install command each.
    #[arg(required = true)]
    packages: Vec<String>,
    /// Where to write the diagnosis.
    #[arg(long, default_value = DEFAULT_DIAGNOSIS_FILE)]
    output: PathBuf,
    /// Skip the python/pip environment diagnostics.
    #[arg(long)]
    no_env_diagnostics: bool,
    /// Install command prefix.
    #[arg(long, default_value = DEFAULT_INSTALLER)]
    installer: String,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args)]
struct CommonArgs {
    /// Config file; defaults apply when it does not exist.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Directory for consultation audit files.
    #[arg(long, default_value = ".")]
    artifacts: PathBuf,
    /// Log progress at info level (RUST_LOG takes precedence).
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Resolve(args) => args.common.verbose,
        Command::Diagnose(args) => args.common.verbose,
    };
    logging::init(verbose);

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Resolve(args) => cmd_resolve(&args),
        Command::Diagnose(args) => cmd_diagnose(&args),
    }
}

fn load(common: &CommonArgs) -> Result<ResolverConfig> {
    let cfg = load_config(&common.config)
        .with_context(|| format!("load config {}", common.config.display()))?;
    debug!(config = ?cfg, "config loaded");
    Ok(cfg)
}

fn advisor_for(cfg: &ResolverConfig) -> CommandAdvisor {
    CommandAdvisor::new(cfg.advisor.command.clone(), cfg.output_limit_bytes)
}

fn cmd_resolve(args: &ResolveArgs) -> Result<i32> {
    let cfg = load(&args.common)?;
    let diagnosis = load_diagnosis(&args.diagnosis)?;
    println!("loaded {}", args.diagnosis.display());
    print!("{}", render_summary(&diagnosis));

    let config = resolve_config(&cfg, args);
    let runner = ShellRunner::new(cfg.output_limit_bytes);
    let command_advisor = advisor_for(&cfg);
    let advisor: Option<&dyn Advisor> = if args.no_ai {
        None
    } else {
        Some(&command_advisor)
    };

    let outcome = run_resolution(&diagnosis, &runner, advisor, &config, print_event)?;
    let session = &outcome.session;
    println!(
        "resolution: state={} iterations={} consultations={}/{} solutions_tried={}",
        outcome.status.terminal_state(),
        session.iteration,
        session.ai_consultation_count,
        config.consult.max_ai_iterations,
        session.ledger.solution_history().len()
    );
    println!("reason: {}", outcome.status);
    println!("log: {}", config.log_path.display());

    Ok(if outcome.status.is_solved() {
        exit_codes::OK
    } else {
        exit_codes::UNSOLVED
    })
}

fn resolve_config(cfg: &ResolverConfig, args: &ResolveArgs) -> ResolveConfig {
    ResolveConfig {
        apply: ApplyConfig {
            command_timeout: cfg.command_timeout(),
            command_pause: cfg.command_pause(),
        },
        consult: ConsultConfig {
            max_ai_iterations: args.max_ai_iterations.unwrap_or(cfg.max_ai_iterations),
            advisor_timeout: cfg.advisor_timeout(),
            artifacts_dir: args.common.artifacts.clone(),
            prompt_budget_bytes: DEFAULT_PROMPT_BUDGET_BYTES,
        },
        max_total_iterations: cfg.max_total_iterations,
        final_check: cfg.final_check().map(str::to_string),
        diagnosis_file: args.diagnosis.clone(),
        log_path: args.log.clone(),
    }
}

fn print_event(event: &ResolutionEvent<'_>) {
    match event {
        ResolutionEvent::PassStarted {
            pass,
            max_passes,
            queue_len,
            session,
        } => {
            println!(
                "pass {}/{}: solutions={} consultations={} web_searches={}",
                pass, max_passes, queue_len, session.ai_consultation_count, session.web_search_count
            );
        }
        ResolutionEvent::SolutionApplied {
            ordinal,
            solution,
            report,
        } => {
            let result = match report.outcome {
                ApplyOutcome::Succeeded if report.verified => "succeeded (verified)",
                ApplyOutcome::Succeeded => "succeeded",
                ApplyOutcome::Failed => "failed",
                ApplyOutcome::NotApplicable => "skipped",
            };
            println!("  solution #{} {}: {}", ordinal, result, solution.description);
            for failed in &report.failed_commands {
                println!("    failed: {}", failed.command);
            }
        }
        ResolutionEvent::FinalCheck { passed } => {
            println!(
                "  final dependency check {}",
                if *passed { "passed" } else { "failed" }
            );
        }
        ResolutionEvent::Surfaced { solution } => {
            println!(
                "  manual {}: {}",
                solution.solution_type.as_str(),
                solution.description
            );
            for action in &solution.user_actions {
                println!("    - {}", action);
            }
            if let Some(query) = &solution.search_query {
                println!("    search: {}", query);
            }
        }
        ResolutionEvent::PassFailed {
            consecutive_failures,
        } => {
            println!("  all solutions failed (consecutive: {})", consecutive_failures);
        }
        ResolutionEvent::Escalated {
            consultation,
            recommendation,
            queue_len,
        } => {
            println!(
                "consultation #{}: {} new solutions",
                consultation, queue_len
            );
            if let Some(cause) = &recommendation.root_cause_analysis {
                println!("  root cause: {}", cause);
            }
            if let Some(strategy) = &recommendation.new_strategy {
                println!("  strategy: {}", strategy);
            }
            if !recommendation.web_searches_performed.is_empty() {
                println!(
                    "  web searches: {}",
                    recommendation.web_searches_performed.len()
                );
            }
            for alt in recommendation.alternative_packages.iter().take(3) {
                println!("  alternative: {} -> {} ({})", alt.original, alt.alternative, alt.reason);
            }
        }
    }
}

fn cmd_diagnose(args: &DiagnoseArgs) -> Result<i32> {
    let cfg = load(&args.common)?;
    let config = DiagnoseConfig {
        packages: args.packages.clone(),
        installer: args.installer.clone(),
        environment_diagnostics: !args.no_env_diagnostics,
        command_timeout: cfg.command_timeout(),
        advisor_timeout: cfg.advisor_timeout(),
        output_path: args.output.clone(),
        artifacts_dir: args.common.artifacts.clone(),
        prompt_budget_bytes: DEFAULT_PROMPT_BUDGET_BYTES,
    };
    let runner = ShellRunner::new(cfg.output_limit_bytes);
    let advisor = advisor_for(&cfg);

    let outcome = run_diagnosis(&runner, &advisor, &config)?;
    for report in &outcome.commands {
        println!(
            "[{}] {} {}",
            report.index,
            if report.success { "ok" } else { "failed" },
            report.command
        );
    }
    print!("{}", render_summary(&outcome.diagnosis));
    if outcome.degraded {
        eprintln!("warning: oracle response was not valid JSON; wrote critical_error diagnosis");
    }
    println!("diagnosis: {}", config.output_path.display());
    Ok(exit_codes::OK)
}
