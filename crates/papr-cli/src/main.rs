//! Command-line entry point: `runtest` drives a whole revision through the
//! engine; `validate` just exercises the parser against a suite file.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use papr_engine::{GithubForgeClient, RevisionDriver, RunRequest, Site, SiteConfig};
use papr_parser::SuiteParser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "papr", about = "A pull-request / branch CI orchestrator")]
struct Cli {
    /// Increase log verbosity. May be repeated (-vv, -vvv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a revision's suites and report statuses back to the forge.
    Runtest(RuntestArgs),
    /// Parse and canonicalize a suite file without running anything.
    Validate(ValidateArgs),
}

#[derive(Args)]
struct RuntestArgs {
    #[arg(long, default_value = "site.yaml")]
    conf: PathBuf,

    #[arg(long)]
    repo: String,

    #[arg(long, conflicts_with = "pull", required_unless_present = "pull")]
    branch: Option<String>,

    #[arg(long, conflicts_with = "branch", required_unless_present = "branch")]
    pull: Option<String>,

    #[arg(long = "expected-sha1")]
    expected_sha1: Option<String>,

    #[arg(long = "suite")]
    suite: Vec<String>,
}

#[derive(Args)]
struct ValidateArgs {
    yml_file: PathBuf,

    #[arg(long = "output-dir")]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    match cli.command {
        Command::Runtest(args) => {
            let exit_code = run_runtest(args).await?;
            std::process::exit(exit_code);
        }
        Command::Validate(args) => run_validate(args, cli.json),
    }
}

fn init_tracing(verbose: u8, json: bool) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Runs one revision. Per SPEC_FULL.md §6, the exit code is 0 for every
/// normal outcome — including every suite failing its tests — and
/// reserved nonzero only for infrastructure failures the caller should
/// retry.
async fn run_runtest(args: RuntestArgs) -> anyhow::Result<i32> {
    let config = SiteConfig::from_file(&args.conf)?;
    let site = Site::init(config)?;

    let token = site.github_token()?;
    let forge = Arc::new(GithubForgeClient::new(token, args.repo.clone()));

    let driver = RevisionDriver {
        forge,
        publisher: site.publisher.clone(),
        checkout_root: site.cachedir.join("checkout"),
        cache_root: site.cachedir.clone(),
    };

    let (ref_kind, ref_name) = match (args.branch, args.pull) {
        (Some(branch), None) => (papr_engine::RefKind::Branch, branch),
        (None, Some(pull)) => (papr_engine::RefKind::Pull, pull),
        _ => unreachable!("clap enforces exactly one of --branch/--pull"),
    };

    let request = RunRequest {
        repo: args.repo,
        ref_kind,
        ref_name,
        expected_head_sha: args.expected_sha1,
        suite_filter: args.suite,
    };

    match driver.run(request).await {
        Ok(papr_engine::DriverOutcome::SoftExit(reason)) => {
            tracing::info!(reason, "exiting cleanly");
            Ok(0)
        }
        Ok(papr_engine::DriverOutcome::Ran {
            suite_results,
            required_summary,
        }) => {
            for r in &suite_results {
                tracing::info!(
                    context = %r.context,
                    passed = r.passed(),
                    timed_out = r.timed_out,
                    "suite finished"
                );
            }
            if let Some(summary) = required_summary {
                tracing::info!(
                    passed = summary.passed,
                    total = summary.total,
                    url = %summary.index_url,
                    "required aggregate posted"
                );
            }
            Ok(0)
        }
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            Err(e.into())
        }
    }
}

fn run_validate(args: ValidateArgs, json: bool) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(&args.yml_file)?;
    let suites = SuiteParser::from_str(&contents)?.parse()?;

    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)?;
    }

    for (idx, suite) in suites.iter().enumerate() {
        println!("INFO: validated suite {}", idx + 1);
        if json {
            println!("{}", serde_json::to_string_pretty(suite)?);
        } else {
            println!("{suite:#?}");
        }
        if let Some(dir) = &args.output_dir {
            let path = dir.join(format!("{}.json", suite.context.replace('/', "_")));
            std::fs::write(path, serde_json::to_string_pretty(suite)?)?;
        }
    }

    Ok(())
}
