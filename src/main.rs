mod rules;
mod scan;

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use jitlens::engine::{AnnotationEngine, AnnotationReport, BatchReport, EngineOptions};
use jitlens::member::MemberKey;
use serde::Serialize;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, ReportingDescriptor, Result as SarifResult, Run, SCHEMA_URL, Sarif,
    Tool, ToolComponent,
};
use tracing_subscriber::EnvFilter;

use crate::rules::{AnalysisContext, rule_descriptors, run_rules};
use crate::scan::scan_inputs;

/// CLI arguments for jitlens execution.
#[derive(Parser, Debug)]
#[command(
    name = "jitlens",
    about = "Explains HotSpot JIT decisions per bytecode offset, as SARIF or JSON.",
    version
)]
struct Cli {
    /// HotSpot compilation log (-XX:+LogCompilation output).
    #[arg(long, value_name = "PATH")]
    log: PathBuf,
    /// javap -c -l -p -s -v listing, or a directory of them.
    #[arg(long, value_name = "PATH")]
    bytecode: Vec<PathBuf>,
    /// Member in log form, e.g. `java/lang/String charAt (I)C`. All compiled members otherwise.
    #[arg(long, value_name = "SIGNATURE")]
    member: Option<String>,
    #[arg(long, value_name = "N", default_value_t = 0)]
    compilation: usize,
    #[arg(long, value_enum, default_value_t = OutputFormat::Sarif)]
    format: OutputFormat,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long)]
    annotate_inlined: bool,
    #[arg(long)]
    no_sanity_checks: bool,
    /// Overrides the VM release recorded in the log.
    #[arg(long, value_name = "VERSION")]
    vm_version: Option<String>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Sarif,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);
    run(cli)
}

fn init_tracing(quiet: bool) {
    let default = if quiet { "error" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    if !cli.log.exists() {
        anyhow::bail!("log not found: {}", cli.log.display());
    }
    for entry in &cli.bytecode {
        if !entry.exists() {
            anyhow::bail!("bytecode entry not found: {}", entry.display());
        }
    }

    let started_at = Instant::now();
    let scan = scan_inputs(&cli.log, &cli.bytecode)?;
    let options = EngineOptions {
        sanity_checks: !cli.no_sanity_checks,
        annotate_inlined_callees: cli.annotate_inlined,
        vm_version: cli
            .vm_version
            .clone()
            .or_else(|| scan.history.vm_version().map(str::to_string)),
    };
    let engine = AnnotationEngine::new(&scan.history, options);
    let batch = match &cli.member {
        Some(signature) => {
            let member = MemberKey::from_log(signature)
                .with_context(|| format!("invalid member signature: {signature}"))?;
            let mut batch = BatchReport::default();
            match engine.annotate(&member, cli.compilation) {
                Ok(report) => batch.reports.push((member, report)),
                Err(err) => {
                    tracing::warn!(member = %member, error = %err, "annotation failed");
                    batch.failures.push((member, err));
                }
            }
            batch
        }
        None => engine.annotate_all(cli.compilation),
    };

    let mut writer = output_writer(cli.output.as_deref())?;
    match cli.format {
        OutputFormat::Sarif => {
            let context = AnalysisContext {
                history: &scan.history,
                batch: &batch,
            };
            let results = run_rules(&context)?;
            let invocation = build_invocation(batch.failures.is_empty());
            let sarif = build_sarif(scan.artifacts, invocation, rule_descriptors(), results);
            serde_json::to_writer_pretty(&mut writer, &sarif)
                .context("failed to serialize SARIF output")?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, &JsonReport::new(&batch))
                .context("failed to serialize JSON output")?;
        }
    }
    writer.write_all(b"\n").context("failed to write output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} log_lines={} classes={} members={} failures={}",
            started_at.elapsed().as_millis(),
            scan.log_lines,
            scan.class_count,
            batch.reports.len(),
            batch.failures.len()
        );
    }

    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

fn build_invocation(successful: bool) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");

    Invocation::builder()
        .execution_successful(successful)
        .arguments(arguments)
        .command_line(command_line)
        .build()
}

fn build_sarif(
    artifacts: Vec<Artifact>,
    invocation: Invocation,
    rules: Vec<ReportingDescriptor>,
    results: Vec<SarifResult>,
) -> Sarif {
    let driver = ToolComponent::builder()
        .name("jitlens")
        .version(env!("CARGO_PKG_VERSION"))
        .rules(rules)
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}

/// JSON output: one entry per analyzed member plus the members that failed.
#[derive(Serialize)]
struct JsonReport<'a> {
    members: Vec<JsonMember<'a>>,
    failures: Vec<JsonFailure>,
    unhandled_tags: BTreeSet<String>,
}

#[derive(Serialize)]
struct JsonMember<'a> {
    member: String,
    #[serde(flatten)]
    report: &'a AnnotationReport,
}

#[derive(Serialize)]
struct JsonFailure {
    member: String,
    error: String,
}

impl<'a> JsonReport<'a> {
    fn new(batch: &'a BatchReport) -> Self {
        Self {
            members: batch
                .reports
                .iter()
                .map(|(member, report)| JsonMember {
                    member: member.to_string(),
                    report,
                })
                .collect(),
            failures: batch
                .failures
                .iter()
                .map(|(member, err)| JsonFailure {
                    member: member.to_string(),
                    error: err.to_string(),
                })
                .collect(),
            unhandled_tags: batch.unhandled_tags(),
        }
    }
}
