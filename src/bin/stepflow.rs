use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{error, info, warn};

use stepflow::config::Config;
use stepflow::events::{FlowEvent, FlowEventConsumer, LoggingConsumer};
use stepflow::flow::{CompileReport, StepFlowController};
use stepflow::helper::HelperRegistry;
use stepflow::logging::init_logging;
use stepflow::sim::{DemoFile, ScriptedAgent, SimStage};

#[derive(Parser)]
#[command(version = env!("VERSION_STRING"), about, long_about = None)]
pub struct Cli {
    /// Enables debug mode
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    debug: u8,

    /// Config file to use instead of the default location
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Runtime-disable a step by id (repeatable)
    #[arg(long = "disable", value_name = "ID", global = true)]
    disable: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a demo file and report authoring problems
    Check { file: PathBuf },
    /// Drive a demo file to completion with the scripted agent
    Run {
        file: PathBuf,

        /// Ticks the agent waits on each step before acting
        #[arg(long, default_value_t = 2)]
        think_ticks: u32,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn Error>> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load_or_default()?,
    };
    Ok(config)
}

fn build_controller(
    file: &Path,
    config: &Config,
    extra_disabled: &[String],
) -> Result<(StepFlowController<SimStage>, CompileReport), Box<dyn Error>> {
    let (stage, content) = DemoFile::from_path(file)?.into_parts();
    let mut controller = StepFlowController::new(stage, content, HelperRegistry::with_builtins())
        .with_event_capacity(config.flow.event_capacity);

    let disabled = config.flow.disabled_steps.iter().chain(extra_disabled);
    let report = controller.compile_with_disabled(disabled);
    Ok((controller, report))
}

fn print_report(file: &Path, report: &CompileReport) {
    println!(
        "{}: {} step(s), {} target(s)",
        file.display(),
        report.step_count,
        report.target_count
    );
    for id in &report.duplicate_steps {
        println!("  duplicate step id '{}'", id);
    }
    for duplicate in &report.duplicate_targets {
        println!(
            "  duplicate target id '{}' on '{}' (kept '{}')",
            duplicate.id, duplicate.dropped_owner, duplicate.kept_owner
        );
    }
    for unresolved in &report.unresolved {
        println!(
            "  step {} '{}': unresolved {:?} reference '{}'",
            unresolved.step_index, unresolved.step_id, unresolved.kind, unresolved.reference
        );
    }
    for (index, helper) in &report.unknown_helpers {
        println!("  step {}: helper '{}' is not registered", index, helper);
    }
    for id in &report.unknown_disabled {
        println!("  disabled id '{}' matches no step", id);
    }
    for index in &report.invalid_holds {
        println!("  step {}: elapse time is out of range", index);
    }
    if report.is_clean() {
        println!("OK");
    } else {
        println!("{} problem(s)", report.problem_count());
    }
}

async fn run(
    mut controller: StepFlowController<SimStage>,
    config: &Config,
    think_ticks: u32,
) -> Result<(), Box<dyn Error>> {
    let mut events = controller.subscribe();
    let mut consumer = LoggingConsumer;
    let mut agent = ScriptedAgent::new(think_ticks);

    let tick = Duration::from_millis(config.flow.tick_interval_ms.max(1));
    let mut interval = tokio::time::interval(tick);

    controller.begin(config.flow.auto_start_first)?;
    if !config.flow.auto_start_first {
        if let Some(first) = controller.content().steps.first().map(|step| step.id.clone()) {
            controller.begin_step_by_id(&first)?;
        }
    }

    let mut ticks: u64 = 0;
    'drive: loop {
        loop {
            match events.try_recv() {
                Ok(envelope) => {
                    consumer.handle_event(&envelope);
                    if envelope.event == FlowEvent::EndFlow {
                        break 'drive;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Event consumer lagged, {} event(s) dropped", skipped);
                }
                Err(TryRecvError::Closed) => break 'drive,
            }
        }

        interval.tick().await;
        agent.act(&mut controller);
        controller.tick(tick);
        controller.host_mut().end_tick();
        ticks += 1;
    }

    let effects = controller.host().effects();
    info!(
        "Flow finished after {} tick(s): {} executed, {} skipped",
        ticks,
        effects.executed.len(),
        effects.skipped.len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let level = match cli.debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let component = match cli.command {
        Command::Check { .. } => "check",
        Command::Run { .. } => "run",
    };
    let _guard = init_logging(component, config.logging.file, level)?;

    match &cli.command {
        Command::Check { file } => {
            let (_, report) = build_controller(file, &config, &cli.disable)?;
            print_report(file, &report);
            if !report.is_clean() {
                std::process::exit(1);
            }
        }
        Command::Run { file, think_ticks } => {
            let (controller, report) = build_controller(file, &config, &cli.disable)?;
            if !report.is_clean() {
                error!(
                    "{} has {} authoring problem(s); running anyway",
                    file.display(),
                    report.problem_count()
                );
            }
            run(controller, &config, *think_ticks).await?;
        }
    }

    Ok(())
}
