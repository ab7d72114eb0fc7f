//! Link Rate Tester - Main CLI Application
//!
//! Runs a single timed or counted test over a link, or sweeps a matrix of
//! packet sizes and write intervals, and prints the results.

use clap::Parser;
use link_rate_tester::{
    cli::Cli,
    config::{load_config, validate_config, EnvManager, ValidationLevel},
    error::{AppError, ErrorReporter, Result},
    executor::{ArtifactFilter, RunController, SweepOrchestrator, SweepProgressEvent},
    logging::{EngineLogger, LoggerFactory},
    models::Config,
    output::{OutputCoordinator, OutputFormatterFactory},
    transport::Transport,
    types::RunState,
    BUILD_TIME, GIT_COMMIT, PKG_NAME, VERSION,
};
use std::process;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exit code when the user interrupted the test
const EXIT_INTERRUPTED: i32 = 130;

/// Exit code when a run ended on a transport failure
const EXIT_RUN_FAILED: i32 = 3;

#[tokio::main]
async fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panic: {}", panic_info);
        eprintln!("Please report this issue together with the command line that triggered it.");
        process::exit(99);
    }));

    let cli = Cli::parse();
    let reporter = ErrorReporter::new(cli.use_colors(), cli.verbose);

    match run_application(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            reporter.report_error(&e);
            process::exit(e.exit_code());
        }
    }
}

/// Main application logic; returns the process exit code
async fn run_application(cli: Cli) -> Result<i32> {
    if cli.env_example {
        print!("{}", EnvManager::create_example_env_content());
        return Ok(0);
    }

    cli.validate().map_err(AppError::config)?;

    if cli.debug {
        eprintln!("{} v{} ({}, built {})", PKG_NAME, VERSION, GIT_COMMIT, BUILD_TIME);
        eprintln!("{}", cli.get_config_summary());
    }

    let config = load_config(cli)?;
    let coordinator = OutputCoordinator::new(OutputFormatterFactory::create_formatter(
        config.enable_color,
        config.verbose,
    ))
    .with_json(config.json);

    for warning in validate_config(&config)? {
        if warning.level != ValidationLevel::Info || config.verbose {
            eprintln!("{}", warning.format(config.enable_color));
        }
    }

    let logger_factory = LoggerFactory::new(config.clone());
    let engine_logger = logger_factory.create_engine_logger().await;

    let transport = open_transport(&config).await?;
    if config.debug {
        eprintln!("Opened transport {}", transport.description());
    }

    let logger = engine_logger.logger().clone();
    logger
        .add_context_field("transport".to_string(), transport.description())
        .await;

    let shutdown = CancellationToken::new();
    spawn_interrupt_handler(shutdown.clone());

    let operation = if config.is_sweep() { "sweep" } else { "run" };
    let correlation_id = logger.start_operation(operation).await;

    let outcome = if config.is_sweep() {
        run_sweep(&config, transport, engine_logger, &coordinator, shutdown).await
    } else {
        run_single(&config, transport, engine_logger, &coordinator, shutdown).await
    };

    logger
        .end_operation(&correlation_id, operation, matches!(outcome, Ok(0)))
        .await;
    outcome
}

async fn open_transport(config: &Config) -> Result<Transport> {
    let tx = config.transport_spec()?;
    let rx = config.rx_transport_specs()?;

    Transport::open(&tx, &rx, &config.loopback_branches()).await
}

/// First Ctrl-C cancels the test and lets it report; a second one exits
fn spawn_interrupt_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, stopping after the current packet (Ctrl-C again to abort)");
            shutdown.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                process::exit(EXIT_INTERRUPTED);
            }
        }
    });
}

async fn run_single(
    config: &Config,
    transport: Transport,
    logger: EngineLogger,
    coordinator: &OutputCoordinator,
    shutdown: CancellationToken,
) -> Result<i32> {
    let test = config.test_configuration()?;
    let mut controller = RunController::with_parent(config.run_options(), &shutdown).with_logger(logger);

    let live = config.live.then(|| controller.subscribe());
    controller.start(test, transport).await?;

    let printer = live.map(|mut snapshots| {
        let token = controller.cancellation_token();
        let json = coordinator.is_json();
        let output = OutputCoordinator::new(OutputFormatterFactory::create_formatter(
            config.enable_color,
            config.verbose,
        ))
        .with_json(json);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let snapshot = snapshots.borrow_and_update().clone();
                match output.display_live(&snapshot) {
                    Ok(line) if json => eprintln!("{}", line),
                    // Redraw in place at the snapshot cadence
                    Ok(line) => eprint!("\r{}", line),
                    Err(_) => {}
                }
            }
        })
    });

    let result = controller.wait().await;
    if let Some(printer) = printer {
        printer.abort();
        if !coordinator.is_json() {
            eprintln!();
        }
    }

    println!("{}", coordinator.display_run(&result)?);

    Ok(match result.state {
        RunState::Completed => 0,
        RunState::Stopped => EXIT_INTERRUPTED,
        _ => EXIT_RUN_FAILED,
    })
}

async fn run_sweep(
    config: &Config,
    transport: Transport,
    logger: EngineLogger,
    coordinator: &OutputCoordinator,
    shutdown: CancellationToken,
) -> Result<i32> {
    let plan = config.sweep_plan()?;

    let show_progress = !coordinator.is_json();
    let progress = OutputCoordinator::new(OutputFormatterFactory::create_formatter(
        config.enable_color,
        config.verbose,
    ));

    let orchestrator = SweepOrchestrator::new(config.run_options())
        .with_settle_delay(Duration::from_millis(config.settle_delay_ms))
        .with_max_point_duration(Duration::from_secs(config.max_point_secs))
        .with_filter(ArtifactFilter {
            loss_rate: config.exclude_loss_rate,
            ..ArtifactFilter::default()
        })
        .with_logger(logger)
        .with_callback(move |event: SweepProgressEvent| {
            if !show_progress {
                return;
            }
            if let Ok(Some(line)) = progress.display_progress(&event) {
                eprintln!("{}", line);
            }
        });

    let sweep_token = orchestrator.cancellation_token();
    let forward = tokio::spawn(async move {
        shutdown.cancelled().await;
        sweep_token.cancel();
    });

    let report = orchestrator.run(&plan, &transport).await;
    forward.abort();
    let report = report?;

    println!("{}", coordinator.display_sweep(&report)?);

    let code = if report.cancelled {
        EXIT_INTERRUPTED
    } else if !report.points.is_empty() && report.failed_count() == report.points.len() {
        EXIT_RUN_FAILED
    } else {
        0
    };
    Ok(code)
}
