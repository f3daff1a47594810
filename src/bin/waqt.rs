use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use waqt::background::{BackgroundTask, IntervalHost, register_background_task};
use waqt::clock::{Clock, SystemClock};
use waqt::config::Config;
use waqt::context::{AppContext, StandardContext};
use waqt::location::FixedLocation;
use waqt::model::ScheduleState;
use waqt::notify::DesktopNotifier;
use waqt::orchestrator::{self, RefreshOrchestrator, SyncOutcome};
use waqt::scheduler::TriggerScheduler;
use waqt::source::AladhanClient;
use waqt::storage::{FileStore, StateStore};

enum Command {
    Refresh,
    Clear,
    Status,
    Daemon,
}

struct Args {
    command: Command,
    root: Option<PathBuf>,
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let raw: Vec<String> = env::args().skip(1).collect();

    if raw
        .iter()
        .any(|a| a == "--help" || a == "-h" || a == "help")
    {
        print_help();
        return Ok(());
    }

    let args = match parse_args(&raw) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            eprintln!("Run 'waqt --help' for usage.");
            std::process::exit(2);
        }
    };

    let ctx = StandardContext::new(args.root.clone());
    waqt::logging::init(&ctx, args.verbose)?;
    let config = Config::load_or_default(&ctx)?;

    if let Err(e) = run(args.command, &ctx, &config).await {
        // Domain errors carry a user-facing message; show it without a backtrace.
        if let Some(pe) = e.downcast_ref::<waqt::PrayerError>()
            && pe.needs_user_action()
        {
            eprintln!("{}", pe);
            eprintln!("Check location settings and notification permissions, then retry.");
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
    Ok(())
}

fn parse_args(raw: &[String]) -> Result<Args, String> {
    let mut command = None;
    let mut root = None;
    let mut verbose = false;

    let mut it = raw.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--root" | "-r" => {
                let path = it.next().ok_or("--root needs a path")?;
                root = Some(PathBuf::from(path));
            }
            "--verbose" | "-v" => verbose = true,
            "refresh" => command = Some(Command::Refresh),
            "clear" => command = Some(Command::Clear),
            "status" => command = Some(Command::Status),
            "daemon" => command = Some(Command::Daemon),
            other => return Err(format!("unknown argument '{}'", other)),
        }
    }

    Ok(Args {
        command: command.unwrap_or(Command::Status),
        root,
        verbose,
    })
}

fn build_orchestrator(
    ctx: &dyn AppContext,
    config: &Config,
    clock: Arc<dyn Clock>,
) -> Result<Arc<RefreshOrchestrator>> {
    let notifier = Arc::new(DesktopNotifier::new(clock.clone()));
    let scheduler = Arc::new(TriggerScheduler::from_config(
        notifier,
        clock.clone(),
        config,
    ));
    let source = AladhanClient::from_config(config).context("Failed to build lookup client")?;
    let store = StateStore::new(Arc::new(FileStore::new(ctx)?));

    Ok(Arc::new(RefreshOrchestrator::new(
        Arc::new(FixedLocation::from_config(config)),
        Arc::new(source),
        store,
        scheduler,
        clock,
    )))
}

async fn run(command: Command, ctx: &dyn AppContext, config: &Config) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let orchestrator = build_orchestrator(ctx, config, clock.clone())?;

    match command {
        Command::Refresh => {
            let state = orchestrator
                .refresh(config.calculation_method, config.school)
                .await?;
            print_schedule(&state);
            println!();
            println!("Notifications fire while 'waqt daemon' is running.");
        }
        Command::Clear => {
            orchestrator.clear().await?;
            println!("Cleared prayer notifications. The stored schedule is kept.");
        }
        Command::Status => match orchestrator.store().load().await? {
            Some(state) => print_schedule(&state),
            None => println!("No schedule stored yet. Run 'waqt refresh'."),
        },
        Command::Daemon => run_daemon(orchestrator, config).await?,
    }
    Ok(())
}

async fn run_daemon(orchestrator: Arc<RefreshOrchestrator>, config: &Config) -> Result<()> {
    let outcome = orchestrator
        .ensure_current(config.calculation_method, config.school)
        .await?;
    match &outcome {
        SyncOutcome::Refreshed(_) => log::info!("Fetched today's schedule"),
        SyncOutcome::Reinstalled(_) => log::info!("Installed notifications for stored schedule"),
        SyncOutcome::UpToDate(_) => log::info!("Schedule already current"),
    }
    print_schedule(outcome.state());

    let host = IntervalHost::new();
    let task = Arc::new(BackgroundTask::new(
        orchestrator.clone(),
        config.calculation_method,
        config.school,
    ));
    let interval = Duration::from_secs(u64::from(config.background_interval_mins.max(1)) * 60);
    register_background_task(&host, task, interval).await?;

    log::info!("waqt daemon running; press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    log::info!("Shutting down");
    host.shutdown().await;
    orchestrator.clear().await?;
    Ok(())
}

fn print_schedule(state: &ScheduleState) {
    println!(
        "Prayer times for {} ({:.4}, {:.4}; {})",
        waqt::clock::format_date(state.schedule_date),
        state.latitude,
        state.longitude,
        state.timezone
    );
    for (prayer, at) in state.times.iter() {
        println!("    {:<8} {}", prayer.to_string(), at);
    }

    // Local, not a fixed offset, so "next" stays right across a DST change.
    let now = chrono::Local::now();
    if orchestrator::is_stale(state, waqt::clock::local_date(&now)) {
        println!("(stale: computed for another day)");
        return;
    }
    let (next, at) = orchestrator::upcoming(state, &now);
    println!("Next: {} at {}", next, at.format("%H:%M"));
}

fn print_help() {
    println!(
        "Waqt v{} - Daily prayer-time notifications",
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!("USAGE:");
    println!("    waqt [OPTIONS] [COMMAND]");
    println!();
    println!("COMMANDS:");
    println!("    status      Show the stored schedule and the next prayer (default)");
    println!("    refresh     Fetch today's times for the configured location");
    println!("    clear       Remove installed prayer notifications");
    println!("    daemon      Keep notifications installed and refresh daily");
    println!();
    println!("OPTIONS:");
    println!("    -r, --root <path>   Keep config and data under <path>");
    println!("    -v, --verbose       Debug output on the terminal");
    println!("    -h, --help          Show this help message");
    println!();
    println!("CONFIG (config.toml):");
    println!("    latitude = -6.2");
    println!("    longitude = 106.8");
    println!("    calculation_method = 20");
    println!("    school = \"Shafi\"            # or \"Hanafi\"");
}
