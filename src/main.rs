use clap::Parser;
use hexstep::machine::Interpreter;
use hexstep::opcode::{Catalog, Locale};
use hexstep::parser::parse;
use hexstep::runner::{Event, RunnerConfig, Session, SessionError};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hexstep", about = "Hexstep: step-by-step hex instruction simulator")]
struct Cli {
    /// Message (tape) the program reads. Normalized to uppercase.
    #[arg(long, conflicts_with = "example")]
    message: Option<String>,

    /// Program text: whitespace-separated codes such as "0x01 0x02 0xff".
    #[arg(long, conflicts_with = "example")]
    program: Option<String>,

    /// Load canned example 1-3 instead of --message/--program.
    #[arg(long)]
    example: Option<usize>,

    /// Pause between instructions in milliseconds (0-2000).
    #[arg(long, default_value_t = 1000)]
    delay_ms: u64,

    /// Language for labels and history lines.
    #[arg(long, value_enum, default_value_t = Locale::En)]
    locale: Locale,

    /// Execute without pacing and print the whole trace at once.
    #[arg(long)]
    instant: bool,

    /// Print the opcode reference table and exit.
    #[arg(long)]
    list_opcodes: bool,

    /// Launch live visualization window (requires --features viz).
    #[cfg(feature = "viz")]
    #[arg(long)]
    live: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = dispatch(&cli) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn dispatch(cli: &Cli) -> Result<(), SessionError> {
    if cli.list_opcodes {
        print!("{}", Catalog::new(cli.locale).reference_table());
        return Ok(());
    }

    let config = RunnerConfig {
        step_delay_ms: cli.delay_ms,
        locale: cli.locale,
    };
    let (session, events) = Session::new(config)?;
    match cli.example {
        Some(n) => session.load_example(n)?,
        None => {
            session.set_message(cli.message.as_deref().unwrap_or_default())?;
            session.set_program(cli.program.as_deref().unwrap_or_default())?;
        }
    }

    #[cfg(feature = "viz")]
    if cli.live {
        hexstep::viz::run_viz(session, events);
        return Ok(());
    }

    println!("message: {}", session.message());
    print!("{}", session.listing());
    println!();

    if cli.instant {
        run_instant(&session);
    } else {
        run_paced(&session, &events);
    }
    Ok(())
}

/// Execute the whole program synchronously and print the trace.
fn run_instant(session: &Session) {
    let interp = Interpreter::new(*session.catalog(), session.message());
    let trace = interp.run_to_end(&parse(&session.program_text()));
    for line in &trace.history {
        println!("{line}");
    }
    for (index, warning) in &trace.warnings {
        warn!(index, %warning, "instruction had no effect");
    }
    print_output(&trace.state.output, trace.state.pointer, &trace.state.buffer);
}

/// Run on the session worker, echoing history lines as they are published.
fn run_paced(session: &Session, events: &std::sync::mpsc::Receiver<Event>) {
    session.run();
    let mut printed = 0;
    let mut last = session.snapshot();
    while let Ok(event) = events.recv() {
        match event {
            Event::Snapshot(snap) => {
                for line in snap.history.iter().skip(printed) {
                    println!("{line}");
                }
                printed = snap.history.len();
                last = snap;
            }
            // Already reported by the worker's log; nothing to block on.
            Event::Warning { .. } => {}
            Event::Finished(_) => break,
        }
    }
    print_output(&last.output, last.pointer, &last.buffer);
}

fn print_output(output: &[String], pointer: usize, buffer: &str) {
    println!();
    println!("pointer: {pointer}");
    println!("buffer:  \"{buffer}\"");
    println!("output:");
    if output.is_empty() {
        println!("  (none)");
    }
    for line in output {
        println!("  {line}");
    }
}
