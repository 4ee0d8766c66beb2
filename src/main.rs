use clap::{Args, Parser, Subcommand, ValueEnum};
use runcode::debugger::ConsoleControls;
use runcode::language::LanguageRegistry;
use runcode::profiler::LineProfiler;
use runcode::{Code, DebugControls, ExceptionPolicy, ExecutionContext, RunError, Value};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "runcode", version, about = "Run, debug and profile scripts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a script to completion
    Run(ScriptArgs),
    /// Step through a script interactively
    Debug {
        #[command(flatten)]
        script: ScriptArgs,
        /// Pause before this line (repeatable)
        #[arg(short, long = "break", value_name = "LINE")]
        breakpoints: Vec<u32>,
        /// Which exceptions pause the debugger
        #[arg(long, value_enum, default_value_t = PauseOn::Unhandled)]
        pause_on: PauseOn,
    },
    /// Build a script and report diagnostics
    Build {
        #[command(flatten)]
        script: ScriptArgs,
        /// Print the source with trace points rendered inline
        #[arg(long)]
        instrumented: bool,
    },
    /// Run a script and print per-line hit counts
    Profile(ScriptArgs),
}

#[derive(Args)]
struct ScriptArgs {
    /// Script file
    file: PathBuf,
    /// Input binding as name=<json> (repeatable)
    #[arg(short, long = "input", value_name = "NAME=JSON")]
    inputs: Vec<String>,
    /// Output binding to report after the run (repeatable)
    #[arg(short, long = "output", value_name = "NAME")]
    outputs: Vec<String>,
    /// Preprocessor symbol to define (repeatable)
    #[arg(short = 'D', long = "define", value_name = "SYMBOL")]
    defines: Vec<String>,
    /// Language name, overriding the file extension
    #[arg(short, long, value_name = "NAME")]
    language: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum PauseOn {
    Any,
    None,
    Unhandled,
}

impl From<PauseOn> for ExceptionPolicy {
    fn from(value: PauseOn) -> Self {
        match value {
            PauseOn::Any => ExceptionPolicy::PauseOnAny,
            PauseOn::None => ExceptionPolicy::PauseOnNone,
            PauseOn::Unhandled => ExceptionPolicy::PauseOnUnhandled,
        }
    }
}

#[derive(Error, Debug)]
enum CliError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no language handles '{0}'")]
    UnknownLanguage(String),
    #[error("invalid input '{0}': expected NAME=JSON")]
    Input(String),
    #[error("invalid JSON for input '{name}': {source}")]
    InputJson {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Run(#[from] RunError),
}

fn load(path: &Path, language: Option<&str>) -> Result<Code, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let registry = LanguageRegistry::with_builtin();
    let language = match language {
        Some(name) => registry
            .by_name(name)
            .ok_or_else(|| CliError::UnknownLanguage(name.to_string()))?,
        None => {
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default()
                .to_string();
            registry
                .by_extension(&extension)
                .ok_or(CliError::UnknownLanguage(extension))?
        }
    };
    Ok(Code::new(language, text))
}

fn context(args: &ScriptArgs, mut context: ExecutionContext) -> Result<ExecutionContext, CliError> {
    for input in &args.inputs {
        let (name, json) = input
            .split_once('=')
            .ok_or_else(|| CliError::Input(input.clone()))?;
        let json: serde_json::Value =
            serde_json::from_str(json).map_err(|source| CliError::InputJson {
                name: name.to_string(),
                source,
            })?;
        context.set_input(name, Value::from_json(&json));
    }
    for output in &args.outputs {
        context.expect_output(output);
    }
    for symbol in &args.defines {
        context.options_mut().set(symbol.as_str(), true);
    }
    context.set_echo(true);
    Ok(context)
}

fn report_outputs(context: &ExecutionContext) {
    if context.outputs().is_empty() {
        return;
    }
    let outputs: serde_json::Map<String, serde_json::Value> = context
        .outputs()
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    println!("{}", serde_json::Value::Object(outputs));
}

fn execute(command: Command) -> Result<(), CliError> {
    match command {
        Command::Run(args) => {
            let code = load(&args.file, args.language.as_deref())?;
            let mut ctx = context(&args, ExecutionContext::run())?;
            code.run(&mut ctx)?;
            report_outputs(&ctx);
        }
        Command::Debug {
            script,
            breakpoints,
            pause_on,
        } => {
            let code = load(&script.file, script.language.as_deref())?;
            let mut ctx = context(&script, ExecutionContext::debug())?;
            let mut controls = ConsoleControls::new(
                BufReader::new(io::stdin()),
                io::stdout(),
                code.id(),
                code.text(),
            )
            .with_policy(pause_on.into());
            for line in breakpoints {
                controls.breakpoints_mut().add(code.breakpoint(line));
            }
            code.debug_with_controls(&mut ctx, &mut controls)?;
            report_outputs(&ctx);
        }
        Command::Build {
            script,
            instrumented,
        } => {
            let code = load(&script.file, script.language.as_deref())?;
            let mut ctx = context(&script, ExecutionContext::build())?;
            if instrumented {
                print!("{}", code.instrumented_source(&mut ctx)?);
            } else {
                code.build(&mut ctx)?;
                eprintln!("build succeeded");
            }
        }
        Command::Profile(args) => {
            let code = load(&args.file, args.language.as_deref())?;
            let profiler = Arc::new(parking_lot::Mutex::new(LineProfiler::new()));
            code.set_profiler(Some(profiler.clone()));
            let mut ctx = context(&args, ExecutionContext::profile())?;
            code.profile(&mut ctx)?;
            report_outputs(&ctx);
            let report = profiler.lock().to_json();
            eprintln!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUNCODE_LOG").unwrap_or_else(|_| EnvFilter::new("runcode=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match execute(cli.command) {
        Ok(()) | Err(CliError::Run(RunError::DebugStop { .. })) => ExitCode::SUCCESS,
        Err(CliError::Run(RunError::Compile(err))) => {
            for diagnostic in err.errors() {
                eprintln!("{}", diagnostic);
            }
            ExitCode::FAILURE
        }
        Err(err) => {
            tracing::error!("{}", err);
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
