use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ollama_coder::agent::Agent;
use ollama_coder::config::Config;
use ollama_coder::console::Console;
use ollama_coder::error::AgentError;
use ollama_coder::llm::OllamaClient;
use ollama_coder::modelfile::{Modelfile, DEFAULT_CONTEXT_LENGTH};
use ollama_coder::session::{SessionRecorder, SessionStore};
use ollama_coder::tools::{CodingTools, Workspace};

/// Ollama Coder - a coding agent for a locally hosted model
#[derive(Parser, Debug)]
#[command(name = "ollama-coder", version, about)]
struct Args {
    /// Config file (default: ./ollama-coder.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Ollama server URL (overrides OLLAMA_HOST)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Model to chat with (overrides OLLAMA_CODER_MODEL)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Project directory the tools operate in
    #[arg(short = 'C', long, global = true)]
    workdir: Option<PathBuf>,

    /// Record the conversation to this JSONL file
    #[arg(short, long, global = true)]
    session: Option<PathBuf>,

    /// Continue the latest conversation in the session file
    #[arg(long, global = true, requires = "session")]
    resume: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat with the agent in the project directory (default)
    Chat,
    /// List models available on the server
    Models,
    /// Print a Modelfile for a larger-context variant
    Modelfile {
        /// Base model
        #[arg(long, default_value = ollama_coder::config::DEFAULT_MODEL)]
        from: String,
        /// Context length in tokens
        #[arg(long, default_value_t = DEFAULT_CONTEXT_LENGTH)]
        num_ctx: u32,
    },
    /// Register a model variant with the server
    Create {
        /// Name of the new model
        name: String,
        /// Modelfile to register
        #[arg(short, long, conflicts_with_all = ["from", "num_ctx"])]
        file: Option<PathBuf>,
        /// Base model when no Modelfile is given
        #[arg(long, default_value = ollama_coder::config::DEFAULT_MODEL)]
        from: String,
        /// Context length when no Modelfile is given
        #[arg(long, default_value_t = DEFAULT_CONTEXT_LENGTH)]
        num_ctx: u32,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let color = !args.no_color && std::env::var_os("NO_COLOR").is_none() && std::io::stdout().is_terminal();

    if let Err(e) = run(args, Console::stdout(color)).await {
        Console::new(Box::new(std::io::stderr()), color).error(&format!("Error: {:#}", e));
        std::process::exit(1);
    }
}

async fn run(args: Args, mut console: Console) -> anyhow::Result<()> {
    let workdir = match &args.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot determine current directory")?,
    };

    let mut config = Config::load(args.config.as_deref(), &workdir).context("failed to load config")?;
    config.apply_env();
    config.apply_overrides(args.host.as_deref(), args.model.as_deref());
    if let Some(path) = &args.session {
        config.session.path = Some(path.clone());
    }
    config.resolve_paths(&workdir);

    let client = OllamaClient::new(&config.ollama)?;

    match args.command {
        Some(Command::Models) => list_models(&client, &mut console).await,
        Some(Command::Modelfile { from, num_ctx }) => {
            print!("{}", Modelfile::for_context_length(from, num_ctx).render()?);
            Ok(())
        }
        Some(Command::Create {
            name,
            file,
            from,
            num_ctx,
        }) => create_model(&client, &mut console, &name, file.as_deref(), from, num_ctx).await,
        Some(Command::Chat) | None => chat(client, console, &config, &workdir, args.resume).await,
    }
}

async fn list_models(client: &OllamaClient, console: &mut Console) -> anyhow::Result<()> {
    let models = client.list_models().await?;
    if models.is_empty() {
        console.notice("No models pulled yet. Try: ollama pull qwen3:8b");
    }
    for model in models {
        console.plain(&format!(
            "{:<40} {:>8.1} GB  {}",
            model.name,
            model.size as f64 / 1e9,
            model.modified_at.unwrap_or_default()
        ));
    }
    Ok(())
}

async fn create_model(
    client: &OllamaClient,
    console: &mut Console,
    name: &str,
    file: Option<&Path>,
    from: String,
    num_ctx: u32,
) -> anyhow::Result<()> {
    let modelfile = match file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            Modelfile::parse(&text)
                .map_err(AgentError::from)
                .with_context(|| format!("cannot load {}", path.display()))?
        }
        None => Modelfile::for_context_length(from, num_ctx),
    };

    let status = client.create_model(name, &modelfile).await?;
    console.success(&format!(
        "Created model '{}' from {} (num_ctx: {}): {}",
        name,
        modelfile.from,
        modelfile
            .num_ctx()
            .map(|n| n.to_string())
            .unwrap_or_else(|| "default".into()),
        status
    ));
    Ok(())
}

async fn chat(
    client: OllamaClient,
    mut console: Console,
    config: &Config,
    workdir: &Path,
    resume: bool,
) -> anyhow::Result<()> {
    match client.check_connection().await {
        Ok(found) => {
            console.success("Successfully connected to Ollama server.");
            if !found {
                warn!(model = %client.model(), "model not found on server");
                console.notice(&format!(
                    "Model '{}' is not pulled yet; the first request may fail.",
                    client.model()
                ));
            }
        }
        Err(e) => {
            console.error(&format!("Error connecting to Ollama server: {}", e));
            bail!("Please ensure the Ollama server is running and accessible.");
        }
    }

    let model = client.model().to_string();
    console.info(&format!("Using Ollama model: {}", model));
    console.info(&format!(
        "Make sure '{}' is pulled ('ollama pull {}') and supports tool calling.",
        model, model
    ));

    let workspace = Workspace::new(workdir)
        .with_context(|| format!("cannot open workspace {}", workdir.display()))?;
    info!(root = %workspace.root().display(), "workspace ready");

    let console = console.with_preview_chars(config.agent.tool_output_preview_chars);
    let mut agent = Agent::new(client, CodingTools::new(workspace), model, console)
        .with_max_tool_rounds(config.agent.max_tool_rounds);

    if let Some(path) = &config.session.path {
        let store = SessionStore::new(path.clone());
        let (recorder, history) = if resume {
            SessionRecorder::resume(store)
                .with_context(|| format!("cannot resume session {}", path.display()))?
        } else {
            (SessionRecorder::new(store), Vec::new())
        };
        agent = agent.with_session(recorder, history);
    }
    let mut agent = agent.with_system_prompt(config.agent.system_prompt.as_deref());

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    agent.run(stdin).await;
    Ok(())
}
