use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use halo_core::{
    Engine, EngineConfig, PromptStrategy, SessionRegistry, Utf8Policy, read_metadata_with,
};
use halo_llama::LlamaRuntime;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// halo: local chat over GGUF models
#[derive(Parser)]
#[command(name = "halo", version)]
struct Cli {
    /// More logging (`halo_core=debug`). `RUST_LOG` wins when set.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print header metadata without loading weights.
    Meta {
        model: PathBuf,
    },
    /// Interactive multi-turn chat. Empty line or `/quit` exits, `/reset` starts over.
    Chat {
        model: PathBuf,
        #[command(flatten)]
        opts: EngineOpts,
    },
    /// Single prompt, streamed to stdout.
    Run {
        model: PathBuf,
        #[arg(short, long)]
        prompt: String,
        #[command(flatten)]
        opts: EngineOpts,
    },
}

#[derive(Args)]
struct EngineOpts {
    /// JSON engine config; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    threads: Option<usize>,

    /// Context window in tokens.
    #[arg(long)]
    ctx: Option<u32>,

    #[arg(long)]
    temp: Option<f32>,

    #[arg(long)]
    max_tokens: Option<usize>,

    #[arg(long)]
    system: Option<String>,

    /// Do not keep turns between prompts.
    #[arg(long)]
    no_history: bool,

    /// Plain `role: content` prompts instead of the model's chat template.
    #[arg(long)]
    raw: bool,

    /// Emit bytes as they arrive, replacing invalid sequences.
    #[arg(long)]
    eager_utf8: bool,
}

impl EngineOpts {
    fn resolve(&self) -> Result<EngineConfig> {
        let mut cfg = match &self.config {
            Some(path) => EngineConfig::from_json_file(path)
                .with_context(|| format!("reading engine config {}", path.display()))?,
            None => EngineConfig::default(),
        }
        .with_env_overrides();

        if let Some(t) = self.threads {
            cfg.threads = t;
        }
        if let Some(n) = self.ctx {
            cfg.context_length = n;
        }
        if let Some(t) = self.temp {
            cfg.temperature = t;
        }
        if self.max_tokens.is_some() {
            cfg.max_tokens = self.max_tokens;
        }
        if self.system.is_some() {
            cfg.system_prompt = self.system.clone();
        }
        if self.no_history {
            cfg.store_history = false;
        }
        if self.raw {
            cfg.strategy = PromptStrategy::Raw;
        }
        if self.eager_utf8 {
            cfg.utf8_policy = Utf8Policy::Eager;
        }
        cfg.validate().context("invalid engine config")?;
        Ok(cfg)
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "halo_cli=debug,halo_core=debug,halo_llama=debug"
    } else {
        "halo_cli=info,halo_core=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Meta { model } => meta(&model),
        Command::Chat { model, opts } => chat(&model, opts.resolve()?),
        Command::Run { model, prompt, opts } => run(&model, &prompt, opts.resolve()?),
    }
}

fn meta(model: &Path) -> Result<()> {
    let meta = read_metadata_with(&LlamaRuntime::new(), model);
    if !meta.valid {
        bail!("could not read metadata from {}", model.display());
    }
    println!("{}", serde_json::to_string_pretty(&meta)?);
    Ok(())
}

fn require_runtime() -> Result<()> {
    if !LlamaRuntime::is_available() {
        bail!("this build has no inference runtime; rebuild with `--features llama-cpp`");
    }
    Ok(())
}

fn run(model: &Path, prompt: &str, cfg: EngineConfig) -> Result<()> {
    require_runtime()?;
    let mut engine = Engine::with_runtime(LlamaRuntime::new());
    engine
        .load(model, cfg)
        .with_context(|| format!("loading {}", model.display()))?;
    info!("{}", engine.model_info());

    engine.start_completion(prompt)?;
    let mut out = io::stdout().lock();
    for fragment in engine.fragments() {
        out.write_all(fragment?.as_bytes())?;
        out.flush()?;
    }
    writeln!(out)?;

    debug!(
        stop = engine.stop_reason().map(|r| r.as_str()).unwrap_or("none"),
        tokens_per_sec = engine.generation_rate(),
        "generation finished"
    );
    Ok(())
}

fn chat(model: &Path, cfg: EngineConfig) -> Result<()> {
    require_runtime()?;
    let registry = SessionRegistry::new(LlamaRuntime::new());
    let id = registry.create();
    if !registry.load_with_config(id, model, cfg) {
        bail!("failed to load {}", model.display());
    }
    info!("{}", registry.model_info(id));

    let stdin = io::stdin();
    let mut out = io::stdout().lock();
    loop {
        write!(out, "> ")?;
        out.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        match line {
            "" | "/quit" => break,
            "/reset" => {
                registry.start_fresh_conversation(id);
                continue;
            }
            _ => {}
        }

        let mut write_err = None;
        let reply = registry.complete(id, line, |piece| {
            if write_err.is_none() {
                write_err = out.write_all(piece.as_bytes()).and_then(|()| out.flush()).err();
            }
        });
        if let Some(e) = write_err {
            return Err(e.into());
        }
        if reply.is_none() {
            write!(out, "\n[turn failed; see log]")?;
        }
        writeln!(out)?;
        debug!(
            tokens_per_sec = registry.generation_rate(id),
            context_used = registry.context_used(id),
            "turn finished"
        );
    }

    registry.release(id);
    Ok(())
}
