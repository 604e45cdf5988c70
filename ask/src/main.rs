mod activation;
mod artifact;
mod config;
mod gemini;
mod grammar;
mod provider;
mod resolver;
mod scanner;
mod splice;
mod writer;

use activation::{Activation, ActivationError, Activator, Secret};
use artifact::FileArtifact;
use chrono::Utc;
use clap::Parser;
use config::{Config, API_KEY_ENV};
use dialoguer::console::style;
use gemini::{Chunk, GeminiClient, TextGenerator};
use grammar::ArtifactGrammar;
use provider::TerminalSecretProvider;
use serde::Serialize;
use serde_json::json;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ask", version, about = "Ask a question to Gemini from the terminal")]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    json: bool,
    /// Query words, joined with spaces.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    query: Vec<String>,
}

#[derive(Debug, Error)]
enum AskError {
    #[error("config error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("activation error: {0}")]
    Activation(#[from] ActivationError),
    #[error("{0}")]
    NotConfigured(String),
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Generation(String),
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

#[derive(Debug)]
struct Context {
    config_path: PathBuf,
    json: bool,
}

fn main() -> Result<(), AskError> {
    let cli = Cli::parse();
    init_logging();
    let ctx = build_context(&cli);

    if let Err(err) = run(&ctx, &cli.query) {
        if ctx.json {
            let payload = JsonResult::<serde_json::Value> {
                ok: false,
                result: None,
                error: Some(err.to_string()),
            };
            print_json(&payload)?;
        } else {
            eprintln!("{err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("ASK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();
}

fn build_context(cli: &Cli) -> Context {
    Context {
        config_path: config::resolve_config_path(cli.config.as_ref()),
        json: cli.json,
    }
}

fn run(ctx: &Context, query: &[String]) -> Result<(), AskError> {
    let (cfg, activation) = resolve_api_key(ctx)?;
    let api_key = match activation.secret() {
        Some(secret) if !secret.expose().is_empty() => secret.clone(),
        _ => return Err(not_configured(ctx, &activation)),
    };

    if query.is_empty() {
        return Err(AskError::Usage("Usage: ask <query>".to_string()));
    }
    let query = query.join(" ");

    let client = GeminiClient::new(
        &cfg.api_base_url,
        &cfg.model,
        api_key,
        Duration::from_secs(cfg.request_timeout_sec),
    );
    handle_query(ctx, &cfg, &client, &query, &activation)
}

/// Environment key first; otherwise the config, activating it if needed.
fn resolve_api_key(ctx: &Context) -> Result<(Config, Activation), AskError> {
    if let Some(key) = config::env_api_key() {
        tracing::debug!("using {API_KEY_ENV} from the environment");
        let cfg = if ctx.config_path.exists() {
            config::read_config(&ctx.config_path)?
        } else {
            Config::default()
        };
        return Ok((cfg, Activation::AlreadyActive(Secret::new(key))));
    }

    if config::init_config(&ctx.config_path)? {
        tracing::info!(path = %ctx.config_path.display(), "wrote default config");
    }
    let cfg = config::read_config(&ctx.config_path)?;
    let grammar = ArtifactGrammar::config_yaml();
    let store = FileArtifact::new(&ctx.config_path);
    let provider = TerminalSecretProvider::new(cfg.activation.clone().unwrap_or_default());
    let activation = Activator::new(&grammar, &store, &provider)
        .with_syntax_check(config::check_activated)
        .activate(&cfg.api_key);
    if !ctx.json {
        report_activation(&activation, store.path().display().to_string());
    }
    Ok((cfg, activation))
}

fn report_activation(activation: &Activation, path: String) {
    match activation {
        Activation::AlreadyActive(_) | Activation::Fatal(_) => {}
        Activation::Embedded { placement, .. } => {
            if let Some(line) = placement.misplaced_placeholder() {
                eprintln!(
                    "{} placeholder api_key line {line} sat inside or after the activation block; the key was inserted elsewhere.",
                    style("warning:").yellow()
                );
            }
            if placement.placeholder_missing() {
                eprintln!(
                    "{} placeholder api_key line not found before the activation block; review {path}.",
                    style("warning:").yellow()
                );
            }
            eprintln!(
                "{} key embedded in {path} (line {}), activation block removed.",
                style("Activated:").green(),
                placement.line()
            );
        }
        Activation::SessionOnly { failure, .. } => {
            eprintln!("{} {failure}", style("activation failed:").red());
            eprintln!("{path} was left unchanged. Using the entered key for this session only.");
            eprintln!("{}", remedy(failure));
        }
    }
}

fn remedy(failure: &ActivationError) -> String {
    match failure {
        ActivationError::MarkersNotFound | ActivationError::MarkersOutOfOrder { .. } => {
            let grammar = ArtifactGrammar::config_yaml();
            format!(
                "Expected a line starting with '{}' followed later by a line starting with '{}'. \
Restore the activation block (see the default config) or set {API_KEY_ENV} instead.",
                grammar.region_start, grammar.region_end
            )
        }
        _ => format!(
            "Check permissions on the config directory, reset the api_key line to {} and re-run, or set {API_KEY_ENV} instead.",
            grammar::quote_literal(grammar::INERT_API_KEY)
        ),
    }
}

fn not_configured(ctx: &Context, activation: &Activation) -> AskError {
    let cause = match activation {
        Activation::Fatal(failure) => format!("{failure}\n"),
        _ => String::new(),
    };
    AskError::NotConfigured(format!(
        "{cause}API key is not configured; exiting. Re-run to activate, reset the api_key line in {} to {}, or set {API_KEY_ENV}.",
        ctx.config_path.display(),
        grammar::quote_literal(grammar::INERT_API_KEY)
    ))
}

fn handle_query(
    ctx: &Context,
    cfg: &Config,
    generator: &dyn TextGenerator,
    query: &str,
    activation: &Activation,
) -> Result<(), AskError> {
    if ctx.json {
        let summary = generator.stream(query, &mut |_| {})?;
        let payload = json!({
            "model": cfg.model,
            "query": query,
            "text": summary.text,
            "chunks": summary.chunks,
            "first_chunk_ms": summary.first_chunk_after.map(millis),
            "elapsed_ms": millis(summary.elapsed),
            "block_reason": summary.block_reason,
            "activation": activation.label(),
            "completed_at": Utc::now().to_rfc3339(),
        });
        return output(ctx, payload);
    }

    println!("Querying {} : {query}", style(&cfg.model).cyan());
    println!("---");
    let mut stdout = io::stdout();
    let summary = generator.stream(query, &mut |chunk: &Chunk| {
        match &chunk.text {
            Some(text) => print!("{text}"),
            None => print!("{}", style("[blocked segment or no text]").dim()),
        }
        if let Err(err) = stdout.flush() {
            tracing::debug!(error = %err, "failed to flush streamed text");
        }
    })?;
    println!();
    println!("--- Stream finished ---");
    if let Some(first) = summary.first_chunk_after {
        println!("First chunk after {:.2}s.", first.as_secs_f64());
    }
    println!("Stream finished in {:.2}s.", summary.elapsed.as_secs_f64());
    if let Some(reason) = &summary.block_reason {
        eprintln!("{} prompt blocked: {reason}", style("warning:").yellow());
    }
    Ok(())
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn output(ctx: &Context, payload: serde_json::Value) -> Result<(), AskError> {
    if ctx.json {
        let wrapper = JsonResult {
            ok: true,
            result: Some(payload),
            error: None,
        };
        print_json(&wrapper)?;
    } else {
        println!("{}", payload);
    }
    Ok(())
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), AskError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct CannedGenerator {
        pieces: Vec<&'static str>,
        queries: RefCell<Vec<String>>,
    }

    impl TextGenerator for CannedGenerator {
        fn stream(
            &self,
            query: &str,
            on_chunk: &mut dyn FnMut(&Chunk),
        ) -> Result<gemini::StreamSummary, AskError> {
            self.queries.borrow_mut().push(query.to_string());
            let mut summary = gemini::StreamSummary::default();
            for piece in &self.pieces {
                let chunk = Chunk {
                    text: Some(piece.to_string()),
                    block_reason: None,
                };
                summary.text.push_str(piece);
                summary.chunks += 1;
                on_chunk(&chunk);
            }
            Ok(summary)
        }
    }

    #[test]
    fn handle_query_streams_through_generator() {
        let ctx = Context {
            config_path: PathBuf::from("config.yaml"),
            json: true,
        };
        let generator = CannedGenerator {
            pieces: vec!["a", "b"],
            queries: RefCell::new(Vec::new()),
        };
        let activation = Activation::AlreadyActive(Secret::new("k"));
        handle_query(&ctx, &Config::default(), &generator, "why sky blue", &activation).unwrap();
        assert_eq!(generator.queries.borrow().as_slice(), ["why sky blue"]);
    }

    #[test]
    fn millis_saturates_instead_of_truncating() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn not_configured_explains_remedy() {
        let ctx = Context {
            config_path: PathBuf::from("/tmp/ask/config.yaml"),
            json: false,
        };
        let err = not_configured(&ctx, &Activation::Fatal(ActivationError::InertSecret));
        let text = err.to_string();
        assert!(text.contains("still the inert placeholder"));
        assert!(text.contains("API key is not configured"));
        assert!(text.contains("/tmp/ask/config.yaml"));
        assert!(text.contains(API_KEY_ENV));
    }

    #[test]
    fn marker_remedy_names_both_markers() {
        let text = remedy(&ActivationError::MarkersNotFound);
        assert!(text.contains("# --- BEGIN ACTIVATION BLOCK"));
        assert!(text.contains("# --- END ACTIVATION BLOCK"));
    }
}
