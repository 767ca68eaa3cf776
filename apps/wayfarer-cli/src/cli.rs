use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use wayfarer_config::load_config;
use wayfarer_core::gateway::ChatMessage;
use wayfarer_runtime::{init_tracing, FrameStream, TurnKind, TurnRequest, TurnService};

const DEFAULT_CONFIG: &str = "configs/wayfarer.yaml";

#[derive(Debug, Parser)]
#[command(name = "wayfarer", about = "Wayfarer travel assistant")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP/SSE server
    Serve(ServeArgs),
    /// Run one turn and print its frames as they would go over the wire
    Ask(AskArgs),
}

#[derive(Debug, Args, Clone)]
struct ServeArgs {
    #[arg(long, env = "WAYFARER_CONFIG", default_value = DEFAULT_CONFIG)]
    config: PathBuf,
    /// Overrides server.listen
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[derive(Debug, Args, Clone)]
struct AskArgs {
    #[arg(long, env = "WAYFARER_CONFIG", default_value = DEFAULT_CONFIG)]
    config: PathBuf,
    #[arg(long, value_enum, default_value_t = TaskKind::Hotel)]
    task: TaskKind,
    /// Current travel-plan draft as JSON (plan task only)
    #[arg(long)]
    draft: Option<String>,
    #[arg(long)]
    conversation: Option<String>,
    /// Generation model override (chat task only)
    #[arg(long)]
    model: Option<String>,
    #[arg(value_name = "TEXT", required = true)]
    text: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TaskKind {
    Hotel,
    Chat,
    Plan,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Serve(args) => {
                ensure_log_filter();
                wayfarer_server::run_server(args.config, args.listen).await
            }
            Command::Ask(args) => ask(args).await,
        }
    }
}

async fn ask(args: AskArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)
        .with_context(|| format!("load config '{}' failed", args.config.display()))?;
    init_tracing(&config.observability);

    let request = turn_request(&args)?;
    let service = TurnService::from_config(&config).context("build capability gateway failed")?;
    let frames = service.start(request).context("turn rejected")?;
    write_frames(frames, &mut tokio::io::stdout()).await?;
    Ok(())
}

/// Copy frames to `out` as they arrive, flushing after each one.
///
/// Tracing shares stdout with the frames, so no stdout lock may be held
/// across an await here.
async fn write_frames<W>(mut frames: FrameStream, out: &mut W) -> anyhow::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(frame) = frames.next().await {
        out.write_all(frame.to_sse_text().as_bytes())
            .await
            .context("write frame failed")?;
        out.flush().await.context("flush output failed")?;
        written += 1;
    }
    Ok(written)
}

fn turn_request(args: &AskArgs) -> anyhow::Result<TurnRequest> {
    let text = args.text.join(" ");
    let kind = match args.task {
        TaskKind::Hotel => TurnKind::Hotel {
            message: text,
            history: Vec::new(),
        },
        TaskKind::Chat => TurnKind::Chat {
            messages: vec![ChatMessage::user(text)],
            system_prompt: None,
            model: args.model.clone(),
        },
        TaskKind::Plan => {
            let draft = match &args.draft {
                Some(raw) => serde_json::from_str(raw).context("--draft is not valid JSON")?,
                None => Value::Null,
            };
            TurnKind::Plan {
                message: text,
                draft,
            }
        }
    };
    let request = TurnRequest::new(kind);
    Ok(match &args.conversation {
        Some(id) => request.in_conversation(id.clone()),
        None => request,
    })
}

fn ensure_log_filter() {
    if env::var("RUST_LOG").is_ok() {
        return;
    }
    env::set_var("RUST_LOG", "info");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use wayfarer_config::ObservabilityConfig;
    use wayfarer_core::gateway::{CapabilityGateway, SearchOutcome, TextChunk};
    use wayfarer_core::pipeline::TaskSettings;
    use wayfarer_providers::{MockSearch, MockTextGenerator};

    fn ask_args(argv: &[&str]) -> AskArgs {
        let cli = Cli::try_parse_from(argv).expect("parse");
        match cli.command {
            Command::Ask(args) => args,
            other => panic!("expected ask, got {:?}", other),
        }
    }

    #[test]
    fn test_serve_accepts_listen_override() {
        let cli = Cli::try_parse_from(["wayfarer", "serve", "--listen", "0.0.0.0:9100"])
            .expect("parse");
        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.listen, Some("0.0.0.0:9100".parse().expect("addr")));
            }
            other => panic!("expected serve, got {:?}", other),
        }
    }

    #[test]
    fn test_ask_defaults_to_hotel_task() {
        let args = ask_args(&["wayfarer", "ask", "hotels", "in", "Chengdu"]);
        assert_eq!(args.task, TaskKind::Hotel);
        let request = turn_request(&args).expect("request");
        match request.kind {
            TurnKind::Hotel { message, history } => {
                assert_eq!(message, "hotels in Chengdu");
                assert!(history.is_empty());
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_ask_plan_parses_draft() {
        let args = ask_args(&[
            "wayfarer",
            "ask",
            "--task",
            "plan",
            "--draft",
            r#"{"destination": "Chengdu"}"#,
            "--conversation",
            "trip-1",
            "from Beijing",
        ]);
        let request = turn_request(&args).expect("request");
        assert_eq!(request.conversation_id.as_deref(), Some("trip-1"));
        match request.kind {
            TurnKind::Plan { draft, .. } => assert_eq!(draft, json!({"destination": "Chengdu"})),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_ask_chat_carries_model_override() {
        let args = ask_args(&["wayfarer", "ask", "--task", "chat", "--model", "vision-pro", "hi"]);
        match turn_request(&args).expect("request").kind {
            TurnKind::Chat { model, messages, .. } => {
                assert_eq!(model.as_deref(), Some("vision-pro"));
                assert_eq!(messages, vec![ChatMessage::user("hi")]);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_ask_rejects_invalid_draft_json() {
        let args = ask_args(&["wayfarer", "ask", "--task", "plan", "--draft", "{", "go"]);
        assert!(turn_request(&args).is_err());
    }

    fn confirmed_hotel_service() -> TurnService {
        let text = MockTextGenerator::new()
            .with_reply(
                r#"{"intent": "book_hotel", "confirmed": true, "params": {"destination": "Chengdu"}}"#,
            )
            .with_stream(vec![
                TextChunk::content("Try the Jinjiang."),
                TextChunk::content(" Close to the metro."),
            ])
            .with_chunk_delay(Duration::from_millis(50));
        let search = MockSearch::new(SearchOutcome::found(vec![json!({"name": "Jinjiang"})]));
        TurnService::new(
            CapabilityGateway::new(Arc::new(text), Arc::new(search)),
            TaskSettings::default(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_hotel_turn_completes_while_tracing_writes_stdout() {
        init_tracing(&ObservabilityConfig::default());
        let frames = confirmed_hotel_service()
            .start(TurnRequest::new(TurnKind::Hotel {
                message: "book a hotel in Chengdu".to_string(),
                history: Vec::new(),
            }))
            .expect("start");

        let written = tokio::time::timeout(
            Duration::from_secs(10),
            write_frames(frames, &mut tokio::io::stdout()),
        )
        .await
        .expect("turn finished in time")
        .expect("frames written");
        assert!(written > 6);
    }

    #[tokio::test]
    async fn test_write_frames_emits_wire_text() {
        let frames = confirmed_hotel_service()
            .start(TurnRequest::new(TurnKind::Hotel {
                message: "book a hotel in Chengdu".to_string(),
                history: Vec::new(),
            }))
            .expect("start");
        let mut out = Vec::new();
        write_frames(frames, &mut out).await.expect("write");

        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("data: {"));
        assert!(text.contains(r#""type":"hotels_data""#));
        assert!(text.contains(r#""type":"recommendation_chunk""#));
        assert!(text.ends_with("data: {\"type\":\"done\"}\n\n"));
    }

    #[test]
    fn test_ask_requires_text() {
        assert!(Cli::try_parse_from(["wayfarer", "ask"]).is_err());
    }
}
