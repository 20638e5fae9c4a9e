use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vigil::command::CommandSource;
use vigil::config::Config;
use vigil::context::RuntimeContext;
use vigil::dispatch::Dispatcher;
use vigil::gateway::{HttpGateway, ReasoningGateway};
use vigil::healing::{DecisionLog, HealingArbiter, LlmAdvisor, SysinfoProbe, VitalsProbe};
use vigil::memory::{HybridRetriever, LexicalReranker, MemoryStore, Reranker};
use vigil::output::{NullSpeech, ProcessSpeech, SpeechSink};
use vigil::supervisor::{Lifecycle, Restarter, Supervisor};

const CONFIG_PATH: &str = "vigil.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(Config::load(Path::new(CONFIG_PATH)));
    info!(assistant = %config.assistant_name, "starting runtime core");

    // The one fatal startup condition: without credentials every turn
    // would fail, so refuse to boot instead of limping.
    let api_key = std::env::var(&config.reasoning.api_key_env).with_context(|| {
        format!(
            "reasoning API key missing, set the {} environment variable",
            config.reasoning.api_key_env
        )
    })?;

    let (lifecycle_tx, lifecycle_rx) = Lifecycle::channel();
    let ctx = Arc::new(RuntimeContext::new(Arc::clone(&config), lifecycle_rx));

    let memory = MemoryStore::open(&config.memory);
    memory.start_flusher(ctx.exit.child_token());
    let reranker: Arc<dyn Reranker> = Arc::new(LexicalReranker::new(&config.memory));

    let gateway: Arc<dyn ReasoningGateway> =
        Arc::new(HttpGateway::new(&config.reasoning, api_key));

    let speech: Arc<dyn SpeechSink> = if config.speech.enabled {
        ProcessSpeech::spawn(&config.speech.program)
    } else {
        Arc::new(NullSpeech)
    };

    let probe: Arc<dyn VitalsProbe> = Arc::new(SysinfoProbe::new());

    let supervisor = {
        let ctx = Arc::clone(&ctx);
        let gateway = Arc::clone(&gateway);
        let speech = Arc::clone(&speech);
        let memory = Arc::clone(&memory);
        let reranker = Arc::clone(&reranker);
        let probe = Arc::clone(&probe);
        let config = Arc::clone(&config);
        Arc::new(Supervisor::new(
            move |epoch| {
                let retriever = HybridRetriever::new(
                    Arc::clone(&memory),
                    Some(Arc::clone(&reranker)),
                    config.memory.rerank_candidates,
                );
                let dispatcher = Dispatcher::new(
                    epoch,
                    Arc::clone(&ctx),
                    Arc::clone(&gateway),
                    Arc::clone(&speech),
                    None,
                    Arc::clone(&memory),
                    retriever,
                    Arc::clone(&probe),
                );
                Box::pin(dispatcher.run())
            },
            lifecycle_tx,
        ))
    };
    supervisor.start()?;

    let decisions = Arc::new(DecisionLog::load(
        config.healing.history_path.clone(),
        config.healing.history_cap,
    ));
    let advisor = Arc::new(LlmAdvisor::new(Arc::clone(&gateway)));
    let restarter: Arc<dyn Restarter> = Arc::new(Arc::clone(&supervisor));
    let arbiter = Arc::new(HealingArbiter::new(
        Arc::clone(&ctx),
        advisor,
        restarter,
        Arc::clone(&probe),
        Arc::clone(&speech),
        decisions,
    ));
    tokio::spawn(Arc::clone(&arbiter).run());

    spawn_stdin_producer(Arc::clone(&ctx));

    {
        let exit = ctx.exit.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt signal received");
                exit.request(vigil::EXIT_OK);
            }
        });
    }

    ctx.exit.wait().await;
    let code = ctx.exit.code();
    info!(code, "shutting down");

    supervisor.shutdown();
    speech.cancel().await;
    // Give the flusher its shutdown write before the process dies.
    tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
    memory.flush();

    // 42 tells the outer supervisor script to relaunch immediately.
    std::process::exit(code);
}

/// Text ingress: one command per stdin line. Backpressure is the channel
/// dropping inputs, never this task blocking.
fn spawn_stdin_producer(ctx: Arc<RuntimeContext>) {
    let exit = ctx.exit.child_token();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if !ctx.channel.push(CommandSource::Text, line) {
                            warn!("input dropped, command channel full");
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        warn!(error = %e, "stdin read failed");
                        return;
                    }
                },
                _ = exit.cancelled() => return,
            }
        }
    });
}
