
use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use tracing::{info, warn};

use crate::chat::{ChatRequest, ChatService};
use crate::config::{Config, show_config};
use crate::database::VectorStore;
use crate::embeddings::{Embedder, OllamaClient};
use crate::generation::{ChatMessage, CompletionStream, OllamaChat, RelayEvent};
use crate::indexer::IngestionPipeline;
use crate::retrieval::Retriever;

async fn open_store(config: &Config) -> Result<Arc<VectorStore>> {
    let store = VectorStore::open(config)
        .await
        .context("Failed to open vector store")?;
    Ok(Arc::new(store))
}

fn embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let client = OllamaClient::new(config).context("Failed to create embedding client")?;
    Ok(Arc::new(client))
}

async fn retriever(config: &Config) -> Result<Retriever> {
    Ok(Retriever::new(
        open_store(config).await?,
        embedder(config)?,
        config.retrieval.clone(),
    ))
}

/// Load, chunk, embed and index the configured documents directory
#[inline]
pub async fn ingest_documents(config: &Config, reset: bool) -> Result<()> {
    let documents_dir = config.documents_path();
    println!("📚 Ingesting documents from {}", documents_dir.display());
    if reset {
        println!("🗑️  Resetting collection '{}'", config.storage.collection_name);
    }

    let store = open_store(config).await?;
    let pipeline =
        IngestionPipeline::from_config(config, store, embedder(config)?)?.with_progress(true);
    let report = pipeline.run(reset).await?;

    println!();
    println!("📄 Files loaded:  {}", report.files_loaded);
    if report.files_failed > 0 {
        println!("⚠️  Files failed:  {}", report.files_failed);
    }
    if report.files_skipped > 0 {
        println!("⏭️  Files skipped: {}", report.files_skipped);
    }
    println!(
        "🧩 Chunks indexed: {}/{}",
        report.chunks_indexed, report.chunks_created
    );

    match report.error {
        Some(error) => anyhow::bail!("Ingestion stopped early: {}", error),
        None => {
            println!("✅ Ingestion complete");
            Ok(())
        }
    }
}

#[inline]
pub async fn show_stats(config: &Config) -> Result<()> {
    let stats = open_store(config).await?.stats().await?;

    println!("📊 Collection Statistics");
    println!("{}", "=".repeat(50));
    println!("   Name:     {}", stats.name);
    println!("   Records:  {}", stats.count);
    println!("   Location: {}", stats.location.display());
    Ok(())
}

/// Print the distinct document sources present in the index
#[inline]
pub async fn list_documents(config: &Config) -> Result<()> {
    let sources = open_store(config).await?.list_sources().await?;

    if sources.is_empty() {
        println!("No documents indexed yet.");
        println!("Place files in {} and run docs-rag", config.documents_path().display());
        return Ok(());
    }

    println!("📚 Indexed Documents ({})", sources.len());
    println!("{}", "=".repeat(50));
    for source in sources {
        println!("   • {}", source);
    }
    Ok(())
}

#[inline]
pub async fn search(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let retriever = retriever(config).await?;
    let found = retriever.get_context_with_sources(query, top_k).await?;

    if found.sources.is_empty() {
        println!(
            "No chunks scored above the similarity threshold ({}).",
            retriever.config().similarity_threshold
        );
        return Ok(());
    }

    println!("🔍 {} relevant chunk(s) for: {}", found.sources.len(), query);
    for source in &found.sources {
        println!(
            "   [{}] {} (score {:.3})",
            source.index, source.source, source.score
        );
    }
    println!();
    println!("{}", found.context);
    Ok(())
}

/// Answer a single question, streaming the reply to stdout
///
/// Ctrl-C cancels the upstream generation request.
#[inline]
pub async fn ask(config: &Config, question: &str) -> Result<()> {
    let generator = OllamaChat::new(config).context("Failed to create chat client")?;
    let service = ChatService::new(
        Arc::new(retriever(config).await?),
        Arc::new(generator),
        config.prompt.clone(),
    );

    let request = ChatRequest {
        messages: vec![ChatMessage::user(question)],
    };
    let mut stream = service.respond(&request).await;
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    if !relay_answer(&mut stream, &mut std::io::stdout(), ctrl_c).await? {
        warn!("Generation cancelled by user");
    }
    Ok(())
}

/// Write answer fragments to `out` as they arrive
///
/// Returns `false` when `cancel` resolved first, after cancelling the stream.
async fn relay_answer<W, C>(stream: &mut CompletionStream, out: &mut W, cancel: C) -> Result<bool>
where
    W: Write,
    C: Future<Output = ()>,
{
    tokio::pin!(cancel);

    loop {
        let next = tokio::select! {
            event = stream.next_event() => Some(event),
            () = &mut cancel => None,
        };
        let Some(event) = next else {
            stream.cancel();
            writeln!(out)?;
            return Ok(false);
        };

        match event {
            Some(RelayEvent::Message(fragment)) => {
                write!(out, "{}", fragment)?;
                out.flush()?;
            }
            Some(RelayEvent::Done) | None => {
                writeln!(out)?;
                return Ok(true);
            }
            Some(RelayEvent::Error(error)) => {
                writeln!(out)?;
                anyhow::bail!("Generation failed: {}", error);
            }
        }
    }
}

/// Verify the Ollama server is reachable and both configured models exist
#[inline]
pub async fn check(config: &Config) -> Result<()> {
    let client = OllamaClient::new(config)?;
    let models = [
        config.ollama.embedding_model.clone(),
        config.ollama.chat_model.clone(),
    ];

    println!("🤖 Ollama Status:");
    let listing = tokio::task::spawn_blocking(move || client.list_models())
        .await
        .context("Model check task failed")?;

    let available = match listing {
        Ok(available) => available,
        Err(e) => {
            println!("   ❌ Ollama: Failed to connect - {}", e);
            anyhow::bail!("Ollama is not reachable at {}", config.ollama_url()?);
        }
    };

    println!("   ✅ Ollama: Connected ({})", config.ollama_url()?);
    let mut missing = 0;
    for model in &models {
        if available.iter().any(|info| info.matches(model)) {
            println!("   ✅ Model available: {}", model);
        } else {
            missing += 1;
            println!("   ❌ Model not pulled: {} (run `ollama pull {}`)", model, model);
        }
    }

    if missing > 0 {
        anyhow::bail!("{} configured model(s) unavailable", missing);
    }
    Ok(())
}

/// Show the effective configuration, or write it to disk when absent
#[inline]
pub fn configure(config: &Config, show: bool) -> Result<()> {
    if show {
        show_config(config);
        return Ok(());
    }

    let path = config.config_file_path();
    if path.exists() {
        println!("Configuration already exists at {}", path.display());
    } else {
        config.save()?;
        info!("Wrote default configuration to {}", path.display());
        println!("✅ Wrote configuration to {}", path.display());
    }
    Ok(())
}
