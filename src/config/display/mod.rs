
use console::style;

use super::Config;

/// Print the effective configuration to stderr
#[inline]
pub fn show_config(config: &Config) {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    for line in render_config(config).lines() {
        if line.ends_with(':') {
            eprintln!("{}", style(line).bold().yellow());
        } else {
            eprintln!("{}", line);
        }
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
}

/// Render the configuration as indented `key: value` lines
#[inline]
pub fn render_config(config: &Config) -> String {
    let ollama_url = config
        .ollama_url()
        .map_or_else(|e| format!("invalid ({})", e), |url| url.to_string());

    let sections: [(&str, Vec<(&str, String)>); 7] = [
        (
            "Ollama Settings:",
            vec![
                ("URL", ollama_url),
                ("Embedding Model", config.ollama.embedding_model.clone()),
                ("Chat Model", config.ollama.chat_model.clone()),
                (
                    "Embedding Timeout",
                    format!("{}s", config.ollama.embed_timeout_secs),
                ),
                (
                    "Embedding Concurrency",
                    config.ollama.embed_concurrency.to_string(),
                ),
                ("Retry Attempts", config.ollama.retry_attempts.to_string()),
            ],
        ),
        (
            "Storage:",
            vec![
                (
                    "Location",
                    config.vector_database_path().display().to_string(),
                ),
                ("Collection", config.storage.collection_name.clone()),
                (
                    "Write Batch Size",
                    config.storage.write_batch_size.to_string(),
                ),
            ],
        ),
        (
            "Documents:",
            vec![(
                "Directory",
                config.documents_path().display().to_string(),
            )],
        ),
        (
            "Chunking:",
            vec![
                ("Chunk Size", config.chunking.chunk_size.to_string()),
                ("Chunk Overlap", config.chunking.chunk_overlap.to_string()),
            ],
        ),
        (
            "Retrieval:",
            vec![
                ("Top K", config.retrieval.top_k.to_string()),
                (
                    "Similarity Threshold",
                    config.retrieval.similarity_threshold.to_string(),
                ),
            ],
        ),
        (
            "Generation:",
            vec![
                ("Temperature", config.generation.temperature.to_string()),
                ("Top P", config.generation.top_p.to_string()),
                ("Context Window", config.generation.num_ctx.to_string()),
                (
                    "Request Timeout",
                    format!("{}s", config.generation.request_timeout_secs),
                ),
                (
                    "Idle Timeout",
                    format!("{}s", config.generation.idle_timeout_secs),
                ),
                (
                    "Channel Capacity",
                    config.generation.channel_capacity.to_string(),
                ),
            ],
        ),
        (
            "Prompt:",
            vec![
                (
                    "System Template",
                    format!("{:?}", config.prompt.system_template),
                ),
                (
                    "No Context Message",
                    format!("{:?}", config.prompt.no_context_message),
                ),
                (
                    "Acknowledgement",
                    config
                        .prompt
                        .acknowledgement
                        .as_ref()
                        .map_or_else(|| "none".to_string(), |text| format!("{:?}", text)),
                ),
            ],
        ),
    ];

    let mut rendered = String::new();
    for (heading, entries) in sections {
        rendered.push_str(heading);
        rendered.push('\n');
        for (key, value) in entries {
            rendered.push_str("  ");
            rendered.push_str(key);
            rendered.push_str(": ");
            rendered.push_str(&value);
            rendered.push('\n');
        }
    }
    rendered
}
