use super::*;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.embedding_model, "nomic-embed-text");
    assert_eq!(config.storage.collection_name, "knowledge_base");
    assert_eq!(config.storage.write_batch_size, 50);
    assert_eq!(config.chunking.chunk_size, 1000);
    assert_eq!(config.chunking.chunk_overlap, 200);
    assert_eq!(config.retrieval.top_k, 8);
    assert!((config.retrieval.similarity_threshold - 0.3).abs() < f32::EPSILON);
    assert!(config.validate().is_ok());
}

#[test]
fn config_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.embedding_model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.embed_concurrency = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.storage.collection_name = "bad name".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidCollectionName(_))
    ));

    let mut invalid_config = config.clone();
    invalid_config.retrieval.similarity_threshold = 1.5;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.prompt.system_template = "no placeholder".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::MissingContextPlaceholder)
    ));

    let mut invalid_config = config;
    invalid_config.generation.idle_timeout_secs = 0;
    assert!(invalid_config.validate().is_err());
}

#[test]
fn chunk_overlap_must_be_smaller_than_size() {
    let mut config = Config::default();
    config.chunking.chunk_size = 100;
    config.chunking.chunk_overlap = 100;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidChunkOverlap(100, 100))
    ));

    config.chunking.chunk_overlap = 0;
    assert!(config.validate().is_ok());
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let parsed: Config = toml::from_str(
        r#"
        [ollama]
        host = "gpu-box"

        [retrieval]
        top_k = 3
        "#,
    )
    .expect("should parse partial toml");

    assert_eq!(parsed.ollama.host, "gpu-box");
    assert_eq!(parsed.ollama.port, 11434);
    assert_eq!(parsed.retrieval.top_k, 3);
    assert_eq!(parsed.chunking, ChunkingConfig::default());
}

#[test]
fn load_missing_file_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("should load defaults");

    assert_eq!(config.base_dir, temp_dir.path());
    assert_eq!(config.vector_database_path(), temp_dir.path().join("vectors"));
    assert_eq!(config.documents_path(), temp_dir.path().join("documents"));
}

#[test]
fn save_and_load_roundtrip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config::with_base_dir(temp_dir.path());
    config.storage.collection_name = "handbook".to_string();
    config.documents.documents_dir = Some(temp_dir.path().join("corpus"));
    config.save().expect("should save config");

    let loaded = Config::load(temp_dir.path()).expect("should load config");
    assert_eq!(loaded.storage.collection_name, "handbook");
    assert_eq!(loaded.documents_path(), temp_dir.path().join("corpus"));
    assert_eq!(loaded, config);
}

#[test]
fn load_rejects_invalid_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join(CONFIG_FILE_NAME),
        "[chunking]\nchunk_size = 100\nchunk_overlap = 150\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn render_system_prompt_substitutes_context() {
    let prompt = PromptConfig {
        system_template: "Context:\n{context}\nEnd".to_string(),
        ..PromptConfig::default()
    };
    assert_eq!(
        prompt.render_system_prompt("[Source 1: a.txt]\nhello"),
        "Context:\n[Source 1: a.txt]\nhello\nEnd"
    );
}
