use super::*;
use crate::loader::DocumentMetadata;

#[test]
fn record_from_chunk_carries_identity_and_provenance() {
    let mut extra = BTreeMap::new();
    extra.insert("format".to_string(), "text".to_string());
    let chunk = ContentChunk {
        content: "Deadline is March 1".to_string(),
        metadata: DocumentMetadata {
            source: "a.txt".to_string(),
            file_path: "/corpus/a.txt".to_string(),
            extra,
        },
        chunk_index: 3,
        start: 120,
    };

    let record = EmbeddingRecord::from_chunk(&chunk, vec![0.1, 0.2, 0.3]);

    assert_eq!(record.id, "a.txt_3");
    assert_eq!(record.content, "Deadline is March 1");
    assert_eq!(record.vector.len(), 3);
    assert_eq!(record.metadata.source, "a.txt");
    assert_eq!(record.metadata.file_path, "/corpus/a.txt");
    assert_eq!(record.metadata.chunk_index, 3);
    assert_eq!(
        record.metadata.extra.get("format").map(String::as_str),
        Some("text")
    );
}

#[test]
fn chunk_metadata_extra_defaults_when_missing() {
    let metadata: ChunkMetadata = serde_json::from_str(
        r#"{"source":"b.txt","file_path":"/corpus/b.txt","chunk_index":0}"#,
    )
    .expect("can parse json");

    assert_eq!(metadata.source, "b.txt");
    assert!(metadata.extra.is_empty());
}
