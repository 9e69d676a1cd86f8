use super::*;
use std::collections::BTreeMap;

fn metadata(source: &str) -> DocumentMetadata {
    DocumentMetadata {
        source: source.to_string(),
        file_path: format!("/corpus/{}", source),
        extra: BTreeMap::new(),
    }
}

fn chunker(chunk_size: usize, chunk_overlap: usize) -> TextChunker {
    TextChunker::new(ChunkingConfig {
        chunk_size,
        chunk_overlap,
    })
    .expect("chunking config should be valid")
}

/// Rebuild the source by dropping the overlapped prefix of every chunk after the first.
/// Uncovered stretches of `text` must be whitespace and are copied through.
fn reconstruct(text: &str, chunks: &[ContentChunk]) -> String {
    let mut rebuilt = String::new();
    let mut covered = 0;
    for chunk in chunks {
        if chunk.start > covered {
            let gap = &text[covered..chunk.start];
            assert!(gap.trim().is_empty(), "text lost before chunk {}", chunk.chunk_index);
            rebuilt.push_str(gap);
            covered = chunk.start;
        }
        let skip = covered - chunk.start;
        rebuilt.push_str(&chunk.content[skip..]);
        covered = chunk.start + chunk.content.len();
    }

    let tail = &text[covered..];
    assert!(tail.trim().is_empty(), "text lost after the last chunk");
    rebuilt.push_str(tail);
    rebuilt
}

fn sample_document() -> String {
    let mut text = String::new();
    for section in 0..6 {
        text.push_str(&format!("Section {} heading\n", section));
        for sentence in 0..7 {
            text.push_str(&format!(
                "Sentence {} of section {} talks about admissions, visas and deadlines. ",
                sentence, section
            ));
        }
        text.push_str("Is this a question? Yes! ");
        text.push_str(&"averyveryverylongwordwithoutanyspaces".repeat(section));
        text.push_str("\n\n");
    }
    text
}

#[test]
fn rejects_invalid_config() {
    assert!(
        TextChunker::new(ChunkingConfig {
            chunk_size: 100,
            chunk_overlap: 100
        })
        .is_err()
    );
    assert!(
        TextChunker::new(ChunkingConfig {
            chunk_size: 0,
            chunk_overlap: 0
        })
        .is_err()
    );
}

#[test]
fn short_unit_yields_single_chunk() {
    let chunks = chunker(1000, 200).split_text("Deadline is March 1", metadata("a.txt"));

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "Deadline is March 1");
    assert_eq!(chunks[0].chunk_index, 0);
    assert_eq!(chunks[0].start, 0);
    assert_eq!(chunks[0].identity(), "a.txt_0");
    assert_eq!(chunks[0].metadata, metadata("a.txt"));
}

#[test]
fn empty_and_blank_units_yield_no_chunks() {
    let chunker = chunker(100, 10);
    assert!(chunker.split_text("", metadata("empty.txt")).is_empty());
    assert!(chunker.split_text("  \n\n\t ", metadata("blank.txt")).is_empty());
}

#[test]
fn prefers_paragraph_boundaries() {
    let text = "First paragraph here.\n\nSecond paragraph here.";
    let chunks = chunker(30, 0).split_text(text, metadata("p.txt"));

    let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["First paragraph here.\n\n", "Second paragraph here."]
    );
}

#[test]
fn falls_back_to_sentences_then_words() {
    let text = "One sentence here. Another sentence there. Final words follow";
    let chunks = chunker(25, 0).split_text(text, metadata("s.txt"));

    assert_eq!(chunks[0].content, "One sentence here. ");
    assert_eq!(chunks[1].content, "Another sentence there. ");
    assert!(chunks.iter().all(|c| c.content.chars().count() <= 25));
    assert_eq!(reconstruct(text, &chunks), text);
}

#[test]
fn consecutive_chunks_share_overlap() {
    let text = "aaaa bbbb cccc dddd eeee ffff";
    let chunks = chunker(20, 10).split_text(text, metadata("o.txt"));

    let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(contents, vec!["aaaa bbbb cccc dddd ", "cccc dddd eeee ffff"]);
    assert_eq!(chunks[1].start, 10);
}

#[test]
fn unbroken_text_is_cut_into_character_windows() {
    let text = "abcdefghijklmnopqrstuvwxy";
    let chunks = chunker(10, 2).split_text(text, metadata("w.txt"));

    let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(contents, vec!["abcdefghij", "klmnopqrst", "uvwxy"]);
}

#[test]
fn sizes_are_measured_in_characters() {
    let text = "ééé ééé ééé";
    let chunks = chunker(7, 0).split_text(text, metadata("u.txt"));

    let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(contents, vec!["ééé ", "ééé ééé"]);
    assert_eq!(reconstruct(text, &chunks), text);
}

#[test]
fn chunks_reconstruct_source_exactly() {
    let text = sample_document();

    for (size, overlap) in [(50, 0), (80, 20), (200, 150), (1000, 200)] {
        let chunks = chunker(size, overlap).split_text(&text, metadata("doc.md"));

        assert!(!chunks.is_empty());
        assert_eq!(reconstruct(&text, &chunks), text, "size={size} overlap={overlap}");

        for pair in chunks.windows(2) {
            let previous_end = pair[0].start + pair[0].content.len();
            if pair[1].start < previous_end {
                let shared = &text[pair[1].start..previous_end];
                assert!(shared.chars().count() <= overlap);
            }
            assert!(previous_end < pair[1].start + pair[1].content.len());
        }
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= size);
        }
    }
}

#[test]
fn blank_runs_do_not_become_chunks() {
    let text = format!("{}{}{}", "a".repeat(20), "\n\n".repeat(15), "b".repeat(20));
    let chunks = chunker(20, 0).split_text(&text, metadata("blank.txt"));

    let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(contents, vec!["a".repeat(20), "b".repeat(20)]);
    assert_eq!(
        chunks.iter().map(|c| c.chunk_index).collect::<Vec<_>>(),
        vec![0, 1]
    );
    assert!(chunks.iter().all(|c| !c.content.trim().is_empty()));
    assert_eq!(reconstruct(&text, &chunks), text);
}

#[test]
fn identities_are_deterministic() {
    let text = sample_document();
    let chunker = chunker(120, 30);

    let first: Vec<String> = chunker
        .split_text(&text, metadata("doc.md"))
        .iter()
        .map(ContentChunk::identity)
        .collect();
    let second: Vec<String> = chunker
        .split_text(&text, metadata("doc.md"))
        .iter()
        .map(ContentChunk::identity)
        .collect();

    assert_eq!(first, second);
    assert_eq!(first[0], "doc.md_0");
    assert_eq!(first[first.len() - 1], format!("doc.md_{}", first.len() - 1));
}

#[test]
fn indices_continue_across_units_of_one_source() {
    let units = vec![
        DocumentUnit {
            text: "page one text. ".repeat(10),
            metadata: metadata("report.pdf"),
        },
        DocumentUnit {
            text: "page two text. ".repeat(10),
            metadata: metadata("report.pdf"),
        },
        DocumentUnit {
            text: "other document".to_string(),
            metadata: metadata("other.txt"),
        },
    ];

    let chunks = chunker(60, 0).split_documents(&units);

    let report: Vec<usize> = chunks
        .iter()
        .filter(|c| c.metadata.source == "report.pdf")
        .map(|c| c.chunk_index)
        .collect();
    let expected: Vec<usize> = (0..report.len()).collect();
    assert_eq!(report, expected);

    let other = chunks
        .iter()
        .find(|c| c.metadata.source == "other.txt")
        .expect("other.txt should be chunked");
    assert_eq!(other.chunk_index, 0);
}
