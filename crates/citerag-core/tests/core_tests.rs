use std::fs;
use std::io::Write;
use tempfile::TempDir;

use citerag_core::chunker::{reassemble, Chunker, ChunkingConfig, DirectoryLoader};
use citerag_core::config::{Config, DenseBackend, EmbeddingBackend, EngineConfig, FusionWeights};
use citerag_core::types::{Document, Roles};
use citerag_core::Error;

fn words(n: usize) -> String {
    (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
}

fn chunker(size: usize, overlap: usize) -> Chunker {
    Chunker::new(ChunkingConfig { chunk_size: size, overlap }).unwrap()
}

#[test]
fn short_document_is_a_single_verbatim_chunk() {
    let doc = Document::new("D1", "hr", "Employees accrue 20 vacation days per year.");
    let chunks = chunker(600, 80).chunk(&doc);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_id, "D1#000");
    assert_eq!(chunks[0].text, doc.raw_text);
    assert_eq!(chunks[0].token_count, 7);
}

#[test]
fn whitespace_only_document_yields_no_chunks() {
    let doc = Document::new("blank", "hr", "  \n\t \n");
    assert!(chunker(600, 80).chunk(&doc).is_empty());
    assert!(chunker(600, 80).chunk(&Document::new("empty", "hr", "")).is_empty());
}

#[test]
fn long_document_windows_share_overlap_tokens() {
    let doc = Document::new("long", "eng", words(1000));
    let chunks = chunker(600, 80).chunk(&doc);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].token_count, 600);
    assert_eq!(chunks[1].token_count, 480);

    let first: Vec<&str> = chunks[0].text.split_whitespace().collect();
    let second: Vec<&str> = chunks[1].text.split_whitespace().collect();
    assert_eq!(&first[520..], &second[..80]);
    assert_eq!(second[0], "w520");
    assert_eq!(second.last().copied(), Some("w999"));
}

#[test]
fn chunking_is_deterministic() {
    let doc = Document::new("same", "eng", words(250)).with_roles(["eng"]);
    let c = chunker(100, 10);
    let a = c.chunk(&doc);
    let b = c.chunk(&doc);
    assert_eq!(a, b);
    let ids: Vec<_> = a.iter().map(|c| c.chunk_id.as_str()).collect();
    assert_eq!(ids, vec!["same#000", "same#001", "same#002"]);
    assert!(a.iter().all(|c| c.access_roles.contains("eng") && c.domain == "eng"));
}

#[test]
fn stripping_overlap_reassembles_the_source() {
    let raw = "  Intro line.\n\nSecond   paragraph with  irregular spacing.\n\tThird one, with tabs.\nLast words here.  \n";
    let doc = Document::new("msg", "support", raw);
    for (size, overlap) in [(3, 1), (4, 3), (5, 0), (50, 10)] {
        let chunks = chunker(size, overlap).chunk(&doc);
        assert!(!chunks.is_empty());
        assert_eq!(reassemble(&chunks), raw, "size={size} overlap={overlap}");
        for c in &chunks {
            assert_eq!(&raw[c.start..c.end], c.text);
        }
    }
}

#[test]
fn overlap_must_be_smaller_than_chunk_size() {
    let err = Chunker::new(ChunkingConfig { chunk_size: 50, overlap: 50 }).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
    assert!(Chunker::new(ChunkingConfig { chunk_size: 0, overlap: 0 }).is_err());
}

#[test]
fn directory_loader_reads_text_and_markdown() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    let mut f = fs::File::create(dir.join("b_policy.md")).unwrap();
    writeln!(f, "# Leave\nTwenty days.").unwrap();
    fs::write(dir.join("a_intro.txt"), "alpha bravo").unwrap();
    fs::write(dir.join("ignored.json"), "{}").unwrap();
    fs::create_dir(dir.join("nested")).unwrap();
    fs::write(dir.join("nested").join("c.txt"), "charlie").unwrap();

    let roles: Roles = ["hr".to_string()].into_iter().collect();
    let docs = DirectoryLoader::new("hr", roles.clone()).load(dir).expect("load");
    let ids: Vec<_> = docs.iter().map(|d| d.document_id.as_str()).collect();
    assert_eq!(ids, vec!["a_intro", "b_policy", "c"]);
    assert!(docs.iter().all(|d| d.domain == "hr" && d.access_roles == roles));
    assert_eq!(docs[0].raw_text, "alpha bravo");
}

#[test]
fn engine_config_defaults_are_valid() {
    let config = EngineConfig::default();
    config.validate().expect("defaults validate");
    assert_eq!(config.chunk_size, 600);
    assert_eq!(config.chunk_overlap, 80);
    assert_eq!(config.top_k, 6);
    assert_eq!(config.fusion_weights, FusionWeights { dense: 0.5, sparse: 0.5 });
}

#[test]
fn config_layers_toml_then_environment() {
    figment::Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
                chunk_size = 300
                chunk_overlap = 30
                fusion_weights = { dense = 0.8, sparse = 0.2 }

                [embedding]
                backend = "hashed"
                dimensions = 64
            "#,
        )?;
        jail.create_file("config.test.toml", "top_k = 4")?;
        jail.set_env("FUSION_WEIGHTS", "0.7/0.3");
        jail.set_env("MIN_SCORE_THRESHOLD", "0.31");
        jail.set_env("APP_EMBEDDING__BACKEND", "openai");
        jail.set_env("APP_DENSE_BACKEND", "lance");
        jail.set_env("APP_DATA_DIR", "/tmp/citerag");

        let config = Config::from_figment(Config::figment_for_env("test")).engine().map_err(|e| e.to_string())?;
        assert_eq!(config.chunk_size, 300);
        assert_eq!(config.chunk_overlap, 30);
        assert_eq!(config.top_k, 4);
        assert_eq!(config.fusion_weights, FusionWeights { dense: 0.7, sparse: 0.3 });
        assert!((config.min_score_threshold - 0.31).abs() < 1e-6);
        assert_eq!(config.embedding.backend, EmbeddingBackend::Openai);
        assert_eq!(config.embedding.dimensions, 64);
        assert_eq!(config.dense_backend, DenseBackend::Lance);
        Ok(())
    });
}

#[test]
fn invalid_operator_values_are_rejected() {
    figment::Jail::expect_with(|jail| {
        jail.set_env("CHUNK_SIZE", "50");
        jail.set_env("CHUNK_OVERLAP", "60");
        let err = Config::from_figment(Config::figment_for_env("test")).engine().unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        Ok(())
    });
    figment::Jail::expect_with(|jail| {
        jail.set_env("FUSION_WEIGHTS", "half");
        assert!(Config::from_figment(Config::figment_for_env("test")).engine().is_err());
        Ok(())
    });
}
