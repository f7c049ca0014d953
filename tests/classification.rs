mod common;

use async_trait::async_trait;
use sentinel_core::{
    Action, Analyzer, ConfidenceMode, FileDescriptor, Result, Sentinel, SentinelError,
    SignalSource, Suggestion,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

struct SlowVision {
    delay: Duration,
}

#[async_trait]
impl Analyzer for SlowVision {
    fn name(&self) -> &str {
        "slow-vision"
    }

    fn source(&self) -> SignalSource {
        SignalSource::Vision
    }

    fn supports(&self, file: &FileDescriptor) -> bool {
        file.mime_type()
            .map(|m| m.starts_with("image/"))
            .unwrap_or(false)
    }

    async fn analyze(&self, _file: &FileDescriptor) -> Result<Suggestion> {
        tokio::time::sleep(self.delay).await;
        Ok(Suggestion {
            source: SignalSource::Vision,
            category: "photos/beach".to_string(),
            confidence: 0.9,
            reasoning: "sand and water".to_string(),
        })
    }
}

struct BrokenAudio;

#[async_trait]
impl Analyzer for BrokenAudio {
    fn name(&self) -> &str {
        "broken-audio"
    }

    fn source(&self) -> SignalSource {
        SignalSource::Audio
    }

    fn supports(&self, _file: &FileDescriptor) -> bool {
        true
    }

    async fn analyze(&self, _file: &FileDescriptor) -> Result<Suggestion> {
        Err(SentinelError::ExternalService("quota exceeded".to_string()))
    }
}

#[tokio::test]
async fn contract_and_agreement_reach_full_confidence() {
    let dir = tempdir().unwrap();
    let engine = common::open(dir.path()).await;
    let path = common::write(&dir.path().join("inbox"), "contract agreement.pdf", b"terms");

    let file = FileDescriptor::from_path(&path).unwrap();
    let result = engine.classify(&file, Vec::new()).await.unwrap();

    assert_eq!(result.category, "legal/contracts");
    assert!((result.confidence - 1.0).abs() < 1e-9);
    assert_eq!(result.source, SignalSource::Filename);
    assert_eq!(engine.decide_with(&result, ConfidenceMode::Smart), Action::AutoOrganize);
    assert_eq!(engine.decide(&result), Action::AutoOrganize);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn mode_gating_extremes() {
    let dir = tempdir().unwrap();
    let engine = common::open(dir.path()).await;
    let unsure = common::write(dir.path(), "qqq.bin", &[7u8; 16]);
    let sure = common::write(dir.path(), "signed contract agreement.docx", b"x");

    for path in [unsure, sure] {
        let file = FileDescriptor::from_path(&path).unwrap();
        let result = engine.classify(&file, Vec::new()).await.unwrap();
        assert!((0.0..=1.0).contains(&result.confidence));
        assert_eq!(engine.decide_with(&result, ConfidenceMode::Never), Action::AutoOrganize);
        assert_eq!(engine.decide_with(&result, ConfidenceMode::Always), Action::ReviewQueue);
    }
    engine.close().await.unwrap();
}

#[tokio::test]
async fn zero_signal_file_is_unsorted() {
    let dir = tempdir().unwrap();
    let engine = common::open(dir.path()).await;
    let path = common::write(dir.path(), "qqq.bin", &[1u8, 2, 3]);

    let file = FileDescriptor::from_path(&path).unwrap();
    let result = engine.classify(&file, Vec::new()).await.unwrap();
    assert_eq!(result.category, "unsorted");
    assert_eq!(result.confidence, 0.0);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn unreadable_file_is_a_validation_error() {
    let dir = tempdir().unwrap();
    let engine = common::open(dir.path()).await;
    let path = common::write(dir.path(), "gone.pdf", b"x");
    let file = FileDescriptor::from_path(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let result = engine.classify(&file, Vec::new()).await;
    assert!(matches!(result, Err(SentinelError::Validation(_))));
    engine.close().await.unwrap();
}

#[tokio::test]
async fn analyzer_timeout_degrades_to_content_tier() {
    let dir = tempdir().unwrap();
    let mut config = common::config(dir.path());
    config.analyzer.timeout_ms = 50;
    let engine = Sentinel::open_with_analyzers(
        config,
        vec![
            Arc::new(SlowVision {
                delay: Duration::from_secs(5),
            }),
            Arc::new(BrokenAudio),
        ],
    )
    .await
    .unwrap();
    let path = common::write(dir.path(), "IMG_2031.jpg", b"jpeg bytes");

    let file = FileDescriptor::from_path(&path).unwrap();
    let started = std::time::Instant::now();
    let result = engine.classify(&file, Vec::new()).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(result.category, "images");
    assert_eq!(result.source, SignalSource::Content);
    assert!(result.confidence <= SignalSource::Content.ceiling());
    assert!(result.reasoning.iter().any(|r| r.contains("timed out")));
    assert!(result.reasoning.iter().any(|r| r.contains("quota exceeded")));
    engine.close().await.unwrap();
}

#[tokio::test]
async fn responsive_analyzer_wins_its_tier() {
    let dir = tempdir().unwrap();
    let engine = Sentinel::open_with_analyzers(
        common::config(dir.path()),
        vec![Arc::new(SlowVision {
            delay: Duration::from_millis(5),
        })],
    )
    .await
    .unwrap();
    let path = common::write(dir.path(), "IMG_2031.jpg", b"jpeg bytes");

    let file = FileDescriptor::from_path(&path).unwrap();
    let result = engine.classify(&file, Vec::new()).await.unwrap();

    assert_eq!(result.category, "photos/beach");
    assert_eq!(result.source, SignalSource::Vision);
    assert!((result.confidence - 0.9).abs() < 1e-9);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn direct_suggestions_are_merged() {
    let dir = tempdir().unwrap();
    let engine = common::open(dir.path()).await;
    let path = common::write(dir.path(), "track01.mp3", b"id3");

    let file = FileDescriptor::from_path(&path).unwrap();
    let suggestion = Suggestion {
        source: SignalSource::Audio,
        category: "Music/Jazz".to_string(),
        confidence: 0.95,
        reasoning: "swing rhythm".to_string(),
    };
    let result = engine.classify(&file, vec![suggestion]).await.unwrap();

    assert_eq!(result.category, "music/jazz");
    assert_eq!(result.source, SignalSource::Audio);
    // Clamped to the audio ceiling
    assert!((result.confidence - 0.9).abs() < 1e-9);
    engine.close().await.unwrap();
}

#[tokio::test]
async fn repeated_classification_does_not_teach_itself() {
    let dir = tempdir().unwrap();
    let engine = common::open(dir.path()).await;
    let path = common::write(&dir.path().join("inbox"), "invoice.pdf", b"x");
    let file = FileDescriptor::from_path(&path).unwrap();

    for _ in 0..7 {
        let result = engine.classify(&file, Vec::new()).await.unwrap();
        engine.flush_learning().await.unwrap();

        assert_eq!(result.category, "finance/invoices");
        assert!((result.confidence - 0.6).abs() < 1e-9, "got {}", result.confidence);
        assert_eq!(result.source, SignalSource::Filename);
        assert_eq!(engine.decide_with(&result, ConfidenceMode::Smart), Action::ReviewQueue);
    }

    let patterns = engine.patterns();
    assert_eq!(
        patterns.pattern("name:invoice", "finance/invoices").unwrap().occurrence_count,
        1
    );
    engine.close().await.unwrap();
}

#[tokio::test]
async fn distinct_files_build_support() {
    let dir = tempdir().unwrap();
    let engine = common::open(dir.path()).await;
    let inbox = dir.path().join("inbox");

    for i in 0..5 {
        let path = common::write(&inbox.join(i.to_string()), "invoice.pdf", format!("invoice {i}").as_bytes());
        let file = FileDescriptor::from_path(&path).unwrap();
        engine.classify(&file, Vec::new()).await.unwrap();
        engine.flush_learning().await.unwrap();
    }

    let path = common::write(&inbox, "invoice.pdf", b"a sixth one");
    let file = FileDescriptor::from_path(&path).unwrap();
    let result = engine.classify(&file, Vec::new()).await.unwrap();
    assert_eq!(result.category, "finance/invoices");
    assert_eq!(result.source, SignalSource::Learned);
    assert!(result.confidence > 0.6);
    engine.close().await.unwrap();
}
