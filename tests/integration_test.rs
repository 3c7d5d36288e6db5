use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paper_archivist::error::{CacheError, PipelineError};
use paper_archivist::infrastructure::{
    fingerprint_bytes, CacheBackend, CachedAnalysisEntry, MemoryBackend, ProcessingRecord,
    ProcessingStateStore, ProcessingStatus, ResultCache,
};
use paper_archivist::services::{Analyzer, Compiler, LatexGenerator};
use paper_archivist::workflow::{JobStatus, PaperFlow, PipelineDeps};
use paper_archivist::{logger, BatchProcessor};
use tempfile::TempDir;

// ========== 测试替身 ==========

/// 返回 `\title{<文件名>}`，记录调用次数
#[derive(Default)]
struct FakeAnalyzer {
    calls: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl Analyzer for FakeAnalyzer {
    async fn analyze(&self, pdf_path: &Path) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let stem = pdf_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        Ok(format!(
            "\\documentclass{{article}}\\title{{{}}}\\begin{{document}}\\end{{document}}",
            stem
        ))
    }

    fn model_identifier(&self) -> &str {
        "fake-model"
    }
}

/// 文件名含 `broken` 时编译失败，否则写出一个假的 PDF
struct FakeCompiler {
    output_dir: PathBuf,
}

#[async_trait]
impl Compiler for FakeCompiler {
    async fn compile(&self, artifact_path: &Path) -> anyhow::Result<PathBuf> {
        let stem = artifact_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        if stem.contains("broken") {
            anyhow::bail!("! Undefined control sequence in {}", stem);
        }
        tokio::fs::create_dir_all(&self.output_dir).await?;
        let output = self.output_dir.join(format!("{}.pdf", stem));
        tokio::fs::write(&output, b"%PDF-1.5").await?;
        Ok(output)
    }
}

/// 永远不可用的缓存后端
struct UnreachableBackend;

#[async_trait]
impl CacheBackend for UnreachableBackend {
    async fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
    async fn set_ex(&self, _: &str, _: String, _: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
    async fn del(&self, _: &str) -> Result<bool, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
    async fn keys(&self, _: &str) -> Result<Vec<String>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

// ========== 辅助函数 ==========

struct Harness {
    dir: TempDir,
    store: Arc<ProcessingStateStore>,
    cache: Option<Arc<ResultCache>>,
    analyzer: Arc<FakeAnalyzer>,
}

impl Harness {
    async fn new(cache: Option<Arc<ResultCache>>) -> Self {
        Self::with_analyzer(cache, FakeAnalyzer::default()).await
    }

    async fn with_analyzer(cache: Option<Arc<ResultCache>>, analyzer: FakeAnalyzer) -> Self {
        logger::init();
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            ProcessingStateStore::open(dir.path().join(".metadata"))
                .await
                .unwrap(),
        );
        Self {
            dir,
            store,
            cache,
            analyzer: Arc::new(analyzer),
        }
    }

    fn memory_cache() -> Option<Arc<ResultCache>> {
        Some(Arc::new(ResultCache::new(
            Arc::new(MemoryBackend::new()),
            Duration::from_secs(3600),
        )))
    }

    fn processor(&self, workers: usize, timeout: Duration) -> BatchProcessor {
        let deps = PipelineDeps {
            store: self.store.clone(),
            cache: self.cache.clone(),
            analyzer: self.analyzer.clone(),
            generator: Arc::new(LatexGenerator::new(self.dir.path().join("tex"))),
            compiler: Arc::new(FakeCompiler {
                output_dir: self.dir.path().join("reports"),
            }),
        };
        BatchProcessor::new(Arc::new(PaperFlow::new(deps, timeout)), workers)
    }

    fn default_processor(&self) -> BatchProcessor {
        self.processor(3, Duration::from_secs(10))
    }

    fn write_pdf(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join("lib").join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn analyzer_calls(&self) -> usize {
        self.analyzer.calls.load(Ordering::SeqCst)
    }
}

// ========== 测试 ==========

#[tokio::test]
async fn test_second_run_is_fully_skipped() {
    let h = Harness::new(Harness::memory_cache()).await;
    let files: Vec<_> = (0..3)
        .map(|i| h.write_pdf(&format!("paper_{}.pdf", i), &format!("content {}", i)))
        .collect();

    let first = h
        .default_processor()
        .process_batch(files.clone(), false)
        .await
        .unwrap();
    assert_eq!(first.summary.successful, 3);
    assert_eq!(first.summary.skipped, 0);

    let second = h
        .default_processor()
        .process_batch(files, false)
        .await
        .unwrap();
    assert_eq!(second.summary.enqueued, 0);
    assert_eq!(second.summary.skipped, 3);
    assert_eq!(h.analyzer_calls(), 3);
}

#[tokio::test]
async fn test_completed_record_alone_skips_without_cache() {
    let h = Harness::new(None).await;
    let file = h.write_pdf("only_state.pdf", "bytes");

    h.default_processor()
        .process_batch(vec![file.clone()], false)
        .await
        .unwrap();
    let again = h
        .default_processor()
        .process_batch(vec![file], false)
        .await
        .unwrap();

    assert_eq!(again.summary.skipped, 1);
    assert_eq!(h.analyzer_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_content_processed_once() {
    let analyzer = FakeAnalyzer {
        delay: Duration::from_millis(50),
        ..Default::default()
    };
    let h = Harness::with_analyzer(Harness::memory_cache(), analyzer).await;
    let a = h.write_pdf("original.pdf", "same bytes");
    let b = h.write_pdf("copy of original.pdf", "same bytes");

    let report = h
        .default_processor()
        .process_batch(vec![a, b], false)
        .await
        .unwrap();

    let s = report.summary;
    assert_eq!(s.successful, 1);
    assert_eq!(s.failed, 0);
    // 第二个文件要么在入队前被跳过，要么抢占失败被放弃
    assert_eq!(s.abandoned + s.skipped, 1);
    assert_eq!(h.analyzer_calls(), 1);
    assert_eq!(h.store.get_all_records().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_claims_exactly_one_wins() {
    let h = Harness::new(None).await;
    let fp = fingerprint_bytes(b"contended");

    let claims = (0..16).map(|i| {
        let store = h.store.clone();
        let fp = fp.clone();
        tokio::spawn(async move {
            store
                .try_mark_processing(&fp, Path::new(&format!("copy_{}.pdf", i)))
                .await
                .unwrap()
        })
    });
    let outcomes: Vec<bool> = futures::future::join_all(claims)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|won| **won).count(), 1);
    assert_eq!(
        h.store.get_record(&fp).await.unwrap().status,
        ProcessingStatus::Processing
    );
}

#[tokio::test]
async fn test_status_flips_with_each_attempt() {
    let h = Harness::new(None).await;
    let fp = fingerprint_bytes(b"flaky paper");

    h.store.mark_failed(&fp, "analysis failed").await.unwrap();
    assert!(!h.store.is_processed(&fp).await);

    h.store
        .mark_completed(ProcessingRecord::completed(
            fp.clone(),
            "flaky.pdf",
            "Flaky",
            "tex/Flaky.tex",
            "reports/Flaky.pdf",
        ))
        .await
        .unwrap();
    assert!(h.store.is_processed(&fp).await);

    h.store.mark_failed(&fp, "compile failed").await.unwrap();
    assert!(!h.store.is_processed(&fp).await);
    // 失败不会抹掉上次成功时的标题
    assert_eq!(h.store.get_record(&fp).await.unwrap().title, "Flaky");
}

#[tokio::test]
async fn test_compile_failure_is_never_cached() {
    let h = Harness::new(Harness::memory_cache()).await;
    let file = h.write_pdf("broken_paper.pdf", "will not compile");
    let fp = fingerprint_bytes(b"will not compile");

    let report = h
        .default_processor()
        .process_batch(vec![file], false)
        .await
        .unwrap();

    assert_eq!(report.summary.failed, 1);
    let failure = report.failures().next().unwrap();
    assert!(matches!(
        failure.error,
        Some(PipelineError::Compilation(_))
    ));
    // .tex 已生成，但没有最终输出
    assert!(failure.artifact_path.is_some());
    assert!(failure.output_path.is_none());

    let cache = h.cache.as_ref().unwrap();
    assert!(!cache.exists(&fp).await.unwrap());

    let record = h.store.get_record(&fp).await.unwrap();
    assert_eq!(record.status, ProcessingStatus::Failed);
    assert!(record
        .error_message
        .unwrap()
        .contains("Undefined control sequence"));

    assert!(report.into_result().unwrap_err().is_partial_failure());
}

#[tokio::test]
async fn test_force_reprocesses_completed_fingerprint() {
    let h = Harness::new(Harness::memory_cache()).await;
    let file = h.write_pdf("again.pdf", "force me");
    let fp = fingerprint_bytes(b"force me");

    h.default_processor()
        .process_batch(vec![file.clone()], false)
        .await
        .unwrap();
    let first_at = h.store.get_record(&fp).await.unwrap().processed_at;

    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = h
        .default_processor()
        .process_batch(vec![file], true)
        .await
        .unwrap();

    assert_eq!(report.summary.enqueued, 1);
    assert_eq!(report.summary.successful, 1);
    // 缓存仍然命中，不再调用分析
    assert!(report.results[0].from_cache);
    assert_eq!(h.analyzer_calls(), 1);

    let record = h.store.get_record(&fp).await.unwrap();
    assert_eq!(record.status, ProcessingStatus::Completed);
    assert!(record.processed_at > first_at);
}

#[tokio::test]
async fn test_restart_after_crash_retries_unfinished_work() {
    let h = Harness::new(None).await;
    let done = h.write_pdf("done.pdf", "finished before crash");
    let interrupted = h.write_pdf("interrupted.pdf", "in flight at crash");
    let fresh = h.write_pdf("fresh.pdf", "never seen");

    h.default_processor()
        .process_batch(vec![done.clone()], false)
        .await
        .unwrap();
    // 模拟崩溃：记录停在 processing
    assert!(h
        .store
        .try_mark_processing(&fingerprint_bytes(b"in flight at crash"), &interrupted)
        .await
        .unwrap());

    // 从磁盘重新加载
    let reopened = Arc::new(
        ProcessingStateStore::open(h.dir.path().join(".metadata"))
            .await
            .unwrap(),
    );
    assert_eq!(reopened.recover_interrupted().await.unwrap(), 1);

    let h = Harness {
        store: reopened,
        ..h
    };
    let report = h
        .default_processor()
        .process_batch(vec![done, interrupted, fresh], false)
        .await
        .unwrap();

    assert_eq!(report.summary.skipped, 1);
    assert_eq!(report.summary.successful, 2);
    assert_eq!(h.store.stats().await.completed, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_summary_arithmetic() {
    let h = Harness::new(Harness::memory_cache()).await;
    let cache = h.cache.clone().unwrap();

    let mut files = Vec::new();
    for i in 0..3 {
        let content = format!("cached {}", i);
        let fp = fingerprint_bytes(content.as_bytes());
        cache
            .set(
                &fp,
                CachedAnalysisEntry::new(fp.clone(), "Cached", "\\title{Cached}", "fake-model"),
            )
            .await
            .unwrap();
        files.push(h.write_pdf(&format!("cached_{}.pdf", i), &content));
    }
    for i in 0..5 {
        files.push(h.write_pdf(&format!("good_{}.pdf", i), &format!("good {}", i)));
    }
    for i in 0..2 {
        files.push(h.write_pdf(&format!("broken_{}.pdf", i), &format!("broken {}", i)));
    }

    let report = h
        .processor(4, Duration::from_secs(10))
        .process_batch(files, false)
        .await
        .unwrap();

    let s = report.summary;
    assert_eq!(s.total, 10);
    assert_eq!(s.skipped, 3);
    assert_eq!(s.successful, 5);
    assert_eq!(s.failed, 2);
    assert_eq!(report.results.len(), 7);
    assert!(s.average_per_item().is_some());

    let err = report.into_result().unwrap_err();
    assert!(err.is_partial_failure());
    assert!(err.to_string().contains('2'));
}

#[tokio::test]
async fn test_unreachable_cache_degrades_to_miss() {
    let cache = Some(Arc::new(ResultCache::new(
        Arc::new(UnreachableBackend),
        Duration::from_secs(60),
    )));
    let h = Harness::new(cache).await;
    let files = vec![
        h.write_pdf("one.pdf", "one"),
        h.write_pdf("two.pdf", "two"),
    ];

    let report = h
        .default_processor()
        .process_batch(files, false)
        .await
        .unwrap();

    assert_eq!(report.summary.successful, 2);
    assert_eq!(h.analyzer_calls(), 2);
    assert!(report.into_result().is_ok());
}

#[tokio::test]
async fn test_analysis_timeout_marks_failed() {
    let analyzer = FakeAnalyzer {
        delay: Duration::from_millis(500),
        ..Default::default()
    };
    let h = Harness::with_analyzer(None, analyzer).await;
    let file = h.write_pdf("slow.pdf", "slow");

    let report = h
        .processor(1, Duration::from_millis(20))
        .process_batch(vec![file], false)
        .await
        .unwrap();

    assert_eq!(report.summary.failed, 1);
    assert!(matches!(
        report.results[0].error,
        Some(PipelineError::AnalysisTimeout { .. })
    ));
    let record = h.store.get_record(&fingerprint_bytes(b"slow")).await.unwrap();
    assert_eq!(record.status, ProcessingStatus::Failed);
}

#[tokio::test]
async fn test_unreadable_file_fails_without_touching_store() {
    let h = Harness::new(Harness::memory_cache()).await;
    let missing = h.dir.path().join("lib/vanished.pdf");

    let report = h
        .default_processor()
        .process_batch(vec![missing], false)
        .await
        .unwrap();

    assert_eq!(report.summary.enqueued, 1);
    assert_eq!(report.summary.failed, 1);
    let result = &report.results[0];
    assert_eq!(result.status, JobStatus::Failed);
    assert!(result.fingerprint.is_placeholder());
    assert!(matches!(
        result.error,
        Some(PipelineError::Fingerprint { .. })
    ));
    assert!(h.store.get_all_records().await.is_empty());
    assert_eq!(h.cache.as_ref().unwrap().count_entries().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancelled_batch_runs_nothing() {
    let h = Harness::new(None).await;
    let files = vec![h.write_pdf("a.pdf", "a"), h.write_pdf("b.pdf", "b")];

    let processor = h.default_processor();
    processor.cancellation_token().cancel();
    let report = processor.process_batch(files, false).await.unwrap();

    assert_eq!(report.summary.successful, 0);
    assert_eq!(report.summary.failed, 0);
    assert_eq!(report.summary.skipped, 0);
    assert_eq!(report.summary.cancelled, 2);
    assert_eq!(h.analyzer_calls(), 0);
    assert!(h.store.get_all_records().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_mid_batch_finishes_in_flight_job() {
    let analyzer = FakeAnalyzer {
        delay: Duration::from_millis(500),
        ..Default::default()
    };
    let h = Harness::with_analyzer(None, analyzer).await;
    let files: Vec<_> = (0..6)
        .map(|i| h.write_pdf(&format!("paper_{}.pdf", i), &format!("paper {}", i)))
        .collect();

    let processor = h.processor(1, Duration::from_secs(10));
    let cancel = processor.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });
    let report = processor.process_batch(files, false).await.unwrap();

    // 进行中的任务跑完并落盘，其余任务从未开始
    assert_eq!(h.analyzer_calls(), 1);
    let s = report.summary;
    assert_eq!(s.successful, 1);
    assert_eq!(s.skipped, 0);
    assert_eq!(s.cancelled, 5);
    assert_eq!(
        s.total,
        s.skipped + s.successful + s.failed + s.abandoned + s.cancelled
    );

    let records = h.store.get_all_records().await;
    assert_eq!(records.len(), 1);
    let done = &report.results[0];
    assert_eq!(
        h.store.get_record(&done.fingerprint).await.unwrap().status,
        ProcessingStatus::Completed
    );
    assert_eq!(h.store.stats().await.processing, 0);
}

#[tokio::test]
#[ignore] // 需要真实的 API Key 与 LaTeX：cargo test -- --ignored
async fn test_process_input_dir_end_to_end() {
    logger::init();
    let config = paper_archivist::Config::from_env();
    let summary = paper_archivist::App::initialize(config)
        .await
        .expect("初始化失败")
        .run()
        .await
        .expect("批处理失败");
    assert_eq!(summary.failed, 0);
}
