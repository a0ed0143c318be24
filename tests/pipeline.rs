//! Integration tests for the slide2lecture pipeline.
//!
//! Every external service (work queue, downloads, pdfium, LLM, TTS, STT) is
//! replaced by an in-memory fake that records the calls it receives, so these
//! tests run offline and check exactly what each stage sent where.
//!
//! The live tests at the bottom need a real pdfium library and a sample deck.
//! They are gated behind `E2E_ENABLED`:
//!   E2E_ENABLED=1 S2L_E2E_PDF=deck.pdf cargo test --test pipeline -- --nocapture

use async_trait::async_trait;
use slide2lecture::pipeline::input::DocumentSource;
use slide2lecture::pipeline::render::{PageRasterizer, RenderedPage};
use slide2lecture::pipeline::text::TextExtractor;
use slide2lecture::providers::{
    NarrationProvider, NarrationRequest, NarrationResponse, ProviderError, SpeechProvider,
    TranscriptionProvider,
};
use slide2lecture::{
    document_key, process_document, Coordinator, ItemCreate, ItemField, ItemUpdate,
    LectureError, PageError, PendingDocument, PipelineConfig, RunContext, RunLayout,
    RunProgressCallback, RunReport, Services, Slide, Stage, TickOutcome, WorkQueue,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

const DOC_URL: &str = "http://queue.test/uploads/deck.pdf";
const ASSET_BASE: &str = "http://assets.test";

// ── Fakes ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeQueue {
    pending: Mutex<Vec<String>>,
    fetch_calls: AtomicUsize,
    excluded: Mutex<Vec<Vec<String>>>,
    creates: Mutex<Vec<ItemCreate>>,
    updates: Mutex<Vec<ItemUpdate>>,
    completed: Mutex<Vec<String>>,
}

impl FakeQueue {
    fn with_pending(urls: &[&str]) -> Arc<Self> {
        let q = Self::default();
        *q.pending.lock().unwrap() = urls.iter().map(|u| u.to_string()).collect();
        Arc::new(q)
    }

    fn updates_for(&self, field: ItemField) -> Vec<ItemUpdate> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.field == field)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl WorkQueue for FakeQueue {
    async fn fetch_pending(
        &self,
        exclude: &[String],
    ) -> Result<Option<PendingDocument>, LectureError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.excluded.lock().unwrap().push(exclude.to_vec());
        Ok(self
            .pending
            .lock()
            .unwrap()
            .iter()
            .find(|u| !exclude.contains(u))
            .map(|url| PendingDocument { url: url.clone() }))
    }

    async fn create_item(&self, item: &ItemCreate) -> Result<(), LectureError> {
        self.creates.lock().unwrap().push(item.clone());
        Ok(())
    }

    async fn update_item(&self, update: &ItemUpdate) -> Result<(), LectureError> {
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }

    async fn mark_completed(&self, document_url: &str) -> Result<(), LectureError> {
        self.completed.lock().unwrap().push(document_url.to_string());
        self.pending.lock().unwrap().retain(|u| u != document_url);
        Ok(())
    }
}

struct FakeSource {
    bytes: Vec<u8>,
    calls: AtomicUsize,
}

impl FakeSource {
    fn pdf() -> Arc<Self> {
        Self::returning(b"%PDF-1.7 fake deck".to_vec())
    }

    fn returning(bytes: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            bytes,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DocumentSource for FakeSource {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, LectureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.bytes.clone())
    }
}

struct FakeText {
    pages: Vec<String>,
}

#[async_trait]
impl TextExtractor for FakeText {
    async fn extract(&self, _url: &str, _bytes: Arc<Vec<u8>>) -> Result<Vec<Slide>, LectureError> {
        Ok(self
            .pages
            .iter()
            .enumerate()
            .map(|(i, text)| Slide {
                page_number: i + 1,
                text: text.clone(),
            })
            .collect())
    }
}

struct FakeRasterizer {
    pages: usize,
    fail_page: Option<usize>,
}

#[async_trait]
impl PageRasterizer for FakeRasterizer {
    async fn rasterize(
        &self,
        _url: &str,
        _bytes: Arc<Vec<u8>>,
    ) -> Result<Vec<RenderedPage>, LectureError> {
        Ok((1..=self.pages)
            .map(|page_number| RenderedPage {
                page_number,
                png: if Some(page_number) == self.fail_page {
                    Err(PageError::RenderFailed {
                        page: page_number,
                        detail: "bitmap allocation failed".into(),
                    })
                } else {
                    Ok(format!("png-{page_number}").into_bytes())
                },
            })
            .collect())
    }
}

#[derive(Default)]
struct FakeNarrator {
    prompts: Mutex<Vec<String>>,
    fail_page: Option<usize>,
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl NarrationProvider for FakeNarrator {
    async fn narrate(&self, request: &NarrationRequest) -> Result<NarrationResponse, ProviderError> {
        if let Some(ref gate) = self.gate {
            let _permit = gate.acquire().await.expect("gate closed");
        }
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if Some(request.page_number) == self.fail_page {
            return Err(ProviderError::Status {
                status: 400,
                body: "content policy".into(),
            });
        }
        Ok(NarrationResponse {
            text: format!("Narration for slide {}.", request.page_number),
            input_tokens: 100,
            output_tokens: 20,
        })
    }
}

#[derive(Default)]
struct FakeSpeech {
    texts: Mutex<Vec<String>>,
    fail_when_contains: Option<String>,
    /// Stop failing after this many failures; `None` fails every time.
    fail_limit: Option<usize>,
    failures: AtomicUsize,
}

#[async_trait]
impl SpeechProvider for FakeSpeech {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, ProviderError> {
        assert_eq!(voice, "nova");
        self.texts.lock().unwrap().push(text.to_string());
        if let Some(ref needle) = self.fail_when_contains {
            let exhausted = self
                .fail_limit
                .is_some_and(|limit| self.failures.load(Ordering::SeqCst) >= limit);
            if text.contains(needle.as_str()) && !exhausted {
                self.failures.fetch_add(1, Ordering::SeqCst);
                return Err(ProviderError::Status {
                    status: 422,
                    body: "unsupported input".into(),
                });
            }
        }
        Ok(format!("mp3:{text}").into_bytes())
    }
}

#[derive(Default)]
struct FakeTranscriber {
    files: Mutex<Vec<String>>,
}

#[async_trait]
impl TranscriptionProvider for FakeTranscriber {
    async fn transcribe(
        &self,
        audio: Vec<u8>,
        file_name: &str,
        language: &str,
    ) -> Result<String, ProviderError> {
        assert_eq!(language, "en");
        self.files.lock().unwrap().push(file_name.to_string());
        let spoken = String::from_utf8_lossy(&audio).trim_start_matches("mp3:").to_string();
        Ok(format!("1\r\n00:00:00,000 --> 00:00:04,000\r\n{spoken}\r\n\r\n"))
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    tmp: TempDir,
    queue: Arc<FakeQueue>,
    source: Arc<FakeSource>,
    narrator: Arc<FakeNarrator>,
    speech: Arc<FakeSpeech>,
    transcriber: Arc<FakeTranscriber>,
    services: Services,
}

struct HarnessBuilder {
    pages: Vec<String>,
    image_pages: Option<usize>,
    fail_render: Option<usize>,
    queue: Arc<FakeQueue>,
    source: Arc<FakeSource>,
    narrator: FakeNarrator,
    speech: FakeSpeech,
}

impl HarnessBuilder {
    fn new(pages: &[&str]) -> Self {
        Self {
            pages: pages.iter().map(|p| p.to_string()).collect(),
            image_pages: None,
            fail_render: None,
            queue: FakeQueue::with_pending(&[]),
            source: FakeSource::pdf(),
            narrator: FakeNarrator::default(),
            speech: FakeSpeech::default(),
        }
    }

    fn build(self) -> Harness {
        init_tracing();
        let narrator = Arc::new(self.narrator);
        let speech = Arc::new(self.speech);
        let transcriber = Arc::new(FakeTranscriber::default());
        let services = Services {
            queue: self.queue.clone(),
            source: self.source.clone(),
            text: Arc::new(FakeText {
                pages: self.pages.clone(),
            }),
            rasterizer: Arc::new(FakeRasterizer {
                pages: self.image_pages.unwrap_or(self.pages.len()),
                fail_page: self.fail_render,
            }),
            narrator: narrator.clone(),
            speech: speech.clone(),
            transcriber: transcriber.clone(),
        };
        Harness {
            tmp: TempDir::new().expect("tempdir"),
            queue: self.queue,
            source: self.source,
            narrator,
            speech,
            transcriber,
            services,
        }
    }
}

impl Harness {
    fn config(&self) -> PipelineConfig {
        PipelineConfig::builder()
            .output_root(self.tmp.path())
            .asset_base_url(ASSET_BASE)
            .max_retries(0)
            .retry_backoff_ms(1)
            .build()
            .expect("valid config")
    }

    fn context(&self) -> RunContext {
        let layout = RunLayout::new(self.tmp.path(), document_key(DOC_URL, 96));
        RunContext::new(
            DOC_URL,
            layout,
            b"%PDF-1.7 fake deck".to_vec(),
            CancellationToken::new(),
        )
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

// ── Full run ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn three_slide_deck_produces_every_asset() {
    let h = HarnessBuilder::new(&["Intro", "Methods", "Results"]).build();
    let ctx = h.context();
    let key = ctx.key().to_string();

    let report = process_document(&ctx, &h.services, &h.config())
        .await
        .expect("run should succeed");

    assert!(report.is_complete(), "failures: {:?}", report.failures().collect::<Vec<_>>());
    assert_eq!(report.slides.len(), 3);
    assert_eq!(report.images.items.len(), 3);
    assert_eq!(report.narration.len(), 3);
    assert_eq!(report.audio.items.len(), 3);
    assert_eq!(report.subtitles.items.len(), 3);
    assert_eq!(report.stats.total_pages, 3);
    assert_eq!(report.stats.narration_input_tokens, 300);
    assert_eq!(report.stats.narration_output_tokens, 60);

    for page in 1..=3 {
        let path = h.root().join(format!("images/{key}/page_{page}.png"));
        assert_eq!(std::fs::read(&path).unwrap(), format!("png-{page}").into_bytes());
    }
    for index in 0..3 {
        assert!(h.root().join(format!("audio/{key}/lecture_{index}.mp3")).is_file());
        let srt = std::fs::read_to_string(
            h.root().join(format!("subtitles/{key}/lecture_{index}.mp3.srt")),
        )
        .unwrap();
        assert_eq!(
            srt,
            format!("1\n00:00:00,000 --> 00:00:04,000\nNarration for slide {}.\n", index + 1)
        );
    }

    // Registration carries the page number, document URL and public image URL.
    let creates = h.queue.creates.lock().unwrap().clone();
    assert_eq!(creates.len(), 3);
    for (i, item) in creates.iter().enumerate() {
        assert_eq!(item.page, i + 1);
        assert_eq!(item.document_url, DOC_URL);
        assert_eq!(
            item.image_url,
            format!("{ASSET_BASE}/images/{key}/page_{}.png", i + 1)
        );
    }

    let audio_updates = h.queue.updates_for(ItemField::AudioUrl);
    let pages: Vec<usize> = audio_updates.iter().map(|u| u.page).collect();
    assert_eq!(pages, vec![1, 2, 3]);
    assert_eq!(
        audio_updates[2].value,
        format!("{ASSET_BASE}/audio/{key}/lecture_2.mp3")
    );

    let transcript_updates = h.queue.updates_for(ItemField::Transcription);
    assert_eq!(transcript_updates.len(), 3);
    assert_eq!(
        transcript_updates[0].value,
        format!("{ASSET_BASE}/subtitles/{key}/lecture_0.mp3.srt")
    );

    assert_eq!(
        *h.transcriber.files.lock().unwrap(),
        vec!["lecture_0.mp3", "lecture_1.mp3", "lecture_2.mp3"]
    );
    assert_eq!(*h.queue.completed.lock().unwrap(), vec![DOC_URL.to_string()]);
    assert!(report.marked_completed);
}

#[tokio::test]
async fn narration_history_grows_slide_by_slide() {
    let h = HarnessBuilder::new(&["Intro", "Methods", "Results"]).build();
    process_document(&h.context(), &h.services, &h.config())
        .await
        .unwrap();

    let prompts = h.narrator.prompts.lock().unwrap().clone();
    assert_eq!(prompts.len(), 3);

    assert!(prompts[0].ends_with("slide 1: Intro"));
    assert!(!prompts[0].contains("Lecture for slide"));

    assert!(prompts[1].contains("Lecture for slide 1:\nNarration for slide 1."));
    assert!(prompts[1].ends_with("slide 2: Methods"));

    assert!(prompts[2].contains("Lecture for slide 1:\nNarration for slide 1."));
    assert!(prompts[2].contains("Lecture for slide 2:\nNarration for slide 2."));
    assert!(prompts[2].ends_with("slide 3: Results"));
}

// ── Failure policy ───────────────────────────────────────────────────────────

#[tokio::test]
async fn narration_failure_stops_the_run() {
    let mut b = HarnessBuilder::new(&["Intro", "Methods", "Results"]);
    b.narrator.fail_page = Some(2);
    let h = b.build();

    let err = process_document(&h.context(), &h.services, &h.config())
        .await
        .unwrap_err();

    assert!(
        matches!(err, LectureError::NarrationFailed { page: 2, .. }),
        "got {err:?}"
    );
    // Slide 3 was never attempted, nothing downstream ran.
    assert_eq!(h.narrator.prompts.lock().unwrap().len(), 2);
    assert!(h.speech.texts.lock().unwrap().is_empty());
    assert!(h.transcriber.files.lock().unwrap().is_empty());
    assert!(h.queue.updates.lock().unwrap().is_empty());
    assert!(h.queue.completed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn speech_failure_is_isolated_to_its_slide() {
    let mut b = HarnessBuilder::new(&["Intro", "Methods", "Results"]);
    b.speech.fail_when_contains = Some("slide 2".into());
    let h = b.build();
    let ctx = h.context();
    let key = ctx.key().to_string();

    let report = process_document(&ctx, &h.services, &h.config())
        .await
        .expect("per-item failures are not fatal");

    assert_eq!(h.speech.texts.lock().unwrap().len(), 3);
    assert_eq!(report.audio.items.len(), 2);
    assert_eq!(report.audio.errors.len(), 1);
    assert_eq!(report.audio.errors[0].page(), 2);

    // Slide 3 keeps its own index and page number.
    let indices: Vec<(usize, usize)> = report
        .subtitles
        .items
        .iter()
        .map(|s| (s.index, s.page_number))
        .collect();
    assert_eq!(indices, vec![(0, 1), (2, 3)]);
    assert!(h.root().join(format!("audio/{key}/lecture_2.mp3")).is_file());
    assert!(!h.root().join(format!("audio/{key}/lecture_1.mp3")).exists());

    let transcript_pages: Vec<usize> = h
        .queue
        .updates_for(ItemField::Transcription)
        .iter()
        .map(|u| u.page)
        .collect();
    assert_eq!(transcript_pages, vec![1, 3]);

    assert!(!report.is_complete());
    assert!(!report.marked_completed);
    assert_eq!(report.stats.failed_items, 1);
    assert!(h.queue.completed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn render_failure_skips_registration_for_that_page() {
    let mut b = HarnessBuilder::new(&["Intro", "Methods", "Results"]);
    b.fail_render = Some(2);
    let h = b.build();

    let report = process_document(&h.context(), &h.services, &h.config())
        .await
        .unwrap();

    let registered: Vec<usize> = h.queue.creates.lock().unwrap().iter().map(|c| c.page).collect();
    assert_eq!(registered, vec![1, 3]);
    assert!(matches!(
        report.images.errors.as_slice(),
        [PageError::RenderFailed { page: 2, .. }]
    ));
    // Narration only needs text, so every slide is still narrated.
    assert_eq!(report.narration.len(), 3);
    assert!(!report.marked_completed);
}

#[tokio::test]
async fn extractor_page_counts_must_agree() {
    let mut b = HarnessBuilder::new(&["Intro", "Methods", "Results"]);
    b.image_pages = Some(2);
    let h = b.build();

    let err = process_document(&h.context(), &h.services, &h.config())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LectureError::PageCountMismatch {
            text_pages: 3,
            image_pages: 2
        }
    ));
    assert!(h.narrator.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_run_stops_before_narration() {
    let h = HarnessBuilder::new(&["Intro", "Methods"]).build();
    let ctx = h.context();
    ctx.cancel.cancel();

    let err = process_document(&ctx, &h.services, &h.config())
        .await
        .unwrap_err();

    assert!(matches!(err, LectureError::Cancelled { .. }));
    assert!(h.queue.creates.lock().unwrap().is_empty());
    assert!(h.narrator.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_deck_completes_without_provider_calls() {
    let h = HarnessBuilder::new(&[]).build();

    let report = process_document(&h.context(), &h.services, &h.config())
        .await
        .unwrap();

    assert_eq!(report.stats.total_pages, 0);
    assert!(h.narrator.prompts.lock().unwrap().is_empty());
    assert!(report.marked_completed);
}

// ── Progress events ──────────────────────────────────────────────────────────

#[derive(Default)]
struct CountingCallback {
    runs_started: AtomicUsize,
    completes: Mutex<Vec<(Stage, usize)>>,
    errors: Mutex<Vec<(Stage, usize)>>,
    finished: Mutex<Option<(usize, usize)>>,
}

impl RunProgressCallback for CountingCallback {
    fn on_run_start(&self, _url: &str, _total_pages: usize) {
        self.runs_started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_item_complete(&self, _url: &str, stage: Stage, page_number: usize) {
        self.completes.lock().unwrap().push((stage, page_number));
    }

    fn on_item_error(&self, _url: &str, stage: Stage, page_number: usize, _error: &str) {
        self.errors.lock().unwrap().push((stage, page_number));
    }

    fn on_run_complete(&self, _url: &str, total_pages: usize, failed_items: usize) {
        *self.finished.lock().unwrap() = Some((total_pages, failed_items));
    }
}

#[tokio::test]
async fn progress_callback_sees_every_item() {
    let mut b = HarnessBuilder::new(&["Intro", "Methods"]);
    b.speech.fail_when_contains = Some("slide 1".into());
    let h = b.build();
    let cb = Arc::new(CountingCallback::default());
    let config = PipelineConfig::builder()
        .output_root(h.root())
        .max_retries(0)
        .progress_callback(cb.clone())
        .build()
        .unwrap();

    process_document(&h.context(), &h.services, &config)
        .await
        .unwrap();

    assert_eq!(cb.runs_started.load(Ordering::SeqCst), 1);
    let completes = cb.completes.lock().unwrap().clone();
    assert_eq!(
        completes
            .iter()
            .filter(|(s, _)| *s == Stage::Narration)
            .count(),
        2
    );
    assert!(completes.contains(&(Stage::Synthesis, 2)));
    assert!(completes.contains(&(Stage::Transcription, 2)));
    assert_eq!(*cb.errors.lock().unwrap(), vec![(Stage::Synthesis, 1)]);
    assert_eq!(*cb.finished.lock().unwrap(), Some((2, 1)));
}

// ── Coordinator ──────────────────────────────────────────────────────────────

fn coordinator(h: &Harness) -> Coordinator {
    Coordinator::new(h.config(), h.services.clone())
}

#[tokio::test]
async fn idle_poll_has_no_side_effects() {
    let h = HarnessBuilder::new(&["Intro"]).build();
    let coord = coordinator(&h);

    let outcome = coord.tick().await.unwrap();

    assert!(matches!(outcome, TickOutcome::Idle));
    assert_eq!(h.queue.fetch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 0);
    assert!(h.narrator.prompts.lock().unwrap().is_empty());
    assert_eq!(std::fs::read_dir(h.root()).unwrap().count(), 0);
}

#[tokio::test]
async fn tick_dispatches_run_and_releases_slot() {
    let mut b = HarnessBuilder::new(&["Intro", "Methods", "Results"]);
    b.queue = FakeQueue::with_pending(&[DOC_URL]);
    let h = b.build();
    let coord = coordinator(&h);

    let handle = match coord.tick().await.unwrap() {
        TickOutcome::Dispatched { url, handle } => {
            assert_eq!(url, DOC_URL);
            handle
        }
        other => panic!("expected dispatch, got {other:?}"),
    };

    let report = handle.await.unwrap().unwrap();
    assert!(report.marked_completed);
    assert_eq!(h.queue.creates.lock().unwrap().len(), 3);
    assert!(coord.registry().is_empty());

    let key = document_key(DOC_URL, 96);
    assert_eq!(
        std::fs::read(h.root().join(format!("work/{key}/document.pdf"))).unwrap(),
        b"%PDF-1.7 fake deck"
    );

    // Completed documents leave the queue; the next poll is idle.
    assert!(matches!(coord.tick().await.unwrap(), TickOutcome::Idle));
}

#[tokio::test]
async fn second_tick_waits_while_run_is_active() {
    let gate = Arc::new(Semaphore::new(0));
    let mut b = HarnessBuilder::new(&["Intro"]);
    b.queue = FakeQueue::with_pending(&[DOC_URL, "http://queue.test/uploads/other.pdf"]);
    b.narrator.gate = Some(gate.clone());
    let h = b.build();
    let coord = coordinator(&h);

    let TickOutcome::Dispatched { handle, .. } = coord.tick().await.unwrap() else {
        panic!("first tick should dispatch");
    };
    assert_eq!(coord.registry().active_urls(), vec![DOC_URL.to_string()]);

    // Single-run capacity: the queue is not even polled.
    assert!(matches!(coord.tick().await.unwrap(), TickOutcome::AtCapacity));
    assert_eq!(h.queue.fetch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 1);

    gate.add_permits(10);
    handle.await.unwrap().unwrap();
    assert!(coord.registry().is_empty());
}

#[tokio::test]
async fn leftover_document_is_replaced() {
    let mut b = HarnessBuilder::new(&["Intro"]);
    b.queue = FakeQueue::with_pending(&[DOC_URL]);
    let h = b.build();
    let key = document_key(DOC_URL, 96);
    let leftover = h.root().join(format!("work/{key}/document.pdf"));
    std::fs::create_dir_all(leftover.parent().unwrap()).unwrap();
    std::fs::write(&leftover, b"stale bytes from an earlier tick").unwrap();

    let coord = coordinator(&h);
    let TickOutcome::Dispatched { handle, .. } = coord.tick().await.unwrap() else {
        panic!("tick should dispatch");
    };
    handle.await.unwrap().unwrap();

    assert_eq!(std::fs::read(&leftover).unwrap(), b"%PDF-1.7 fake deck");
}

#[tokio::test]
async fn non_pdf_download_fails_the_tick() {
    let mut b = HarnessBuilder::new(&["Intro"]);
    b.queue = FakeQueue::with_pending(&[DOC_URL]);
    b.source = FakeSource::returning(b"<html>404</html>".to_vec());
    let h = b.build();
    let coord = coordinator(&h);

    let err = coord.tick().await.unwrap_err();

    assert!(matches!(err, LectureError::NotAPdf { .. }));
    assert!(coord.registry().is_empty());
    assert!(h.queue.creates.lock().unwrap().is_empty());
    // The document stays pending for the next tick.
    assert_eq!(h.queue.pending.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn run_loop_stops_on_shutdown() {
    let mut b = HarnessBuilder::new(&["Intro"]);
    b.queue = FakeQueue::with_pending(&[DOC_URL]);
    let h = b.build();
    let config = PipelineConfig::builder()
        .output_root(h.root())
        .poll_interval_secs(1)
        .max_retries(0)
        .build()
        .unwrap();
    let coord = Coordinator::new(config, h.services.clone());
    let shutdown = CancellationToken::new();

    let stopper = shutdown.clone();
    let queue = h.queue.clone();
    tokio::spawn(async move {
        // First tick fires immediately; stop once the document is completed.
        while queue.completed.lock().unwrap().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        stopper.cancel();
    });

    tokio::time::timeout(std::time::Duration::from_secs(10), coord.run(shutdown))
        .await
        .expect("coordinator should stop after shutdown");
    assert_eq!(*h.queue.completed.lock().unwrap(), vec![DOC_URL.to_string()]);
}

async fn tick_and_wait(coord: &Coordinator) -> Result<RunReport, LectureError> {
    match coord.tick().await.expect("tick") {
        TickOutcome::Dispatched { handle, .. } => handle.await.expect("run task"),
        other => panic!("expected dispatch, got {other:?}"),
    }
}

// ── Resuming unfinished runs ─────────────────────────────────────────────────

#[tokio::test]
async fn partial_run_resumes_without_repeating_delivered_work() {
    let mut b = HarnessBuilder::new(&["Intro", "Methods", "Results"]);
    b.queue = FakeQueue::with_pending(&[DOC_URL]);
    b.speech.fail_when_contains = Some("slide 2".into());
    b.speech.fail_limit = Some(1);
    let h = b.build();
    let coord = coordinator(&h);
    let key = document_key(DOC_URL, 96);

    let first = tick_and_wait(&coord).await.unwrap();
    assert!(!first.is_complete());
    assert!(h.root().join(format!("work/{key}/checkpoint.json")).is_file());
    assert_eq!(coord.registry().unfinished_runs(DOC_URL), 1);

    let second = tick_and_wait(&coord).await.unwrap();
    assert!(second.is_complete(), "failures: {:?}", second.failures().collect::<Vec<_>>());
    assert!(second.marked_completed);
    assert_eq!(second.audio.items.len(), 3);
    assert_eq!(second.subtitles.items.len(), 3);
    assert_eq!(second.stats.narration_input_tokens, 0);

    // One registration and one narration request per slide across both runs.
    assert_eq!(h.queue.creates.lock().unwrap().len(), 3);
    assert_eq!(h.narrator.prompts.lock().unwrap().len(), 3);

    // Only slide 2 went back to the speech and transcription providers.
    assert_eq!(h.speech.texts.lock().unwrap().len(), 4);
    assert_eq!(
        *h.transcriber.files.lock().unwrap(),
        vec!["lecture_0.mp3", "lecture_2.mp3", "lecture_1.mp3"]
    );
    let audio_pages: Vec<usize> = h
        .queue
        .updates_for(ItemField::AudioUrl)
        .iter()
        .map(|u| u.page)
        .collect();
    assert_eq!(audio_pages, vec![1, 3, 2]);
    assert_eq!(h.queue.updates_for(ItemField::Transcription).len(), 3);

    assert!(!h.root().join(format!("work/{key}/checkpoint.json")).exists());
    assert_eq!(coord.registry().unfinished_runs(DOC_URL), 0);
}

#[tokio::test]
async fn document_is_skipped_after_repeated_unfinished_runs() {
    let mut b = HarnessBuilder::new(&["Intro", "Methods", "Results"]);
    b.queue = FakeQueue::with_pending(&[DOC_URL]);
    b.speech.fail_when_contains = Some("slide 2".into());
    let h = b.build();
    let config = PipelineConfig::builder()
        .output_root(h.root())
        .asset_base_url(ASSET_BASE)
        .max_retries(0)
        .max_run_attempts(2)
        .build()
        .unwrap();
    let coord = Coordinator::new(config, h.services.clone());

    for _ in 0..2 {
        let report = tick_and_wait(&coord).await.unwrap();
        assert!(!report.is_complete());
    }
    assert!(coord.registry().has_given_up(DOC_URL));

    assert!(matches!(coord.tick().await.unwrap(), TickOutcome::Idle));
    assert_eq!(
        h.queue.excluded.lock().unwrap().last().cloned(),
        Some(vec![DOC_URL.to_string()])
    );
    assert_eq!(h.source.calls.load(Ordering::SeqCst), 2);

    // Delivered slides were never redone; slide 2 was retried once per run.
    assert_eq!(h.queue.creates.lock().unwrap().len(), 3);
    assert_eq!(h.narrator.prompts.lock().unwrap().len(), 3);
    assert_eq!(h.speech.texts.lock().unwrap().len(), 4);
    assert_eq!(h.transcriber.files.lock().unwrap().len(), 2);
    assert!(h.queue.completed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn changed_document_bytes_start_a_fresh_run() {
    let mut b = HarnessBuilder::new(&["Intro", "Methods"]);
    b.speech.fail_when_contains = Some("slide 2".into());
    let h = b.build();

    let first = process_document(&h.context(), &h.services, &h.config())
        .await
        .unwrap();
    assert!(!first.is_complete());

    let layout = RunLayout::new(h.root(), document_key(DOC_URL, 96));
    let revised = RunContext::new(
        DOC_URL,
        layout,
        b"%PDF-1.7 revised deck".to_vec(),
        CancellationToken::new(),
    );
    process_document(&revised, &h.services, &h.config())
        .await
        .unwrap();

    assert_eq!(h.queue.creates.lock().unwrap().len(), 4);
    assert_eq!(h.narrator.prompts.lock().unwrap().len(), 4);
}

// ── Run limits ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn run_timeout_cancels_the_run_and_frees_its_slot() {
    let gate = Arc::new(Semaphore::new(0));
    let mut b = HarnessBuilder::new(&["Intro"]);
    b.queue = FakeQueue::with_pending(&[DOC_URL]);
    b.narrator.gate = Some(gate.clone());
    let h = b.build();
    let config = PipelineConfig::builder()
        .output_root(h.root())
        .asset_base_url(ASSET_BASE)
        .max_retries(0)
        .run_timeout_secs(1)
        .build()
        .unwrap();
    let coord = Coordinator::new(config, h.services.clone());

    let TickOutcome::Dispatched { handle, .. } = coord.tick().await.unwrap() else {
        panic!("tick should dispatch");
    };
    let token = coord.registry().token(DOC_URL).expect("run is registered");

    let err = tokio::time::timeout(std::time::Duration::from_secs(10), handle)
        .await
        .expect("run should hit its own timeout first")
        .unwrap()
        .unwrap_err();

    assert!(
        matches!(err, LectureError::RunTimeout { secs: 1, .. }),
        "got {err:?}"
    );
    assert!(token.is_cancelled());
    assert!(!coord.cancellation_token().is_cancelled());
    assert!(coord.registry().is_empty());
    assert_eq!(coord.registry().unfinished_runs(DOC_URL), 1);
    assert!(h.speech.texts.lock().unwrap().is_empty());
    assert!(h.queue.completed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn zero_poll_interval_set_directly_does_not_panic() {
    let h = HarnessBuilder::new(&["Intro"]).build();
    let mut config = h.config();
    config.poll_interval_secs = 0;
    let coord = Coordinator::new(config, h.services.clone());
    let shutdown = CancellationToken::new();

    let stopper = shutdown.clone();
    let queue = h.queue.clone();
    tokio::spawn(async move {
        while queue.fetch_calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        stopper.cancel();
    });

    tokio::time::timeout(std::time::Duration::from_secs(10), coord.run(shutdown))
        .await
        .expect("coordinator should stop after shutdown");
    assert!(h.queue.fetch_calls.load(Ordering::SeqCst) >= 1);
}

// ── Live pdfium (E2E_ENABLED) ────────────────────────────────────────────────

#[tokio::test]
async fn live_extractors_agree_on_page_count() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
        return;
    }
    let Ok(path) = std::env::var("S2L_E2E_PDF") else {
        println!("SKIP — set S2L_E2E_PDF to a sample slide deck");
        return;
    };

    use slide2lecture::pipeline::render::PdfiumRasterizer;
    use slide2lecture::pipeline::text::PdfiumTextExtractor;

    let config = PipelineConfig::builder().dpi(72).build().unwrap();
    let bytes = Arc::new(std::fs::read(&path).expect("sample deck readable"));

    let slides = PdfiumTextExtractor::new(config.pdfium_lib_path.clone())
        .extract(&path, bytes.clone())
        .await
        .expect("text extraction");
    let pages = PdfiumRasterizer::from_config(&config)
        .rasterize(&path, bytes)
        .await
        .expect("rasterisation");

    assert_eq!(slides.len(), pages.len());
    for page in &pages {
        let png = page.png.as_ref().expect("page renders");
        assert_eq!(&png[1..4], b"PNG");
    }
    println!("✓ {} pages extracted and rendered", slides.len());
}
