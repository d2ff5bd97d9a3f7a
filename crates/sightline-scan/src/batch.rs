use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use sightline_core::{
    scan_observations, ConfigError, EngineConfig, FilterConfig, Gallery, ImageReport, MatchError, Profile,
    SelectionSet, Tier, TieredMatcher,
};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::detector::{Detector, ScanImage};

/// Batch-level failure, reported once before any image is scanned.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("cannot start scan: {0}")]
    Precondition(#[from] MatchError),
    #[error("invalid engine config: {0}")]
    Config(#[from] ConfigError),
}

/// Failure confined to a single image; the batch carries on.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImageError {
    #[error(transparent)]
    Embedding(#[from] MatchError),
    #[error("scan worker failed: {0}")]
    Worker(String),
}

/// Result for one input image, delivered in input order.
#[derive(Debug, Clone)]
pub struct ImageOutcome {
    /// Position in the input batch.
    pub index: usize,
    pub image: ScanImage,
    pub result: Result<ImageReport, ImageError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Images that produced an outcome.
    pub scanned: usize,
    pub flagged: usize,
    pub possible: usize,
    pub clear: usize,
    /// Images aborted by a malformed embedding or a worker fault.
    pub failed: usize,
    /// Images whose detector call failed (counted as clear).
    pub detector_errors: usize,
    /// Images never scheduled because the batch stopped early.
    pub skipped: usize,
    pub cancelled: bool,
}

impl BatchSummary {
    fn record(&mut self, result: &Result<ImageReport, ImageError>) {
        self.scanned += 1;
        match result {
            Ok(report) => {
                if report.detector_error.is_some() {
                    self.detector_errors += 1;
                }
                match report.verdict.tier {
                    Tier::Flagged => self.flagged += 1,
                    Tier::Possible => self.possible += 1,
                    Tier::Clear => self.clear += 1,
                }
            }
            Err(_) => self.failed += 1,
        }
    }
}

/// Runs the per-image pipeline over a batch, several images at a time.
pub struct BatchScanner<D: Detector> {
    detector: Arc<D>,
    matcher: Arc<TieredMatcher>,
    filter: Arc<FilterConfig>,
    concurrency: usize,
}

impl<D: Detector> BatchScanner<D> {
    pub fn new(detector: Arc<D>, matcher: TieredMatcher, filter: FilterConfig, concurrency: usize) -> Self {
        Self {
            detector,
            matcher: Arc::new(matcher),
            filter: Arc::new(filter),
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(detector: Arc<D>, config: EngineConfig, concurrency: usize) -> Result<Self, ScanError> {
        config.validate()?;
        Ok(Self::new(
            detector,
            TieredMatcher::new(config.matching),
            config.filter,
            concurrency,
        ))
    }

    /// Scan `images` against the active profiles.
    ///
    /// The gallery is snapshotted from `profiles` and `selection` before any
    /// image is scheduled. Outcomes go to `sink` in input order. Cancelling
    /// `cancel` stops scheduling; images already running still finish and
    /// are delivered. A closed sink stops the batch the same way.
    pub async fn scan(
        &self,
        profiles: &[Profile],
        selection: &SelectionSet,
        images: Vec<ScanImage>,
        cancel: CancellationToken,
        sink: mpsc::Sender<ImageOutcome>,
    ) -> Result<BatchSummary, ScanError> {
        let gallery = Arc::new(Gallery::snapshot(profiles, selection)?);
        let total = images.len();

        tracing::info!(
            images = total,
            identities = gallery.len(),
            samples = gallery.sample_count(),
            concurrency = self.concurrency,
            "batch scan started"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut queue = images.into_iter().enumerate().peekable();
        let mut tasks: JoinSet<ImageOutcome> = JoinSet::new();
        let mut pending: BTreeMap<usize, ImageOutcome> = BTreeMap::new();
        let mut next_index = 0usize;
        let mut scheduled = 0usize;
        let mut summary = BatchSummary::default();
        let mut stopped = false;
        let mut sink_open = true;

        loop {
            let has_more = queue.peek().is_some();

            tokio::select! {
                biased;

                _ = cancel.cancelled(), if !stopped && has_more => {
                    tracing::info!(scheduled, remaining = total - scheduled, "batch scan cancelled");
                    summary.cancelled = true;
                    stopped = true;
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    let outcome = match joined {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            tracing::error!(error = %err, "scan task lost");
                            continue;
                        }
                    };
                    summary.record(&outcome.result);
                    pending.insert(outcome.index, outcome);

                    while let Some(outcome) = pending.remove(&next_index) {
                        next_index += 1;
                        if sink_open && sink.send(outcome).await.is_err() {
                            tracing::warn!("outcome receiver dropped, stopping batch");
                            sink_open = false;
                            stopped = true;
                        }
                    }
                }

                permit = semaphore.clone().acquire_owned(), if !stopped && has_more => {
                    let Ok(permit) = permit else {
                        stopped = true;
                        continue;
                    };
                    if cancel.is_cancelled() {
                        tracing::info!(scheduled, remaining = total - scheduled, "batch scan cancelled");
                        summary.cancelled = true;
                        stopped = true;
                        continue;
                    }
                    let Some((index, image)) = queue.next() else {
                        continue;
                    };
                    scheduled += 1;

                    let detector = Arc::clone(&self.detector);
                    let matcher = Arc::clone(&self.matcher);
                    let filter = Arc::clone(&self.filter);
                    let gallery = Arc::clone(&gallery);

                    tasks.spawn(async move {
                        let job_image = image.clone();
                        let joined = tokio::task::spawn_blocking(move || {
                            let _permit = permit;
                            scan_image(detector.as_ref(), &matcher, &filter, &gallery, &job_image)
                        })
                        .await;

                        let result = match joined {
                            Ok(result) => result,
                            Err(err) => Err(ImageError::Worker(err.to_string())),
                        };
                        ImageOutcome { index, image, result }
                    });
                }

                else => break,
            }
        }

        // Gaps left by lost tasks: deliver whatever completed, still in order.
        for (_, outcome) in pending {
            if sink_open && sink.send(outcome).await.is_err() {
                sink_open = false;
            }
        }

        summary.skipped = total - scheduled;

        tracing::info!(
            scanned = summary.scanned,
            flagged = summary.flagged,
            possible = summary.possible,
            clear = summary.clear,
            failed = summary.failed,
            detector_errors = summary.detector_errors,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            "batch scan finished"
        );

        Ok(summary)
    }
}

/// Detect, filter, match and aggregate one image. Runs on a blocking thread.
fn scan_image<D: Detector>(
    detector: &D,
    matcher: &TieredMatcher,
    filter: &FilterConfig,
    gallery: &Gallery,
    image: &ScanImage,
) -> Result<ImageReport, ImageError> {
    let observations = match detector.detect(image) {
        Ok(observations) => observations,
        Err(err) => {
            tracing::warn!(image = %image.id, error = %err, "detector failed, treating image as faceless");
            return Ok(ImageReport::detector_failed(err.to_string()));
        }
    };

    scan_observations(observations, image.dims, gallery, matcher, filter).map_err(|err| {
        tracing::warn!(image = %image.id, error = %err, "image aborted");
        ImageError::from(err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorError;
    use sightline_core::{BoundingBox, DistanceError, Embedding, FaceObservation, ImageDims, MatchConfig};
    use std::time::Duration;

    struct FnDetector<F>(F);

    impl<F> Detector for FnDetector<F>
    where
        F: Fn(&ScanImage) -> Result<Vec<FaceObservation>, DetectorError> + Send + Sync + 'static,
    {
        fn detect(&self, image: &ScanImage) -> Result<Vec<FaceObservation>, DetectorError> {
            (self.0)(image)
        }
    }

    fn scanner<F>(f: F, concurrency: usize) -> BatchScanner<FnDetector<F>>
    where
        F: Fn(&ScanImage) -> Result<Vec<FaceObservation>, DetectorError> + Send + Sync + 'static,
    {
        let matcher = TieredMatcher::new(MatchConfig {
            threshold: 0.6,
            possible_band: 0.1,
            margin: 0.25,
        });
        BatchScanner::new(Arc::new(FnDetector(f)), matcher, FilterConfig::default(), concurrency)
    }

    fn profiles() -> Vec<Profile> {
        vec![Profile::new("alice", "Alice").with_samples([Embedding::new(vec![0.0, 0.0])])]
    }

    fn images(n: usize) -> Vec<ScanImage> {
        (0..n)
            .map(|i| ScanImage {
                id: i.to_string(),
                dims: ImageDims::new(1000.0, 1000.0),
            })
            .collect()
    }

    fn face(emb: &[f32]) -> FaceObservation {
        FaceObservation {
            bbox: BoundingBox::new(100.0, 100.0, 100.0, 120.0),
            detector_score: 0.9,
            embedding: Embedding::new(emb.to_vec()),
            detection_scale: 1.0,
        }
    }

    fn index_of(image: &ScanImage) -> usize {
        image.id.parse().unwrap()
    }

    async fn run<D: Detector>(
        scanner: &BatchScanner<D>,
        profiles: &[Profile],
        images: Vec<ScanImage>,
        cancel: CancellationToken,
    ) -> (Result<BatchSummary, ScanError>, Vec<ImageOutcome>) {
        let (tx, mut rx) = mpsc::channel(64);
        let result = scanner
            .scan(profiles, &SelectionSet::new(), images, cancel, tx)
            .await;
        let mut outcomes = Vec::new();
        while let Some(o) = rx.recv().await {
            outcomes.push(o);
        }
        (result, outcomes)
    }

    #[tokio::test]
    async fn test_outcomes_arrive_in_input_order() {
        // Earlier images sleep longer, so completion order is reversed.
        let s = scanner(
            |img| {
                std::thread::sleep(Duration::from_millis(10 * (8 - index_of(img)) as u64));
                Ok(vec![face(&[0.1, 0.0])])
            },
            4,
        );
        let (summary, outcomes) = run(&s, &profiles(), images(8), CancellationToken::new()).await;

        let order: Vec<usize> = outcomes.iter().map(|o| o.index).collect();
        assert_eq!(order, (0..8).collect::<Vec<_>>());
        let summary = summary.unwrap();
        assert_eq!(summary.scanned, 8);
        assert_eq!(summary.flagged, 8);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn test_tiers_tallied() {
        let s = scanner(
            |img| {
                Ok(match index_of(img) {
                    0 => vec![face(&[0.1, 0.0])],
                    1 => vec![face(&[0.65, 0.0])],
                    _ => vec![face(&[3.0, 3.0])],
                })
            },
            2,
        );
        let (summary, outcomes) = run(&s, &profiles(), images(3), CancellationToken::new()).await;
        let summary = summary.unwrap();
        assert_eq!((summary.flagged, summary.possible, summary.clear), (1, 1, 1));
        let tiers: Vec<Tier> = outcomes
            .iter()
            .map(|o| o.result.as_ref().unwrap().verdict.tier)
            .collect();
        assert_eq!(tiers, [Tier::Flagged, Tier::Possible, Tier::Clear]);
    }

    #[tokio::test]
    async fn test_cancel_before_start_schedules_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let s = scanner(|_| Ok(vec![]), 2);
        let (summary, outcomes) = run(&s, &profiles(), images(5), cancel).await;

        let summary = summary.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.scanned, 0);
        assert_eq!(summary.skipped, 5);
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_finishes_running_image() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let s = scanner(
            move |img| {
                if index_of(img) == 2 {
                    trigger.cancel();
                }
                Ok(vec![face(&[0.1, 0.0])])
            },
            1,
        );
        let (summary, outcomes) = run(&s, &profiles(), images(6), cancel).await;

        let order: Vec<usize> = outcomes.iter().map(|o| o.index).collect();
        assert_eq!(order, [0, 1, 2]);
        let summary = summary.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.scanned, 3);
        assert_eq!(summary.skipped, 3);
    }

    #[tokio::test]
    async fn test_precondition_aborts_before_scanning() {
        let s = scanner(|_| panic!("detector must not run"), 2);
        let (result, outcomes) = run(&s, &[], images(3), CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(ScanError::Precondition(MatchError::NoActiveIdentities))
        ));
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_profiles_without_samples_rejected() {
        let s = scanner(|_| Ok(vec![]), 2);
        let empty = vec![Profile::new("bob", "Bob")];
        let (result, _) = run(&s, &empty, images(1), CancellationToken::new()).await;
        assert!(matches!(result, Err(ScanError::Precondition(MatchError::NoSamples))));
    }

    #[tokio::test]
    async fn test_detector_failure_does_not_halt_batch() {
        let s = scanner(
            |img| match index_of(img) {
                1 => Err(DetectorError::Failed("timeout".into())),
                _ => Ok(vec![face(&[0.1, 0.0])]),
            },
            2,
        );
        let (summary, outcomes) = run(&s, &profiles(), images(3), CancellationToken::new()).await;

        let report = outcomes[1].result.as_ref().unwrap();
        assert_eq!(report.verdict.face_count, 0);
        assert_eq!(report.verdict.tier, Tier::Clear);
        assert!(report.detector_error.as_deref().unwrap().contains("timeout"));

        let summary = summary.unwrap();
        assert_eq!(summary.scanned, 3);
        assert_eq!(summary.detector_errors, 1);
        assert_eq!(summary.flagged, 2);
    }

    #[tokio::test]
    async fn test_malformed_embedding_fails_only_that_image() {
        let s = scanner(
            |img| match index_of(img) {
                0 => Ok(vec![face(&[0.1, 0.0, 0.0])]),
                _ => Ok(vec![face(&[0.1, 0.0])]),
            },
            2,
        );
        let (summary, outcomes) = run(&s, &profiles(), images(2), CancellationToken::new()).await;

        assert_eq!(
            outcomes[0].result,
            Err(ImageError::Embedding(MatchError::Embedding(
                DistanceError::DimensionMismatch { expected: 3, actual: 2 }
            )))
        );
        assert!(outcomes[1].result.is_ok());
        let summary = summary.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.flagged, 1);
    }

    #[tokio::test]
    async fn test_worker_panic_reported_per_image() {
        let s = scanner(
            |img| {
                if index_of(img) == 0 {
                    panic!("boom");
                }
                Ok(vec![])
            },
            1,
        );
        let (summary, outcomes) = run(&s, &profiles(), images(2), CancellationToken::new()).await;
        assert!(matches!(outcomes[0].result, Err(ImageError::Worker(_))));
        assert_eq!(outcomes[1].index, 1);
        assert_eq!(summary.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_closed_sink_stops_scheduling() {
        let s = scanner(|_| Ok(vec![]), 1);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let summary = s
            .scan(&profiles(), &SelectionSet::new(), images(10), CancellationToken::new(), tx)
            .await
            .unwrap();
        assert!(summary.skipped >= 1);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn test_scan_uses_snapshot_taken_before_store_edits() {
        use sightline_store::{MemoryStore, ProfileStore};

        let mut store = MemoryStore::new();
        let alice = store.create_profile("Alice").unwrap();
        store.add_sample(&alice.id, Embedding::new(vec![0.0, 0.0])).unwrap();
        let bob = store.create_profile("Bob").unwrap();
        store.add_sample(&bob.id, Embedding::new(vec![5.0, 5.0])).unwrap();

        let before = store.snapshot().unwrap();
        store.delete_profile(&alice.id).unwrap();
        store.set_selected(&bob.id, false).unwrap();
        let after = store.snapshot().unwrap();

        let s = scanner(|_| Ok(vec![face(&[0.1, 0.0])]), 2);
        let (tx, mut rx) = mpsc::channel(8);
        let summary = s
            .scan(&before.profiles, &before.selection, images(2), CancellationToken::new(), tx)
            .await
            .unwrap();
        assert_eq!(summary.flagged, 2);
        while let Some(outcome) = rx.recv().await {
            let report = outcome.result.unwrap();
            assert_eq!(report.verdict.tier, Tier::Flagged);
            assert_eq!(report.verdict.matched_identities[0].identity_id, alice.id);
        }

        let (tx, _rx) = mpsc::channel(8);
        let result = s
            .scan(&after.profiles, &after.selection, images(1), CancellationToken::new(), tx)
            .await;
        assert!(matches!(
            result,
            Err(ScanError::Precondition(MatchError::NoActiveIdentities))
        ));
    }

    #[tokio::test]
    async fn test_zero_detection_scale_is_rejected_not_a_worker_fault() {
        let s = scanner(
            |_| {
                let mut f = face(&[0.1, 0.0]);
                f.detection_scale = 0.0;
                Ok(vec![f])
            },
            1,
        );
        let (summary, outcomes) = run(&s, &profiles(), images(1), CancellationToken::new()).await;
        let report = outcomes[0].result.as_ref().unwrap();
        assert_eq!(report.rejected, 1);
        assert_eq!(report.verdict, sightline_core::ImageVerdict::clear(0));
        assert_eq!(summary.unwrap().failed, 0);
    }

    #[tokio::test]
    async fn test_from_config_validates() {
        let mut cfg = EngineConfig::default();
        cfg.matching.threshold = -1.0;
        let detect = |_: &ScanImage| -> Result<Vec<FaceObservation>, DetectorError> { Ok(vec![]) };
        let result = BatchScanner::from_config(Arc::new(FnDetector(detect)), cfg, 1);
        assert!(matches!(result, Err(ScanError::Config(_))));
    }
}
