//! Background analysis worker.
//!
//! Requests run on a dedicated rayon pool owned by one coordinator thread.
//! All results flow back over a bounded channel consumed by the owner; the
//! worker never touches caller state. Features are extracted once per track
//! and shared across its difficulties.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use rayon::prelude::*;

use crate::analyzer::{self, AnalysisResult, AnalyzeError, CancelToken, features};
use crate::cache::AnalysisCache;
use crate::config::AnalysisConfig;
use crate::difficulty::Difficulty;

/// Channel depth. Progress is dropped when full; other messages block.
const CHANNEL_CAPACITY: usize = 64;
/// Share of a track's progress spent on feature extraction.
const EXTRACT_SHARE: u8 = 70;

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub track: PathBuf,
    pub difficulties: Vec<Difficulty>,
    /// Recompute even when a record is cached.
    pub force: bool,
}

impl AnalysisRequest {
    /// Every difficulty, reusing cached records.
    pub fn all(track: impl Into<PathBuf>) -> Self {
        Self {
            track: track.into(),
            difficulties: Difficulty::ALL.to_vec(),
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum WorkerMessage {
    Progress {
        track: PathBuf,
        percent: u8,
        message: String,
    },
    DifficultyReady {
        track: PathBuf,
        difficulty: Difficulty,
        result: Arc<AnalysisResult>,
    },
    TrackFinished {
        track: PathBuf,
    },
    TrackFailed {
        track: PathBuf,
        error: String,
    },
    /// Sent exactly once after a cancelled run winds down.
    Cancelled,
    AllFinished,
}

/// Owner side of a running worker.
pub struct AnalysisHandle {
    receiver: Receiver<WorkerMessage>,
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl AnalysisHandle {
    pub fn receiver(&self) -> &Receiver<WorkerMessage> {
        &self.receiver
    }

    /// Request a cooperative stop. Takes effect at the next stage boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drain messages until the worker reports `AllFinished` or `Cancelled`,
    /// then join the coordinator thread. Once cancelled, only the terminal
    /// message is delivered; results still in flight are discarded.
    pub fn wait(mut self, mut on_message: impl FnMut(&WorkerMessage)) -> Vec<WorkerMessage> {
        let mut messages = Vec::new();
        for msg in self.receiver.iter() {
            let done = matches!(msg, WorkerMessage::AllFinished | WorkerMessage::Cancelled);
            if !done && self.cancel.is_cancelled() {
                continue;
            }
            on_message(&msg);
            messages.push(msg);
            if done {
                break;
            }
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Analysis worker thread panicked");
            }
        }
        messages
    }
}

impl Drop for AnalysisHandle {
    fn drop(&mut self) {
        // Nobody is listening any more; let the worker wind down.
        self.cancel.cancel();
    }
}

pub struct AnalysisWorker;

impl AnalysisWorker {
    /// Start analysing `requests` on `jobs` threads.
    pub fn spawn(
        cache: AnalysisCache,
        config: AnalysisConfig,
        requests: Vec<AnalysisRequest>,
        jobs: usize,
    ) -> AnalysisHandle {
        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        let cancel = CancelToken::new();
        let ctx = WorkerContext {
            cache,
            config,
            cancel: cancel.clone(),
            tx,
        };
        let thread = std::thread::Builder::new()
            .name("beatlane-analysis".into())
            .spawn(move || ctx.run(requests, jobs.max(1)));

        let thread = match thread {
            Ok(t) => Some(t),
            Err(e) => {
                log::error!("Failed to start analysis worker: {}", e);
                None
            }
        };
        AnalysisHandle {
            receiver: rx,
            cancel,
            thread,
        }
    }
}

struct WorkerContext {
    cache: AnalysisCache,
    config: AnalysisConfig,
    cancel: CancelToken,
    tx: Sender<WorkerMessage>,
}

impl WorkerContext {
    fn run(self, requests: Vec<AnalysisRequest>, jobs: usize) {
        log::info!(
            "Analyzing {} tracks with {} workers",
            requests.len(),
            jobs
        );
        match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
            Ok(pool) => pool.install(|| {
                requests.par_iter().for_each(|req| self.process(req));
            }),
            Err(e) => {
                log::warn!("Thread pool unavailable ({}), analysing sequentially", e);
                requests.iter().for_each(|req| self.process(req));
            }
        }

        if self.cancel.is_cancelled() {
            log::info!("Analysis cancelled");
            let _ = self.tx.send(WorkerMessage::Cancelled);
        } else {
            let _ = self.tx.send(WorkerMessage::AllFinished);
        }
    }

    /// Deliver a message unless cancelled. A closed channel cancels the run.
    fn send(&self, msg: WorkerMessage) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self.tx.send(msg).is_err() {
            self.cancel.cancel();
        }
    }

    fn progress(&self, track: &Path, percent: u8, message: &str) {
        if self.cancel.is_cancelled() {
            return;
        }
        let msg = WorkerMessage::Progress {
            track: track.to_path_buf(),
            percent,
            message: message.to_string(),
        };
        if let Err(TrySendError::Disconnected(_)) = self.tx.try_send(msg) {
            self.cancel.cancel();
        }
    }

    fn process(&self, req: &AnalysisRequest) {
        if self.cancel.is_cancelled() {
            return;
        }
        let track = &req.track;

        let mut pending = Vec::new();
        for &difficulty in &req.difficulties {
            if pending.contains(&difficulty) {
                continue;
            }
            let cached = if req.force {
                None
            } else {
                self.cache.load(track, difficulty)
            };
            match cached {
                Some(hit) => self.send(WorkerMessage::DifficultyReady {
                    track: track.clone(),
                    difficulty,
                    result: Arc::new(hit),
                }),
                None => pending.push(difficulty),
            }
        }
        if pending.is_empty() {
            log::debug!("{}: all difficulties cached", track.display());
            self.send(WorkerMessage::TrackFinished {
                track: track.clone(),
            });
            return;
        }

        let mut report = |percent: u8, message: &str| {
            let scaled = (percent as u16 * EXTRACT_SHARE as u16 / 100) as u8;
            self.progress(track, scaled, message);
        };
        let features = match features::extract_file(track, &self.config, &self.cancel, &mut report)
        {
            Ok(f) => f,
            Err(AnalyzeError::Cancelled) => return,
            Err(e) => {
                log::error!("Analysis failed for {}: {}", track.display(), e);
                self.send(WorkerMessage::TrackFailed {
                    track: track.clone(),
                    error: e.to_string(),
                });
                return;
            }
        };

        let remaining = 100 - EXTRACT_SHARE as usize;
        for (i, &difficulty) in pending.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return;
            }
            let result = analyzer::build_result(&features, difficulty);
            if let Err(e) = self.cache.store(track, difficulty, &result) {
                log::warn!("Failed to cache {} ({}): {}", track.display(), difficulty, e);
            }
            log::info!(
                "{} [{}]: {} events",
                track.file_name().and_then(|f| f.to_str()).unwrap_or("?"),
                difficulty,
                result.events.len()
            );
            let percent = EXTRACT_SHARE as usize + remaining * (i + 1) / pending.len();
            self.progress(track, percent as u8, &format!("{} ready", difficulty));
            self.send(WorkerMessage::DifficultyReady {
                track: track.clone(),
                difficulty,
                result: Arc::new(result),
            });
        }

        self.send(WorkerMessage::TrackFinished {
            track: track.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_click_wav(path: &Path, secs: f32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let len = (22050.0 * secs) as usize;
        for i in 0..len {
            let k = i % 11025;
            let s = if k < 300 {
                (((i * 7919) % 101) as f32 / 50.5 - 1.0) * (1.0 - k as f32 / 300.0)
            } else {
                0.0
            };
            writer.write_sample((s * 20000.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn fast_config() -> AnalysisConfig {
        AnalysisConfig {
            fft_size: 1024,
            hpss_fft_size: 1024,
            hpss_hop: 256,
            hpss_kernel: 9,
            n_mels: 32,
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn test_worker_analyses_and_caches_every_difficulty() {
        let dir = tempfile::tempdir().unwrap();
        let track = dir.path().join("clicks.wav");
        write_click_wav(&track, 3.0);
        let cache = AnalysisCache::new(dir.path().join("cache"));

        let handle = AnalysisWorker::spawn(
            cache.clone(),
            fast_config(),
            vec![AnalysisRequest::all(&track)],
            2,
        );
        let messages = handle.wait(|_| {});

        let ready = messages
            .iter()
            .filter(|m| matches!(m, WorkerMessage::DifficultyReady { .. }))
            .count();
        assert_eq!(ready, 7);
        assert!(matches!(messages.last(), Some(WorkerMessage::AllFinished)));
        assert!(messages
            .iter()
            .any(|m| matches!(m, WorkerMessage::TrackFinished { .. })));
        for d in Difficulty::ALL {
            assert!(cache.contains(&track, d), "{} not cached", d);
        }
    }

    #[test]
    fn test_cached_difficulties_skip_decoding() {
        let dir = tempfile::tempdir().unwrap();
        // Not a real audio file: decoding would fail.
        let track = dir.path().join("cached.wav");
        std::fs::write(&track, b"junk").unwrap();
        let cache = AnalysisCache::new(dir.path().join("cache"));
        cache
            .store(&track, Difficulty::Hard, &AnalysisResult::fallback())
            .unwrap();

        let request = AnalysisRequest {
            track: track.clone(),
            difficulties: vec![Difficulty::Hard],
            force: false,
        };
        let messages = AnalysisWorker::spawn(cache, fast_config(), vec![request], 1).wait(|_| {});
        assert!(matches!(
            &messages[0],
            WorkerMessage::DifficultyReady { difficulty: Difficulty::Hard, .. }
        ));
        assert!(!messages
            .iter()
            .any(|m| matches!(m, WorkerMessage::TrackFailed { .. })));
    }

    #[test]
    fn test_undecodable_track_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let track = dir.path().join("broken.flac");
        std::fs::write(&track, b"junk").unwrap();
        let cache = AnalysisCache::new(dir.path().join("cache"));

        let messages = AnalysisWorker::spawn(
            cache.clone(),
            fast_config(),
            vec![AnalysisRequest::all(&track)],
            1,
        )
        .wait(|_| {});
        assert!(messages
            .iter()
            .any(|m| matches!(m, WorkerMessage::TrackFailed { .. })));
        assert!(matches!(messages.last(), Some(WorkerMessage::AllFinished)));
        assert!(!cache.contains(&track, Difficulty::Normal));
    }

    #[test]
    fn test_cancel_emits_single_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let mut requests = Vec::new();
        for i in 0..4 {
            let track = dir.path().join(format!("t{}.wav", i));
            write_click_wav(&track, 2.0);
            requests.push(AnalysisRequest::all(track));
        }
        let cache = AnalysisCache::new(dir.path().join("cache"));

        let handle = AnalysisWorker::spawn(cache, fast_config(), requests, 1);
        handle.cancel();
        let messages = handle.wait(|_| {});

        let cancelled = messages
            .iter()
            .filter(|m| matches!(m, WorkerMessage::Cancelled))
            .count();
        assert_eq!(cancelled, 1);
        assert!(!messages
            .iter()
            .any(|m| matches!(m, WorkerMessage::AllFinished)));
        assert!(matches!(messages.last(), Some(WorkerMessage::Cancelled)));
        assert!(!messages.iter().any(|m| matches!(
            m,
            WorkerMessage::Progress { .. }
                | WorkerMessage::DifficultyReady { .. }
                | WorkerMessage::TrackFinished { .. }
        )));
    }

    #[test]
    fn test_wait_discards_results_queued_before_cancel() {
        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        let track = PathBuf::from("queued.wav");
        tx.send(WorkerMessage::DifficultyReady {
            track: track.clone(),
            difficulty: Difficulty::Hard,
            result: Arc::new(AnalysisResult::fallback()),
        })
        .unwrap();
        tx.send(WorkerMessage::TrackFinished { track }).unwrap();
        tx.send(WorkerMessage::Cancelled).unwrap();

        let handle = AnalysisHandle {
            receiver: rx,
            cancel: CancelToken::new(),
            thread: None,
        };
        handle.cancel();
        let mut seen = 0;
        let messages = handle.wait(|_| seen += 1);
        assert_eq!(seen, 1);
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], WorkerMessage::Cancelled));
    }

    #[test]
    fn test_wait_delivers_everything_when_not_cancelled() {
        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        tx.send(WorkerMessage::TrackFinished {
            track: PathBuf::from("done.wav"),
        })
        .unwrap();
        tx.send(WorkerMessage::AllFinished).unwrap();
        let handle = AnalysisHandle {
            receiver: rx,
            cancel: CancelToken::new(),
            thread: None,
        };
        let messages = handle.wait(|_| {});
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], WorkerMessage::TrackFinished { .. }));
    }
}
