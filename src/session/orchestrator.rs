//! Orchestrator wiring the pipeline stages together.
//!
//! Capture flows one direction (transport → windows → endpointing →
//! transcription → conversational handler) and output flows the other
//! (response text → synthesis → playback → transport), with the barge-in
//! controller at the join point. Stages are independent tasks connected by
//! bounded channels; the orchestrator owns the single playback slot and the
//! session cancellation token.

use crate::audio::ingest::CaptureSink;
use crate::barge_in::BargeInController;
use crate::config::SessionConfig;
use crate::endpoint::run_endpoint_stage;
use crate::engines::{
    AudioSink, ConversationHandler, SpeechModel, SynthesisEngine, TranscriptionEngine,
};
use crate::error::{Result, VoiceError};
use crate::playback::{PlaybackSession, PlaybackSlot};
use crate::session::messages::{CaptureEvent, FinalizedUtterance, ResponseTurn};
use crate::vad::VoiceActivityDetector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Channel buffer sizes.
const CAPTURE_CHANNEL_SIZE: usize = 64;
const UTTERANCE_CHANNEL_SIZE: usize = 8;
const RESPONSE_CHANNEL_SIZE: usize = 8;

/// The external collaborators a session is wired to.
pub struct SessionEngines {
    /// Speech-to-text engine.
    pub transcriber: Arc<dyn TranscriptionEngine>,
    /// Text-to-speech engine.
    pub synthesizer: Arc<dyn SynthesisEngine>,
    /// Conversational logic producing reply text.
    pub handler: Arc<dyn ConversationHandler>,
    /// Transport output stream.
    pub sink: Arc<dyn AudioSink>,
}

/// Composes ingestion, endpointing, conversation turns, and playback for
/// one voice session.
pub struct VoiceSessionOrchestrator {
    config: SessionConfig,
    engines: SessionEngines,
    cancel: CancellationToken,
    barge_in: Arc<BargeInController>,
    playback: PlaybackSlot,
    detector: Option<VoiceActivityDetector>,
    capture_tx: mpsc::Sender<CaptureEvent>,
    capture_rx: Option<mpsc::Receiver<CaptureEvent>>,
}

impl VoiceSessionOrchestrator {
    /// Create an orchestrator for `config` wired to `engines`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: SessionConfig, engines: SessionEngines) -> Result<Self> {
        config.validate()?;
        let detector = VoiceActivityDetector::new(&config.vad);
        let (capture_tx, capture_rx) = mpsc::channel(CAPTURE_CHANNEL_SIZE);
        Ok(Self {
            config,
            engines,
            cancel: CancellationToken::new(),
            barge_in: Arc::new(BargeInController::new()),
            playback: PlaybackSlot::new(),
            detector: Some(detector),
            capture_tx,
            capture_rx: Some(capture_rx),
        })
    }

    /// Install a speech probability model for detection; without one the
    /// detector runs on its energy fallback alone.
    #[must_use]
    pub fn with_speech_model(mut self, model: Box<dyn SpeechModel>) -> Self {
        self.detector = Some(VoiceActivityDetector::with_model(&self.config.vad, model));
        self
    }

    /// Build the capture-context sink to hand to the transport's delivery
    /// callback.
    ///
    /// # Errors
    ///
    /// Returns an error if called more than once; the sink owns the
    /// session's detector.
    pub fn capture_sink(&mut self) -> Result<CaptureSink> {
        let detector = self
            .detector
            .take()
            .ok_or_else(|| VoiceError::Pipeline("capture sink already taken".into()))?;
        CaptureSink::new(
            &self.config,
            detector,
            Arc::clone(&self.barge_in),
            self.playback.clone(),
            self.capture_tx.clone(),
        )
    }

    /// Shared barge-in controller (interruption stats).
    pub fn barge_in(&self) -> Arc<BargeInController> {
        Arc::clone(&self.barge_in)
    }

    /// Read-only view of the playback slot.
    pub fn playback(&self) -> PlaybackSlot {
        self.playback.clone()
    }

    /// Clone of the session cancellation token.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request graceful shutdown of the session.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run the session stages until cancelled.
    ///
    /// Teardown always runs state cleanup: live utterances are discarded
    /// and any active playback is cancelled, even mid-utterance.
    ///
    /// # Errors
    ///
    /// Returns an error if called after the session already ran.
    pub async fn run(mut self) -> Result<()> {
        let capture_rx = self
            .capture_rx
            .take()
            .ok_or_else(|| VoiceError::Pipeline("session already running".into()))?;

        info!("starting voice session pipeline");

        let (finalized_tx, finalized_rx) = mpsc::channel::<FinalizedUtterance>(UTTERANCE_CHANNEL_SIZE);
        let (response_tx, response_rx) = mpsc::channel::<ResponseTurn>(RESPONSE_CHANNEL_SIZE);

        let endpoint_handle = {
            let config = self.config.endpoint.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                run_endpoint_stage(config, capture_rx, finalized_tx, cancel).await;
            })
        };

        let turn_handle = {
            let ctx = TurnContext {
                transcriber: Arc::clone(&self.engines.transcriber),
                handler: Arc::clone(&self.engines.handler),
                sample_rate: self.config.audio.pipeline_sample_rate,
                transcribe_timeout: self.config.engines.transcribe_timeout(),
                min_transcript_chars: self.config.endpoint.min_transcript_chars,
                response_tx,
            };
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                run_turn_stage(ctx, finalized_rx, cancel).await;
            })
        };

        let response_handle = {
            let synthesizer = Arc::clone(&self.engines.synthesizer);
            let sink = Arc::clone(&self.engines.sink);
            let playback = self.playback.clone();
            let grace = self.config.playback.grace_period();
            let synthesis_timeout = self.config.engines.synthesize_timeout();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                run_response_stage(
                    synthesizer,
                    sink,
                    playback,
                    grace,
                    synthesis_timeout,
                    response_rx,
                    cancel,
                )
                .await;
            })
        };

        self.cancel.cancelled().await;
        info!("voice session shutting down");

        let _ = tokio::join!(endpoint_handle, turn_handle, response_handle);

        if let Some(session) = self.playback.take()
            && session.preempt()
        {
            info!("cancelled active playback on teardown");
        }

        info!("voice session shutdown complete");
        Ok(())
    }
}

/// Everything one conversation turn needs, cloned per finalized utterance.
#[derive(Clone)]
struct TurnContext {
    transcriber: Arc<dyn TranscriptionEngine>,
    handler: Arc<dyn ConversationHandler>,
    sample_rate: u32,
    transcribe_timeout: Duration,
    min_transcript_chars: usize,
    response_tx: mpsc::Sender<ResponseTurn>,
}

/// Turn stage: consumes finalized utterances and spawns one task per turn,
/// so a slow transcription for one speaker never delays another's.
async fn run_turn_stage(
    ctx: TurnContext,
    mut utterances: mpsc::Receiver<FinalizedUtterance>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            utterance = utterances.recv() => {
                match utterance {
                    Some(utterance) => {
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            process_utterance(ctx, utterance).await;
                        });
                    }
                    None => break,
                }
            }
        }
    }
}

/// One finalized utterance through transcription and the conversational
/// handler. Every failure path degrades to "this turn produced no output";
/// nothing is retried.
async fn process_utterance(ctx: TurnContext, utterance: FinalizedUtterance) {
    let speaker = utterance.speaker;

    let transcript = match transcribe_bounded(&ctx, &utterance).await {
        Ok(text) => text,
        Err(e) => {
            error!("{e}");
            return;
        }
    };

    let transcript = transcript.trim();
    if transcript.chars().count() < ctx.min_transcript_chars {
        debug!("discarding too-short transcript from speaker {speaker}");
        return;
    }
    info!("speaker {speaker}: \"{transcript}\"");

    let response = match ctx.handler.handle_utterance(speaker, transcript).await {
        Ok(Some(text)) if !text.trim().is_empty() => text,
        Ok(_) => {
            debug!("no spoken reply for speaker {speaker} this turn");
            return;
        }
        Err(e) => {
            error!("{}", VoiceError::Handler(e.to_string()));
            return;
        }
    };

    let _ = ctx
        .response_tx
        .send(ResponseTurn {
            speaker,
            text: response,
        })
        .await;
}

async fn transcribe_bounded(
    ctx: &TurnContext,
    utterance: &FinalizedUtterance,
) -> Result<String> {
    match timeout(
        ctx.transcribe_timeout,
        ctx.transcriber
            .transcribe(&utterance.samples, ctx.sample_rate),
    )
    .await
    {
        Err(_) => Err(VoiceError::Transcription(format!(
            "timed out after {}ms for speaker {}",
            ctx.transcribe_timeout.as_millis(),
            utterance.speaker
        ))),
        Ok(Err(e)) => Err(VoiceError::Transcription(e.to_string())),
        Ok(Ok(text)) => Ok(text),
    }
}

/// Response stage: the single writer of the playback slot. A new response
/// always preempts leftover playback before its session starts.
async fn run_response_stage(
    synthesizer: Arc<dyn SynthesisEngine>,
    sink: Arc<dyn AudioSink>,
    playback: PlaybackSlot,
    grace_period: Duration,
    synthesis_timeout: Duration,
    mut responses: mpsc::Receiver<ResponseTurn>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            turn = responses.recv() => {
                match turn {
                    Some(turn) => {
                        if let Some(previous) = playback.current()
                            && previous.preempt()
                        {
                            info!(
                                "preempted leftover playback for new response to speaker {}",
                                turn.speaker
                            );
                        }
                        let session = PlaybackSession::start(
                            turn.text,
                            Arc::clone(&synthesizer),
                            Arc::clone(&sink),
                            grace_period,
                            synthesis_timeout,
                        );
                        playback.replace(session);
                    }
                    None => break,
                }
            }
        }
    }
}
