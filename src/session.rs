//! # Connection Session
//!
//! Everything that happens on one WebSocket connection, without any knowledge
//! of actix. The transport hands raw frames to `receive` and supplies an
//! `Outbox` that the session writes replies into; the WebSocket actor forwards
//! that outbox to its mailbox, tests collect it into a `Vec`.
//!
//! ## Request Flow:
//! 1. Decode the frame (undecodable frames are dropped, the session goes on)
//! 2. Route by type tag
//! 3. A spectrogram handler resolves its audio, streams `loading_progress`
//!    while computing and finishes with one binary `spectrogram` message
//! 4. A failed request is answered with an `error` text message
//!
//! Requests on one session are processed one at a time, in arrival order.

use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::audio::{resolve_media_path, AudioDecoder, AudioSource};
use crate::config::AppConfig;
use crate::error::RequestError;
use crate::observer::SessionObserver;
use crate::protocol::messages::{
    kinds, parse_content, AnalysisOptions, ErrorReport, FileSpectrogramRequest, LoadingProgress,
    SpectrogramMetadata,
};
use crate::protocol::{encode_binary, encode_text, Frame, Message, ProtocolError, WireFrame};
use crate::router::{MessageHandler, MessageRouter};
use crate::spectrogram::{
    AnalysisParams, ProgressSink, SpectrogramEngine, SpectrogramError, DEFAULT_FFT_LENGTH,
    DEFAULT_MAX_FFT_LENGTH, DEFAULT_MAX_RESULT_BYTES, DEFAULT_OVERLAP_FRACTION,
    DEFAULT_PROGRESS_INTERVAL,
};

/// Destination for outbound frames.
pub trait Outbox: Send {
    fn send(&mut self, frame: WireFrame);
}

impl Outbox for Vec<WireFrame> {
    fn send(&mut self, frame: WireFrame) {
        self.push(frame);
    }
}

/// What a handler gets to answer with.
pub struct Responder<'a> {
    connection_id: &'a str,
    outbox: &'a mut dyn Outbox,
    cancelled: &'a AtomicBool,
}

impl<'a> Responder<'a> {
    pub fn new(connection_id: &'a str, outbox: &'a mut dyn Outbox, cancelled: &'a AtomicBool) -> Self {
        Self {
            connection_id,
            outbox,
            cancelled,
        }
    }

    pub fn connection_id(&self) -> &'a str {
        self.connection_id
    }

    pub fn send_text(&mut self, kind: &str, content: Value) {
        self.outbox.send(encode_text(kind, content));
    }

    pub fn send_binary(&mut self, kind: &str, content: Value, payload: &[u8]) -> Result<(), ProtocolError> {
        self.outbox.send(encode_binary(kind, content, payload)?);
        Ok(())
    }

    /// True once the connection has been closed.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Analysis defaults and limits applied to every request on a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub default_fft_length: usize,
    pub default_overlap_fraction: f64,
    pub max_fft_length: usize,
    pub progress_interval: usize,
    /// Upper bound on the magnitude matrix of one request
    pub max_result_bytes: usize,
    /// When set, file requests are resolved inside this directory
    pub media_root: Option<PathBuf>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            default_fft_length: DEFAULT_FFT_LENGTH,
            default_overlap_fraction: DEFAULT_OVERLAP_FRACTION,
            max_fft_length: DEFAULT_MAX_FFT_LENGTH,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            media_root: None,
        }
    }
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_fft_length: config.spectrogram.default_fft_length,
            default_overlap_fraction: config.spectrogram.default_overlap_fraction,
            max_fft_length: config.spectrogram.max_fft_length,
            progress_interval: config.spectrogram.progress_interval,
            max_result_bytes: config.spectrogram.max_result_bytes,
            media_root: config.media_root(),
        }
    }

    /// Fill in defaults for missing options and validate the result.
    pub fn resolve(&self, options: &AnalysisOptions) -> Result<AnalysisParams, SpectrogramError> {
        let fft_length = match options.fft_length {
            None => self.default_fft_length,
            Some(requested) => usize::try_from(requested).map_err(|_| {
                SpectrogramError::InvalidParameters(format!(
                    "fftLength must be positive, got {}",
                    requested
                ))
            })?,
        };
        let overlap_fraction = options
            .overlap_fraction
            .unwrap_or(self.default_overlap_fraction);

        let params = AnalysisParams::new(fft_length, overlap_fraction);
        params.validate(self.max_fft_length)?;
        Ok(params)
    }
}

/// State for one connection: its router, its observer and its cancel flag.
pub struct ConnectionSession {
    id: String,
    router: MessageRouter,
    observer: Arc<dyn SessionObserver>,
    cancelled: Arc<AtomicBool>,
}

impl ConnectionSession {
    /// Create a session with both spectrogram request types registered.
    pub fn new(
        id: impl Into<String>,
        settings: SessionSettings,
        decoder: Arc<dyn AudioDecoder>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let settings = Arc::new(settings);
        let mut router = MessageRouter::with_default_fallback(observer.clone());

        for (kind, request) in [
            (kinds::REQUEST_FILE_SPECTROGRAM, SpectrogramRequestKind::File),
            (kinds::REQUEST_DATA_SPECTROGRAM, SpectrogramRequestKind::Data),
        ] {
            let handler = SpectrogramHandler::new(
                request,
                settings.clone(),
                decoder.clone(),
                observer.clone(),
            );
            router.register(kind, Arc::new(handler));
        }

        Self {
            id: id.into(),
            router,
            observer,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Flag shared with running computations; set by `close`.
    pub fn cancellation(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Greet the client.
    pub fn open(&self, outbox: &mut dyn Outbox) {
        self.observer.connection_opened(&self.id);
        outbox.send(encode_text(kinds::STATUS, json!("Server started")));
    }

    /// Decode, route and answer one inbound frame.
    pub fn receive(&self, wire: WireFrame, outbox: &mut dyn Outbox) {
        let message = match Frame::decode(&wire) {
            Ok(frame) => frame.into_message(),
            Err(error) => {
                self.observer.frame_dropped(&self.id, &error);
                return;
            }
        };

        let kind = message.kind.clone();
        let mut responder = Responder::new(&self.id, outbox, &self.cancelled);
        if let Err(error) = self.router.dispatch(message, &mut responder) {
            self.observer.request_failed(&self.id, &kind, &error);
            if error.is_reportable() {
                let report = ErrorReport {
                    code: error.code().to_string(),
                    message: error.to_string(),
                    request: kind,
                };
                responder.send_text(kinds::ERROR, report.to_content());
            }
        }
    }

    /// Stop any running computation. Safe to call more than once.
    pub fn close(&self) {
        if !self.cancelled.swap(true, Ordering::Relaxed) {
            self.observer.connection_closed(&self.id);
        }
    }
}

/// How a spectrogram request carries its audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectrogramRequestKind {
    /// `content.source` names a file on the server
    File,
    /// The audio file is the binary payload
    Data,
}

/// Serves `request_file_spectrogram` and `request_data_spectrogram`.
pub struct SpectrogramHandler {
    request: SpectrogramRequestKind,
    settings: Arc<SessionSettings>,
    decoder: Arc<dyn AudioDecoder>,
    observer: Arc<dyn SessionObserver>,
}

impl SpectrogramHandler {
    pub fn new(
        request: SpectrogramRequestKind,
        settings: Arc<SessionSettings>,
        decoder: Arc<dyn AudioDecoder>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            request,
            settings,
            decoder,
            observer,
        }
    }

    fn source_and_options(
        &self,
        content: Value,
        payload: Option<Vec<u8>>,
    ) -> Result<(AudioSource, AnalysisOptions), RequestError> {
        match self.request {
            SpectrogramRequestKind::File => {
                let request: FileSpectrogramRequest = parse_content(content)?;
                let path = resolve_media_path(self.settings.media_root.as_deref(), &request.source)?;
                Ok((AudioSource::Path(path), request.options()))
            }
            SpectrogramRequestKind::Data => {
                let options: AnalysisOptions = parse_content(content)?;
                let bytes = payload.ok_or(RequestError::MissingPayload)?;
                Ok((AudioSource::Bytes(bytes), options))
            }
        }
    }
}

impl MessageHandler for SpectrogramHandler {
    fn handle(&self, message: Message, responder: &mut Responder<'_>) -> Result<(), RequestError> {
        let Message {
            kind,
            content,
            payload,
        } = message;

        let (source, options) = self.source_and_options(content, payload)?;
        let params = self.settings.resolve(&options)?;
        self.observer
            .request_started(responder.connection_id(), &kind, &source.describe());

        let started = Instant::now();
        let audio = source.decode(self.decoder.as_ref())?;
        let samples = audio.to_mono();

        // FftPlanner is not Send, so each request plans its own transforms.
        let mut engine =
            SpectrogramEngine::new(self.settings.max_fft_length, self.settings.progress_interval)
                .with_max_result_bytes(self.settings.max_result_bytes);
        let result = {
            let mut progress = ProgressForwarder {
                responder: &mut *responder,
            };
            engine.analyze(&samples, audio.sample_rate, params, &mut progress)?
        };

        let metadata = SpectrogramMetadata {
            extent: result.extent(),
            sample_rate: result.sample_rate,
            duration_seconds: result.duration_seconds,
        };
        responder.send_binary(kinds::SPECTROGRAM, metadata.to_content(), &result.to_native_bytes())?;

        self.observer
            .spectrogram_delivered(responder.connection_id(), result.extent(), started.elapsed());
        Ok(())
    }
}

/// Turns engine progress into `loading_progress` messages.
struct ProgressForwarder<'r, 'a> {
    responder: &'r mut Responder<'a>,
}

impl ProgressSink for ProgressForwarder<'_, '_> {
    fn on_progress(&mut self, fraction: f32) {
        let progress = LoadingProgress { progress: fraction };
        self.responder
            .send_text(kinds::LOADING_PROGRESS, progress.to_content());
    }

    fn is_cancelled(&self) -> bool {
        self.responder.is_cancelled()
    }
}
