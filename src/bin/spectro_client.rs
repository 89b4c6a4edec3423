//! Command-line client for the spectrogram WebSocket.
//!
//! ```text
//! spectro-client speech.wav --fft-length 2048
//! spectro-client ./local.wav --upload --url ws://host:8888/spectrogram
//! ```

use anyhow::{bail, Context, Result};
use byteorder::{ByteOrder, NativeEndian};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use spectro_stream::protocol::messages::{
    kinds, AnalysisOptions, ErrorReport, FileSpectrogramRequest, LoadingProgress,
    SpectrogramMetadata,
};
use spectro_stream::protocol::{encode_binary, encode_text, Frame, WireFrame};
use std::io::Write;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(name = "spectro-client", version, about = "Request a spectrogram from a spectro-stream server")]
struct Args {
    /// Audio file; a path on the server unless --upload is given
    file: String,

    /// WebSocket URL of the server
    #[arg(long, default_value = "ws://127.0.0.1:8888/spectrogram")]
    url: String,

    /// FFT block length in samples (server default when omitted)
    #[arg(long)]
    fft_length: Option<i64>,

    /// Block shift as a fraction of the block length
    #[arg(long)]
    overlap: Option<f64>,

    /// Read the file locally and send its bytes with the request
    #[arg(long)]
    upload: bool,
}

impl Args {
    fn request(&self) -> Result<WireFrame> {
        if self.upload {
            let bytes = std::fs::read(&self.file)
                .with_context(|| format!("failed to read {}", self.file))?;
            let options = AnalysisOptions {
                fft_length: self.fft_length,
                overlap_fraction: self.overlap,
            };
            Ok(encode_binary(
                kinds::REQUEST_DATA_SPECTROGRAM,
                serde_json::to_value(options)?,
                &bytes,
            )?)
        } else {
            let request = FileSpectrogramRequest {
                source: self.file.clone(),
                fft_length: self.fft_length,
                overlap_fraction: self.overlap,
            };
            Ok(encode_text(
                kinds::REQUEST_FILE_SPECTROGRAM,
                serde_json::to_value(request)?,
            ))
        }
    }
}

fn into_ws(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text),
        WireFrame::Binary(bytes) => Message::Binary(bytes),
    }
}

/// Print the shape and the strongest frequency of a received spectrogram.
fn report_spectrogram(metadata: &SpectrogramMetadata, payload: &[u8]) -> Result<()> {
    let [rows, cols] = metadata.extent;
    let expected = rows * cols * std::mem::size_of::<f32>();
    if payload.len() != expected {
        bail!(
            "payload is {} bytes, expected {} for a {}x{} matrix",
            payload.len(),
            expected,
            rows,
            cols
        );
    }

    let mut magnitudes = vec![0f32; rows * cols];
    NativeEndian::read_f32_into(payload, &mut magnitudes);

    println!(
        "spectrogram: {} blocks x {} bins, {} Hz, {:.3} s",
        rows, cols, metadata.sample_rate, metadata.duration_seconds
    );

    if let Some((index, peak)) = magnitudes
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
    {
        let bin = index % cols;
        // cols = N/2 + 1, so bin spacing is sample_rate / N
        let fft_length = (cols - 1) * 2;
        let frequency = bin as f64 * metadata.sample_rate as f64 / fft_length.max(1) as f64;
        println!(
            "peak: {:.4} at block {}, bin {} (~{:.1} Hz)",
            peak,
            index / cols,
            bin,
            frequency
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();
    let request = args.request()?;

    let (mut socket, _) = connect_async(args.url.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", args.url))?;
    debug!(url = %args.url, "Connected");

    socket.send(into_ws(request)).await?;

    while let Some(message) = socket.next().await {
        let wire = match message? {
            Message::Text(text) => WireFrame::Text(text),
            Message::Binary(bytes) => WireFrame::Binary(bytes),
            Message::Close(frame) => {
                debug!(?frame, "Server closed the connection");
                break;
            }
            _ => continue,
        };

        let frame = match Frame::decode(&wire) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "Ignoring undecodable frame");
                continue;
            }
        };
        let header = frame.header();

        match header.kind.as_str() {
            kinds::STATUS => println!("status: {}", header.content),
            kinds::LOADING_PROGRESS => {
                let progress: LoadingProgress = serde_json::from_value(header.content.clone())?;
                print!("\rprogress: {:5.1}%", progress.progress * 100.0);
                std::io::stdout().flush()?;
            }
            kinds::SPECTROGRAM => {
                println!();
                let metadata: SpectrogramMetadata = serde_json::from_value(header.content.clone())?;
                report_spectrogram(&metadata, frame.payload().unwrap_or_default())?;
                socket.close(None).await?;
                return Ok(());
            }
            kinds::ERROR => {
                println!();
                let report: ErrorReport = serde_json::from_value(header.content.clone())?;
                bail!("{} failed ({}): {}", report.request, report.code, report.message);
            }
            other => println!("{}: {}", other, header.content),
        }
    }

    bail!("connection closed before a spectrogram arrived")
}
