//! The playback session task.
//!
//! One task per session, spawned by [`Player::play`](crate::player::Player::play):
//!
//! 1. Open and probe the stream, under the connect wall-clock budget
//! 2. Publish the probe result and duration, start the renderer at the
//!    hardware sample rate
//! 3. Run the demux/decode loop: decode packets, resample to the
//!    hardware rate, enqueue with backpressure
//! 4. Service seeks, the A-B loop and cancellation between blocks
//!
//! The decode loop runs on a blocking thread (it may block on I/O); the
//! async wrapper only supervises it. Failure policy follows the error
//! taxonomy: transient decode errors are absorbed, read failures retry
//! up to the configured budget, everything else surfaces through the
//! state machine.

use std::{
    sync::{mpsc::Receiver, Arc, Mutex},
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

use crate::{
    buffer::AudioBuffer,
    clock::AvClock,
    config::Config,
    decoder::Decoder,
    effects::EffectChain,
    error::{Error, ErrorKind, Result},
    events::{EventHub, PlayerEvent},
    player::PlaybackState,
    renderer::{RenderFormat, Renderer},
    resample::RateConverter,
    source::MediaInput,
    stream_info::StreamInfo,
};

/// Commands the player sends to a running session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SessionCommand {
    /// Seek to an absolute position.
    Seek(Duration),
    /// No-op used to wake the loop (e.g. around cancellation).
    Wake,
}

/// Everything a session task needs, bundled at spawn time.
pub struct SessionContext {
    /// The URL being played.
    pub url: String,
    /// Player configuration snapshot.
    pub config: Config,
    /// State machine and event fan-out.
    pub hub: Arc<EventHub>,
    /// The shared renderer.
    pub renderer: Arc<Renderer>,
    /// The effect chain (reset on seek).
    pub effects: Arc<EffectChain>,
    /// Session clocks; audio is master.
    pub clock: AvClock,
    /// Active A-B loop bounds, if any.
    pub ab_loop: Arc<Mutex<Option<(f64, f64)>>>,
    /// Slot for the probe result.
    pub stream_info: Arc<Mutex<Option<StreamInfo>>>,
    /// Session cancellation.
    pub cancel: CancellationToken,
}

/// Sleep between enqueue retries while the render queue is full.
const BACKPRESSURE_SLEEP: Duration = Duration::from_millis(10);

/// Sleep before retrying after a transient read failure.
const READ_RETRY_SLEEP: Duration = Duration::from_millis(50);

/// Entry point of the session task.
///
/// Never returns an error to the spawner; failures drive the state
/// machine instead.
pub async fn run(context: SessionContext, commands: Receiver<SessionCommand>) {
    let connect_budget = context.config.connect_timeout;

    // Phase 1: open + probe under one wall-clock budget.
    let setup = tokio::time::timeout(connect_budget, connect(&context)).await;
    let decoder = match setup {
        Ok(Ok(decoder)) => decoder,
        Ok(Err(e)) => {
            error!("session setup failed for {}: {e}", context.url);
            context.hub.set_state(PlaybackState::Error(e.kind));
            return;
        }
        Err(_) => {
            error!("connection timed out after {connect_budget:?} for {}", context.url);
            context
                .hub
                .set_state(PlaybackState::Error(ErrorKind::ConnectionTimeout));
            return;
        }
    };

    if context.cancel.is_cancelled() {
        return;
    }

    // Phase 2+3: the decode loop owns the decoder on a blocking thread.
    let hub = Arc::clone(&context.hub);
    let outcome = tokio::task::spawn_blocking(move || decode_loop(context, decoder, &commands))
        .await
        .unwrap_or_else(|e| Err(Error::internal(e.to_string())));

    if let Err(e) = outcome {
        error!("session failed: {e}");
        // Failures that escaped the loop's own policy handling (resampler
        // construction, renderer start) still drive the state machine.
        if !matches!(
            hub.state(),
            PlaybackState::Error(_) | PlaybackState::Stopped
        ) {
            hub.set_state(PlaybackState::Error(e.kind));
        }
    }
}

/// Opens the input and probes the stream.
async fn connect(context: &SessionContext) -> Result<Decoder> {
    let input = MediaInput::open(&context.url, &context.config).await?;
    let url = context.url.clone();
    let config = context.config.clone();

    // Probing reads from the stream and may block.
    let decoder = tokio::task::spawn_blocking(move || Decoder::new(input, &url, &config))
        .await
        .map_err(|e| Error::internal(e.to_string()))??;

    let info = decoder.stream_info().clone();
    if let Some(duration) = info.duration {
        context.hub.emit(PlayerEvent::DurationUpdated {
            seconds: duration.as_secs_f64(),
        });
    }
    *context.stream_info.lock().unwrap() = Some(info);

    Ok(decoder)
}

/// The demux/decode/enqueue loop.
///
/// Runs until end of stream, cancellation, or an unrecoverable error.
fn decode_loop(
    context: SessionContext,
    mut decoder: Decoder,
    commands: &Receiver<SessionCommand>,
) -> Result<()> {
    let channels = usize::from(decoder.channels().max(1));

    // The sink runs at the hardware rate; decoded audio is converted on
    // this side of the queue.
    let hardware_rate = context.renderer.hardware_sample_rate();
    context.renderer.start(RenderFormat {
        sample_rate: hardware_rate,
        channels: decoder.channels().max(1),
    })?;
    let mut converter = RateConverter::new(decoder.sample_rate(), hardware_rate, channels)?;

    context.hub.set_state(PlaybackState::Playing);
    let started = Instant::now();
    let mut produced_any_frames = false;
    let mut consecutive_read_failures = 0u32;

    let fail = |kind: ErrorKind, error: Error| {
        context.renderer.stop();
        context.hub.set_state(PlaybackState::Error(kind));
        Err(error)
    };

    loop {
        if context.cancel.is_cancelled() {
            context.renderer.stop();
            return Ok(());
        }

        // Player commands.
        while let Ok(command) = commands.try_recv() {
            match command {
                SessionCommand::Seek(position) => {
                    seek(&context, &mut decoder, &mut converter, position, hardware_rate, channels)?;
                }
                SessionCommand::Wake => {}
            }
        }

        // A-B loop: crossing B issues an internal seek to A.
        let loop_target = {
            let ab = context.ab_loop.lock().unwrap();
            ab.and_then(|(a, b)| (context.clock.audio().seconds() >= b).then_some(a))
        };
        if let Some(a) = loop_target {
            seek(
                &context,
                &mut decoder,
                &mut converter,
                Duration::from_secs_f64(a),
                hardware_rate,
                channels,
            )?;
        }

        match decoder.next_buffer() {
            Ok(Some(buffer)) => {
                consecutive_read_failures = 0;
                produced_any_frames = true;

                if let Some(converted) = converter.process(buffer)? {
                    enqueue(&context, converted, commands, &mut decoder, &mut converter, hardware_rate, channels)?;
                }
            }

            Ok(None) => {
                // End of stream: drain the converter, then the queue.
                if let Some(tail) = converter.finish()? {
                    enqueue(&context, tail, commands, &mut decoder, &mut converter, hardware_rate, channels)?;
                }
                while context.renderer.queued_frames() > 0 {
                    if context.cancel.is_cancelled() {
                        context.renderer.stop();
                        return Ok(());
                    }
                    std::thread::sleep(BACKPRESSURE_SLEEP);
                }

                info!("end of stream: {}", context.url);
                context.hub.emit(PlayerEvent::TrackEnded);
                context.renderer.stop();
                context.hub.set_state(PlaybackState::Stopped);
                return Ok(());
            }

            Err(e) => match e.kind {
                // Transient decode errors are absorbed unless the stream
                // produced nothing for the whole stall window.
                ErrorKind::Decoding => {
                    warn!("decode error absorbed: {e}");
                    if !produced_any_frames
                        && started.elapsed() >= context.config.decode_stall_window
                    {
                        return fail(ErrorKind::Decoding, e);
                    }
                }

                // Network loss retries up to the configured budget.
                ErrorKind::NetworkDisconnected | ErrorKind::Io => {
                    consecutive_read_failures += 1;
                    warn!(
                        "read failure {consecutive_read_failures}/{}: {e}",
                        context.config.read_retries
                    );
                    if consecutive_read_failures >= context.config.read_retries {
                        return fail(ErrorKind::NetworkDisconnected, e);
                    }
                    std::thread::sleep(READ_RETRY_SLEEP);
                }

                kind => return fail(kind, e),
            },
        }
    }
}

/// Hands one converted buffer to the renderer, honoring backpressure.
fn enqueue(
    context: &SessionContext,
    buffer: AudioBuffer,
    commands: &Receiver<SessionCommand>,
    decoder: &mut Decoder,
    converter: &mut RateConverter,
    hardware_rate: u32,
    channels: usize,
) -> Result<()> {
    let mut pending = buffer;
    loop {
        if context.cancel.is_cancelled() {
            return Ok(());
        }

        // Seeks must preempt a full queue, or a paused renderer would
        // deadlock the loop here.
        if let Ok(SessionCommand::Seek(position)) = commands.try_recv() {
            seek(context, decoder, converter, position, hardware_rate, channels)?;
            return Ok(());
        }

        match context.renderer.try_enqueue(pending) {
            Ok(()) => return Ok(()),
            Err(returned) => {
                pending = returned;
            }
        }
        std::thread::sleep(BACKPRESSURE_SLEEP);
    }
}

/// Flushes the render path and moves the demuxer.
fn seek(
    context: &SessionContext,
    decoder: &mut Decoder,
    converter: &mut RateConverter,
    position: Duration,
    hardware_rate: u32,
    channels: usize,
) -> Result<()> {
    context.renderer.flush_queue();
    context.effects.reset_runtime();

    let landed = match decoder.seek(position) {
        Ok(landed) => landed,
        Err(e) => {
            // A failed seek (live stream, out of range) keeps playing
            // from the current position.
            warn!("seek to {position:?} failed: {e}");
            return Ok(());
        }
    };

    // Stale converter state would bleed pre-seek samples into the new
    // position.
    *converter = RateConverter::new(decoder.sample_rate(), hardware_rate, channels)?;

    context.clock.set(landed.as_secs_f64());
    debug!("seeked to {landed:?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ab_loop_trigger_logic() {
        // The loop fires exactly when the clock reaches B.
        let ab = Some((5.0f64, 10.0f64));
        let target_at = |clock: f64| ab.and_then(|(a, b)| (clock >= b).then_some(a));

        assert_eq!(target_at(4.0), None);
        assert_eq!(target_at(9.99), None);
        assert_eq!(target_at(10.0), Some(5.0));
        assert_eq!(target_at(12.0), Some(5.0));
    }

    #[test]
    fn commands_are_copyable_and_comparable() {
        let seek = SessionCommand::Seek(Duration::from_secs(3));
        assert_eq!(seek, SessionCommand::Seek(Duration::from_secs(3)));
        assert_ne!(seek, SessionCommand::Wake);
    }
}
