//! Real-time audio renderer.
//!
//! This module owns the hardware output stream and the PCM buffer queue
//! between the decode side and the audio thread.
//!
//! # Device Management
//!
//! The audio device is handled in three phases:
//! 1. Selection during construction (`new()`)
//! 2. Opening on demand (`start()`)
//! 3. Closing when done (`stop()`)
//!
//! This design prevents ALSA from acquiring the device until it's
//! actually needed.
//!
//! # Render callback contract
//!
//! The callback runs on the OS audio thread and must not block on I/O:
//! 1. Copy from queued buffers into the output slice (mutex window
//!    bounded to the head-buffer copy and offset bookkeeping)
//! 2. Zero-fill the remainder on underrun
//! 3. Run the effect chain in place (it may allocate internally on a
//!    rebuild; accepted and bounded)
//! 4. Run the equalizer in place
//! 5. Feed the spectrum analyzer (non-blocking accumulator)
//! 6. Invoke the raw-audio tap
//! 7. Smooth any step discontinuity and apply volume, then advance the
//!    audio clock by what was actually rendered
//!
//! All failure modes inside the callback degrade to emitting silence.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::{
    buffer::AudioBuffer,
    clock::SharedClock,
    config::Config,
    effects::EffectChain,
    equalizer::Equalizer,
    error::{Error, Result},
    spectrum::SpectrumFeed,
};

/// Stream format the renderer is started with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RenderFormat {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
}

/// Raw-audio tap invoked from the render callback.
///
/// Arguments: interleaved samples, channel count, sample rate.
pub type AudioTap = Box<dyn Fn(&[f32], usize, u32) + Send + Sync>;

/// Logarithmic volume scale factor for a dynamic range of 60 dB.
///
/// Equal to 10^(60/20) = 1000.0
const LOG_VOLUME_SCALE_FACTOR: f32 = 1000.0;

/// Logarithmic volume growth rate for a dynamic range of 60 dB.
///
/// Equal to ln(1000)
const LOG_VOLUME_GROWTH_RATE: f32 = 6.907_755_4;

/// Samples over which a step discontinuity is ramped out.
const SMOOTHING_RAMP: usize = 32;

/// Per-channel step size treated as a discontinuity.
const SMOOTHING_THRESHOLD: f32 = 0.3;

/// The buffer queue guarded by the renderer mutex.
///
/// Single producer (decode task), single consumer (audio thread). The
/// critical section covers only head-buffer copies and offset edits.
struct QueueState {
    buffers: VecDeque<AudioBuffer>,
    /// Samples of the head buffer already consumed.
    offset: usize,
    /// Total queued frames, maintained incrementally.
    queued_frames: usize,
}

impl QueueState {
    /// Copies queued samples into `out`, freeing consumed buffers.
    ///
    /// Returns the number of samples written; the caller zero-fills the
    /// rest.
    fn fill(&mut self, out: &mut [f32], channels: usize) -> usize {
        let mut written = 0;
        while written < out.len() {
            let Some(head) = self.buffers.front() else {
                break;
            };
            let samples = head.samples();
            let available = samples.len() - self.offset;
            let wanted = out.len() - written;
            let take = available.min(wanted);

            out[written..written + take]
                .copy_from_slice(&samples[self.offset..self.offset + take]);
            written += take;
            self.offset += take;
            self.queued_frames = self
                .queued_frames
                .saturating_sub(take / channels.max(1));

            if self.offset >= samples.len() {
                self.buffers.pop_front();
                self.offset = 0;
            }
        }
        written
    }
}

/// Tracks the last emitted frame to ramp out discontinuities.
struct EdgeSmoother {
    last_frame: Vec<f32>,
    primed: bool,
}

impl EdgeSmoother {
    fn new() -> Self {
        Self {
            last_frame: Vec::new(),
            primed: false,
        }
    }

    /// Ramps the start of `samples` from the previous frame when the
    /// boundary steps by more than the threshold on any channel.
    fn apply(&mut self, samples: &mut [f32], channels: usize) {
        if channels == 0 || samples.len() < channels {
            return;
        }
        if self.last_frame.len() != channels {
            self.last_frame = vec![0.0; channels];
            self.primed = false;
        }

        if self.primed {
            let step = (0..channels)
                .map(|ch| (samples[ch] - self.last_frame[ch]).abs())
                .fold(0.0f32, f32::max);
            if step > SMOOTHING_THRESHOLD {
                let frames = (samples.len() / channels).min(SMOOTHING_RAMP);
                for frame in 0..frames {
                    let t = (frame + 1) as f32 / (frames + 1) as f32;
                    for ch in 0..channels {
                        let index = frame * channels + ch;
                        samples[index] =
                            self.last_frame[ch] * (1.0 - t) + samples[index] * t;
                    }
                }
            }
        }

        let tail = samples.len() - channels;
        self.last_frame.copy_from_slice(&samples[tail..]);
        self.primed = true;
    }

    fn reset(&mut self) {
        self.primed = false;
    }
}

/// State shared with the audio thread.
struct RendererShared {
    queue: Mutex<QueueState>,
    smoother: Mutex<EdgeSmoother>,
    tap: Mutex<Option<AudioTap>>,
    /// User volume in [0, 1], stored as f32 bits.
    volume_bits: AtomicU32,
    effects: Arc<EffectChain>,
    equalizer: Arc<Equalizer>,
    spectrum: Arc<SpectrumFeed>,
    clock: SharedClock,
    max_queued_buffers: usize,
}

impl RendererShared {
    /// The full render-callback body, factored out of the closure so the
    /// sequencing is testable without a device.
    fn render(&self, out: &mut [f32], channels: usize, sample_rate: u32) {
        // Nothing may panic across the hardware boundary; a poisoned lock
        // degrades to silence.
        let Ok(mut queue) = self.queue.lock() else {
            out.fill(0.0);
            return;
        };

        // 1+2: drain the queue, zero-fill the remainder.
        let written = queue.fill(out, channels);
        drop(queue);
        if written < out.len() {
            out[written..].fill(0.0);
        }

        // 3: effect chain in place.
        self.effects.process(out, channels, sample_rate);

        // 4: equalizer in place.
        self.equalizer.process(out, channels, sample_rate);

        // 5: spectrum feed (ring accumulator, never blocks).
        self.spectrum.push(out, channels);

        // 6: raw tap.
        if let Ok(tap) = self.tap.lock() {
            if let Some(tap) = tap.as_ref() {
                tap(out, channels, sample_rate);
            }
        }

        // 7: artifact smoothing, volume, clock.
        if let Ok(mut smoother) = self.smoother.lock() {
            smoother.apply(out, channels);
        }

        let gain = volume_gain(f32::from_bits(self.volume_bits.load(Ordering::Relaxed)));
        if (gain - 1.0).abs() > f32::EPSILON {
            for sample in out.iter_mut() {
                *sample *= gain;
            }
        }

        if sample_rate > 0 && channels > 0 {
            self.clock
                .advance(out.len() as f64 / channels as f64 / f64::from(sample_rate));
        }
    }
}

/// Maps user volume in [0, 1] to a logarithmic gain over 60 dB.
fn volume_gain(volume: f32) -> f32 {
    let volume = volume.clamp(0.0, 1.0);
    if volume <= 0.0 {
        0.0
    } else if volume >= 1.0 {
        1.0
    } else {
        f32::exp(LOG_VOLUME_GROWTH_RATE * volume) / LOG_VOLUME_SCALE_FACTOR
    }
}

/// Commands for the stream control thread.
///
/// `cpal::Stream` is not `Send`, so the stream lives on a dedicated
/// control thread; the renderer talks to it over this channel.
enum StreamCommand {
    /// Build and start a stream for the format; ack on the channel.
    Start(RenderFormat, std::sync::mpsc::Sender<Result<()>>),
    /// Pause the hardware stream.
    Pause,
    /// Resume the hardware stream.
    Resume,
    /// Drop the stream (device closes).
    Close,
    /// Exit the control thread.
    Shutdown,
}

/// Real-time PCM renderer over a cpal output stream.
///
/// Decoded buffers are handed over with [`Renderer::try_enqueue`] and
/// freed by the audio thread once fully consumed. The device and stream
/// live on an internal control thread, which keeps the renderer handle
/// `Send + Sync` and shareable with the session task.
pub struct Renderer {
    shared: Arc<RendererShared>,
    /// Mutex-wrapped so the renderer handle stays `Sync`; contention is
    /// negligible (a handful of sends per session).
    control: Mutex<std::sync::mpsc::Sender<StreamCommand>>,
    control_thread: Option<std::thread::JoinHandle<()>>,
    hardware_rate: u32,
    format: Mutex<Option<RenderFormat>>,
}

impl Renderer {
    /// Selects the output device and spawns the stream control thread.
    ///
    /// # Arguments
    ///
    /// * `config` - player configuration (device spec, queue depth,
    ///   initial volume)
    /// * `effects`, `equalizer`, `spectrum` - DSP stages invoked from the
    ///   render callback
    /// * `clock` - the master audio clock advanced per callback
    ///
    /// # Errors
    ///
    /// Returns `ResourceAllocation` when the host or device in the device
    /// specification cannot be found.
    pub fn new(
        config: &Config,
        effects: Arc<EffectChain>,
        equalizer: Arc<Equalizer>,
        spectrum: Arc<SpectrumFeed>,
        clock: SharedClock,
    ) -> Result<Self> {
        let shared = Arc::new(RendererShared {
            queue: Mutex::new(QueueState {
                buffers: VecDeque::new(),
                offset: 0,
                queued_frames: 0,
            }),
            smoother: Mutex::new(EdgeSmoother::new()),
            tap: Mutex::new(None),
            volume_bits: AtomicU32::new(config.initial_volume.clamp(0.0, 1.0).to_bits()),
            effects,
            equalizer,
            spectrum,
            clock,
            max_queued_buffers: config.max_queued_buffers,
        });

        let (control, commands) = std::sync::mpsc::channel();
        let (init_tx, init_rx) = std::sync::mpsc::channel();
        let spec = config.device.clone();
        let thread_shared = Arc::clone(&shared);

        let control_thread = std::thread::Builder::new()
            .name("resona-audio".to_string())
            .spawn(move || control_loop(&spec, &thread_shared, &commands, &init_tx))
            .map_err(|e| Error::resource_allocation(e.to_string()))?;

        // The control thread reports the selected device's rate, or the
        // selection error.
        let hardware_rate = init_rx
            .recv()
            .map_err(|_| Error::resource_allocation("audio control thread died during init"))??;

        Ok(Self {
            shared,
            control: Mutex::new(control),
            control_thread: Some(control_thread),
            hardware_rate,
            format: Mutex::new(None),
        })
    }

    /// The hardware output sample rate the device will run at.
    ///
    /// Decoded audio must be resampled to this rate before enqueueing.
    #[must_use]
    pub fn hardware_sample_rate(&self) -> u32 {
        self.hardware_rate
    }

    /// Opens the output stream for the given format and starts playback.
    ///
    /// # Errors
    ///
    /// Returns `ResourceAllocation` if the stream cannot be built or
    /// started.
    pub fn start(&self, format: RenderFormat) -> Result<()> {
        let (ack_tx, ack_rx) = std::sync::mpsc::channel();
        self.control
            .lock()
            .unwrap()
            .send(StreamCommand::Start(format, ack_tx))
            .map_err(|_| Error::resource_allocation("audio control thread gone"))?;
        ack_rx
            .recv()
            .map_err(|_| Error::resource_allocation("audio control thread died"))??;

        *self.format.lock().unwrap() = Some(format);
        Ok(())
    }

    /// The format the renderer was started with.
    #[must_use]
    pub fn format(&self) -> Option<RenderFormat> {
        *self.format.lock().unwrap()
    }

    /// Hands a decoded buffer to the render queue.
    ///
    /// Returns the buffer back when the queue is at capacity
    /// (backpressure); the caller retries after the queue drains.
    pub fn try_enqueue(&self, buffer: AudioBuffer) -> std::result::Result<(), AudioBuffer> {
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.buffers.len() >= self.shared.max_queued_buffers {
            return Err(buffer);
        }
        queue.queued_frames += buffer.frame_count();
        queue.buffers.push_back(buffer);
        Ok(())
    }

    /// Total frames currently queued.
    #[must_use]
    pub fn queued_frames(&self) -> usize {
        self.shared.queue.lock().unwrap().queued_frames
    }

    /// Pauses the hardware stream without touching the queue.
    ///
    /// # Errors
    ///
    /// Returns an error when the control thread is gone.
    pub fn pause(&self) -> Result<()> {
        self.control
            .lock()
            .unwrap()
            .send(StreamCommand::Pause)
            .map_err(|_| Error::resource_allocation("audio control thread gone"))
    }

    /// Resumes a paused hardware stream.
    ///
    /// # Errors
    ///
    /// Returns an error when the control thread is gone.
    pub fn resume(&self) -> Result<()> {
        self.control
            .lock()
            .unwrap()
            .send(StreamCommand::Resume)
            .map_err(|_| Error::resource_allocation("audio control thread gone"))
    }

    /// Frees every queued buffer (seek); the consumer emits silence until
    /// new buffers arrive.
    pub fn flush_queue(&self) {
        let mut queue = self.shared.queue.lock().unwrap();
        queue.buffers.clear();
        queue.offset = 0;
        queue.queued_frames = 0;
        drop(queue);

        if let Ok(mut smoother) = self.shared.smoother.lock() {
            smoother.reset();
        }
    }

    /// Stops and closes the output stream, freeing queued buffers.
    pub fn stop(&self) {
        let _ = self.control.lock().unwrap().send(StreamCommand::Close);
        *self.format.lock().unwrap() = None;
        self.flush_queue();
    }

    /// Sets the user volume in [0, 1] (logarithmic taper).
    pub fn set_volume(&self, volume: f32) {
        self.shared
            .volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// The user volume in [0, 1].
    #[must_use]
    pub fn volume(&self) -> f32 {
        f32::from_bits(self.shared.volume_bits.load(Ordering::Relaxed))
    }

    /// Installs (or clears) the raw-audio tap.
    pub fn set_tap(&self, tap: Option<AudioTap>) {
        *self.shared.tap.lock().unwrap() = tap;
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Ok(control) = self.control.lock() {
            let _ = control.send(StreamCommand::Shutdown);
        }
        if let Some(thread) = self.control_thread.take() {
            let _ = thread.join();
        }
    }
}

/// Body of the stream control thread.
///
/// Owns the device and the (not `Send`) stream; reports device selection
/// over `init`, then serves commands until shutdown.
fn control_loop(
    spec: &str,
    shared: &Arc<RendererShared>,
    commands: &std::sync::mpsc::Receiver<StreamCommand>,
    init: &std::sync::mpsc::Sender<Result<u32>>,
) {
    let device = match get_device(spec) {
        Ok(device) => device,
        Err(e) => {
            let _ = init.send(Err(e));
            return;
        }
    };
    let hardware_rate = match device.default_output_config() {
        Ok(config) => config.sample_rate().0,
        Err(e) => {
            let _ = init.send(Err(e.into()));
            return;
        }
    };
    if init.send(Ok(hardware_rate)).is_err() {
        return;
    }

    let mut stream: Option<cpal::Stream> = None;
    while let Ok(command) = commands.recv() {
        match command {
            StreamCommand::Start(format, ack) => {
                stream = None;

                let channels = usize::from(format.channels);
                let sample_rate = format.sample_rate;
                let stream_config = cpal::StreamConfig {
                    channels: format.channels,
                    sample_rate: cpal::SampleRate(sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let callback_shared = Arc::clone(shared);
                let result = device
                    .build_output_stream(
                        &stream_config,
                        move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            callback_shared.render(out, channels, sample_rate);
                        },
                        |e| error!("audio stream error: {e}"),
                        None,
                    )
                    .map_err(Error::from)
                    .and_then(|new_stream| {
                        new_stream.play()?;
                        Ok(new_stream)
                    });

                let _ = match result {
                    Ok(new_stream) => {
                        info!(
                            "renderer started: {} Hz, {} channels",
                            format.sample_rate, format.channels
                        );
                        stream = Some(new_stream);
                        ack.send(Ok(()))
                    }
                    Err(e) => ack.send(Err(e)),
                };
            }
            StreamCommand::Pause => {
                if let Some(stream) = &stream {
                    if let Err(e) = stream.pause() {
                        error!("pause failed: {e}");
                    }
                }
            }
            StreamCommand::Resume => {
                if let Some(stream) = &stream {
                    if let Err(e) = stream.play() {
                        error!("resume failed: {e}");
                    }
                }
            }
            StreamCommand::Close => {
                stream = None;
            }
            StreamCommand::Shutdown => break,
        }
    }
}

/// Selects an audio output device from a specification string.
///
/// Format: `[<host>][|<device>]`, all parts optional and
/// case-insensitive; empty selects the system default output.
fn get_device(spec: &str) -> Result<cpal::Device> {
    let mut components = spec.split('|');

    let host = match components.next() {
        Some("") | None => cpal::default_host(),
        Some(name) => cpal::available_hosts()
            .into_iter()
            .find_map(|host_id| {
                let host = cpal::host_from_id(host_id).ok()?;
                host.id()
                    .name()
                    .eq_ignore_ascii_case(name)
                    .then_some(host)
            })
            .ok_or_else(|| Error::resource_allocation(format!("audio host {name} not found")))?,
    };

    match components.next() {
        Some("") | None => host.default_output_device().ok_or_else(|| {
            Error::resource_allocation(format!(
                "default audio output device not found on {}",
                host.id().name()
            ))
        }),
        Some(name) => {
            let mut devices = host.output_devices()?;
            devices
                .find(|device| device.name().is_ok_and(|n| n.eq_ignore_ascii_case(name)))
                .ok_or_else(|| {
                    Error::resource_allocation(format!(
                        "audio output device {name} not found on {}",
                        host.id().name()
                    ))
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(buffers: Vec<AudioBuffer>) -> QueueState {
        let queued_frames = buffers.iter().map(AudioBuffer::frame_count).sum();
        QueueState {
            buffers: buffers.into(),
            offset: 0,
            queued_frames,
        }
    }

    #[test]
    fn fill_preserves_fifo_order_across_buffers() {
        let a = AudioBuffer::from_interleaved(vec![1.0, 2.0, 3.0, 4.0], 2, 48_000);
        let b = AudioBuffer::from_interleaved(vec![5.0, 6.0], 2, 48_000);
        let mut queue = queue_with(vec![a, b]);

        let mut out = vec![0.0f32; 6];
        let written = queue.fill(&mut out, 2);
        assert_eq!(written, 6);
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(queue.buffers.is_empty());
        assert_eq!(queue.queued_frames, 0);
    }

    #[test]
    fn underrun_reports_partial_write() {
        let a = AudioBuffer::from_interleaved(vec![1.0, 2.0], 2, 48_000);
        let mut queue = queue_with(vec![a]);

        let mut out = vec![9.0f32; 8];
        let written = queue.fill(&mut out, 2);
        assert_eq!(written, 2);
        // The caller zero-fills; fill itself leaves the tail alone.
        assert_eq!(out[0], 1.0);
        assert_eq!(out[1], 2.0);
    }

    #[test]
    fn partial_consumption_resumes_mid_buffer() {
        let a = AudioBuffer::from_interleaved(vec![1.0, 2.0, 3.0, 4.0], 1, 48_000);
        let mut queue = queue_with(vec![a]);

        let mut out = vec![0.0f32; 2];
        queue.fill(&mut out, 1);
        assert_eq!(out, vec![1.0, 2.0]);

        let mut out = vec![0.0f32; 2];
        queue.fill(&mut out, 1);
        assert_eq!(out, vec![3.0, 4.0]);
    }

    #[test]
    fn smoother_ramps_large_steps() {
        let mut smoother = EdgeSmoother::new();

        // Prime with a block ending at 0.9.
        let mut first = vec![0.9f32; 64];
        smoother.apply(&mut first, 1);

        // Next block steps to -0.9: must be ramped.
        let mut second = vec![-0.9f32; 64];
        smoother.apply(&mut second, 1);
        assert!(second[0] > -0.5, "first sample must be pulled up, got {}", second[0]);
        for pair in second[..SMOOTHING_RAMP].windows(2) {
            assert!((pair[1] - pair[0]).abs() < 0.3);
        }
        // Past the ramp the signal is untouched.
        assert_eq!(second[SMOOTHING_RAMP + 1], -0.9);
    }

    #[test]
    fn smoother_leaves_continuous_audio_alone() {
        let mut smoother = EdgeSmoother::new();
        let mut first = vec![0.1f32; 16];
        smoother.apply(&mut first, 2);

        let mut second = vec![0.15f32; 16];
        smoother.apply(&mut second, 2);
        assert!(second.iter().all(|s| (*s - 0.15).abs() < 1e-6));
    }

    #[test]
    fn volume_taper_is_logarithmic() {
        assert_eq!(volume_gain(0.0), 0.0);
        assert!((volume_gain(1.0) - 1.0).abs() < 1e-6);
        // Half volume sits at -30 dB for a 60 dB range.
        let half = volume_gain(0.5);
        assert!((20.0 * half.log10() + 30.0).abs() < 0.5, "got {half}");
    }
}
