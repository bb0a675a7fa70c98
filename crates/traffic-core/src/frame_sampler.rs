use crate::media::VideoSource;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ImageError, Rgb, RgbImage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use traffic_native_utils::audio::to_base64;

const MIN_INTERVAL: Duration = Duration::from_millis(10);
const MAX_INTERVAL: Duration = Duration::from_secs(60);

/// A guide burned into every sampled frame so the model counts vehicles
/// crossing a fixed region.
#[derive(Debug, Clone, PartialEq)]
pub enum GuideOverlay {
    Line {
        y_fraction: f32,
        thickness: u32,
        color: Rgb<u8>,
    },
    Band {
        top_fraction: f32,
        bottom_fraction: f32,
        color: Rgb<u8>,
        alpha: f32,
    },
}

impl Default for GuideOverlay {
    fn default() -> Self {
        GuideOverlay::Line {
            y_fraction: 0.6,
            thickness: 4,
            color: Rgb([255, 0, 0]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameSamplerConfig {
    pub fps: f32,
    pub width: u32,
    /// JPEG quality, 1..=100.
    pub quality: u8,
    pub overlay: Option<GuideOverlay>,
}

impl Default for FrameSamplerConfig {
    fn default() -> Self {
        Self {
            fps: 1.0,
            width: 640,
            quality: 60,
            overlay: Some(GuideOverlay::default()),
        }
    }
}

impl FrameSamplerConfig {
    /// Tick period, clamped to 10 ms..=60 s. Non-positive or non-finite
    /// rates fall back to one frame per second.
    pub fn interval(&self) -> Duration {
        let fps = if self.fps.is_finite() && self.fps > 0.0 {
            f64::from(self.fps)
        } else {
            1.0
        };
        Duration::try_from_secs_f64(1.0 / fps)
            .unwrap_or(MAX_INTERVAL)
            .clamp(MIN_INTERVAL, MAX_INTERVAL)
    }
}

/// Output height that keeps the source aspect ratio, at least 1.
pub fn scaled_height(src_width: u32, src_height: u32, width: u32) -> u32 {
    if src_width == 0 {
        return 1;
    }
    let height = (u64::from(src_height) * u64::from(width) / u64::from(src_width)) as u32;
    height.max(1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub width: u32,
    pub height: u32,
    /// Base64 of the JPEG bytes.
    pub data: String,
}

pub fn render_frame(frame: &RgbImage, config: &FrameSamplerConfig) -> Result<EncodedFrame, ImageError> {
    let width = config.width.max(1);
    let height = scaled_height(frame.width(), frame.height(), width);
    let mut scaled = imageops::resize(frame, width, height, FilterType::Triangle);
    if let Some(overlay) = &config.overlay {
        draw_overlay(&mut scaled, overlay);
    }

    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, config.quality.clamp(1, 100));
    encoder.encode_image(&scaled)?;

    Ok(EncodedFrame {
        width,
        height,
        data: to_base64(&jpeg),
    })
}

pub fn draw_overlay(image: &mut RgbImage, overlay: &GuideOverlay) {
    let height = image.height();
    if height == 0 {
        return;
    }
    let row = |fraction: f32| ((fraction.clamp(0.0, 1.0) * height as f32) as u32).min(height - 1);

    match overlay {
        GuideOverlay::Line {
            y_fraction,
            thickness,
            color,
        } => {
            let center = row(*y_fraction);
            let half = thickness / 2;
            let top = center.saturating_sub(half);
            let bottom = (top + (*thickness).max(1)).min(height);
            for y in top..bottom {
                for x in 0..image.width() {
                    image.put_pixel(x, y, *color);
                }
            }
        }
        GuideOverlay::Band {
            top_fraction,
            bottom_fraction,
            color,
            alpha,
        } => {
            let (top, bottom) = (row(*top_fraction), row(*bottom_fraction));
            let alpha = alpha.clamp(0.0, 1.0);
            for y in top.min(bottom)..=top.max(bottom) {
                for x in 0..image.width() {
                    let pixel = image.get_pixel_mut(x, y);
                    for c in 0..3 {
                        let blended =
                            f32::from(pixel[c]) * (1.0 - alpha) + f32::from(color[c]) * alpha;
                        pixel[c] = blended.round() as u8;
                    }
                }
            }
        }
    }
}

/// Periodically samples a [`VideoSource`] and hands encoded stills to a sink.
///
/// Restarting cancels the previous timer; a tick that was already running
/// when [`FrameSampler::stop`] was called never reaches the sink.
pub struct FrameSampler {
    config: FrameSamplerConfig,
    epoch: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl FrameSampler {
    pub fn new(config: FrameSamplerConfig) -> Self {
        Self {
            config,
            epoch: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    pub fn config(&self) -> &FrameSamplerConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn start<F>(&mut self, source: Arc<dyn VideoSource>, sink: F)
    where
        F: Fn(EncodedFrame) + Send + Sync + 'static,
    {
        self.stop();
        let epoch = self.epoch.clone();
        let mine = epoch.load(Ordering::SeqCst);
        let config = Arc::new(self.config.clone());

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if epoch.load(Ordering::SeqCst) != mine {
                    break;
                }
                if !source.is_ready() {
                    tracing::trace!("video source not ready, skipping tick");
                    continue;
                }
                let Some(frame) = source.grab_frame() else {
                    continue;
                };
                let job_config = config.clone();
                let rendered =
                    tokio::task::spawn_blocking(move || render_frame(&frame, &job_config)).await;
                match rendered {
                    Ok(Ok(encoded)) => {
                        if epoch.load(Ordering::SeqCst) != mine {
                            break;
                        }
                        sink(encoded);
                    }
                    Ok(Err(e)) => tracing::warn!("failed to encode frame: {}", e),
                    Err(e) => tracing::warn!("frame encoder task failed: {}", e),
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.stop();
    }
}
