//! Network quality classification from transport statistics.

use serde::{Deserialize, Serialize};

/// Quality reduction the transport reports it is applying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    #[default]
    None,
    Minor,
    Severe,
}

/// One snapshot of transport metrics. Bitrates are kbps.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSample {
    pub rtt_ms: u32,
    pub audio_send_bitrate: u32,
    pub audio_recv_bitrate: u32,
    pub video_send_bitrate: u32,
    pub video_recv_bitrate: u32,
    pub video_send_frame_rate: f32,
    pub video_recv_frame_rate: f32,
    pub send_resolution: Option<String>,
    pub recv_resolution: Option<String>,
    pub degradation: Degradation,
}

/// Tiers ordered worst to best; `Unknown` sorts first and means "no sample".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QualityTier {
    Unknown,
    VeryPoor,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityTier {
    /// Gauge fill percentage.
    pub fn percentage(&self) -> u8 {
        match self {
            QualityTier::Excellent => 100,
            QualityTier::Good => 80,
            QualityTier::Fair => 60,
            QualityTier::Poor => 40,
            QualityTier::VeryPoor => 20,
            QualityTier::Unknown => 50,
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            QualityTier::Excellent => "#22c55e",
            QualityTier::Good => "#84cc16",
            QualityTier::Fair => "#eab308",
            QualityTier::Poor => "#f97316",
            QualityTier::VeryPoor => "#ef4444",
            QualityTier::Unknown => "#9ca3af",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            QualityTier::Excellent => "Excellent",
            QualityTier::Good => "Good",
            QualityTier::Fair => "Fair",
            QualityTier::Poor => "Poor",
            QualityTier::VeryPoor => "Very Poor",
            QualityTier::Unknown => "Unknown",
        }
    }
}

/// Classify a sample. The most severe signal wins: degradation, then round
/// trip time, then received frame rate, then combined video bitrate.
pub fn classify(sample: Option<&NetworkSample>) -> QualityTier {
    let Some(sample) = sample else {
        return QualityTier::Unknown;
    };

    match sample.degradation {
        Degradation::Severe => return QualityTier::VeryPoor,
        Degradation::Minor => return QualityTier::Poor,
        Degradation::None => {}
    }

    if sample.rtt_ms > 800 {
        return QualityTier::VeryPoor;
    }
    if sample.rtt_ms > 400 {
        return QualityTier::Poor;
    }
    if sample.rtt_ms > 200 {
        return QualityTier::Fair;
    }

    let fps = sample.video_recv_frame_rate;
    if fps < 10.0 {
        return QualityTier::VeryPoor;
    }
    if fps < 15.0 {
        return QualityTier::Poor;
    }
    if fps < 20.0 {
        return QualityTier::Fair;
    }

    let bitrate = u64::from(sample.video_send_bitrate) + u64::from(sample.video_recv_bitrate);
    match bitrate {
        b if b < 500 => QualityTier::VeryPoor,
        b if b < 1000 => QualityTier::Poor,
        b if b < 2000 => QualityTier::Fair,
        b if b < 5000 => QualityTier::Good,
        _ => QualityTier::Excellent,
    }
}

/// Holds the newest sample; each new one replaces the previous.
#[derive(Debug, Clone, Default)]
pub struct NetworkQualityMonitor {
    latest: Option<NetworkSample>,
}

impl NetworkQualityMonitor {
    pub fn record(&mut self, sample: NetworkSample) -> QualityTier {
        self.latest = Some(sample);
        self.tier()
    }

    pub fn latest(&self) -> Option<&NetworkSample> {
        self.latest.as_ref()
    }

    pub fn tier(&self) -> QualityTier {
        classify(self.latest.as_ref())
    }

    pub fn reset(&mut self) {
        self.latest = None;
    }
}
