use super::Stage;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

/// Receives segment lifecycle events.
///
/// Every method has a no-op default so implementors only observe what they need.
pub trait Monitor: Send + Sync + 'static {
    /// A segment was captured from the input stream.
    fn segment_emerged(&self, _nonce: u64, _seq_no: u64) {}

    /// A segment could not be persisted or uploaded.
    fn segment_upload_failed(&self, _nonce: u64, _seq_no: u64, _reason: &str) {}

    /// A segment was added to the source rendition.
    fn source_segment_appeared(&self, _nonce: u64, _seq_no: u64, _manifest_id: &str, _profile: &str) {}

    /// Transcoding a segment failed at `stage`.
    ///
    /// Reported at most once per segment.
    fn segment_transcode_failed(&self, _stage: &str, _nonce: u64, _seq_no: u64, _reason: &str) {}

    /// A rendition of a segment was added to its playlist.
    fn transcoded_segment_appeared(&self, _nonce: u64, _seq_no: u64, _profile: &str) {}
}

impl Monitor for () {}

/// Label for failed transcodes
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StageLabel {
    /// Step of the pipeline that failed
    pub stage: String,
}

impl StageLabel {
    pub fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
        }
    }
}

/// Label for renditions
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProfileLabel {
    /// Name of the rendition
    pub profile: String,
}

/// [Monitor] that counts events in prometheus metrics.
#[derive(Default)]
pub struct Metrics {
    /// Number of segments captured
    pub emerged: Counter,
    /// Number of segments that could not be persisted or uploaded
    pub upload_failed: Counter,
    /// Number of segments added to the source rendition
    pub source_appeared: Counter,
    /// Number of segments whose transcode failed, by stage
    pub transcode_failed: Family<StageLabel, Counter>,
    /// Number of renditions added to playlists, by profile
    pub transcoded_appeared: Family<ProfileLabel, Counter>,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given registry.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Metrics::default();
        registry.register(
            "segments_emerged",
            "Number of segments captured",
            metrics.emerged.clone(),
        );
        registry.register(
            "segments_upload_failed",
            "Number of segments that could not be persisted or uploaded",
            metrics.upload_failed.clone(),
        );
        registry.register(
            "source_segments_appeared",
            "Number of segments added to the source rendition",
            metrics.source_appeared.clone(),
        );
        registry.register(
            "segments_transcode_failed",
            "Number of segments whose transcode failed, by stage",
            metrics.transcode_failed.clone(),
        );
        registry.register(
            "transcoded_segments_appeared",
            "Number of renditions added to playlists, by profile",
            metrics.transcoded_appeared.clone(),
        );
        metrics
    }

    /// Total transcode failures across stages.
    pub fn transcode_failures(&self) -> u64 {
        Stage::ALL
            .iter()
            .map(|stage| {
                self.transcode_failed
                    .get_or_create(&StageLabel::new(stage.as_str()))
                    .get()
            })
            .sum()
    }
}

impl Monitor for Metrics {
    fn segment_emerged(&self, _nonce: u64, _seq_no: u64) {
        self.emerged.inc();
    }

    fn segment_upload_failed(&self, _nonce: u64, _seq_no: u64, _reason: &str) {
        self.upload_failed.inc();
    }

    fn source_segment_appeared(&self, _nonce: u64, _seq_no: u64, _manifest_id: &str, _profile: &str) {
        self.source_appeared.inc();
    }

    fn segment_transcode_failed(&self, stage: &str, _nonce: u64, _seq_no: u64, _reason: &str) {
        self.transcode_failed
            .get_or_create(&StageLabel::new(stage))
            .inc();
    }

    fn transcoded_segment_appeared(&self, _nonce: u64, _seq_no: u64, profile: &str) {
        self.transcoded_appeared
            .get_or_create(&ProfileLabel {
                profile: profile.to_string(),
            })
            .inc();
    }
}
