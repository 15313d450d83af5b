//! Distribute segments to an orchestrator and collect the renditions it produces.
//!
//! # Lifecycle
//!
//! Every segment moves through the following [State]s:
//!
//! ```text
//! Captured -> Persisted -> Submitted -> Collecting -> Settled
//!                 |            |
//!                 +------------+-------> Failed
//! ```
//!
//! Persisting (saving to the broadcaster's storage and appending to the source rendition) happens
//! before [Distributor::process_segment] returns, so segments reach the source playlist in the
//! order they are captured. Everything after that runs on a spawned task whose [JoinHandle]
//! resolves to the segment's [Settlement].
//!
//! Once the orchestrator answers, one download task is spawned per rendition and the segment
//! settles only after every one of them has finished (or timed out). A segment whose renditions
//! all fail is still settled; the failure is reported to the [Monitor] once per segment rather
//! than once per rendition.

use crate::{
    policy::should_stop_session,
    selector::BroadcastSession,
    transport::{SubmitError, Transport},
    InputStream, PlaylistManager, Segment, VideoProfile,
};
use bytes::Bytes;
use futures::{channel::mpsc, StreamExt};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};
use tokio::{task::JoinHandle, time::timeout};
use tracing::{debug, error, info, warn};
use vidpay_cryptography::{hash, Digest, Sha256};

mod config;
pub use config::Config;
mod metrics;
pub use metrics::{Metrics, Monitor, ProfileLabel, StageLabel};

/// Source of [Connection] nonces.
static NEXT_NONCE: AtomicU64 = AtomicU64::new(1);

/// Step of the pipeline a failure is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Payment,
    Submit,
    Download,
    SaveData,
    Playlist,
    Timeout,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Payment,
        Stage::Submit,
        Stage::Download,
        Stage::SaveData,
        Stage::Playlist,
        Stage::Timeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Payment => "Payment",
            Stage::Submit => "Submit",
            Stage::Download => "Download",
            Stage::SaveData => "SaveData",
            Stage::Playlist => "Playlist",
            Stage::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a segment through the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Captured,
    Persisted,
    Submitted,
    Collecting,
    Settled,
    Failed,
}

/// Outcome of distributing one segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settlement {
    pub seq_no: u64,
    /// Either [State::Settled] or [State::Failed].
    pub state: State,
    /// Where each rendition was inserted, ordered like the session's profiles.
    pub renditions: Vec<Option<String>>,
    /// Hash of each rendition that was downloaded.
    ///
    /// Renditions already in the broadcaster's storage are not downloaded and have no hash.
    pub hashes: Vec<Option<Digest>>,
    /// Hash over the present entries of `hashes`, in order.
    pub aggregate: Option<Digest>,
    /// Signature the orchestrator returned with its renditions.
    pub signature: Bytes,
}

impl Settlement {
    fn new(seq_no: u64) -> Self {
        Self {
            seq_no,
            state: State::Persisted,
            renditions: Vec::new(),
            hashes: Vec::new(),
            aggregate: None,
            signature: Bytes::new(),
        }
    }

    fn fail(mut self) -> Self {
        self.state = State::Failed;
        self
    }

    /// Number of renditions that were not inserted.
    pub fn missing(&self) -> usize {
        self.renditions.iter().filter(|r| r.is_none()).count()
    }
}

/// An inbound stream and the orchestrator session (if any) its segments are sent to.
pub struct Connection {
    nonce: u64,
    stream: Arc<dyn InputStream>,
    playlist: Arc<dyn PlaylistManager>,
    profile: VideoProfile,
    session: Mutex<Option<Arc<BroadcastSession>>>,
}

impl Connection {
    /// Create a [Connection] whose captured segments use `profile`.
    pub fn new(
        stream: Arc<dyn InputStream>,
        playlist: Arc<dyn PlaylistManager>,
        profile: VideoProfile,
    ) -> Self {
        Self {
            nonce: NEXT_NONCE.fetch_add(1, Ordering::Relaxed),
            stream,
            playlist,
            profile,
            session: Mutex::new(None),
        }
    }

    /// Identifier correlating the telemetry of this connection.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn stream(&self) -> &Arc<dyn InputStream> {
        &self.stream
    }

    pub fn session(&self) -> Option<Arc<BroadcastSession>> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_session(&self, session: BroadcastSession) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(session));
    }

    /// Drop the current session so later segments are only stored locally.
    pub fn discard_session(&self) {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Name under which a segment of `profile` is saved.
fn object_name(profile: &VideoProfile, seq_no: u64) -> String {
    format!("{}/{}.ts", profile.name, seq_no)
}

/// Sends captured segments to orchestrators.
#[derive(Clone)]
pub struct Distributor {
    cfg: Config,
    transport: Arc<dyn Transport>,
    monitor: Arc<dyn Monitor>,
}

impl Distributor {
    pub fn new(cfg: Config, transport: Arc<dyn Transport>, monitor: Arc<dyn Monitor>) -> Self {
        Self {
            cfg,
            transport,
            monitor,
        }
    }

    /// Persist `segment` and, if `connection` has a session, start transcoding it.
    ///
    /// Returns `None` when the segment could not be persisted or there is no session to send it
    /// to. Otherwise the returned handle resolves once every rendition has been collected.
    pub async fn process_segment(
        &self,
        connection: &Arc<Connection>,
        mut segment: Segment,
    ) -> Option<JoinHandle<Settlement>> {
        let nonce = connection.nonce;
        let seq_no = segment.seq_no;
        self.monitor.segment_emerged(nonce, seq_no);

        // Persist locally before anything else
        let name = object_name(&connection.profile, seq_no);
        let os = connection.playlist.os_session();
        let uri = match os.save_data(&name, segment.data.clone()).await {
            Ok(uri) => uri,
            Err(err) => {
                error!(nonce, seq_no, ?err, "error saving segment");
                self.monitor
                    .segment_upload_failed(nonce, seq_no, &err.to_string());
                return None;
            }
        };
        if os.is_external() {
            segment.name = uri.clone();
        }
        match connection.playlist.insert_hls_segment(
            &connection.profile,
            seq_no,
            &uri,
            segment.duration,
        ) {
            Ok(()) => self.monitor.source_segment_appeared(
                nonce,
                seq_no,
                connection.playlist.manifest_id().as_str(),
                &connection.profile.name,
            ),
            Err(err) => {
                error!(nonce, seq_no, ?err, "error inserting source segment");
                self.monitor
                    .segment_upload_failed(nonce, seq_no, &err.to_string());
            }
        }

        let Some(session) = connection.session() else {
            debug!(nonce, seq_no, "no session; segment stored locally");
            return None;
        };
        let distributor = self.clone();
        let connection = connection.clone();
        Some(tokio::spawn(async move {
            distributor
                .transcode(connection, session, segment, name)
                .await
        }))
    }

    async fn transcode(
        self,
        connection: Arc<Connection>,
        session: Arc<BroadcastSession>,
        mut segment: Segment,
        name: String,
    ) -> Settlement {
        let nonce = connection.nonce;
        let seq_no = segment.seq_no;
        let mut settlement = Settlement::new(seq_no);

        // Upload to the orchestrator's storage so it can fetch the segment itself
        if let Some(os) = &session.orchestrator_os {
            match os.save_data(&name, segment.data.clone()).await {
                Ok(uri) => segment.name = uri,
                Err(err) => {
                    error!(nonce, seq_no, ?err, "error uploading segment");
                    self.monitor
                        .segment_upload_failed(nonce, seq_no, &err.to_string());
                    return settlement.fail();
                }
            }
        }

        // Pay for the work if the orchestrator asks for it
        let payment = match (&session.broadcaster, &session.orchestrator_info.ticket_params) {
            (Some(sender), Some(params)) => {
                match sender
                    .create_ticket(session.manifest_id.as_str(), params, hash(&segment.data))
                    .await
                {
                    Ok(payment) => Some(payment),
                    Err(err) => {
                        self.report(Stage::Payment, nonce, seq_no, &err.to_string());
                        return settlement.fail();
                    }
                }
            }
            _ => None,
        };

        // Submit
        settlement.state = State::Submitted;
        let submitted = timeout(
            self.cfg.submit_timeout,
            self.transport
                .submit_segment(&session, &segment, nonce, payment),
        )
        .await
        .unwrap_or(Err(SubmitError::Timeout));
        let result = match submitted {
            Ok(result) => result,
            Err(err) => {
                if should_stop_session(&err) {
                    warn!(nonce, seq_no, %err, "stopping stream");
                    connection.stream.close();
                    connection.discard_session();
                }
                self.report(Stage::Submit, nonce, seq_no, &err.to_string());
                return settlement.fail();
            }
        };

        // Fan out one download per rendition
        settlement.state = State::Collecting;
        if result.segments.len() != session.profiles.len() {
            warn!(
                nonce,
                seq_no,
                renditions = result.segments.len(),
                profiles = session.profiles.len(),
                "rendition count does not match profiles"
            );
        }
        let count = result.segments.len().min(session.profiles.len());
        settlement.renditions = vec![None; count];
        settlement.hashes = vec![None; count];
        let reported = Arc::new(Mutex::new(false));
        let (sender, mut receiver) = mpsc::unbounded();
        for (index, (rendition, profile)) in result
            .segments
            .into_iter()
            .zip(session.profiles.iter().cloned())
            .enumerate()
        {
            let distributor = self.clone();
            let connection = connection.clone();
            let session = session.clone();
            let reported = reported.clone();
            let sender = sender.clone();
            let duration = segment.duration;
            tokio::spawn(async move {
                let download = distributor.download(
                    &connection,
                    &session,
                    seq_no,
                    duration,
                    &profile,
                    rendition.url.clone(),
                );
                let outcome = match timeout(distributor.cfg.download_timeout, download).await {
                    Ok(Ok(outcome)) => Some(outcome),
                    Ok(Err((stage, reason))) => {
                        distributor.report_once(&reported, stage, nonce, seq_no, &rendition.url, &reason);
                        None
                    }
                    Err(_) => {
                        distributor.report_once(
                            &reported,
                            Stage::Timeout,
                            nonce,
                            seq_no,
                            &rendition.url,
                            "download timed out",
                        );
                        None
                    }
                };
                let _ = sender.unbounded_send((index, outcome));
            });
        }
        drop(sender);

        // Wait for every download to finish
        while let Some((index, outcome)) = receiver.next().await {
            if let Some((uri, digest)) = outcome {
                settlement.renditions[index] = Some(uri);
                settlement.hashes[index] = digest;
            }
        }

        let mut hasher = Sha256::new();
        for digest in settlement.hashes.iter().flatten() {
            hasher.update(digest.as_ref());
        }
        settlement.aggregate = Some(hasher.finalize());
        // TODO: verify `signature` over `aggregate` once orchestrator info carries a signing address
        settlement.signature = result.sig;
        settlement.state = State::Settled;
        info!(
            nonce,
            seq_no,
            renditions = count,
            missing = settlement.missing(),
            "segment settled"
        );
        settlement
    }

    /// Fetch a rendition into the broadcaster's storage (unless it is already there) and append
    /// it to its playlist.
    async fn download(
        &self,
        connection: &Connection,
        session: &BroadcastSession,
        seq_no: u64,
        duration: Duration,
        profile: &VideoProfile,
        url: String,
    ) -> Result<(String, Option<Digest>), (Stage, String)> {
        let mut uri = url;
        let mut digest = None;
        if let Some(os) = &session.broadcaster_os {
            if !os.owns(&uri) {
                let data = self
                    .transport
                    .fetch(&uri)
                    .await
                    .map_err(|err| (Stage::Download, err.to_string()))?;
                digest = Some(hash(&data));
                uri = os
                    .save_data(&object_name(profile, seq_no), data)
                    .await
                    .map_err(|err| (Stage::SaveData, err.to_string()))?;
            }
        }
        connection
            .playlist
            .insert_hls_segment(profile, seq_no, &uri, duration)
            .map_err(|err| (Stage::Playlist, err.to_string()))?;
        self.monitor
            .transcoded_segment_appeared(connection.nonce, seq_no, &profile.name);
        Ok((uri, digest))
    }

    fn report(&self, stage: Stage, nonce: u64, seq_no: u64, reason: &str) {
        error!(nonce, seq_no, %stage, reason, "transcode failed");
        self.monitor
            .segment_transcode_failed(stage.as_str(), nonce, seq_no, reason);
    }

    /// Report a rendition failure unless another rendition of the segment already did.
    fn report_once(
        &self,
        reported: &Mutex<bool>,
        stage: Stage,
        nonce: u64,
        seq_no: u64,
        url: &str,
        reason: &str,
    ) {
        let mut reported = reported.lock().unwrap_or_else(PoisonError::into_inner);
        if *reported {
            debug!(nonce, seq_no, %stage, url, reason, "additional rendition failure");
            return;
        }
        *reported = true;
        error!(nonce, seq_no, url, "rendition failed");
        self.report(stage, nonce, seq_no, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mocks,
        playlist::Memory,
        selector::OrchestratorInfo,
        storage::{memory::Session, OsInfo, OsSession},
        transport::{TranscodeResult, TranscodedSegment},
        ManifestId, Stream,
    };
    use num_bigint::BigUint;
    use prometheus_client::registry::Registry;
    use std::io::ErrorKind;
    use vidpay_cryptography::PrivateKey;
    use vidpay_pm::{
        store::{memory::Store, TicketStore},
        ticket::win_prob_from_ratio,
        Sender, TicketParams,
    };

    struct Harness {
        transport: Arc<mocks::Transport>,
        metrics: Arc<Metrics>,
        os: Arc<Session>,
        playlist: Arc<Memory>,
        stream: Arc<Stream>,
        connection: Arc<Connection>,
        distributor: Distributor,
    }

    impl Harness {
        fn new(os: Arc<Session>) -> Self {
            Self::with_config(
                os,
                Config {
                    submit_timeout: Duration::from_secs(5),
                    download_timeout: Duration::from_secs(5),
                },
            )
        }

        fn with_config(os: Arc<Session>, cfg: Config) -> Self {
            let transport = Arc::new(mocks::Transport::default());
            let metrics = Arc::new(Metrics::init(&mut Registry::default()));
            let playlist = Arc::new(Memory::new(ManifestId::new("stream"), os.clone()));
            let stream = Arc::new(Stream::new("stream"));
            let connection = Arc::new(Connection::new(
                stream.clone(),
                playlist.clone(),
                VideoProfile::new("source", "", "1920x1080", 30),
            ));
            let distributor = Distributor::new(cfg, transport.clone(), metrics.clone());
            Self {
                transport,
                metrics,
                os,
                playlist,
                stream,
                connection,
                distributor,
            }
        }

        /// Attach a session requesting `profiles` renditions.
        fn attach(&self, profiles: usize) -> Vec<VideoProfile> {
            let profiles: Vec<VideoProfile> = (0..profiles)
                .map(|i| VideoProfile::new(&format!("P{i}"), "600k", "640x360", 30))
                .collect();
            self.connection.set_session(BroadcastSession {
                broadcaster: None,
                manifest_id: ManifestId::new("stream"),
                profiles: profiles.clone(),
                orchestrator_info: OrchestratorInfo {
                    transcoder: "https://orch".into(),
                    storage: Vec::new(),
                    ticket_params: None,
                },
                orchestrator_os: None,
                broadcaster_os: Some(self.os.clone() as Arc<dyn OsSession>),
            });
            profiles
        }

        /// Script a successful response for `seq_no` and serve every rendition except `skip`.
        fn respond(&self, profiles: &[VideoProfile], seq_no: u64, skip: &[usize]) {
            let mut segments = Vec::new();
            for (i, profile) in profiles.iter().enumerate() {
                let url = format!("https://orch/{}/{seq_no}.ts", profile.name);
                if !skip.contains(&i) {
                    self.transport
                        .serve(&url, Bytes::from(format!("{}-{seq_no}", profile.name)));
                }
                segments.push(TranscodedSegment { url });
            }
            self.transport.respond(Ok(TranscodeResult {
                segments,
                sig: Bytes::from_static(b"sig"),
            }));
        }

        fn segment(seq_no: u64) -> Segment {
            Segment::new(
                seq_no,
                Bytes::from(format!("source-{seq_no}")),
                Duration::from_secs(2),
            )
        }
    }

    #[tokio::test]
    async fn test_local_only_without_session() {
        let harness = Harness::new(Arc::new(Session::new("bcast", false)));
        let handle = harness
            .distributor
            .process_segment(&harness.connection, Harness::segment(0))
            .await;
        assert!(handle.is_none());

        // Still stored and listed
        let source = harness.playlist.segments("source");
        assert_eq!(source.len(), 1);
        assert_eq!(source[0].1.uri, "memory://bcast/source/0.ts");
        assert_eq!(harness.os.len(), 1);
        assert_eq!(harness.metrics.emerged.get(), 1);
        assert_eq!(harness.metrics.source_appeared.get(), 1);
        assert!(harness.transport.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_persist_failure_aborts_segment() {
        let transport = Arc::new(mocks::Transport::default());
        let metrics = Arc::new(Metrics::init(&mut Registry::default()));
        let playlist = Arc::new(Memory::new(
            ManifestId::new("stream"),
            Arc::new(mocks::FailingSession),
        ));
        let connection = Arc::new(Connection::new(
            Arc::new(Stream::new("stream")),
            playlist.clone(),
            VideoProfile::new("source", "", "", 30),
        ));
        let distributor = Distributor::new(
            Config {
                submit_timeout: Duration::from_secs(1),
                download_timeout: Duration::from_secs(1),
            },
            transport.clone(),
            metrics.clone(),
        );

        let handle = distributor
            .process_segment(&connection, Harness::segment(0))
            .await;
        assert!(handle.is_none());
        assert!(playlist.segments("source").is_empty());
        assert_eq!(metrics.upload_failed.get(), 1);
        assert_eq!(metrics.source_appeared.get(), 0);
    }

    #[tokio::test]
    async fn test_all_renditions_collected() {
        let harness = Harness::new(Arc::new(Session::new("bcast", false)));
        let profiles = harness.attach(3);
        harness.respond(&profiles, 7, &[]);

        let settlement = harness
            .distributor
            .process_segment(&harness.connection, Harness::segment(7))
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(settlement.state, State::Settled);
        assert_eq!(settlement.missing(), 0);
        assert_eq!(settlement.signature, Bytes::from_static(b"sig"));

        // Renditions are re-saved locally and hashed in profile order
        let mut expected = Sha256::new();
        for (i, profile) in profiles.iter().enumerate() {
            let segments = harness.playlist.segments(&profile.name);
            assert_eq!(segments.len(), 1);
            assert_eq!(
                segments[0].1.uri,
                format!("memory://bcast/{}/7.ts", profile.name)
            );
            assert_eq!(settlement.renditions[i].as_deref(), Some(segments[0].1.uri.as_str()));
            let digest = hash(format!("{}-7", profile.name).as_bytes());
            assert_eq!(settlement.hashes[i], Some(digest));
            expected.update(digest.as_ref());
        }
        assert_eq!(settlement.aggregate, Some(expected.finalize()));
        assert_eq!(harness.metrics.transcode_failures(), 0);

        // Submitted inline since the broadcaster's storage is not external
        let submissions = harness.transport.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].seq_no, 7);
        assert!(submissions[0].name.is_empty());
        assert!(submissions[0].payment.is_none());
    }

    #[tokio::test]
    async fn test_failed_rendition_reported_once() {
        let harness = Harness::new(Arc::new(Session::new("bcast", false)));
        let profiles = harness.attach(4);

        // One rendition missing
        harness.respond(&profiles, 0, &[2]);
        let settlement = harness
            .distributor
            .process_segment(&harness.connection, Harness::segment(0))
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(settlement.state, State::Settled);
        assert_eq!(settlement.missing(), 1);
        assert!(settlement.renditions[2].is_none());
        assert!(harness.playlist.segments("P2").is_empty());
        for name in ["P0", "P1", "P3"] {
            assert_eq!(harness.playlist.segments(name).len(), 1);
        }
        assert_eq!(harness.metrics.transcode_failures(), 1);

        // Several renditions missing are still one report
        harness.respond(&profiles, 1, &[0, 1, 3]);
        let settlement = harness
            .distributor
            .process_segment(&harness.connection, Harness::segment(1))
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(settlement.missing(), 3);
        assert_eq!(harness.metrics.transcode_failures(), 2);
        assert_eq!(
            harness
                .metrics
                .transcode_failed
                .get_or_create(&StageLabel::new("Download"))
                .get(),
            2
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_downloads() {
        let harness = Harness::new(Arc::new(Session::new("bcast", false)));
        let profiles = harness.attach(32);
        let missing = [3, 9, 17, 25, 31];

        for seq_no in 0..4 {
            harness.respond(&profiles, seq_no, &missing);
        }
        let handles: Vec<_> = futures::future::join_all(
            (0..4).map(|seq_no| {
                harness
                    .distributor
                    .process_segment(&harness.connection, Harness::segment(seq_no))
            }),
        )
        .await
        .into_iter()
        .map(Option::unwrap)
        .collect();
        for handle in handles {
            let settlement = handle.await.unwrap();
            assert_eq!(settlement.state, State::Settled);
            assert_eq!(settlement.missing(), missing.len());
            for i in missing {
                assert!(settlement.renditions[i].is_none());
            }
        }

        // Every served rendition was listed once per segment
        for (i, profile) in profiles.iter().enumerate() {
            let listed = harness.playlist.segments(&profile.name);
            if missing.contains(&i) {
                assert!(listed.is_empty());
            } else {
                let seq_nos: Vec<u64> = listed.iter().map(|(seq_no, _)| *seq_no).collect();
                assert_eq!(seq_nos, vec![0, 1, 2, 3]);
            }
        }

        // One failure report per segment
        assert_eq!(harness.metrics.transcode_failures(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_download_times_out() {
        let harness = Harness::with_config(
            Arc::new(Session::new("bcast", false)),
            Config {
                submit_timeout: Duration::from_secs(5),
                download_timeout: Duration::from_millis(500),
            },
        );
        let profiles = harness.attach(2);
        harness.respond(&profiles, 0, &[]);
        harness.transport.stall("https://orch/P1/0.ts");

        let settlement = harness
            .distributor
            .process_segment(&harness.connection, Harness::segment(0))
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(settlement.state, State::Settled);
        assert!(settlement.renditions[0].is_some());
        assert!(settlement.renditions[1].is_none());
        assert_eq!(
            harness
                .metrics
                .transcode_failed
                .get_or_create(&StageLabel::new("Timeout"))
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn test_owned_rendition_not_downloaded() {
        let harness = Harness::new(Arc::new(Session::new("bcast", false)));
        let profiles = harness.attach(1);
        harness.transport.respond(Ok(TranscodeResult {
            segments: vec![TranscodedSegment {
                url: "memory://bcast/P0/0.ts".into(),
            }],
            sig: Bytes::new(),
        }));

        let settlement = harness
            .distributor
            .process_segment(&harness.connection, Harness::segment(0))
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(settlement.state, State::Settled);
        assert_eq!(settlement.hashes, vec![None]);
        assert_eq!(
            harness.playlist.segments(&profiles[0].name)[0].1.uri,
            "memory://bcast/P0/0.ts"
        );
    }

    #[tokio::test]
    async fn test_fatal_submit_error_stops_stream() {
        let harness = Harness::new(Arc::new(Session::new("bcast", false)));
        harness.attach(2);
        harness
            .transport
            .respond(Err(SubmitError::OrchestratorBusy));

        let settlement = harness
            .distributor
            .process_segment(&harness.connection, Harness::segment(0))
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(settlement.state, State::Failed);
        assert!(harness.stream.is_closed());
        assert!(harness.connection.session().is_none());
        assert_eq!(
            harness
                .metrics
                .transcode_failed
                .get_or_create(&StageLabel::new("Submit"))
                .get(),
            1
        );

        // Later segments are only stored locally
        assert!(harness
            .distributor
            .process_segment(&harness.connection, Harness::segment(1))
            .await
            .is_none());
        assert_eq!(harness.playlist.segments("source").len(), 2);
    }

    #[tokio::test]
    async fn test_transient_submit_error_keeps_session() {
        let harness = Harness::new(Arc::new(Session::new("bcast", false)));
        harness.attach(2);
        harness
            .transport
            .respond(Err(SubmitError::ReadBody(ErrorKind::UnexpectedEof)));

        let settlement = harness
            .distributor
            .process_segment(&harness.connection, Harness::segment(0))
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(settlement.state, State::Failed);
        assert!(!harness.stream.is_closed());
        assert!(harness.connection.session().is_some());
    }

    #[tokio::test]
    async fn test_external_storage_passes_uri() {
        let harness = Harness::new(Arc::new(Session::new("cdn", true)));
        let profiles = harness.attach(1);
        harness.respond(&profiles, 3, &[]);

        harness
            .distributor
            .process_segment(&harness.connection, Harness::segment(3))
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(
            harness.transport.submissions()[0].name,
            "memory://cdn/source/3.ts"
        );
    }

    #[tokio::test]
    async fn test_orchestrator_storage_upload() {
        let harness = Harness::new(Arc::new(Session::new("bcast", false)));
        let profiles = harness.attach(1);
        let mut session = (*harness.connection.session().unwrap()).clone();
        let orchestrator_os = Arc::new(Session::new("orch", true));
        session.orchestrator_info.storage = vec![OsInfo::Memory {
            prefix: "orch".into(),
        }];
        session.orchestrator_os = Some(orchestrator_os.clone());
        harness.connection.set_session(session);
        harness.respond(&profiles, 0, &[]);

        harness
            .distributor
            .process_segment(&harness.connection, Harness::segment(0))
            .await
            .unwrap()
            .await
            .unwrap();
        assert_eq!(
            harness.transport.submissions()[0].name,
            "memory://orch/source/0.ts"
        );
        assert_eq!(orchestrator_os.len(), 1);
    }

    #[tokio::test]
    async fn test_paid_submission() {
        let harness = Harness::new(Arc::new(Session::new("bcast", false)));
        let profiles = harness.attach(1);

        let key = PrivateKey::from_seed(0);
        let store = Arc::new(Store::new());
        let params = TicketParams {
            recipient: PrivateKey::from_seed(1).address(),
            face_value: BigUint::from(100u32),
            win_prob: win_prob_from_ratio(1, 10).unwrap(),
            recipient_rand: BigUint::from(42u8),
        };
        let mut session = (*harness.connection.session().unwrap()).clone();
        session.broadcaster = Some(Arc::new(Sender::new(
            key.clone(),
            key.address(),
            store.clone(),
        )));
        session.orchestrator_info.ticket_params = Some(params.clone());
        harness.connection.set_session(session);
        harness.respond(&profiles, 0, &[]);

        let segment = Harness::segment(0);
        harness
            .distributor
            .process_segment(&harness.connection, segment.clone())
            .await
            .unwrap()
            .await
            .unwrap();

        // The ticket pays for exactly this segment
        let payment = harness.transport.submissions()[0]
            .payment
            .clone()
            .unwrap();
        assert_eq!(payment.ticket.work_hash, hash(&segment.data));
        assert_eq!(payment.ticket.recipient, params.recipient);
        assert_eq!(payment.ticket.sender, key.address());
        assert_eq!(payment.recipient_rand, params.recipient_rand);
        let entries = store.load("stream").await.unwrap();
        assert_eq!(entries.tickets, vec![payment.ticket]);
    }

    #[tokio::test]
    async fn test_connection_nonces_are_distinct() {
        let os: Arc<Session> = Arc::new(Session::new("bcast", false));
        let playlist = Arc::new(Memory::new(ManifestId::new("stream"), os));
        let profile = VideoProfile::new("source", "", "", 30);
        let a = Connection::new(Arc::new(Stream::new("a")), playlist.clone(), profile.clone());
        let b = Connection::new(Arc::new(Stream::new("b")), playlist, profile);
        assert_ne!(a.nonce(), b.nonce());
    }
}
