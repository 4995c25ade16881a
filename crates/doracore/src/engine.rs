//! The `Engine`: one struct collapsing what the source system kept as
//! module-level globals (§9 redesign flag) — the database handle, the
//! extractor facade, the governor, the in-flight registry, and config are
//! constructed once at startup here and threaded through explicitly from
//! then on, instead of being read from `once_cell`/`lazy_static` statics at
//! first use.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::EngineResult;
use crate::extract::{CookieJar, ExtractorFacade};
use crate::governor::{Governor, GovernorConfig};
use crate::inflight::InflightRegistry;
use crate::oracle::{SttOracle, SummaryOracle};
use crate::pipeline::Pipeline;
use crate::ratelimit::RateLimiter;
use crate::storage::Store;
use crate::sweeper::Sweeper;
use crate::transcode::Transcoder;
use crate::transport::Transport;
use crate::upload::Uploader;
use crate::voicebatch::VoiceBatchAggregator;

const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(5);

/// Every long-lived subsystem, constructed once and cheap to clone (each
/// field is itself an `Arc` or an already-`Clone` pooled handle).
pub struct Engine {
    pub config: Config,
    pub store: Store,
    pub governor: Arc<Governor>,
    pub inflight: Arc<InflightRegistry>,
    pub pipeline: Arc<Pipeline>,
    pub voice_batch: Arc<VoiceBatchAggregator>,
    pub sweeper: Arc<Sweeper>,
    pub summary: Arc<dyn SummaryOracle>,
}

impl Engine {
    /// Wire every subsystem from `config`. `transport` is the chat client
    /// (supplied by `dorabot`); `stt`/`summary` are the speech-to-text and
    /// summary oracles (§4.I).
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        stt: Arc<dyn SttOracle>,
        summary: Arc<dyn SummaryOracle>,
    ) -> EngineResult<Self> {
        let store = Store::open(&config.database_path)?;

        let cookies = config.cookies_path.clone().map(CookieJar::from_path).filter(CookieJar::exists);
        let extract_timeout = Duration::from_secs(config.extract_timeout_secs);
        let extractor = Arc::new(ExtractorFacade::new(cookies, config.proxy_url.clone(), extract_timeout));

        let transcoder = Arc::new(Transcoder::new(extract_timeout));
        let governor = Arc::new(Governor::new(GovernorConfig::from(&config)));
        let inflight = InflightRegistry::new();
        let rate_limiter = RateLimiter::new(RATE_LIMIT_COOLDOWN);

        let uploader = Arc::new(Uploader::new(transport.clone(), store.clone()));

        std::fs::create_dir_all(&config.download_dir)?;

        let pipeline = Arc::new(Pipeline::new(
            store.clone(),
            inflight.clone(),
            governor.clone(),
            extractor,
            transcoder.clone(),
            uploader,
            rate_limiter,
            config.download_dir.clone(),
            config.downloaded_file_ttl_hours,
        ));

        let voice_batch = VoiceBatchAggregator::new(store.clone(), transcoder, governor.clone(), transport, stt);

        let sweeper = Arc::new(Sweeper::new(
            store.clone(),
            inflight.clone(),
            config.download_dir.clone(),
            Duration::from_secs(config.ttl_sweep_interval_secs),
            Duration::from_secs(config.idle_sweep_interval_secs),
        ));

        Ok(Self { config, store, governor, inflight, pipeline, voice_batch, sweeper, summary })
    }

    /// Start every background loop (the sweeper's two timers). The memory
    /// guard is wired separately by the binary entrypoint against its own
    /// `ActivityProbe`.
    pub fn spawn_background_tasks(&self) {
        self.sweeper.clone().spawn();
    }
}
