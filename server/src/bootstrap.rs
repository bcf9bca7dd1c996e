use crate::routes::AppState;
use anyhow::{anyhow, Context, Result};
use config::AppConfig;
use pipeline::{Collaborators, Pipeline, PipelineSettings};
use providers::gst::GstApiClient;
use providers::klearstack::{KlearstackClient, KlearstackConfig};
use providers::mock::MockOcrProvider;
use providers::qr::QrApiClient;
use providers::{GstStatusApi, OcrProvider};
use std::sync::Arc;
use std::time::Duration;
use store::{EventSink, HttpEventSink, LocalObjectStore, SledKvStore, SledRecordStore, TracingEventSink};

fn create_ocr_provider(cfg: &AppConfig) -> Result<Arc<dyn OcrProvider>> {
    let ocr = &cfg.ocr;
    match ocr.kind.as_str() {
        "klearstack" => {
            let base_url = ocr
                .base_url
                .clone()
                .ok_or_else(|| anyhow!("KlearStack base_url not configured"))?;
            let username = ocr
                .username
                .clone()
                .ok_or_else(|| anyhow!("KlearStack username not configured"))?;
            let company_id = ocr
                .company_id
                .clone()
                .ok_or_else(|| anyhow!("KlearStack company_id not configured"))?;
            let password = config::require_secret(config::KLEARSTACK_PASSWORD)?;

            tracing::info!(%base_url, "Using KlearStack OCR provider");
            Ok(KlearstackClient::new(KlearstackConfig {
                base_url,
                username,
                password,
                company_id,
                document_type: ocr.document_type.clone(),
                preference: ocr.preference.clone(),
            })?)
        }
        _ => {
            tracing::info!(
                polls_before_complete = ocr.mock_polls_before_complete,
                "Using mock OCR provider"
            );
            Ok(MockOcrProvider::new(ocr.mock_polls_before_complete))
        }
    }
}

fn create_gst_api(cfg: &AppConfig) -> Result<Option<Arc<dyn GstStatusApi>>> {
    let Some(base_url) = cfg.gst.base_url.clone() else {
        tracing::warn!("GST API base_url not configured, vendor checks will be skipped");
        return Ok(None);
    };
    let Some(api_key) = config::resolve_secret(config::GST_API_KEY) else {
        tracing::warn!("GST API key not configured, vendor checks will be skipped");
        return Ok(None);
    };
    let client: Arc<dyn GstStatusApi> =
        GstApiClient::new(base_url, api_key, cfg.gst.api_key_header.clone())?;
    Ok(Some(client))
}

fn create_event_sink(cfg: &AppConfig) -> Result<Arc<dyn EventSink>> {
    match &cfg.events.url {
        Some(url) => {
            tracing::info!(%url, "Publishing events over HTTP");
            let token = config::resolve_secret(config::EVENTS_TOKEN);
            Ok(HttpEventSink::new(url.clone(), token)?)
        }
        None => Ok(Arc::new(TracingEventSink)),
    }
}

/// Wires every collaborator named in `cfg` into the shared handler state.
pub fn build_state(cfg: &AppConfig) -> Result<AppState> {
    let db = sled::open(&cfg.store.sled_path)
        .with_context(|| format!("Failed to open store at {}", cfg.store.sled_path))?;
    let kv = Arc::new(SledKvStore::new(&db)?);
    let records = Arc::new(SledRecordStore::new(db));

    let signing_secret = config::require_secret(config::STORAGE_SIGNING_SECRET)?;
    let objects = Arc::new(LocalObjectStore::new(
        &cfg.storage.root,
        &cfg.storage.public_base_url,
        &signing_secret,
    ));

    let qr_base_url = cfg
        .qr
        .base_url
        .clone()
        .ok_or_else(|| anyhow!("QR decoding base_url not configured"))?;
    let qr_decoder = QrApiClient::new(qr_base_url, config::require_secret(config::QR_API_TOKEN)?)?;

    let settings = PipelineSettings {
        bucket: cfg.storage.bucket.clone(),
        poll_interval: Duration::from_millis(cfg.poll.interval_ms),
        default_max_duration: Duration::from_millis(cfg.poll.max_duration_ms),
        qr_timeout: Duration::from_secs(cfg.qr.timeout_secs),
        signed_url_ttl: Duration::from_secs(cfg.storage.signed_url_ttl_secs),
    };

    let pipeline = Pipeline::new(
        Collaborators {
            provider: create_ocr_provider(cfg)?,
            objects: objects.clone(),
            kv,
            records,
            events: create_event_sink(cfg)?,
            gst_api: create_gst_api(cfg)?,
            qr_decoder,
        },
        settings,
    );

    Ok(AppState {
        pipeline: Arc::new(pipeline),
        objects,
    })
}
