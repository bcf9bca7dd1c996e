//! Scripted collaborators shared by the pipeline unit tests.

use crate::gst::GstValidator;
use crate::poller::ExtractionPoller;
use crate::qr::{QrExtractor, DEFAULT_SIGNED_URL_TTL};
use crate::submission::DocumentSubmitter;
use crate::{Collaborators, Pipeline, PipelineSettings};
use async_trait::async_trait;
use invproc_core::models::TokenPair;
use providers::qr::QrApiClient;
use providers::{GstStatusApi, OcrProvider, ProviderError, QrDecoder, TokenStage};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use store::{
    EventMessage, EventSink, KvStore, LocalObjectStore, ObjectStore, RecordStore, SledKvStore,
    SledRecordStore, StoreError,
};
use tempfile::TempDir;

pub const BUCKET: &str = "invoices";
pub const DEFAULT_BATCH: &str = "batch-1";

pub enum UploadScript {
    Reject(u16, String),
    NoBatch,
}

pub enum StatusScript {
    Body(Value),
    Http(u16),
}

/// OCR provider that logs every call and answers from queued scripts.
#[derive(Default)]
pub struct ScriptedProvider {
    calls: Mutex<Vec<&'static str>>,
    refreshed: AtomicU32,
    refresh_fails: AtomicBool,
    uploads: Mutex<VecDeque<UploadScript>>,
    statuses: Mutex<VecDeque<StatusScript>>,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn fail_refresh(&self) {
        self.refresh_fails.store(true, Ordering::SeqCst);
    }

    pub fn script_upload(&self, script: UploadScript) {
        self.uploads.lock().unwrap().push_back(script);
    }

    pub fn script_status(&self, script: StatusScript) {
        self.statuses.lock().unwrap().push_back(script);
    }
}

#[async_trait]
impl OcrProvider for ScriptedProvider {
    async fn issue_token(&self) -> Result<TokenPair, ProviderError> {
        self.record("issue");
        Ok(TokenPair {
            access_token: "issued".into(),
            refresh_token: "issued-refresh".into(),
        })
    }

    async fn refresh_token(&self, _issued: &TokenPair) -> Result<TokenPair, ProviderError> {
        self.record("refresh");
        if self.refresh_fails.load(Ordering::SeqCst) {
            return Err(ProviderError::TokenAcquisition {
                stage: TokenStage::Refresh,
                status: Some(401),
                message: "refresh rejected".into(),
            });
        }
        let n = self.refreshed.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenPair {
            access_token: format!("refreshed-{n}"),
            refresh_token: format!("refresh-{n}"),
        })
    }

    async fn process_document(
        &self,
        _token: &TokenPair,
        _file_name: &str,
        _bytes: Vec<u8>,
    ) -> Result<String, ProviderError> {
        self.record("upload");
        match self.uploads.lock().unwrap().pop_front() {
            None => Ok(DEFAULT_BATCH.to_string()),
            Some(UploadScript::Reject(status, body)) => Err(ProviderError::Upload { status, body }),
            Some(UploadScript::NoBatch) => Err(ProviderError::MissingBatchId {
                body: r#"{"message":"accepted"}"#.into(),
            }),
        }
    }

    async fn batch_status(
        &self,
        _token: &TokenPair,
        _batch_id: &str,
    ) -> Result<Value, ProviderError> {
        self.record("status");
        match self.statuses.lock().unwrap().pop_front() {
            None => Ok(json!({"status": "processing"})),
            Some(StatusScript::Body(body)) => Ok(body),
            Some(StatusScript::Http(status)) => Err(ProviderError::StatusCheck {
                status,
                body: "unavailable".into(),
            }),
        }
    }
}

/// Event sink that remembers published topics.
#[derive(Default)]
pub struct RecordingSink {
    published: Mutex<Vec<EventMessage>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn topics(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.topic.clone())
            .collect()
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, message: &EventMessage) -> store::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected {
                status: 503,
                body: "queue unavailable".into(),
            });
        }
        self.published.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Temporary stores plus a scripted provider, wired the way the server wires
/// the real collaborators.
pub struct Harness {
    _dir: TempDir,
    pub objects: Arc<LocalObjectStore>,
    pub kv: Arc<dyn KvStore>,
    pub records: Arc<dyn RecordStore>,
    pub events: Arc<RecordingSink>,
    pub provider: Arc<ScriptedProvider>,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let objects = Arc::new(LocalObjectStore::new(
            dir.path(),
            "http://files.test",
            "test-secret",
        ));
        let db = sled::Config::new().temporary(true).open().unwrap();
        let kv: Arc<dyn KvStore> = Arc::new(SledKvStore::new(&db).unwrap());
        let records: Arc<dyn RecordStore> = Arc::new(SledRecordStore::new(db));

        Self {
            _dir: dir,
            objects,
            kv,
            records,
            events: Arc::new(RecordingSink::default()),
            provider: ScriptedProvider::new(),
        }
    }

    pub async fn put_document(&self, path: &str, bytes: &[u8]) {
        self.objects
            .upload(BUCKET, path, bytes.to_vec(), "application/pdf")
            .await
            .unwrap();
    }

    pub fn submitter(&self) -> DocumentSubmitter {
        DocumentSubmitter::new(
            self.provider.clone(),
            self.objects.clone(),
            self.kv.clone(),
            self.records.clone(),
            self.events.clone(),
            BUCKET,
        )
    }

    pub fn poller(&self, poll_interval: Duration) -> ExtractionPoller {
        ExtractionPoller::new(
            self.provider.clone(),
            self.kv.clone(),
            self.records.clone(),
            self.events.clone(),
            poll_interval,
        )
    }

    pub fn gst_validator(&self, api: Option<Arc<dyn GstStatusApi>>) -> GstValidator {
        GstValidator::new(self.records.clone(), api)
    }

    pub fn qr_extractor(&self, decoder: Arc<dyn QrDecoder>, timeout: Duration) -> QrExtractor {
        QrExtractor::new(
            self.objects.clone(),
            decoder,
            self.records.clone(),
            BUCKET,
            timeout,
            DEFAULT_SIGNED_URL_TTL,
        )
    }

    /// Full pipeline over the harness stores. The QR decoder points at a
    /// closed port.
    pub fn pipeline(&self) -> Pipeline {
        let qr_decoder = QrApiClient::new("http://127.0.0.1:9/decode".into(), "t".into()).unwrap();
        Pipeline::new(
            Collaborators {
                provider: self.provider.clone(),
                objects: self.objects.clone(),
                kv: self.kv.clone(),
                records: self.records.clone(),
                events: self.events.clone(),
                gst_api: None,
                qr_decoder,
            },
            PipelineSettings::default(),
        )
    }
}
