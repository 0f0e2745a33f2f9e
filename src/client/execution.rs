//! 请求执行：生成请求与批量 RPC。
//!
//! Request execution: streaming generate and batch-execute calls. A single
//! attempt lives in `open_generate`; retry policy wraps it in the callers.

use crate::client::auth::AuthContext;
use crate::client::core::CredentialedSession;
use crate::client::upload::FileInput;
use crate::constants::{gemini_headers, GrpcId, ModelSelector, HEADER_MODEL};
use crate::pipeline::{collect, decode_envelopes, reconcile::reconcile_stream, retry_stream, with_retry};
use crate::pipeline::ResponseReconciler;
use crate::types::{ConversationHandle, ConversationState, GemRef, ModelOutput, PartialModelOutput, RpcData};
use crate::{BoxStream, Error, Result};
use futures::StreamExt;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

const REQUEST_SLOTS: usize = 69;
const SLOT_MESSAGE: usize = 0;
const SLOT_CONVERSATION: usize = 2;
const SLOT_SNAPSHOT_STREAMING: usize = 7;
const SLOT_GEM: usize = 19;

/// Parameters of one generate call.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub prompt: String,
    pub files: Vec<FileInput>,
    pub model: ModelSelector,
    pub gem: Option<GemRef>,
    /// Continue this conversation; a fresh one is started when `None`.
    pub conversation: Option<ConversationHandle>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn file(mut self, file: impl Into<FileInput>) -> Self {
        self.files.push(file.into());
        self
    }

    pub fn model(mut self, model: ModelSelector) -> Self {
        self.model = model;
        self
    }

    pub fn gem(mut self, gem: impl Into<GemRef>) -> Self {
        self.gem = Some(gem.into());
        self
    }

    pub fn conversation(mut self, handle: ConversationHandle) -> Self {
        self.conversation = Some(handle);
        self
    }

    /// The handle that receives conversation updates, created on first use.
    fn conversation_handle(&mut self) -> ConversationHandle {
        self.conversation
            .get_or_insert_with(ConversationHandle::new)
            .clone()
    }
}

/// Conversation updates of one attempt, kept in a private handle.
///
/// Every yielded partial and the end of the attempt commit them into the
/// caller's handle. A failed attempt commits nothing, so a retry never
/// continues a thread the service opened for the abandoned attempt.
struct AttemptConversation {
    scratch: ConversationHandle,
    target: ConversationHandle,
    failed: bool,
}

impl AttemptConversation {
    fn new(seed: &ConversationState, target: ConversationHandle) -> Self {
        Self {
            scratch: ConversationHandle::with_state(seed.clone()),
            target,
            failed: false,
        }
    }

    fn commit(&self) {
        self.target.absorb(&self.scratch);
    }

    fn track(
        mut self,
        partials: BoxStream<'static, PartialModelOutput>,
    ) -> BoxStream<'static, PartialModelOutput> {
        Box::pin(partials.map(move |item| {
            match &item {
                Ok(_) => self.commit(),
                Err(_) => self.failed = true,
            }
            item
        }))
    }
}

impl Drop for AttemptConversation {
    fn drop(&mut self) {
        if !self.failed {
            self.commit();
        }
    }
}

/// The doubly JSON-encoded `f.req` form field of a generate call.
pub fn build_generate_payload(
    prompt: &str,
    files: &[(String, String)],
    conversation: &Value,
    gem_id: Option<&str>,
) -> String {
    let files: Vec<Value> = files
        .iter()
        .map(|(id, name)| json!([[id], name]))
        .collect();
    let mut inner = vec![Value::Null; REQUEST_SLOTS];
    inner[SLOT_MESSAGE] = json!([prompt, 0, null, files, null, null, 0]);
    inner[SLOT_CONVERSATION] = conversation.clone();
    inner[SLOT_SNAPSHOT_STREAMING] = json!(1);
    if let Some(id) = gem_id {
        inner[SLOT_GEM] = json!(id);
    }
    json!([null, Value::Array(inner).to_string()]).to_string()
}

fn session_query(auth: &AuthContext, reqid: u64) -> Vec<(&'static str, String)> {
    let mut query = vec![("_reqid", reqid.to_string()), ("rt", "c".to_string())];
    if let Some(bl) = &auth.build_label {
        query.push(("bl", bl.clone()));
    }
    if let Some(sid) = &auth.session_id {
        query.push(("f.sid", sid.clone()));
    }
    query
}

impl CredentialedSession {
    /// Generate a reply and wait for the complete output.
    ///
    /// Transient and protocol failures are retried per the session's
    /// [`RetryPolicy`](crate::pipeline::RetryPolicy).
    pub async fn generate(&self, mut request: GenerateRequest) -> Result<ModelOutput> {
        if request.prompt.is_empty() {
            return Err(Error::Validation("Prompt cannot be empty".to_string()));
        }
        let handle = request.conversation_handle();
        let seed = Arc::new(handle.state());
        let request = Arc::new(request);
        let policy = self.options().retry;
        with_retry(&policy, || {
            let request = request.clone();
            let seed = seed.clone();
            let handle = handle.clone();
            async move { collect(self.open_attempt(request, seed, handle).await?).await }
        })
        .await
    }

    /// Generate a reply as a lazy stream of partial outputs.
    ///
    /// Each call issues a new request. Only failures before the first partial
    /// are retried; dropping the stream leaves the session running and the
    /// conversation holds every update seen so far.
    pub fn generate_stream(&self, mut request: GenerateRequest) -> BoxStream<'static, PartialModelOutput> {
        if request.prompt.is_empty() {
            let err = Error::Validation("Prompt cannot be empty".to_string());
            return Box::pin(futures::stream::once(async move { Err(err) }));
        }
        let handle = request.conversation_handle();
        let seed = Arc::new(handle.state());
        let request = Arc::new(request);
        let session = self.clone();
        retry_stream(self.options().retry, move || {
            let session = session.clone();
            let request = request.clone();
            let seed = seed.clone();
            let handle = handle.clone();
            async move { session.open_attempt(request, seed, handle).await }
        })
    }

    /// Every attempt starts from `seed`, the conversation as it was before
    /// the first one.
    async fn open_attempt(
        &self,
        request: Arc<GenerateRequest>,
        seed: Arc<ConversationState>,
        target: ConversationHandle,
    ) -> Result<BoxStream<'static, PartialModelOutput>> {
        let mut attempt = AttemptConversation::new(&seed, target);
        match self.open_generate(request, attempt.scratch.clone()).await {
            Ok(partials) => Ok(attempt.track(partials)),
            Err(e) => {
                attempt.failed = true;
                Err(e)
            }
        }
    }

    /// One attempt: send the request and wire its body through the pipeline.
    async fn open_generate(
        &self,
        request: Arc<GenerateRequest>,
        handle: ConversationHandle,
    ) -> Result<BoxStream<'static, PartialModelOutput>> {
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "generate",
            request_id = %request_id,
            account_id = self.account_id().unwrap_or("-"),
            model = request.model.name()
        );
        let session = self.clone();
        async move {
            let auth = session.auth_snapshot().await?;
            session.reset_idle_timer();

            let files = session.upload_files(&auth, &request.files).await?;
            let payload = build_generate_payload(
                &request.prompt,
                &files,
                &handle.state().to_request_value(),
                request.gem.as_ref().map(GemRef::id),
            );

            let inner = &session.inner;
            let mut req = inner
                .transport
                .request(Method::POST, &inner.options.endpoints.generate, &auth.cookies, true)
                .query(&session_query(&auth, session.next_reqid()))
                .form(&[("at", auth.access_token.as_str()), ("f.req", payload.as_str())]);
            for (k, v) in gemini_headers() {
                req = req.header(k, v);
            }
            if let Some(model_header) = request.model.header_value() {
                req = req.header(HEADER_MODEL, model_header);
            }

            let resp = inner.transport.send(req).await.map_err(|e| inner.tag(e))?;
            let status = resp.status();
            if !status.is_success() {
                session.close_now();
                warn!(status = status.as_u16(), "generate request failed, session closed");
                return Err(inner.tag(Error::from_status(status.as_u16(), "generate")));
            }
            info!(status = status.as_u16(), "generate stream opened");

            let envelopes = decode_envelopes(inner.transport.byte_stream(resp));
            let partials = reconcile_stream(envelopes, ResponseReconciler::with_conversation(handle));
            let guarded = session.clone();
            let stream = partials.map(move |item| {
                item.map_err(|e| {
                    if matches!(e, Error::Protocol { .. }) {
                        // Next call re-initializes.
                        guarded.close_now();
                    }
                    guarded.inner.tag(e)
                })
            });
            Ok(Box::pin(stream) as BoxStream<'static, PartialModelOutput>)
        }
        .instrument(span)
        .await
    }

    async fn upload_files(&self, auth: &AuthContext, files: &[FileInput]) -> Result<Vec<(String, String)>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        self.batch_execute_with(auth, &[bard_activity()]).await?;
        let mut out = Vec::with_capacity(files.len());
        for file in files {
            let uploaded = self
                .inner
                .uploader
                .upload(&self.inner.transport, &auth.cookies, file)
                .await
                .map_err(|e| self.inner.tag(e))?;
            out.push((uploaded.id, uploaded.name));
        }
        Ok(out)
    }

    /// Send one or more RPC calls in a single batch request and return the raw body.
    pub async fn batch_execute(&self, calls: &[RpcData]) -> Result<String> {
        let auth = self.auth_snapshot().await?;
        self.reset_idle_timer();
        self.batch_execute_with(&auth, calls).await
    }

    async fn batch_execute_with(&self, auth: &AuthContext, calls: &[RpcData]) -> Result<String> {
        let inner = &self.inner;
        let rpcids: Vec<&str> = calls.iter().map(|c| c.rpc_id.as_str()).collect();
        let f_req = json!([calls.iter().map(RpcData::serialize).collect::<Vec<_>>()]).to_string();

        let mut query = session_query(auth, self.next_reqid());
        query.push(("rpcids", rpcids.join(",")));
        query.push(("source-path", "/app".to_string()));

        let mut req = inner
            .transport
            .request(Method::POST, &inner.options.endpoints.batch_exec, &auth.cookies, false)
            .query(&query)
            .form(&[("at", auth.access_token.as_str()), ("f.req", f_req.as_str())]);
        for (k, v) in gemini_headers() {
            req = req.header(k, v);
        }

        let resp = inner.transport.send(req).await.map_err(|e| inner.tag(e))?;
        let status = resp.status();
        if !status.is_success() {
            self.close_now();
            return Err(inner.tag(Error::from_status(status.as_u16(), "batch execute")));
        }
        debug!(rpcids = %rpcids.join(","), "batch execute succeeded");
        Ok(resp.text().await?)
    }
}

fn bard_activity() -> RpcData {
    RpcData::new(GrpcId::BardActivity, r#"[[["bard_activity_enabled"]]]"#)
}
