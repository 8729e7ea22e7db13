//! Refinement engine
//!
//! The public entry point. One engine owns one session and admits a single
//! writer at a time; a second request either fails fast with
//! [`RefineError::Busy`] or waits its turn, depending on
//! [`ConcurrencyMode`].

use crate::config::{ConcurrencyMode, RefineConfig};
use crate::error::RefineError;
use crate::pipeline::{Collaborators, RefinementPipeline};
use crate::session::Session;
use crate::types::SubmitResponse;
use refine_artifact::{Artifact, ChangeRequest, TargetDescriptor};
use refine_symbol::IdentifierIndex;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Single-writer refinement engine
pub struct RefinementEngine {
    config: RefineConfig,
    pipeline: RefinementPipeline,
    index: Arc<dyn IdentifierIndex>,
    session: Mutex<Session>,
}

impl std::fmt::Debug for RefinementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinementEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RefinementEngine {
    /// Create an engine with an empty session
    ///
    /// # Errors
    /// [`RefineError::Config`] if `config` fails validation
    pub fn new(config: RefineConfig, collaborators: Collaborators) -> Result<Self, RefineError> {
        let session = Session::new(&config);
        Self::with_session(config, collaborators, session)
    }

    /// Create an engine around an existing session
    ///
    /// # Errors
    /// [`RefineError::Config`] if `config` fails validation
    pub fn with_session(
        config: RefineConfig,
        collaborators: Collaborators,
        session: Session,
    ) -> Result<Self, RefineError> {
        config.validate()?;
        let pipeline = RefinementPipeline::new(&config, &collaborators);
        tracing::info!(
            session = %session.id(),
            concurrency = ?config.concurrency,
            visual = config.assessment.enabled && collaborators.assessor.is_some(),
            "refinement engine ready"
        );
        Ok(Self {
            config,
            pipeline,
            index: collaborators.index,
            session: Mutex::new(session),
        })
    }

    /// Validated configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RefineConfig {
        &self.config
    }

    /// Submit a change request
    ///
    /// # Errors
    /// - [`RefineError::InvalidRequest`] for blank text
    /// - [`RefineError::Busy`] in reject mode while another request runs
    /// - [`RefineError::AmbiguityWithoutOptions`] when the request cannot be
    ///   turned into a question
    pub async fn submit_change_request(
        &self,
        text: &str,
        target: Option<TargetDescriptor>,
    ) -> Result<SubmitResponse, RefineError> {
        self.submit_change_request_with_cancel(text, target, CancellationToken::new())
            .await
    }

    /// Submit a change request that can be abandoned through `cancel`
    ///
    /// A cancelled request leaves the session exactly as it was and comes
    /// back as a `REJECTED` response.
    ///
    /// # Errors
    /// Same as [`Self::submit_change_request`]
    #[tracing::instrument(skip_all, fields(chars = text.len()))]
    pub async fn submit_change_request_with_cancel(
        &self,
        text: &str,
        target: Option<TargetDescriptor>,
        cancel: CancellationToken,
    ) -> Result<SubmitResponse, RefineError> {
        if text.trim().is_empty() {
            return Err(RefineError::InvalidRequest("change request text is empty".to_owned()));
        }
        let request = ChangeRequest::new(text.trim(), target);

        let mut guard = self.acquire().await?;
        tracing::info!(request_id = %request.id(), session = %guard.id(), "change request admitted");

        let run = self.pipeline.run(guard.clone(), request, &cancel).await?;
        *guard = run.session;
        tracing::info!(status = %run.response.status, "change request finished");
        Ok(run.response)
    }

    /// Discard the session and start over against the current index
    ///
    /// # Errors
    /// [`RefineError::Busy`] in reject mode while a request runs,
    /// [`RefineError::Index`] if the index view cannot be fetched
    pub async fn reset_session(&self) -> Result<(), RefineError> {
        let mut guard = self.acquire().await?;
        let view = self.index.view().await?;
        guard.reset(view);
        Ok(())
    }

    /// The accepted artifact, if any
    ///
    /// Waits for an in-flight request, so it never observes partial state.
    pub async fn current_artifact(&self) -> Option<Artifact> {
        self.session.lock().await.artifact().cloned()
    }

    /// Copy of the session as of the last completed request
    pub async fn session(&self) -> Session {
        self.session.lock().await.clone()
    }

    async fn acquire(&self) -> Result<MutexGuard<'_, Session>, RefineError> {
        match self.config.concurrency {
            ConcurrencyMode::Reject => self.session.try_lock().map_err(|_| {
                tracing::warn!("change request rejected, session busy");
                RefineError::Busy
            }),
            ConcurrencyMode::Queue => Ok(self.session.lock().await),
        }
    }
}
