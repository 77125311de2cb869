//! Per-user edit flow.
//!
//! ```text
//! NoSession ──image──▶ AwaitingSelection ──pick field──▶ AwaitingCorrection
//!                        ▲        │                              │
//!                        └────────┼──────── correction text ─────┘
//!                                 └──submit──▶ AwaitingSubmissionResult
//! ```
//!
//! A new image always starts over with a fresh field set. Every transition
//! runs under the user's session lock and commits all-or-nothing.
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tracing::{error, info, warn};

use crate::{
    choice::{Aspect, ChoiceUi, ChoiceUiBuilder, ConfirmationUi, FieldSelection, Selection},
    error::EditError,
    extractor::{Extractor, RECEIPT_PROMPT},
    fieldset::{self, RenamePolicy},
    forwarder::{SubmissionJob, SubmissionQueue},
    locale::Catalog,
    session::{EditState, Session, SessionStore, state_of},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub user_id: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    ImageSubmitted { image: Vec<u8>, mime_type: String },
    SelectionMade { token: String },
    CorrectionTextEntered { text: String },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ImageSubmitted { .. } => "image_submitted",
            EventKind::SelectionMade { .. } => "selection_made",
            EventKind::CorrectionTextEntered { .. } => "correction_text_entered",
        }
    }
}

impl InboundEvent {
    pub fn image(user_id: impl Into<String>, image: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            kind: EventKind::ImageSubmitted { image, mime_type: mime_type.into() },
        }
    }

    pub fn selection(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            kind: EventKind::SelectionMade { token: token.into() },
        }
    }

    pub fn correction(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            kind: EventKind::CorrectionTextEntered { text: text.into() },
        }
    }
}

/// What the transport should send back for an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    ChoiceUi {
        notice: Option<String>,
        ui: ChoiceUi,
        confirmation: ConfirmationUi,
    },
    TextPrompt(String),
    Error(String),
    Ack(String),
}

#[derive(Debug, Clone)]
pub struct EditorSettings {
    pub label_width: usize,
    pub rename_policy: RenamePolicy,
    pub catalog: Catalog,
    pub prompt: String,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            label_width: crate::choice::DEFAULT_LABEL_WIDTH,
            rename_policy: RenamePolicy::default(),
            catalog: Catalog::default(),
            prompt: RECEIPT_PROMPT.to_string(),
        }
    }
}

/// The edit-session state machine. Cheap to share behind an `Arc`.
pub struct EditSession {
    store: SessionStore,
    extractor: Arc<dyn Extractor>,
    submissions: SubmissionQueue,
    builder: ChoiceUiBuilder,
    catalog: Catalog,
    rename_policy: RenamePolicy,
    prompt: String,
}

impl EditSession {
    pub fn new(
        store: SessionStore,
        extractor: Arc<dyn Extractor>,
        submissions: SubmissionQueue,
        settings: EditorSettings,
    ) -> Self {
        Self {
            store,
            extractor,
            submissions,
            builder: ChoiceUiBuilder::new(settings.label_width, settings.catalog),
            catalog: settings.catalog,
            rename_policy: settings.rename_policy,
            prompt: settings.prompt,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub async fn state(&self, user_id: &str) -> EditState {
        state_of(self.store.get(user_id).await.as_ref())
    }

    /// Handles one event to completion. Never fails and never panics: errors
    /// and panics become an [`OutboundAction::Error`] and leave the session
    /// as it was before the event.
    pub async fn handle(&self, event: InboundEvent) -> OutboundAction {
        let user_id = event.user_id.clone();
        let kind = event.kind.name();

        match AssertUnwindSafe(self.dispatch(event)).catch_unwind().await {
            Ok(Ok(action)) => action,
            Ok(Err(err)) => {
                if err.is_user_error() {
                    warn!(%user_id, event = kind, error = %err, "event rejected");
                } else {
                    error!(%user_id, event = kind, error = %err, "event failed");
                }
                OutboundAction::Error(err.user_message(&self.catalog))
            }
            Err(panic) => {
                error!(%user_id, event = kind, "panic while handling event: {}", panic_message(&*panic));
                OutboundAction::Error(self.catalog.generic_error().to_string())
            }
        }
    }

    async fn dispatch(&self, event: InboundEvent) -> Result<OutboundAction, EditError> {
        let InboundEvent { user_id, kind } = event;
        match kind {
            EventKind::ImageSubmitted { image, mime_type } => {
                self.replace_from_image(&user_id, &image, &mime_type).await
            }
            EventKind::SelectionMade { token } => self.select(&user_id, &token).await,
            EventKind::CorrectionTextEntered { text } => self.correct(&user_id, &text).await,
        }
    }

    /// Replaces the user's field set with one extracted from `image`.
    /// Extraction runs under the user's lock, so a pick sent while the model
    /// is still reading the receipt applies to the new fields.
    async fn replace_from_image(&self, user_id: &str, image: &[u8], mime_type: &str) -> Result<OutboundAction, EditError> {
        self.store
            .update_async(user_id, |_previous| async move {
                let raw = self.extractor.extract(image, mime_type, &self.prompt).await?;
                let fields = fieldset::parse(&raw).inspect_err(|err| {
                    warn!(%user_id, raw = err.raw(), "extraction output is not a field set");
                })?;
                if fields.is_empty() {
                    warn!(%user_id, %raw, "extraction output has no fields");
                    return Err(EditError::NoFields);
                }

                let ui = self.builder.build(&fields)?;
                info!(%user_id, fields = fields.len(), state = ?EditState::AwaitingSelection, "field set replaced");
                let action = OutboundAction::ChoiceUi {
                    notice: None,
                    ui,
                    confirmation: self.builder.build_confirmation(),
                };
                Ok((Some(Session::new(fields)), action))
            })
            .await
    }

    async fn select(&self, user_id: &str, token: &str) -> Result<OutboundAction, EditError> {
        self.store
            .update(user_id, |slot| {
                let session = active(slot)?;
                let fields = session.field_set.as_ref().ok_or(EditError::NoActiveSession)?;

                match Selection::decode(token)? {
                    Selection::Field(selection) => {
                        if !fields.contains(&selection.field) {
                            return Err(EditError::UnknownField(selection.field));
                        }
                        let prompt = self.catalog.prompt_for(&selection.field, selection.aspect);
                        info!(%user_id, field = %selection.field, aspect = ?selection.aspect,
                            state = ?EditState::AwaitingCorrection, "field selected");
                        session.pending = Some(selection);
                        session.submitted_at = None;
                        session.touch();
                        Ok(OutboundAction::TextPrompt(prompt))
                    }
                    Selection::Submit => {
                        if fields.is_empty() {
                            return Err(EditError::NothingToSubmit);
                        }
                        self.submissions.enqueue(SubmissionJob {
                            user_id: user_id.to_string(),
                            fields: fields.clone(),
                        })?;
                        session.pending = None;
                        session.submitted_at = Some(Utc::now());
                        session.touch();
                        info!(%user_id, state = ?EditState::AwaitingSubmissionResult, "submission queued");
                        Ok(OutboundAction::Ack(self.catalog.submit_ack().to_string()))
                    }
                }
            })
            .await
    }

    async fn correct(&self, user_id: &str, text: &str) -> Result<OutboundAction, EditError> {
        let text = text.trim();
        self.store
            .update(user_id, |slot| {
                let session = active(slot)?;
                let FieldSelection { field, aspect } =
                    session.pending.clone().ok_or(EditError::NothingPending)?;
                let fields = session.field_set.as_mut().ok_or(EditError::NoActiveSession)?;

                if !fields.contains(&field) {
                    return Err(EditError::NothingPending);
                }
                if text.is_empty() {
                    return Err(EditError::BlankCorrection);
                }

                match aspect {
                    Aspect::Name => fields.rename(&field, text, self.rename_policy)?,
                    Aspect::Value => fields.set_value(&field, text)?,
                }
                let ui = self.builder.build(fields)?;

                session.pending = None;
                session.touch();
                info!(%user_id, %field, ?aspect, state = ?EditState::AwaitingSelection, "field corrected");
                Ok(OutboundAction::ChoiceUi {
                    notice: Some(self.catalog.updated(&field, aspect, text)),
                    ui,
                    confirmation: self.builder.build_confirmation(),
                })
            })
            .await
    }
}

/// The session of a user who has submitted at least one image.
fn active(slot: &mut Option<Session>) -> Result<&mut Session, EditError> {
    match slot {
        Some(session) if session.field_set.is_some() => Ok(session),
        _ => Err(EditError::NoActiveSession),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
