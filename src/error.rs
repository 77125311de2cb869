use thiserror::Error;

use crate::{
    choice::{BuildError, TokenError},
    extractor::ExtractError,
    fieldset::{FieldSetError, ParseError},
    forwarder::QueueClosed,
    locale::Catalog,
};

/// Everything that can stop an inbound event from completing its transition.
#[derive(Debug, Error)]
pub enum EditError {
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    #[error("could not parse extraction output: {0}")]
    Parse(#[from] ParseError),

    #[error("extraction output contained no fields")]
    NoFields,

    #[error("invalid selection token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("selected field `{0}` is not in the current field set")]
    UnknownField(String),

    #[error("no field set on record for this user")]
    NoActiveSession,

    #[error("correction received but nothing is pending")]
    NothingPending,

    #[error("correction text is blank")]
    BlankCorrection,

    #[error("field name `{0}` is already in use")]
    NameInUse(String),

    #[error("nothing to submit")]
    NothingToSubmit,

    #[error("could not render choices: {0}")]
    Build(#[from] BuildError),

    #[error("could not queue submission: {0}")]
    Queue(#[from] QueueClosed),
}

impl From<FieldSetError> for EditError {
    fn from(err: FieldSetError) -> Self {
        match err {
            FieldSetError::UnknownField(field) => EditError::UnknownField(field),
            FieldSetError::NameInUse(name) => EditError::NameInUse(name),
        }
    }
}

impl EditError {
    /// Short message for the user. Diagnostic detail stays in the logs.
    pub fn user_message(&self, catalog: &Catalog) -> String {
        match self {
            EditError::Extraction(_) | EditError::Parse(_) | EditError::NoFields => {
                catalog.analysis_failed().to_string()
            }
            EditError::InvalidToken(_) | EditError::UnknownField(_) => {
                catalog.invalid_selection().to_string()
            }
            EditError::NoActiveSession => catalog.image_first().to_string(),
            EditError::NothingPending => catalog.nothing_pending().to_string(),
            EditError::BlankCorrection => catalog.blank_correction().to_string(),
            EditError::NameInUse(name) => catalog.name_in_use(name),
            EditError::NothingToSubmit => catalog.nothing_to_submit().to_string(),
            EditError::Build(BuildError::NameTooLong { .. }) => catalog.name_too_long().to_string(),
            EditError::Build(BuildError::Empty) | EditError::Queue(_) => catalog.generic_error().to_string(),
        }
    }

    /// Failures caused by the user's input rather than by the system.
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            EditError::Extraction(_) | EditError::Build(BuildError::Empty) | EditError::Queue(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locale::Locale;

    #[test]
    fn test_parse_failure_hides_raw_text_from_user() {
        let err: EditError = crate::fieldset::parse("secret diagnostic").unwrap_err().into();
        let msg = err.user_message(&Catalog::new(Locale::En));
        assert!(!msg.contains("secret"));
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn test_field_set_errors_map_to_edit_errors() {
        assert!(matches!(
            EditError::from(FieldSetError::NameInUse("tax".into())),
            EditError::NameInUse(n) if n == "tax"
        ));
        assert!(matches!(
            EditError::from(FieldSetError::UnknownField("x".into())),
            EditError::UnknownField(_)
        ));
    }

    #[test]
    fn test_classification() {
        assert!(EditError::NoActiveSession.is_user_error());
        assert!(!EditError::Queue(QueueClosed).is_user_error());
        assert!(EditError::Build(BuildError::NameTooLong { chars: 400 }).is_user_error());
    }
}
