use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use receipt_bot::choice::{Aspect, FieldSelection, Selection};
use receipt_bot::editor::{EditSession, EditorSettings, InboundEvent, OutboundAction};
use receipt_bot::extractor::{ExtractError, Extractor};
use receipt_bot::fieldset::FieldSet;
use receipt_bot::forwarder::{
    Collector, CollectorError, Notification, Notifier, RetryPolicy, SubmissionQueue, SubmissionWorker,
};
use receipt_bot::locale::{Catalog, Locale};
use receipt_bot::session::{EditState, InMemorySessionStore, SessionStore};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

/// Answers with a canned extraction per image, keyed by the first byte.
struct ScriptedExtractor;

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, image: &[u8], _mime: &str, _prompt: &str) -> Result<String, ExtractError> {
        Ok(match image.first() {
            Some(b'A') => "```json\n{\"store\": \"Lawson\", \"tax\": 90, \"total\": \"1200\"}\n```".into(),
            Some(b'B') => "{\"store\": \"FamilyMart\", \"total\": 480, \"paid_by\": null}".into(),
            _ => "Sorry, I could not read the receipt.".into(),
        })
    }
}

#[derive(Default)]
struct RecordingCollector {
    received: Mutex<Vec<(String, FieldSet)>>,
}

#[async_trait]
impl Collector for RecordingCollector {
    async fn submit(&self, user_id: &str, fields: &FieldSet) -> Result<(), CollectorError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.received.lock().unwrap().push((user_id.to_string(), fields.clone()));
        Ok(())
    }
}

struct ChannelNotifier(tokio::sync::mpsc::UnboundedSender<(String, Notification)>);

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, user_id: &str, notification: Notification) {
        let _ = self.0.send((user_id.to_string(), notification));
    }
}

struct Harness {
    editor: Arc<EditSession>,
    store: SessionStore,
    collector: Arc<RecordingCollector>,
    notifications: UnboundedReceiver<(String, Notification)>,
    catalog: Catalog,
}

fn harness() -> Harness {
    let catalog = Catalog::new(Locale::En);
    let store: SessionStore = InMemorySessionStore::new(600);
    let collector = Arc::new(RecordingCollector::default());
    let (notify_tx, notifications) = unbounded_channel();

    let (queue, jobs) = SubmissionQueue::new();
    SubmissionWorker::new(collector.clone(), Arc::new(ChannelNotifier(notify_tx)), RetryPolicy::default())
        .spawn(jobs);

    let editor = EditSession::new(
        store.clone(),
        Arc::new(ScriptedExtractor),
        queue,
        EditorSettings {
            catalog,
            ..EditorSettings::default()
        },
    );

    Harness {
        editor: Arc::new(editor),
        store,
        collector,
        notifications,
        catalog,
    }
}

fn pick(field: &str, aspect: Aspect) -> String {
    Selection::Field(FieldSelection::new(field, aspect)).encode()
}

async fn fields_of(h: &Harness, user: &str) -> FieldSet {
    h.store.get(user).await.and_then(|s| s.field_set).unwrap()
}

#[tokio::test]
async fn unreadable_receipt_then_selection_asks_for_an_image() {
    let h = harness();

    let action = h.editor.handle(InboundEvent::image("U1", b"?".to_vec(), "image/jpeg")).await;
    assert_eq!(action, OutboundAction::Error(h.catalog.analysis_failed().into()));

    let action = h.editor.handle(InboundEvent::selection("U1", pick("total", Aspect::Value))).await;
    assert_eq!(action, OutboundAction::Error(h.catalog.image_first().into()));
    assert_eq!(h.editor.state("U1").await, EditState::NoSession);
}

#[tokio::test]
async fn correcting_tax_relabels_the_value_entry() {
    let h = harness();
    h.editor.handle(InboundEvent::image("U1", b"A".to_vec(), "image/jpeg")).await;

    h.editor.handle(InboundEvent::selection("U1", pick("tax", Aspect::Value))).await;
    let action = h.editor.handle(InboundEvent::correction("U1", "50")).await;

    let OutboundAction::ChoiceUi { ui, .. } = action else {
        panic!("expected a refreshed choice UI, got {action:?}");
    };
    let labels: Vec<(&str, &str)> = ui
        .rows
        .iter()
        .map(|r| (r.name.label.as_str(), r.value.label.as_str()))
        .collect();
    assert_eq!(labels, vec![("store", "Lawson"), ("tax", "50"), ("total", "1200")]);
}

#[tokio::test]
async fn new_image_replaces_previous_fields() {
    let h = harness();
    h.editor.handle(InboundEvent::image("U1", b"A".to_vec(), "image/jpeg")).await;
    h.editor.handle(InboundEvent::selection("U1", pick("store", Aspect::Name))).await;
    h.editor.handle(InboundEvent::image("U1", b"B".to_vec(), "image/png")).await;

    let fields = fields_of(&h, "U1").await;
    assert_eq!(fields.names().collect::<Vec<_>>(), vec!["store", "total", "paid_by"]);
    assert_eq!(fields.get("paid_by"), Some(None));
    assert_eq!(h.editor.state("U1").await, EditState::AwaitingSelection);

    // the pending pick from the first receipt is gone
    let action = h.editor.handle(InboundEvent::correction("U1", "shop")).await;
    assert_eq!(action, OutboundAction::Error(h.catalog.nothing_pending().into()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn users_do_not_interfere() {
    let h = harness();
    h.editor.handle(InboundEvent::image("U1", b"A".to_vec(), "image/jpeg")).await;
    h.editor.handle(InboundEvent::image("U2", b"A".to_vec(), "image/jpeg")).await;

    let a = {
        let editor = h.editor.clone();
        tokio::spawn(async move {
            editor.handle(InboundEvent::selection("U1", pick("total", Aspect::Value))).await;
            editor.handle(InboundEvent::correction("U1", "999")).await
        })
    };
    let b = {
        let editor = h.editor.clone();
        tokio::spawn(async move {
            editor.handle(InboundEvent::selection("U2", pick("total", Aspect::Name))).await;
            editor.handle(InboundEvent::correction("U2", "grand total")).await
        })
    };
    a.await.unwrap();
    b.await.unwrap();

    let u1 = fields_of(&h, "U1").await;
    let u2 = fields_of(&h, "U2").await;
    assert_eq!(u1.get("total"), Some(Some("999")));
    assert!(!u1.contains("grand total"));
    assert_eq!(u2.get("grand total"), Some(Some("1200")));
    assert!(!u2.contains("total"));
}

#[tokio::test]
async fn submit_acks_now_and_notifies_later() {
    let mut h = harness();
    h.editor.handle(InboundEvent::image("U1", b"A".to_vec(), "image/jpeg")).await;
    h.editor.handle(InboundEvent::selection("U1", pick("total", Aspect::Value))).await;
    h.editor.handle(InboundEvent::correction("U1", "1300")).await;

    let action = h.editor.handle(InboundEvent::selection("U1", Selection::Submit.encode())).await;
    assert_eq!(action, OutboundAction::Ack(h.catalog.submit_ack().into()));
    assert_eq!(h.editor.state("U1").await, EditState::AwaitingSubmissionResult);

    let (user, notification) = tokio::time::timeout(Duration::from_secs(5), h.notifications.recv())
        .await
        .expect("notification within 5s")
        .expect("notifier alive");
    assert_eq!(user, "U1");
    assert_eq!(notification, Notification::Submitted);

    let received = h.collector.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].1.get("total"), Some(Some("1300")));
}

#[tokio::test]
async fn submission_outcome_arrives_despite_later_edits() {
    let mut h = harness();
    h.editor.handle(InboundEvent::image("U1", b"A".to_vec(), "image/jpeg")).await;
    h.editor.handle(InboundEvent::selection("U1", pick("total", Aspect::Value))).await;
    h.editor.handle(InboundEvent::correction("U1", "1300")).await;

    let action = h.editor.handle(InboundEvent::selection("U1", Selection::Submit.encode())).await;
    assert_eq!(action, OutboundAction::Ack(h.catalog.submit_ack().into()));

    // keep editing before the collector has answered
    let action = h.editor.handle(InboundEvent::selection("U1", pick("total", Aspect::Value))).await;
    assert!(matches!(action, OutboundAction::TextPrompt(_)));
    let action = h.editor.handle(InboundEvent::correction("U1", "9999")).await;
    assert!(matches!(action, OutboundAction::ChoiceUi { .. }));
    let action = h.editor.handle(InboundEvent::image("U1", b"B".to_vec(), "image/png")).await;
    assert!(matches!(action, OutboundAction::ChoiceUi { .. }));

    let (user, notification) = tokio::time::timeout(Duration::from_secs(5), h.notifications.recv())
        .await
        .expect("notification within 5s")
        .expect("notifier alive");
    assert_eq!(user, "U1");
    assert_eq!(notification, Notification::Submitted);

    let received = h.collector.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].1.get("total"), Some(Some("1300")));
    assert_eq!(received[0].1.get("store"), Some(Some("Lawson")));
    drop(received);

    assert_eq!(fields_of(&h, "U1").await.get("store"), Some(Some("FamilyMart")));
    assert!(h.notifications.try_recv().is_err());
}

#[tokio::test]
async fn concurrent_events_for_one_user_are_serialized() {
    let h = harness();
    h.editor.handle(InboundEvent::image("U1", b"A".to_vec(), "image/jpeg")).await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let editor = h.editor.clone();
        handles.push(tokio::spawn(async move {
            editor.handle(InboundEvent::selection("U1", pick("total", Aspect::Value))).await;
            editor.handle(InboundEvent::correction("U1", i.to_string())).await
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // every event saw a consistent session, so the field set is intact
    let fields = fields_of(&h, "U1").await;
    assert_eq!(fields.len(), 3);
    let total: u32 = fields.get("total").flatten().unwrap().parse().unwrap();
    assert!(total < 20);
}
