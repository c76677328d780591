//! End-to-end conversation flows over in-memory collaborators.
//!
//! Drives the state machine exactly as the ingress layer would: one
//! `InboundEvent` at a time, asserting on the reply and on the state the
//! session store ends up holding.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use najah_bot::bot::conversation::{
    CallbackAction, ConversationDeps, InboundEvent, Reply, ReplyKind, SearchConversation,
};
use najah_bot::broadcast::BroadcastEngine;
use najah_bot::config::{BotMode, Credential};
use najah_bot::directory::{
    DirectoryError, ExamResult, SearchResultSet, Student, StudentDirectory, SubjectScore,
};
use najah_bot::dispatch::manager::SingleInterfaceManager;
use najah_bot::dispatch::{
    MessageRef, OutboundPayload, OutboundTransport, ResponseDispatcher, RouterConfig, TokenRouter,
    TransportError,
};
use najah_bot::lookup::{LookupError, ResultLookup, ResultPayload};
use najah_bot::ratelimit::{MokaCounterCache, RateLimiter};
use najah_bot::session::{ConversationState, SessionRecord, SessionStore, StoreError};

// ---------------------------------------------------------------------------
// In-memory collaborators

#[derive(Default)]
struct MemorySessionStore {
    records: Mutex<HashMap<i64, SessionRecord>>,
}

impl MemorySessionStore {
    fn state_of(&self, user_id: i64) -> ConversationState {
        self.records
            .lock()
            .expect("lock")
            .get(&user_id)
            .map(|r| r.state.clone())
            .unwrap_or_default()
    }

    fn seed(&self, user_id: i64, state: ConversationState) {
        self.records
            .lock()
            .expect("lock")
            .insert(user_id, SessionRecord::new(user_id, state));
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, user_id: i64) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.records.lock().expect("lock").get(&user_id).cloned())
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .expect("lock")
            .insert(record.user_id, record.clone());
        Ok(())
    }

    async fn list_user_ids(&self) -> Result<Vec<i64>, StoreError> {
        let mut ids: Vec<i64> = self.records.lock().expect("lock").keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[derive(Default)]
struct FakeDirectory {
    students: Vec<Student>,
    results: HashMap<String, ExamResult>,
    governorates: Vec<String>,
    last_name_query: Mutex<Option<(String, Option<String>)>>,
}

#[async_trait]
impl StudentDirectory for FakeDirectory {
    async fn find_by_name<'a>(
        &self,
        name: &str,
        governorate: Option<&'a str>,
        limit: usize,
        _offset: usize,
    ) -> Result<SearchResultSet, DirectoryError> {
        *self.last_name_query.lock().expect("lock") =
            Some((name.to_string(), governorate.map(str::to_string)));

        let matches: Vec<Student> = self
            .students
            .iter()
            .filter(|s| s.name.contains(name))
            .filter(|s| governorate.is_none() || s.governorate.as_deref() == governorate)
            .cloned()
            .collect();
        let total = matches.len();
        Ok(SearchResultSet {
            students: matches.into_iter().take(limit).collect(),
            total_count: total,
            has_more: total > limit,
        })
    }

    async fn find_by_exam_number(
        &self,
        examno: &str,
    ) -> Result<Option<Student>, DirectoryError> {
        Ok(self.students.iter().find(|s| s.examno == examno).cloned())
    }

    async fn find_result(&self, examno: &str) -> Result<Option<ExamResult>, DirectoryError> {
        Ok(self.results.get(examno).cloned())
    }

    async fn list_governorates(&self) -> Result<Vec<String>, DirectoryError> {
        Ok(self.governorates.clone())
    }
}

struct FakeLookup {
    payload: Option<ResultPayload>,
}

#[async_trait]
impl ResultLookup for FakeLookup {
    async fn lookup(&self, _examno: &str) -> Result<ResultPayload, LookupError> {
        self.payload.clone().ok_or(LookupError::NotFound)
    }
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(i64, String)>>,
    fail_users: HashSet<i64>,
    send_count: AtomicUsize,
}

#[async_trait]
impl OutboundTransport for RecordingTransport {
    async fn send_message(
        &self,
        chat_id: i64,
        payload: &OutboundPayload,
    ) -> Result<MessageRef, TransportError> {
        self.send_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_users.contains(&chat_id) {
            return Err(TransportError("user blocked the bot".into()));
        }
        self.sent
            .lock()
            .expect("lock")
            .push((chat_id, payload.text.clone()));
        Ok(MessageRef {
            chat_id,
            message_id: 1,
        })
    }

    async fn edit_message(
        &self,
        _message: MessageRef,
        _payload: &OutboundPayload,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn answer_callback<'a>(
        &self,
        _callback_id: &str,
        _text: Option<&'a str>,
        _show_alert: bool,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn is_channel_member(
        &self,
        _channel: &str,
        _user_id: i64,
    ) -> Result<bool, TransportError> {
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Harness

struct Harness {
    conversation: SearchConversation,
    sessions: Arc<MemorySessionStore>,
    directory: Arc<FakeDirectory>,
    transport: Arc<RecordingTransport>,
}

struct HarnessConfig {
    directory: FakeDirectory,
    lookup: Option<ResultPayload>,
    admins: HashSet<i64>,
    max_per_window: u32,
    fail_users: HashSet<i64>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            directory: FakeDirectory::default(),
            lookup: None,
            admins: HashSet::new(),
            max_per_window: 100,
            fail_users: HashSet::new(),
        }
    }
}

fn harness(config: HarnessConfig) -> Harness {
    let transport = Arc::new(RecordingTransport {
        fail_users: config.fail_users,
        ..RecordingTransport::default()
    });
    let transport_for_factory = transport.clone();

    let router = TokenRouter::new(
        RouterConfig::new(
            vec![Credential::new("main"), Credential::new("backup")],
            BotMode::SingleInterface,
        )
        .expect("router config"),
    );
    let factory = move |_c: &Credential| {
        transport_for_factory.clone() as Arc<dyn OutboundTransport>
    };
    let manager = Arc::new(SingleInterfaceManager::new(router, &factory));

    let sessions = Arc::new(MemorySessionStore::default());
    let directory = Arc::new(config.directory);
    let dispatcher = Arc::new(ResponseDispatcher::new(manager.clone()));
    let broadcaster = Arc::new(BroadcastEngine::new(
        sessions.clone(),
        dispatcher,
        3,
        Duration::from_millis(1),
    ));

    let conversation = SearchConversation::new(ConversationDeps {
        sessions: sessions.clone(),
        directory: directory.clone(),
        lookup: Arc::new(FakeLookup {
            payload: config.lookup,
        }),
        limiter: RateLimiter::new(Arc::new(MokaCounterCache::default()), config.max_per_window),
        broadcaster,
        manager,
        admins: config.admins,
        required_channel: None,
        page_limit: 5,
    });

    Harness {
        conversation,
        sessions,
        directory,
        transport,
    }
}

fn student(examno: &str, name: &str, governorate: &str) -> Student {
    Student {
        examno: examno.to_string(),
        name: name.to_string(),
        governorate: Some(governorate.to_string()),
        school: Some("إعدادية المنصور".to_string()),
        gender: Some("M".to_string()),
    }
}

fn callback(action: CallbackAction) -> InboundEvent {
    InboundEvent::Callback {
        message: Some(MessageRef {
            chat_id: 7,
            message_id: 100,
        }),
        action,
    }
}

async fn drive(h: &Harness, user_id: i64, event: InboundEvent) -> Reply {
    h.conversation.handle_inbound(user_id, event).await
}

// ---------------------------------------------------------------------------
// Scenario A: name search with governorate narrowing, zero matches

#[tokio::test]
async fn scenario_a_name_search_no_matches() {
    let h = harness(HarnessConfig {
        directory: FakeDirectory {
            governorates: vec!["بغداد".to_string(), "البصرة".to_string()],
            ..FakeDirectory::default()
        },
        ..HarnessConfig::default()
    });
    let user = 7;

    drive(&h, user, InboundEvent::Start).await;
    assert_eq!(h.sessions.state_of(user), ConversationState::MainMenu);

    drive(&h, user, callback(CallbackAction::SearchByName)).await;
    assert_eq!(
        h.sessions.state_of(user),
        ConversationState::WaitingGovernorate
    );

    drive(
        &h,
        user,
        callback(CallbackAction::Governorate("بغداد".to_string())),
    )
    .await;
    assert_eq!(
        h.sessions.state_of(user),
        ConversationState::WaitingName {
            governorate: "بغداد".to_string()
        }
    );

    let reply = drive(&h, user, InboundEvent::Text("محمد علي".to_string())).await;
    assert!(reply.text.contains("محمد علي"));
    assert!(reply.text.contains("بغداد"));
    assert_eq!(h.sessions.state_of(user), ConversationState::MainMenu);
}

#[tokio::test]
async fn governorate_filter_round_trips_into_the_search() {
    let h = harness(HarnessConfig {
        directory: FakeDirectory {
            governorates: vec!["نينوى".to_string()],
            ..FakeDirectory::default()
        },
        ..HarnessConfig::default()
    });
    let user = 8;

    drive(&h, user, callback(CallbackAction::SearchByName)).await;
    drive(
        &h,
        user,
        callback(CallbackAction::Governorate("نينوى".to_string())),
    )
    .await;
    drive(&h, user, InboundEvent::Text("  عبدالله   أحمد ".to_string())).await;

    let query = h
        .directory
        .last_name_query
        .lock()
        .expect("lock")
        .clone()
        .expect("a search ran");
    assert_eq!(query.0, "عبدالله أحمد");
    assert_eq!(query.1.as_deref(), Some("نينوى"));
}

// ---------------------------------------------------------------------------
// Scenario B: exam number cleaning and lookup

#[tokio::test]
async fn scenario_b_decorated_exam_number_cleans_and_looks_up() {
    let mut results = HashMap::new();
    results.insert(
        "272591110430082".to_string(),
        ExamResult {
            examno: "272591110430082".to_string(),
            status: Some("ناجح".to_string()),
            final_grade: Some("520".to_string()),
            final_rate: Some("74.3".to_string()),
            subjects: vec![SubjectScore {
                name: "الرياضيات".to_string(),
                score: "88".to_string(),
            }],
        },
    );
    let h = harness(HarnessConfig {
        directory: FakeDirectory {
            students: vec![student("272591110430082", "محمد علي", "بغداد")],
            results,
            ..FakeDirectory::default()
        },
        ..HarnessConfig::default()
    });
    let user = 9;
    h.sessions.seed(user, ConversationState::WaitingExamNo);

    let reply = drive(
        &h,
        user,
        InboundEvent::Text("272-591-110-430-082".to_string()),
    )
    .await;

    assert!(reply.text.contains("محمد علي"));
    assert!(reply.text.contains("الرياضيات"));
    assert!(reply.text.contains("ناجح"));
    assert_eq!(h.sessions.state_of(user), ConversationState::MainMenu);
}

#[tokio::test]
async fn exam_lookup_falls_back_to_external_api() {
    let payload = ResultPayload {
        name: "محمد علي".to_string(),
        examno: "272591110430082".to_string(),
        status: "ناجح".to_string(),
        ..ResultPayload::default()
    };
    let h = harness(HarnessConfig {
        directory: FakeDirectory {
            students: vec![student("272591110430082", "محمد علي", "بغداد")],
            ..FakeDirectory::default()
        },
        lookup: Some(payload),
        ..HarnessConfig::default()
    });
    let user = 10;
    h.sessions.seed(user, ConversationState::WaitingExamNo);

    let reply = drive(&h, user, InboundEvent::Text("272591110430082".to_string())).await;
    assert!(reply.text.contains("ناجح"));
}

#[tokio::test]
async fn exam_lookup_degrades_to_no_result_card() {
    let h = harness(HarnessConfig {
        directory: FakeDirectory {
            students: vec![student("272591110430082", "محمد علي", "بغداد")],
            ..FakeDirectory::default()
        },
        lookup: None, // external service has nothing either
        ..HarnessConfig::default()
    });
    let user = 11;
    h.sessions.seed(user, ConversationState::WaitingExamNo);

    let reply = drive(&h, user, InboundEvent::Text("272591110430082".to_string())).await;
    assert!(reply.text.contains("محمد علي"));
    assert!(reply.text.contains("لا توجد نتائج متوفرة"));
}

// ---------------------------------------------------------------------------
// Scenario C/D: admin broadcast flow

#[tokio::test]
async fn scenario_c_admin_broadcast_full_flow() {
    let h = harness(HarnessConfig {
        admins: [99].into_iter().collect(),
        ..HarnessConfig::default()
    });

    // Three known users plus the admin
    for id in [1, 2, 3] {
        h.sessions.seed(id, ConversationState::MainMenu);
    }
    let admin = 99;

    drive(&h, admin, InboundEvent::Broadcast).await;
    assert_eq!(
        h.sessions.state_of(admin),
        ConversationState::WaitingBroadcastBody
    );

    drive(&h, admin, InboundEvent::Text("hello".to_string())).await;
    assert_eq!(
        h.sessions.state_of(admin),
        ConversationState::WaitingBroadcastConfirm {
            message: "hello".to_string()
        }
    );

    let reply = drive(&h, admin, InboundEvent::Text("تأكيد".to_string())).await;
    assert_eq!(h.sessions.state_of(admin), ConversationState::MainMenu);
    // Receipt tallies the four targeted users (the admin got a session too)
    assert!(reply.text.contains("تم الإرسال: 4"));
    assert!(reply.text.contains("فشل: 0"));

    let sent = h.transport.sent.lock().expect("lock").clone();
    let broadcast_sends: Vec<_> = sent.iter().filter(|(_, text)| text == "hello").collect();
    assert_eq!(broadcast_sends.len(), 4);
}

#[tokio::test]
async fn broadcast_counts_partial_failures() {
    let h = harness(HarnessConfig {
        admins: [99].into_iter().collect(),
        fail_users: [2].into_iter().collect(),
        ..HarnessConfig::default()
    });
    for id in [1, 2, 3] {
        h.sessions.seed(id, ConversationState::MainMenu);
    }
    h.sessions.seed(99, ConversationState::MainMenu);

    drive(&h, 99, InboundEvent::Broadcast).await;
    drive(&h, 99, InboundEvent::Text("إعلان".to_string())).await;
    let reply = drive(&h, 99, InboundEvent::Text("تأكيد".to_string())).await;

    // User 2 fails through the backend and the primary; sent + failed == 4
    assert!(reply.text.contains("تم الإرسال: 3"));
    assert!(reply.text.contains("فشل: 1"));
}

#[tokio::test]
async fn broadcast_cancel_token_aborts() {
    let h = harness(HarnessConfig {
        admins: [99].into_iter().collect(),
        ..HarnessConfig::default()
    });

    drive(&h, 99, InboundEvent::Broadcast).await;
    drive(&h, 99, InboundEvent::Text("إلغاء".to_string())).await;
    assert_eq!(h.sessions.state_of(99), ConversationState::MainMenu);
}

#[tokio::test]
async fn broadcast_confirm_reprompts_on_other_text() {
    let h = harness(HarnessConfig {
        admins: [99].into_iter().collect(),
        ..HarnessConfig::default()
    });

    drive(&h, 99, InboundEvent::Broadcast).await;
    drive(&h, 99, InboundEvent::Text("hello".to_string())).await;
    let reply = drive(&h, 99, InboundEvent::Text("ماذا؟".to_string())).await;

    assert!(reply.text.contains("تأكيد"));
    assert_eq!(
        h.sessions.state_of(99),
        ConversationState::WaitingBroadcastConfirm {
            message: "hello".to_string()
        }
    );
}

#[tokio::test]
async fn scenario_d_non_admin_broadcast_denied() {
    let h = harness(HarnessConfig {
        admins: [99].into_iter().collect(),
        ..HarnessConfig::default()
    });
    let outsider = 42;
    h.sessions.seed(outsider, ConversationState::MainMenu);

    let reply = drive(&h, outsider, InboundEvent::Broadcast).await;
    assert!(reply.text.contains("للمشرفين"));
    assert_eq!(h.sessions.state_of(outsider), ConversationState::MainMenu);
}

#[tokio::test]
async fn broadcast_with_no_users_returns_zero_result() {
    let h = harness(HarnessConfig::default());
    let result = h.conversation.run_broadcast("إعلان").await.expect("run");
    assert_eq!(result.sent, 0);
    assert_eq!(result.failed, 0);
    assert!(result.duration < Duration::from_secs(1));
}

// ---------------------------------------------------------------------------
// Validation and state idempotence

#[tokio::test]
async fn invalid_name_keeps_waiting_state() {
    let h = harness(HarnessConfig::default());
    let user = 12;
    h.sessions.seed(
        user,
        ConversationState::WaitingName {
            governorate: "بغداد".to_string(),
        },
    );

    let reply = drive(&h, user, InboundEvent::Text("x".to_string())).await;
    assert!(reply.text.contains("اسم غير صحيح"));
    assert_eq!(
        h.sessions.state_of(user),
        ConversationState::WaitingName {
            governorate: "بغداد".to_string()
        }
    );

    // Spam input is also rejected without advancing
    let reply = drive(&h, user, InboundEvent::Text("ااااااا".to_string())).await;
    assert!(reply.text.contains("مدخل غير صحيح"));
    assert_eq!(
        h.sessions.state_of(user),
        ConversationState::WaitingName {
            governorate: "بغداد".to_string()
        }
    );
}

#[tokio::test]
async fn invalid_examno_keeps_waiting_state() {
    let h = harness(HarnessConfig::default());
    let user = 13;
    h.sessions.seed(user, ConversationState::WaitingExamNo);

    let reply = drive(&h, user, InboundEvent::Text("12345".to_string())).await;
    assert!(reply.text.contains("رقم امتحاني غير صحيح"));
    assert_eq!(h.sessions.state_of(user), ConversationState::WaitingExamNo);
}

#[tokio::test]
async fn rate_limited_search_keeps_state_and_throttles() {
    let h = harness(HarnessConfig {
        max_per_window: 1,
        ..HarnessConfig::default()
    });
    let user = 14;
    h.sessions.seed(
        user,
        ConversationState::WaitingName {
            governorate: "بغداد".to_string(),
        },
    );

    // First search consumes the window
    drive(&h, user, InboundEvent::Text("محمد علي".to_string())).await;

    h.sessions.seed(
        user,
        ConversationState::WaitingName {
            governorate: "بغداد".to_string(),
        },
    );
    let reply = drive(&h, user, InboundEvent::Text("محمد علي".to_string())).await;
    assert!(reply.text.contains("تجاوز الحد"));
    assert_eq!(
        h.sessions.state_of(user),
        ConversationState::WaitingName {
            governorate: "بغداد".to_string()
        }
    );
}

// ---------------------------------------------------------------------------
// Result policy: single vs multiple matches

#[tokio::test]
async fn single_match_renders_result_directly() {
    let h = harness(HarnessConfig {
        directory: FakeDirectory {
            students: vec![student("272591110430082", "محمد علي حسن", "بغداد")],
            governorates: vec!["بغداد".to_string()],
            ..FakeDirectory::default()
        },
        ..HarnessConfig::default()
    });
    let user = 15;
    h.sessions.seed(
        user,
        ConversationState::WaitingName {
            governorate: "بغداد".to_string(),
        },
    );

    let reply = drive(&h, user, InboundEvent::Text("محمد علي".to_string())).await;
    // Full card, not a selection list
    assert!(reply.text.contains("الرقم الامتحاني"));
    assert_eq!(h.sessions.state_of(user), ConversationState::MainMenu);
}

#[tokio::test]
async fn multiple_matches_render_selection_list() {
    let h = harness(HarnessConfig {
        directory: FakeDirectory {
            students: vec![
                student("272591110430082", "محمد علي حسن", "بغداد"),
                student("272591110430083", "محمد علي كريم", "بغداد"),
            ],
            governorates: vec!["بغداد".to_string()],
            ..FakeDirectory::default()
        },
        ..HarnessConfig::default()
    });
    let user = 16;
    h.sessions.seed(
        user,
        ConversationState::WaitingName {
            governorate: "بغداد".to_string(),
        },
    );

    let reply = drive(&h, user, InboundEvent::Text("محمد علي".to_string())).await;
    assert!(reply.text.contains("نتائج البحث"));
    let keyboard = reply.keyboard.expect("selection keyboard");
    // two students + new-search + main-menu rows
    assert_eq!(keyboard.inline_keyboard.len(), 4);
}

#[tokio::test]
async fn selecting_a_student_renders_their_result() {
    let h = harness(HarnessConfig {
        directory: FakeDirectory {
            students: vec![student("272591110430082", "محمد علي حسن", "بغداد")],
            ..FakeDirectory::default()
        },
        ..HarnessConfig::default()
    });
    let user = 17;

    let reply = drive(
        &h,
        user,
        callback(CallbackAction::SelectStudent("272591110430082".to_string())),
    )
    .await;
    assert!(matches!(reply.kind, ReplyKind::Edit(_)));
    assert!(reply.text.contains("محمد علي حسن"));
    assert_eq!(h.sessions.state_of(user), ConversationState::MainMenu);
}

#[tokio::test]
async fn stale_governorate_callback_expires_session() {
    let h = harness(HarnessConfig {
        directory: FakeDirectory {
            governorates: vec!["بغداد".to_string()],
            ..FakeDirectory::default()
        },
        ..HarnessConfig::default()
    });
    let user = 18;
    h.sessions.seed(user, ConversationState::MainMenu);

    let reply = drive(
        &h,
        user,
        callback(CallbackAction::Governorate("بغداد".to_string())),
    )
    .await;
    assert!(reply.text.contains("انتهت جلسة البحث"));
    assert_eq!(h.sessions.state_of(user), ConversationState::MainMenu);
}
