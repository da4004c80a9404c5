//! Stimulus/response capture.
//!
//! Turns input events on an experiment page into explicit actions: answer
//! with reaction time, begin, quit. A [`CaptureSession`] holds the per-page
//! state (stimulus onset and the first-answer latch); the caller performs the
//! returned navigation or form submission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::AppResult;
use crate::page::PageContext;
use crate::session_sync::{Route, SessionSyncClient};

/// Enter: begin the experiment.
pub const KEYCODE_ENTER: u32 = 13;
/// Left arrow: answer `"1"`.
pub const KEYCODE_LEFT_ARROW: u32 = 37;
/// Right arrow: answer `"0"`.
pub const KEYCODE_RIGHT_ARROW: u32 = 39;
/// `q`: quit to the base URL.
pub const KEYCODE_Q: u32 = 81;

/// Session key under which the answer time is mirrored.
pub const ANSWER_TIME_KEY: &str = "expe_answer_time";

/// Keys the capture reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// Begin the experiment.
    Enter,
    /// Leave the experiment.
    Quit,
    /// Left answer.
    LeftArrow,
    /// Right answer.
    RightArrow,
    /// Any key without a binding.
    Other(u32),
}

impl Key {
    /// Map a DOM key code.
    pub fn from_code(code: u32) -> Self {
        match code {
            KEYCODE_ENTER => Key::Enter,
            KEYCODE_Q => Key::Quit,
            KEYCODE_LEFT_ARROW => Key::LeftArrow,
            KEYCODE_RIGHT_ARROW => Key::RightArrow,
            other => Key::Other(other),
        }
    }
}

/// Binary answer given with the arrow keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Answer {
    /// Left arrow.
    Left,
    /// Right arrow.
    Right,
}

impl Answer {
    /// Code sent to the server: left is `"1"`, right is `"0"`.
    pub fn code(&self) -> &'static str {
        match self {
            Answer::Left => "1",
            Answer::Right => "0",
        }
    }
}

/// How a key answer leaves the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    /// Fill the quest form and submit it.
    Form,
    /// Mirror the answer time, then navigate to the next trial.
    #[default]
    Navigate,
}

/// Hidden-field values to submit with an answer form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormSubmission {
    /// Name of the hidden reaction-time field.
    pub time_field: String,
    /// Name of the hidden answer field.
    pub value_field: String,
    /// Milliseconds from stimulus onset to the answer.
    pub answer_time_ms: u64,
    /// Submitted answer.
    pub answer_value: String,
}

impl FormSubmission {
    /// Answer form of the quest pages.
    pub fn quest(answer_time_ms: u64, answer_value: impl Into<String>) -> Self {
        Self {
            time_field: "quest-answer-time".to_string(),
            value_field: "quest-answer-value".to_string(),
            answer_time_ms,
            answer_value: answer_value.into(),
        }
    }

    /// Answer form of the binary-button pages.
    pub fn binary(answer_time_ms: u64, answer_value: impl Into<String>) -> Self {
        Self {
            time_field: "binary-answer-time".to_string(),
            value_field: "binary-answer-value".to_string(),
            answer_time_ms,
            answer_value: answer_value.into(),
        }
    }

    /// Field name/value pairs in submission order.
    pub fn fields(&self) -> Vec<(String, String)> {
        vec![
            (self.time_field.clone(), self.answer_time_ms.to_string()),
            (self.value_field.clone(), self.answer_value.clone()),
        ]
    }
}

/// Where an accepted answer goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerTarget {
    /// Fill and submit the answer form.
    Submit(FormSubmission),
    /// Load the next trial.
    Navigate {
        /// Next-trial address.
        url: String,
    },
}

/// Decision for one key event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Leave the experiment.
    Quit {
        /// Quit destination.
        url: String,
    },
    /// Reload the page with the experiment started.
    Begin {
        /// Current page with `begin=true`.
        url: String,
    },
    /// First accepted answer of the page.
    Answer {
        /// Which arrow was pressed.
        answer: Answer,
        /// Reaction time in milliseconds.
        answer_time_ms: u64,
        /// Where the answer goes.
        target: AnswerTarget,
    },
    /// The key has no effect.
    Ignored(IgnoreReason),
}

/// Why a key had no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// An answer was already accepted on this page.
    Latched,
    /// Trial page whose experiment has not begun.
    NotStarted,
    /// Enter on a page that already began.
    AlreadyBegun,
    /// Trial page whose experiment has ended.
    Ended,
    /// No stimulus onset recorded yet.
    StimulusNotVisible,
    /// Key without a binding.
    UnboundKey,
}

/// Per-page capture state.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    page: PageContext,
    mode: AnswerMode,
    stimulus_at: Option<DateTime<Utc>>,
    latched: bool,
}

impl CaptureSession {
    /// Start capturing on `page`.
    pub fn new(page: PageContext, mode: AnswerMode) -> Self {
        Self {
            page,
            mode,
            stimulus_at: None,
            latched: false,
        }
    }

    /// Page this session captures on.
    pub fn page(&self) -> &PageContext {
        &self.page
    }

    /// Record the moment the stimulus became visible.
    ///
    /// Ignored once the experiment has ended or when onset is already known.
    /// Returns whether the onset was recorded.
    pub fn stimulus_visible(&mut self, at: DateTime<Utc>) -> bool {
        if self.page.end_expe || self.stimulus_at.is_some() {
            return false;
        }
        self.stimulus_at = Some(at);
        debug!(at = %at, "Stimulus visible");
        true
    }

    /// Whether an answer was already accepted.
    pub fn is_latched(&self) -> bool {
        self.latched
    }

    fn elapsed_ms(&self, now: DateTime<Utc>) -> Option<u64> {
        self.stimulus_at
            .map(|start| (now - start).num_milliseconds().max(0) as u64)
    }

    /// Decide what a keydown with `code` does.
    pub fn handle_key(&mut self, code: u32, now: DateTime<Utc>) -> KeyAction {
        match Key::from_code(code) {
            Key::Quit => KeyAction::Quit {
                url: self.page.base_url.clone(),
            },
            Key::Enter => {
                if self.page.begin_expe {
                    KeyAction::Ignored(IgnoreReason::AlreadyBegun)
                } else {
                    KeyAction::Begin {
                        url: format!("{}&begin=true", self.page.current_url),
                    }
                }
            }
            Key::LeftArrow => self.answer(Answer::Left, now),
            Key::RightArrow => self.answer(Answer::Right, now),
            Key::Other(_) => KeyAction::Ignored(IgnoreReason::UnboundKey),
        }
    }

    fn answer(&mut self, answer: Answer, now: DateTime<Utc>) -> KeyAction {
        if self.latched {
            return KeyAction::Ignored(IgnoreReason::Latched);
        }
        // Quest forms answer as soon as the stimulus shows; trial pages
        // only between begin and end
        if self.mode == AnswerMode::Navigate {
            if !self.page.begin_expe {
                return KeyAction::Ignored(IgnoreReason::NotStarted);
            }
            if self.page.end_expe {
                return KeyAction::Ignored(IgnoreReason::Ended);
            }
        }
        let Some(answer_time_ms) = self.elapsed_ms(now) else {
            return KeyAction::Ignored(IgnoreReason::StimulusNotVisible);
        };

        self.latched = true;
        info!(answer = answer.code(), answer_time_ms, "Answer captured");

        let target = match self.mode {
            AnswerMode::Form => AnswerTarget::Submit(FormSubmission::quest(
                answer_time_ms,
                answer.code(),
            )),
            AnswerMode::Navigate => AnswerTarget::Navigate {
                url: self.next_trial_url(answer),
            },
        };

        KeyAction::Answer {
            answer,
            answer_time_ms,
            target,
        }
    }

    fn next_trial_url(&self, answer: Answer) -> String {
        let expe = self
            .page
            .query
            .expe
            .as_deref()
            .or(self.page.expe_name.as_deref())
            .unwrap_or_default();

        format!(
            "{}?expe={}&iteration={}&answer={}",
            self.page.expe_url,
            expe,
            self.page.query.next_iteration(),
            answer.code()
        )
    }

    /// Button-based answer: the focused control's value plus reaction time.
    ///
    /// `None` until the stimulus has been shown.
    pub fn handle_submit(
        &mut self,
        focused_value: &str,
        now: DateTime<Utc>,
    ) -> Option<FormSubmission> {
        let answer_time_ms = self.elapsed_ms(now)?;
        info!(answer = %focused_value, answer_time_ms, "Button answer captured");
        Some(FormSubmission::binary(answer_time_ms, focused_value))
    }
}

/// What the page has to do after a key action was dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Load this address.
    Navigate(String),
    /// Submit the answer form.
    Submit(FormSubmission),
    /// Stay on the page.
    Nothing,
}

/// Performs the server side of key actions.
#[derive(Clone)]
pub struct CaptureDriver {
    client: SessionSyncClient,
}

impl CaptureDriver {
    /// Create a driver posting through `client`.
    pub fn new(client: SessionSyncClient) -> Self {
        Self { client }
    }

    /// Carry out `action`. Navigating answers mirror the answer time first
    /// and only navigate once the session update succeeded.
    pub async fn dispatch(&self, action: KeyAction) -> AppResult<Dispatch> {
        match action {
            KeyAction::Quit { url } | KeyAction::Begin { url } => Ok(Dispatch::Navigate(url)),
            KeyAction::Answer {
                answer_time_ms,
                target: AnswerTarget::Navigate { url },
                ..
            } => {
                self.client
                    .post_update(
                        Route::UpdateSessionUserExpes,
                        ANSWER_TIME_KEY,
                        &answer_time_ms.to_string(),
                    )
                    .await?;
                Ok(Dispatch::Navigate(url))
            }
            KeyAction::Answer {
                target: AnswerTarget::Submit(form),
                ..
            } => Ok(Dispatch::Submit(form)),
            KeyAction::Ignored(reason) => {
                debug!(reason = ?reason, "Key ignored");
                Ok(Dispatch::Nothing)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn running_page() -> PageContext {
        PageContext::new("/expe?expe=quest&iteration=2")
            .with_begin(true)
            .with_base_url("/")
            .with_expe_url("/expe")
    }

    fn started(page: PageContext, mode: AnswerMode) -> (CaptureSession, DateTime<Utc>) {
        let start = Utc::now();
        let mut session = CaptureSession::new(page, mode);
        assert!(session.stimulus_visible(start));
        (session, start)
    }

    #[test]
    fn test_left_arrow_answers_one() {
        let (mut session, start) = started(running_page(), AnswerMode::Navigate);
        let action = session.handle_key(KEYCODE_LEFT_ARROW, start + Duration::milliseconds(640));

        assert_eq!(
            action,
            KeyAction::Answer {
                answer: Answer::Left,
                answer_time_ms: 640,
                target: AnswerTarget::Navigate {
                    url: "/expe?expe=quest&iteration=3&answer=1".to_string()
                },
            }
        );
    }

    #[test]
    fn test_right_arrow_answers_zero() {
        let (mut session, start) = started(running_page(), AnswerMode::Form);
        let action = session.handle_key(KEYCODE_RIGHT_ARROW, start + Duration::milliseconds(12));

        assert_eq!(
            action,
            KeyAction::Answer {
                answer: Answer::Right,
                answer_time_ms: 12,
                target: AnswerTarget::Submit(FormSubmission::quest(12, "0")),
            }
        );
    }

    #[test]
    fn test_second_arrow_is_latched() {
        let (mut session, start) = started(running_page(), AnswerMode::Navigate);
        assert!(matches!(
            session.handle_key(KEYCODE_LEFT_ARROW, start),
            KeyAction::Answer { .. }
        ));
        assert!(session.is_latched());
        assert_eq!(
            session.handle_key(KEYCODE_RIGHT_ARROW, start),
            KeyAction::Ignored(IgnoreReason::Latched)
        );
        assert_eq!(
            session.handle_key(KEYCODE_LEFT_ARROW, start),
            KeyAction::Ignored(IgnoreReason::Latched)
        );
    }

    #[test]
    fn test_quit_works_after_latch() {
        let (mut session, start) = started(running_page(), AnswerMode::Navigate);
        session.handle_key(KEYCODE_LEFT_ARROW, start);
        assert_eq!(
            session.handle_key(KEYCODE_Q, start),
            KeyAction::Quit {
                url: "/".to_string()
            }
        );
    }

    #[test]
    fn test_enter_before_begin_appends_begin() {
        let page = PageContext::new("/expe?expe=quest").with_begin(false);
        let mut session = CaptureSession::new(page, AnswerMode::Navigate);

        assert_eq!(
            session.handle_key(KEYCODE_ENTER, Utc::now()),
            KeyAction::Begin {
                url: "/expe?expe=quest&begin=true".to_string()
            }
        );
    }

    #[test]
    fn test_enter_after_begin_ignored() {
        let (mut session, start) = started(running_page(), AnswerMode::Navigate);
        assert_eq!(
            session.handle_key(KEYCODE_ENTER, start),
            KeyAction::Ignored(IgnoreReason::AlreadyBegun)
        );
    }

    #[test]
    fn test_arrow_before_begin_does_not_latch() {
        let page = PageContext::new("/expe?expe=quest").with_begin(false);
        let (mut session, start) = started(page, AnswerMode::Navigate);

        assert_eq!(
            session.handle_key(KEYCODE_LEFT_ARROW, start),
            KeyAction::Ignored(IgnoreReason::NotStarted)
        );
        assert!(!session.is_latched());
    }

    #[test]
    fn test_quest_form_answers_without_begin() {
        let page = PageContext::new("/quest");
        let (mut session, start) = started(page, AnswerMode::Form);

        assert_eq!(
            session.handle_key(KEYCODE_LEFT_ARROW, start + Duration::milliseconds(300)),
            KeyAction::Answer {
                answer: Answer::Left,
                answer_time_ms: 300,
                target: AnswerTarget::Submit(FormSubmission::quest(300, "1")),
            }
        );
        assert!(session.is_latched());
    }

    #[test]
    fn test_arrow_after_end_ignored() {
        let page = running_page().with_end(true);
        let mut session = CaptureSession::new(page, AnswerMode::Navigate);
        assert!(!session.stimulus_visible(Utc::now()));
        assert_eq!(
            session.handle_key(KEYCODE_LEFT_ARROW, Utc::now()),
            KeyAction::Ignored(IgnoreReason::Ended)
        );
    }

    #[test]
    fn test_arrow_without_stimulus_ignored() {
        let mut session = CaptureSession::new(running_page(), AnswerMode::Navigate);
        assert_eq!(
            session.handle_key(KEYCODE_LEFT_ARROW, Utc::now()),
            KeyAction::Ignored(IgnoreReason::StimulusNotVisible)
        );
        assert!(!session.is_latched());
    }

    #[test]
    fn test_unbound_key_ignored() {
        let (mut session, start) = started(running_page(), AnswerMode::Navigate);
        assert_eq!(
            session.handle_key(65, start),
            KeyAction::Ignored(IgnoreReason::UnboundKey)
        );
    }

    #[test]
    fn test_first_iteration_is_zero() {
        let page = PageContext::new("/expe?expe=quest")
            .with_begin(true)
            .with_expe_url("/expe");
        let (mut session, start) = started(page, AnswerMode::Navigate);

        match session.handle_key(KEYCODE_RIGHT_ARROW, start) {
            KeyAction::Answer {
                target: AnswerTarget::Navigate { url },
                ..
            } => assert_eq!(url, "/expe?expe=quest&iteration=0&answer=0"),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_clock_skew_clamps_to_zero() {
        let (mut session, start) = started(running_page(), AnswerMode::Form);
        match session.handle_key(KEYCODE_LEFT_ARROW, start - Duration::milliseconds(5)) {
            KeyAction::Answer { answer_time_ms, .. } => assert_eq!(answer_time_ms, 0),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_button_submit() {
        let (mut session, start) = started(running_page(), AnswerMode::Form);
        let form = session
            .handle_submit("yes", start + Duration::milliseconds(300))
            .unwrap();

        assert_eq!(
            form.fields(),
            vec![
                ("binary-answer-time".to_string(), "300".to_string()),
                ("binary-answer-value".to_string(), "yes".to_string()),
            ]
        );
    }

    #[test]
    fn test_button_submit_requires_stimulus() {
        let mut session = CaptureSession::new(running_page(), AnswerMode::Form);
        assert_eq!(session.handle_submit("yes", Utc::now()), None);
    }
}
