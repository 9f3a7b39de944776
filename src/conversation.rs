//! Transcript ownership and the per-submission state machine.
//!
//! A submission moves `Idle -> AwaitingFirstDelta -> Streaming -> Closed`,
//! or ends in `Failed` from any of the first three. Only one submission is
//! in flight at a time; a second `begin` while busy is rejected.
//!
//! Failure policy: whatever was streamed before a failure is kept, the open
//! turn is closed as-is, and exactly one error turn is appended after it.

use crate::personality::Personality;
use crate::provider::{
    ChatRequest, Channel, Delta, DeltaStream, HistoryEntry, Provider, Speaker, StreamError,
};
use std::sync::Arc;
use std::time::Instant;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

pub type SharedProvider = Arc<dyn Provider + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    Message,
    /// Shown when a personality is selected; never sent upstream.
    Greeting,
    /// Synthesized from a failed submission.
    Error,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub speaker: Speaker,
    pub kind: TurnKind,
    pub content: String,
    /// Only ever filled for assistant turns.
    pub reasoning: String,
    pub created_at: Instant,
}

impl Turn {
    fn new(speaker: Speaker, kind: TurnKind, content: String) -> Self {
        Self {
            speaker,
            kind,
            content,
            reasoning: String::new(),
            created_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingFirstDelta,
    Streaming,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct HistoryPolicy {
    /// Number of most recent turns forwarded as context.
    pub window: usize,
    pub skip_error_turns: bool,
}

impl Default for HistoryPolicy {
    fn default() -> Self {
        Self {
            window: 6,
            skip_error_turns: true,
        }
    }
}

/// A started submission, ready to open its upstream stream.
pub struct Submission {
    provider: SharedProvider,
    request: ChatRequest,
}

impl Submission {
    pub fn request(&self) -> &ChatRequest {
        &self.request
    }

    /// Open the upstream stream. The future is `'static` so it can be spawned.
    ///
    /// Cancelling before the provider answers abandons the request and yields
    /// an empty stream.
    pub async fn start(self) -> Result<DeltaStream, StreamError> {
        let cancel = self.request.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("submission cancelled while connecting");
                Ok(Box::pin(tokio_stream::empty::<Result<Delta, StreamError>>()) as DeltaStream)
            }
            res = self.provider.stream_chat(self.request) => res,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Empty input or a submission already in flight.
    Ignored,
    Completed,
    /// Carries the submitted text so the caller can put it back in the input.
    Failed { restored_input: String },
}

pub struct Conversation {
    provider: SharedProvider,
    personality: Personality,
    policy: HistoryPolicy,
    turns: Vec<Turn>,
    phase: Phase,
    open: Option<usize>,
    pending_input: String,
    cancel: Option<CancellationToken>,
}

impl Conversation {
    pub fn new(provider: SharedProvider, personality: Personality, policy: HistoryPolicy) -> Self {
        let mut c = Self {
            provider,
            personality,
            policy,
            turns: Vec::new(),
            phase: Phase::Idle,
            open: None,
            pending_input: String::new(),
            cancel: None,
        };
        c.reset();
        c
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.phase, Phase::AwaitingFirstDelta | Phase::Streaming)
    }

    pub fn personality(&self) -> &Personality {
        &self.personality
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Switch personality. Abandons any in-flight stream and starts over.
    pub fn set_personality(&mut self, personality: Personality) {
        self.personality = personality;
        self.reset();
    }

    /// Drop the transcript and start over with a fresh greeting.
    pub fn reset(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.turns.clear();
        self.open = None;
        self.pending_input.clear();
        self.phase = Phase::Idle;

        let greeting = format!(
            "{} ({}) active. Profile: {}. Ready for deep analysis.",
            self.provider.name(),
            self.provider.model(),
            self.personality.label()
        );
        self.turns
            .push(Turn::new(Speaker::Assistant, TurnKind::Greeting, greeting));
    }

    /// Record the user turn and build the upstream request.
    ///
    /// Returns `None` for blank input or while another submission is busy.
    pub fn begin(&mut self, text: &str) -> Option<Submission> {
        if text.trim().is_empty() {
            return None;
        }
        if self.is_busy() {
            tracing::debug!("submission rejected: stream in flight");
            return None;
        }

        let history = self.history();
        self.turns
            .push(Turn::new(Speaker::User, TurnKind::Message, text.to_string()));
        self.open = None;
        self.pending_input = text.to_string();
        self.phase = Phase::AwaitingFirstDelta;

        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());

        tracing::debug!(history = history.len(), persona = %self.personality.id, "submitting");
        Some(Submission {
            provider: self.provider.clone(),
            request: ChatRequest {
                message: text.to_string(),
                history,
                system_instruction: self.personality.instruction.clone(),
                cancel,
            },
        })
    }

    /// Last `window` eligible turns, oldest first.
    fn history(&self) -> Vec<HistoryEntry> {
        let eligible: Vec<&Turn> = self
            .turns
            .iter()
            .filter(|t| match t.kind {
                TurnKind::Greeting => false,
                TurnKind::Error => !self.policy.skip_error_turns,
                TurnKind::Message => true,
            })
            .filter(|t| !t.content.is_empty())
            .collect();

        let skip = eligible.len().saturating_sub(self.policy.window);
        eligible
            .into_iter()
            .skip(skip)
            .map(|t| HistoryEntry {
                speaker: t.speaker,
                text: t.content.clone(),
            })
            .collect()
    }

    /// Fold one delta into the open assistant turn, opening it on the first.
    pub fn apply(&mut self, delta: &Delta) {
        let idx = match (self.phase, self.open) {
            (Phase::Streaming, Some(idx)) => idx,
            (Phase::AwaitingFirstDelta, _) => {
                self.turns
                    .push(Turn::new(Speaker::Assistant, TurnKind::Message, String::new()));
                self.phase = Phase::Streaming;
                let idx = self.turns.len() - 1;
                self.open = Some(idx);
                idx
            }
            (phase, _) => {
                tracing::debug!(?phase, "dropping delta outside of a stream");
                return;
            }
        };

        let turn = &mut self.turns[idx];
        match delta.channel {
            Channel::Reasoning => turn.reasoning.push_str(&delta.text),
            Channel::Content => turn.content.push_str(&delta.text),
        }
    }

    /// Normal end of stream.
    pub fn complete(&mut self) {
        if !self.is_busy() {
            return;
        }
        tracing::debug!(opened = self.open.is_some(), "stream finished");
        self.settle(Phase::Closed);
    }

    /// Record a failed submission and hand back the text to restore.
    pub fn fail(&mut self, err: &StreamError) -> String {
        if !self.is_busy() {
            tracing::debug!(error = %err, "failure outside a stream dropped");
            return String::new();
        }
        tracing::warn!(error = %err, provider = self.provider.name(), "submission failed");
        let message = user_message(self.provider.name(), err);
        self.settle(Phase::Failed);
        self.turns
            .push(Turn::new(Speaker::Assistant, TurnKind::Error, message));
        std::mem::take(&mut self.pending_input)
    }

    /// Abort the in-flight stream, keeping whatever already arrived.
    pub fn cancel(&mut self) {
        if !self.is_busy() {
            return;
        }
        if let Some(token) = &self.cancel {
            token.cancel();
        }
        tracing::info!("stream cancelled by user");
        self.settle(Phase::Closed);
    }

    fn settle(&mut self, phase: Phase) {
        self.open = None;
        self.cancel = None;
        self.phase = phase;
        if phase == Phase::Closed {
            self.pending_input.clear();
        }
    }

    /// Drive one whole submission, calling `observe` after every applied
    /// delta so the caller can render the transcript between reads.
    pub async fn submit<F>(&mut self, text: &str, mut observe: F) -> Outcome
    where
        F: FnMut(&Delta, &[Turn]),
    {
        let Some(submission) = self.begin(text) else {
            return Outcome::Ignored;
        };

        // Cancels the stream and clears busy if this future is dropped early.
        let mut guard = InFlight { conv: self };

        let mut stream = match submission.start().await {
            Ok(s) => s,
            Err(e) => {
                return Outcome::Failed {
                    restored_input: guard.conv.fail(&e),
                }
            }
        };

        while let Some(item) = stream.next().await {
            match item {
                Ok(delta) => {
                    guard.conv.apply(&delta);
                    observe(&delta, &guard.conv.turns);
                }
                Err(e) => {
                    return Outcome::Failed {
                        restored_input: guard.conv.fail(&e),
                    }
                }
            }
        }

        guard.conv.complete();
        Outcome::Completed
    }
}

struct InFlight<'a> {
    conv: &'a mut Conversation,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.conv.cancel();
    }
}

/// Text shown in the transcript for a failed submission.
pub fn user_message(provider: &str, err: &StreamError) -> String {
    match err {
        StreamError::MissingCredential { env_var, .. } => {
            format!("No API key configured for {provider}. Set {env_var} or API_KEY.")
        }
        StreamError::InvalidCredential { env_var, .. } => {
            format!("The {provider} API key is malformed (it contains characters not allowed in a header). Check {env_var}.")
        }
        e if e.is_unauthorized() => {
            format!("{provider} rejected the API key (HTTP 401). Check your credentials.")
        }
        StreamError::UpstreamHttp { message, .. } => {
            format!("Critical error: {message}. Check your {provider} API limits.")
        }
        StreamError::StreamRead(detail) => format!("Connection lost while streaming: {detail}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::personality;
    use crate::provider::stub::{Script, ScriptedProvider, Step};
    use pretty_assertions::assert_eq;
    use reqwest::StatusCode;

    fn persona() -> Personality {
        Personality {
            id: "terse".into(),
            name: "Terse".into(),
            emoji: String::new(),
            description: String::new(),
            instruction: "You are terse.".into(),
        }
    }

    fn conversation(provider: &ScriptedProvider, window: usize) -> Conversation {
        Conversation::new(
            Arc::new(provider.clone()),
            persona(),
            HistoryPolicy {
                window,
                skip_error_turns: true,
            },
        )
    }

    /// Transcript without the greeting, as (speaker, kind, content, reasoning).
    fn visible(c: &Conversation) -> Vec<(Speaker, TurnKind, String, String)> {
        c.turns()
            .iter()
            .filter(|t| t.kind != TurnKind::Greeting)
            .map(|t| (t.speaker, t.kind, t.content.clone(), t.reasoning.clone()))
            .collect()
    }

    #[test]
    fn starts_with_greeting_only() {
        let c = conversation(&ScriptedProvider::default(), 6);
        assert_eq!(c.turns().len(), 1);
        assert_eq!(c.turns()[0].kind, TurnKind::Greeting);
        assert!(c.turns()[0].content.contains("Profile: Terse"));
        assert_eq!(c.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn terse_answer() {
        let p = ScriptedProvider::streaming(vec![Delta::content("4")]);
        let mut c = conversation(&p, 6);

        let outcome = c.submit("2+2?", |_, _| {}).await;

        assert_eq!(outcome, Outcome::Completed);
        assert_eq!(
            visible(&c),
            vec![
                (Speaker::User, TurnKind::Message, "2+2?".into(), String::new()),
                (Speaker::Assistant, TurnKind::Message, "4".into(), String::new()),
            ]
        );
        let req = &p.requests()[0];
        assert_eq!(req.message, "2+2?");
        assert!(req.history.is_empty());
        assert_eq!(req.system_instruction, "You are terse.");
        assert!(!c.is_busy());
        assert_eq!(c.phase(), Phase::Closed);
    }

    #[tokio::test]
    async fn reasoning_and_content_accumulate_separately() {
        let p = ScriptedProvider::streaming(vec![
            Delta::reasoning("Because..."),
            Delta::reasoning(" math."),
            Delta::content("It just is."),
        ]);
        let mut c = conversation(&p, 6);

        let mut seen_turn_counts = Vec::new();
        c.submit("why?", |_, turns| seen_turn_counts.push(turns.len()))
            .await;

        // One assistant turn, opened on the first delta and reused after.
        assert_eq!(seen_turn_counts, vec![3, 3, 3]);
        let last = c.turns().last().expect("assistant turn");
        assert_eq!(last.speaker, Speaker::Assistant);
        assert_eq!(last.reasoning, "Because... math.");
        assert_eq!(last.content, "It just is.");
    }

    #[tokio::test]
    async fn blank_input_is_a_noop() {
        let p = ScriptedProvider::streaming(vec![Delta::content("never")]);
        let mut c = conversation(&p, 6);

        assert_eq!(c.submit("   \n\t", |_, _| {}).await, Outcome::Ignored);
        assert_eq!(c.turns().len(), 1);
        assert!(p.requests().is_empty());
    }

    #[tokio::test]
    async fn unauthorized_before_stream_adds_error_turn() {
        let p = ScriptedProvider::new(vec![Script::Reject(StreamError::UpstreamHttp {
            status: StatusCode::UNAUTHORIZED,
            message: "Authentication Fails".into(),
        })]);
        let mut c = conversation(&p, 6);

        let outcome = c.submit("hello", |_, _| {}).await;

        assert_eq!(
            outcome,
            Outcome::Failed {
                restored_input: "hello".into()
            }
        );
        let v = visible(&c);
        assert_eq!(v.len(), 2);
        assert_eq!(v[1].0, Speaker::Assistant);
        assert_eq!(v[1].1, TurnKind::Error);
        assert!(v[1].2.contains("HTTP 401"));
        assert!(!c.is_busy());
        assert_eq!(c.phase(), Phase::Failed);
    }

    #[cfg(feature = "deepseek")]
    #[tokio::test]
    async fn missing_key_becomes_error_turn() {
        use crate::provider::deepseek::{DeepSeekProvider, DEFAULT_MAX_TOKENS};
        use crate::provider::ReadOptions;

        let provider = DeepSeekProvider::new(
            reqwest::Client::new(),
            None,
            reqwest::Url::parse("http://127.0.0.1:1/v1/").expect("url"),
            "deepseek-reasoner".into(),
            DEFAULT_MAX_TOKENS,
            ReadOptions { idle_timeout: None },
        );
        let mut c = Conversation::new(Arc::new(provider), persona(), HistoryPolicy::default());

        let outcome = c.submit("hello", |_, _| {}).await;

        assert_eq!(
            outcome,
            Outcome::Failed {
                restored_input: "hello".into()
            }
        );
        let errors: Vec<_> = c
            .turns()
            .iter()
            .filter(|t| t.kind == TurnKind::Error)
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].content,
            "No API key configured for DeepSeek. Set DEEPSEEK_API_KEY or API_KEY."
        );
        assert!(!c.is_busy());
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_partial_turn() {
        let p = ScriptedProvider::new(vec![Script::Stream(vec![
            Step::Delta(Delta::content("par")),
            Step::Delta(Delta::content("tial")),
            Step::Break("connection reset".into()),
        ])]);
        let mut c = conversation(&p, 6);

        let outcome = c.submit("go", |_, _| {}).await;

        assert!(matches!(outcome, Outcome::Failed { ref restored_input } if restored_input == "go"));
        let v = visible(&c);
        assert_eq!(v.len(), 3);
        assert_eq!(v[1].2, "partial");
        assert_eq!(v[2].1, TurnKind::Error);
        assert_eq!(v[2].2, "Connection lost while streaming: connection reset");
    }

    #[tokio::test]
    async fn empty_stream_completes_without_assistant_turn() {
        let p = ScriptedProvider::streaming(Vec::new());
        let mut c = conversation(&p, 6);

        assert_eq!(c.submit("anyone?", |_, _| {}).await, Outcome::Completed);
        assert_eq!(visible(&c).len(), 1);
    }

    #[test]
    fn trims_history_to_window_oldest_first() {
        let p = ScriptedProvider::default();
        let mut c = conversation(&p, 10);
        for i in 0..12 {
            let speaker = if i % 2 == 0 {
                Speaker::User
            } else {
                Speaker::Assistant
            };
            c.turns
                .push(Turn::new(speaker, TurnKind::Message, format!("turn {i}")));
        }

        let sub = c.begin("next").expect("accepted");
        let texts: Vec<&str> = sub
            .request()
            .history
            .iter()
            .map(|h| h.text.as_str())
            .collect();
        let expected: Vec<String> = (2..12).map(|i| format!("turn {i}")).collect();
        assert_eq!(texts, expected.iter().map(String::as_str).collect::<Vec<_>>());
        assert_eq!(sub.request().history[0].speaker, Speaker::User);
    }

    #[test]
    fn error_turns_follow_policy() {
        let p = ScriptedProvider::default();
        let mut c = conversation(&p, 10);
        c.turns
            .push(Turn::new(Speaker::User, TurnKind::Message, "q".into()));
        c.turns
            .push(Turn::new(Speaker::Assistant, TurnKind::Error, "boom".into()));

        let sub = c.begin("again").expect("accepted");
        assert_eq!(sub.request().history.len(), 1);
        c.complete();

        c.policy.skip_error_turns = false;
        let sub = c.begin("once more").expect("accepted");
        let texts: Vec<&str> = sub
            .request()
            .history
            .iter()
            .map(|h| h.text.as_str())
            .collect();
        assert_eq!(texts, vec!["q", "boom", "again"]);
    }

    #[test]
    fn busy_rejects_second_submission() {
        let p = ScriptedProvider::default();
        let mut c = conversation(&p, 6);

        assert!(c.begin("first").is_some());
        assert!(c.is_busy());
        assert!(c.begin("second").is_none());
        assert_eq!(visible(&c).len(), 1);

        c.complete();
        assert!(!c.is_busy());
        assert!(c.begin("second").is_some());
    }

    #[test]
    fn deltas_outside_a_stream_are_dropped() {
        let p = ScriptedProvider::default();
        let mut c = conversation(&p, 6);
        c.apply(&Delta::content("stray"));
        assert_eq!(c.turns().len(), 1);

        c.begin("q").expect("accepted");
        c.apply(&Delta::content("a"));
        c.complete();
        c.apply(&Delta::content("late"));
        assert_eq!(c.turns().last().map(|t| t.content.as_str()), Some("a"));
    }

    #[test]
    fn cancel_fires_token_and_keeps_partial() {
        let p = ScriptedProvider::default();
        let mut c = conversation(&p, 6);

        let sub = c.begin("long question").expect("accepted");
        c.apply(&Delta::reasoning("thinking"));
        c.cancel();

        assert!(sub.request().cancel.is_cancelled());
        assert!(!c.is_busy());
        let last = c.turns().last().expect("turn");
        assert_eq!(last.reasoning, "thinking");
        assert_eq!(last.kind, TurnKind::Message);
    }

    #[tokio::test]
    async fn cancel_while_connecting_abandons_request() {
        let p = ScriptedProvider::new(vec![Script::Hang]);
        let mut c = conversation(&p, 6);

        let sub = c.begin("slow").expect("accepted");
        c.cancel();

        let stream = tokio::time::timeout(std::time::Duration::from_secs(5), sub.start())
            .await
            .expect("start returns once cancelled")
            .expect("cancelled start is not an error");
        assert!(stream.collect::<Vec<_>>().await.is_empty());
        assert!(!c.is_busy());
        assert_eq!(visible(&c).len(), 1);
    }

    #[test]
    fn failure_outside_a_stream_is_dropped() {
        let p = ScriptedProvider::default();
        let mut c = conversation(&p, 6);
        let err = StreamError::StreamRead("late".into());

        assert_eq!(c.fail(&err), "");
        assert_eq!(c.turns().len(), 1);
        assert_eq!(c.phase(), Phase::Idle);

        c.begin("q").expect("accepted");
        c.apply(&Delta::content("a"));
        c.complete();
        assert_eq!(c.fail(&err), "");
        assert_eq!(c.phase(), Phase::Closed);
        assert!(c.turns().iter().all(|t| t.kind != TurnKind::Error));
    }

    #[test]
    fn switching_personality_resets_and_cancels() {
        let p = ScriptedProvider::default();
        let mut c = conversation(&p, 6);
        let sub = c.begin("hi").expect("accepted");

        let coder = personality::builtins().remove(2);
        c.set_personality(coder);

        assert!(sub.request().cancel.is_cancelled());
        assert!(!c.is_busy());
        assert_eq!(c.turns().len(), 1);
        assert!(c.turns()[0].content.contains("Code Master"));
        assert_eq!(c.personality().id, "ds-coder");
    }

    #[test]
    fn user_messages_per_error() {
        let missing = StreamError::MissingCredential {
            provider: "DeepSeek",
            env_var: "DEEPSEEK_API_KEY",
        };
        assert_eq!(
            user_message("DeepSeek", &missing),
            "No API key configured for DeepSeek. Set DEEPSEEK_API_KEY or API_KEY."
        );

        let malformed = StreamError::InvalidCredential {
            provider: "DeepSeek",
            env_var: "DEEPSEEK_API_KEY",
        };
        let text = user_message("DeepSeek", &malformed);
        assert!(text.contains("malformed"));
        assert!(text.contains("DEEPSEEK_API_KEY"));
        assert!(!text.contains("No API key configured"));

        let limited = StreamError::UpstreamHttp {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: "Rate limit reached".into(),
        };
        assert_eq!(
            user_message("Gemini", &limited),
            "Critical error: Rate limit reached. Check your Gemini API limits."
        );
    }
}
