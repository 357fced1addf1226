//! The owning session object for the real-time engine.
//!
//! One `Engine` is constructed at startup and owns every piece of mutable
//! session state: the open conversation, the per-conversation message logs,
//! the typing tracker and the single call session. All state mutation
//! happens inside its event loop — commands from the UI, notifications from
//! the signaling session and typing deadlines are processed to completion
//! in receipt order, so no locking is needed. State read before an await
//! may be stale by the time the call resolves; every write-back after an
//! await re-validates the relevant focus or call id first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use apothek_media::{
    CallSession, CallState, MediaError, MediaSource, NegotiationAction, PeerConnector,
    RemoteStream,
};
use apothek_shared::constants::SIGNAL_CHANNEL_CAPACITY;
use apothek_shared::{
    Attachment, CallId, CallKind, ConversationId, DeliveryStatus, Message, MessageId,
    ReactionAction, RejectReason, SignalEvent, UserId,
};
use apothek_signal::{spawn_session, SignalCommand, SignalNotification};

use crate::api::{ApiClient, Backend};
use crate::config::EngineConfig;
use crate::conversations::ConversationCache;
use crate::error::EngineError;
use crate::events::{CallStatePayload, UiEvent};
use crate::messages::MessageLog;
use crate::notify::{NotificationDispatcher, Notifier};
use crate::typing::{IndicatorUpdate, TypingEmit, TypingTracker};

/// The local user, as authenticated by the embedding shell.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub user_id: UserId,
    pub display_name: String,
}

/// User-initiated actions dispatched into the engine.
#[derive(Debug)]
pub enum EngineCommand {
    RefreshConversations,
    OpenConversation(ConversationId),
    /// Window focus changed; regaining focus marks the open conversation read.
    SetFocus(bool),
    SendMessage {
        conversation: ConversationId,
        content: String,
        attachments: Vec<Attachment>,
    },
    /// A keystroke in the conversation's composer.
    InputActivity(ConversationId),
    LoadOlder(ConversationId),
    RefreshUnreadBadge,
    InitiateCall {
        conversation: ConversationId,
        kind: CallKind,
    },
    AcceptCall,
    RejectCall,
    /// Cancel an outgoing ring, or hang up an active call.
    HangUp,
    ToggleMute,
    ToggleVideo,
    StartScreenShare,
    StopScreenShare,
    /// The RTC stack discovered a local ICE candidate to trickle out.
    SendLocalCandidate { candidate: String },
    /// The RTC stack reported the negotiated session failed.
    NegotiationFailed,
    Shutdown,
}

/// Channels the UI shell holds onto.
pub struct EngineHandle {
    pub commands: mpsc::Sender<EngineCommand>,
    pub ui_events: mpsc::Receiver<UiEvent>,
}

pub struct Engine {
    identity: LocalIdentity,
    api: Arc<dyn Backend>,
    media: Arc<dyn MediaSource>,
    rtc: Arc<dyn PeerConnector>,
    dispatcher: NotificationDispatcher,
    signal_tx: mpsc::Sender<SignalCommand>,
    signal_rx: mpsc::Receiver<SignalNotification>,
    cmd_rx: mpsc::Receiver<EngineCommand>,
    ui_tx: mpsc::Sender<UiEvent>,
    page_size: u32,

    conversations: ConversationCache,
    logs: HashMap<ConversationId, MessageLog>,
    typing: TypingTracker,
    call: CallSession,
    open_conversation: Option<ConversationId>,
    focused: bool,
}

/// Spawn the signaling session and the engine task.
///
/// The returned handle carries the command sender and the UI event stream;
/// dropping the command sender shuts the engine down.
pub fn start(
    config: EngineConfig,
    identity: LocalIdentity,
    media: Arc<dyn MediaSource>,
    rtc: Arc<dyn PeerConnector>,
    notifier: Arc<dyn Notifier>,
) -> Result<EngineHandle, EngineError> {
    let (signal_tx, signal_rx) = spawn_session(config.session_config(), identity.user_id)?;
    let api = Arc::new(ApiClient::new(config.api_base_url.clone()));

    let (engine, handle) = Engine::new(
        &config, identity, api, media, rtc, notifier, signal_tx, signal_rx,
    );
    tokio::spawn(engine.run());
    Ok(handle)
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &EngineConfig,
        identity: LocalIdentity,
        api: Arc<dyn Backend>,
        media: Arc<dyn MediaSource>,
        rtc: Arc<dyn PeerConnector>,
        notifier: Arc<dyn Notifier>,
        signal_tx: mpsc::Sender<SignalCommand>,
        signal_rx: mpsc::Receiver<SignalNotification>,
    ) -> (Self, EngineHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        let (ui_tx, ui_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);

        let engine = Self {
            call: CallSession::new(identity.user_id),
            identity,
            api,
            media,
            rtc,
            dispatcher: NotificationDispatcher::new(notifier),
            signal_tx,
            signal_rx,
            cmd_rx,
            ui_tx,
            page_size: config.page_size,
            conversations: ConversationCache::new(),
            logs: HashMap::new(),
            typing: TypingTracker::new(),
            open_conversation: None,
            focused: true,
        };
        let handle = EngineHandle {
            commands: cmd_tx,
            ui_events: ui_rx,
        };
        (engine, handle)
    }

    /// The engine event loop. Runs until shutdown or both channels close.
    pub async fn run(mut self) {
        info!(user = %self.identity.user_id, "Engine started");

        loop {
            let deadline = self.typing.next_deadline();
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(EngineCommand::Shutdown) | None => {
                        let _ = self.signal_tx.send(SignalCommand::Shutdown).await;
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                },

                notification = self.signal_rx.recv() => match notification {
                    Some(notification) => self.handle_notification(notification).await,
                    None => {
                        warn!("Signaling session ended, stopping engine");
                        break;
                    }
                },

                _ = deadline_sleep(deadline) => self.flush_typing_deadlines().await,
            }
        }

        self.call.end();
        info!("Engine stopped");
    }

    // -- command handling ---------------------------------------------------

    /// Process one user command to completion.
    pub async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::RefreshConversations => self.refresh_conversations().await,
            EngineCommand::OpenConversation(id) => self.open_conversation(id).await,
            EngineCommand::SetFocus(focused) => self.set_focus(focused).await,
            EngineCommand::SendMessage {
                conversation,
                content,
                attachments,
            } => self.send_message(conversation, content, attachments).await,
            EngineCommand::InputActivity(conversation) => self.input_activity(conversation).await,
            EngineCommand::LoadOlder(conversation) => self.load_older(conversation).await,
            EngineCommand::RefreshUnreadBadge => self.refresh_unread_badge().await,
            EngineCommand::InitiateCall { conversation, kind } => {
                self.initiate_call(conversation, kind).await
            }
            EngineCommand::AcceptCall => self.accept_call().await,
            EngineCommand::RejectCall => self.reject_call().await,
            EngineCommand::HangUp => self.hang_up().await,
            EngineCommand::ToggleMute => self.toggle_mute().await,
            EngineCommand::ToggleVideo => self.toggle_video().await,
            EngineCommand::StartScreenShare => self.start_screen_share().await,
            EngineCommand::StopScreenShare => self.stop_screen_share().await,
            EngineCommand::SendLocalCandidate { candidate } => {
                self.send_local_candidate(candidate).await
            }
            EngineCommand::NegotiationFailed => self.negotiation_failed().await,
            EngineCommand::Shutdown => {}
        }
    }

    /// Process one signaling notification to completion.
    pub async fn handle_notification(&mut self, notification: SignalNotification) {
        match notification {
            SignalNotification::Connected { reconnect } => {
                self.emit_ui(UiEvent::SignalingOnline { online: true }).await;
                // Rooms are not re-subscribed by the transport; the engine
                // re-joins its active conversation explicitly.
                if let Some(conversation) = self.open_conversation {
                    if reconnect {
                        debug!(conversation = %conversation, "Re-joining room after reconnect");
                    }
                    self.join_room(conversation).await;
                }
            }
            SignalNotification::Disconnected => {
                self.emit_ui(UiEvent::SignalingOnline { online: false }).await;
            }
            SignalNotification::Event(event) => self.route_event(event).await,
        }
    }

    /// Typed router for every inbound hub event.
    async fn route_event(&mut self, event: SignalEvent) {
        match event {
            SignalEvent::NewMessage { message } => self.on_new_message(message).await,
            SignalEvent::MessageReceived { message_id, .. }
            | SignalEvent::MessageDelivered { message_id } => {
                self.apply_status_event(message_id, DeliveryStatus::Delivered).await
            }
            SignalEvent::MessageRead { message_id } => {
                self.apply_status_event(message_id, DeliveryStatus::Read).await
            }
            SignalEvent::TypingStatus {
                conversation_id,
                user_id,
                is_typing,
            } => self.on_remote_typing(conversation_id, user_id, is_typing).await,
            SignalEvent::MessageEdited { message_id, content } => {
                self.on_message_edited(message_id, content).await
            }
            SignalEvent::MessageDeleted { message_id } => {
                self.on_message_deleted(message_id).await
            }
            SignalEvent::MessageReaction {
                message_id,
                user_id,
                emoji,
                action,
            } => self.on_message_reaction(message_id, user_id, emoji, action).await,
            SignalEvent::IncomingCall {
                call_id,
                call_type,
                caller_id,
                caller_name,
            } => self.on_incoming_call(call_id, call_type, caller_id, caller_name).await,
            SignalEvent::CallAccepted { call_id } => self.on_call_accepted(call_id).await,
            SignalEvent::CallRejected { call_id, reason } => {
                self.on_call_rejected(call_id, reason).await
            }
            SignalEvent::CallEnded { call_id } => self.on_call_ended(call_id).await,
            SignalEvent::WebrtcOffer { offer, call_id, .. } => {
                self.on_webrtc_offer(call_id, offer).await
            }
            SignalEvent::WebrtcAnswer { answer, call_id, .. } => {
                self.on_webrtc_answer(call_id, answer).await
            }
            SignalEvent::WebrtcIceCandidate { candidate, call_id, .. } => {
                self.on_webrtc_candidate(call_id, candidate).await
            }
            SignalEvent::UserConnected { user_id } => {
                debug!(user = %user_id, "Peer announced on hub");
            }
            SignalEvent::JoinConversation { user_id, .. } => {
                debug!(user = %user_id, "Peer joined conversation room");
            }
        }
    }

    // -- conversations & messages -------------------------------------------

    async fn refresh_conversations(&mut self) {
        match self.api.conversations().await {
            Ok(conversations) => {
                self.conversations.replace_all(conversations.clone());
                self.emit_ui(UiEvent::ConversationsLoaded { conversations }).await;
            }
            Err(e) => self.fail("refresh_conversations", e).await,
        }
    }

    async fn open_conversation(&mut self, conversation: ConversationId) {
        if self.conversations.get(conversation).is_none() {
            self.fail(
                "open_conversation",
                EngineError::UnknownConversation(conversation),
            )
            .await;
            return;
        }

        self.open_conversation = Some(conversation);
        self.join_room(conversation).await;

        if self.logs.get(&conversation).map_or(true, |l| l.is_empty()) {
            match self
                .api
                .messages_before(conversation, None, self.page_size)
                .await
            {
                Ok(page) => {
                    // The user may have switched away while the fetch ran.
                    if self.open_conversation != Some(conversation) {
                        debug!(conversation = %conversation, "Discarding stale initial page");
                        return;
                    }
                    let outcome = self.log_for(conversation).prepend_page(page);
                    self.emit_ui(UiEvent::PageLoaded {
                        conversation_id: conversation,
                        inserted: outcome.inserted,
                        anchor: outcome.anchor,
                    })
                    .await;
                }
                Err(e) => {
                    self.fail("load_messages", e).await;
                    return;
                }
            }
        }

        self.mark_conversation_read(conversation).await;
    }

    async fn set_focus(&mut self, focused: bool) {
        self.focused = focused;
        if focused {
            if let Some(conversation) = self.open_conversation {
                self.mark_conversation_read(conversation).await;
            }
        }
    }

    async fn send_message(
        &mut self,
        conversation: ConversationId,
        content: String,
        attachments: Vec<Attachment>,
    ) {
        let Some(receiver) = self.conversations.peer_of(conversation) else {
            self.fail(
                "send_message",
                EngineError::UnknownConversation(conversation),
            )
            .await;
            return;
        };

        // Sending supersedes any pending typing state.
        if let Some(TypingEmit::Stop(c)) = self.typing.on_local_send(conversation) {
            self.emit_typing(c, false).await;
        }

        match self.api.send_message(receiver, &content, &attachments).await {
            Ok(message) => {
                // The log always holds the server-confirmed record; the id
                // and timestamp come from the canonical response.
                let conversation = message.conversation_id;
                self.log_for(conversation).append(message.clone());
                if let Some(c) = self.conversations.apply_new_message(&message, false) {
                    let c = c.clone();
                    self.emit_ui(UiEvent::ConversationUpdated { conversation: c }).await;
                }
                self.emit_ui(UiEvent::MessageAppended {
                    conversation_id: conversation,
                    message: message.clone(),
                })
                .await;
                // Fan out so the peer renders it without a refetch.
                self.emit_signal(SignalEvent::NewMessage { message }).await;
            }
            // The composer keeps its content; recovery is the user
            // re-attempting.
            Err(e) => self.fail("send_message", e).await,
        }
    }

    async fn on_new_message(&mut self, message: Message) {
        if message.sender_id == self.identity.user_id {
            // Our own fan-out echoed back by the hub.
            debug!(message = %message.id, "Ignoring echo of own message");
            return;
        }

        let conversation = message.conversation_id;
        let open = self.open_conversation == Some(conversation);

        if open {
            if self.log_for(conversation).append(message.clone()) {
                // Acknowledge arrival so the sender's tick advances.
                self.emit_signal(SignalEvent::MessageReceived {
                    message_id: message.id,
                    sender_id: message.sender_id,
                })
                .await;
                self.emit_ui(UiEvent::MessageAppended {
                    conversation_id: conversation,
                    message: message.clone(),
                })
                .await;
            }

            if self.focused {
                if let Some(c) = self.conversations.apply_new_message(&message, false) {
                    let c = c.clone();
                    self.emit_ui(UiEvent::ConversationUpdated { conversation: c }).await;
                }
                self.mark_conversation_read(conversation).await;
            } else {
                self.bump_unread_and_notify(&message).await;
            }
        } else {
            self.bump_unread_and_notify(&message).await;
        }
    }

    async fn bump_unread_and_notify(&mut self, message: &Message) {
        let sender_name = self
            .conversations
            .get(message.conversation_id)
            .map(|c| c.peer.display_name.clone())
            .unwrap_or_else(|| message.sender_id.to_string());

        if let Some(c) = self.conversations.apply_new_message(message, true) {
            let c = c.clone();
            self.emit_ui(UiEvent::ConversationUpdated { conversation: c }).await;
        }
        self.dispatcher.notify_new_message(message, &sender_name);
    }

    /// Idempotent: flips the remaining unread messages to read, notifies the
    /// server, and emits one read receipt per transitioned message.
    async fn mark_conversation_read(&mut self, conversation: ConversationId) {
        let Some(peer) = self.conversations.peer_of(conversation) else {
            return;
        };

        let user_id = self.identity.user_id;
        let transitioned = self.log_for(conversation).mark_inbound_read(user_id);

        if !transitioned.is_empty() {
            if let Err(e) = self.api.mark_read(peer).await {
                self.fail("mark_read", e).await;
            }
            for message_id in transitioned {
                self.emit_signal(SignalEvent::MessageRead { message_id }).await;
            }
        }

        if let Some(c) = self.conversations.clear_unread(conversation) {
            let c = c.clone();
            self.emit_ui(UiEvent::ConversationUpdated { conversation: c }).await;
        }
    }

    async fn load_older(&mut self, conversation: ConversationId) {
        // A page already in flight makes this a no-op.
        if !self.conversations.begin_page(conversation) {
            return;
        }

        let before = self.logs.get(&conversation).and_then(|l| l.oldest_id());
        let result = self
            .api
            .messages_before(conversation, before, self.page_size)
            .await;
        self.conversations.finish_page(conversation);

        match result {
            Ok(page) => {
                // Superseded result: the user switched conversations while
                // the fetch was in flight.
                if self.open_conversation != Some(conversation) {
                    debug!(conversation = %conversation, "Discarding stale page");
                    return;
                }
                let outcome = self.log_for(conversation).prepend_page(page);
                self.emit_ui(UiEvent::PageLoaded {
                    conversation_id: conversation,
                    inserted: outcome.inserted,
                    anchor: outcome.anchor,
                })
                .await;
            }
            Err(e) => self.fail("load_older", e).await,
        }
    }

    async fn apply_status_event(&mut self, message_id: MessageId, status: DeliveryStatus) {
        let applied = self
            .logs
            .values_mut()
            .any(|log| log.apply_status(message_id, status));
        if applied {
            self.emit_ui(UiEvent::MessageStatusChanged { message_id, status }).await;
        }
    }

    async fn on_message_edited(&mut self, message_id: MessageId, content: String) {
        let updated = self.patch_message(message_id, |log| {
            log.apply_edit(message_id, content.clone()).cloned()
        });
        if let Some((conversation_id, message)) = updated {
            self.emit_ui(UiEvent::MessageUpdated {
                conversation_id,
                message,
            })
            .await;
        }
    }

    async fn on_message_deleted(&mut self, message_id: MessageId) {
        let updated = self.patch_message(message_id, |log| log.apply_delete(message_id).cloned());
        if let Some((conversation_id, message)) = updated {
            self.emit_ui(UiEvent::MessageUpdated {
                conversation_id,
                message,
            })
            .await;
        }
    }

    async fn on_message_reaction(
        &mut self,
        message_id: MessageId,
        user_id: UserId,
        emoji: String,
        action: ReactionAction,
    ) {
        let updated = self.patch_message(message_id, |log| {
            log.apply_reaction(message_id, user_id, &emoji, action).cloned()
        });
        if let Some((conversation_id, message)) = updated {
            self.emit_ui(UiEvent::MessageUpdated {
                conversation_id,
                message,
            })
            .await;
        }
    }

    /// Apply a targeted in-place patch to whichever log holds the message.
    fn patch_message(
        &mut self,
        message_id: MessageId,
        patch: impl Fn(&mut MessageLog) -> Option<Message>,
    ) -> Option<(ConversationId, Message)> {
        for (&conversation_id, log) in self.logs.iter_mut() {
            if log.contains(message_id) {
                return patch(log).map(|m| (conversation_id, m));
            }
        }
        debug!(message = %message_id, "Patch for unknown message ignored");
        None
    }

    // -- typing -------------------------------------------------------------

    async fn input_activity(&mut self, conversation: ConversationId) {
        if let Some(TypingEmit::Start(c)) = self.typing.on_local_input(conversation, Instant::now())
        {
            self.emit_typing(c, true).await;
        }
    }

    async fn flush_typing_deadlines(&mut self) {
        let (emits, updates) = self.typing.poll(Instant::now());
        for emit in emits {
            if let TypingEmit::Stop(conversation) = emit {
                self.emit_typing(conversation, false).await;
            }
        }
        for update in updates {
            if let IndicatorUpdate::Cleared { conversation, user } = update {
                self.emit_ui(UiEvent::TypingChanged {
                    conversation_id: conversation,
                    user_id: user,
                    is_typing: false,
                })
                .await;
            }
        }
    }

    async fn on_remote_typing(
        &mut self,
        conversation: ConversationId,
        user: UserId,
        is_typing: bool,
    ) {
        let update = self.typing.on_remote(conversation, user, is_typing, Instant::now());
        match update {
            Some(IndicatorUpdate::Shown { conversation, user }) => {
                self.emit_ui(UiEvent::TypingChanged {
                    conversation_id: conversation,
                    user_id: user,
                    is_typing: true,
                })
                .await;
            }
            Some(IndicatorUpdate::Cleared { conversation, user }) => {
                self.emit_ui(UiEvent::TypingChanged {
                    conversation_id: conversation,
                    user_id: user,
                    is_typing: false,
                })
                .await;
            }
            None => {}
        }
    }

    async fn emit_typing(&mut self, conversation: ConversationId, is_typing: bool) {
        self.emit_signal(SignalEvent::TypingStatus {
            conversation_id: conversation,
            user_id: self.identity.user_id,
            is_typing,
        })
        .await;
    }

    // -- notifications ------------------------------------------------------

    async fn refresh_unread_badge(&mut self) {
        // Always the server's total, never a local sum — read receipts from
        // the user's other devices must be reflected.
        match self.api.unread_count().await {
            Ok(count) => {
                self.dispatcher.update_badge(count);
                self.emit_ui(UiEvent::UnreadBadge { count }).await;
            }
            Err(e) => self.fail("refresh_unread_badge", e).await,
        }
    }

    // -- calls --------------------------------------------------------------

    async fn initiate_call(&mut self, conversation: ConversationId, kind: CallKind) {
        if !self.call.is_idle() {
            self.fail("initiate_call", MediaError::Busy).await;
            return;
        }
        let Some(peer) = self.conversations.peer_of(conversation) else {
            self.fail(
                "initiate_call",
                EngineError::UnknownConversation(conversation),
            )
            .await;
            return;
        };

        // Step 1: acquire media. A permission failure aborts here, before
        // any call record exists.
        let media = match self.media.acquire(kind).await {
            Ok(media) => media,
            Err(e) => {
                self.fail("acquire_media", e).await;
                return;
            }
        };

        // Step 2: persist the call record. On failure the devices acquired
        // in step 1 are released immediately.
        let record = match self.api.initiate_call(peer, kind).await {
            Ok(record) => record,
            Err(e) => {
                let mut media = media;
                media.stop_all();
                self.fail("initiate_call", e).await;
                return;
            }
        };

        // Step 3: transition and broadcast the ring.
        if let Err(e) = self.call.start_outgoing(record.id, peer, kind, media) {
            self.fail("initiate_call", e).await;
            return;
        }
        self.emit_signal(SignalEvent::IncomingCall {
            call_id: record.id,
            call_type: kind,
            caller_id: self.identity.user_id,
            caller_name: self.identity.display_name.clone(),
        })
        .await;
        self.emit_call_state().await;
    }

    async fn on_incoming_call(
        &mut self,
        call_id: CallId,
        kind: CallKind,
        caller_id: UserId,
        caller_name: String,
    ) {
        match self
            .call
            .ring_incoming(call_id, caller_id, caller_name.clone(), kind)
        {
            Ok(()) => {
                self.dispatcher.notify_incoming_call(call_id, &caller_name);
                self.emit_call_state().await;
            }
            Err(MediaError::Busy) => {
                // Explicit busy rejection so the caller's ring terminates
                // instead of waiting indefinitely.
                self.emit_signal(SignalEvent::CallRejected {
                    call_id,
                    reason: RejectReason::Busy,
                })
                .await;
            }
            Err(e) => warn!(call = %call_id, error = %e, "Dropping incoming call event"),
        }
    }

    async fn accept_call(&mut self) {
        let (Some(call_id), Some(kind)) = (self.call.call_id(), self.call.kind()) else {
            self.fail("accept_call", MediaError::NotInCall).await;
            return;
        };
        if self.call.state() != CallState::Incoming {
            self.fail(
                "accept_call",
                MediaError::InvalidState {
                    expected: "incoming",
                    actual: self.call.state().name(),
                },
            )
            .await;
            return;
        }

        // Acquire media matching the call kind; a denial leaves the session
        // ringing at its prior stable state.
        let media = match self.media.acquire(kind).await {
            Ok(media) => media,
            Err(e) => {
                self.fail("acquire_media", e).await;
                return;
            }
        };

        // The ring may have been torn down while the await ran.
        if self.call.call_id() != Some(call_id) || self.call.state() != CallState::Incoming {
            let mut media = media;
            media.stop_all();
            return;
        }

        if let Err(e) = self.api.answer_call(call_id).await {
            let mut media = media;
            media.stop_all();
            self.fail("answer_call", e).await;
            return;
        }

        if let Err(e) = self.call.accept(media) {
            self.fail("accept_call", e).await;
            return;
        }
        self.emit_signal(SignalEvent::CallAccepted { call_id }).await;
        self.emit_call_state().await;
        // Negotiation continues when the caller's offer arrives.
    }

    async fn on_call_accepted(&mut self, call_id: CallId) {
        if self.call.call_id() != Some(call_id) || self.call.state() != CallState::Outgoing {
            debug!(call = %call_id, "Ignoring accept for a call we no longer hold");
            return;
        }
        if let Err(e) = self.call.on_accepted() {
            warn!(call = %call_id, error = %e, "Accept transition failed");
            return;
        }
        self.emit_call_state().await;

        // Caller side starts the offer/answer exchange.
        match self.rtc.create_offer().await {
            Ok(sdp) => {
                if self.call.call_id() != Some(call_id) {
                    return;
                }
                let event = self.call.negotiation_mut().map(|n| n.create_offer(sdp));
                if let Some(event) = event {
                    self.emit_signal(event).await;
                }
            }
            Err(e) => {
                warn!(call = %call_id, error = %e, "Offer creation failed");
                self.finish_call("failed", true, true).await;
            }
        }
    }

    async fn reject_call(&mut self) {
        if self.call.state() != CallState::Incoming {
            self.fail("reject_call", MediaError::NotInCall).await;
            return;
        }
        let Some(call_id) = self.call.call_id() else {
            return;
        };

        self.emit_signal(SignalEvent::CallRejected {
            call_id,
            reason: RejectReason::Declined,
        })
        .await;
        if let Err(e) = self.api.reject_call(call_id).await {
            self.fail("reject_call", e).await;
        }

        self.rtc.close().await;
        self.call.end();
        self.emit_ui(UiEvent::CallEnded {
            call_id,
            reason: "declined".to_string(),
        })
        .await;
        self.emit_call_state().await;
    }

    async fn hang_up(&mut self) {
        match self.call.state() {
            CallState::Idle => {}
            CallState::Incoming => self.reject_call().await,
            CallState::Outgoing => self.finish_call("cancelled", true, true).await,
            CallState::Active => self.finish_call("hung_up", true, true).await,
        }
    }

    async fn on_call_rejected(&mut self, call_id: CallId, reason: RejectReason) {
        if self.call.call_id() != Some(call_id) {
            debug!(call = %call_id, "Ignoring reject for a call we no longer hold");
            return;
        }
        let reason = match reason {
            RejectReason::Busy => "busy",
            RejectReason::Declined => "rejected",
        };
        self.finish_call(reason, false, false).await;
    }

    async fn on_call_ended(&mut self, call_id: CallId) {
        if self.call.call_id() != Some(call_id) {
            debug!(call = %call_id, "Ignoring end for a call we no longer hold");
            return;
        }
        self.finish_call("peer_ended", false, false).await;
    }

    async fn negotiation_failed(&mut self) {
        if let Some(negotiation) = self.call.negotiation_mut() {
            let NegotiationAction::EndCall = negotiation.handle_failure() else {
                return;
            };
            self.finish_call("failed", true, true).await;
        }
    }

    /// Shared terminal path. Teardown itself is idempotent; a second call
    /// with no session is a no-op.
    async fn finish_call(&mut self, reason: &str, notify_api: bool, emit_signal: bool) {
        let Some(call_id) = self.call.call_id() else {
            return;
        };

        if emit_signal {
            self.emit_signal(SignalEvent::CallEnded { call_id }).await;
        }
        if notify_api {
            if let Err(e) = self.api.end_call(call_id).await {
                warn!(call = %call_id, error = %e, "Call end not persisted");
            }
        }

        self.rtc.close().await;
        self.call.end();

        self.emit_ui(UiEvent::CallEnded {
            call_id,
            reason: reason.to_string(),
        })
        .await;
        self.emit_call_state().await;
    }

    async fn toggle_mute(&mut self) {
        match self.call.toggle_mute() {
            Ok(_) => self.emit_call_state().await,
            Err(e) => self.fail("toggle_mute", e).await,
        }
    }

    async fn toggle_video(&mut self) {
        match self.call.toggle_video() {
            Ok(_) => self.emit_call_state().await,
            Err(e) => self.fail("toggle_video", e).await,
        }
    }

    async fn start_screen_share(&mut self) {
        if self.call.state() != CallState::Active {
            self.fail("start_screen_share", MediaError::NotInCall).await;
            return;
        }
        let call_id = self.call.call_id();

        let screen = match self.media.acquire_screen().await {
            Ok(track) => track,
            Err(e) => {
                self.fail("acquire_screen", e).await;
                return;
            }
        };
        // The call may have ended while the picker was open.
        if self.call.call_id() != call_id || self.call.state() != CallState::Active {
            screen.stop();
            return;
        }

        match self.call.start_screen_share(screen) {
            Ok(()) => self.emit_call_state().await,
            Err(e) => self.fail("start_screen_share", e).await,
        }
    }

    async fn stop_screen_share(&mut self) {
        match self.call.stop_screen_share() {
            Ok(()) => self.emit_call_state().await,
            Err(e) => self.fail("stop_screen_share", e).await,
        }
    }

    // -- negotiation --------------------------------------------------------

    async fn on_webrtc_offer(&mut self, call_id: CallId, offer: String) {
        if self.call.call_id() != Some(call_id) {
            debug!(call = %call_id, "Ignoring offer for a call we no longer hold");
            return;
        }
        let action = match self.call.negotiation_mut() {
            Some(negotiation) => negotiation.handle_offer(offer),
            None => return,
        };
        let NegotiationAction::CreateAnswer {
            remote_offer,
            candidates,
        } = action
        else {
            return;
        };

        match self.rtc.create_answer(&remote_offer).await {
            Ok(answer) => {
                if self.call.call_id() != Some(call_id) {
                    return;
                }
                if !self.apply_candidates(call_id, candidates).await {
                    return;
                }
                let event = self.call.negotiation_mut().map(|n| n.create_answer(answer));
                if let Some(event) = event {
                    self.emit_signal(event).await;
                }
                let _ = self.call.attach_remote_stream(RemoteStream::new());
                self.emit_call_state().await;
            }
            Err(e) => {
                warn!(call = %call_id, error = %e, "Answer creation failed");
                self.finish_call("failed", true, true).await;
            }
        }
    }

    async fn on_webrtc_answer(&mut self, call_id: CallId, answer: String) {
        if self.call.call_id() != Some(call_id) {
            debug!(call = %call_id, "Ignoring answer for a call we no longer hold");
            return;
        }
        let action = match self.call.negotiation_mut() {
            Some(negotiation) => negotiation.handle_answer(answer),
            None => return,
        };
        let NegotiationAction::ApplyAnswer {
            remote_answer,
            candidates,
        } = action
        else {
            return;
        };

        match self.rtc.apply_answer(&remote_answer).await {
            Ok(()) => {
                if self.call.call_id() != Some(call_id) {
                    return;
                }
                if !self.apply_candidates(call_id, candidates).await {
                    return;
                }
                let _ = self.call.attach_remote_stream(RemoteStream::new());
                self.emit_call_state().await;
            }
            Err(e) => {
                warn!(call = %call_id, error = %e, "Remote answer rejected");
                self.finish_call("failed", true, true).await;
            }
        }
    }

    async fn on_webrtc_candidate(&mut self, call_id: CallId, candidate: String) {
        if self.call.call_id() != Some(call_id) {
            debug!(call = %call_id, "Ignoring candidate for a call we no longer hold");
            return;
        }
        let action = match self.call.negotiation_mut() {
            Some(negotiation) => negotiation.handle_candidate(candidate),
            None => return,
        };
        match action {
            NegotiationAction::ApplyCandidate(candidate) => {
                if let Err(e) = self.rtc.apply_candidate(&candidate).await {
                    warn!(call = %call_id, error = %e, "Candidate rejected");
                    self.finish_call("failed", true, true).await;
                }
            }
            NegotiationAction::CandidateQueued => {}
            _ => {}
        }
    }

    /// Apply queued candidates in order. Returns `false` when the call had
    /// to be torn down.
    async fn apply_candidates(&mut self, call_id: CallId, candidates: Vec<String>) -> bool {
        for candidate in candidates {
            if let Err(e) = self.rtc.apply_candidate(&candidate).await {
                warn!(call = %call_id, error = %e, "Queued candidate rejected");
                self.finish_call("failed", true, true).await;
                return false;
            }
        }
        true
    }

    async fn send_local_candidate(&mut self, candidate: String) {
        let event = self
            .call
            .negotiation_mut()
            .map(|n| n.local_candidate(candidate));
        match event {
            Some(event) => self.emit_signal(event).await,
            None => debug!("Dropping local candidate without a negotiation"),
        }
    }

    // -- plumbing -----------------------------------------------------------

    async fn join_room(&mut self, conversation: ConversationId) {
        if let Some(peer) = self.conversations.peer_of(conversation) {
            self.emit_signal(SignalEvent::JoinConversation {
                user_id: self.identity.user_id,
                other_user_id: peer,
            })
            .await;
        }
    }

    fn log_for(&mut self, conversation: ConversationId) -> &mut MessageLog {
        self.logs.entry(conversation).or_default()
    }

    async fn emit_signal(&self, event: SignalEvent) {
        if self
            .signal_tx
            .send(SignalCommand::Emit(event))
            .await
            .is_err()
        {
            warn!("Signaling session gone, event dropped");
        }
    }

    async fn emit_ui(&self, event: UiEvent) {
        if self.ui_tx.send(event).await.is_err() {
            debug!("UI receiver gone, event dropped");
        }
    }

    async fn emit_call_state(&self) {
        self.emit_ui(UiEvent::CallStateChanged {
            call: self.call_snapshot(),
        })
        .await;
    }

    fn call_snapshot(&self) -> CallStatePayload {
        CallStatePayload {
            state: self.call.state().name().to_string(),
            call_id: self.call.call_id(),
            kind: self.call.kind(),
            peer: self.call.peer(),
            peer_name: self.call.peer_name().map(str::to_string),
            muted: self.call.is_muted(),
            screen_sharing: self.call.is_screen_sharing(),
        }
    }

    async fn fail(&self, action: &str, error: impl std::fmt::Display) {
        warn!(action, error = %error, "Action failed");
        self.emit_ui(UiEvent::ActionFailed {
            action: action.to_string(),
            error: error.to_string(),
        })
        .await;
    }

    // -- test support -------------------------------------------------------

    /// Current call state, for assertions.
    pub fn call_state(&self) -> CallState {
        self.call.state()
    }

    /// Capture devices still held by the call session.
    pub fn live_track_count(&self) -> usize {
        self.call.live_track_count()
    }

    /// Read access to a conversation's log.
    pub fn log(&self, conversation: ConversationId) -> Option<&MessageLog> {
        self.logs.get(&conversation)
    }
}

async fn deadline_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}
